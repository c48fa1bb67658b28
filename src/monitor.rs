// SPDX-License-Identifier: Apache-2.0 OR MIT
// Out-of-band reporting for failures that never reach a producer

use std::sync::{Mutex, PoisonError};

use crate::error::{AppenderError, RouterError};

/// Receives consumer-side failures
///
/// Called from consumer threads and from producers on the synchronous
/// path, so implementations must not block. Panics are caught by the
/// caller.
pub trait Monitor: Send + Sync {
    /// An appender refused (or panicked on) an event
    fn on_dispatch_error(&self, destination: &str, appender: &str, error: &AppenderError);

    /// Any other failure: stale routes, lifecycle errors, stop failures
    fn on_router_error(&self, error: &RouterError);
}

/// Writes one JSON object per failure to stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrMonitor;

impl Monitor for StderrMonitor {
    fn on_dispatch_error(&self, destination: &str, appender: &str, error: &AppenderError) {
        let msg = serde_json::json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "level": "ERROR",
            "event": "dispatch_error",
            "destination": destination,
            "appender": appender,
            "message": error.to_string(),
        });
        eprintln!("{}", msg);
    }

    fn on_router_error(&self, error: &RouterError) {
        let msg = serde_json::json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "level": "ERROR",
            "event": "router_error",
            "message": error.to_string(),
        });
        eprintln!("{}", msg);
    }
}

/// Discards every report
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl Monitor for NoopMonitor {
    fn on_dispatch_error(&self, _destination: &str, _appender: &str, _error: &AppenderError) {}

    fn on_router_error(&self, _error: &RouterError) {}
}

/// A report captured by [`RecordingMonitor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    Dispatch {
        destination: String,
        appender: String,
        message: String,
    },
    Router {
        message: String,
    },
}

/// Keeps every report in memory, for tests and diagnostics
#[derive(Debug, Default)]
pub struct RecordingMonitor {
    events: Mutex<Vec<MonitorEvent>>,
}

impl RecordingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MonitorEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `(destination, appender)` of every dispatch failure, in report order
    pub fn dispatch_errors(&self) -> Vec<(String, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                MonitorEvent::Dispatch {
                    destination,
                    appender,
                    ..
                } => Some((destination, appender)),
                MonitorEvent::Router { .. } => None,
            })
            .collect()
    }

    pub fn router_errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                MonitorEvent::Router { message } => Some(message),
                MonitorEvent::Dispatch { .. } => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, event: MonitorEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl Monitor for RecordingMonitor {
    fn on_dispatch_error(&self, destination: &str, appender: &str, error: &AppenderError) {
        self.record(MonitorEvent::Dispatch {
            destination: destination.to_string(),
            appender: appender.to_string(),
            message: error.to_string(),
        });
    }

    fn on_router_error(&self, error: &RouterError) {
        self.record(MonitorEvent::Router {
            message: error.to_string(),
        });
    }
}
