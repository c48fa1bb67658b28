// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Error taxonomy for the dispatch core.
//!
//! Producer-facing calls only surface errors the caller can act on
//! (`RouterClosed`, `DestinationNotFound`, `BufferOverflow`). Appender
//! failures happen on the consumer side and travel through the
//! [`Monitor`](crate::Monitor) instead.

use thiserror::Error;

use crate::config::ConfigError;

/// Failure reported by a sink
#[derive(Error, Debug)]
pub enum AppenderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("appender is not started")]
    NotStarted,

    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("appender panicked: {0}")]
    Panicked(String),
}

/// One failed appender inside a destination fan-out
#[derive(Debug)]
pub struct AppenderFailure {
    pub appender: String,
    pub error: AppenderError,
}

/// Aggregate of every appender failure seen while writing one event
///
/// Sibling appenders still received the bytes; this only lists the
/// ones that refused them.
#[derive(Error, Debug, Default)]
#[error("{} appender(s) failed: {}", .failures.len(), summarize(.failures))]
pub struct DispatchError {
    pub failures: Vec<AppenderFailure>,
}

impl DispatchError {
    pub fn push(&mut self, appender: &str, error: AppenderError) {
        self.failures.push(AppenderFailure {
            appender: appender.to_string(),
            error,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }
}

fn summarize(failures: &[AppenderFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.appender, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Destination lifecycle and fan-out errors
#[derive(Error, Debug)]
pub enum DestinationError {
    #[error("destination '{0}' has not been started")]
    NotStarted(String),

    #[error("destination '{0}' has been stopped")]
    Stopped(String),

    #[error("destination '{destination}' failed to start appender '{appender}': {source}")]
    Start {
        destination: String,
        appender: String,
        #[source]
        source: AppenderError,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// How a caller addressed a destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationRef {
    Index(usize),
    Name(String),
}

impl std::fmt::Display for DestinationRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DestinationRef::Index(index) => write!(f, "#{}", index),
            DestinationRef::Name(name) => write!(f, "'{}'", name),
        }
    }
}

/// Errors surfaced by the router and registry
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("router is closed")]
    RouterClosed,

    #[error("router is not running")]
    NotRunning,

    #[error("invalid router state: {0}")]
    InvalidState(&'static str),

    #[error("destination {0} not found")]
    DestinationNotFound(DestinationRef),

    #[error("destination '{0}' is already registered")]
    DuplicateDestination(String),

    #[error("buffer full, event dropped")]
    BufferOverflow,

    #[error(transparent)]
    Destination(#[from] DestinationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn consumer thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl RouterError {
    pub(crate) fn not_found_index(index: usize) -> Self {
        RouterError::DestinationNotFound(DestinationRef::Index(index))
    }

    pub(crate) fn not_found_name(name: &str) -> Self {
        RouterError::DestinationNotFound(DestinationRef::Name(name.to_string()))
    }
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
