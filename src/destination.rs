// SPDX-License-Identifier: Apache-2.0 OR MIT
// Named destination: ordered appender fan-out with lifecycle

use std::panic::{self, AssertUnwindSafe};

use crate::appender::Appender;
use crate::entry::{EventEntry, EventView, Payload, RenderBuffer};
use crate::error::{panic_message, AppenderError, DestinationError, DispatchError};
use crate::severity::Severity;
use crate::writer::EventWriter;

/// Lifecycle of a [`Destination`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationState {
    Created,
    Started,
    Stopped,
}

/// A named output target that fans each event out to its appenders
pub struct Destination {
    name: String,
    /// In-flight bound for asynchronous routing (0 = ring capacity only)
    capacity: usize,
    min_level: Option<Severity>,
    capture: bool,
    appenders: Vec<Box<dyn Appender>>,
    state: DestinationState,
    captured: Vec<u8>,
    scratch: RenderBuffer,
}

impl Destination {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: 0,
            min_level: None,
            capture: false,
            appenders: Vec::new(),
            state: DestinationState::Created,
            captured: Vec::new(),
            scratch: RenderBuffer::new(),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_min_level(mut self, level: Severity) -> Self {
        self.min_level = Some(level);
        self
    }

    /// Keep a copy of every rendered event for [`Destination::take_captured`]
    pub fn with_capture(mut self, capture: bool) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_appender(mut self, appender: Box<dyn Appender>) -> Self {
        self.appenders.push(appender);
        self
    }

    pub fn add_appender(&mut self, appender: Box<dyn Appender>) {
        self.appenders.push(appender);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn min_level(&self) -> Option<Severity> {
        self.min_level
    }

    pub fn captures(&self) -> bool {
        self.capture
    }

    pub fn state(&self) -> DestinationState {
        self.state
    }

    pub fn appender_count(&self) -> usize {
        self.appenders.len()
    }

    /// Start every appender in order
    ///
    /// If one fails, the ones already started are stopped again and the
    /// destination stays in its previous state.
    pub fn start(&mut self) -> Result<(), DestinationError> {
        if self.state == DestinationState::Started {
            return Ok(());
        }

        for i in 0..self.appenders.len() {
            if let Err(source) = self.appenders[i].start() {
                for started in self.appenders[..i].iter_mut().rev() {
                    let _ = started.stop();
                }
                return Err(DestinationError::Start {
                    destination: self.name.clone(),
                    appender: self.appenders[i].name().to_string(),
                    source,
                });
            }
        }

        self.state = DestinationState::Started;
        Ok(())
    }

    /// Stop every appender; failures are collected, all appenders are visited
    pub fn stop(&mut self) -> Result<(), DestinationError> {
        if self.state != DestinationState::Started {
            self.state = DestinationState::Stopped;
            return Ok(());
        }
        self.state = DestinationState::Stopped;

        let mut failures = DispatchError::default();
        for appender in &mut self.appenders {
            if let Err(e) = appender.flush() {
                failures.push(appender.name(), e);
            }
            if let Err(e) = appender.stop() {
                failures.push(appender.name(), e);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.into())
        }
    }

    fn check_started(&self) -> Result<(), DestinationError> {
        match self.state {
            DestinationState::Started => Ok(()),
            DestinationState::Created => Err(DestinationError::NotStarted(self.name.clone())),
            DestinationState::Stopped => Err(DestinationError::Stopped(self.name.clone())),
        }
    }

    /// Deliver a pooled entry, rendering it first unless it is pre-rendered
    pub fn write(&mut self, entry: &EventEntry, writer: &EventWriter) -> Result<(), DestinationError> {
        match entry.payload() {
            Payload::Empty => self.check_started(),
            Payload::Rendered => self.write_bytes(entry.rendered()),
            Payload::Args => self.write_event(entry, writer),
        }
    }

    /// Render any event into the scratch buffer and deliver it
    pub fn write_event<E: EventView + ?Sized>(
        &mut self,
        event: &E,
        writer: &EventWriter,
    ) -> Result<(), DestinationError> {
        self.check_started()?;

        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        writer.render(event, &mut scratch);
        let result = self.fan_out(&scratch);
        self.scratch = scratch;
        result
    }

    /// Deliver already rendered bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), DestinationError> {
        self.check_started()?;
        self.fan_out(bytes)
    }

    fn fan_out(&mut self, bytes: &[u8]) -> Result<(), DestinationError> {
        let mut failures = DispatchError::default();

        for appender in &mut self.appenders {
            let result = panic::catch_unwind(AssertUnwindSafe(|| appender.write(bytes)))
                .unwrap_or_else(|payload| Err(AppenderError::Panicked(panic_message(&*payload))));
            if let Err(e) = result {
                failures.push(appender.name(), e);
            }
        }

        if self.capture {
            self.captured.extend_from_slice(bytes);
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.into())
        }
    }

    /// Flush every appender
    pub fn flush(&mut self) -> Result<(), DestinationError> {
        if self.state != DestinationState::Started {
            return Ok(());
        }

        let mut failures = DispatchError::default();
        for appender in &mut self.appenders {
            let result = panic::catch_unwind(AssertUnwindSafe(|| appender.flush()))
                .unwrap_or_else(|payload| Err(AppenderError::Panicked(panic_message(&*payload))));
            if let Err(e) = result {
                failures.push(appender.name(), e);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.into())
        }
    }

    /// Bytes delivered since the last call (empty unless capturing)
    pub fn take_captured(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.captured)
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let appenders: Vec<&str> = self.appenders.iter().map(|a| a.name()).collect();
        f.debug_struct("Destination")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("capacity", &self.capacity)
            .field("min_level", &self.min_level)
            .field("capture", &self.capture)
            .field("appenders", &appenders)
            .finish()
    }
}
