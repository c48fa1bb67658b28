// SPDX-License-Identifier: Apache-2.0 OR MIT
//! eventline: a low-allocation event dispatch core.
//!
//! Producers hand events to a [`Router`], which delivers them to named
//! [`Destination`]s, each fanning out to an ordered list of [`Appender`]s.
//!
//! ```text
//! producer ──send()──► Router ──(sync)──────────────────────┐
//!                         │                                 ▼
//!                         └─(async)─► RingBuffer ─► consumer thread(s)
//!                                                           │
//!                          DestinationRegistry::write(index, entry)
//!                                                           │
//!                                  Destination ─► appender, appender, ...
//! ```
//!
//! In async mode every ring slot owns a pre-allocated [`EventEntry`] that
//! is overwritten in place, so steady-state publishing does not allocate.

#[macro_use]
mod macros;

pub mod appender;
pub mod config;
pub mod destination;
pub mod entry;
pub mod error;
pub mod monitor;
pub mod registry;
pub mod ringbuffer;
pub mod router;
pub mod severity;
pub mod template;
pub mod wait;
pub mod writer;

pub use appender::{Appender, ConsoleAppender, ConsoleStream, FileAppender, MemoryAppender, MemoryHandle};
pub use config::{
    AppenderConfig, Backpressure, Config, ConfigError, DestinationConfig, FallbackConfig,
    RouterConfig, RouterMode, StreamConfig, WaitConfig,
};
pub use destination::{Destination, DestinationState};
pub use entry::{Event, EventEntry, EventView, Payload, RenderBuffer, Template, Value};
pub use error::{
    AppenderError, AppenderFailure, DestinationError, DestinationRef, DispatchError, RouterError,
};
pub use monitor::{Monitor, MonitorEvent, NoopMonitor, RecordingMonitor, StderrMonitor};
pub use registry::DestinationRegistry;
pub use ringbuffer::{Claim, Consumer, ProducerMode, RingBuffer};
pub use router::{timestamp_now, EventHandle, Router, RouterState};
pub use severity::Severity;
pub use template::{TemplateId, TemplateTable};
pub use wait::{Fallback, Signal, WaitError, WaitStrategy};
pub use writer::{EventWriter, Layout, TimestampFormat};
