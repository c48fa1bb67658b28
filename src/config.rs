// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Configuration file types and parsing for eventline.
//!
//! JSON5 configuration format supporting:
//! - Router mode, ring sizing, wait strategy and backpressure policy
//! - Named destinations with their appenders (resolved at load time)
//! - Pre-registered templates
//! - Comments and trailing commas

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::appender::{Appender, ConsoleAppender, ConsoleStream, FileAppender, MemoryAppender};
use crate::destination::Destination;
use crate::error::RouterError;
use crate::registry::DestinationRegistry;
use crate::ringbuffer::ProducerMode;
use crate::severity::Severity;
use crate::template::TemplateTable;
use crate::wait::{Fallback, WaitStrategy, DEFAULT_SLEEP};
use crate::writer::{EventWriter, Layout};

pub const DEFAULT_RING_CAPACITY: usize = 1024;
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Complete configuration (JSON5 file format)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub router: RouterConfig,

    /// Destinations in registration order; the first one is the default
    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,

    /// Templates addressable by `TemplateId` (position in this list)
    #[serde(default)]
    pub templates: Vec<String>,
}

/// Where events are rendered and written
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RouterMode {
    /// On the producer thread, inside `send`
    Sync,
    /// On dedicated consumer threads fed by the ring buffer
    #[default]
    Async,
}

/// What a producer does when the ring or a destination bound is saturated
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backpressure {
    /// Wait for space per the wait strategy
    #[default]
    Block,
    /// Fail with `BufferOverflow` and count the drop
    Drop,
}

/// Router settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterConfig {
    #[serde(default)]
    pub mode: RouterMode,

    /// Ring slots (power of two)
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default)]
    pub producer: ProducerMode,

    /// Consumer threads; destination `i` is served by consumer `i % consumers`
    #[serde(default = "default_consumers")]
    pub consumers: usize,

    #[serde(default)]
    pub wait: WaitConfig,

    #[serde(default)]
    pub backpressure: Backpressure,

    /// Global minimum severity
    #[serde(default = "default_level")]
    pub level: Severity,

    #[serde(default)]
    pub layout: Layout,

    /// Reusable entries kept for `get()` in sync mode
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_capacity() -> usize {
    DEFAULT_RING_CAPACITY
}

fn default_consumers() -> usize {
    1
}

fn default_level() -> Severity {
    Severity::Info
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            mode: RouterMode::default(),
            capacity: default_capacity(),
            producer: ProducerMode::default(),
            consumers: default_consumers(),
            wait: WaitConfig::default(),
            backpressure: Backpressure::default(),
            level: default_level(),
            layout: Layout::default(),
            pool_size: default_pool_size(),
        }
    }
}

impl RouterConfig {
    /// Validate ring sizing and wait parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mode == RouterMode::Async && !self.capacity.is_power_of_two() {
            return Err(ConfigError::InvalidCapacity {
                capacity: self.capacity,
                context: "router ring".to_string(),
            });
        }
        if self.consumers == 0 {
            return Err(ConfigError::InvalidConsumers(self.consumers));
        }
        self.wait.validate()
    }
}

/// Wait strategy selection; durations are in microseconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WaitConfig {
    #[default]
    Blocking,
    BusySpin,
    Yielding,
    Sleeping {
        #[serde(default = "default_sleep_us")]
        sleep_us: u64,
    },
    PhasedBackoff {
        spin_timeout_us: u64,
        yield_timeout_us: u64,
        #[serde(default)]
        fallback: FallbackConfig,
    },
    TimeoutBlocking {
        timeout_us: u64,
    },
}

/// Last phase of a phased backoff
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FallbackConfig {
    #[default]
    Block,
    Sleep {
        #[serde(default = "default_sleep_us")]
        sleep_us: u64,
    },
}

fn default_sleep_us() -> u64 {
    DEFAULT_SLEEP.as_micros() as u64
}

impl WaitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| {
            Err(ConfigError::InvalidWait {
                reason: reason.to_string(),
            })
        };
        match *self {
            WaitConfig::Sleeping { sleep_us: 0 } => invalid("sleeping: sleep_us must be > 0"),
            WaitConfig::TimeoutBlocking { timeout_us: 0 } => {
                invalid("timeout_blocking: timeout_us must be > 0")
            }
            WaitConfig::PhasedBackoff {
                fallback: FallbackConfig::Sleep { sleep_us: 0 },
                ..
            } => invalid("phased_backoff: fallback sleep_us must be > 0"),
            _ => Ok(()),
        }
    }

    pub fn to_strategy(&self) -> WaitStrategy {
        match *self {
            WaitConfig::Blocking => WaitStrategy::Blocking,
            WaitConfig::BusySpin => WaitStrategy::BusySpin,
            WaitConfig::Yielding => WaitStrategy::Yielding,
            WaitConfig::Sleeping { sleep_us } => WaitStrategy::Sleeping {
                sleep: Duration::from_micros(sleep_us),
            },
            WaitConfig::PhasedBackoff {
                spin_timeout_us,
                yield_timeout_us,
                fallback,
            } => WaitStrategy::PhasedBackoff {
                spin_timeout: Duration::from_micros(spin_timeout_us),
                yield_timeout: Duration::from_micros(yield_timeout_us),
                fallback: match fallback {
                    FallbackConfig::Block => Fallback::Block,
                    FallbackConfig::Sleep { sleep_us } => {
                        Fallback::Sleep(Duration::from_micros(sleep_us))
                    }
                },
            },
            WaitConfig::TimeoutBlocking { timeout_us } => WaitStrategy::TimeoutBlocking {
                timeout: Duration::from_micros(timeout_us),
            },
        }
    }
}

/// Destination as stored in config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DestinationConfig {
    pub name: String,

    /// Maximum events in flight for this destination (0 = ring-bounded)
    #[serde(default)]
    pub capacity: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_level: Option<Severity>,

    /// Keep rendered bytes for `Router::flush`
    #[serde(default)]
    pub capture: bool,

    #[serde(default)]
    pub appenders: Vec<AppenderConfig>,
}

impl DestinationConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: 0,
            min_level: None,
            capture: false,
            appenders: Vec::new(),
        }
    }

    /// Build the destination with its appenders (not started)
    pub fn build(&self) -> Destination {
        let mut destination = Destination::new(self.name.clone())
            .with_capacity(self.capacity)
            .with_capture(self.capture);
        if let Some(level) = self.min_level {
            destination = destination.with_min_level(level);
        }
        for appender in &self.appenders {
            destination.add_appender(appender.build());
        }
        destination
    }
}

/// Standard stream for console appenders
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamConfig {
    #[default]
    Stdout,
    Stderr,
}

/// Appender selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AppenderConfig {
    Console {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        stream: StreamConfig,
    },
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        path: PathBuf,
    },
    Memory {
        name: String,
    },
}

impl AppenderConfig {
    /// Name the built appender reports errors under
    pub fn name(&self) -> String {
        match self {
            AppenderConfig::Console { name: Some(n), .. } => n.clone(),
            AppenderConfig::Console { stream, .. } => match stream {
                StreamConfig::Stdout => "stdout".to_string(),
                StreamConfig::Stderr => "stderr".to_string(),
            },
            AppenderConfig::File { name: Some(n), .. } => n.clone(),
            AppenderConfig::File { path, .. } => path.display().to_string(),
            AppenderConfig::Memory { name } => name.clone(),
        }
    }

    pub fn build(&self) -> Box<dyn Appender> {
        match self {
            AppenderConfig::Console { stream, .. } => {
                let stream = match stream {
                    StreamConfig::Stdout => ConsoleStream::Stdout,
                    StreamConfig::Stderr => ConsoleStream::Stderr,
                };
                Box::new(ConsoleAppender::new(self.name(), stream))
            }
            AppenderConfig::File { path, .. } => Box::new(FileAppender::new(self.name(), path)),
            AppenderConfig::Memory { name } => Box::new(MemoryAppender::new(name.clone())),
        }
    }
}

impl Config {
    /// Load configuration from a JSON5 file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Serialize configuration to JSON5 string (with pretty formatting)
    pub fn to_json5(&self) -> String {
        // Plain JSON is valid JSON5; json5 has no pretty printer
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_json5();
        std::fs::write(path, content)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.router.validate()?;

        if self.destinations.is_empty() {
            return Err(ConfigError::MissingDefaultDestination);
        }

        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (idx, dest) in self.destinations.iter().enumerate() {
            if dest.name.trim().is_empty() {
                return Err(ConfigError::InvalidDestinationName {
                    index: idx,
                    reason: "destination name cannot be empty".to_string(),
                });
            }
            if let Some(prev) = seen.insert(dest.name.as_str(), idx) {
                return Err(ConfigError::DuplicateDestination {
                    name: dest.name.clone(),
                    indices: (prev, idx),
                });
            }
            validate_appenders(dest)?;
        }
        Ok(())
    }

    pub fn template_table(&self) -> TemplateTable {
        TemplateTable::from_templates(self.templates.iter().cloned())
    }

    pub fn event_writer(&self) -> EventWriter {
        EventWriter::new(self.router.layout, Arc::new(self.template_table()))
    }

    /// Build a registry holding every configured destination, in order
    pub fn build_registry(&self) -> Result<DestinationRegistry, RouterError> {
        let registry = DestinationRegistry::new(self.event_writer());
        for dest in &self.destinations {
            registry.register(dest.build())?;
        }
        Ok(registry)
    }
}

fn validate_appenders(dest: &DestinationConfig) -> Result<(), ConfigError> {
    let mut names: HashMap<String, usize> = HashMap::new();
    for (idx, appender) in dest.appenders.iter().enumerate() {
        if let AppenderConfig::File { path, .. } = appender {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::InvalidAppender {
                    destination: dest.name.clone(),
                    reason: format!("appender {}: file path cannot be empty", idx),
                });
            }
        }
        let name = appender.name();
        if name.is_empty() {
            return Err(ConfigError::InvalidAppender {
                destination: dest.name.clone(),
                reason: format!("appender {}: name cannot be empty", idx),
            });
        }
        if let Some(prev) = names.insert(name.clone(), idx) {
            return Err(ConfigError::InvalidAppender {
                destination: dest.name.clone(),
                reason: format!(
                    "appenders {} and {} share the name '{}'",
                    prev, idx, name
                ),
            });
        }
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    IoError(PathBuf, String),
    ParseError(String),
    InvalidCapacity {
        capacity: usize,
        context: String,
    },
    InvalidConsumers(usize),
    InvalidWait {
        reason: String,
    },
    MissingDefaultDestination,
    InvalidDestinationName {
        index: usize,
        reason: String,
    },
    DuplicateDestination {
        name: String,
        indices: (usize, usize),
    },
    InvalidAppender {
        destination: String,
        reason: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, msg) => {
                write!(
                    f,
                    "failed to read config file '{}': {}",
                    path.display(),
                    msg
                )
            }
            ConfigError::ParseError(msg) => write!(f, "failed to parse config: {}", msg),
            ConfigError::InvalidCapacity { capacity, context } => {
                write!(
                    f,
                    "invalid capacity {} for {}: must be a non-zero power of two",
                    capacity, context
                )
            }
            ConfigError::InvalidConsumers(n) => {
                write!(f, "invalid consumer count {}: at least one is required", n)
            }
            ConfigError::InvalidWait { reason } => {
                write!(f, "invalid wait strategy: {}", reason)
            }
            ConfigError::MissingDefaultDestination => {
                write!(f, "no destinations configured: the first one is the default")
            }
            ConfigError::InvalidDestinationName { index, reason } => {
                write!(f, "invalid destination {}: {}", index, reason)
            }
            ConfigError::DuplicateDestination { name, indices } => {
                write!(
                    f,
                    "duplicate destination '{}' (destinations {} and {})",
                    name, indices.0, indices.1
                )
            }
            ConfigError::InvalidAppender {
                destination,
                reason,
            } => {
                write!(f, "invalid appender in destination '{}': {}", destination, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
