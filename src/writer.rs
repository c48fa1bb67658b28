// SPDX-License-Identifier: Apache-2.0 OR MIT
// Event rendering: fixed-width prefix + template body

use std::fmt::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::{EventView, RenderBuffer, Template};
use crate::severity::Severity;
use crate::template::{self, TemplateTable};

/// Width of the raw nanosecond timestamp column
pub const RAW_TIMESTAMP_WIDTH: usize = 20;

/// Width of an RFC 3339 UTC timestamp with nanoseconds
pub const RFC3339_TIMESTAMP_WIDTH: usize = 30;

/// How the prefix renders the event timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampFormat {
    /// Nanoseconds, right-aligned
    #[default]
    Raw,
    /// `2024-01-01T00:00:00.000000000Z`
    Rfc3339,
}

/// Which parts of a rendered line are emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub prefix: bool,
    pub source: bool,
    pub newline: bool,
    pub timestamp: TimestampFormat,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            prefix: true,
            source: true,
            newline: true,
            timestamp: TimestampFormat::Raw,
        }
    }
}

impl Layout {
    /// Body only: no prefix, no source tag, no trailing newline
    pub const fn bare() -> Self {
        Self {
            prefix: false,
            source: false,
            newline: false,
            timestamp: TimestampFormat::Raw,
        }
    }
}

/// Renders events into byte buffers
///
/// Cloning is cheap; clones share the template table.
#[derive(Debug, Clone, Default)]
pub struct EventWriter {
    layout: Layout,
    templates: Arc<TemplateTable>,
}

impl EventWriter {
    pub fn new(layout: Layout, templates: Arc<TemplateTable>) -> Self {
        Self { layout, templates }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn templates(&self) -> &Arc<TemplateTable> {
        &self.templates
    }

    /// Append `LEVEL     TIMESTAMP ` and return the bytes written
    pub fn write_prefix(&self, level: Severity, timestamp: i64, buf: &mut RenderBuffer) -> usize {
        let start = buf.len();
        let _ = write!(buf, "{:<width$} ", level, width = Severity::NAME_WIDTH);

        match self.layout.timestamp {
            TimestampFormat::Raw => {
                let _ = write!(buf, "{:>width$} ", timestamp, width = RAW_TIMESTAMP_WIDTH);
            }
            TimestampFormat::Rfc3339 => {
                let ts = DateTime::<Utc>::from_timestamp_nanos(timestamp);
                let _ = write!(buf, "{} ", ts.format("%Y-%m-%dT%H:%M:%S%.9fZ"));
            }
        }

        buf.len() - start
    }

    /// Append the event body (template with arguments substituted)
    pub fn write_template<E: EventView + ?Sized>(&self, event: &E, buf: &mut RenderBuffer) -> usize {
        match event.template() {
            Template::Text(text) => template::expand(text, |i| event.arg(i), buf),
            Template::Id(id) => match self.templates.get(id) {
                Some(text) => template::expand(text, |i| event.arg(i), buf),
                None => {
                    let start = buf.len();
                    let _ = write!(buf, "<unknown template {}>", id);
                    buf.len() - start
                }
            },
        }
    }

    /// Append a complete line per the layout
    pub fn render<E: EventView + ?Sized>(&self, event: &E, buf: &mut RenderBuffer) -> usize {
        let start = buf.len();

        if self.layout.prefix {
            self.write_prefix(event.level(), event.timestamp(), buf);
        }

        if self.layout.source && !event.source().is_empty() {
            buf.push(b'[');
            buf.push_str(event.source());
            buf.push_str("] ");
        }

        self.write_template(event, buf);

        if self.layout.newline {
            buf.push(b'\n');
        }

        buf.len() - start
    }
}
