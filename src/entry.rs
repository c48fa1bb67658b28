// SPDX-License-Identifier: Apache-2.0 OR MIT
// Pooled event record and its reusable render buffer

use std::fmt;
use std::io;
use std::ops::Deref;

use crate::severity::Severity;
use crate::template::TemplateId;

/// Growable byte buffer owned by an entry, a destination or a sync call
///
/// Cleared between events but never shrunk, so after warm-up rendering
/// does not allocate.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct RenderBuffer {
    bytes: Vec<u8>,
}

impl RenderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    #[inline]
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    #[inline]
    pub fn push_str(&mut self, s: &str) {
        self.bytes.extend_from_slice(s.as_bytes());
    }

    #[inline]
    pub fn push(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    pub fn truncate(&mut self, len: usize) {
        self.bytes.truncate(len);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

impl Deref for RenderBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Write for RenderBuffer {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.bytes.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

impl io::Write for RenderBuffer {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for RenderBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.bytes))
    }
}

/// A positional template argument, borrowed from the caller
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    Str(&'a str),
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
    Char(char),
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::I64(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Char(v) => write!(f, "{}", v),
        }
    }
}

impl<'a> From<&'a str> for Value<'a> {
    fn from(v: &'a str) -> Self {
        Value::Str(v)
    }
}

impl<'a> From<&'a String> for Value<'a> {
    fn from(v: &'a String) -> Self {
        Value::Str(v.as_str())
    }
}

macro_rules! value_from {
    ($variant:ident, $target:ty: $($t:ty),*) => {
        $(
            impl From<$t> for Value<'_> {
                fn from(v: $t) -> Self {
                    Value::$variant(v as $target)
                }
            }
        )*
    };
}

value_from!(I64, i64: i8, i16, i32, i64, isize);
value_from!(U64, u64: u8, u16, u32, u64, usize);
value_from!(F64, f64: f32, f64);

impl From<bool> for Value<'_> {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<char> for Value<'_> {
    fn from(v: char) -> Self {
        Value::Char(v)
    }
}

/// Which template an event renders with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template<'a> {
    /// Pre-registered template, resolved by the writer's table
    Id(TemplateId),
    /// Template text supplied with the event
    Text(&'a str),
}

impl<'a> From<&'a str> for Template<'a> {
    fn from(text: &'a str) -> Self {
        Template::Text(text)
    }
}

impl From<TemplateId> for Template<'_> {
    fn from(id: TemplateId) -> Self {
        Template::Id(id)
    }
}

/// Read access to an event's fields, shared by pooled and borrowed events
pub trait EventView {
    fn level(&self) -> Severity;
    fn timestamp(&self) -> i64;
    fn source(&self) -> &str;
    fn template(&self) -> Template<'_>;
    fn arg(&self, index: usize) -> Option<Value<'_>>;
}

/// An event borrowed from the producer's stack (synchronous path)
#[derive(Debug, Clone, Copy)]
pub struct Event<'a> {
    pub level: Severity,
    pub timestamp: i64,
    pub source: &'a str,
    pub template: Template<'a>,
    pub args: &'a [Value<'a>],
}

impl EventView for Event<'_> {
    fn level(&self) -> Severity {
        self.level
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn source(&self) -> &str {
        self.source
    }

    fn template(&self) -> Template<'_> {
        self.template
    }

    fn arg(&self, index: usize) -> Option<Value<'_>> {
        self.args.get(index).copied()
    }
}

/// Which half of an entry is authoritative
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    /// Abandoned claim; consumers skip it
    Empty,
    /// Template + arguments, rendered by the consumer
    Args,
    /// Bytes already rendered by the producer
    Rendered,
}

#[derive(Clone, Copy)]
enum ArgSlot {
    Text { start: usize, end: usize },
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
    Char(char),
}

#[derive(Clone, Copy)]
enum TemplateSlot {
    Id(TemplateId),
    Text { start: usize, end: usize },
}

/// Pooled event record
///
/// One entry lives in every ring slot for the lifetime of the ring. Each
/// publish overwrites it in place: strings are copied into entry-owned
/// buffers that keep their capacity, so steady-state publishing does not
/// touch the allocator.
pub struct EventEntry {
    level: Severity,
    timestamp: i64,
    destination: usize,
    /// Registration generation of `destination` when the entry was routed
    generation: u64,
    sequence: u64,
    payload: Payload,
    template: TemplateSlot,
    source: String,
    /// Arena for inline template text and string arguments
    text: String,
    args: Vec<ArgSlot>,
    rendered: RenderBuffer,
}

impl EventEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill the entry with a template and its arguments (deferred rendering)
    pub fn set_event(
        &mut self,
        level: Severity,
        timestamp: i64,
        source: &str,
        template: Template<'_>,
        args: &[Value<'_>],
    ) {
        self.set_header(level, timestamp, source);
        self.text.clear();
        self.args.clear();

        self.template = match template {
            Template::Id(id) => TemplateSlot::Id(id),
            Template::Text(text) => {
                let (start, end) = self.push_text(text);
                TemplateSlot::Text { start, end }
            }
        };

        for arg in args {
            let slot = match *arg {
                Value::Str(s) => {
                    let (start, end) = self.push_text(s);
                    ArgSlot::Text { start, end }
                }
                Value::I64(v) => ArgSlot::I64(v),
                Value::U64(v) => ArgSlot::U64(v),
                Value::F64(v) => ArgSlot::F64(v),
                Value::Bool(v) => ArgSlot::Bool(v),
                Value::Char(v) => ArgSlot::Char(v),
            };
            self.args.push(slot);
        }
        self.payload = Payload::Args;
    }

    /// Fill the entry from a borrowed event
    pub fn copy_from(&mut self, event: &Event<'_>) {
        self.set_event(
            event.level,
            event.timestamp,
            event.source,
            event.template,
            event.args,
        );
    }

    /// Fill the entry with bytes the caller already formatted
    pub fn set_rendered(&mut self, level: Severity, timestamp: i64, source: &str, bytes: &[u8]) {
        self.set_header(level, timestamp, source);
        self.rendered.clear();
        self.rendered.extend_from_slice(bytes);
        self.payload = Payload::Rendered;
    }

    /// Clear the render buffer and hand it out for the caller to fill;
    /// the entry becomes pre-rendered
    pub fn rendered_mut(&mut self) -> &mut RenderBuffer {
        self.rendered.clear();
        self.payload = Payload::Rendered;
        &mut self.rendered
    }

    pub fn set_level(&mut self, level: Severity) {
        self.level = level;
    }

    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }

    pub fn set_source(&mut self, source: &str) {
        self.source.clear();
        self.source.push_str(source);
    }

    fn set_header(&mut self, level: Severity, timestamp: i64, source: &str) {
        self.level = level;
        self.timestamp = timestamp;
        self.set_source(source);
    }

    fn push_text(&mut self, s: &str) -> (usize, usize) {
        let start = self.text.len();
        self.text.push_str(s);
        (start, self.text.len())
    }

    pub(crate) fn reset(&mut self, destination: usize, generation: u64, sequence: u64) {
        self.payload = Payload::Empty;
        self.destination = destination;
        self.generation = generation;
        self.sequence = sequence;
    }

    pub(crate) fn discard(&mut self) {
        self.payload = Payload::Empty;
    }

    pub fn payload(&self) -> Payload {
        self.payload
    }

    pub fn is_rendered(&self) -> bool {
        self.payload == Payload::Rendered
    }

    /// Pre-rendered bytes (empty unless the payload is `Rendered`)
    pub fn rendered(&self) -> &[u8] {
        match self.payload {
            Payload::Rendered => self.rendered.as_slice(),
            _ => &[],
        }
    }

    /// Index of the destination this entry is routed to
    pub fn destination(&self) -> usize {
        self.destination
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Ring sequence of the last publish through this entry
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn arg_count(&self) -> usize {
        match self.payload {
            Payload::Args => self.args.len(),
            _ => 0,
        }
    }
}

impl EventView for EventEntry {
    fn level(&self) -> Severity {
        self.level
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn template(&self) -> Template<'_> {
        match self.template {
            TemplateSlot::Id(id) => Template::Id(id),
            TemplateSlot::Text { start, end } => Template::Text(&self.text[start..end]),
        }
    }

    fn arg(&self, index: usize) -> Option<Value<'_>> {
        if self.payload != Payload::Args {
            return None;
        }
        Some(match *self.args.get(index)? {
            ArgSlot::Text { start, end } => Value::Str(&self.text[start..end]),
            ArgSlot::I64(v) => Value::I64(v),
            ArgSlot::U64(v) => Value::U64(v),
            ArgSlot::F64(v) => Value::F64(v),
            ArgSlot::Bool(v) => Value::Bool(v),
            ArgSlot::Char(v) => Value::Char(v),
        })
    }
}

impl Default for EventEntry {
    fn default() -> Self {
        Self {
            level: Severity::Info,
            timestamp: 0,
            destination: 0,
            generation: 0,
            sequence: 0,
            payload: Payload::Empty,
            template: TemplateSlot::Text { start: 0, end: 0 },
            source: String::new(),
            text: String::new(),
            args: Vec::new(),
            rendered: RenderBuffer::new(),
        }
    }
}

impl fmt::Debug for EventEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("EventEntry");
        debug
            .field("level", &self.level)
            .field("timestamp", &self.timestamp)
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("payload", &self.payload);

        match self.payload {
            Payload::Args => {
                let args: Vec<_> = (0..self.args.len()).filter_map(|i| self.arg(i)).collect();
                debug.field("template", &self.template()).field("args", &args);
            }
            Payload::Rendered => {
                debug.field("rendered", &self.rendered);
            }
            Payload::Empty => {}
        }

        debug.finish()
    }
}
