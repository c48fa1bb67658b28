// SPDX-License-Identifier: Apache-2.0 OR MIT
// Output sinks for rendered events

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::AppenderError;

/// Output sink for rendered events
///
/// Owned by exactly one destination, which serializes calls; appenders
/// need to be `Send` but not `Sync`.
pub trait Appender: Send {
    /// Name used in error reports
    fn name(&self) -> &str;

    /// Acquire resources (open files, etc.)
    fn start(&mut self) -> Result<(), AppenderError> {
        Ok(())
    }

    /// Release resources; must tolerate being called when not started
    fn stop(&mut self) -> Result<(), AppenderError> {
        Ok(())
    }

    /// Write one rendered event
    fn write(&mut self, bytes: &[u8]) -> Result<(), AppenderError>;

    /// Flush any buffered output
    fn flush(&mut self) -> Result<(), AppenderError> {
        Ok(())
    }
}

/// Which standard stream a [`ConsoleAppender`] writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleStream {
    Stdout,
    Stderr,
}

/// Writes to stdout or stderr
pub struct ConsoleAppender {
    name: String,
    stream: ConsoleStream,
}

impl ConsoleAppender {
    pub fn new(name: impl Into<String>, stream: ConsoleStream) -> Self {
        Self {
            name: name.into(),
            stream,
        }
    }

    pub fn stdout() -> Self {
        Self::new("stdout", ConsoleStream::Stdout)
    }

    pub fn stderr() -> Self {
        Self::new("stderr", ConsoleStream::Stderr)
    }
}

impl Appender for ConsoleAppender {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), AppenderError> {
        match self.stream {
            ConsoleStream::Stdout => std::io::stdout().lock().write_all(bytes)?,
            ConsoleStream::Stderr => std::io::stderr().lock().write_all(bytes)?,
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), AppenderError> {
        match self.stream {
            ConsoleStream::Stdout => std::io::stdout().flush()?,
            ConsoleStream::Stderr => std::io::stderr().flush()?,
        }
        Ok(())
    }
}

/// Appends to a file, opened on start
pub struct FileAppender {
    name: String,
    path: PathBuf,
    file: Option<BufWriter<File>>,
}

impl FileAppender {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Appender for FileAppender {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), AppenderError> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.file = Some(BufWriter::new(file));
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AppenderError> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), AppenderError> {
        let file = self.file.as_mut().ok_or(AppenderError::NotStarted)?;
        file.write_all(bytes)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), AppenderError> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Collects bytes in memory; the buffer is shared with [`MemoryAppender::handle`]
pub struct MemoryAppender {
    name: String,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemoryAppender {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buffer: Arc::default(),
        }
    }

    /// Shared view of everything written so far
    pub fn handle(&self) -> MemoryHandle {
        MemoryHandle {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

impl Appender for MemoryAppender {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), AppenderError> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(bytes);
        Ok(())
    }
}

/// Reader side of a [`MemoryAppender`]
#[derive(Clone, Debug)]
pub struct MemoryHandle {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemoryHandle {
    pub fn contents(&self) -> Vec<u8> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    /// Drain and return the collected bytes
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
