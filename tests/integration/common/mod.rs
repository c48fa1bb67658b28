// SPDX-License-Identifier: Apache-2.0 OR MIT
#![allow(dead_code)]
// Shared fixtures for the router integration tests

use eventline::{
    Appender, AppenderError, Destination, DestinationRegistry, EventWriter, Layout, MemoryAppender,
    MemoryHandle, ProducerMode, RecordingMonitor, Router, RouterConfig, RouterMode, Severity,
};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Fixed timestamp so sync and async output can be compared byte for byte
pub const TS: i64 = 1_700_000_000_000_000_000;

pub const MODES: [RouterMode; 2] = [RouterMode::Sync, RouterMode::Async];

pub fn config(mode: RouterMode) -> RouterConfig {
    RouterConfig {
        mode,
        capacity: 64,
        level: Severity::Trace,
        ..RouterConfig::default()
    }
}

pub fn multi_producer_config(mode: RouterMode, producer: ProducerMode) -> RouterConfig {
    RouterConfig {
        producer,
        ..config(mode)
    }
}

/// Registry whose writer emits `body\n` only
pub fn line_registry() -> Arc<DestinationRegistry> {
    let layout = Layout {
        prefix: false,
        source: false,
        ..Layout::default()
    };
    Arc::new(DestinationRegistry::new(EventWriter::new(
        layout,
        Arc::default(),
    )))
}

pub struct Harness {
    pub router: Router,
    pub monitor: Arc<RecordingMonitor>,
    pub output: MemoryHandle,
}

/// Running router with one memory-backed default destination
pub fn harness(config: RouterConfig) -> Harness {
    let registry = line_registry();
    let mem = MemoryAppender::new("mem");
    let output = mem.handle();
    registry
        .register(Destination::new("main").with_appender(Box::new(mem)))
        .unwrap();

    let monitor = Arc::new(RecordingMonitor::new());
    let router = Router::new(config, registry, monitor.clone()).unwrap();
    router.init().unwrap();
    Harness {
        router,
        monitor,
        output,
    }
}

pub fn lines(output: &MemoryHandle) -> Vec<String> {
    output.to_string_lossy().lines().map(str::to_string).collect()
}

/// Appender that refuses every write
pub struct FailingAppender(pub &'static str);

impl Appender for FailingAppender {
    fn name(&self) -> &str {
        self.0
    }

    fn write(&mut self, _bytes: &[u8]) -> Result<(), AppenderError> {
        Err(AppenderError::Rejected("refused".into()))
    }
}

/// Counts delivered events; tests wait on the count
#[derive(Clone, Default)]
pub struct Latch {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

impl Latch {
    pub fn appender(&self) -> LatchAppender {
        LatchAppender {
            latch: self.clone(),
        }
    }

    /// True if `count` events arrived before the timeout
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (lock, cond) = &*self.inner;
        let mut seen = lock.lock().unwrap();
        while *seen < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            seen = cond.wait_timeout(seen, deadline - now).unwrap().0;
        }
        true
    }
}

pub struct LatchAppender {
    latch: Latch,
}

impl Appender for LatchAppender {
    fn name(&self) -> &str {
        "latch"
    }

    fn write(&mut self, _bytes: &[u8]) -> Result<(), AppenderError> {
        let (lock, cond) = &*self.latch.inner;
        *lock.lock().unwrap() += 1;
        cond.notify_all();
        Ok(())
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}
