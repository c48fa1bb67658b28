// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Wait strategies for ring buffer consumers and producers
//!
//! A [`WaitStrategy`] is a plain policy value picked when the router is
//! built. The mutable part (mutex, condition variable, parked-waiter
//! count, shutdown alert) lives in a [`Signal`] owned by the ring buffer,
//! so the same strategy value can drive any number of rings.
//!
//! ## Strategies
//!
//! - **BusySpin**: re-check the cursor in a tight loop (lowest latency, 100% CPU)
//! - **Yielding**: spin briefly, then yield the time slice on every retry
//! - **Sleeping**: spin, then yield, then sleep starting at `sleep` and
//!   doubling up to 16x while nothing arrives
//! - **Blocking**: park on a condition variable until a producer signals
//! - **TimeoutBlocking**: like Blocking, but gives up after `timeout` so the
//!   caller can do housekeeping while idle
//! - **PhasedBackoff**: spin until `spin_timeout`, yield until
//!   `spin_timeout + yield_timeout`, then block or sleep

use std::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

const SPIN_TRIES: u32 = 100;
const SLEEP_RETRIES: u32 = 200;
const PHASE_CHECK_INTERVAL: u32 = 64;

/// Default sleep interval for [`WaitStrategy::Sleeping`]
pub const DEFAULT_SLEEP: Duration = Duration::from_micros(100);

/// A sleeping waiter never naps longer than `base << MAX_SLEEP_SHIFT`
const MAX_SLEEP_SHIFT: u32 = 4;

/// Double the current nap, capped relative to the configured base
fn escalate_sleep(current: Duration, base: Duration) -> Duration {
    let cap = base.saturating_mul(1 << MAX_SLEEP_SHIFT);
    current.saturating_mul(2).min(cap).max(base)
}

/// Why a wait returned without data
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    #[error("wait timed out")]
    Timeout,

    #[error("wait alerted for shutdown")]
    Alerted,
}

/// What a phased backoff does once spinning and yielding are exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    Block,
    Sleep(Duration),
}

/// How a waiter idles until its condition holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    Blocking,
    BusySpin,
    Yielding,
    Sleeping {
        sleep: Duration,
    },
    PhasedBackoff {
        spin_timeout: Duration,
        yield_timeout: Duration,
        fallback: Fallback,
    },
    TimeoutBlocking {
        timeout: Duration,
    },
}

impl Default for WaitStrategy {
    fn default() -> Self {
        WaitStrategy::Blocking
    }
}

impl WaitStrategy {
    /// Wait until `cursor()` moves past `sequence`
    ///
    /// `cursor` returns the exclusive end of the published range. On
    /// success the returned end is always `> sequence`.
    #[inline]
    pub fn wait_for(
        &self,
        sequence: u64,
        cursor: impl Fn() -> u64,
        signal: &Signal,
    ) -> Result<u64, WaitError> {
        self.wait_until(
            || {
                let end = cursor();
                (end > sequence).then_some(end)
            },
            signal,
        )
    }

    /// Wait until `probe` yields a value
    ///
    /// Data always wins over the alert: the probe is evaluated before the
    /// alert flag on every iteration.
    pub fn wait_until<R>(
        &self,
        mut probe: impl FnMut() -> Option<R>,
        signal: &Signal,
    ) -> Result<R, WaitError> {
        if let Some(value) = probe() {
            return Ok(value);
        }

        match *self {
            WaitStrategy::BusySpin => loop {
                if let Some(value) = probe() {
                    return Ok(value);
                }
                if signal.is_alerted() {
                    return Err(WaitError::Alerted);
                }
                std::hint::spin_loop();
            },

            WaitStrategy::Yielding => {
                let mut counter = SPIN_TRIES;
                loop {
                    if let Some(value) = probe() {
                        return Ok(value);
                    }
                    if signal.is_alerted() {
                        return Err(WaitError::Alerted);
                    }
                    if counter == 0 {
                        std::thread::yield_now();
                    } else {
                        counter -= 1;
                        std::hint::spin_loop();
                    }
                }
            }

            WaitStrategy::Sleeping { sleep } => {
                let mut counter = SLEEP_RETRIES;
                let mut nap = sleep;
                loop {
                    if let Some(value) = probe() {
                        return Ok(value);
                    }
                    if signal.is_alerted() {
                        return Err(WaitError::Alerted);
                    }
                    if counter > SPIN_TRIES {
                        counter -= 1;
                        std::hint::spin_loop();
                    } else if counter > 0 {
                        counter -= 1;
                        std::thread::yield_now();
                    } else {
                        std::thread::sleep(nap);
                        nap = escalate_sleep(nap, sleep);
                    }
                }
            }

            WaitStrategy::Blocking => signal.park(&mut probe, None),

            WaitStrategy::TimeoutBlocking { timeout } => {
                signal.park(&mut probe, Some(Instant::now() + timeout))
            }

            WaitStrategy::PhasedBackoff {
                spin_timeout,
                yield_timeout,
                fallback,
            } => {
                let start = Instant::now();
                let mut counter = 0u32;
                loop {
                    if let Some(value) = probe() {
                        return Ok(value);
                    }
                    if signal.is_alerted() {
                        return Err(WaitError::Alerted);
                    }

                    counter = counter.wrapping_add(1);
                    if counter % PHASE_CHECK_INTERVAL != 0 {
                        std::hint::spin_loop();
                        continue;
                    }

                    let elapsed = start.elapsed();
                    if elapsed < spin_timeout {
                        std::hint::spin_loop();
                    } else if elapsed < spin_timeout + yield_timeout {
                        std::thread::yield_now();
                    } else {
                        return match fallback {
                            Fallback::Block => signal.park(&mut probe, None),
                            Fallback::Sleep(sleep) => loop {
                                if let Some(value) = probe() {
                                    return Ok(value);
                                }
                                if signal.is_alerted() {
                                    return Err(WaitError::Alerted);
                                }
                                std::thread::sleep(sleep);
                            },
                        };
                    }
                }
            }
        }
    }

    /// True for strategies that park on the condition variable
    pub fn may_block(&self) -> bool {
        matches!(
            self,
            WaitStrategy::Blocking
                | WaitStrategy::TimeoutBlocking { .. }
                | WaitStrategy::PhasedBackoff {
                    fallback: Fallback::Block,
                    ..
                }
        )
    }
}

/// Wake-up channel shared by the waiters of one ring buffer
///
/// `notify` is a single atomic load unless someone is actually parked.
pub struct Signal {
    lock: Mutex<()>,
    cond: Condvar,
    waiters: AtomicUsize,
    alerted: AtomicBool,
}

impl Signal {
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            cond: Condvar::new(),
            waiters: AtomicUsize::new(0),
            alerted: AtomicBool::new(false),
        }
    }

    /// Wake parked waiters (called after publish / advance)
    #[inline]
    pub fn notify(&self) {
        // Pairs with the fence in `park`: either we see the waiter or the
        // waiter sees the state change that preceded this call.
        fence(Ordering::SeqCst);
        if self.waiters.load(Ordering::Relaxed) > 0 {
            let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.cond.notify_all();
        }
    }

    /// Raise the shutdown alert and wake everyone
    pub fn alert(&self) {
        self.alerted.store(true, Ordering::Release);
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_all();
    }

    #[inline]
    pub fn is_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }

    fn park<R>(
        &self,
        probe: &mut impl FnMut() -> Option<R>,
        deadline: Option<Instant>,
    ) -> Result<R, WaitError> {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);

        let result = self.park_locked(probe, deadline);

        self.waiters.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn park_locked<R>(
        &self,
        probe: &mut impl FnMut() -> Option<R>,
        deadline: Option<Instant>,
    ) -> Result<R, WaitError> {
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(value) = probe() {
                return Ok(value);
            }
            if self.is_alerted() {
                return Err(WaitError::Alerted);
            }

            match deadline {
                None => {
                    guard = self
                        .cond
                        .wait(guard)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(WaitError::Timeout);
                    }
                    let (next, _) = self
                        .cond
                        .wait_timeout(guard, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    guard = next;
                }
            }
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}
