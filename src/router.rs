// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Event router: the producer-facing entry point.
//!
//! In `Sync` mode an event is rendered and written on the calling thread.
//! In `Async` mode the producer only copies the event into a pre-allocated
//! ring slot; consumer threads render it and run the appenders.
//!
//! ## Lifecycle
//!
//! `Uninitialized --init()--> Running --destroy()--> Stopped`
//!
//! `destroy()` is graceful: it waits for producers that are inside a call
//! or hold an [`EventHandle`], lets the consumers drain every published
//! event, joins them and stops the destinations.

use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use crate::config::{Backpressure, Config, DestinationConfig, RouterConfig, RouterMode};
use crate::destination::Destination;
use crate::entry::{Event, EventEntry, EventView, Payload, Template, Value};
use crate::error::{DestinationError, RouterError};
use crate::monitor::Monitor;
use crate::registry::{DeliveryError, DestinationRegistry, Slot};
use crate::ringbuffer::{Claim, Consumer, RingBuffer};
use crate::severity::Severity;
use crate::wait::{Signal, WaitError, WaitStrategy};

const UNINITIALIZED: u8 = 0;
const INITIALIZING: u8 = 1;
const RUNNING: u8 = 2;
const STOPPED: u8 = 3;

/// Router lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Uninitialized,
    Initializing,
    Running,
    Stopped,
}

impl RouterState {
    fn from_u8(value: u8) -> Self {
        match value {
            UNINITIALIZED => RouterState::Uninitialized,
            INITIALIZING => RouterState::Initializing,
            RUNNING => RouterState::Running,
            _ => RouterState::Stopped,
        }
    }
}

/// Current wall-clock time in nanoseconds since the Unix epoch
pub fn timestamp_now() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Routes events to destinations, synchronously or through a ring buffer
pub struct Router {
    config: RouterConfig,
    wait: WaitStrategy,
    registry: Arc<DestinationRegistry>,
    monitor: Arc<dyn Monitor>,
    ring: Option<Arc<RingBuffer<EventEntry>>>,
    state: AtomicU8,
    level: AtomicU8,
    /// Producers inside a call or holding a handle
    active: AtomicUsize,
    quiesced: Signal,
    consumers: Mutex<Vec<JoinHandle<()>>>,
    /// Reusable entries for `get()` in sync mode
    pool: Mutex<Vec<EventEntry>>,
    dropped: AtomicU64,
}

impl Router {
    /// Create an uninitialized router over an existing registry
    ///
    /// Async mode allocates the ring here, one entry per slot.
    pub fn new(
        config: RouterConfig,
        registry: Arc<DestinationRegistry>,
        monitor: Arc<dyn Monitor>,
    ) -> Result<Self, RouterError> {
        config.validate()?;

        let wait = config.wait.to_strategy();
        let ring = match config.mode {
            RouterMode::Sync => None,
            RouterMode::Async => Some(Arc::new(RingBuffer::new(
                config.capacity,
                config.producer,
                wait,
                config.consumers,
            ))),
        };

        Ok(Self {
            level: AtomicU8::new(config.level.as_u8()),
            wait,
            registry,
            monitor,
            ring,
            state: AtomicU8::new(UNINITIALIZED),
            active: AtomicUsize::new(0),
            quiesced: Signal::new(),
            consumers: Mutex::new(Vec::new()),
            pool: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
            config,
        })
    }

    /// Validate a full configuration and build the registry and router from it
    pub fn from_config(config: &Config, monitor: Arc<dyn Monitor>) -> Result<Self, RouterError> {
        config.validate()?;
        let registry = Arc::new(config.build_registry()?);
        Self::new(config.router.clone(), registry, monitor)
    }

    /// Start every destination and (in async mode) the consumer threads
    pub fn init(&self) -> Result<(), RouterError> {
        if let Err(current) = self.state.compare_exchange(
            UNINITIALIZED,
            INITIALIZING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            return Err(RouterError::InvalidState(match RouterState::from_u8(current) {
                RouterState::Stopped => "router has been destroyed",
                _ => "router is already initialized",
            }));
        }

        if let Err(e) = self.start() {
            // Consumer cursors cannot be handed out twice
            let next = match e {
                RouterError::Spawn(_) => STOPPED,
                _ => UNINITIALIZED,
            };
            self.state.store(next, Ordering::SeqCst);
            return Err(e);
        }

        self.state
            .compare_exchange(INITIALIZING, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| RouterError::InvalidState("router was destroyed during init"))
    }

    fn start(&self) -> Result<(), RouterError> {
        if !self.registry.contains(0) {
            return Err(RouterError::not_found_index(0));
        }
        self.registry.start_all()?;

        let Some(ring) = &self.ring else {
            return Ok(());
        };

        let mut handles = self.consumers.lock().unwrap_or_else(PoisonError::into_inner);
        for index in 0..ring.consumer_count() {
            let consumer = ring
                .consumer(index)
                .ok_or(RouterError::InvalidState("consumer cursor already taken"))?;
            let worker = ConsumerWorker {
                consumer,
                registry: Arc::clone(&self.registry),
                monitor: Arc::clone(&self.monitor),
                touched: Vec::new(),
            };

            let spawned = std::thread::Builder::new()
                .name(format!("eventline-consumer-{}", index))
                .spawn(move || worker.run());

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    ring.alert();
                    for handle in handles.drain(..) {
                        let _ = handle.join();
                    }
                    for (name, err) in self.registry.stop_all() {
                        report_destination(&*self.monitor, &name, err);
                    }
                    return Err(RouterError::Spawn(e));
                }
            }
        }
        Ok(())
    }

    /// Stop accepting events, drain everything published, stop destinations
    ///
    /// Idempotent. Must not be called from a thread that holds an
    /// [`EventHandle`] of this router.
    pub fn destroy(&self) {
        let previous = self.state.swap(STOPPED, Ordering::SeqCst);
        if previous == STOPPED {
            return;
        }

        let _ = self.wait.wait_until(
            || (self.active.load(Ordering::SeqCst) == 0).then_some(()),
            &self.quiesced,
        );
        // Strategies with a timeout give up early; producers are short-lived
        while self.active.load(Ordering::SeqCst) != 0 {
            std::thread::yield_now();
        }

        if let Some(ring) = &self.ring {
            ring.alert();
        }

        let handles: Vec<_> = self
            .consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                report_router(
                    &*self.monitor,
                    RouterError::InvalidState("consumer thread panicked"),
                );
            }
        }

        for (name, err) in self.registry.stop_all() {
            report_destination(&*self.monitor, &name, err);
        }
    }

    pub fn state(&self) -> RouterState {
        RouterState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn mode(&self) -> RouterMode {
        self.config.mode
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DestinationRegistry> {
        &self.registry
    }

    /// Global minimum severity
    pub fn level(&self) -> Severity {
        Severity::from_u8(self.level.load(Ordering::Relaxed)).unwrap_or(Severity::Info)
    }

    pub fn set_level(&self, level: Severity) {
        self.level.store(level.as_u8(), Ordering::Relaxed);
    }

    /// Events rejected by the drop policy (ring or destination saturated)
    pub fn dropped(&self) -> u64 {
        let ring = self.ring.as_ref().map_or(0, |r| r.dropped());
        ring + self.dropped.load(Ordering::Relaxed)
    }

    /// Events published into the ring and not yet consumed (0 in sync mode)
    pub fn in_flight(&self) -> usize {
        self.ring.as_ref().map_or(0, |r| r.len())
    }

    fn enter(&self) -> Result<ActiveGuard<'_>, RouterError> {
        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard { router: self };
        match self.state.load(Ordering::SeqCst) {
            RUNNING => Ok(guard),
            STOPPED => Err(RouterError::RouterClosed),
            _ => Err(RouterError::NotRunning),
        }
    }

    fn leave(&self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1
            && self.state.load(Ordering::SeqCst) == STOPPED
        {
            self.quiesced.notify();
        }
    }

    fn live_slot(&self, index: usize) -> Result<Arc<Slot>, RouterError> {
        match self.registry.slot(index) {
            Some(slot) if !slot.is_closed() => Ok(slot),
            _ => Err(RouterError::not_found_index(index)),
        }
    }

    #[inline]
    fn accepts(&self, slot: &Slot, level: Severity) -> bool {
        level.passes(self.level()) && slot.accepts(level)
    }

    /// Send an event to the default destination (index 0)
    pub fn send<'t>(
        &self,
        level: Severity,
        timestamp: i64,
        source: &str,
        template: impl Into<Template<'t>>,
        args: &[Value<'_>],
    ) -> Result<(), RouterError> {
        self.send_to(0, level, timestamp, source, template, args)
    }

    /// Send an event to the destination at `index`
    ///
    /// Events below the global or destination threshold return `Ok`
    /// without being published.
    pub fn send_to<'t>(
        &self,
        index: usize,
        level: Severity,
        timestamp: i64,
        source: &str,
        template: impl Into<Template<'t>>,
        args: &[Value<'_>],
    ) -> Result<(), RouterError> {
        let _active = self.enter()?;
        let slot = self.live_slot(index)?;
        if !self.accepts(&slot, level) {
            return Ok(());
        }
        let template = template.into();

        match &self.ring {
            None => {
                let event = Event {
                    level,
                    timestamp,
                    source,
                    template,
                    args,
                };
                if let Err(e) = self.registry.write_event(&slot, &event) {
                    report_destination(&*self.monitor, slot.name(), e);
                }
                Ok(())
            }
            Some(ring) => {
                let mut claim = self.claim(ring, &slot)?;
                let sequence = claim.sequence();
                claim.reset(index, slot.generation(), sequence);
                claim.set_event(level, timestamp, source, template, args);
                claim.publish();
                Ok(())
            }
        }
    }

    /// Send to a destination by name
    pub fn send_named<'t>(
        &self,
        name: &str,
        level: Severity,
        timestamp: i64,
        source: &str,
        template: impl Into<Template<'t>>,
        args: &[Value<'_>],
    ) -> Result<(), RouterError> {
        let index = self
            .registry
            .index_of(name)
            .ok_or_else(|| RouterError::not_found_name(name))?;
        self.send_to(index, level, timestamp, source, template, args)
    }

    /// Reserve the destination's in-flight slot, then a ring slot
    fn claim<'a>(
        &'a self,
        ring: &'a RingBuffer<EventEntry>,
        slot: &Slot,
    ) -> Result<Claim<'a, EventEntry>, RouterError> {
        self.reserve(slot)?;

        match self.config.backpressure {
            Backpressure::Block => Ok(ring.claim_next()),
            Backpressure::Drop => match ring.try_claim_next() {
                Some(claim) => Ok(claim),
                None => {
                    slot.release();
                    Err(RouterError::BufferOverflow)
                }
            },
        }
    }

    fn reserve(&self, slot: &Slot) -> Result<(), RouterError> {
        if slot.try_reserve() {
            return Ok(());
        }

        match self.config.backpressure {
            Backpressure::Drop => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(RouterError::BufferOverflow)
            }
            Backpressure::Block => loop {
                match self
                    .wait
                    .wait_until(|| slot.try_reserve().then_some(()), slot.released())
                {
                    Ok(()) => return Ok(()),
                    Err(WaitError::Alerted) => {
                        return Err(RouterError::not_found_index(slot.index()))
                    }
                    Err(WaitError::Timeout) => continue,
                }
            },
        }
    }

    /// Borrow a mutable entry routed to the default destination
    pub fn get(&self) -> Result<EventHandle<'_>, RouterError> {
        self.get_for(0)
    }

    /// Borrow a mutable entry routed to the destination at `index`
    ///
    /// Fill it with [`EventEntry::set_event`], [`EventEntry::set_rendered`]
    /// or [`EventEntry::rendered_mut`], then [`Router::publish`] it. In
    /// async mode the handle holds a ring slot: dropping it unpublished
    /// releases the slot as an empty event.
    pub fn get_for(&self, index: usize) -> Result<EventHandle<'_>, RouterError> {
        let active = self.enter()?;
        let slot = self.live_slot(index)?;

        let inner = match &self.ring {
            Some(ring) => {
                let mut claim = self.claim(ring, &slot)?;
                let sequence = claim.sequence();
                claim.reset(index, slot.generation(), sequence);
                HandleInner::Ring(claim)
            }
            None => {
                let mut entry = self
                    .pool
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop()
                    .unwrap_or_default();
                entry.reset(index, slot.generation(), 0);
                HandleInner::Pooled(entry)
            }
        };

        Ok(EventHandle {
            router: self,
            slot,
            inner: Some(inner),
            _active: active,
        })
    }

    /// Publish a filled handle
    pub fn publish(&self, handle: EventHandle<'_>) -> Result<(), RouterError> {
        handle.publish()
    }

    fn publish_pooled(&self, slot: &Slot, entry: &EventEntry) -> Result<(), RouterError> {
        if slot.is_closed() {
            return Err(RouterError::not_found_index(slot.index()));
        }
        if entry.payload() == Payload::Empty || !self.accepts(slot, entry.level()) {
            return Ok(());
        }
        if let Err(e) = self.registry.write_entry_to(slot, entry) {
            report_destination(&*self.monitor, slot.name(), e);
        }
        Ok(())
    }

    fn recycle(&self, entry: EventEntry) {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if pool.len() < self.config.pool_size {
            pool.push(entry);
        }
    }

    /// Wait until everything published so far is consumed, flush the
    /// destination and return the bytes it captured since the last flush
    ///
    /// Captured bytes are only kept by destinations configured with
    /// `capture`; for any other destination the drain and appender flush
    /// still happen and the returned `Vec` is empty. Must not be called
    /// while holding an [`EventHandle`].
    pub fn flush(&self, index: usize) -> Result<Vec<u8>, RouterError> {
        if let (Some(ring), RouterState::Running) = (&self.ring, self.state()) {
            ring.wait_consumed(ring.claimed());
        }
        self.registry.flush(index)
    }

    /// Register a destination on a live router; it is started immediately
    pub fn register_destination(&self, destination: Destination) -> Result<usize, RouterError> {
        if self.state() == RouterState::Stopped {
            return Err(RouterError::RouterClosed);
        }
        self.registry.register(destination)
    }

    pub fn register_destination_config(
        &self,
        config: &DestinationConfig,
    ) -> Result<usize, RouterError> {
        self.register_destination(config.build())
    }

    /// Unregister a destination
    ///
    /// New events for it fail with `DestinationNotFound`; events already in
    /// the ring are still delivered, and its index is only reused after
    /// they have been consumed.
    pub fn unregister_destination(&self, name: &str) -> Result<usize, RouterError> {
        match &self.ring {
            Some(ring) => self.registry.unregister_fenced(name, ring.claimed()),
            None => self.registry.unregister(name),
        }
    }

    pub fn destination_index(&self, name: &str) -> Option<usize> {
        self.registry.index_of(name)
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("state", &self.state())
            .field("mode", &self.config.mode)
            .field("level", &self.level())
            .field("in_flight", &self.in_flight())
            .field("dropped", &self.dropped())
            .finish()
    }
}

/// Keeps `destroy()` waiting while a producer is inside the router
struct ActiveGuard<'a> {
    router: &'a Router,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.router.leave();
    }
}

enum HandleInner<'a> {
    Ring(Claim<'a, EventEntry>),
    Pooled(EventEntry),
}

/// A mutable event entry obtained from [`Router::get`]
pub struct EventHandle<'a> {
    router: &'a Router,
    slot: Arc<Slot>,
    inner: Option<HandleInner<'a>>,
    _active: ActiveGuard<'a>,
}

impl EventHandle<'_> {
    /// Index of the destination the handle is routed to
    pub fn destination(&self) -> usize {
        self.slot.index()
    }

    /// Ring sequence (async mode only)
    pub fn sequence(&self) -> Option<u64> {
        match self.inner.as_ref()? {
            HandleInner::Ring(claim) => Some(claim.sequence()),
            HandleInner::Pooled(_) => None,
        }
    }

    /// Make the event visible to its destination
    pub fn publish(mut self) -> Result<(), RouterError> {
        let router = self.router;
        match self.inner.take() {
            Some(HandleInner::Ring(mut claim)) => {
                if !router.accepts(&self.slot, claim.level()) {
                    claim.discard();
                }
                claim.publish();
                Ok(())
            }
            Some(HandleInner::Pooled(entry)) => {
                let result = router.publish_pooled(&self.slot, &entry);
                router.recycle(entry);
                result
            }
            None => Ok(()),
        }
    }
}

impl Deref for EventHandle<'_> {
    type Target = EventEntry;

    fn deref(&self) -> &EventEntry {
        match self.inner.as_ref() {
            Some(HandleInner::Ring(claim)) => &**claim,
            Some(HandleInner::Pooled(entry)) => entry,
            // `inner` is only taken by publish/drop, which consume the handle
            None => unreachable!("event handle used after publish"),
        }
    }
}

impl DerefMut for EventHandle<'_> {
    fn deref_mut(&mut self) -> &mut EventEntry {
        match self.inner.as_mut() {
            Some(HandleInner::Ring(claim)) => &mut **claim,
            Some(HandleInner::Pooled(entry)) => entry,
            None => unreachable!("event handle used after publish"),
        }
    }
}

impl Drop for EventHandle<'_> {
    fn drop(&mut self) {
        match self.inner.take() {
            Some(HandleInner::Ring(mut claim)) => {
                // Publishes an empty slot; the consumer releases the reservation
                claim.discard();
            }
            Some(HandleInner::Pooled(entry)) => self.router.recycle(entry),
            None => {}
        }
    }
}

/// One consumer thread's state
struct ConsumerWorker {
    consumer: Consumer<EventEntry>,
    registry: Arc<DestinationRegistry>,
    monitor: Arc<dyn Monitor>,
    /// Destinations written during the current batch
    touched: Vec<usize>,
}

impl ConsumerWorker {
    fn run(mut self) {
        let stride = self.consumer.ring().consumer_count();
        let own = self.consumer.index();

        loop {
            match self.consumer.next_available() {
                Ok(end) => {
                    for sequence in self.consumer.position()..end {
                        let Some(entry) = self.consumer.get(sequence) else {
                            continue;
                        };
                        if entry.destination() % stride != own {
                            continue;
                        }
                        deliver(&self.registry, &*self.monitor, entry);
                        if !self.touched.contains(&entry.destination()) {
                            self.touched.push(entry.destination());
                        }
                    }

                    for &index in &self.touched {
                        if let Err((name, e)) = self.registry.flush_quiet(index) {
                            report_destination(&*self.monitor, &name, e);
                        }
                    }
                    self.touched.clear();

                    self.consumer.advance(end);
                    let consumed = self.consumer.ring().min_consumer_position();
                    for (name, e) in self.registry.advance_watermark(consumed) {
                        report_destination(&*self.monitor, &name, e);
                    }
                }
                // Idle: nothing to do but look again
                Err(WaitError::Timeout) => {}
                Err(WaitError::Alerted) => {
                    if self.consumer.is_drained() {
                        break;
                    }
                    std::thread::yield_now();
                }
            }
        }
    }
}

fn deliver(registry: &DestinationRegistry, monitor: &dyn Monitor, entry: &EventEntry) {
    match registry.deliver(entry) {
        Ok(()) => {}
        Err(DeliveryError::Stale) if entry.payload() == Payload::Empty => {}
        Err(DeliveryError::Stale) => {
            report_router(monitor, RouterError::not_found_index(entry.destination()))
        }
        Err(DeliveryError::Failed { destination, error }) => {
            report_destination(monitor, &destination, error)
        }
    }
}

fn report_destination(monitor: &dyn Monitor, destination: &str, error: DestinationError) {
    let _ = panic::catch_unwind(AssertUnwindSafe(|| match error {
        DestinationError::Dispatch(failures) => {
            for failure in &failures.failures {
                monitor.on_dispatch_error(destination, &failure.appender, &failure.error);
            }
        }
        other => monitor.on_router_error(&RouterError::Destination(other)),
    }));
}

fn report_router(monitor: &dyn Monitor, error: RouterError) {
    let _ = panic::catch_unwind(AssertUnwindSafe(|| monitor.on_router_error(&error)));
}
