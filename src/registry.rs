// SPDX-License-Identifier: Apache-2.0 OR MIT
// Destination registry: name <-> index mapping with fenced index reuse
//
// Producers route by index, so an index must not be handed to a new
// destination while events for the previous owner may still be in the
// ring. Unregistering records a fence (the ring's claim count at that
// moment); the index is reclaimed once the consumed watermark reaches it.
// Every registration also carries a generation number copied into routed
// entries, so an event that raced an unregistration is recognized as
// stale instead of landing in the index's next owner.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::destination::Destination;
use crate::entry::{EventEntry, EventView};
use crate::error::{DestinationError, RouterError};
use crate::severity::Severity;
use crate::wait::Signal;
use crate::writer::EventWriter;

/// Shared per-registration state
pub(crate) struct Slot {
    index: usize,
    generation: u64,
    name: Arc<str>,
    capacity: usize,
    min_level: Option<Severity>,
    /// Events routed here and not yet delivered
    pending: AtomicUsize,
    closed: AtomicBool,
    /// Producers blocked on `capacity` park here
    released: Signal,
    destination: Mutex<Destination>,
}

impl Slot {
    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn released(&self) -> &Signal {
        &self.released
    }

    /// Per-destination threshold (None = accept every level)
    pub(crate) fn accepts(&self, level: Severity) -> bool {
        self.min_level.map_or(true, |min| level.passes(min))
    }

    /// Take one in-flight slot; false if the destination is saturated
    pub(crate) fn try_reserve(&self) -> bool {
        if self.capacity == 0 {
            self.pending.fetch_add(1, Ordering::AcqRel);
            return true;
        }
        let mut current = self.pending.load(Ordering::Acquire);
        loop {
            if current >= self.capacity {
                return false;
            }
            match self.pending.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn release(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        self.released.notify();
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Destination> {
        self.destination
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.released.alert();
    }
}

struct Retired {
    fence: u64,
    slot: Arc<Slot>,
}

#[derive(Default)]
struct Table {
    names: HashMap<String, usize>,
    slots: Vec<Option<Arc<Slot>>>,
    retired: Vec<Retired>,
}

impl Table {
    fn free_index(&self) -> usize {
        (0..self.slots.len())
            .find(|&i| self.slots[i].is_none() && !self.retired.iter().any(|r| r.slot.index == i))
            .unwrap_or(self.slots.len())
    }

    /// Live slot first, then a retired one with the same generation
    fn find(&self, index: usize, generation: u64) -> Option<&Arc<Slot>> {
        match self.slots.get(index) {
            Some(Some(slot)) if slot.generation == generation => Some(slot),
            _ => self
                .retired
                .iter()
                .map(|r| &r.slot)
                .find(|s| s.index == index && s.generation == generation),
        }
    }
}

/// Why a routed entry could not be delivered
#[derive(Debug)]
pub(crate) enum DeliveryError {
    /// The entry's registration is gone
    Stale,
    Failed {
        destination: Arc<str>,
        error: DestinationError,
    },
}

/// Name/index table of destinations shared by a router and its consumers
pub struct DestinationRegistry {
    table: RwLock<Table>,
    writer: EventWriter,
    started: AtomicBool,
    watermark: AtomicU64,
    retiring: AtomicUsize,
    generations: AtomicU64,
}

impl DestinationRegistry {
    pub fn new(writer: EventWriter) -> Self {
        Self {
            table: RwLock::new(Table::default()),
            writer,
            started: AtomicBool::new(false),
            watermark: AtomicU64::new(0),
            retiring: AtomicUsize::new(0),
            generations: AtomicU64::new(1),
        }
    }

    pub fn writer(&self) -> &EventWriter {
        &self.writer
    }

    fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_table(&self) -> RwLockWriteGuard<'_, Table> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a destination and return its index
    ///
    /// The lowest free index is used; an unregistered index only becomes
    /// free once every event routed to its previous owner was consumed.
    /// Registering into a started registry starts the destination.
    pub fn register(&self, mut destination: Destination) -> Result<usize, RouterError> {
        let mut table = self.write_table();

        if table.names.contains_key(destination.name()) {
            return Err(RouterError::DuplicateDestination(
                destination.name().to_string(),
            ));
        }

        if self.started.load(Ordering::Acquire) {
            destination.start()?;
        }

        let index = table.free_index();
        let slot = Arc::new(Slot {
            index,
            generation: self.generations.fetch_add(1, Ordering::Relaxed),
            name: Arc::from(destination.name()),
            capacity: destination.capacity(),
            min_level: destination.min_level(),
            pending: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            released: Signal::new(),
            destination: Mutex::new(destination),
        });

        table.names.insert(slot.name.to_string(), index);
        if index == table.slots.len() {
            table.slots.push(Some(slot));
        } else {
            table.slots[index] = Some(slot);
        }
        Ok(index)
    }

    /// Remove a destination that has no events in flight
    ///
    /// Only safe when nothing is queued for it; a live router goes through
    /// [`Router::unregister_destination`](crate::Router::unregister_destination),
    /// which fences at the ring's claim count.
    pub(crate) fn unregister(&self, name: &str) -> Result<usize, RouterError> {
        self.unregister_fenced(name, self.watermark())
    }

    /// Remove a destination; its index is reused once the watermark reaches `fence`
    ///
    /// Events already routed to it are still delivered until then.
    pub(crate) fn unregister_fenced(&self, name: &str, fence: u64) -> Result<usize, RouterError> {
        let mut table = self.write_table();
        let index = table
            .names
            .remove(name)
            .ok_or_else(|| RouterError::not_found_name(name))?;

        let slot = table.slots[index]
            .take()
            .ok_or_else(|| RouterError::not_found_index(index))?;
        slot.close();

        // Count first: a consumer raising the watermark concurrently either
        // sees this retirement or we see its watermark
        self.retiring.fetch_add(1, Ordering::SeqCst);
        if fence <= self.watermark.load(Ordering::SeqCst) {
            self.retiring.fetch_sub(1, Ordering::SeqCst);
            let _ = slot.lock().stop();
        } else {
            table.retired.push(Retired { fence, slot });
        }
        Ok(index)
    }

    /// Raise the consumed watermark and reclaim retired indices it passed
    ///
    /// Returns stop failures of the destinations reclaimed by this call.
    pub fn advance_watermark(&self, consumed: u64) -> Vec<(Arc<str>, DestinationError)> {
        let previous = self.watermark.fetch_max(consumed, Ordering::SeqCst);
        if consumed <= previous || self.retiring.load(Ordering::SeqCst) == 0 {
            return Vec::new();
        }

        let mut failures = Vec::new();
        let mut table = self.write_table();
        let watermark = self.watermark();
        table.retired.retain(|retired| {
            if retired.fence > watermark {
                return true;
            }
            if let Err(e) = retired.slot.lock().stop() {
                failures.push((Arc::clone(&retired.slot.name), e));
            }
            self.retiring.fetch_sub(1, Ordering::SeqCst);
            false
        });
        failures
    }

    pub fn watermark(&self) -> u64 {
        self.watermark.load(Ordering::Acquire)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.read().names.get(name).copied()
    }

    pub fn name_of(&self, index: usize) -> Option<String> {
        self.read()
            .slots
            .get(index)?
            .as_ref()
            .map(|slot| slot.name.to_string())
    }

    pub fn contains(&self, index: usize) -> bool {
        matches!(self.read().slots.get(index), Some(Some(_)))
    }

    /// Number of live destinations
    pub fn len(&self) -> usize {
        self.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of unregistered indices still waiting for their fence
    pub fn retired_count(&self) -> usize {
        self.retiring.load(Ordering::Acquire)
    }

    pub(crate) fn slot(&self, index: usize) -> Option<Arc<Slot>> {
        self.read().slots.get(index)?.clone()
    }

    /// Start every destination; on failure the already started ones are stopped
    pub fn start_all(&self) -> Result<(), RouterError> {
        let table = self.read();
        let live: Vec<&Arc<Slot>> = table.slots.iter().flatten().collect();

        for (i, slot) in live.iter().enumerate() {
            if let Err(e) = slot.lock().start() {
                for started in &live[..i] {
                    let _ = started.lock().stop();
                }
                return Err(e.into());
            }
        }

        self.started.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop every destination, live and retired; returns the failures
    pub fn stop_all(&self) -> Vec<(Arc<str>, DestinationError)> {
        self.started.store(false, Ordering::Release);

        let mut failures = Vec::new();
        let table = self.read();
        let live = table.slots.iter().flatten();
        let retired = table.retired.iter().map(|r| &r.slot);
        for slot in live.chain(retired) {
            if let Err(e) = slot.lock().stop() {
                failures.push((Arc::clone(&slot.name), e));
            }
        }
        failures
    }

    /// Deliver an entry to the destination at `index`
    pub fn write(&self, index: usize, entry: &EventEntry) -> Result<(), RouterError> {
        let table = self.read();
        let slot = table
            .slots
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| RouterError::not_found_index(index))?;
        slot.lock().write(entry, &self.writer)?;
        Ok(())
    }

    /// Deliver an entry to the destination it was routed to
    pub fn write_entry(&self, entry: &EventEntry) -> Result<(), RouterError> {
        self.write(entry.destination(), entry)
    }

    /// Deliver an entry to a destination by name
    pub fn write_named(&self, name: &str, entry: &EventEntry) -> Result<(), RouterError> {
        let table = self.read();
        let slot = table
            .names
            .get(name)
            .and_then(|&i| table.slots.get(i))
            .and_then(Option::as_ref)
            .ok_or_else(|| RouterError::not_found_name(name))?;
        slot.lock().write(entry, &self.writer)?;
        Ok(())
    }

    /// Render and deliver a borrowed event (synchronous routing)
    pub(crate) fn write_event<E: EventView + ?Sized>(
        &self,
        slot: &Slot,
        event: &E,
    ) -> Result<(), DestinationError> {
        slot.lock().write_event(event, &self.writer)
    }

    /// Deliver a pre-rendered buffer (synchronous routing)
    pub(crate) fn write_entry_to(&self, slot: &Slot, entry: &EventEntry) -> Result<(), DestinationError> {
        slot.lock().write(entry, &self.writer)
    }

    /// Deliver a ring entry to the registration it was routed to and
    /// release its in-flight slot
    pub(crate) fn deliver(&self, entry: &EventEntry) -> Result<(), DeliveryError> {
        let table = self.read();
        let slot = table
            .find(entry.destination(), entry.generation())
            .ok_or(DeliveryError::Stale)?;

        let result = slot.lock().write(entry, &self.writer);
        slot.release();

        result.map_err(|error| DeliveryError::Failed {
            destination: Arc::clone(&slot.name),
            error,
        })
    }

    /// Flush one destination and return the bytes it captured since the last flush
    pub fn flush(&self, index: usize) -> Result<Vec<u8>, RouterError> {
        let slot = self
            .slot(index)
            .ok_or_else(|| RouterError::not_found_index(index))?;
        let mut destination = slot.lock();
        destination.flush()?;
        Ok(destination.take_captured())
    }

    /// Flush a destination's appenders, reporting failures with its name
    pub(crate) fn flush_quiet(&self, index: usize) -> Result<(), (Arc<str>, DestinationError)> {
        let Some(slot) = self.slot(index) else {
            return Ok(());
        };
        let result = slot.lock().flush();
        result.map_err(|e| (Arc::clone(&slot.name), e))
    }
}

impl Default for DestinationRegistry {
    fn default() -> Self {
        Self::new(EventWriter::default())
    }
}

impl std::fmt::Debug for DestinationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.read();
        let mut names: Vec<(&String, &usize)> = table.names.iter().collect();
        names.sort_by_key(|entry| *entry.1);
        f.debug_struct("DestinationRegistry")
            .field("destinations", &names)
            .field("retired", &table.retired.len())
            .field("watermark", &self.watermark())
            .finish()
    }
}
