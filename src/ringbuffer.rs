// SPDX-License-Identifier: Apache-2.0 OR MIT
// Pre-allocated ring buffer with sequence gating
//
// Slots are allocated once and reused forever. Producers claim a sequence,
// fill the slot in place and publish it; consumers read published slots in
// sequence order and advance their cursor to hand the slots back. A
// producer never laps the slowest consumer: claiming sequence `s` waits
// until `s < min(consumer cursors) + capacity`.

use serde::{Deserialize, Serialize};
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::wait::{Signal, WaitError, WaitStrategy};

/// Cache-aligned wrapper to prevent false sharing
#[repr(align(64))]
struct CacheAligned<T>(T);

/// How producers make claimed slots visible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerMode {
    /// Consumers read one shared cursor covering the contiguous published
    /// run.
    ///
    /// Publishing never waits: a slot published ahead of an earlier claim
    /// stays invisible until the earlier one is published too, and that
    /// publisher moves the cursor over both.
    Single,
    /// Every slot carries its own "published" marker; producers publish
    /// independently and consumers scan for the contiguous published run.
    #[default]
    Multi,
}

/// Fixed-capacity ring of reusable slots
pub struct RingBuffer<T> {
    slots: Box<[UnsafeCell<T>]>,
    mask: usize,
    mode: ProducerMode,
    wait: WaitStrategy,
    /// Next sequence to hand out to a producer
    claim: CacheAligned<AtomicU64>,
    /// Single mode: exclusive end of the contiguous published range
    cursor: CacheAligned<AtomicU64>,
    /// `sequence + 1` once the slot's current lap is published
    available: Box<[AtomicU64]>,
    /// Next sequence each consumer will read
    consumers: Box<[CacheAligned<AtomicU64>]>,
    taken: Box<[AtomicBool]>,
    /// Consumers park here waiting for data
    published: Signal,
    /// Producers park here waiting for space
    released: Signal,
    dropped: AtomicU64,
}

// SAFETY: RingBuffer is Sync because:
// - a slot is written only by the producer holding its claimed sequence
// - consumers only read slots whose publication they observed (Acquire)
// - producers only reuse a slot after every consumer released it (Acquire)
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send + Sync> Sync for RingBuffer<T> {}

impl<T: Default> RingBuffer<T> {
    /// Create a ring with `capacity` default-initialized slots
    ///
    /// # Panics
    /// Panics if capacity is not a power of 2 or `consumers` is zero
    pub fn new(
        capacity: usize,
        mode: ProducerMode,
        wait: WaitStrategy,
        consumers: usize,
    ) -> Self {
        assert!(capacity.is_power_of_two(), "Capacity must be power of 2");
        assert!(consumers > 0, "At least one consumer is required");

        let slots: Vec<UnsafeCell<T>> = (0..capacity).map(|_| UnsafeCell::new(T::default())).collect();

        Self {
            slots: slots.into_boxed_slice(),
            mask: capacity - 1,
            mode,
            wait,
            claim: CacheAligned(AtomicU64::new(0)),
            cursor: CacheAligned(AtomicU64::new(0)),
            available: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            consumers: (0..consumers)
                .map(|_| CacheAligned(AtomicU64::new(0)))
                .collect(),
            taken: (0..consumers).map(|_| AtomicBool::new(false)).collect(),
            published: Signal::new(),
            released: Signal::new(),
            dropped: AtomicU64::new(0),
        }
    }
}

impl<T> RingBuffer<T> {
    /// Claim the next slot, waiting (per the wait strategy) while the ring is full
    pub fn claim_next(&self) -> Claim<'_, T> {
        let sequence = self.claim.0.fetch_add(1, Ordering::AcqRel);
        if !self.has_space_for(sequence) {
            self.wait_for_space(sequence);
        }
        Claim {
            ring: self,
            sequence,
        }
    }

    /// Claim the next slot, or count a drop and return None if the ring is full
    pub fn try_claim_next(&self) -> Option<Claim<'_, T>> {
        let mut current = self.claim.0.load(Ordering::Relaxed);
        loop {
            if !self.has_space_for(current) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            match self.claim.0.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Some(Claim {
                        ring: self,
                        sequence: current,
                    })
                }
                Err(actual) => {
                    current = actual;
                    std::hint::spin_loop();
                }
            }
        }
    }

    #[inline]
    fn has_space_for(&self, sequence: u64) -> bool {
        sequence < self.min_consumer_position() + self.capacity() as u64
    }

    fn wait_for_space(&self, sequence: u64) {
        loop {
            let probe = || self.has_space_for(sequence).then_some(());
            match self.wait.wait_until(probe, &self.released) {
                Ok(()) => return,
                // Producers are never alerted; a timeout just means "look again"
                Err(WaitError::Timeout) | Err(WaitError::Alerted) => std::thread::yield_now(),
            }
        }
    }

    fn publish_sequence(&self, sequence: u64) {
        match self.mode {
            ProducerMode::Single => {
                // Mark first, then move the shared cursor over whatever run
                // is now contiguous. A publisher that finds a gap leaves it
                // to whoever fills the gap.
                self.available[self.index(sequence)].store(sequence + 1, Ordering::SeqCst);
                self.advance_cursor();
            }
            ProducerMode::Multi => {
                self.available[self.index(sequence)].store(sequence + 1, Ordering::Release);
            }
        }
        self.published.notify();
    }

    fn advance_cursor(&self) {
        let mut current = self.cursor.0.load(Ordering::SeqCst);
        loop {
            let end = self.scan_published(current, Ordering::SeqCst);
            if end == current {
                return;
            }
            match self.cursor.0.compare_exchange(
                current,
                end,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => current = end,
                Err(actual) => current = actual,
            }
        }
    }

    #[inline]
    fn scan_published(&self, from: u64, order: Ordering) -> u64 {
        let claimed = self.claim.0.load(Ordering::Acquire);
        let mut sequence = from;
        while sequence < claimed && self.available[self.index(sequence)].load(order) == sequence + 1 {
            sequence += 1;
        }
        sequence
    }

    /// Exclusive end of the contiguous published run starting at `from`
    pub fn published_end(&self, from: u64) -> u64 {
        match self.mode {
            ProducerMode::Single => self.cursor.0.load(Ordering::Acquire),
            ProducerMode::Multi => self.scan_published(from, Ordering::Acquire),
        }
    }

    /// Wait until every consumer has released all sequences before `end`
    ///
    /// Must not be called while holding an unpublished claim below `end`.
    pub fn wait_consumed(&self, end: u64) {
        loop {
            let probe = || (self.min_consumer_position() >= end).then_some(());
            match self.wait.wait_until(probe, &self.released) {
                Ok(()) => return,
                Err(WaitError::Timeout) | Err(WaitError::Alerted) => std::thread::yield_now(),
            }
        }
    }

    /// Take the consumer cursor at `index` (each cursor can be taken once)
    pub fn consumer(self: &Arc<Self>, index: usize) -> Option<Consumer<T>> {
        let taken = self.taken.get(index)?;
        if taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(Consumer {
            ring: Arc::clone(self),
            index,
            position: self.consumers[index].0.load(Ordering::Acquire),
            available: 0,
        })
    }

    /// Wake consumers parked in `next_available` and make them return `Alerted`
    /// once no published data remains
    pub fn alert(&self) {
        self.published.alert();
    }

    pub fn is_alerted(&self) -> bool {
        self.published.is_alerted()
    }

    /// Slowest consumer cursor (next sequence it will read)
    pub fn min_consumer_position(&self) -> u64 {
        self.consumers
            .iter()
            .map(|c| c.0.load(Ordering::Acquire))
            .min()
            .unwrap_or(0)
    }

    /// Number of sequences handed out to producers so far
    pub fn claimed(&self) -> u64 {
        self.claim.0.load(Ordering::Acquire)
    }

    /// Number of events discarded by `try_claim_next` on a full ring
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    pub fn mode(&self) -> ProducerMode {
        self.mode
    }

    pub fn wait_strategy(&self) -> WaitStrategy {
        self.wait
    }

    /// Number of claimed slots not yet released by every consumer
    pub fn len(&self) -> usize {
        let claimed = self.claimed();
        let consumed = self.min_consumer_position();
        (claimed.saturating_sub(consumed) as usize).min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn index(&self, sequence: u64) -> usize {
        (sequence as usize) & self.mask
    }

    /// # Safety
    /// Caller must be the sole claimant of `sequence`, or a consumer that
    /// observed its publication and has not advanced past it.
    #[inline]
    unsafe fn slot(&self, sequence: u64) -> *mut T {
        self.slots[self.index(sequence)].get()
    }
}

/// A claimed, not yet published slot
///
/// Dereferences to the slot's contents. Dropping the claim publishes it, so
/// an abandoned claim can never stall the ring; callers that want the
/// consumer to ignore the slot must mark the contents themselves.
pub struct Claim<'a, T> {
    ring: &'a RingBuffer<T>,
    sequence: u64,
}

impl<T> Claim<'_, T> {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Make the slot visible to consumers
    pub fn publish(self) {
        // Drop does the work
    }
}

impl<T> Deref for Claim<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: this claim owns the sequence until it is published
        unsafe { &*self.ring.slot(self.sequence) }
    }
}

impl<T> DerefMut for Claim<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: this claim owns the sequence until it is published
        unsafe { &mut *self.ring.slot(self.sequence) }
    }
}

impl<T> Drop for Claim<'_, T> {
    fn drop(&mut self) {
        self.ring.publish_sequence(self.sequence);
    }
}

/// A consumer cursor over a shared ring
///
/// Slots borrowed through [`Consumer::get`] cannot outlive the next
/// [`Consumer::advance`], which is what hands them back to producers.
pub struct Consumer<T> {
    ring: Arc<RingBuffer<T>>,
    index: usize,
    position: u64,
    available: u64,
}

impl<T> Consumer<T> {
    /// Wait for the next published sequence; returns the exclusive end of the
    /// readable run
    pub fn next_available(&mut self) -> Result<u64, WaitError> {
        if self.available > self.position {
            return Ok(self.available);
        }
        let ring = &*self.ring;
        let from = self.position;
        let end = ring
            .wait
            .wait_for(from, || ring.published_end(from), &ring.published)?;
        self.available = end;
        Ok(end)
    }

    /// Borrow a readable slot (`position <= sequence < available`)
    pub fn get(&self, sequence: u64) -> Option<&T> {
        if sequence < self.position || sequence >= self.available {
            return None;
        }
        // SAFETY: publication of `sequence` was observed in next_available
        // and the slot stays ours until advance()
        Some(unsafe { &*self.ring.slot(sequence) })
    }

    /// Release every slot before `end` back to producers
    pub fn advance(&mut self, end: u64) {
        let end = end.min(self.available).max(self.position);
        self.position = end;
        self.ring.consumers[self.index].0.store(end, Ordering::Release);
        self.ring.released.notify();
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn ring(&self) -> &Arc<RingBuffer<T>> {
        &self.ring
    }

    /// True once every claimed sequence has been published and consumed
    pub fn is_drained(&self) -> bool {
        let claimed = self.ring.claimed();
        self.position >= claimed && self.ring.published_end(self.position) >= claimed
    }
}
