//! Fixed capacity ring buffer with a shared (competing consumers) read cursor.
use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::policy::OverflowPolicy;
use crate::slot::{Entry, Frame, Publish, Slot};
use crossbeam_utils::{Backoff, CachePadded};
use std::cmp::max;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, Ordering};
use tracing::{debug, warn};

/// Smallest accepted `capacity_bits` value.
pub const MIN_CAPACITY_BITS: u32 = 1;
/// Largest accepted `capacity_bits` value.
pub const MAX_CAPACITY_BITS: u32 = 31;

/// Multi producer, multi consumer ring buffer of `2^capacity_bits` slots.
///
/// Items can be consumed in two ways:
/// - through the buffer itself (`read`, `try_read`, `read_list`) where every item is delivered
///   to exactly one caller, in publication order,
/// - through any number of [`Cursor`]s, each of which observes every item published after its
///   creation.
///
/// What happens when a producer finds the buffer full is governed by [`OverflowPolicy`], the
/// default being [`OverflowPolicy::PREVENT`].
pub struct RingBuffer<T> {
    slots: Box<[Slot<T>]>,
    mask: u64,
    write_cursor: CachePadded<AtomicU64>, // next sequence to be claimed by a producer
    read_cursor: CachePadded<AtomicU64>,  // next sequence to be claimed by the shared reader
    space: CachePadded<AtomicI64>,        // capacity minus live items, admits writes
    write_count: CachePadded<AtomicU64>,
    read_count: CachePadded<AtomicU64>,
    lost_count: AtomicU64,
    rejected_count: AtomicU64,
    policy: AtomicU8,
    overwritten: AtomicBool, // set once a producer claimed a sequence without reserving space
}

impl<T> RingBuffer<T> {
    /// Create new `RingBuffer` with capacity of `2^capacity_bits` items and the
    /// [`OverflowPolicy::PREVENT`] policy.
    ///
    /// ## Errors
    /// When `capacity_bits` is outside of `1..=31`.
    pub fn new(capacity_bits: u32) -> Result<Self> {
        if !(MIN_CAPACITY_BITS..=MAX_CAPACITY_BITS).contains(&capacity_bits) {
            return Err(Error::invalid_capacity_bits(capacity_bits));
        }
        let capacity = 1usize << capacity_bits;
        let slots = (0..capacity).map(|_| Slot::default()).collect();
        debug!(capacity, "created ring buffer");
        Ok(Self {
            slots,
            mask: capacity as u64 - 1,
            write_cursor: CachePadded::new(AtomicU64::new(0)),
            read_cursor: CachePadded::new(AtomicU64::new(0)),
            space: CachePadded::new(AtomicI64::new(capacity as i64)),
            write_count: CachePadded::new(AtomicU64::new(0)),
            read_count: CachePadded::new(AtomicU64::new(0)),
            lost_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
            policy: AtomicU8::new(OverflowPolicy::PREVENT.bits()),
            overwritten: AtomicBool::new(false),
        })
    }

    /// Replace the overflow policy (builder style).
    pub fn with_overflow_policy(self, policy: OverflowPolicy) -> Self {
        self.set_overflow_policy(policy);
        self
    }

    /// Current overflow policy.
    #[inline]
    pub fn overflow_policy(&self) -> OverflowPolicy {
        OverflowPolicy::from_bits_truncate(self.policy.load(Ordering::Relaxed))
    }

    /// Change the overflow policy, takes effect for subsequent writes.
    #[inline]
    pub fn set_overflow_policy(&self, policy: OverflowPolicy) {
        self.policy.store(policy.bits(), Ordering::Relaxed);
    }

    /// Number of slots.
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of items published but not yet consumed through the shared read cursor (nor lost).
    #[inline]
    pub fn available(&self) -> usize {
        let consumed = self.read_count() + self.lost_count();
        self.write_count().saturating_sub(consumed) as usize
    }

    /// Total number of published items.
    #[inline]
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Acquire)
    }

    /// Total number of items consumed through the shared read cursor.
    #[inline]
    pub fn read_count(&self) -> u64 {
        self.read_count.load(Ordering::Acquire)
    }

    /// Total number of unread items overwritten by producers.
    #[inline]
    pub fn lost_count(&self) -> u64 {
        self.lost_count.load(Ordering::Acquire)
    }

    /// Total number of items rejected because the buffer was full.
    #[inline]
    pub fn rejected_count(&self) -> u64 {
        self.rejected_count.load(Ordering::Relaxed)
    }

    /// Sequence that will be assigned to the next written item.
    #[inline]
    pub fn write_position(&self) -> u64 {
        self.write_cursor.load(Ordering::Acquire)
    }

    /// Sequence of the next item to be consumed through the shared read cursor.
    #[inline]
    pub fn read_position(&self) -> u64 {
        self.read_cursor.load(Ordering::Acquire)
    }

    /// Create new independent [`Cursor`] that will observe every item written from now on.
    pub fn cursor(&self) -> Cursor<'_, T> {
        Cursor::new(self)
    }

    /// Slot assigned to the given sequence.
    #[inline]
    pub(crate) fn slot(&self, sequence: u64) -> &Slot<T> {
        &self.slots[(sequence & self.mask) as usize]
    }

    /// Publish `item`. Returns `Ok(true)` when the item was stored and `Ok(false)` when it was
    /// rejected (and dropped) because the buffer was full under [`OverflowPolicy::PREVENT`].
    ///
    /// ## Errors
    /// [`Error::Overflow`] when the buffer was full and the policy contains
    /// [`OverflowPolicy::EXCEPTION`]. The bookkeeping (reject or overwrite) has already happened
    /// at that point.
    ///
    /// ## Panics
    /// When the slot being written still holds an unread item although space was reserved for
    /// it and no producer ever overwrote an item, which means the ring is corrupted.
    pub fn write(&self, item: T) -> Result<bool> {
        let policy = self.overflow_policy();

        // reserve space for the item, the buffer is full if there was none left
        if self.space.fetch_sub(1, Ordering::AcqRel) <= 0 {
            return self.overflow(item, policy);
        }
        self.publish_reserved(item);
        Ok(true)
    }

    /// Claim the next sequence and publish `item` into it, space must have been reserved.
    fn publish_reserved(&self, item: T) {
        let sequence = self.write_cursor.fetch_add(1, Ordering::AcqRel);
        if let Publish::Replaced(previous) = self.slot(sequence).publish(Frame::new(sequence, item)) {
            if previous.sequence() >= self.read_cursor.load(Ordering::Acquire) {
                // an overwriting producer may have claimed a lower sequence than ours without
                // reserving space, the unread occupant is then lost like any other overwrite
                if !self.overwritten.load(Ordering::Acquire) {
                    slot_corrupted(sequence, previous.sequence());
                }
                self.evict(sequence);
            }
        }
        self.write_count.fetch_add(1, Ordering::AcqRel);
    }

    #[cold]
    #[inline(never)]
    fn overflow(&self, item: T, policy: OverflowPolicy) -> Result<bool> {
        let rejected = policy.contains(OverflowPolicy::PREVENT);
        let sequence = if rejected {
            self.space.fetch_add(1, Ordering::AcqRel);
            self.rejected_count.fetch_add(1, Ordering::Relaxed);
            drop(item);
            self.write_position()
        } else {
            self.overwritten.store(true, Ordering::Release);
            let sequence = self.write_cursor.fetch_add(1, Ordering::AcqRel);
            self.evict(sequence);
            // a stale outcome means a faster producer has lapped us, our item was already
            // accounted for as lost by that producer
            let _ = self.slot(sequence).publish(Frame::new(sequence, item));
            self.write_count.fetch_add(1, Ordering::AcqRel);
            sequence
        };

        if policy.contains(OverflowPolicy::TRACE) {
            warn!(
                capacity = self.capacity(),
                position = sequence,
                rejected,
                lost = self.lost_count(),
                "ring buffer overflow"
            );
        }
        if policy.contains(OverflowPolicy::EXCEPTION) {
            return Err(Error::overflow(self.capacity(), rejected));
        }
        Ok(!rejected)
    }

    /// Move the shared read cursor past the item about to be overwritten by `sequence`. Whatever
    /// the shared reader has not claimed yet is lost and its space is given back.
    #[inline]
    fn evict(&self, sequence: u64) {
        let Some(oldest) = (sequence + 1).checked_sub(self.capacity() as u64) else {
            return;
        };
        let previous = self.read_cursor.fetch_max(oldest, Ordering::AcqRel);
        if previous < oldest {
            let lost = oldest - previous;
            self.lost_count.fetch_add(lost, Ordering::AcqRel);
            self.space.fetch_add(lost as i64, Ordering::AcqRel);
        }
    }

    /// Attempt to consume the next item through the shared read cursor. Returns `None` when no
    /// item is available, or when the next item has not been published yet or was taken by a
    /// competing reader in the meantime (the caller is expected to retry).
    pub fn try_read(&self) -> Option<Entry<T>> {
        if self.read_count() + self.lost_count() >= self.write_count() {
            return None;
        }

        let backoff = Backoff::new();
        loop {
            let sequence = self.read_cursor.load(Ordering::Acquire);
            let slot = self.slot(sequence);
            let frame = slot.load()?;
            if frame.sequence() < sequence {
                // producer has claimed the sequence but not published into it yet
                return None;
            }
            if frame.sequence() == sequence
                && self
                    .read_cursor
                    .compare_exchange(sequence, sequence + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                // the slot may have been overwritten already, the frame we hold is still ours
                slot.take(&frame);
                self.read_count.fetch_add(1, Ordering::AcqRel);
                self.space.fetch_add(1, Ordering::AcqRel);
                return Some(Entry::new(frame));
            }
            // another reader claimed the sequence or a producer lapped it
            backoff.spin();
        }
    }

    /// Consume the next item through the shared read cursor, yielding the current thread until
    /// one is available.
    pub fn read(&self) -> Entry<T> {
        let backoff = Backoff::new();
        loop {
            if let Some(entry) = self.try_read() {
                return entry;
            }
            backoff.snooze();
        }
    }

    /// Consume up to `count` items through the shared read cursor, `0` means whatever is
    /// currently available. Stops at the first unsuccessful read, never blocks.
    pub fn read_list(&self, count: usize) -> Vec<Entry<T>> {
        let count = if count == 0 { self.available() } else { count };
        let mut entries = Vec::with_capacity(count.min(self.capacity()));
        while entries.len() < count {
            match self.try_read() {
                Some(entry) => entries.push(entry),
                None => break,
            }
        }
        entries
    }

    /// Best effort copy of the items between the shared read cursor and the write cursor. The
    /// buffer is not synchronised while copying so the result may be inconsistent under
    /// concurrent use. Nothing is consumed.
    pub fn to_vec(&self) -> Vec<Entry<T>> {
        self.snapshot(self.read_position())
    }

    /// Copy the slots and return the live frames with sequence in `from..write_position`.
    pub(crate) fn snapshot(&self, from: u64) -> Vec<Entry<T>> {
        let frames: Vec<_> = self.slots.iter().map(Slot::load).collect();
        let to = self.write_position();
        let from = max(from, to.saturating_sub(self.capacity() as u64));
        (from..to)
            .filter_map(|sequence| match &frames[(sequence & self.mask) as usize] {
                Some(frame) if frame.sequence() == sequence => Some(Entry::new(Arc::clone(frame))),
                _ => None,
            })
            .collect()
    }
}

impl<T> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("policy", &self.overflow_policy())
            .field("write_position", &self.write_position())
            .field("read_position", &self.read_position())
            .field("write_count", &self.write_count())
            .field("read_count", &self.read_count())
            .field("lost_count", &self.lost_count())
            .field("rejected_count", &self.rejected_count())
            .finish()
    }
}

#[cold]
#[inline(never)]
fn slot_corrupted(sequence: u64, occupant: u64) -> ! {
    panic!("ring buffer corrupted: slot for sequence {sequence} still holds unread sequence {occupant}")
}

/// Ring buffer that silently overwrites the oldest unread item when full, i.e. a [`RingBuffer`]
/// with [`OverflowPolicy::NONE`]. The policy can still be changed at runtime.
#[derive(Debug)]
pub struct CircularBuffer<T> {
    ring: RingBuffer<T>,
}

impl<T> CircularBuffer<T> {
    /// Create new `CircularBuffer` with capacity of `2^capacity_bits` items.
    ///
    /// ## Errors
    /// When `capacity_bits` is outside of `1..=31`.
    pub fn new(capacity_bits: u32) -> Result<Self> {
        Ok(Self {
            ring: RingBuffer::new(capacity_bits)?.with_overflow_policy(OverflowPolicy::NONE),
        })
    }

    /// Unwrap the underlying ring buffer.
    pub fn into_inner(self) -> RingBuffer<T> {
        self.ring
    }
}

impl<T> Deref for CircularBuffer<T> {
    type Target = RingBuffer<T>;

    fn deref(&self) -> &Self::Target {
        &self.ring
    }
}
