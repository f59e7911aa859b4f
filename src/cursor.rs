//! Independent read view over a ring buffer.
use crate::ring::RingBuffer;
use crate::slot::Entry;
use crossbeam_utils::Backoff;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Wraps `RingBuffer` and allows to receive every item published after the cursor was created.
/// Multiple cursors can be present at any time, they operate independently and are not part of
/// any flow control. As a result, each cursor can be overrun by the producers if it's unable to
/// keep up, in which case the skipped items are accounted for in [`Cursor::lost_count`].
///
/// A cursor must only be used by one thread at a time, concurrent use is detected and treated
/// as a fatal programming error.
pub struct Cursor<'a, T> {
    ring: &'a RingBuffer<T>,
    position: AtomicU64, // local position that will always increase
    read_count: AtomicU64,
    lost_count: AtomicU64,
    entered: AtomicUsize,
}

/// Releases the cursor when dropped, including during unwinding.
struct EnterGuard<'c> {
    entered: &'c AtomicUsize,
}

impl Drop for EnterGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.entered.fetch_sub(1, Ordering::Release);
    }
}

#[cold]
#[inline(never)]
fn concurrent_access() -> ! {
    panic!("cursor used concurrently from multiple threads")
}

impl<'a, T> Cursor<'a, T> {
    /// Create new cursor, its position will be set to the ring buffer write position.
    pub(crate) fn new(ring: &'a RingBuffer<T>) -> Self {
        Self {
            ring,
            position: AtomicU64::new(ring.write_position()),
            read_count: AtomicU64::new(0),
            lost_count: AtomicU64::new(0),
            entered: AtomicUsize::new(0),
        }
    }

    /// Set cursor initial position (the default is the ring buffer write position). Items that
    /// are still held by the ring from that position onwards will be replayed.
    pub fn with_initial_position(self, position: u64) -> Self {
        self.position.store(position, Ordering::Relaxed);
        self
    }

    /// Ring buffer this cursor reads from.
    #[inline]
    pub const fn ring(&self) -> &'a RingBuffer<T> {
        self.ring
    }

    /// Sequence of the next item this cursor will attempt to read.
    #[inline]
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    /// Number of items received by this cursor.
    #[inline]
    pub fn read_count(&self) -> u64 {
        self.read_count.load(Ordering::Relaxed)
    }

    /// Number of items this cursor skipped, either because the producers overran it or because
    /// the slot was no longer holding the item when the cursor got to it.
    #[inline]
    pub fn lost_count(&self) -> u64 {
        self.lost_count.load(Ordering::Relaxed)
    }

    /// Number of published items ahead of this cursor (at most the ring capacity).
    #[inline]
    pub fn available(&self) -> usize {
        let pending = self.ring.write_count().saturating_sub(self.position());
        pending.min(self.ring.capacity() as u64) as usize
    }

    #[inline]
    fn enter(&self) -> EnterGuard<'_> {
        let previous = self.entered.fetch_add(1, Ordering::Acquire);
        let guard = EnterGuard { entered: &self.entered };
        if previous != 0 {
            concurrent_access();
        }
        guard
    }

    /// Receive next pending item. Slots that no longer hold the expected item are skipped until
    /// an item is found or the publish position is reached.
    ///
    /// ## Panics
    /// When the cursor is being used by another thread at the same time.
    pub fn try_read(&self) -> Option<Entry<T>> {
        self.try_read_until(u64::MAX)
    }

    fn try_read_until(&self, limit: u64) -> Option<Entry<T>> {
        let _guard = self.enter();

        let capacity = self.ring.capacity() as u64;
        let mut position = self.position.load(Ordering::Relaxed);
        let mut lost = 0;

        let entry = loop {
            // ensure we have not been overrun
            let head = self.ring.write_position();
            if head.saturating_sub(position) > capacity {
                lost += head - capacity - position;
                position = head - capacity;
            }

            // no new items
            if position >= self.ring.write_count().min(limit) {
                break None;
            }

            let frame = self.ring.slot(position).load();
            position += 1;
            match frame {
                Some(frame) if frame.sequence() == position - 1 => break Some(Entry::new(frame)),
                // consumed by the shared reader, overwritten or not yet published
                _ => lost += 1,
            }
        };

        self.position.store(position, Ordering::Relaxed);
        if lost > 0 {
            self.lost_count.fetch_add(lost, Ordering::Relaxed);
        }
        if entry.is_some() {
            self.read_count.fetch_add(1, Ordering::Relaxed);
        }
        entry
    }

    /// Receive next item, yielding the current thread until one is available.
    ///
    /// ## Panics
    /// When the cursor is being used by another thread at the same time.
    pub fn read(&self) -> Entry<T> {
        let backoff = Backoff::new();
        loop {
            if let Some(entry) = self.try_read() {
                return entry;
            }
            backoff.snooze();
        }
    }

    /// Receive up to `count` items, `0` means whatever is currently available. Stops at the
    /// first unsuccessful read, never blocks.
    pub fn read_list(&self, count: usize) -> Vec<Entry<T>> {
        let count = if count == 0 { self.available() } else { count };
        let mut entries = Vec::with_capacity(count.min(self.ring.capacity()));
        while entries.len() < count {
            match self.try_read() {
                Some(entry) => entries.push(entry),
                None => break,
            }
        }
        entries
    }

    /// Best effort copy of the items between this cursor and the write position. The ring is
    /// not synchronised while copying so the result may be inconsistent under concurrent use.
    /// The cursor position is not changed.
    pub fn to_vec(&self) -> Vec<Entry<T>> {
        self.ring.snapshot(self.position())
    }

    /// Construct iterator that will receive the items published up to this point. Items
    /// published while iterating are left for subsequent reads.
    #[inline]
    pub fn batch_iter(&self) -> BatchIter<'_, 'a, T> {
        BatchIter {
            cursor: self,
            limit: self.ring.write_count(),
        }
    }
}

impl<T> fmt::Debug for Cursor<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("position", &self.position())
            .field("read_count", &self.read_count())
            .field("lost_count", &self.lost_count())
            .finish()
    }
}

/// Iterator over a batch of items pending for a [`Cursor`].
pub struct BatchIter<'c, 'a, T> {
    cursor: &'c Cursor<'a, T>,
    limit: u64, // publish position snapshot
}

impl<T> Iterator for BatchIter<'_, '_, T> {
    type Item = Entry<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.try_read_until(self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::OverflowPolicy;
    use crate::ring::CircularBuffer;
    use std::thread;

    fn values<T: Copy>(entries: impl IntoIterator<Item = Entry<T>>) -> Vec<T> {
        entries.into_iter().map(|entry| *entry).collect()
    }

    #[test]
    fn should_start_read_from_write_position() {
        let rb = RingBuffer::new(4).unwrap();
        rb.write(1).unwrap();
        rb.write(2).unwrap();

        let cursor = rb.cursor();
        assert_eq!(2, cursor.position());
        assert_eq!(0, cursor.available());
        assert!(cursor.try_read().is_none());

        rb.write(3).unwrap();
        assert_eq!(1, cursor.available());
        assert_eq!(3, *cursor.try_read().unwrap());
        assert!(cursor.try_read().is_none());
    }

    #[test]
    fn should_broadcast_to_every_cursor() {
        let rb = RingBuffer::new(4).unwrap();
        let c1 = rb.cursor();

        for i in 0..3 {
            rb.write(i).unwrap();
        }
        let c2 = rb.cursor();

        for i in 3..8 {
            rb.write(i).unwrap();
        }

        assert_eq!((0..8).collect::<Vec<_>>(), values(c1.read_list(0)));
        assert_eq!((3..8).collect::<Vec<_>>(), values(c2.read_list(0)));
        assert_eq!(8, c1.read_count());
        assert_eq!(5, c2.read_count());
        assert_eq!(0, c1.lost_count());
        assert_eq!(0, c2.lost_count());

        // cursors do not consume anything from the shared read cursor
        assert_eq!(8, rb.available());
        assert_eq!(0, *rb.read());
    }

    #[test]
    fn should_account_for_overrun() {
        let rb = CircularBuffer::new(2).unwrap();
        let cursor = rb.cursor();

        for i in 0..10 {
            rb.write(i).unwrap();
        }

        assert_eq!(4, cursor.available());
        assert_eq!(6, *cursor.try_read().unwrap());
        assert_eq!(6, cursor.lost_count());
        assert_eq!(vec![7, 8, 9], values(cursor.read_list(0)));
        assert!(cursor.try_read().is_none());
        assert_eq!(4, cursor.read_count());
        assert_eq!(10, cursor.position());
    }

    #[test]
    fn should_skip_items_taken_by_shared_reader() {
        let rb = RingBuffer::new(3).unwrap();
        let cursor = rb.cursor();
        for i in 0..4 {
            rb.write(i).unwrap();
        }

        assert_eq!(0, *rb.read());
        assert_eq!(1, *rb.read());

        assert_eq!(2, *cursor.try_read().unwrap());
        assert_eq!(2, cursor.lost_count());
        assert_eq!(3, *cursor.try_read().unwrap());
        assert!(cursor.try_read().is_none());
    }

    #[test]
    fn should_read_list_up_to_count() {
        let rb = RingBuffer::new(3).unwrap();
        let cursor = rb.cursor();
        for i in 0..5 {
            rb.write(i).unwrap();
        }
        assert_eq!(vec![0, 1], values(cursor.read_list(2)));
        assert_eq!(vec![2, 3, 4], values(cursor.read_list(100)));
        assert!(cursor.read_list(0).is_empty());
    }

    #[test]
    fn should_snapshot_without_consuming() {
        let rb = CircularBuffer::new(2).unwrap();
        let cursor = rb.cursor();
        for i in 0..6 {
            rb.write(i).unwrap();
        }

        assert_eq!(vec![2, 3, 4, 5], values(cursor.to_vec()));
        assert_eq!(0, cursor.position());

        assert_eq!(2, *cursor.read());
        assert_eq!(vec![3, 4, 5], values(cursor.to_vec()));

        // wraparound
        rb.write(6).unwrap();
        rb.write(7).unwrap();
        assert_eq!(vec![4, 5, 6, 7], values(cursor.to_vec()));
    }

    #[test]
    fn should_read_in_batch() {
        let rb = RingBuffer::new(3).unwrap();
        let cursor = rb.cursor();
        rb.write('a').unwrap();
        rb.write('b').unwrap();

        let mut iter = cursor.batch_iter();
        assert_eq!('a', *iter.next().unwrap());

        // published after the batch was taken
        rb.write('c').unwrap();

        assert_eq!('b', *iter.next().unwrap());
        assert!(iter.next().is_none());

        assert_eq!(vec!['c'], values(cursor.batch_iter()));
        assert!(cursor.batch_iter().next().is_none());
    }

    #[test]
    fn should_replay_from_initial_position() {
        let rb = RingBuffer::new(2).unwrap();
        for i in 0..3 {
            rb.write(i).unwrap();
        }
        let cursor = rb.cursor().with_initial_position(1);
        assert_eq!(vec![1, 2], values(cursor.read_list(0)));
    }

    #[test]
    fn should_keep_overflow_policy_independent_of_cursors() {
        let rb = RingBuffer::new(1).unwrap();
        let cursor = rb.cursor();
        rb.write(1).unwrap();
        rb.write(2).unwrap();
        assert_eq!(vec![1, 2], values(cursor.read_list(0)));

        // cursors do not free space
        assert!(!rb.write(3).unwrap());

        rb.set_overflow_policy(OverflowPolicy::NONE);
        assert!(rb.write(3).unwrap());
        assert_eq!(3, *cursor.try_read().unwrap());
    }

    #[test]
    #[should_panic(expected = "cursor used concurrently from multiple threads")]
    fn should_detect_concurrent_use() {
        let rb = RingBuffer::new(1).unwrap();
        let cursor = rb.cursor();
        rb.write(1).unwrap();

        // simulate another thread being inside the cursor
        let _other = cursor.enter();
        let _ = cursor.try_read();
    }

    #[test]
    fn should_release_cursor_after_read() {
        let rb = RingBuffer::<u32>::new(1).unwrap();
        let cursor = rb.cursor();
        assert!(cursor.try_read().is_none());
        assert_eq!(0, cursor.entered.load(Ordering::Relaxed));
        drop(cursor.enter());
        assert_eq!(0, cursor.entered.load(Ordering::Relaxed));
    }

    #[test]
    fn should_observe_all_items_from_many_threads() {
        const ITEMS: u64 = 5_000;
        const CURSORS: usize = 3;

        let rb = CircularBuffer::new(13).unwrap();
        let cursors: Vec<_> = (0..CURSORS).map(|_| rb.cursor()).collect();

        thread::scope(|s| {
            let handles: Vec<_> = cursors
                .iter()
                .map(|cursor| {
                    s.spawn(move || {
                        let mut expected = 0;
                        while expected < ITEMS {
                            let entry = cursor.read();
                            assert_eq!(expected, *entry);
                            assert_eq!(expected, entry.sequence());
                            expected += 1;
                        }
                    })
                })
                .collect();

            for i in 0..ITEMS {
                rb.write(i).unwrap();
            }

            for handle in handles {
                handle.join().unwrap();
            }
        });

        for cursor in &cursors {
            assert_eq!(ITEMS, cursor.read_count());
            assert_eq!(0, cursor.lost_count());
        }
    }
}
