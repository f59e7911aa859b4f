//! Unbounded lock-free multi producer, multi consumer queue.
use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam_utils::{Backoff, CachePadded};
use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicPtr, AtomicU64, Ordering};

struct Node<T> {
    value: AtomicPtr<T>, // null once taken (or for the initial sentinel)
    next: ArcSwapOption<Node<T>>,
    _marker: PhantomData<T>,
}

impl<T> Node<T> {
    fn new(value: Option<T>) -> Self {
        let value = value.map_or(ptr::null_mut(), |value| Box::into_raw(Box::new(value)));
        Self {
            value: AtomicPtr::new(value),
            next: ArcSwapOption::empty(),
            _marker: PhantomData,
        }
    }

    /// Move the value out of the node, only the first caller gets it.
    #[inline]
    fn take(&self) -> Option<T> {
        let value = self.value.swap(ptr::null_mut(), Ordering::Acquire);
        if value.is_null() {
            None
        } else {
            // SAFETY: the pointer was created by `Box::into_raw` and the swap above guarantees
            // it is reclaimed exactly once
            Some(*unsafe { Box::from_raw(value) })
        }
    }
}

impl<T> Drop for Node<T> {
    fn drop(&mut self) {
        drop(self.take());
        // release the chain of successors iteratively, a stale head held by a preempted consumer
        // can keep an arbitrarily long chain of consumed nodes alive
        let mut next = self.next.swap(None);
        while let Some(node) = next {
            next = match Arc::into_inner(node) {
                Some(node) => node.next.swap(None),
                None => None,
            };
        }
    }
}

#[cold]
#[inline(never)]
fn broken_link() -> ! {
    panic!("fifo corrupted: reserved item has no linked node")
}

/// Unbounded multi producer, multi consumer queue. Nodes are appended at `last` and removed at
/// `first`, where `first` always points to an already consumed (or sentinel) node and the next
/// value lives in `first.next`.
pub struct Fifo<T> {
    first: CachePadded<ArcSwap<Node<T>>>,
    last: CachePadded<ArcSwap<Node<T>>>,
    available: CachePadded<AtomicI64>,
    read_count: AtomicU64,
    write_count: AtomicU64,
}

// SAFETY: values are moved in by `enqueue` and moved out exactly once by `try_dequeue`, so the
// queue only ever hands a `T` from one thread to another
unsafe impl<T: Send> Send for Fifo<T> {}
unsafe impl<T: Send> Sync for Fifo<T> {}

impl<T> Default for Fifo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Fifo<T> {
    /// Create new empty `Fifo`.
    pub fn new() -> Self {
        let sentinel = Arc::new(Node::new(None));
        Self {
            first: CachePadded::new(ArcSwap::new(Arc::clone(&sentinel))),
            last: CachePadded::new(ArcSwap::new(sentinel)),
            available: CachePadded::new(AtomicI64::new(0)),
            read_count: AtomicU64::new(0),
            write_count: AtomicU64::new(0),
        }
    }

    /// Number of items currently queued.
    #[inline]
    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire).max(0) as usize
    }

    /// Same as [`Fifo::available`].
    #[inline]
    pub fn len(&self) -> usize {
        self.available()
    }

    /// Returns `true` when there is no item to dequeue.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Total number of dequeued items.
    #[inline]
    pub fn read_count(&self) -> u64 {
        self.read_count.load(Ordering::Relaxed)
    }

    /// Total number of enqueued items.
    #[inline]
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    /// Append `value` at the end of the queue.
    pub fn enqueue(&self, value: T) {
        let node = Arc::new(Node::new(Some(value)));
        let backoff = Backoff::new();
        loop {
            let last = self.last.load_full();
            let next = last.next.load();
            if let Some(next) = &*next {
                // tail is lagging behind, help to advance it before retrying
                let _ = self.last.compare_and_swap(&last, Arc::clone(next));
            } else {
                let previous = last.next.compare_and_swap(&None::<Arc<Node<T>>>, Some(Arc::clone(&node)));
                if previous.is_none() {
                    // linked, failure here means another thread already advanced the tail for us
                    let _ = self.last.compare_and_swap(&last, node);
                    break;
                }
            }
            backoff.spin();
        }
        self.available.fetch_add(1, Ordering::Release);
        self.write_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove the item at the front of the queue, returns `None` when the queue is empty.
    ///
    /// ## Panics
    /// When the internal links are found broken, which means the queue is corrupted.
    pub fn try_dequeue(&self) -> Option<T> {
        // reserve an item
        if self.available.fetch_sub(1, Ordering::AcqRel) <= 0 {
            self.available.fetch_add(1, Ordering::AcqRel);
            return None;
        }

        let backoff = Backoff::new();
        loop {
            let first = self.first.load_full();
            let Some(next) = first.next.load_full() else {
                broken_link();
            };
            let previous = self.first.compare_and_swap(&first, Arc::clone(&next));
            if Arc::ptr_eq(&*previous, &first) {
                let value = next.take().unwrap_or_else(|| broken_link());
                self.read_count.fetch_add(1, Ordering::Relaxed);
                return Some(value);
            }
            // another consumer advanced the head
            backoff.spin();
        }
    }

    /// Remove the item at the front of the queue, yielding the current thread until one is
    /// available.
    pub fn dequeue(&self) -> T {
        let backoff = Backoff::new();
        loop {
            if let Some(value) = self.try_dequeue() {
                return value;
            }
            backoff.snooze();
        }
    }
}

impl<T> fmt::Debug for Fifo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fifo")
            .field("available", &self.available())
            .field("write_count", &self.write_count())
            .field("read_count", &self.read_count())
            .finish()
    }
}
