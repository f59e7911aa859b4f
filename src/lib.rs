//! Lock-free, in-memory queueing primitives: a fixed capacity multi producer ring buffer that can
//! be consumed either by competing readers or by any number of independent (broadcast) cursors,
//! and an unbounded multi producer, multi consumer fifo.
//!
//! ## Examples
//! Create `RingBuffer` and consume it through the shared read cursor, every item is delivered
//! to exactly one reader.
//! ```no_run
//! use slotring::{OverflowPolicy, RingBuffer};
//!
//! // 2^2 = 4 slots, full buffer rejects further writes
//! let ring = RingBuffer::new(2)?;
//! assert_eq!(OverflowPolicy::PREVENT, ring.overflow_policy());
//!
//! for item in ["a", "b", "c", "d"] {
//!     assert!(ring.write(item)?);
//! }
//! assert!(!ring.write("e")?);
//! assert_eq!(1, ring.rejected_count());
//!
//! // reading frees up space
//! assert_eq!("a", *ring.read());
//! assert!(ring.write("e")?);
//! # Ok::<(), slotring::error::Error>(())
//! ```
//! Create `Cursor`s to broadcast the same items to multiple readers.
//! ```no_run
//! use slotring::CircularBuffer;
//!
//! // overwrites the oldest item when full
//! let ring = CircularBuffer::new(10)?;
//! let first = ring.cursor();
//! ring.write(1)?;
//! let second = ring.cursor();
//! ring.write(2)?;
//!
//! let items: Vec<_> = first.read_list(0).into_iter().map(|entry| *entry).collect();
//! assert_eq!(vec![1, 2], items);
//!
//! // only sees what was written after its creation
//! assert_eq!(2, *second.try_read().unwrap());
//! assert!(second.try_read().is_none());
//! # Ok::<(), slotring::error::Error>(())
//! ```
//! Use `Fifo` when the queue must never lose (or reject) items.
//! ```no_run
//! use slotring::Fifo;
//!
//! let fifo = Fifo::new();
//! fifo.enqueue("hello");
//! fifo.enqueue("world");
//! assert_eq!(Some("hello"), fifo.try_dequeue());
//! assert_eq!("world", fifo.dequeue());
//! assert!(fifo.try_dequeue().is_none());
//! ```

pub mod error;

mod cursor;
mod fifo;
mod policy;
mod ring;
mod slot;

// re-export
pub use cursor::{BatchIter, Cursor};
pub use error::Result;
pub use fifo::Fifo;
pub use policy::OverflowPolicy;
pub use ring::{CircularBuffer, MAX_CAPACITY_BITS, MIN_CAPACITY_BITS, RingBuffer};
pub use slot::Entry;
