//! Storage cell of the ring buffer and the shared handle handed out to readers.
use arc_swap::ArcSwapOption;
use std::fmt;
use std::ops::Deref;
use std::ptr;
use std::sync::Arc;

/// Published item stamped with the write sequence it was assigned.
#[derive(Debug, Clone)]
pub(crate) struct Frame<T> {
    sequence: u64,
    value: T,
}

impl<T> Frame<T> {
    #[inline]
    pub(crate) const fn new(sequence: u64, value: T) -> Self {
        Self { sequence, value }
    }

    #[inline]
    pub(crate) const fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Outcome of publishing a frame into a slot.
pub(crate) enum Publish<T> {
    /// Slot was empty.
    Vacant,
    /// Slot held an older frame which has now been replaced.
    Replaced(Arc<Frame<T>>),
    /// Slot already holds a newer frame, the published one was discarded.
    Stale,
}

/// Single cell of the ring. An empty slot is logically unpublished (or already consumed).
pub(crate) struct Slot<T> {
    frame: ArcSwapOption<Frame<T>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            frame: ArcSwapOption::empty(),
        }
    }
}

impl<T> Slot<T> {
    /// Take a reference to the current frame without consuming it.
    #[inline]
    pub(crate) fn load(&self) -> Option<Arc<Frame<T>>> {
        self.frame.load_full()
    }

    /// Store `frame` unless the slot has already moved on to a newer sequence (which can only
    /// happen when a slow producer is lapped by faster ones).
    pub(crate) fn publish(&self, frame: Frame<T>) -> Publish<T> {
        let frame = Arc::new(frame);
        loop {
            let current = self.frame.load_full();
            if let Some(current) = &current {
                if current.sequence > frame.sequence {
                    return Publish::Stale;
                }
            }
            let previous = self.frame.compare_and_swap(&current, Some(Arc::clone(&frame)));
            if frame_ptr(&previous) == frame_ptr(&current) {
                return match current {
                    Some(current) => Publish::Replaced(current),
                    None => Publish::Vacant,
                };
            }
        }
    }

    /// Clear the slot if it still holds `frame`. Returns `false` when the slot has been
    /// overwritten (or cleared) in the meantime.
    #[inline]
    pub(crate) fn take(&self, frame: &Arc<Frame<T>>) -> bool {
        let previous = self.frame.compare_and_swap(frame, None::<Arc<Frame<T>>>);
        frame_ptr(&previous) == Arc::as_ptr(frame)
    }
}

#[inline]
fn frame_ptr<T>(frame: &Option<Arc<Frame<T>>>) -> *const Frame<T> {
    frame.as_ref().map_or(ptr::null(), Arc::as_ptr)
}

/// Item received from the ring buffer. The same entry can be observed by the shared read cursor
/// and by any number of independent [`crate::Cursor`]s, so it is handed out as a cheap to clone
/// reference that dereferences to the stored value.
pub struct Entry<T> {
    frame: Arc<Frame<T>>,
}

impl<T> Entry<T> {
    #[inline]
    pub(crate) const fn new(frame: Arc<Frame<T>>) -> Self {
        Self { frame }
    }

    /// Write sequence assigned to this item.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.frame.sequence
    }

    /// Recover the owned value if this is the last reference to it, otherwise the entry
    /// is given back.
    pub fn try_unwrap(self) -> std::result::Result<T, Self> {
        Arc::try_unwrap(self.frame)
            .map(|frame| frame.value)
            .map_err(|frame| Self { frame })
    }
}

impl<T: Clone> Entry<T> {
    /// Recover the owned value, cloning it if the entry is still shared.
    pub fn into_value(self) -> T {
        Arc::unwrap_or_clone(self.frame).value
    }
}

impl<T> Clone for Entry<T> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            frame: Arc::clone(&self.frame),
        }
    }
}

impl<T> Deref for Entry<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.frame.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Entry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("sequence", &self.frame.sequence)
            .field("value", &self.frame.value)
            .finish()
    }
}

/// Entries compare by value only, the sequence they were published with is ignored. Compare
/// [`Entry::sequence`] as well to tell apart equal values written at different positions.
impl<T: PartialEq> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.frame.value == other.frame.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_publish_into_vacant_slot() {
        let slot = Slot::default();
        assert!(slot.load().is_none());
        assert!(matches!(slot.publish(Frame::new(0, "a")), Publish::Vacant));
        assert_eq!(0, slot.load().unwrap().sequence());
    }

    #[test]
    fn should_replace_older_frame() {
        let slot = Slot::default();
        slot.publish(Frame::new(0, "a"));
        match slot.publish(Frame::new(4, "b")) {
            Publish::Replaced(old) => assert_eq!(0, old.sequence()),
            _ => panic!("expected replaced frame"),
        }
        assert_eq!(4, slot.load().unwrap().sequence());
    }

    #[test]
    fn should_discard_stale_frame() {
        let slot = Slot::default();
        slot.publish(Frame::new(8, "new"));
        assert!(matches!(slot.publish(Frame::new(4, "old")), Publish::Stale));
        assert_eq!(8, slot.load().unwrap().sequence());
    }

    #[test]
    fn should_take_only_matching_frame() {
        let slot = Slot::default();
        slot.publish(Frame::new(0, "a"));
        let frame = slot.load().unwrap();
        slot.publish(Frame::new(4, "b"));
        assert!(!slot.take(&frame));
        assert_eq!(4, slot.load().unwrap().sequence());

        let frame = slot.load().unwrap();
        assert!(slot.take(&frame));
        assert!(slot.load().is_none());
    }

    #[test]
    fn should_unwrap_entry() {
        let entry = Entry::new(Arc::new(Frame::new(3, String::from("hello"))));
        let shared = entry.clone();
        assert_eq!(3, entry.sequence());
        assert_eq!("hello", entry.as_str());

        let entry = entry.try_unwrap().unwrap_err();
        drop(shared);
        assert_eq!("hello", entry.try_unwrap().unwrap());
    }

    #[test]
    fn should_compare_entries_by_value() {
        let first = Entry::new(Arc::new(Frame::new(0, 7)));
        let second = Entry::new(Arc::new(Frame::new(5, 7)));
        assert_eq!(first, second);
        assert_ne!(first.sequence(), second.sequence());
        assert_ne!(first, Entry::new(Arc::new(Frame::new(0, 8))));
    }

    #[test]
    fn should_clone_shared_value() {
        let entry = Entry::new(Arc::new(Frame::new(0, vec![1, 2, 3])));
        let shared = entry.clone();
        assert_eq!(vec![1, 2, 3], entry.into_value());
        assert_eq!(vec![1, 2, 3], *shared);
    }
}
