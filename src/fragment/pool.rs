//! Fixed-capacity arena of message slots.
//!
//! Both halves of the engine keep their per-message state in a
//! [`SlotPool`] allocated once at construction. Slots are never added or
//! removed afterwards; a slot is "free" or "busy" according to its own state,
//! and the index of a slot within the pool is its stable handle.

/// State that can live in a [`SlotPool`].
pub(crate) trait Slot {
    /// Whether the slot may be handed out to a new message.
    fn is_vacant(&self) -> bool;
}

/// Array-backed pool of slots with linear-scan lookup.
#[derive(Debug)]
pub(crate) struct SlotPool<T> {
    slots: Box<[T]>,
}

impl<T: Slot> SlotPool<T> {
    /// Allocate `capacity` slots, each built by `make`.
    pub(crate) fn new(capacity: usize, make: impl FnMut() -> T) -> Self {
        Self {
            slots: std::iter::repeat_with(make).take(capacity).collect(),
        }
    }

    /// Total number of slots.
    pub(crate) fn capacity(&self) -> usize { self.slots.len() }

    /// Number of slots currently holding a message.
    pub(crate) fn busy_len(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.is_vacant()).count()
    }

    /// Index of the first vacant slot.
    pub(crate) fn find_vacant(&self) -> Option<usize> {
        self.slots.iter().position(Slot::is_vacant)
    }

    /// Index of the first busy slot matching `predicate`.
    pub(crate) fn find_busy(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| !slot.is_vacant() && predicate(slot))
    }

    pub(crate) fn get(&self, index: usize) -> Option<&T> { self.slots.get(index) }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut T> { self.slots.get_mut(index) }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> { self.slots.iter() }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> { self.slots.iter_mut() }
}
