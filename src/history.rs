//! Fixed-capacity ring buffer for per-bin request history

use static_assertions::const_assert;

/// Number of requests a bin retains
pub const HISTORY_CAPACITY: usize = 10;

const_assert!(HISTORY_CAPACITY > 0);

/// Bounded FIFO over contiguous storage
///
/// Pushing onto a full ring overwrites the oldest slot. Neither push nor
/// eviction allocates after construction.
#[derive(Debug)]
pub struct Ring<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    len: usize,
}

impl<T> Ring<T> {
    /// Create an empty ring holding at most `capacity` items
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be > 0");

        Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
            head: 0,
            len: 0,
        }
    }

    /// Maximum number of items
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Current number of items
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the ring holds no items
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append at the tail, returning the evicted head when full
    pub fn push(&mut self, item: T) -> Option<T> {
        let capacity = self.capacity();
        let tail = (self.head + self.len) % capacity;

        if self.len == capacity {
            let evicted = self.slots[tail].replace(item);
            self.head = (self.head + 1) % capacity;
            evicted
        } else {
            self.slots[tail] = Some(item);
            self.len += 1;
            None
        }
    }

    /// Oldest item
    #[must_use]
    pub fn front(&self) -> Option<&T> {
        self.get(0)
    }

    /// Newest item
    #[must_use]
    pub fn back(&self) -> Option<&T> {
        self.len.checked_sub(1).and_then(|i| self.get(i))
    }

    /// Item at logical position `index` (0 = oldest)
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        self.slots[(self.head + index) % self.capacity()].as_ref()
    }

    /// Iterate oldest-first
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }
}

impl<T: Clone> Ring<T> {
    /// Copy of the contents, oldest-first
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}
