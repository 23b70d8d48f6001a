//! Bounded-capacity list: dynamic logical size over a fixed physical store.
//!
//! A [`BoundedList`] turns a fixed-capacity indexable store into a list by
//! tracking a logical `count` distinct from the physical capacity. Inserts
//! and removals move entries in place; slots at `[count, capacity)` hold
//! stale data that is never observable through the API.

use crate::error::{Result, StorageError};

/// Fixed-capacity slot store underlying a [`BoundedList`].
///
/// Slots are pre-allocated; `load`/`store` must accept any index below
/// `capacity()`. Growth is explicit, never implicit.
pub trait SlotStore<T> {
    fn capacity(&self) -> usize;

    fn load(&self, index: usize) -> T;

    fn store(&mut self, index: usize, value: T);

    /// Extend capacity to `new_capacity` slots. No-op if already larger.
    fn grow(&mut self, new_capacity: usize);
}

/// In-memory slot store backed by a `Vec`.
#[derive(Debug, Clone)]
pub struct VecStore<T> {
    slots: Vec<T>,
}

impl<T: Default + Clone> VecStore<T> {
    pub fn new(capacity: usize) -> Self {
        VecStore {
            slots: vec![T::default(); capacity],
        }
    }
}

impl<T: Default + Clone> SlotStore<T> for VecStore<T> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn load(&self, index: usize) -> T {
        self.slots[index].clone()
    }

    fn store(&mut self, index: usize, value: T) {
        self.slots[index] = value;
    }

    fn grow(&mut self, new_capacity: usize) {
        if new_capacity > self.slots.len() {
            self.slots.resize(new_capacity, T::default());
        }
    }
}

/// List with a logical count over a fixed-capacity [`SlotStore`].
#[derive(Debug, Clone)]
pub struct BoundedList<T, S: SlotStore<T>> {
    store: S,
    count: usize,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Clone, S: SlotStore<T>> BoundedList<T, S> {
    pub fn new(store: S) -> Self {
        BoundedList {
            store,
            count: 0,
            _marker: std::marker::PhantomData,
        }
    }

    /// Rebuild a list over a store whose first `count` slots are live.
    pub fn with_count(store: S, count: usize) -> Result<Self> {
        if count > store.capacity() {
            return Err(StorageError::CapacityExceeded {
                needed: count,
                available: store.capacity(),
            });
        }
        Ok(BoundedList {
            store,
            count,
            _marker: std::marker::PhantomData,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, index: usize) -> Result<T> {
        self.check_index(index)?;
        Ok(self.store.load(index))
    }

    pub fn set(&mut self, index: usize, value: T) -> Result<()> {
        self.check_index(index)?;
        self.store.store(index, value);
        Ok(())
    }

    pub fn add(&mut self, value: T) -> Result<()> {
        self.check_room(1)?;
        self.store.store(self.count, value);
        self.count += 1;
        Ok(())
    }

    pub fn add_range<I: IntoIterator<Item = T>>(&mut self, values: I) -> Result<()> {
        let values: Vec<T> = values.into_iter().collect();
        self.check_room(values.len())?;
        for value in values {
            self.store.store(self.count, value);
            self.count += 1;
        }
        Ok(())
    }

    pub fn insert(&mut self, index: usize, value: T) -> Result<()> {
        self.insert_range(index, [value])
    }

    /// Insert `values` at `index`, shifting the suffix forward.
    ///
    /// The suffix moves in descending order so a slot is always read before
    /// it is overwritten.
    pub fn insert_range<I: IntoIterator<Item = T>>(&mut self, index: usize, values: I) -> Result<()> {
        if index > self.count {
            return Err(StorageError::IndexOutOfBounds {
                index,
                len: self.count,
            });
        }
        let values: Vec<T> = values.into_iter().collect();
        let n = values.len();
        self.check_room(n)?;
        if n == 0 {
            return Ok(());
        }
        for src in (index..self.count).rev() {
            let moved = self.store.load(src);
            self.store.store(src + n, moved);
        }
        for (offset, value) in values.into_iter().enumerate() {
            self.store.store(index + offset, value);
        }
        self.count += n;
        Ok(())
    }

    pub fn remove_at(&mut self, index: usize) -> Result<T> {
        self.check_index(index)?;
        let removed = self.store.load(index);
        self.remove_range(index, 1)?;
        Ok(removed)
    }

    /// Remove `n` entries at `index`, shifting the suffix backward.
    ///
    /// Vacated slots keep their stale contents; shrinking `count` makes them
    /// unreachable.
    pub fn remove_range(&mut self, index: usize, n: usize) -> Result<()> {
        let end = index
            .checked_add(n)
            .ok_or(StorageError::IndexOutOfBounds {
                index,
                len: self.count,
            })?;
        if end > self.count {
            return Err(StorageError::IndexOutOfBounds {
                index: end,
                len: self.count,
            });
        }
        for src in end..self.count {
            let moved = self.store.load(src);
            self.store.store(src - n, moved);
        }
        self.count -= n;
        Ok(())
    }

    pub fn grow(&mut self, new_capacity: usize) {
        self.store.grow(new_capacity);
    }

    pub fn clear(&mut self) {
        self.count = 0;
    }

    /// Iterate the logical window `[0, count)` only.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.count).map(move |i| self.store.load(i))
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.count {
            return Err(StorageError::IndexOutOfBounds {
                index,
                len: self.count,
            });
        }
        Ok(())
    }

    fn check_room(&self, n: usize) -> Result<()> {
        let available = self.capacity() - self.count;
        if n > available {
            return Err(StorageError::CapacityExceeded {
                needed: n,
                available,
            });
        }
        Ok(())
    }
}

impl<T: Clone + PartialEq, S: SlotStore<T>> BoundedList<T, S> {
    /// First index of `value` within the logical window, if present.
    pub fn index_of(&self, value: &T) -> Option<usize> {
        (0..self.count).find(|&i| self.store.load(i) == *value)
    }

    pub fn contains(&self, value: &T) -> bool {
        self.index_of(value).is_some()
    }

    /// Remove the first occurrence of `value`. Returns whether it was found.
    pub fn remove(&mut self, value: &T) -> Result<bool> {
        match self.index_of(value) {
            Some(index) => {
                self.remove_range(index, 1)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove the first occurrence of each value in `values`.
    ///
    /// Matched indices are removed in strictly descending order so earlier
    /// indices stay valid throughout the batch.
    pub fn remove_all(&mut self, values: &[T]) -> Result<usize> {
        let mut indices: Vec<usize> = Vec::new();
        for value in values {
            let found = (0..self.count)
                .find(|&i| !indices.contains(&i) && self.store.load(i) == *value);
            if let Some(index) = found {
                indices.push(index);
            }
        }
        indices.sort_unstable_by(|a, b| b.cmp(a));
        let removed = indices.len();
        for index in indices {
            self.remove_range(index, 1)?;
        }
        Ok(removed)
    }
}
