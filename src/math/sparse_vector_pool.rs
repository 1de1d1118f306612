use std::{
    cell::RefCell,
    fmt::Debug,
    ops::{Deref, DerefMut},
};

use crate::math::sparse_indexed_vector::SparseIndexedVector;

/// A pool of scratch vectors addressed by small integer handles.
///
/// A vector is checked out for the duration of one kernel call through a [`ScratchVector`]
/// guard. Dropping the guard clears the vector and puts it back in its slot, so no buffer can
/// outlive the scope that acquired it and no two kernels can hold the same buffer.
pub struct SparseVectorPool {
    slots: RefCell<Vec<Option<SparseIndexedVector>>>,
}

impl SparseVectorPool {
    pub fn new() -> Self {
        Self {
            slots: RefCell::new(vec![]),
        }
    }

    pub fn with_capacity(number: usize, length: usize) -> Self {
        Self {
            slots: RefCell::new(
                (0..number)
                    .map(|_| Some(SparseIndexedVector::empty(length)))
                    .collect(),
            ),
        }
    }

    /// Takes a cleared vector of length `length` out of the pool.
    pub fn checkout(&self, length: usize) -> ScratchVector<'_> {
        let mut slots = self.slots.borrow_mut();
        let handle = match slots.iter().position(|slot| slot.is_some()) {
            Some(handle) => handle,
            None => {
                slots.push(Some(SparseIndexedVector::empty(length)));
                slots.len() - 1
            }
        };
        let mut vector = slots[handle]
            .take()
            .unwrap_or_else(|| SparseIndexedVector::empty(length));
        if vector.len() != length {
            vector.clear_and_resize(length);
        }
        ScratchVector {
            pool: self,
            handle,
            vector,
        }
    }

    /// Number of vectors currently checked out.
    pub fn number_checked_out(&self) -> usize {
        self.slots.borrow().iter().filter(|slot| slot.is_none()).count()
    }

    pub fn number_slots(&self) -> usize {
        self.slots.borrow().len()
    }

    fn give_back(&self, handle: usize, mut vector: SparseIndexedVector) {
        vector.clear();
        self.slots.borrow_mut()[handle] = Some(vector);
    }
}

impl Default for SparseVectorPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for SparseVectorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseVectorPool")
            .field("slots", &self.number_slots())
            .field("checked_out", &self.number_checked_out())
            .finish()
    }
}

/// Exclusive checkout of one pooled vector.
pub struct ScratchVector<'a> {
    pool: &'a SparseVectorPool,
    handle: usize,
    vector: SparseIndexedVector,
}

impl ScratchVector<'_> {
    pub fn handle(&self) -> usize {
        self.handle
    }
}

impl Deref for ScratchVector<'_> {
    type Target = SparseIndexedVector;

    fn deref(&self) -> &Self::Target {
        &self.vector
    }
}

impl DerefMut for ScratchVector<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.vector
    }
}

impl Drop for ScratchVector<'_> {
    fn drop(&mut self) {
        let vector = std::mem::take(&mut self.vector);
        self.pool.give_back(self.handle, vector);
    }
}

impl Debug for ScratchVector<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchVector")
            .field("handle", &self.handle)
            .field("vector", &self.vector)
            .finish()
    }
}
