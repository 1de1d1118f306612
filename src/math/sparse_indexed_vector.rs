use itertools::Itertools;

/// Values below this magnitude are treated as structural zeros when packing.
pub const TINY_ELEMENT: f64 = 1.0e-14;

/// A dense value buffer paired with the list of positions that may be nonzero.
///
/// Every listed position may hold a value (possibly zero after cancellation); every position
/// that is not listed holds exactly zero. The buffer keeps its allocation across `clear` calls,
/// so the same vector can serve many kernel calls without reallocating.
#[derive(Clone, Debug)]
pub struct SparseIndexedVector {
    pub(crate) values: Vec<f64>,
    pub(crate) is_nonzero: Vec<bool>,
    pub(crate) nonzero: Vec<usize>,
}

impl SparseIndexedVector {
    pub fn empty(n: usize) -> SparseIndexedVector {
        SparseIndexedVector {
            values: vec![0.0; n],
            is_nonzero: vec![false; n],
            nonzero: vec![],
        }
    }

    pub fn from_dense(values: &[f64]) -> SparseIndexedVector {
        let mut result = Self::empty(values.len());
        for (i, &value) in values.iter().enumerate() {
            if value != 0.0 {
                result.set_value(i, value);
            }
        }
        result
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nonzero.is_empty()
    }

    /// Number of listed positions.
    pub fn number_elements(&self) -> usize {
        self.nonzero.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.nonzero.iter().map(move |&i| (i, self.values[i]))
    }

    pub fn indices(&self) -> &[usize] {
        &self.nonzero
    }

    /// The dense view. Unlisted positions are zero.
    pub fn dense(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub fn get(&self, i: usize) -> f64 {
        self.values[i]
    }

    #[inline]
    pub fn get_mut(&mut self, i: usize) -> &mut f64 {
        if !std::mem::replace(&mut self.is_nonzero[i], true) {
            self.nonzero.push(i);
        }
        &mut self.values[i]
    }

    #[inline]
    pub fn set_value(&mut self, i: usize, value: f64) {
        *self.get_mut(i) = value;
    }

    #[inline]
    pub fn add(&mut self, i: usize, value: f64) {
        *self.get_mut(i) += value;
    }

    pub fn sq_norm(&self) -> f64 {
        self.nonzero
            .iter()
            .map(|&i| self.values[i] * self.values[i])
            .sum()
    }

    pub fn infinity_norm(&self) -> f64 {
        self.nonzero
            .iter()
            .map(|&i| self.values[i].abs())
            .fold(0.0, f64::max)
    }

    pub fn clear(&mut self) {
        for &i in &self.nonzero {
            self.values[i] = 0.0;
            self.is_nonzero[i] = false;
        }
        self.nonzero.clear();
    }

    pub fn clear_and_resize(&mut self, n: usize) {
        self.clear();
        self.values.resize(n, 0.0);
        self.is_nonzero.resize(n, false);
    }

    pub fn set<T>(&mut self, rhs: T)
    where
        T: IntoIterator<Item = (usize, f64)>,
    {
        self.clear();
        for (i, value) in rhs {
            self.add(i, value);
        }
    }

    pub fn copy_from(&mut self, other: &SparseIndexedVector) {
        self.clear_and_resize(other.len());
        self.set(other.iter());
    }

    /// Drops listed positions whose magnitude is below `tolerance`, zeroing their values.
    pub fn compact(&mut self, tolerance: f64) {
        let values = &mut self.values;
        let is_nonzero = &mut self.is_nonzero;
        self.nonzero.retain(|&i| {
            if values[i].abs() < tolerance {
                values[i] = 0.0;
                is_nonzero[i] = false;
                false
            } else {
                true
            }
        });
    }

    /// Rebuilds the index list from the dense values, after a kernel wrote to the dense buffer
    /// directly through `dense_mut`.
    pub fn repack(&mut self, tolerance: f64) {
        self.nonzero.clear();
        for (i, value) in self.values.iter_mut().enumerate() {
            if value.abs() < tolerance {
                *value = 0.0;
                self.is_nonzero[i] = false;
            } else {
                self.is_nonzero[i] = true;
                self.nonzero.push(i);
            }
        }
    }

    /// Mutable dense view. Callers must `repack` afterwards.
    pub(crate) fn dense_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Sorts the index list so iteration order no longer depends on insertion order.
    pub fn sort_indices(&mut self) {
        self.nonzero.sort_unstable();
    }

    /// Whether the listed positions and the unlisted zeros are consistent.
    pub fn check_invariant(&self) -> bool {
        let listed_ok = self.nonzero.iter().all(|&i| self.is_nonzero[i]);
        let unique = self.nonzero.iter().all_unique();
        let unlisted_zero = self
            .values
            .iter()
            .zip(&self.is_nonzero)
            .all(|(&value, &listed)| listed || value == 0.0);
        listed_ok && unique && unlisted_zero
    }
}

impl Default for SparseIndexedVector {
    fn default() -> Self {
        Self::empty(0)
    }
}
