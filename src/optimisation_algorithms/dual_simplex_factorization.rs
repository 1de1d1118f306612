use std::fmt::Debug;

use crate::math::{column_matrix::ColumnMatrix, sparse_indexed_vector::SparseIndexedVector};

/// Access to the inverse of the basis matrix `B` (columns of `[A | -I]` selected by the basis
/// positions).
///
/// "Column" solves (`update_column`) map a vector indexed by constraint row to one indexed by
/// basis position; "transpose" solves go the other way. After `replace_column` the object
/// represents the basis with one column exchanged, until the next `factorize`.
pub trait Factorization: Debug {
    /// Factorizes the basis given by `pivot_variable` (basis position -> variable).
    fn factorize(
        &mut self,
        matrix: &ColumnMatrix,
        pivot_variable: &[usize],
    ) -> Result<(), FactorizationError>;

    fn number_rows(&self) -> usize;

    /// `column ← B⁻¹ column`
    fn update_column(&mut self, column: &mut SparseIndexedVector);

    /// `row ← B⁻ᵀ row`
    fn update_column_transpose(&mut self, row: &mut SparseIndexedVector);

    /// Two column solves sharing one pass over the factors where the implementation can.
    fn update_two_columns_ft(
        &mut self,
        first: &mut SparseIndexedVector,
        second: &mut SparseIndexedVector,
    ) {
        self.update_column(first);
        self.update_column(second);
    }

    /// Whether `replace_column` would take this update. The driver asks before it changes costs
    /// or bounds for the pivot, so a rejection leaves the iterate untouched.
    fn accepts_replacement(
        &self,
        pivot_row: usize,
        updated_column: &SparseIndexedVector,
        pivot: f64,
    ) -> bool;

    /// Replaces the basis column at `pivot_row` by the column whose solve is `updated_column`.
    /// `pivot` is the row-wise computed pivot element, used to reject unstable updates.
    fn replace_column(
        &mut self,
        pivot_row: usize,
        updated_column: &SparseIndexedVector,
        pivot: f64,
    ) -> Result<(), FactorizationError>;

    fn pivots_since_factorization(&self) -> usize;

    fn pivot_tolerance(&self) -> f64;

    fn set_pivot_tolerance(&mut self, tolerance: f64);

    /// Nonzeros held by the factors and the update file.
    fn number_elements(&self) -> usize;
}

#[derive(Clone, Debug, PartialEq)]
pub enum FactorizationError {
    /// No acceptable pivot for basis position `position`; `row` is a constraint row that is not
    /// covered by the factorized part, so the row variable of `row` can take the position.
    Singular { position: usize, row: usize },
    /// The update would make the representation unstable.
    ReplaceRejected { pivot_row: usize, pivot: f64 },
}

impl std::fmt::Display for FactorizationError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FactorizationError::Singular { position, row } => write!(
                f,
                "basis matrix is singular at position {} (uncovered row {})",
                position, row
            ),
            FactorizationError::ReplaceRejected { pivot_row, pivot } => write!(
                f,
                "column replacement at row {} rejected (pivot {:e})",
                pivot_row, pivot
            ),
        }
    }
}

impl std::error::Error for FactorizationError {}

/// Product-form update file (Vanderbei p.139): one eta column per replaced basis column.
#[derive(Clone, Debug, Default)]
pub(crate) struct EtaFile {
    leaving_rows: Vec<usize>,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

impl EtaFile {
    pub(crate) fn new() -> EtaFile {
        EtaFile {
            leaving_rows: vec![],
            indptr: vec![0],
            indices: vec![],
            data: vec![],
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.leaving_rows.len()
    }

    pub(crate) fn nnz(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn clear(&mut self) {
        self.leaving_rows.clear();
        self.indptr.clear();
        self.indptr.push(0);
        self.indices.clear();
        self.data.clear();
    }

    fn col_iter(&self, idx: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.indptr[idx]..self.indptr[idx + 1];
        self.indices[range.clone()]
            .iter()
            .copied()
            .zip(self.data[range].iter().copied())
    }

    /// Records the exchange of the column at `leaving_row` for one with solve `column`.
    pub(crate) fn push(&mut self, leaving_row: usize, column: &SparseIndexedVector) {
        let pivot = column.get(leaving_row);
        self.leaving_rows.push(leaving_row);
        for (row, coefficient) in column.iter() {
            let value = if row == leaving_row {
                1.0 - 1.0 / pivot
            } else {
                coefficient / pivot
            };
            if value != 0.0 {
                self.indices.push(row);
                self.data.push(value);
            }
        }
        self.indptr.push(self.indices.len());
    }

    /// Applies the etas in order to a vector indexed by basis position.
    pub(crate) fn apply(&self, values: &mut [f64]) {
        for idx in 0..self.len() {
            let leaving_row = self.leaving_rows[idx];
            let coefficient = values[leaving_row];
            if coefficient == 0.0 {
                continue;
            }
            for (row, value) in self.col_iter(idx) {
                values[row] -= coefficient * value;
            }
        }
    }

    /// Applies the transposed etas in reverse order.
    pub(crate) fn apply_transpose(&self, values: &mut [f64]) {
        for idx in (0..self.len()).rev() {
            let coefficient: f64 = self
                .col_iter(idx)
                .map(|(row, value)| value * values[row])
                .sum();
            values[self.leaving_rows[idx]] -= coefficient;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eta_inverts_column_exchange() {
        // B = I, replace column 1 by d = (2, 4, 0): B' = E with E e_1 = d
        let mut etas = EtaFile::new();
        let column = SparseIndexedVector::from_dense(&[2.0, 4.0, 0.0]);
        etas.push(1, &column);
        assert_eq!(etas.len(), 1);

        // E x = b with b = (2, 4, 1) gives x = e_1 + e_2
        let mut values = [2.0, 4.0, 1.0];
        etas.apply(&mut values);
        assert!((values[0] - 0.0).abs() < 1e-12);
        assert!((values[1] - 1.0).abs() < 1e-12);
        assert!((values[2] - 1.0).abs() < 1e-12);

        // Eᵀ y = c with c = (1, 10, 0) gives y = (1, 2, 0)
        let mut values = [1.0, 10.0, 0.0];
        etas.apply_transpose(&mut values);
        assert!((values[0] - 1.0).abs() < 1e-12);
        assert!((values[1] - 2.0).abs() < 1e-12);
        assert!((values[2] - 0.0).abs() < 1e-12);
    }

    #[test]
    fn display_errors() {
        let error = FactorizationError::Singular {
            position: 2,
            row: 5,
        };
        assert!(error.to_string().contains("position 2"));
    }
}
