use log::trace;

use crate::{
    math::{
        column_matrix::{ColumnMatrix, VariableColumn},
        sparse_indexed_vector::{SparseIndexedVector, TINY_ELEMENT},
    },
    optimisation_algorithms::dual_simplex_factorization::{
        EtaFile, Factorization, FactorizationError,
    },
};

/// Below this magnitude (relative to the largest element of the basis) a column has no pivot.
const SINGULAR_TOLERANCE: f64 = 1.0e-11;

/// Relative disagreement allowed between the updated column and the caller's pivot.
const REPLACE_TOLERANCE: f64 = 1.0e-6;

/// Dense LU factors of the basis with threshold partial pivoting, followed by a product-form
/// eta file for the column replacements made since.
///
/// `P B = L U`, where step `k` of the elimination pivoted on constraint row `row_of_step[k]`.
#[derive(Clone, Debug)]
pub struct LuFactorization {
    number_rows: usize,
    /// Row-major, `L` strictly below the diagonal (unit diagonal implied), `U` on and above.
    lu: Vec<f64>,
    row_of_step: Vec<usize>,
    etas: EtaFile,
    pivot_tolerance: f64,
    lu_elements: usize,
    work: Vec<f64>,
}

impl LuFactorization {
    pub fn new(pivot_tolerance: f64) -> Self {
        Self {
            number_rows: 0,
            lu: vec![],
            row_of_step: vec![],
            etas: EtaFile::new(),
            pivot_tolerance,
            lu_elements: 0,
            work: vec![],
        }
    }

    #[inline]
    fn at(&self, row: usize, column: usize) -> f64 {
        self.lu[row * self.number_rows + column]
    }

    fn solve_dense(&mut self, values: &mut [f64]) {
        let n = self.number_rows;
        self.work.resize(n, 0.0);
        for k in 0..n {
            self.work[k] = values[self.row_of_step[k]];
        }

        // L y = P b
        for k in 0..n {
            let mut sum = self.work[k];
            for i in 0..k {
                sum -= self.at(k, i) * self.work[i];
            }
            self.work[k] = sum;
        }

        // U x = y
        for k in (0..n).rev() {
            let mut sum = self.work[k];
            for j in k + 1..n {
                sum -= self.at(k, j) * self.work[j];
            }
            self.work[k] = sum / self.at(k, k);
        }

        values[..n].copy_from_slice(&self.work[..n]);
        self.etas.apply(values);
    }

    fn solve_transpose_dense(&mut self, values: &mut [f64]) {
        let n = self.number_rows;
        self.etas.apply_transpose(values);
        self.work.resize(n, 0.0);

        // Uᵀ z = c
        for k in 0..n {
            let mut sum = values[k];
            for i in 0..k {
                sum -= self.at(i, k) * self.work[i];
            }
            self.work[k] = sum / self.at(k, k);
        }

        // Lᵀ w = z
        for k in (0..n).rev() {
            let mut sum = self.work[k];
            for i in k + 1..n {
                sum -= self.at(i, k) * self.work[i];
            }
            self.work[k] = sum;
        }

        // y = Pᵀ w
        for k in 0..n {
            values[self.row_of_step[k]] = self.work[k];
        }
    }
}

impl Factorization for LuFactorization {
    fn factorize(
        &mut self,
        matrix: &ColumnMatrix,
        pivot_variable: &[usize],
    ) -> Result<(), FactorizationError> {
        let n = matrix.number_rows();
        debug_assert_eq!(n, pivot_variable.len());
        self.number_rows = n;
        self.etas.clear();
        self.lu.clear();
        self.lu.resize(n * n, 0.0);
        self.row_of_step = (0..n).collect();

        let mut largest = 0.0f64;
        for (position, &variable) in pivot_variable.iter().enumerate() {
            match matrix.variable_column(variable) {
                VariableColumn::Structural { rows, data } => {
                    for (&row, &value) in rows.iter().zip(data) {
                        self.lu[row * n + position] = value;
                        largest = largest.max(value.abs());
                    }
                }
                VariableColumn::Slack(row) => {
                    self.lu[row * n + position] = -1.0;
                    largest = largest.max(1.0);
                }
            }
        }
        let singular = SINGULAR_TOLERANCE * largest.max(1.0);

        for k in 0..n {
            // threshold pivoting: keep the current row if it is within tolerance of the best
            let mut best_row = k;
            let mut best_value = 0.0f64;
            for i in k..n {
                let value = self.lu[i * n + k].abs();
                if value > best_value {
                    best_value = value;
                    best_row = i;
                }
            }
            if best_value <= singular {
                // an unpivoted row whose row variable is not basic can take the position
                let number_columns = matrix.number_columns();
                let row = self.row_of_step[k..]
                    .iter()
                    .copied()
                    .find(|&row| !pivot_variable.contains(&(number_columns + row)))
                    .unwrap_or(self.row_of_step[k]);
                return Err(FactorizationError::Singular { position: k, row });
            }
            if self.lu[k * n + k].abs() >= self.pivot_tolerance * best_value {
                best_row = k;
            }
            if best_row != k {
                for j in 0..n {
                    self.lu.swap(k * n + j, best_row * n + j);
                }
                self.row_of_step.swap(k, best_row);
            }

            let pivot = self.lu[k * n + k];
            for i in k + 1..n {
                let multiplier = self.lu[i * n + k] / pivot;
                if multiplier == 0.0 {
                    continue;
                }
                self.lu[i * n + k] = multiplier;
                for j in k + 1..n {
                    self.lu[i * n + j] -= multiplier * self.lu[k * n + j];
                }
            }
        }

        self.lu_elements = self.lu.iter().filter(|v| v.abs() > TINY_ELEMENT).count();
        trace!(
            "factorized basis of {} rows, {} elements",
            n, self.lu_elements
        );
        Ok(())
    }

    fn number_rows(&self) -> usize {
        self.number_rows
    }

    fn update_column(&mut self, column: &mut SparseIndexedVector) {
        self.solve_dense(column.dense_mut());
        column.repack(TINY_ELEMENT);
    }

    fn update_column_transpose(&mut self, row: &mut SparseIndexedVector) {
        self.solve_transpose_dense(row.dense_mut());
        row.repack(TINY_ELEMENT);
    }

    fn accepts_replacement(
        &self,
        pivot_row: usize,
        updated_column: &SparseIndexedVector,
        pivot: f64,
    ) -> bool {
        let column_pivot = updated_column.get(pivot_row);
        column_pivot.abs() >= SINGULAR_TOLERANCE
            && (column_pivot - pivot).abs() <= REPLACE_TOLERANCE * (1.0 + column_pivot.abs())
    }

    fn replace_column(
        &mut self,
        pivot_row: usize,
        updated_column: &SparseIndexedVector,
        pivot: f64,
    ) -> Result<(), FactorizationError> {
        if !self.accepts_replacement(pivot_row, updated_column, pivot) {
            return Err(FactorizationError::ReplaceRejected { pivot_row, pivot });
        }
        self.etas.push(pivot_row, updated_column);
        Ok(())
    }

    fn pivots_since_factorization(&self) -> usize {
        self.etas.len()
    }

    fn pivot_tolerance(&self) -> f64 {
        self.pivot_tolerance
    }

    fn set_pivot_tolerance(&mut self, tolerance: f64) {
        self.pivot_tolerance = tolerance.clamp(1.0e-4, 1.0);
    }

    fn number_elements(&self) -> usize {
        self.lu_elements + self.etas.nnz()
    }
}
