use anyhow::{Result, anyhow};
use sprs::CsMat;

use crate::math::sparse_indexed_vector::SparseIndexedVector;

/// Unordered sparse matrix with elements stored by columns.
///
/// The matrix holds the structural columns of `[A | -I]`; the row-activity block `-I` is
/// implicit. A row-major copy is kept next to it for computing rows of the simplex tableau.
#[derive(Clone, Debug)]
pub struct ColumnMatrix {
    number_rows: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,

    row_indptr: Vec<usize>,
    row_indices: Vec<usize>,
    row_data: Vec<f64>,
}

impl ColumnMatrix {
    pub fn new(number_rows: usize) -> ColumnMatrix {
        ColumnMatrix {
            number_rows,
            indptr: vec![0],
            indices: vec![],
            data: vec![],
            row_indptr: vec![0; number_rows + 1],
            row_indices: vec![],
            row_data: vec![],
        }
    }

    /// Copies a `sprs` matrix of shape rows x columns. Explicit zeros are dropped.
    pub fn from_csmat(matrix: &CsMat<f64>) -> Result<ColumnMatrix> {
        let csc = if matrix.is_csc() {
            matrix.clone()
        } else {
            matrix.to_csc()
        };
        let mut result = ColumnMatrix::new(csc.rows());
        for column in csc.outer_iterator() {
            for (row, &value) in column.iter() {
                if !value.is_finite() {
                    return Err(anyhow!(
                        "matrix element in row {} is not finite ({})",
                        row,
                        value
                    ));
                }
                if value != 0.0 {
                    result.push(row, value);
                }
            }
            result.seal_column();
        }
        result.build_row_copy();
        Ok(result)
    }

    pub fn number_rows(&self) -> usize {
        self.number_rows
    }

    pub fn number_columns(&self) -> usize {
        self.indptr.len() - 1
    }

    pub fn number_total(&self) -> usize {
        self.number_rows + self.number_columns()
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn push(&mut self, row: usize, value: f64) {
        self.indices.push(row);
        self.data.push(value);
    }

    pub(crate) fn seal_column(&mut self) {
        self.indptr.push(self.indices.len())
    }

    pub fn col_rows(&self, column: usize) -> &[usize] {
        &self.indices[self.indptr[column]..self.indptr[column + 1]]
    }

    pub fn col_data(&self, column: usize) -> &[f64] {
        &self.data[self.indptr[column]..self.indptr[column + 1]]
    }

    pub fn col_iter(&self, column: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.col_rows(column)
            .iter()
            .copied()
            .zip(self.col_data(column).iter().copied())
    }

    pub fn row_iter(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.row_indptr[row]..self.row_indptr[row + 1];
        self.row_indices[range.clone()]
            .iter()
            .copied()
            .zip(self.row_data[range].iter().copied())
    }

    /// Column of any variable in the unified index space: structural columns first, then one
    /// `-e_i` column per row.
    pub fn variable_column(&self, variable: usize) -> VariableColumn<'_> {
        let number_columns = self.number_columns();
        if variable < number_columns {
            VariableColumn::Structural {
                rows: self.col_rows(variable),
                data: self.col_data(variable),
            }
        } else {
            VariableColumn::Slack(variable - number_columns)
        }
    }

    /// `target += multiplier * column(variable)`
    pub fn add_variable_column(
        &self,
        target: &mut SparseIndexedVector,
        variable: usize,
        multiplier: f64,
    ) {
        match self.variable_column(variable) {
            VariableColumn::Structural { rows, data } => {
                for (&row, &value) in rows.iter().zip(data) {
                    target.add(row, multiplier * value);
                }
            }
            VariableColumn::Slack(row) => target.add(row, -multiplier),
        }
    }

    /// `column(variable) · y` for a dense row vector `y`.
    pub fn dot_variable_column(&self, variable: usize, y: &[f64]) -> f64 {
        match self.variable_column(variable) {
            VariableColumn::Structural { rows, data } => rows
                .iter()
                .zip(data)
                .map(|(&row, &value)| value * y[row])
                .sum(),
            VariableColumn::Slack(row) => -y[row],
        }
    }

    /// Computes `rhoᵀ [A | -I]` into `target` (length `number_total`), walking the row-major copy
    /// over the nonzeros of `rho`.
    pub fn transpose_times(&self, rho: &SparseIndexedVector, target: &mut SparseIndexedVector) {
        target.clear_and_resize(self.number_total());
        let number_columns = self.number_columns();
        for (row, multiplier) in rho.iter() {
            if multiplier == 0.0 {
                continue;
            }
            for (column, value) in self.row_iter(row) {
                target.add(column, multiplier * value);
            }
            target.add(number_columns + row, -multiplier);
        }
    }

    fn build_row_copy(&mut self) {
        // calculate row counts and store them in the indptr array.
        self.row_indptr.clear();
        self.row_indptr.resize(self.number_rows + 1, 0);
        for &row in &self.indices {
            self.row_indptr[row] += 1;
        }

        // calculate cumulative counts so that indptr elements point to
        // the *ends* of each resulting row.
        for row in 1..self.row_indptr.len() {
            self.row_indptr[row] += self.row_indptr[row - 1];
        }

        // place the elements, walking columns backwards keeps each row sorted by column
        self.row_indices.clear();
        self.row_indices.resize(self.nnz(), 0);
        self.row_data.clear();
        self.row_data.resize(self.nnz(), 0.0);
        for column in (0..self.number_columns()).rev() {
            let range = self.indptr[column]..self.indptr[column + 1];
            for k in range.rev() {
                let row = self.indices[k];
                self.row_indptr[row] -= 1;
                self.row_indices[self.row_indptr[row]] = column;
                self.row_data[self.row_indptr[row]] = self.data[k];
            }
        }
    }
}

/// A column of `[A | -I]`.
#[derive(Clone, Copy, Debug)]
pub enum VariableColumn<'a> {
    Structural { rows: &'a [usize], data: &'a [f64] },
    Slack(usize),
}
