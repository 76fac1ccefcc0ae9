//! Matrix operations: batches of transfer matrices with per-stand selectors.
//!
//! Per-stand matrices are never allocated individually. An operation interns
//! one matrix per parameter bucket and selects the bucket for each stand
//! through an integer index vector, so a landscape of a million stands with
//! forty distinct disturbance regimes stores forty matrices.

use crate::errors::{CoreError, CoreResult};
use crate::matrix::{CsrMatrix, MatrixBase, Triplet};

/// Per-matrix values for one coordinate of a repeating-coordinate batch.
#[derive(Debug, Clone)]
pub enum CoordValues {
    /// The same coefficient in every matrix of the batch.
    Scalar(f64),
    /// One coefficient per matrix.
    PerMatrix(Vec<f64>),
}

/// One shared coordinate of a repeating-coordinate batch.
#[derive(Debug, Clone)]
pub struct CoordColumn {
    pub row: usize,
    pub col: usize,
    pub values: CoordValues,
}

impl CoordColumn {
    pub fn scalar(row: usize, col: usize, value: f64) -> Self {
        Self {
            row,
            col,
            values: CoordValues::Scalar(value),
        }
    }

    pub fn per_matrix(row: usize, col: usize, values: Vec<f64>) -> Self {
        Self {
            row,
            col,
            values: CoordValues::PerMatrix(values),
        }
    }
}

/// A batch of transfer matrices plus the per-stand matrix selector and the
/// process id used for flux attribution.
#[derive(Debug, Clone)]
pub struct Operation {
    matrices: Vec<CsrMatrix>,
    matrix_index: Vec<u32>,
    process_id: u16,
}

impl Operation {
    /// Build an operation from per-matrix triplet lists.
    ///
    /// This is the natural format when each matrix has its own sparsity
    /// pattern, e.g. disturbance matrices looked up from parameter tables.
    pub fn from_matrix_list(
        order: usize,
        base: MatrixBase,
        matrices: &[Vec<Triplet>],
        matrix_index: Vec<u32>,
        process_id: u16,
        input_row: Option<usize>,
    ) -> CoreResult<Self> {
        if matrices.is_empty() {
            return Err(CoreError::Configuration(
                "operation requires at least one matrix".to_string(),
            ));
        }
        let matrices = matrices
            .iter()
            .map(|t| CsrMatrix::from_triplets(order, base, t, input_row))
            .collect::<CoreResult<Vec<_>>>()?;
        Self::assemble(matrices, matrix_index, process_id)
    }

    /// Build an operation from one shared coordinate list with per-matrix
    /// values.
    ///
    /// This is the hot path for operations whose sparsity pattern is fixed
    /// but whose coefficients vary per parameter bucket (growth, turnover,
    /// decay). The batch size is the longest `PerMatrix` column; `Scalar`
    /// columns broadcast.
    pub fn from_coordinates(
        order: usize,
        base: MatrixBase,
        columns: &[CoordColumn],
        matrix_index: Vec<u32>,
        process_id: u16,
        input_row: Option<usize>,
    ) -> CoreResult<Self> {
        let mut n_matrices = 1;
        for column in columns {
            if let CoordValues::PerMatrix(values) = &column.values {
                if values.is_empty() {
                    return Err(CoreError::Dimension(format!(
                        "coordinate ({}, {}) has an empty value column",
                        column.row, column.col
                    )));
                }
                if n_matrices != 1 && values.len() != n_matrices {
                    return Err(CoreError::Dimension(format!(
                        "coordinate ({}, {}) has {} values, expected {}",
                        column.row,
                        column.col,
                        values.len(),
                        n_matrices
                    )));
                }
                n_matrices = n_matrices.max(values.len());
            }
        }
        let mut matrices = Vec::with_capacity(n_matrices);
        let mut triplets = Vec::with_capacity(columns.len());
        for m in 0..n_matrices {
            triplets.clear();
            for column in columns {
                let value = match &column.values {
                    CoordValues::Scalar(v) => *v,
                    CoordValues::PerMatrix(values) => values[m],
                };
                triplets.push(Triplet::new(column.row, column.col, value));
            }
            matrices.push(CsrMatrix::from_triplets(order, base, &triplets, input_row)?);
        }
        Self::assemble(matrices, matrix_index, process_id)
    }

    fn assemble(
        matrices: Vec<CsrMatrix>,
        matrix_index: Vec<u32>,
        process_id: u16,
    ) -> CoreResult<Self> {
        let mut op = Self {
            matrices,
            matrix_index: Vec::new(),
            process_id,
        };
        op.update_index(matrix_index)?;
        Ok(op)
    }

    /// Replace the per-stand matrix selector without rebuilding matrices.
    pub fn update_index(&mut self, matrix_index: Vec<u32>) -> CoreResult<()> {
        let n_matrices = self.matrices.len() as u32;
        if let Some(&bad) = matrix_index.iter().find(|&&i| i >= n_matrices) {
            return Err(CoreError::Dimension(format!(
                "matrix index {} out of range for a batch of {}",
                bad, n_matrices
            )));
        }
        self.matrix_index = matrix_index;
        Ok(())
    }

    /// Number of stands this operation addresses.
    pub fn len(&self) -> usize {
        self.matrix_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrix_index.is_empty()
    }

    pub fn n_matrices(&self) -> usize {
        self.matrices.len()
    }

    pub fn process_id(&self) -> u16 {
        self.process_id
    }

    pub fn order(&self) -> usize {
        self.matrices[0].order()
    }

    /// The matrix selected for a stand.
    #[inline]
    pub fn matrix_for(&self, stand: usize) -> &CsrMatrix {
        &self.matrices[self.matrix_index[stand] as usize]
    }
}
