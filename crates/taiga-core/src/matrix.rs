//! Sparse transfer matrices.
//!
//! A transfer matrix is a discrete-time linear operator on a pool vector:
//! `pools' = pools · M`. Matrices are assembled as coordinate triplets and
//! finalised once into a compressed row form for the compute kernel.
//! Diagonal entries are the retained fraction of the row's pool; a row
//! without an explicit diagonal keeps its base value (1.0 under
//! [`MatrixBase::Identity`], 0.0 under [`MatrixBase::Zero`]).

use crate::errors::{CoreError, CoreResult};

/// One coordinate entry of a matrix under construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triplet {
    pub row: usize,
    pub col: usize,
    pub value: f64,
}

impl Triplet {
    pub fn new(row: usize, col: usize, value: f64) -> Self {
        Self { row, col, value }
    }
}

/// Base state of a matrix before triplets are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixBase {
    /// All cells zero; diagonals must be supplied explicitly.
    Zero,
    /// Identity: omitted diagonals default to 1.0.
    Identity,
}

/// Off-diagonal outflow from any row may not exceed this. Slack covers
/// rounding in proportions that were derived from measured rates.
const ROW_SUM_SLACK: f64 = 1e-9;

/// A finalised transfer matrix in compressed sparse row form.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    order: usize,
    indptr: Vec<u32>,
    cols: Vec<u32>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Finalise a triplet list into CSR form, validating the coefficient
    /// domain.
    ///
    /// `input_row` names the row of the constant-1.0 Input pool, which is
    /// exempt from the outflow limit: growth operations route absolute mass
    /// increments out of it rather than proportions.
    ///
    /// Errors (all fatal, no clamping):
    /// * coordinates outside `0..order`
    /// * the same coordinate assigned twice
    /// * non-finite or negative coefficients
    /// * off-diagonal outflow from a non-Input row summing above 1.0
    pub fn from_triplets(
        order: usize,
        base: MatrixBase,
        triplets: &[Triplet],
        input_row: Option<usize>,
    ) -> CoreResult<Self> {
        let mut entries: Vec<(u32, u32, f64)> = Vec::with_capacity(triplets.len() + order);
        let mut diagonal_set = vec![false; order];
        for t in triplets {
            if t.row >= order || t.col >= order {
                return Err(CoreError::Dimension(format!(
                    "coordinate ({}, {}) outside matrix of order {}",
                    t.row, t.col, order
                )));
            }
            if !t.value.is_finite() {
                return Err(CoreError::Domain(format!(
                    "non-finite coefficient at ({}, {})",
                    t.row, t.col
                )));
            }
            if t.value < 0.0 {
                return Err(CoreError::Domain(format!(
                    "negative coefficient {} at ({}, {})",
                    t.value, t.row, t.col
                )));
            }
            if t.row == t.col {
                diagonal_set[t.row] = true;
            }
            entries.push((t.row as u32, t.col as u32, t.value));
        }
        if base == MatrixBase::Identity {
            for (row, set) in diagonal_set.iter().enumerate() {
                if !set {
                    entries.push((row as u32, row as u32, 1.0));
                }
            }
        }
        entries.sort_unstable_by_key(|&(r, c, _)| (r, c));
        for pair in entries.windows(2) {
            if pair[0].0 == pair[1].0 && pair[0].1 == pair[1].1 {
                return Err(CoreError::Domain(format!(
                    "duplicate coordinate ({}, {})",
                    pair[0].0, pair[0].1
                )));
            }
        }

        let mut indptr = vec![0u32; order + 1];
        let mut cols = Vec::with_capacity(entries.len());
        let mut values = Vec::with_capacity(entries.len());
        for &(r, c, v) in &entries {
            indptr[r as usize + 1] += 1;
            cols.push(c);
            values.push(v);
        }
        for i in 0..order {
            indptr[i + 1] += indptr[i];
        }

        let matrix = Self {
            order,
            indptr,
            cols,
            values,
        };
        matrix.check_row_sums(input_row)?;
        Ok(matrix)
    }

    /// The identity matrix of the given order (an empty row set: diagonals
    /// are implied and nothing flows).
    pub fn identity(order: usize) -> Self {
        Self::from_triplets(order, MatrixBase::Identity, &[], None)
            .expect("identity construction cannot fail")
    }

    fn check_row_sums(&self, input_row: Option<usize>) -> CoreResult<()> {
        for row in 0..self.order {
            if Some(row) == input_row {
                continue;
            }
            let outflow: f64 = self
                .row(row)
                .filter(|&(col, _)| col != row)
                .map(|(_, v)| v)
                .sum();
            if outflow > 1.0 + ROW_SUM_SLACK {
                return Err(CoreError::Domain(format!(
                    "row {} routes {} of its pool out (limit 1.0)",
                    row, outflow
                )));
            }
        }
        Ok(())
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Iterate the stored `(col, value)` entries of one row.
    #[inline]
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let start = self.indptr[row] as usize;
        let end = self.indptr[row + 1] as usize;
        self.cols[start..end]
            .iter()
            .zip(&self.values[start..end])
            .map(|(&c, &v)| (c as usize, v))
    }

    /// Value at `(row, col)`, accounting for the implied base.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.row(row)
            .find(|&(c, _)| c == col)
            .map(|(_, v)| v)
            .unwrap_or(0.0)
    }

    /// Apply the transform to a dense pool vector: `out = pools · M`.
    ///
    /// `out` must be zeroed by the caller. Rows without stored entries
    /// contribute nothing, which is why construction materialises implied
    /// diagonals.
    #[inline]
    pub fn apply(&self, pools: &[f64], out: &mut [f64]) {
        debug_assert_eq!(pools.len(), self.order);
        debug_assert_eq!(out.len(), self.order);
        for row in 0..self.order {
            let p = pools[row];
            if p == 0.0 {
                continue;
            }
            let start = self.indptr[row] as usize;
            let end = self.indptr[row + 1] as usize;
            for k in start..end {
                out[self.cols[k] as usize] += p * self.values[k];
            }
        }
    }
}
