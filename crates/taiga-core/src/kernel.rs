//! The batched pool/flux compute kernel.
//!
//! Applies an ordered list of [`Operation`]s to an N×P pool matrix, one row
//! per stand, optionally accumulating flux-indicator values. Op order is
//! semantically significant and sequential; stands are independent (no
//! stand reads another stand's row), so iteration over stands runs in
//! parallel. Because each stand's work is self-contained and applied in op
//! order, results are identical to the sequential evaluation bit for bit.

use crate::errors::{CoreError, CoreResult};
use crate::ops::Operation;
use crate::pools::FluxIndicator;
use ndarray::{Array2, Axis};
use ndarray::parallel::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

const NO_VIOLATION: usize = usize::MAX;

/// Record the lowest stand index whose row came out negative or
/// non-finite. Matrices are validated non-negative at construction, so a
/// violation means the caller fed bad pool values in.
fn check_row(row: &[f64], stand: usize, violation: &AtomicUsize) {
    for &value in row {
        if !value.is_finite() || value < 0.0 {
            violation.fetch_min(stand, Ordering::Relaxed);
            return;
        }
    }
}

fn violation_error(violation: AtomicUsize) -> CoreResult<()> {
    match violation.into_inner() {
        NO_VIOLATION => Ok(()),
        stand => Err(CoreError::Domain(format!(
            "stand {stand} has a negative or non-finite pool value after compute"
        ))),
    }
}

fn check_dimensions(
    ops: &[Operation],
    n_stands: usize,
    n_pools: usize,
    enabled: Option<&[bool]>,
) -> CoreResult<()> {
    for (k, op) in ops.iter().enumerate() {
        if op.len() != n_stands {
            return Err(CoreError::Dimension(format!(
                "op {} indexes {} stands, pools have {}",
                k,
                op.len(),
                n_stands
            )));
        }
        if op.order() != n_pools {
            return Err(CoreError::Dimension(format!(
                "op {} matrices are of order {}, pools have {} columns",
                k,
                op.order(),
                n_pools
            )));
        }
    }
    if let Some(enabled) = enabled {
        if enabled.len() != n_stands {
            return Err(CoreError::Dimension(format!(
                "enabled mask has {} entries, pools have {} rows",
                enabled.len(),
                n_stands
            )));
        }
    }
    Ok(())
}

/// Apply `ops` in order to every enabled stand: `pools[i] ← pools[i] · M`.
///
/// Stands with `enabled[i] == false` are untouched. An empty op list is a
/// legal no-op.
pub fn compute_pools(
    ops: &[Operation],
    pools: &mut Array2<f64>,
    enabled: Option<&[bool]>,
) -> CoreResult<()> {
    let (n_stands, n_pools) = pools.dim();
    check_dimensions(ops, n_stands, n_pools, enabled)?;

    let violation = AtomicUsize::new(NO_VIOLATION);
    pools
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut row)| {
            if let Some(enabled) = enabled {
                if !enabled[i] {
                    return;
                }
            }
            let mut scratch = vec![0.0; n_pools];
            let row = row
                .as_slice_mut()
                .expect("pool matrix rows are contiguous");
            for op in ops {
                let matrix = op.matrix_for(i);
                scratch.fill(0.0);
                matrix.apply(row, &mut scratch);
                row.copy_from_slice(&scratch);
            }
            check_row(row, i, &violation);
        });
    violation_error(violation)
}

/// As [`compute_pools`], but additionally accumulate flux-indicator values.
///
/// Before each stand × op transform, every indicator whose process id
/// matches the op receives the mass crossing from its source set to its
/// sink set: `flux[i, f] += Σ pools[i][src] · M[src, sink]` over the
/// off-diagonal stored cells. Retained (diagonal) mass is never counted.
pub fn compute_flux(
    ops: &[Operation],
    indicators: &[FluxIndicator],
    pools: &mut Array2<f64>,
    flux: &mut Array2<f64>,
    enabled: Option<&[bool]>,
) -> CoreResult<()> {
    let (n_stands, n_pools) = pools.dim();
    check_dimensions(ops, n_stands, n_pools, enabled)?;
    if flux.dim() != (n_stands, indicators.len()) {
        return Err(CoreError::Dimension(format!(
            "flux matrix is {:?}, expected ({}, {})",
            flux.dim(),
            n_stands,
            indicators.len()
        )));
    }

    // Indicators that can receive from each op, resolved once per call.
    let matching: Vec<Vec<usize>> = ops
        .iter()
        .map(|op| {
            indicators
                .iter()
                .enumerate()
                .filter(|(_, ind)| ind.process_id() == op.process_id())
                .map(|(f, _)| f)
                .collect()
        })
        .collect();

    let violation = AtomicUsize::new(NO_VIOLATION);
    ndarray::Zip::indexed(pools.rows_mut())
        .and(flux.rows_mut())
        .par_for_each(|i, mut pool_row, mut flux_row| {
            if let Some(enabled) = enabled {
                if !enabled[i] {
                    return;
                }
            }
            let mut scratch = vec![0.0; n_pools];
            let pool_row = pool_row
                .as_slice_mut()
                .expect("pool matrix rows are contiguous");
            for (op, matching) in ops.iter().zip(&matching) {
                let matrix = op.matrix_for(i);
                if !matching.is_empty() {
                    for src in 0..n_pools {
                        let p = pool_row[src];
                        if p == 0.0 {
                            continue;
                        }
                        for (sink, value) in matrix.row(src) {
                            if sink == src {
                                continue;
                            }
                            for &f in matching {
                                let ind = &indicators[f];
                                if ind.is_source(src) && ind.is_sink(sink) {
                                    flux_row[f] += p * value;
                                }
                            }
                        }
                    }
                }
                scratch.fill(0.0);
                matrix.apply(pool_row, &mut scratch);
                pool_row.copy_from_slice(&scratch);
            }
            check_row(pool_row, i, &violation);
        });
    violation_error(violation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{MatrixBase, Triplet};
    use crate::pools::{FluxIndicator, FluxIndicatorDefinition, Pools};
    use approx::assert_relative_eq;
    use ndarray::array;

    fn two_pool_transfer(n_stands: usize, fraction: f64, process_id: u16) -> Operation {
        Operation::from_matrix_list(
            3,
            MatrixBase::Identity,
            &[vec![
                Triplet::new(1, 1, 1.0 - fraction),
                Triplet::new(1, 2, fraction),
            ]],
            vec![0; n_stands],
            process_id,
            None,
        )
        .unwrap()
    }

    fn indicator(pools: &Pools, process_id: u16) -> FluxIndicator {
        FluxIndicator::resolve(
            &FluxIndicatorDefinition::new("AtoB", process_id, ["A"], ["B"]),
            pools,
        )
        .unwrap()
    }

    fn test_pools() -> Pools {
        Pools::from_names(["Input", "A", "B"]).unwrap()
    }

    #[test]
    fn pools_transform_in_place() {
        let op = two_pool_transfer(2, 0.5, 1);
        let mut pools = array![[1.0, 8.0, 0.0], [1.0, 4.0, 2.0]];
        compute_pools(&[op], &mut pools, None).unwrap();
        assert_relative_eq!(pools[[0, 1]], 4.0);
        assert_relative_eq!(pools[[0, 2]], 4.0);
        assert_relative_eq!(pools[[1, 1]], 2.0);
        assert_relative_eq!(pools[[1, 2]], 4.0);
    }

    #[test]
    fn disabled_stands_untouched() {
        let op = two_pool_transfer(2, 0.5, 1);
        let mut pools = array![[1.0, 8.0, 0.0], [1.0, 8.0, 0.0]];
        compute_pools(&[op], &mut pools, Some(&[true, false])).unwrap();
        assert_relative_eq!(pools[[0, 1]], 4.0);
        assert_relative_eq!(pools[[1, 1]], 8.0);
    }

    #[test]
    fn op_order_is_significant() {
        // Transfer A→B then halve B differs from the reverse order.
        let transfer = two_pool_transfer(1, 1.0, 1);
        let halve_b = Operation::from_matrix_list(
            3,
            MatrixBase::Identity,
            &[vec![Triplet::new(2, 2, 0.5)]],
            vec![0],
            1,
            None,
        )
        .unwrap();

        let mut forward = array![[1.0, 8.0, 0.0]];
        compute_pools(&[transfer.clone(), halve_b.clone()], &mut forward, None).unwrap();
        let mut reverse = array![[1.0, 8.0, 0.0]];
        compute_pools(&[halve_b, transfer], &mut reverse, None).unwrap();

        assert_relative_eq!(forward[[0, 2]], 4.0);
        assert_relative_eq!(reverse[[0, 2]], 8.0);
    }

    #[test]
    fn empty_op_list_is_a_noop() {
        let mut pools = array![[1.0, 8.0, 0.0]];
        let before = pools.clone();
        compute_pools(&[], &mut pools, None).unwrap();
        assert_eq!(pools, before);
    }

    #[test]
    fn flux_captures_transferred_mass_only() {
        let pool_set = test_pools();
        let op = two_pool_transfer(1, 0.25, 1);
        let ind = indicator(&pool_set, 1);
        let mut pools = array![[1.0, 8.0, 0.0]];
        let mut flux = array![[0.0]];
        compute_flux(&[op], &[ind], &mut pools, &mut flux, None).unwrap();
        // 25 % of 8.0 crossed; the 75 % retained is not flux.
        assert_relative_eq!(flux[[0, 0]], 2.0);
        assert_relative_eq!(pools[[0, 1]], 6.0);
    }

    #[test]
    fn flux_attribution_respects_process_id() {
        let pool_set = test_pools();
        let op = two_pool_transfer(1, 0.25, 2);
        let ind = indicator(&pool_set, 1);
        let mut pools = array![[1.0, 8.0, 0.0]];
        let mut flux = array![[0.0]];
        compute_flux(&[op], &[ind], &mut pools, &mut flux, None).unwrap();
        // Process mismatch: pools move, flux does not.
        assert_relative_eq!(flux[[0, 0]], 0.0);
        assert_relative_eq!(pools[[0, 2]], 2.0);
    }

    #[test]
    fn identity_changes_neither_pools_nor_flux() {
        let pool_set = test_pools();
        let op = Operation::from_matrix_list(
            3,
            MatrixBase::Identity,
            &[vec![]],
            vec![0],
            1,
            None,
        )
        .unwrap();
        let ind = indicator(&pool_set, 1);
        let mut pools = array![[1.0, 8.0, 3.0]];
        let mut flux = array![[0.0]];
        compute_flux(&[op], &[ind], &mut pools, &mut flux, None).unwrap();
        assert_relative_eq!(pools[[0, 1]], 8.0);
        assert_relative_eq!(pools[[0, 2]], 3.0);
        assert_relative_eq!(flux[[0, 0]], 0.0);
    }

    #[test]
    fn flux_accumulates_across_ops() {
        let pool_set = test_pools();
        let ops = [two_pool_transfer(1, 0.5, 1), two_pool_transfer(1, 0.5, 1)];
        let ind = indicator(&pool_set, 1);
        let mut pools = array![[1.0, 8.0, 0.0]];
        let mut flux = array![[0.0]];
        compute_flux(&ops, &[ind], &mut pools, &mut flux, None).unwrap();
        // 4.0 crossed in the first op, 2.0 in the second.
        assert_relative_eq!(flux[[0, 0]], 6.0);
        assert_relative_eq!(pools[[0, 1]], 2.0);
    }

    #[test]
    fn mismatched_index_length_rejected() {
        let op = two_pool_transfer(3, 0.5, 1);
        let mut pools = array![[1.0, 8.0, 0.0]];
        let result = compute_pools(&[op], &mut pools, None);
        assert!(matches!(result, Err(CoreError::Dimension(_))));
    }

    #[test]
    fn mismatched_flux_width_rejected() {
        let pool_set = test_pools();
        let op = two_pool_transfer(1, 0.5, 1);
        let ind = indicator(&pool_set, 1);
        let mut pools = array![[1.0, 8.0, 0.0]];
        let mut flux = array![[0.0, 0.0]];
        let result = compute_flux(&[op], &[ind], &mut pools, &mut flux, None);
        assert!(matches!(result, Err(CoreError::Dimension(_))));
    }

    #[test]
    fn flux_equals_offdiagonal_product_across_matrices() {
        // Five transfer matrices with distinct coefficient patterns; after
        // each op the indicator gain must equal the off-diagonal product of
        // the pre-op pool vector with the matrix.
        let pool_set = Pools::from_names(["Input", "A", "B", "C"]).unwrap();
        let indicator = FluxIndicator::resolve(
            &FluxIndicatorDefinition::new("AnyToAny", 1, ["A", "B", "C"], ["A", "B", "C"]),
            &pool_set,
        )
        .unwrap();
        let fractions = [0.11, 0.23, 0.37, 0.05, 0.42];
        let mut pools = array![[1.0, 9.0, 4.0, 0.5]];
        let mut flux_total_expected = 0.0;
        for (k, &f) in fractions.iter().enumerate() {
            let (src, dst) = ([(1, 2), (2, 3), (1, 3), (3, 2), (2, 1)])[k];
            let op = Operation::from_matrix_list(
                4,
                MatrixBase::Identity,
                &[vec![
                    Triplet::new(src, src, 1.0 - f),
                    Triplet::new(src, dst, f),
                ]],
                vec![0],
                1,
                None,
            )
            .unwrap();
            let before = pools.row(0).to_owned();
            let mut flux = array![[0.0]];
            compute_flux(
                std::slice::from_ref(&op),
                std::slice::from_ref(&indicator),
                &mut pools,
                &mut flux,
                None,
            )
            .unwrap();
            let expected = before[src] * f;
            assert_relative_eq!(flux[[0, 0]], expected, epsilon = 1e-12);
            flux_total_expected += expected;
            // Conserving transfer: total mass outside Input is unchanged.
            let total: f64 = pools.row(0).iter().skip(1).sum();
            assert_relative_eq!(total, 13.5, epsilon = 1e-12);
        }
        assert!(flux_total_expected > 0.0);
    }

    #[test]
    fn negative_input_pools_detected() {
        let op = two_pool_transfer(2, 0.5, 1);
        let mut pools = array![[1.0, 8.0, 0.0], [1.0, -4.0, 0.0]];
        let result = compute_pools(&[op], &mut pools, None);
        match result {
            Err(CoreError::Domain(message)) => assert!(message.contains("stand 1")),
            other => panic!("expected a domain error, got {other:?}"),
        }
    }

    #[test]
    fn non_finite_pools_detected() {
        let op = two_pool_transfer(1, 0.5, 1);
        let ind = indicator(&test_pools(), 1);
        let mut pools = array![[1.0, f64::NAN, 0.0]];
        let mut flux = array![[0.0]];
        let result = compute_flux(&[op], &[ind], &mut pools, &mut flux, None);
        assert!(matches!(result, Err(CoreError::Domain(_))));
    }

    #[test]
    fn deterministic_across_runs() {
        let n = 257;
        let op = two_pool_transfer(n, 0.123456789, 1);
        let mut first = Array2::zeros((n, 3));
        for i in 0..n {
            first[[i, 0]] = 1.0;
            first[[i, 1]] = (i as f64) * 0.7 + 0.1;
        }
        let mut second = first.clone();
        compute_pools(std::slice::from_ref(&op), &mut first, None).unwrap();
        compute_pools(std::slice::from_ref(&op), &mut second, None).unwrap();
        assert_eq!(first, second);
    }
}
