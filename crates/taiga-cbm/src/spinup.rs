//! The spinup driver.
//!
//! Each stand is cycled through its historical disturbance regime until the
//! slow soil pools stabilise between rotations, then disturbed once more
//! with its last-pass event and grown to its inventory age. Growth is
//! always enabled during spinup; the regeneration-delay gating of the
//! simulation stepper does not apply here.

use crate::growth::GrowthSource;
use crate::land_state;
use crate::matrix_ops::MatrixOps;
use crate::model::CbmModel;
use crate::variables::{CbmVariables, Inventory, SpinupVariables};
use ndarray::Array2;
use taiga_core::errors::{CoreError, CoreResult};
use taiga_core::spinup::{advance_spinup_state, SpinupCursor, SpinupPhase, SpinupSchedule};
use tracing::{debug, warn};

/// Per-stand spinup parameters. Zero (or non-finite, for the temperature)
/// selects the parameter-bundle default for the stand's spatial unit.
#[derive(Debug, Clone)]
pub struct SpinupStandParameters {
    /// Inventory age the stand is grown to after the last-pass event.
    pub final_age: Vec<i32>,
    pub return_interval: Vec<i32>,
    pub min_rotations: Vec<i32>,
    pub max_rotations: Vec<i32>,
    pub mean_annual_temperature: Vec<f64>,
}

impl SpinupStandParameters {
    /// All defaults except the final ages.
    pub fn with_final_ages(final_age: Vec<i32>) -> Self {
        let n = final_age.len();
        Self {
            final_age,
            return_interval: vec![0; n],
            min_rotations: vec![0; n],
            max_rotations: vec![0; n],
            mean_annual_temperature: vec![f64::NAN; n],
        }
    }
}

/// The spinup input bundle.
#[derive(Debug, Clone)]
pub struct SpinupInput {
    pub inventory: Inventory,
    pub parameters: SpinupStandParameters,
    /// Optional pool seed; zero pools otherwise.
    pub initial_pools: Option<Array2<f64>>,
}

#[derive(Debug, Clone, Default)]
pub struct SpinupOptions {
    /// Convergence tolerance override; the bundle default otherwise.
    pub tolerance: Option<f64>,
    /// Track flux indicators through spinup (for debug reporting).
    pub include_flux: bool,
}

struct ResolvedSchedule {
    final_age: Vec<i32>,
    delay: Vec<i32>,
    return_interval: Vec<i32>,
    min_rotations: Vec<i32>,
    max_rotations: Vec<i32>,
    mean_annual_temperature: Vec<f64>,
    tolerance: f64,
}

fn resolve_schedule(
    model: &CbmModel,
    input: &SpinupInput,
    options: &SpinupOptions,
) -> CoreResult<ResolvedSchedule> {
    let n = input.inventory.len();
    let p = &input.parameters;
    for (name, len) in [
        ("final_age", p.final_age.len()),
        ("return_interval", p.return_interval.len()),
        ("min_rotations", p.min_rotations.len()),
        ("max_rotations", p.max_rotations.len()),
        (
            "mean_annual_temperature",
            p.mean_annual_temperature.len(),
        ),
    ] {
        if len != n {
            return Err(CoreError::Dimension(format!(
                "spinup parameter '{name}' has {len} rows for {n} stands"
            )));
        }
    }
    let defaults = &model.parameters().spinup;
    let mut schedule = ResolvedSchedule {
        final_age: p.final_age.clone(),
        delay: input.inventory.delay.clone(),
        return_interval: Vec::with_capacity(n),
        min_rotations: Vec::with_capacity(n),
        max_rotations: Vec::with_capacity(n),
        mean_annual_temperature: Vec::with_capacity(n),
        tolerance: options.tolerance.unwrap_or(defaults.tolerance),
    };
    if !(schedule.tolerance > 0.0) {
        return Err(CoreError::Domain(format!(
            "spinup tolerance {} must be positive",
            schedule.tolerance
        )));
    }
    for i in 0..n {
        if schedule.final_age[i] < 0 {
            return Err(CoreError::Domain(format!(
                "stand {i} has negative final age {}",
                schedule.final_age[i]
            )));
        }
        let spu = input.inventory.spatial_unit[i];
        let interval = if p.return_interval[i] > 0 {
            p.return_interval[i]
        } else {
            model.index().return_interval(spu)?
        };
        if interval < 1 {
            return Err(CoreError::Domain(format!(
                "stand {i} has return interval {interval}"
            )));
        }
        let min_rotations = if p.min_rotations[i] > 0 {
            p.min_rotations[i]
        } else {
            defaults.min_rotations
        };
        let max_rotations = if p.max_rotations[i] > 0 {
            p.max_rotations[i]
        } else {
            defaults.max_rotations
        };
        if max_rotations < min_rotations {
            return Err(CoreError::Domain(format!(
                "stand {i}: max_rotations {max_rotations} below min_rotations {min_rotations}"
            )));
        }
        let temperature = if p.mean_annual_temperature[i].is_finite() {
            p.mean_annual_temperature[i]
        } else {
            model.index().mean_annual_temperature(spu)?
        };
        schedule.return_interval.push(interval);
        schedule.min_rotations.push(min_rotations);
        schedule.max_rotations.push(max_rotations);
        schedule.mean_annual_temperature.push(temperature);
    }
    Ok(schedule)
}

/// A finished spinup: initialized simulation variables plus the per-stand
/// convergence flags (false where the rotation cap ended spinup instead of
/// the slow-pool test).
#[derive(Debug)]
pub struct SpinupResult {
    pub vars: CbmVariables,
    pub converged: Vec<bool>,
}

/// Run spinup for the whole stand population and hand back initialized
/// simulation variables.
///
/// The `reporting` callback receives every inner iteration's variables,
/// for debug output; pass `None` for production runs.
pub fn spinup(
    model: &CbmModel,
    growth: &dyn GrowthSource,
    input: SpinupInput,
    options: &SpinupOptions,
    mut reporting: Option<&mut dyn FnMut(usize, &SpinupVariables)>,
) -> CoreResult<SpinupResult> {
    input.inventory.validate()?;
    let n = input.inventory.len();
    let schedule = resolve_schedule(model, &input, options)?;

    let pools = match &input.initial_pools {
        Some(seed) => {
            if seed.dim() != (n, model.definition().n_pools()) {
                return Err(CoreError::Dimension(format!(
                    "initial pools are {:?}, expected ({}, {})",
                    seed.dim(),
                    n,
                    model.definition().n_pools()
                )));
            }
            let mut pools = seed.clone();
            pools.column_mut(model.pool_idx().input).fill(1.0);
            pools
        }
        None => model.definition().allocate_pools(n),
    };
    let mut spinup_vars = SpinupVariables {
        pools,
        flux: options.include_flux.then(|| model.definition().allocate_flux(n)),
        cursor: SpinupCursor::new(n),
        disturbance_type: vec![0; n],
    };

    let mut ops = MatrixOps::new(model);
    let biomass_turnover = ops.biomass_turnover(&input.inventory, n)?;
    let snag_turnover = ops.snag_turnover(&input.inventory, n)?;
    let dom_decay = ops.dom_decay(&schedule.mean_annual_temperature)?;
    let slow_decay = ops.slow_decay(&schedule.mean_annual_temperature)?;
    let slow_mixing = ops.slow_mixing(n)?;

    // Termination is bounded by the rotation cap plus the post-convergence
    // growth, per stand.
    let iteration_limit = (0..n)
        .map(|i| {
            (schedule.max_rotations[i] as i64 + 2) * (schedule.return_interval[i] as i64 + 1)
                + schedule.final_age[i] as i64 * 2
                + schedule.delay[i] as i64
        })
        .max()
        .unwrap_or(0)
        + 16;

    let mut iteration = 0usize;
    loop {
        let fsm_schedule = SpinupSchedule {
            final_age: &schedule.final_age,
            delay: &schedule.delay,
            return_interval: &schedule.return_interval,
            min_rotations: &schedule.min_rotations,
            max_rotations: &schedule.max_rotations,
            tolerance: schedule.tolerance,
        };
        let finished = advance_spinup_state(&fsm_schedule, &mut spinup_vars.cursor)?;
        if finished == n {
            break;
        }
        if iteration as i64 > iteration_limit {
            return Err(CoreError::Domain(format!(
                "spinup exceeded {iteration_limit} iterations"
            )));
        }

        let mut grow_gate = vec![false; n];
        let mut annual_mask = vec![false; n];
        let mut disturbance_mask = vec![false; n];
        for i in 0..n {
            let phase = spinup_vars.cursor.phase[i];
            annual_mask[i] = phase.is_growing();
            grow_gate[i] = phase.is_growing() && phase != SpinupPhase::Delay;
            disturbance_mask[i] = phase.is_disturbance();
            spinup_vars.disturbance_type[i] = match phase {
                SpinupPhase::HistoricalDisturbance => {
                    input.inventory.historical_disturbance_type[i]
                }
                SpinupPhase::LastPassDisturbance => {
                    input.inventory.last_pass_disturbance_type[i]
                }
                _ => 0,
            };
        }

        let increments = growth.spinup_increments(&spinup_vars.cursor.age)?;
        let (growth_op, decline_op) = ops.growth_and_decline(
            spinup_vars.pools.view(),
            &input.inventory.spatial_unit,
            &input.inventory.species,
            &increments,
            None,
            Some(&grow_gate),
        )?;
        let annual_ops = [
            growth_op.clone(),
            biomass_turnover.clone(),
            snag_turnover.clone(),
            decline_op,
            growth_op,
            dom_decay.clone(),
            slow_decay.clone(),
            slow_mixing.clone(),
        ];
        let disturbance_op = ops.disturbance(
            &spinup_vars.disturbance_type,
            &input.inventory.spatial_unit,
            None,
        )?;

        if let Some(flux) = spinup_vars.flux.as_mut() {
            flux.fill(0.0);
            model.definition().compute_flux(
                &annual_ops,
                &mut spinup_vars.pools,
                flux,
                Some(&annual_mask),
            )?;
            model.definition().compute_flux(
                std::slice::from_ref(&disturbance_op),
                &mut spinup_vars.pools,
                flux,
                Some(&disturbance_mask),
            )?;
        } else {
            model.definition().compute_pools(
                &annual_ops,
                &mut spinup_vars.pools,
                Some(&annual_mask),
            )?;
            model.definition().compute_pools(
                std::slice::from_ref(&disturbance_op),
                &mut spinup_vars.pools,
                Some(&disturbance_mask),
            )?;
        }

        land_state::end_spinup_iteration(model, &mut spinup_vars);
        if let Some(reporting) = reporting.as_deref_mut() {
            reporting(iteration, &spinup_vars);
        }
        iteration += 1;
    }

    let unconverged = spinup_vars
        .cursor
        .converged
        .iter()
        .zip(&spinup_vars.cursor.enabled)
        .filter(|(&c, &e)| e && !c)
        .count();
    if unconverged > 0 {
        warn!(
            unconverged,
            total = n,
            "spinup reached max rotations without slow-pool convergence"
        );
    }
    debug!(iterations = iteration, "spinup finished");

    let converged = spinup_vars.cursor.converged.clone();
    let vars = land_state::init_cbm_vars(model, spinup_vars, input.inventory)?;
    Ok(SpinupResult { vars, converged })
}
