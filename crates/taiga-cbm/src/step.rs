//! The annual step driver.
//!
//! One simulation year is four sub-phases: `step_start` (zero flux,
//! snapshot pools), `step_disturbance` (apply and record the per-stand
//! disturbance types), `step_annual_process` (growth, turnover, decline,
//! decay, mixing) and `step_end` (clocks and land-class changes). The
//! caller-provided [`StepHook`] runs between `step_start` and
//! `step_disturbance` and is the documented seam for rule-based
//! disturbance selection and alternative temperature drivers.

use crate::growth::GrowthSource;
use crate::land_state;
use crate::matrix_ops::MatrixOps;
use crate::model::CbmModel;
use crate::variables::CbmVariables;
use taiga_core::errors::CoreResult;
use tracing::debug;

/// Pre-dynamics callback invoked once per step with mutable access to the
/// full variable bundle.
pub trait StepHook {
    fn pre_dynamics(&mut self, time_step: usize, vars: &mut CbmVariables) -> CoreResult<()>;
}

/// Zero the flux accumulators and snapshot start-of-step pools.
pub fn step_start(vars: &mut CbmVariables) {
    vars.flux.fill(0.0);
    vars.start_of_step_pools.assign(&vars.pools);
}

/// Apply the disturbance selected by `parameters.disturbance_type` for
/// each stand, with flux attribution, and record the event consequences.
pub fn step_disturbance(
    model: &CbmModel,
    ops: &mut MatrixOps<'_>,
    vars: &mut CbmVariables,
) -> CoreResult<()> {
    let disturbance = ops.disturbance(
        &vars.parameters.disturbance_type,
        &vars.inventory.spatial_unit,
        Some(&vars.state.land_class),
    )?;
    model.definition().compute_flux(
        std::slice::from_ref(&disturbance),
        &mut vars.pools,
        &mut vars.flux,
        Some(&vars.state.enabled),
    )?;
    land_state::record_disturbances(model, vars);
    Ok(())
}

/// Apply one year of growth, turnover, overmature decline, decay and slow
/// mixing. Growth is gated per stand by `growth_enabled` and any pending
/// regeneration delay; turnover and decay always run for enabled stands.
pub fn step_annual_process(
    model: &CbmModel,
    ops: &mut MatrixOps<'_>,
    growth: &dyn GrowthSource,
    vars: &mut CbmVariables,
) -> CoreResult<()> {
    let n = vars.n_stands();
    let temperature = vars.resolved_temperature(model)?;
    let increments = growth.step_increments(vars)?;
    let gate: Vec<bool> = (0..n)
        .map(|i| vars.state.growth_enabled[i] && vars.state.regeneration_delay[i] == 0)
        .collect();

    let (growth_op, decline_op) = ops.growth_and_decline(
        vars.pools.view(),
        &vars.inventory.spatial_unit,
        &vars.inventory.species,
        &increments,
        Some(&vars.state.growth_multiplier),
        Some(&gate),
    )?;
    let schedule = [
        growth_op.clone(),
        ops.biomass_turnover(vars, n)?,
        ops.snag_turnover(vars, n)?,
        decline_op,
        growth_op,
        ops.dom_decay(&temperature)?,
        ops.slow_decay(&temperature)?,
        ops.slow_mixing(n)?,
    ];
    model.definition().compute_flux(
        &schedule,
        &mut vars.pools,
        &mut vars.flux,
        Some(&vars.state.enabled),
    )?;
    Ok(())
}

/// Advance ages, clocks, land classes and regeneration delays.
pub fn step_end(model: &CbmModel, vars: &mut CbmVariables) {
    land_state::end_step(model, vars);
}

/// Run one full simulation year.
pub fn step(
    model: &CbmModel,
    ops: &mut MatrixOps<'_>,
    growth: &dyn GrowthSource,
    vars: &mut CbmVariables,
) -> CoreResult<()> {
    step_start(vars);
    step_disturbance(model, ops, vars)?;
    step_annual_process(model, ops, growth, vars)?;
    step_end(model, vars);
    Ok(())
}

/// Run `n_steps` simulation years, invoking the hook before each step's
/// disturbance evaluation.
pub fn simulate(
    model: &CbmModel,
    growth: &dyn GrowthSource,
    vars: &mut CbmVariables,
    n_steps: usize,
    mut hook: Option<&mut dyn StepHook>,
) -> CoreResult<()> {
    let mut ops = MatrixOps::new(model);
    for time_step in 1..=n_steps {
        step_start(vars);
        if let Some(hook) = hook.as_deref_mut() {
            hook.pre_dynamics(time_step, vars)?;
        }
        step_disturbance(model, &mut ops, vars)?;
        step_annual_process(model, &mut ops, growth, vars)?;
        step_end(model, vars);
        debug!(time_step, "step finished");
    }
    Ok(())
}

/// Production fluxes of a hypothetical disturbance evaluated against the
/// current pools, without mutating simulation state.
#[derive(Debug, Clone)]
pub struct DisturbanceProduction {
    pub soft_production: Vec<f64>,
    pub hard_production: Vec<f64>,
    pub dom_production: Vec<f64>,
    pub total: Vec<f64>,
}

/// Compute the carbon that the given disturbance types would send to the
/// Products pool, per stand.
///
/// `disturbance_type`: `None` evaluates `parameters.disturbance_type`;
/// a single id broadcasts to all stands. `eligible` masks stands out of
/// the computation. With `density = false`, values are multiplied by the
/// stand area.
pub fn compute_disturbance_production(
    model: &CbmModel,
    vars: &CbmVariables,
    disturbance_type: Option<i32>,
    eligible: Option<&[bool]>,
    density: bool,
) -> CoreResult<DisturbanceProduction> {
    let n = vars.n_stands();
    let types: Vec<i32> = match disturbance_type {
        Some(t) => vec![t; n],
        None => vars.parameters.disturbance_type.clone(),
    };
    let mut ops = MatrixOps::new(model);
    let disturbance = ops.disturbance(
        &types,
        &vars.inventory.spatial_unit,
        Some(&vars.state.land_class),
    )?;

    let mut pools = vars.pools.clone();
    let mut flux = model.definition().allocate_flux(n);
    model.definition().compute_flux(
        std::slice::from_ref(&disturbance),
        &mut pools,
        &mut flux,
        eligible,
    )?;

    let soft = flux
        .column(model.definition().flux_index_of("DisturbanceSoftProduction")?)
        .to_vec();
    let hard = flux
        .column(model.definition().flux_index_of("DisturbanceHardProduction")?)
        .to_vec();
    let dom = flux
        .column(model.definition().flux_index_of("DisturbanceDOMProduction")?)
        .to_vec();
    let scale = |values: &[f64]| -> Vec<f64> {
        if density {
            values.to_vec()
        } else {
            values
                .iter()
                .zip(&vars.inventory.area)
                .map(|(v, a)| v * a)
                .collect()
        }
    };
    let soft = scale(&soft);
    let hard = scale(&hard);
    let dom = scale(&dom);
    let total = soft
        .iter()
        .zip(&hard)
        .zip(&dom)
        .map(|((s, h), d)| s + h + d)
        .collect();
    Ok(DisturbanceProduction {
        soft_production: soft,
        hard_production: hard,
        dom_production: dom,
        total,
    })
}
