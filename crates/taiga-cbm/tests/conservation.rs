//! Conservation and flux-accounting properties.
//!
//! Every transfer matrix outside the Input row is mass conserving, so the
//! only mass entering the ecosystem is the growth drawn from the
//! constant-1.0 Input pool, and the flux indicators must account for every
//! off-diagonal flow they cover.

mod common;

use approx::assert_relative_eq;
use common::*;
use taiga_cbm::matrix_ops::MatrixOps;
use taiga_cbm::step;
use taiga_cbm::variables::CbmVariables;

/// Total mass change over a century equals the cumulative growth drawn
/// from Input, through growth, turnover, decay, mixing and a mid-run
/// wildfire.
#[test]
fn mass_balances_against_input_inflow() {
    let model = model();
    let inventory = spruce_inventory(3);
    let growth = spruce_growth(&inventory);
    let mut vars = CbmVariables::new(&model, inventory).unwrap();
    vars.state.age = vec![0, 30, 80];
    let mut ops = MatrixOps::new(&model);

    let ag = model.definition().flux_index_of("DeltaBiomassAG").unwrap();
    let bg = model.definition().flux_index_of("DeltaBiomassBG").unwrap();

    let initial: Vec<f64> = (0..3).map(|s| total_mass(&model, &vars.pools, s)).collect();
    let mut cumulative_inflow = [0.0; 3];
    for t in 1..=100 {
        if t == 50 {
            vars.parameters.disturbance_type = vec![WILDFIRE; 3];
        }
        step::step(&model, &mut ops, &growth, &mut vars).unwrap();
        for stand in 0..3 {
            cumulative_inflow[stand] += vars.flux[[stand, ag]] + vars.flux[[stand, bg]];
            let total = total_mass(&model, &vars.pools, stand);
            assert!(
                (total - initial[stand] - cumulative_inflow[stand]).abs()
                    <= 1e-9 * total.abs().max(1.0),
                "mass leak at step {t} for stand {stand}: total {total}, \
                 inflow {}",
                cumulative_inflow[stand]
            );
        }
    }
}

/// Per-step flux identity: the disturbance CO2 indicator equals the
/// start-of-step pools pushed through the wildfire matrix column.
#[test]
fn disturbance_flux_matches_matrix_product() {
    let model = model();
    let inventory = spruce_inventory(1);
    let growth = spruce_growth(&inventory);
    let mut vars = CbmVariables::new(&model, inventory).unwrap();
    let mut ops = MatrixOps::new(&model);
    for _ in 0..60 {
        step::step(&model, &mut ops, &growth, &mut vars).unwrap();
    }

    let wildfire = ops
        .disturbance(&[WILDFIRE], &[ONTARIO_MIXEDWOOD], None)
        .unwrap();
    let matrix = wildfire.matrix_for(0).clone();
    let idx = model.pool_idx();
    let before = vars.pools.row(0).to_owned();
    let expected: f64 = (0..model.definition().n_pools())
        .filter(|&p| p != idx.co2 && p != idx.input)
        .map(|p| before[p] * matrix.get(p, idx.co2))
        .sum();

    vars.parameters.disturbance_type = vec![WILDFIRE];
    step::step(&model, &mut ops, &growth, &mut vars).unwrap();
    let co2 = model
        .definition()
        .flux_index_of("DisturbanceCO2Production")
        .unwrap();
    assert_relative_eq!(vars.flux[[0, co2]], expected, epsilon = 1e-9);
}

/// Pools stay non-negative through repeated disturbance and regrowth.
#[test]
fn pools_never_go_negative() {
    let model = model();
    let inventory = spruce_inventory(2);
    let growth = spruce_growth(&inventory);
    let mut vars = CbmVariables::new(&model, inventory).unwrap();
    let mut ops = MatrixOps::new(&model);
    for t in 1..=200 {
        if t % 35 == 0 {
            vars.parameters.disturbance_type = vec![WILDFIRE, CLEARCUT];
        }
        step::step(&model, &mut ops, &growth, &mut vars).unwrap();
        for stand in 0..2 {
            for p in 0..model.definition().n_pools() {
                assert!(
                    vars.pools[[stand, p]] >= -1e-12,
                    "pool {p} of stand {stand} went negative at step {t}: {}",
                    vars.pools[[stand, p]]
                );
            }
        }
    }
}

/// Past the top of the growth curve, biomass pools are at a steady state
/// under turnover-compensated growth.
#[test]
fn biomass_steady_past_curve_end() {
    let model = model();
    let inventory = spruce_inventory(1);
    let growth = spruce_growth(&inventory);
    let mut vars = CbmVariables::new(&model, inventory).unwrap();
    let mut ops = MatrixOps::new(&model);
    for _ in 0..160 {
        step::step(&model, &mut ops, &growth, &mut vars).unwrap();
    }
    let idx = model.pool_idx();
    let biomass_before: Vec<f64> = idx.biomass().iter().map(|&p| vars.pools[[0, p]]).collect();
    for _ in 0..10 {
        step::step(&model, &mut ops, &growth, &mut vars).unwrap();
    }
    for (k, &p) in idx.biomass().iter().enumerate() {
        assert_relative_eq!(vars.pools[[0, p]], biomass_before[k], epsilon = 1e-6);
    }
}

/// Identical runs are byte-identical: the kernel's parallelism is not
/// observable.
#[test]
fn simulation_is_deterministic() {
    let run = || {
        let model = model();
        let inventory = spruce_inventory(64);
        let growth = spruce_growth(&inventory);
        let mut vars = CbmVariables::new(&model, inventory).unwrap();
        for i in 0..64 {
            vars.state.age[i] = (i as i32 * 7) % 90;
        }
        let mut ops = MatrixOps::new(&model);
        for t in 1..=40 {
            if t == 20 {
                vars.parameters.disturbance_type = vec![WILDFIRE; 64];
            }
            step::step(&model, &mut ops, &growth, &mut vars).unwrap();
        }
        (vars.pools, vars.flux)
    };
    let (pools_a, flux_a) = run();
    let (pools_b, flux_b) = run();
    assert_eq!(pools_a, pools_b);
    assert_eq!(flux_a, flux_b);
}

/// The spinup flux option tracks fluxes without changing the result.
#[test]
fn spinup_flux_tracking_is_observational() {
    use taiga_cbm::spinup::{spinup, SpinupInput, SpinupOptions, SpinupStandParameters};
    let model = model();
    let run = |include_flux: bool| {
        let inventory = spruce_inventory(1);
        let growth = spruce_growth(&inventory);
        let mut parameters = SpinupStandParameters::with_final_ages(vec![25]);
        parameters.min_rotations = vec![3];
        parameters.max_rotations = vec![8];
        spinup(
            &model,
            &growth,
            SpinupInput {
                inventory,
                parameters,
                initial_pools: None,
            },
            &SpinupOptions {
                tolerance: None,
                include_flux,
            },
            None,
        )
        .unwrap()
    };
    let without = run(false);
    let with = run(true);
    for p in 0..model.definition().n_pools() {
        assert_relative_eq!(
            without.vars.pools[[0, p]],
            with.vars.pools[[0, p]],
            epsilon = 1e-12
        );
    }
}
