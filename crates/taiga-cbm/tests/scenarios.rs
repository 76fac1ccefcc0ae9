//! End-to-end simulation scenarios.

mod common;

use approx::assert_relative_eq;
use common::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use taiga_cbm::growth::PrescribedIncrements;
use taiga_cbm::matrix_ops::MatrixOps;
use taiga_cbm::spinup::{spinup, SpinupInput, SpinupOptions, SpinupStandParameters};
use taiga_cbm::step;
use taiga_cbm::variables::CbmVariables;
use taiga_cbm::yields::{GrowthCurve, YieldCurveGrowth};
use taiga_core::storage::{Series, VariableTable};

/// One spruce stand grown undisturbed from bare ground: merchantable
/// carbon rises monotonically along the curve to age 150 and plateaus.
#[test]
fn undisturbed_growth_follows_the_curve() {
    let model = model();
    let inventory = spruce_inventory(1);
    let growth = spruce_growth(&inventory);
    let mut vars = CbmVariables::new(&model, inventory).unwrap();
    let mut ops = MatrixOps::new(&model);
    let idx = model.pool_idx();

    let mut merch_history = Vec::new();
    for _ in 0..170 {
        step::step(&model, &mut ops, &growth, &mut vars).unwrap();
        merch_history.push(vars.pools[[0, idx.sw_merch]]);
        assert_relative_eq!(vars.pools[[0, idx.input]], 1.0, epsilon = 1e-12);
    }

    for (t, pair) in merch_history.windows(2).enumerate() {
        assert!(
            pair[1] >= pair[0] - 1e-9,
            "merch decreased at step {}: {} -> {}",
            t + 1,
            pair[0],
            pair[1]
        );
    }
    // The curve tops out at 200 m3 * 0.5 tC/m3 at age 150.
    assert_relative_eq!(merch_history[149], 100.0, epsilon = 1e-6);
    assert_relative_eq!(merch_history[169], 100.0, epsilon = 1e-6);
    // Still on the curve mid-way: 100 m3 at age 50.
    assert_relative_eq!(merch_history[49], 50.0, epsilon = 1e-6);
}

/// A curve that declines past its peak: overmature decline moves stem
/// carbon into the snag pool while merchantable carbon keeps tracking the
/// curve exactly, and the Input-inflow mass balance still closes.
#[test]
fn overmature_decline_follows_a_declining_curve() {
    let model = model();
    let inventory = spruce_inventory(1);
    let curve = GrowthCurve {
        classifier_set: vec!["?".to_string()],
        species_id: SPRUCE,
        age_volume_pairs: vec![(0, 0.0), (50, 100.0), (80, 60.0), (150, 60.0)],
    };
    let growth =
        YieldCurveGrowth::new(&[curve], &[spruce_conversion()], &inventory).unwrap();
    let mut vars = CbmVariables::new(&model, inventory).unwrap();
    let mut ops = MatrixOps::new(&model);
    let idx = model.pool_idx();
    let ag = model.definition().flux_index_of("DeltaBiomassAG").unwrap();
    let bg = model.definition().flux_index_of("DeltaBiomassBG").unwrap();

    // 2 m3/yr up to the peak at 50, -4/3 m3/yr down to 80, then flat.
    let volume_at = |age: i32| -> f64 {
        match age {
            a if a <= 50 => 2.0 * f64::from(a),
            a if a <= 80 => 100.0 - 4.0 * f64::from(a - 50) / 3.0,
            _ => 60.0,
        }
    };

    let initial = total_mass(&model, &vars.pools, 0);
    let mut cumulative_inflow = 0.0;
    let mut snag_at_peak = 0.0;
    let mut snag_mid_decline = 0.0;
    for t in 1..=120 {
        step::step(&model, &mut ops, &growth, &mut vars).unwrap();
        cumulative_inflow += vars.flux[[0, ag]] + vars.flux[[0, bg]];
        assert_relative_eq!(
            vars.pools[[0, idx.sw_merch]],
            0.5 * volume_at(t),
            epsilon = 1e-6
        );
        if t == 50 {
            snag_at_peak = vars.pools[[0, idx.sw_stem_snag]];
        }
        if t == 60 {
            snag_mid_decline = vars.pools[[0, idx.sw_stem_snag]];
        }
    }
    // Down from 50 tC at the peak to the 30 tC plateau.
    assert_relative_eq!(vars.pools[[0, idx.sw_merch]], 30.0, epsilon = 1e-6);
    // The decline feeds the stem snag pool beyond ordinary turnover.
    assert!(
        snag_mid_decline > snag_at_peak,
        "stem snag should accumulate during the decline: {snag_at_peak} -> {snag_mid_decline}"
    );
    // Everything the ecosystem gained still arrived through Input.
    let total = total_mass(&model, &vars.pools, 0);
    assert!(
        (total - initial - cumulative_inflow).abs() <= 1e-9 * total.abs().max(1.0),
        "mass leak through the declining limb: total {total}, inflow {cumulative_inflow}"
    );
}

/// Spinup under a wildfire return interval ends at age zero (zero final
/// age) with carbon in the soil pools.
#[test]
fn wildfire_spinup_reaches_steady_state() {
    let model = model();
    let inventory = spruce_inventory(1);
    let growth = spruce_growth(&inventory);
    let mut parameters = SpinupStandParameters::with_final_ages(vec![0]);
    parameters.min_rotations = vec![10];
    parameters.max_rotations = vec![30];
    let result = spinup(
        &model,
        &growth,
        SpinupInput {
            inventory,
            parameters,
            initial_pools: None,
        },
        &SpinupOptions::default(),
        None,
    )
    .unwrap();

    assert_eq!(result.vars.state.age, vec![0]);
    assert_eq!(result.vars.state.last_disturbance_type, vec![WILDFIRE]);
    let idx = model.pool_idx();
    for pool in [idx.ag_slow, idx.bg_slow, idx.ag_very_fast, idx.medium] {
        assert!(
            result.vars.pools[[0, pool]] > 0.0,
            "expected carbon in DOM pool {pool} after spinup"
        );
    }
    assert!(result.converged[0], "slow pools should converge in 30 rotations");
}

/// A landscape disturbed all at once: ages reset, biomass drops, and the
/// disturbance CO2 flux appears only in the disturbance year.
#[test]
fn synchronized_wildfire_resets_the_landscape() {
    let n = 1000;
    let model = model();
    let inventory = spruce_inventory(n);
    let growth = spruce_growth(&inventory);
    let mut vars = CbmVariables::new(&model, inventory).unwrap();
    let mut rng = StdRng::seed_from_u64(42);
    for i in 0..n {
        vars.state.age[i] = rng.gen_range(0..=60);
    }
    let mut ops = MatrixOps::new(&model);
    let idx = model.pool_idx();
    let co2_production = model
        .definition()
        .flux_index_of("DisturbanceCO2Production")
        .unwrap();

    let mean_biomass = |vars: &CbmVariables| -> f64 {
        let total: f64 = (0..n)
            .map(|i| {
                idx.biomass()
                    .iter()
                    .map(|&p| vars.pools[[i, p]])
                    .sum::<f64>()
            })
            .sum();
        total / n as f64
    };

    let mut biomass_before_disturbance = 0.0;
    for t in 1..=12 {
        if t == 10 {
            biomass_before_disturbance = mean_biomass(&vars);
            vars.parameters.disturbance_type = vec![WILDFIRE; n];
        }
        step::step(&model, &mut ops, &growth, &mut vars).unwrap();
        let co2_flux: f64 = (0..n).map(|i| vars.flux[[i, co2_production]]).sum();
        if t == 10 {
            assert!(co2_flux > 0.0, "wildfire must produce CO2 at t=10");
            assert!(vars.state.age.iter().all(|&a| a == 0));
            assert!(mean_biomass(&vars) < biomass_before_disturbance);
        } else {
            assert_relative_eq!(co2_flux, 0.0);
        }
    }
}

/// A disabled stand is untouched by fifty years of dynamics.
#[test]
fn disabled_stand_is_frozen() {
    let model = model();
    let inventory = spruce_inventory(2);
    let growth = spruce_growth(&inventory);
    let mut vars = CbmVariables::new(&model, inventory).unwrap();
    vars.state.enabled[1] = false;
    let initial = vars.pools.clone();
    let mut ops = MatrixOps::new(&model);
    for _ in 0..50 {
        step::step(&model, &mut ops, &growth, &mut vars).unwrap();
    }
    for p in 0..model.definition().n_pools() {
        assert_relative_eq!(vars.pools[[1, p]], initial[[1, p]]);
    }
    assert_eq!(vars.state.age[1], 0);
    // The enabled twin diverged.
    let idx = model.pool_idx();
    assert!(vars.pools[[0, idx.sw_merch]] > 1.0);
}

/// The increment-driven variant reproduces the yield-curve variant when
/// fed the curve's own increments.
#[test]
fn prescribed_increments_match_yield_curves() {
    let model = model();
    let inventory = spruce_inventory(1);
    let curve_growth = spruce_growth(&inventory);

    // Long-format increment table carrying the same curve, ages 1..=150.
    let conversion = spruce_conversion();
    let volume_at = |age: i32| -> f64 {
        let pairs = [(0, 0.0), (50, 100.0), (100, 150.0), (150, 200.0)];
        if age >= 150 {
            return 200.0;
        }
        let (mut a0, mut v0) = pairs[0];
        for &(a1, v1) in &pairs[1..] {
            if age <= a1 {
                return v0 + (v1 - v0) * f64::from(age - a0) / f64::from(a1 - a0);
            }
            a0 = a1;
            v0 = v1;
        }
        unreachable!()
    };
    let ages: Vec<i32> = (1..=150).collect();
    let merch: Vec<f64> = ages
        .iter()
        .map(|&a| conversion.merch_a * (volume_at(a) - volume_at(a - 1)))
        .collect();
    let foliage: Vec<f64> = merch.iter().map(|m| m * conversion.foliage_ratio).collect();
    let other: Vec<f64> = merch.iter().map(|m| m * conversion.other_ratio).collect();
    let table = VariableTable::new(vec![
        Series::i32("row_idx", vec![0; 150]),
        Series::i32("age", ages),
        Series::f64("merch_inc", merch),
        Series::f64("foliage_inc", foliage),
        Series::f64("other_inc", other),
    ])
    .unwrap();
    let increment_table =
        taiga_cbm::growth::IncrementTable::from_table(&table, 1).unwrap();
    let prescribed = PrescribedIncrements::new(Some(increment_table));

    let run = |growth: &dyn taiga_cbm::growth::GrowthSource| {
        let mut parameters = SpinupStandParameters::with_final_ages(vec![40]);
        parameters.min_rotations = vec![3];
        parameters.max_rotations = vec![6];
        spinup(
            &model,
            growth,
            SpinupInput {
                inventory: spruce_inventory(1),
                parameters,
                initial_pools: None,
            },
            &SpinupOptions::default(),
            None,
        )
        .unwrap()
    };
    let from_curves = run(&curve_growth);
    let from_table = run(&prescribed);
    for p in 0..model.definition().n_pools() {
        assert_relative_eq!(
            from_curves.vars.pools[[0, p]],
            from_table.vars.pools[[0, p]],
            epsilon = 1e-9
        );
    }
    assert_eq!(from_curves.vars.state.age, from_table.vars.state.age);
}

/// Per-step temperature overrides accelerate decay relative to the
/// spatial-unit default.
#[test]
fn temperature_override_drives_decay() {
    let model = model();
    let run = |temperature: f64| {
        let inventory = spruce_inventory(1);
        let growth = spruce_growth(&inventory);
        let mut vars = CbmVariables::new(&model, inventory).unwrap();
        let mut ops = MatrixOps::new(&model);
        // Build litter for a while, then let it decay under the given
        // temperature with growth switched off.
        for _ in 0..40 {
            step::step(&model, &mut ops, &growth, &mut vars).unwrap();
        }
        vars.state.growth_enabled[0] = false;
        vars.parameters.mean_annual_temperature[0] = temperature;
        let decay = model
            .definition()
            .flux_index_of("DecayDOMCO2Emission")
            .unwrap();
        let mut emitted = 0.0;
        for _ in 0..10 {
            step::step(&model, &mut ops, &growth, &mut vars).unwrap();
            emitted += vars.flux[[0, decay]];
        }
        emitted
    };
    let cold = run(-5.0);
    let warm = run(15.0);
    assert!(
        warm > cold,
        "decay emissions should rise with temperature: cold {cold}, warm {warm}"
    );
}

/// The growth multiplier scales accumulated biomass.
#[test]
fn growth_multiplier_scales_biomass() {
    let model = model();
    let run = |multiplier: f64| {
        let inventory = spruce_inventory(1);
        let growth = spruce_growth(&inventory);
        let mut vars = CbmVariables::new(&model, inventory).unwrap();
        vars.state.growth_multiplier[0] = multiplier;
        let mut ops = MatrixOps::new(&model);
        for _ in 0..30 {
            step::step(&model, &mut ops, &growth, &mut vars).unwrap();
        }
        vars.pools[[0, model.pool_idx().sw_merch]]
    };
    let full = run(1.0);
    let half = run(0.5);
    assert_relative_eq!(half, full / 2.0, epsilon = 1e-9);
}

/// A looser convergence tolerance ends spinup in fewer rotations.
#[test]
fn spinup_tolerance_controls_convergence() {
    let model = model();
    let run = |tolerance: f64| {
        let inventory = spruce_inventory(1);
        let growth = spruce_growth(&inventory);
        let mut parameters = SpinupStandParameters::with_final_ages(vec![0]);
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
                tolerance: Some(tolerance),
                include_flux: false,
            },
            None,
        )
        .unwrap()
    };
    // A 500 % tolerance accepts any pair of rotations; 1e-12 accepts none
    // within eight rotations.
    assert!(run(5.0).converged[0]);
    assert!(!run(1e-12).converged[0]);
}

/// Spinup honours the inventory delay before regrowing to the final age.
#[test]
fn spinup_delay_defers_regrowth() {
    let model = model();
    let mut inventory = spruce_inventory(1);
    inventory.delay = vec![5];
    let growth = spruce_growth(&inventory);
    let mut parameters = SpinupStandParameters::with_final_ages(vec![10]);
    parameters.min_rotations = vec![3];
    parameters.max_rotations = vec![5];
    let result = spinup(
        &model,
        &growth,
        SpinupInput {
            inventory,
            parameters,
            initial_pools: None,
        },
        &SpinupOptions::default(),
        None,
    )
    .unwrap();
    assert_eq!(result.vars.state.age, vec![10]);
    assert_eq!(result.vars.state.time_since_last_disturbance, vec![15]);
}

/// Regeneration delay after a land-class transition suppresses growth.
#[test]
fn regeneration_delay_gates_growth() {
    let mut parameters = parameters();
    parameters.land_classes.push(taiga_cbm::parameters::LandClass {
        id: 1,
        name: "Cropland converted from forest".to_string(),
        is_forest: false,
    });
    parameters
        .land_class_transitions
        .push(taiga_cbm::parameters::LandClassTransition {
            disturbance_type_id: CLEARCUT,
            land_class_id: 1,
            regeneration_delay: 3,
        });
    let model = taiga_cbm::CbmModel::new(parameters).unwrap();
    let inventory = spruce_inventory(1);
    let growth = spruce_growth(&inventory);
    let mut vars = CbmVariables::new(&model, inventory).unwrap();
    let mut ops = MatrixOps::new(&model);
    let idx = model.pool_idx();

    for _ in 0..20 {
        step::step(&model, &mut ops, &growth, &mut vars).unwrap();
    }
    vars.parameters.disturbance_type = vec![CLEARCUT];
    step::step(&model, &mut ops, &growth, &mut vars).unwrap();
    assert_eq!(vars.state.land_class, vec![1]);
    assert!(!vars.state.growth_enabled[0]);
    let merch_after_clearcut = vars.pools[[0, idx.sw_merch]];

    // While regeneration is pending nothing regrows.
    step::step(&model, &mut ops, &growth, &mut vars).unwrap();
    assert!(vars.pools[[0, idx.sw_merch]] <= merch_after_clearcut + 1e-12);
    step::step(&model, &mut ops, &growth, &mut vars).unwrap();
    assert!(vars.state.growth_enabled[0]);
    let merch_before_regrowth = vars.pools[[0, idx.sw_merch]];
    step::step(&model, &mut ops, &growth, &mut vars).unwrap();
    assert!(vars.pools[[0, idx.sw_merch]] > merch_before_regrowth);
}
