//! Shared fixtures for the integration tests: a small Ontario-like
//! parameter bundle with wildfire and clearcut disturbance matrices, and
//! the reference spruce growth curve.

use taiga_cbm::model::CbmModel;
use taiga_cbm::parameters::*;
use taiga_cbm::variables::Inventory;
use taiga_cbm::yields::{GrowthCurve, VolumeToBiomass, YieldCurveGrowth};

pub const SPRUCE: i32 = 1;
pub const ASPEN: i32 = 2;
pub const ONTARIO_MIXEDWOOD: i32 = 17;
pub const WILDFIRE: i32 = 1;
pub const CLEARCUT: i32 = 2;

fn row(id: i32, source: &str, sink: &str, proportion: f64) -> DisturbanceMatrixValue {
    DisturbanceMatrixValue {
        disturbance_matrix_id: id,
        source_pool: source.to_string(),
        sink_pool: sink.to_string(),
        proportion,
    }
}

fn wildfire_rows(id: i32) -> Vec<DisturbanceMatrixValue> {
    let mut rows = Vec::new();
    for prefix in ["Softwood", "Hardwood"] {
        rows.extend([
            row(id, &format!("{prefix}Merch"), "CO2", 0.7),
            row(id, &format!("{prefix}Merch"), "CO", 0.05),
            row(id, &format!("{prefix}Merch"), &format!("{prefix}StemSnag"), 0.25),
            row(id, &format!("{prefix}Foliage"), "CO2", 0.9),
            row(id, &format!("{prefix}Foliage"), "CH4", 0.05),
            row(id, &format!("{prefix}Foliage"), "AboveGroundVeryFastSoil", 0.05),
            row(id, &format!("{prefix}Other"), "CO2", 0.7),
            row(id, &format!("{prefix}Other"), "CO", 0.05),
            row(id, &format!("{prefix}Other"), &format!("{prefix}BranchSnag"), 0.25),
            row(id, &format!("{prefix}CoarseRoots"), "AboveGroundFastSoil", 0.5),
            row(id, &format!("{prefix}CoarseRoots"), "BelowGroundFastSoil", 0.5),
            row(id, &format!("{prefix}FineRoots"), "AboveGroundVeryFastSoil", 0.5),
            row(id, &format!("{prefix}FineRoots"), "BelowGroundVeryFastSoil", 0.5),
            row(id, &format!("{prefix}StemSnag"), "CO2", 0.4),
            row(id, &format!("{prefix}BranchSnag"), "CO2", 0.4),
        ]);
    }
    rows.extend([
        row(id, "AboveGroundVeryFastSoil", "CO2", 0.5),
        row(id, "AboveGroundFastSoil", "CO2", 0.3),
        row(id, "AboveGroundSlowSoil", "CO2", 0.1),
    ]);
    rows
}

fn clearcut_rows(id: i32) -> Vec<DisturbanceMatrixValue> {
    let mut rows = Vec::new();
    for prefix in ["Softwood", "Hardwood"] {
        rows.extend([
            row(id, &format!("{prefix}Merch"), "Products", 0.85),
            row(id, &format!("{prefix}Merch"), "CO2", 0.05),
            row(id, &format!("{prefix}Merch"), &format!("{prefix}StemSnag"), 0.1),
            row(id, &format!("{prefix}Foliage"), "AboveGroundVeryFastSoil", 1.0),
            row(id, &format!("{prefix}Other"), "AboveGroundFastSoil", 0.75),
            row(id, &format!("{prefix}Other"), "Products", 0.25),
            row(id, &format!("{prefix}CoarseRoots"), "AboveGroundFastSoil", 0.5),
            row(id, &format!("{prefix}CoarseRoots"), "BelowGroundFastSoil", 0.5),
            row(id, &format!("{prefix}FineRoots"), "AboveGroundVeryFastSoil", 0.5),
            row(id, &format!("{prefix}FineRoots"), "BelowGroundVeryFastSoil", 0.5),
        ]);
    }
    rows
}

pub fn parameters() -> CbmParameters {
    let mut values = wildfire_rows(101);
    values.extend(clearcut_rows(102));
    CbmParameters {
        decay: DecayParameters::default(),
        turnover: vec![
            TurnoverParameter::softwood(ONTARIO_MIXEDWOOD),
            TurnoverParameter::hardwood(ONTARIO_MIXEDWOOD),
        ],
        root: RootParameters::default(),
        slow_mixing_rate: 0.006,
        disturbance_matrix_values: values,
        disturbance_matrix_associations: vec![
            DisturbanceMatrixAssociation {
                disturbance_type_id: WILDFIRE,
                spatial_unit_id: ONTARIO_MIXEDWOOD,
                land_class_id: None,
                disturbance_matrix_id: 101,
            },
            DisturbanceMatrixAssociation {
                disturbance_type_id: CLEARCUT,
                spatial_unit_id: ONTARIO_MIXEDWOOD,
                land_class_id: None,
                disturbance_matrix_id: 102,
            },
        ],
        species: vec![
            Species {
                id: SPRUCE,
                name: "Spruce".to_string(),
                forest_type: ForestType::Softwood,
            },
            Species {
                id: ASPEN,
                name: "Aspen".to_string(),
                forest_type: ForestType::Hardwood,
            },
        ],
        land_classes: vec![LandClass {
            id: 0,
            name: "Forest land remaining forest land".to_string(),
            is_forest: true,
        }],
        land_class_transitions: vec![],
        spatial_units: vec![SpatialUnit {
            id: ONTARIO_MIXEDWOOD,
            mean_annual_temperature: 5.0,
            return_interval: 125,
        }],
        spinup: SpinupDefaults::default(),
    }
}

pub fn model() -> CbmModel {
    CbmModel::new(parameters()).unwrap()
}

/// The reference spruce curve: 2 m3/yr to age 50, then 1 m3/yr to 150.
pub fn spruce_curve() -> GrowthCurve {
    GrowthCurve {
        classifier_set: vec!["?".to_string()],
        species_id: SPRUCE,
        age_volume_pairs: vec![(0, 0.0), (50, 100.0), (100, 150.0), (150, 200.0)],
    }
}

pub fn spruce_conversion() -> VolumeToBiomass {
    VolumeToBiomass {
        species_id: SPRUCE,
        merch_a: 0.5,
        merch_b: 1.0,
        foliage_ratio: 0.1,
        other_ratio: 0.3,
    }
}

pub fn spruce_inventory(n: usize) -> Inventory {
    Inventory {
        stand_id: (0..n as i32).collect(),
        area: vec![1.0; n],
        spatial_unit: vec![ONTARIO_MIXEDWOOD; n],
        species: vec![SPRUCE; n],
        classifiers: vec![vec!["ON".to_string()]; n],
        historical_disturbance_type: vec![WILDFIRE; n],
        last_pass_disturbance_type: vec![WILDFIRE; n],
        delay: vec![0; n],
        afforestation_pre_type: vec![-1; n],
    }
}

pub fn spruce_growth(inventory: &Inventory) -> YieldCurveGrowth {
    YieldCurveGrowth::new(&[spruce_curve()], &[spruce_conversion()], inventory).unwrap()
}

/// Total ecosystem mass outside the Input pool.
pub fn total_mass(model: &CbmModel, pools: &ndarray::Array2<f64>, stand: usize) -> f64 {
    let input = model.pool_idx().input;
    pools
        .row(stand)
        .iter()
        .enumerate()
        .filter(|&(p, _)| p != input)
        .map(|(_, v)| v)
        .sum()
}
