//! Shared fixtures for unit tests.

use crate::model::CbmModel;
use crate::parameters::*;
use crate::variables::Inventory;

fn matrix_row(id: i32, source: &str, sink: &str, proportion: f64) -> DisturbanceMatrixValue {
    DisturbanceMatrixValue {
        disturbance_matrix_id: id,
        source_pool: source.to_string(),
        sink_pool: sink.to_string(),
        proportion,
    }
}

/// Wildfire: burns biomass to the atmosphere, leaves snags and litter.
fn wildfire_matrix(id: i32) -> Vec<DisturbanceMatrixValue> {
    let mut rows = Vec::new();
    for prefix in ["Softwood", "Hardwood"] {
        rows.extend([
            matrix_row(id, &format!("{prefix}Merch"), "CO2", 0.7),
            matrix_row(id, &format!("{prefix}Merch"), "CO", 0.05),
            matrix_row(id, &format!("{prefix}Merch"), &format!("{prefix}StemSnag"), 0.25),
            matrix_row(id, &format!("{prefix}Foliage"), "CO2", 0.9),
            matrix_row(id, &format!("{prefix}Foliage"), "CO", 0.05),
            matrix_row(id, &format!("{prefix}Foliage"), "AboveGroundVeryFastSoil", 0.05),
            matrix_row(id, &format!("{prefix}Other"), "CO2", 0.7),
            matrix_row(id, &format!("{prefix}Other"), "CO", 0.05),
            matrix_row(id, &format!("{prefix}Other"), &format!("{prefix}BranchSnag"), 0.25),
            matrix_row(id, &format!("{prefix}CoarseRoots"), "AboveGroundFastSoil", 0.5),
            matrix_row(id, &format!("{prefix}CoarseRoots"), "BelowGroundFastSoil", 0.5),
            matrix_row(id, &format!("{prefix}FineRoots"), "AboveGroundVeryFastSoil", 0.5),
            matrix_row(id, &format!("{prefix}FineRoots"), "BelowGroundVeryFastSoil", 0.5),
            matrix_row(id, &format!("{prefix}StemSnag"), "CO2", 0.4),
            matrix_row(id, &format!("{prefix}BranchSnag"), "CO2", 0.4),
        ]);
    }
    rows.extend([
        matrix_row(id, "AboveGroundVeryFastSoil", "CO2", 0.5),
        matrix_row(id, "AboveGroundFastSoil", "CO2", 0.3),
        matrix_row(id, "AboveGroundSlowSoil", "CO2", 0.1),
    ]);
    rows
}

/// Clearcut: merchantable carbon to Products, residues to DOM.
fn clearcut_matrix(id: i32) -> Vec<DisturbanceMatrixValue> {
    let mut rows = Vec::new();
    for prefix in ["Softwood", "Hardwood"] {
        rows.extend([
            matrix_row(id, &format!("{prefix}Merch"), "Products", 0.85),
            matrix_row(id, &format!("{prefix}Merch"), "CO2", 0.05),
            matrix_row(id, &format!("{prefix}Merch"), &format!("{prefix}StemSnag"), 0.1),
            matrix_row(id, &format!("{prefix}Foliage"), "AboveGroundVeryFastSoil", 1.0),
            matrix_row(id, &format!("{prefix}Other"), "AboveGroundFastSoil", 0.75),
            matrix_row(id, &format!("{prefix}Other"), "Products", 0.25),
            matrix_row(id, &format!("{prefix}CoarseRoots"), "AboveGroundFastSoil", 0.5),
            matrix_row(id, &format!("{prefix}CoarseRoots"), "BelowGroundFastSoil", 0.5),
            matrix_row(id, &format!("{prefix}FineRoots"), "AboveGroundVeryFastSoil", 0.5),
            matrix_row(id, &format!("{prefix}FineRoots"), "BelowGroundVeryFastSoil", 0.5),
        ]);
    }
    rows
}

/// Deforestation: salvage then conversion out of forest.
fn deforestation_matrix(id: i32) -> Vec<DisturbanceMatrixValue> {
    let mut rows = Vec::new();
    for prefix in ["Softwood", "Hardwood"] {
        rows.extend([
            matrix_row(id, &format!("{prefix}Merch"), "Products", 0.9),
            matrix_row(id, &format!("{prefix}Merch"), "CO2", 0.1),
            matrix_row(id, &format!("{prefix}Foliage"), "AboveGroundVeryFastSoil", 1.0),
            matrix_row(id, &format!("{prefix}Other"), "AboveGroundFastSoil", 1.0),
            matrix_row(id, &format!("{prefix}CoarseRoots"), "BelowGroundFastSoil", 1.0),
            matrix_row(id, &format!("{prefix}FineRoots"), "BelowGroundVeryFastSoil", 1.0),
        ]);
    }
    rows
}

pub(crate) fn test_parameters() -> CbmParameters {
    let mut disturbance_matrix_values = wildfire_matrix(7);
    disturbance_matrix_values.extend(clearcut_matrix(8));
    disturbance_matrix_values.extend(deforestation_matrix(9));
    CbmParameters {
        decay: DecayParameters::default(),
        turnover: vec![
            TurnoverParameter::softwood(17),
            TurnoverParameter::hardwood(17),
        ],
        root: RootParameters::default(),
        slow_mixing_rate: 0.006,
        disturbance_matrix_values,
        disturbance_matrix_associations: vec![
            DisturbanceMatrixAssociation {
                disturbance_type_id: 1,
                spatial_unit_id: 17,
                land_class_id: None,
                disturbance_matrix_id: 7,
            },
            DisturbanceMatrixAssociation {
                disturbance_type_id: 2,
                spatial_unit_id: 17,
                land_class_id: None,
                disturbance_matrix_id: 8,
            },
            DisturbanceMatrixAssociation {
                disturbance_type_id: 4,
                spatial_unit_id: 17,
                land_class_id: None,
                disturbance_matrix_id: 9,
            },
        ],
        species: vec![
            Species {
                id: 1,
                name: "Spruce".to_string(),
                forest_type: ForestType::Softwood,
            },
            Species {
                id: 2,
                name: "Aspen".to_string(),
                forest_type: ForestType::Hardwood,
            },
        ],
        land_classes: vec![
            LandClass {
                id: 0,
                name: "Forest land remaining forest land".to_string(),
                is_forest: true,
            },
            LandClass {
                id: 1,
                name: "Cropland converted from forest".to_string(),
                is_forest: false,
            },
        ],
        land_class_transitions: vec![LandClassTransition {
            disturbance_type_id: 4,
            land_class_id: 1,
            regeneration_delay: 2,
        }],
        spatial_units: vec![SpatialUnit {
            id: 17,
            mean_annual_temperature: 5.0,
            return_interval: 125,
        }],
        spinup: SpinupDefaults::default(),
    }
}

pub(crate) fn test_model() -> CbmModel {
    CbmModel::new(test_parameters()).unwrap()
}

/// An inventory of `n` stands in spatial unit 17, alternating softwood and
/// hardwood species.
pub(crate) fn test_inventory(n: usize) -> Inventory {
    Inventory {
        stand_id: (0..n as i32).collect(),
        area: vec![1.0; n],
        spatial_unit: vec![17; n],
        species: (0..n).map(|i| if i % 2 == 0 { 1 } else { 2 }).collect(),
        classifiers: vec![vec!["ON".to_string()]; n],
        historical_disturbance_type: vec![1; n],
        last_pass_disturbance_type: vec![1; n],
        delay: vec![0; n],
        afforestation_pre_type: vec![-1; n],
    }
}
