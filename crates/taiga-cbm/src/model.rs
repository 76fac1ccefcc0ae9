//! Model initialization: parameter resolution and indexing.
//!
//! [`CbmModel`] owns the engine configuration (pools, flux indicators) and
//! the parameter bundle, resolved once into dense lookup structures. All
//! cross-table resolution errors surface here, before the first kernel
//! call.

use crate::parameters::{CbmParameters, ForestType, LandClassTransition, TurnoverParameter};
use crate::pools::{default_flux_indicators, default_pools, PoolIdx};
use std::collections::{HashMap, HashSet};
use taiga_core::errors::{CoreError, CoreResult};
use taiga_core::matrix::Triplet;
use taiga_core::model::ModelDefinition;
use taiga_core::pools::{FluxIndicatorDefinition, Pools};

/// Dense lookups over the parameter bundle.
///
/// Matrix batches are shared across stands by grouping on parameter keys;
/// this index maps each stand's keys to its bucket.
#[derive(Debug)]
pub struct ParameterIndex {
    /// Spatial units with turnover parameters, in bucket order.
    turnover_spatial_units: Vec<i32>,
    turnover_bucket: HashMap<i32, usize>,
    turnover_rows: HashMap<(i32, ForestType), usize>,
    species_forest_type: HashMap<i32, ForestType>,
    spatial_units: HashMap<i32, (f64, i32)>,
    /// Disturbance matrix triplets per slot; slot 0 is the identity.
    disturbance_slots: Vec<Vec<Triplet>>,
    disturbance_association: HashMap<(i32, i32, Option<i32>), u32>,
    transitions: HashMap<i32, LandClassTransition>,
}

impl ParameterIndex {
    fn build(parameters: &CbmParameters, pools: &Pools) -> CoreResult<Self> {
        let mut turnover_spatial_units = Vec::new();
        let mut turnover_bucket = HashMap::new();
        let mut turnover_rows = HashMap::new();
        for (row, t) in parameters.turnover.iter().enumerate() {
            if turnover_rows
                .insert((t.spatial_unit_id, t.forest_type), row)
                .is_some()
            {
                return Err(CoreError::Configuration(format!(
                    "duplicate turnover parameters for spatial unit {} {:?}",
                    t.spatial_unit_id, t.forest_type
                )));
            }
            if !turnover_bucket.contains_key(&t.spatial_unit_id) {
                turnover_bucket.insert(t.spatial_unit_id, turnover_spatial_units.len());
                turnover_spatial_units.push(t.spatial_unit_id);
            }
        }
        for &spu in &turnover_spatial_units {
            for forest_type in [ForestType::Softwood, ForestType::Hardwood] {
                if !turnover_rows.contains_key(&(spu, forest_type)) {
                    return Err(CoreError::Configuration(format!(
                        "spatial unit {spu} is missing {forest_type:?} turnover parameters"
                    )));
                }
            }
        }

        let mut species_forest_type = HashMap::new();
        for s in &parameters.species {
            if species_forest_type.insert(s.id, s.forest_type).is_some() {
                return Err(CoreError::Configuration(format!(
                    "duplicate species id {}",
                    s.id
                )));
            }
        }

        let mut spatial_units = HashMap::new();
        for spu in &parameters.spatial_units {
            if spatial_units
                .insert(spu.id, (spu.mean_annual_temperature, spu.return_interval))
                .is_some()
            {
                return Err(CoreError::Configuration(format!(
                    "duplicate spatial unit id {}",
                    spu.id
                )));
            }
        }

        let (disturbance_slots, slot_of_matrix) =
            Self::build_disturbance_slots(parameters, pools)?;

        let mut disturbance_association = HashMap::new();
        for a in &parameters.disturbance_matrix_associations {
            let slot = slot_of_matrix.get(&a.disturbance_matrix_id).ok_or_else(|| {
                CoreError::Configuration(format!(
                    "association references unknown disturbance matrix {}",
                    a.disturbance_matrix_id
                ))
            })?;
            let key = (a.disturbance_type_id, a.spatial_unit_id, a.land_class_id);
            if disturbance_association.insert(key, *slot).is_some() {
                return Err(CoreError::Configuration(format!(
                    "duplicate disturbance matrix association {key:?}"
                )));
            }
        }

        let land_class_ids: HashSet<i32> =
            parameters.land_classes.iter().map(|c| c.id).collect();
        let mut transitions = HashMap::new();
        for t in &parameters.land_class_transitions {
            if !land_class_ids.contains(&t.land_class_id) {
                return Err(CoreError::Configuration(format!(
                    "transition for disturbance type {} targets unknown land class {}",
                    t.disturbance_type_id, t.land_class_id
                )));
            }
            if t.regeneration_delay < 0 {
                return Err(CoreError::Domain(format!(
                    "negative regeneration delay for disturbance type {}",
                    t.disturbance_type_id
                )));
            }
            if transitions
                .insert(t.disturbance_type_id, t.clone())
                .is_some()
            {
                return Err(CoreError::Configuration(format!(
                    "duplicate land-class transition for disturbance type {}",
                    t.disturbance_type_id
                )));
            }
        }

        Ok(Self {
            turnover_spatial_units,
            turnover_bucket,
            turnover_rows,
            species_forest_type,
            spatial_units,
            disturbance_slots,
            disturbance_association,
            transitions,
        })
    }

    /// Resolve disturbance matrix values into per-slot triplet lists with
    /// source diagonals implied as one minus the summed outflow.
    fn build_disturbance_slots(
        parameters: &CbmParameters,
        pools: &Pools,
    ) -> CoreResult<(Vec<Vec<Triplet>>, HashMap<i32, u32>)> {
        let mut by_matrix: Vec<(i32, Vec<&crate::parameters::DisturbanceMatrixValue>)> =
            Vec::new();
        let mut slot_of_matrix: HashMap<i32, u32> = HashMap::new();
        for value in &parameters.disturbance_matrix_values {
            match slot_of_matrix.get(&value.disturbance_matrix_id) {
                Some(&slot) => by_matrix[slot as usize - 1].1.push(value),
                None => {
                    slot_of_matrix
                        .insert(value.disturbance_matrix_id, by_matrix.len() as u32 + 1);
                    by_matrix.push((value.disturbance_matrix_id, vec![value]));
                }
            }
        }

        // Slot 0 is the shared identity for disturbance type 0.
        let mut slots = vec![Vec::new()];
        for (matrix_id, values) in by_matrix {
            let mut triplets = Vec::with_capacity(values.len() + pools.len());
            let mut outflow: HashMap<usize, f64> = HashMap::new();
            let mut explicit_diagonal: HashSet<usize> = HashSet::new();
            for value in values {
                let source = pools.index_of(&value.source_pool)?;
                let sink = pools.index_of(&value.sink_pool)?;
                if source == sink {
                    explicit_diagonal.insert(source);
                } else {
                    *outflow.entry(source).or_insert(0.0) += value.proportion;
                }
                triplets.push(Triplet::new(source, sink, value.proportion));
            }
            for (&source, &total) in &outflow {
                if explicit_diagonal.contains(&source) {
                    continue;
                }
                if total > 1.0 + 1e-9 {
                    return Err(CoreError::Domain(format!(
                        "disturbance matrix {} routes {} out of {}",
                        matrix_id,
                        total,
                        pools.name(source)
                    )));
                }
                triplets.push(Triplet::new(source, source, (1.0 - total).max(0.0)));
            }
            slots.push(triplets);
        }
        Ok((slots, slot_of_matrix))
    }

    pub fn forest_type(&self, species: i32) -> CoreResult<ForestType> {
        self.species_forest_type.get(&species).copied().ok_or_else(|| {
            CoreError::Configuration(format!("unknown species id {species}"))
        })
    }

    pub fn turnover(&self, spatial_unit: i32, forest_type: ForestType) -> CoreResult<usize> {
        self.turnover_rows
            .get(&(spatial_unit, forest_type))
            .copied()
            .ok_or_else(|| {
                CoreError::Configuration(format!(
                    "no turnover parameters for spatial unit {spatial_unit} {forest_type:?}"
                ))
            })
    }

    /// Spatial units with turnover parameters, in matrix-bucket order.
    pub fn turnover_spatial_units(&self) -> &[i32] {
        &self.turnover_spatial_units
    }

    pub fn turnover_bucket(&self, spatial_unit: i32) -> CoreResult<usize> {
        self.turnover_bucket.get(&spatial_unit).copied().ok_or_else(|| {
            CoreError::Configuration(format!(
                "no turnover parameters for spatial unit {spatial_unit}"
            ))
        })
    }

    pub fn mean_annual_temperature(&self, spatial_unit: i32) -> CoreResult<f64> {
        self.spatial_units
            .get(&spatial_unit)
            .map(|&(t, _)| t)
            .ok_or_else(|| {
                CoreError::Configuration(format!("unknown spatial unit {spatial_unit}"))
            })
    }

    pub fn return_interval(&self, spatial_unit: i32) -> CoreResult<i32> {
        self.spatial_units
            .get(&spatial_unit)
            .map(|&(_, r)| r)
            .ok_or_else(|| {
                CoreError::Configuration(format!("unknown spatial unit {spatial_unit}"))
            })
    }

    /// Triplet lists per disturbance matrix slot; slot 0 is the identity.
    pub fn disturbance_slots(&self) -> &[Vec<Triplet>] {
        &self.disturbance_slots
    }

    /// The matrix slot for one stand's disturbance. Land-class-specific
    /// associations win over the generic association.
    pub fn disturbance_slot(
        &self,
        disturbance_type: i32,
        spatial_unit: i32,
        land_class: i32,
    ) -> CoreResult<u32> {
        if disturbance_type <= 0 {
            return Ok(0);
        }
        self.disturbance_association
            .get(&(disturbance_type, spatial_unit, Some(land_class)))
            .or_else(|| {
                self.disturbance_association
                    .get(&(disturbance_type, spatial_unit, None))
            })
            .copied()
            .ok_or_else(|| {
                CoreError::Configuration(format!(
                    "no disturbance matrix for type {disturbance_type} in spatial unit \
                     {spatial_unit} (land class {land_class})"
                ))
            })
    }

    pub fn transition(&self, disturbance_type: i32) -> Option<&LandClassTransition> {
        self.transitions.get(&disturbance_type)
    }
}

/// A fully initialized forest carbon model.
pub struct CbmModel {
    definition: ModelDefinition,
    pool_idx: PoolIdx,
    parameters: CbmParameters,
    index: ParameterIndex,
}

impl CbmModel {
    /// Initialize with the default pool set and flux indicators.
    pub fn new(parameters: CbmParameters) -> CoreResult<Self> {
        Self::with_configuration(default_pools()?, &default_flux_indicators(), parameters)
    }

    /// Initialize with a custom pool ordering or indicator configuration.
    /// The pool set must still contain the default pool names.
    pub fn with_configuration(
        pools: Pools,
        flux_indicators: &[FluxIndicatorDefinition],
        parameters: CbmParameters,
    ) -> CoreResult<Self> {
        parameters.validate()?;
        let definition = ModelDefinition::with_pools(pools, flux_indicators)?;
        let pool_idx = PoolIdx::resolve(definition.pools())?;
        let index = ParameterIndex::build(&parameters, definition.pools())?;
        Ok(Self {
            definition,
            pool_idx,
            parameters,
            index,
        })
    }

    pub fn definition(&self) -> &ModelDefinition {
        &self.definition
    }

    pub fn pool_idx(&self) -> &PoolIdx {
        &self.pool_idx
    }

    pub fn parameters(&self) -> &CbmParameters {
        &self.parameters
    }

    pub fn index(&self) -> &ParameterIndex {
        &self.index
    }

    pub fn turnover_parameter(
        &self,
        spatial_unit: i32,
        forest_type: ForestType,
    ) -> CoreResult<&TurnoverParameter> {
        let row = self.index.turnover(spatial_unit, forest_type)?;
        Ok(&self.parameters.turnover[row])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::*;

    fn bundle() -> CbmParameters {
        CbmParameters {
            decay: DecayParameters::default(),
            turnover: vec![
                TurnoverParameter::softwood(17),
                TurnoverParameter::hardwood(17),
            ],
            root: RootParameters::default(),
            slow_mixing_rate: 0.006,
            disturbance_matrix_values: vec![
                DisturbanceMatrixValue {
                    disturbance_matrix_id: 7,
                    source_pool: "SoftwoodMerch".to_string(),
                    sink_pool: "CO2".to_string(),
                    proportion: 0.9,
                },
                DisturbanceMatrixValue {
                    disturbance_matrix_id: 7,
                    source_pool: "SoftwoodMerch".to_string(),
                    sink_pool: "SoftwoodStemSnag".to_string(),
                    proportion: 0.1,
                },
            ],
            disturbance_matrix_associations: vec![DisturbanceMatrixAssociation {
                disturbance_type_id: 1,
                spatial_unit_id: 17,
                land_class_id: None,
                disturbance_matrix_id: 7,
            }],
            species: vec![Species {
                id: 1,
                name: "Spruce".to_string(),
                forest_type: ForestType::Softwood,
            }],
            land_classes: vec![LandClass {
                id: 0,
                name: "FL".to_string(),
                is_forest: true,
            }],
            land_class_transitions: vec![],
            spatial_units: vec![SpatialUnit {
                id: 17,
                mean_annual_temperature: 5.0,
                return_interval: 125,
            }],
            spinup: SpinupDefaults::default(),
        }
    }

    #[test]
    fn model_initializes_with_defaults() {
        let model = CbmModel::new(bundle()).unwrap();
        assert_eq!(model.definition().n_pools(), 27);
        assert!(model.definition().n_flux_indicators() > 0);
        assert_eq!(
            model.index().forest_type(1).unwrap(),
            ForestType::Softwood
        );
    }

    #[test]
    fn disturbance_slot_resolution() {
        let model = CbmModel::new(bundle()).unwrap();
        // Type 0 is the identity slot regardless of spatial unit.
        assert_eq!(model.index().disturbance_slot(0, 17, 0).unwrap(), 0);
        let slot = model.index().disturbance_slot(1, 17, 0).unwrap();
        assert_eq!(slot, 1);
        // The implied diagonal closes the merch row.
        let triplets = &model.index().disturbance_slots()[slot as usize];
        let idx = model.pool_idx();
        let diagonal = triplets
            .iter()
            .find(|t| t.row == idx.sw_merch && t.col == idx.sw_merch)
            .unwrap();
        assert!((diagonal.value - 0.0).abs() < 1e-12);
    }

    #[test]
    fn unresolvable_association_is_fatal() {
        let model = CbmModel::new(bundle()).unwrap();
        assert!(model.index().disturbance_slot(2, 17, 0).is_err());
        assert!(model.index().disturbance_slot(1, 99, 0).is_err());
    }

    #[test]
    fn land_class_specific_association_wins() {
        let mut parameters = bundle();
        parameters.disturbance_matrix_values.push(DisturbanceMatrixValue {
            disturbance_matrix_id: 8,
            source_pool: "SoftwoodMerch".to_string(),
            sink_pool: "Products".to_string(),
            proportion: 1.0,
        });
        parameters
            .disturbance_matrix_associations
            .push(DisturbanceMatrixAssociation {
                disturbance_type_id: 1,
                spatial_unit_id: 17,
                land_class_id: Some(3),
                disturbance_matrix_id: 8,
            });
        let model = CbmModel::new(parameters).unwrap();
        let generic = model.index().disturbance_slot(1, 17, 0).unwrap();
        let specific = model.index().disturbance_slot(1, 17, 3).unwrap();
        assert_ne!(generic, specific);
    }

    #[test]
    fn missing_hardwood_turnover_is_fatal() {
        let mut parameters = bundle();
        parameters.turnover.pop();
        assert!(CbmModel::new(parameters).is_err());
    }

    #[test]
    fn overdrawn_disturbance_source_is_fatal() {
        let mut parameters = bundle();
        parameters.disturbance_matrix_values.push(DisturbanceMatrixValue {
            disturbance_matrix_id: 7,
            source_pool: "SoftwoodMerch".to_string(),
            sink_pool: "Products".to_string(),
            proportion: 0.5,
        });
        assert!(matches!(
            CbmModel::new(parameters),
            Err(CoreError::Domain(_))
        ));
    }

    #[test]
    fn transition_to_unknown_land_class_is_fatal() {
        let mut parameters = bundle();
        parameters.land_class_transitions.push(LandClassTransition {
            disturbance_type_id: 4,
            land_class_id: 99,
            regeneration_delay: 5,
        });
        assert!(CbmModel::new(parameters).is_err());
    }
}
