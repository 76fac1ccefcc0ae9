//! Simulation variable bundles.
//!
//! The per-stand simulation state is columnar: every field is a dense
//! vector with one entry per stand, and the pool and flux values are
//! row-per-stand matrices consumed directly by the compute kernel. Stands
//! own their rows; nothing here is aliased across stands.

use crate::model::CbmModel;
use ndarray::Array2;
use taiga_core::errors::{CoreError, CoreResult};
use taiga_core::opspec::{ColumnSource, ColumnView};

/// Per-stand inventory: the static description of each stand.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub stand_id: Vec<i32>,
    pub area: Vec<f64>,
    pub spatial_unit: Vec<i32>,
    pub species: Vec<i32>,
    /// Classifier value tuple per stand, used to resolve growth curves.
    pub classifiers: Vec<Vec<String>>,
    pub historical_disturbance_type: Vec<i32>,
    pub last_pass_disturbance_type: Vec<i32>,
    /// Regeneration delay years applied during spinup.
    pub delay: Vec<i32>,
    /// Pre-afforestation land class, or -1 where not applicable.
    pub afforestation_pre_type: Vec<i32>,
}

impl Inventory {
    pub fn len(&self) -> usize {
        self.stand_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stand_id.is_empty()
    }

    pub fn validate(&self) -> CoreResult<()> {
        let n = self.len();
        for (name, len) in [
            ("area", self.area.len()),
            ("spatial_unit", self.spatial_unit.len()),
            ("species", self.species.len()),
            ("classifiers", self.classifiers.len()),
            (
                "historical_disturbance_type",
                self.historical_disturbance_type.len(),
            ),
            (
                "last_pass_disturbance_type",
                self.last_pass_disturbance_type.len(),
            ),
            ("delay", self.delay.len()),
            ("afforestation_pre_type", self.afforestation_pre_type.len()),
        ] {
            if len != n {
                return Err(CoreError::Dimension(format!(
                    "inventory column '{name}' has {len} rows for {n} stands"
                )));
            }
        }
        if self.delay.iter().any(|&d| d < 0) {
            return Err(CoreError::Domain("negative inventory delay".to_string()));
        }
        Ok(())
    }
}

/// Mutable per-stand state advanced by the step and spinup drivers.
#[derive(Debug, Clone)]
pub struct StandState {
    pub age: Vec<i32>,
    pub land_class: Vec<i32>,
    pub time_since_last_disturbance: Vec<i32>,
    /// -1 until a land-class change first occurs.
    pub time_since_land_class_change: Vec<i32>,
    pub last_disturbance_type: Vec<i32>,
    pub regeneration_delay: Vec<i32>,
    pub growth_enabled: Vec<bool>,
    pub enabled: Vec<bool>,
    pub growth_multiplier: Vec<f64>,
}

impl StandState {
    pub fn new(n_stands: usize) -> Self {
        Self {
            age: vec![0; n_stands],
            land_class: vec![0; n_stands],
            time_since_last_disturbance: vec![0; n_stands],
            time_since_land_class_change: vec![-1; n_stands],
            last_disturbance_type: vec![0; n_stands],
            regeneration_delay: vec![0; n_stands],
            growth_enabled: vec![true; n_stands],
            enabled: vec![true; n_stands],
            growth_multiplier: vec![1.0; n_stands],
        }
    }

    pub fn len(&self) -> usize {
        self.age.len()
    }

    pub fn is_empty(&self) -> bool {
        self.age.is_empty()
    }
}

/// Per-stand, per-step parameters. The pre-dynamics hook typically mutates
/// `disturbance_type` between `step_start` and `step_disturbance`.
#[derive(Debug, Clone)]
pub struct StepParameters {
    /// Disturbance to apply this step; 0 is the no-op.
    pub disturbance_type: Vec<i32>,
    pub mean_annual_temperature: Vec<f64>,
    /// Net aboveground increments for the increment-driven growth variant;
    /// ignored by the yield-curve variant.
    pub merch_inc: Vec<f64>,
    pub foliage_inc: Vec<f64>,
    pub other_inc: Vec<f64>,
}

impl StepParameters {
    pub fn new(n_stands: usize) -> Self {
        Self {
            disturbance_type: vec![0; n_stands],
            mean_annual_temperature: vec![f64::NAN; n_stands],
            merch_inc: vec![0.0; n_stands],
            foliage_inc: vec![0.0; n_stands],
            other_inc: vec![0.0; n_stands],
        }
    }
}

/// The full simulation bundle consumed and returned by the step driver.
#[derive(Debug, Clone)]
pub struct CbmVariables {
    /// N×P pool values; the Input column is pinned at 1.0.
    pub pools: Array2<f64>,
    /// N×F flux indicator accumulators, zeroed at each step start.
    pub flux: Array2<f64>,
    /// Start-of-step pool snapshot for reporting.
    pub start_of_step_pools: Array2<f64>,
    pub state: StandState,
    pub parameters: StepParameters,
    pub inventory: Inventory,
}

impl CbmVariables {
    /// Allocate a zeroed bundle for the given inventory.
    pub fn new(model: &CbmModel, inventory: Inventory) -> CoreResult<Self> {
        inventory.validate()?;
        let n = inventory.len();
        let pools = model.definition().allocate_pools(n);
        Ok(Self {
            flux: model.definition().allocate_flux(n),
            start_of_step_pools: pools.clone(),
            pools,
            state: StandState::new(n),
            parameters: StepParameters::new(n),
            inventory,
        })
    }

    pub fn n_stands(&self) -> usize {
        self.inventory.len()
    }

    /// Per-step mean annual temperature, falling back to the spatial-unit
    /// default where the step parameter is unset.
    pub fn resolved_temperature(&self, model: &CbmModel) -> CoreResult<Vec<f64>> {
        let mut out = Vec::with_capacity(self.n_stands());
        for (i, &t) in self.parameters.mean_annual_temperature.iter().enumerate() {
            if t.is_finite() {
                out.push(t);
            } else {
                out.push(
                    model
                        .index()
                        .mean_annual_temperature(self.inventory.spatial_unit[i])?,
                );
            }
        }
        Ok(out)
    }
}

impl ColumnSource for CbmVariables {
    fn lookup(&self, table: &str, column: &str) -> CoreResult<ColumnView<'_>> {
        match (table, column) {
            ("inventory", "spatial_unit") => Ok(ColumnView::I32(&self.inventory.spatial_unit)),
            ("inventory", "species") => Ok(ColumnView::I32(&self.inventory.species)),
            ("inventory", "stand_id") => Ok(ColumnView::I32(&self.inventory.stand_id)),
            ("inventory", "area") => Ok(ColumnView::F64(&self.inventory.area)),
            ("state", "age") => Ok(ColumnView::I32(&self.state.age)),
            ("state", "land_class") => Ok(ColumnView::I32(&self.state.land_class)),
            ("state", "last_disturbance_type") => {
                Ok(ColumnView::I32(&self.state.last_disturbance_type))
            }
            ("state", "regeneration_delay") => {
                Ok(ColumnView::I32(&self.state.regeneration_delay))
            }
            ("state", "enabled") => Ok(ColumnView::Bool(&self.state.enabled)),
            ("parameters", "disturbance_type") => {
                Ok(ColumnView::I32(&self.parameters.disturbance_type))
            }
            ("parameters", "mean_annual_temperature") => {
                Ok(ColumnView::F64(&self.parameters.mean_annual_temperature))
            }
            _ => Err(CoreError::Configuration(format!(
                "no simulation column [{table}.{column}]"
            ))),
        }
    }
}

impl ColumnSource for Inventory {
    fn lookup(&self, table: &str, column: &str) -> CoreResult<ColumnView<'_>> {
        match (table, column) {
            ("inventory", "spatial_unit") => Ok(ColumnView::I32(&self.spatial_unit)),
            ("inventory", "species") => Ok(ColumnView::I32(&self.species)),
            ("inventory", "area") => Ok(ColumnView::F64(&self.area)),
            _ => Err(CoreError::Configuration(format!(
                "no inventory column [{table}.{column}]"
            ))),
        }
    }
}

/// Transient spinup bundle handed to the reporting hook.
#[derive(Debug, Clone)]
pub struct SpinupVariables {
    pub pools: Array2<f64>,
    pub flux: Option<Array2<f64>>,
    pub cursor: taiga_core::spinup::SpinupCursor,
    /// Disturbance applied to each stand this iteration (0 = none).
    pub disturbance_type: Vec<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn single_stand_inventory() -> Inventory {
        Inventory {
            stand_id: vec![1],
            area: vec![1.0],
            spatial_unit: vec![17],
            species: vec![1],
            classifiers: vec![vec!["?".to_string()]],
            historical_disturbance_type: vec![1],
            last_pass_disturbance_type: vec![1],
            delay: vec![0],
            afforestation_pre_type: vec![-1],
        }
    }

    #[test]
    fn inventory_validation_catches_ragged_columns() {
        let mut inventory = single_stand_inventory();
        inventory.area = vec![];
        assert!(matches!(
            inventory.validate(),
            Err(CoreError::Dimension(_))
        ));
    }

    #[test]
    fn inventory_validation_catches_negative_delay() {
        let mut inventory = single_stand_inventory();
        inventory.delay = vec![-1];
        assert!(matches!(inventory.validate(), Err(CoreError::Domain(_))));
    }

    #[test]
    fn state_defaults() {
        let state = StandState::new(2);
        assert!(state.enabled.iter().all(|&e| e));
        assert!(state.growth_enabled.iter().all(|&e| e));
        assert_eq!(state.time_since_land_class_change, vec![-1, -1]);
        assert_eq!(state.growth_multiplier, vec![1.0, 1.0]);
    }
}
