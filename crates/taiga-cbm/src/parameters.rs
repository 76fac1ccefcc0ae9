//! The model parameter bundle.
//!
//! Parameters are loaded once, before the first kernel call, and are
//! read-only for the life of the model. The bundle is a set of typed
//! tables: decay parameters per DOM pool, turnover parameters per spatial
//! unit and forest type, root biomass equations, disturbance matrices and
//! their associations, the species and land-class tables, and spinup
//! defaults.

use serde::{Deserialize, Serialize};
use taiga_core::errors::{CoreError, CoreResult};

/// Softwood/hardwood forest type, the species-level axis of the turnover
/// and root parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForestType {
    Softwood,
    Hardwood,
}

/// Decay parameters for one DOM pool.
///
/// The applied annual decay rate is temperature dependent:
/// `r = min(max_rate, base_decay_rate · Q10^((T − T_ref) / 10))`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayParameter {
    pub base_decay_rate: f64,
    pub reference_temperature: f64,
    pub q10: f64,
    /// Share of the decayed mass emitted to CO2; the remainder moves to the
    /// receiving slow pool.
    pub prop_to_atmosphere: f64,
    pub max_rate: f64,
}

impl DecayParameter {
    pub fn new(base_decay_rate: f64, prop_to_atmosphere: f64) -> Self {
        Self {
            base_decay_rate,
            reference_temperature: 10.0,
            q10: 2.65,
            prop_to_atmosphere,
            max_rate: 1.0,
        }
    }

    /// The applied decay rate at a mean annual temperature.
    pub fn decay_rate(&self, mean_annual_temperature: f64) -> f64 {
        let rate = self.base_decay_rate
            * ((mean_annual_temperature - self.reference_temperature) * self.q10.ln() * 0.1)
                .exp();
        rate.min(self.max_rate)
    }

    fn validate(&self, pool: &str) -> CoreResult<()> {
        let fields = [
            self.base_decay_rate,
            self.reference_temperature,
            self.q10,
            self.prop_to_atmosphere,
            self.max_rate,
        ];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::Domain(format!(
                "non-finite decay parameter for {pool}"
            )));
        }
        if !(0.0..=1.0).contains(&self.prop_to_atmosphere) {
            return Err(CoreError::Domain(format!(
                "prop_to_atmosphere {} for {pool} outside [0, 1]",
                self.prop_to_atmosphere
            )));
        }
        if self.base_decay_rate < 0.0 || self.max_rate < 0.0 || self.max_rate > 1.0 {
            return Err(CoreError::Domain(format!(
                "decay rates for {pool} outside [0, 1]"
            )));
        }
        Ok(())
    }
}

/// Decay parameters for every DOM pool. Snag parameters are shared between
/// the softwood and hardwood snag pools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayParameters {
    pub ag_very_fast: DecayParameter,
    pub bg_very_fast: DecayParameter,
    pub ag_fast: DecayParameter,
    pub bg_fast: DecayParameter,
    pub medium: DecayParameter,
    pub ag_slow: DecayParameter,
    pub bg_slow: DecayParameter,
    pub stem_snag: DecayParameter,
    pub branch_snag: DecayParameter,
}

impl Default for DecayParameters {
    fn default() -> Self {
        // The long-standing reference rates at Tref = 10 °C, Q10 = 2.65.
        // Slow pools decay straight to CO2.
        Self {
            ag_very_fast: DecayParameter::new(0.355, 0.815),
            bg_very_fast: DecayParameter::new(0.5, 0.83),
            ag_fast: DecayParameter::new(0.1435, 0.83),
            bg_fast: DecayParameter::new(0.1435, 0.83),
            medium: DecayParameter::new(0.0374, 0.83),
            ag_slow: DecayParameter::new(0.015, 1.0),
            bg_slow: DecayParameter::new(0.0033, 1.0),
            stem_snag: DecayParameter::new(0.0187, 0.83),
            branch_snag: DecayParameter::new(0.0718, 0.83),
        }
    }
}

impl DecayParameters {
    fn validate(&self) -> CoreResult<()> {
        self.ag_very_fast.validate("AboveGroundVeryFastSoil")?;
        self.bg_very_fast.validate("BelowGroundVeryFastSoil")?;
        self.ag_fast.validate("AboveGroundFastSoil")?;
        self.bg_fast.validate("BelowGroundFastSoil")?;
        self.medium.validate("MediumSoil")?;
        self.ag_slow.validate("AboveGroundSlowSoil")?;
        self.bg_slow.validate("BelowGroundSlowSoil")?;
        self.stem_snag.validate("StemSnag")?;
        self.branch_snag.validate("BranchSnag")?;
        Ok(())
    }
}

/// Annual snag fall rate from a half-life in years.
pub fn fall_rate_from_half_life(half_life: f64) -> f64 {
    1.0 - 0.5_f64.powf(1.0 / half_life)
}

/// Turnover parameters for one spatial unit × forest type.
///
/// All rates are annual proportions of the source pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnoverParameter {
    pub spatial_unit_id: i32,
    pub forest_type: ForestType,
    pub stem_turnover: f64,
    pub foliage_fall: f64,
    pub branch_turnover: f64,
    /// Share of branch turnover (and overmature branch decline) routed to
    /// the branch snag pool rather than fast soil.
    pub branch_snag_split: f64,
    pub coarse_root_turnover: f64,
    pub coarse_root_ag_split: f64,
    pub fine_root_turnover: f64,
    pub fine_root_ag_split: f64,
    pub stem_snag_fall: f64,
    pub branch_snag_fall: f64,
}

impl TurnoverParameter {
    pub fn softwood(spatial_unit_id: i32) -> Self {
        Self {
            spatial_unit_id,
            forest_type: ForestType::Softwood,
            stem_turnover: 0.006,
            foliage_fall: 0.05,
            branch_turnover: 0.04,
            branch_snag_split: 0.25,
            coarse_root_turnover: 0.02,
            coarse_root_ag_split: 0.5,
            fine_root_turnover: 0.641,
            fine_root_ag_split: 0.5,
            stem_snag_fall: 0.032,
            branch_snag_fall: 0.1,
        }
    }

    pub fn hardwood(spatial_unit_id: i32) -> Self {
        Self {
            spatial_unit_id,
            forest_type: ForestType::Hardwood,
            stem_turnover: 0.005,
            foliage_fall: 0.95,
            branch_turnover: 0.04,
            branch_snag_split: 0.25,
            coarse_root_turnover: 0.02,
            coarse_root_ag_split: 0.5,
            fine_root_turnover: 0.641,
            fine_root_ag_split: 0.5,
            stem_snag_fall: 0.032,
            branch_snag_fall: 0.1,
        }
    }

    fn validate(&self) -> CoreResult<()> {
        let rates = [
            self.stem_turnover,
            self.foliage_fall,
            self.branch_turnover,
            self.branch_snag_split,
            self.coarse_root_turnover,
            self.coarse_root_ag_split,
            self.fine_root_turnover,
            self.fine_root_ag_split,
            self.stem_snag_fall,
            self.branch_snag_fall,
        ];
        if rates.iter().any(|r| !r.is_finite() || !(0.0..=1.0).contains(r)) {
            return Err(CoreError::Domain(format!(
                "turnover rates for spatial unit {} outside [0, 1]",
                self.spatial_unit_id
            )));
        }
        Ok(())
    }
}

/// Root biomass equations per forest type.
///
/// Softwood total root biomass is linear in aboveground biomass; hardwood
/// follows a power form. The fine-root share declines exponentially with
/// total root biomass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootParameters {
    pub sw_a: f64,
    pub hw_a: f64,
    pub hw_b: f64,
    pub frp_a: f64,
    pub frp_b: f64,
    pub frp_c: f64,
    pub biomass_to_carbon: f64,
}

impl Default for RootParameters {
    fn default() -> Self {
        Self {
            sw_a: 0.222,
            hw_a: 1.576,
            hw_b: 0.615,
            frp_a: 0.072,
            frp_b: 0.354,
            frp_c: -0.06274,
            biomass_to_carbon: 0.5,
        }
    }
}

impl RootParameters {
    /// Total root biomass (tonnes) from aboveground carbon.
    pub fn total_root_biomass(&self, forest_type: ForestType, ag_carbon: f64) -> f64 {
        let ag_biomass = ag_carbon / self.biomass_to_carbon;
        match forest_type {
            ForestType::Softwood => self.sw_a * ag_biomass,
            ForestType::Hardwood => self.hw_a * ag_biomass.powf(self.hw_b),
        }
    }

    /// Fine root share of total root biomass.
    pub fn fine_root_proportion(&self, total_root_biomass: f64) -> f64 {
        self.frp_a + self.frp_b * (self.frp_c * total_root_biomass).exp()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Species {
    pub id: i32,
    pub name: String,
    pub forest_type: ForestType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LandClass {
    pub id: i32,
    pub name: String,
    pub is_forest: bool,
}

/// Land-class consequences of a disturbance type: stands disturbed by
/// `disturbance_type_id` move to `land_class_id` and wait
/// `regeneration_delay` years before growth is re-enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LandClassTransition {
    pub disturbance_type_id: i32,
    pub land_class_id: i32,
    pub regeneration_delay: i32,
}

/// One (source, sink, proportion) flow of a disturbance matrix.
///
/// Diagonals are implied as one minus the summed outflow of each source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisturbanceMatrixValue {
    pub disturbance_matrix_id: i32,
    pub source_pool: String,
    pub sink_pool: String,
    pub proportion: f64,
}

/// Associates a disturbance type in a spatial unit (optionally restricted
/// to a land class) with a disturbance matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisturbanceMatrixAssociation {
    pub disturbance_type_id: i32,
    pub spatial_unit_id: i32,
    #[serde(default)]
    pub land_class_id: Option<i32>,
    pub disturbance_matrix_id: i32,
}

/// Per-spatial-unit defaults consumed when spinup or step inputs leave the
/// corresponding field unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialUnit {
    pub id: i32,
    pub mean_annual_temperature: f64,
    /// Historical disturbance return interval during spinup.
    pub return_interval: i32,
}

/// Spinup tunables with database defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpinupDefaults {
    pub min_rotations: i32,
    pub max_rotations: i32,
    /// Relative slow-pool convergence tolerance between rotations.
    pub tolerance: f64,
}

impl Default for SpinupDefaults {
    fn default() -> Self {
        Self {
            min_rotations: 10,
            max_rotations: 30,
            tolerance: 0.01,
        }
    }
}

/// The full read-only parameter bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CbmParameters {
    #[serde(default)]
    pub decay: DecayParameters,
    pub turnover: Vec<TurnoverParameter>,
    #[serde(default)]
    pub root: RootParameters,
    pub slow_mixing_rate: f64,
    #[serde(default)]
    pub disturbance_matrix_values: Vec<DisturbanceMatrixValue>,
    #[serde(default)]
    pub disturbance_matrix_associations: Vec<DisturbanceMatrixAssociation>,
    pub species: Vec<Species>,
    #[serde(default)]
    pub land_classes: Vec<LandClass>,
    #[serde(default)]
    pub land_class_transitions: Vec<LandClassTransition>,
    pub spatial_units: Vec<SpatialUnit>,
    #[serde(default)]
    pub spinup: SpinupDefaults,
}

impl CbmParameters {
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let parameters: Self = serde_json::from_str(json)
            .map_err(|e| CoreError::Configuration(format!("parameter bundle: {e}")))?;
        parameters.validate()?;
        Ok(parameters)
    }

    /// Validate value domains. Cross-table resolution happens when the
    /// model index is built.
    pub fn validate(&self) -> CoreResult<()> {
        self.decay.validate()?;
        for turnover in &self.turnover {
            turnover.validate()?;
        }
        if !self.slow_mixing_rate.is_finite()
            || !(0.0..=1.0).contains(&self.slow_mixing_rate)
        {
            return Err(CoreError::Domain(format!(
                "slow mixing rate {} outside [0, 1]",
                self.slow_mixing_rate
            )));
        }
        for value in &self.disturbance_matrix_values {
            if !value.proportion.is_finite() || value.proportion < 0.0 {
                return Err(CoreError::Domain(format!(
                    "disturbance matrix {} has proportion {} for {} -> {}",
                    value.disturbance_matrix_id,
                    value.proportion,
                    value.source_pool,
                    value.sink_pool
                )));
            }
        }
        for spu in &self.spatial_units {
            if spu.return_interval < 1 {
                return Err(CoreError::Domain(format!(
                    "spatial unit {} has return interval {}",
                    spu.id, spu.return_interval
                )));
            }
        }
        if self.spinup.min_rotations < 1
            || self.spinup.max_rotations < self.spinup.min_rotations
            || !(self.spinup.tolerance > 0.0)
        {
            return Err(CoreError::Domain(
                "spinup defaults: require 1 <= min_rotations <= max_rotations and tolerance > 0"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
