//! Growth dynamics shared by both engine variants.
//!
//! A [`GrowthSource`] supplies net aboveground carbon increments per stand;
//! everything downstream is common: root increments from the root biomass
//! equations, overmature decline proportions when the net increment turns
//! negative, and the gross Input→biomass additions that keep pools on
//! their prescribed trajectory while turnover moves litterfall into DOM.
//!
//! Growth is applied twice per timestep (half before turnover and decline,
//! half after) to centre the integration around age. For a pool with
//! annual turnover rate `r`, overmature decline proportion `d` (zero while
//! the pool grows), current value `p` and prescribed net change `Δ`, the
//! total addition solves the growth/turnover/decline/growth sandwich
//! exactly. Writing `k = (1 - r)(1 - d)` for the combined retained
//! fraction between the two growth halves:
//!
//! ```text
//! (p + A/2)·k + A/2 = p + Δ   =>   A = 2·(Δ⁺ + r·p·(1 - d)) / (1 + k)
//! ```
//!
//! (`Δ⁺` is the positive part; a negative net change is carried by `d`,
//! with `d·p = -Δ`). Biomass therefore tracks the growth curve through
//! both the rising and the declining limb while the transfer matrices
//! stay mass conserving.

use crate::model::CbmModel;
use crate::parameters::ForestType;
use crate::variables::CbmVariables;
use ndarray::ArrayView2;
use taiga_core::errors::{CoreError, CoreResult};
use taiga_core::storage::VariableTable;

/// Net change is considered a decline below this total increment.
const DECLINE_TOLERANCE: f64 = -1e-4;

/// Net aboveground carbon increments per stand for one year.
#[derive(Debug, Clone, Default)]
pub struct AgIncrements {
    pub merch: Vec<f64>,
    pub foliage: Vec<f64>,
    pub other: Vec<f64>,
}

impl AgIncrements {
    pub fn zeros(n_stands: usize) -> Self {
        Self {
            merch: vec![0.0; n_stands],
            foliage: vec![0.0; n_stands],
            other: vec![0.0; n_stands],
        }
    }

    pub fn len(&self) -> usize {
        self.merch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merch.is_empty()
    }
}

/// Supplier of net aboveground increments: the seam between the
/// yield-curve-driven and increment-driven engine variants.
pub trait GrowthSource {
    /// Increments for the current simulation step.
    fn step_increments(&self, vars: &CbmVariables) -> CoreResult<AgIncrements>;

    /// Increments for growing each stand from `ages[i]` to `ages[i] + 1`
    /// during spinup.
    fn spinup_increments(&self, ages: &[i32]) -> CoreResult<AgIncrements>;
}

/// Increment-driven growth: the caller supplies net aboveground increments
/// directly. Step increments come from the step parameter columns; spinup
/// increments from an age-indexed table.
#[derive(Debug, Clone)]
pub struct PrescribedIncrements {
    spinup_table: Option<IncrementTable>,
}

impl PrescribedIncrements {
    pub fn new(spinup_table: Option<IncrementTable>) -> Self {
        Self { spinup_table }
    }
}

impl GrowthSource for PrescribedIncrements {
    fn step_increments(&self, vars: &CbmVariables) -> CoreResult<AgIncrements> {
        Ok(AgIncrements {
            merch: vars.parameters.merch_inc.clone(),
            foliage: vars.parameters.foliage_inc.clone(),
            other: vars.parameters.other_inc.clone(),
        })
    }

    fn spinup_increments(&self, ages: &[i32]) -> CoreResult<AgIncrements> {
        let table = self.spinup_table.as_ref().ok_or_else(|| {
            CoreError::Configuration(
                "increment-driven spinup requires an age-indexed increment table".to_string(),
            )
        })?;
        table.increments_at(ages)
    }
}

/// Net aboveground increments by (stand, age), stand-major.
///
/// Built from a long-format table with one row per (stand, age). Ages must
/// be the sequential set starting at 1; ages beyond the table yield zero
/// increments.
#[derive(Debug, Clone)]
pub struct IncrementTable {
    n_stands: usize,
    max_age: i32,
    merch: Vec<f64>,
    foliage: Vec<f64>,
    other: Vec<f64>,
}

impl IncrementTable {
    pub fn from_table(table: &VariableTable, n_stands: usize) -> CoreResult<Self> {
        let row_idx = table.i32("row_idx")?;
        let age = table.i32("age")?;
        let merch_inc = table.f64("merch_inc")?;
        let foliage_inc = table.f64("foliage_inc")?;
        let other_inc = table.f64("other_inc")?;

        let mut ages: Vec<i32> = age.to_vec();
        ages.sort_unstable();
        ages.dedup();
        if ages.first() != Some(&1) {
            return Err(CoreError::Configuration(
                "increment table ages must start at 1".to_string(),
            ));
        }
        if ages.windows(2).any(|w| w[1] - w[0] != 1) {
            return Err(CoreError::Configuration(
                "increment table ages must be sequential".to_string(),
            ));
        }
        let max_age = *ages.last().unwrap();

        let mut built = Self {
            n_stands,
            max_age,
            merch: vec![0.0; n_stands * max_age as usize],
            foliage: vec![0.0; n_stands * max_age as usize],
            other: vec![0.0; n_stands * max_age as usize],
        };
        for row in 0..table.n_rows() {
            let stand = row_idx[row];
            if stand < 0 || stand as usize >= n_stands {
                return Err(CoreError::Dimension(format!(
                    "increment table row_idx {stand} outside 0..{n_stands}"
                )));
            }
            let cell = stand as usize * max_age as usize + (age[row] - 1) as usize;
            built.merch[cell] = merch_inc[row];
            built.foliage[cell] = foliage_inc[row];
            built.other[cell] = other_inc[row];
        }
        Ok(built)
    }

    /// Increments for growing each stand from `ages[i]` to `ages[i] + 1`.
    pub fn increments_at(&self, ages: &[i32]) -> CoreResult<AgIncrements> {
        if ages.len() != self.n_stands {
            return Err(CoreError::Dimension(format!(
                "{} ages for an increment table of {} stands",
                ages.len(),
                self.n_stands
            )));
        }
        let mut out = AgIncrements::zeros(self.n_stands);
        for (i, &age) in ages.iter().enumerate() {
            let target = age + 1;
            if target < 1 || target > self.max_age {
                continue;
            }
            let cell = i * self.max_age as usize + (target - 1) as usize;
            out.merch[i] = self.merch[cell];
            out.foliage[i] = self.foliage[cell];
            out.other[i] = self.other[cell];
        }
        Ok(out)
    }
}

/// Per-stand carbon flows prepared for the growth and overmature-decline
/// operations. `*_add` values are per application (the half-year amount);
/// decline proportions apply to the source pool once per step.
#[derive(Debug, Clone)]
pub struct GrowthInfo {
    pub forest_type: Vec<ForestType>,
    pub merch_add: Vec<f64>,
    pub foliage_add: Vec<f64>,
    pub other_add: Vec<f64>,
    pub coarse_add: Vec<f64>,
    pub fine_add: Vec<f64>,
    pub merch_to_stem_snag: Vec<f64>,
    pub other_to_branch_snag: Vec<f64>,
    pub other_to_ag_fast: Vec<f64>,
    pub foliage_to_ag_very_fast: Vec<f64>,
    pub coarse_to_ag_fast: Vec<f64>,
    pub coarse_to_bg_fast: Vec<f64>,
    pub fine_to_ag_very_fast: Vec<f64>,
    pub fine_to_bg_very_fast: Vec<f64>,
}

impl GrowthInfo {
    fn zeros(n_stands: usize) -> Self {
        Self {
            forest_type: vec![ForestType::Softwood; n_stands],
            merch_add: vec![0.0; n_stands],
            foliage_add: vec![0.0; n_stands],
            other_add: vec![0.0; n_stands],
            coarse_add: vec![0.0; n_stands],
            fine_add: vec![0.0; n_stands],
            merch_to_stem_snag: vec![0.0; n_stands],
            other_to_branch_snag: vec![0.0; n_stands],
            other_to_ag_fast: vec![0.0; n_stands],
            foliage_to_ag_very_fast: vec![0.0; n_stands],
            coarse_to_ag_fast: vec![0.0; n_stands],
            coarse_to_bg_fast: vec![0.0; n_stands],
            fine_to_ag_very_fast: vec![0.0; n_stands],
            fine_to_bg_very_fast: vec![0.0; n_stands],
        }
    }
}

fn gross_addition(net: f64, rate: f64, decline: f64, pool: f64) -> f64 {
    let retained = (1.0 - rate) * (1.0 - decline);
    2.0 * (net.max(0.0) + rate * pool * (1.0 - decline)) / (1.0 + retained)
}

/// Prepare the growth and decline flows for one step or spinup iteration.
///
/// `multiplier` scales the net increments (simulation only); `gate` zeroes
/// all growth for a stand (`growth_enabled = false` or pending
/// regeneration delay) — turnover then drains its biomass unreplaced.
#[allow(clippy::too_many_arguments)]
pub fn prepare_growth_info(
    model: &CbmModel,
    pools: ArrayView2<'_, f64>,
    spatial_unit: &[i32],
    species: &[i32],
    ag: &AgIncrements,
    multiplier: Option<&[f64]>,
    gate: Option<&[bool]>,
) -> CoreResult<GrowthInfo> {
    let n = spatial_unit.len();
    if species.len() != n || ag.len() != n || pools.nrows() != n {
        return Err(CoreError::Dimension(format!(
            "growth inputs disagree on stand count (spatial_unit {}, species {}, \
             increments {}, pools {})",
            n,
            species.len(),
            ag.len(),
            pools.nrows()
        )));
    }
    let idx = model.pool_idx();
    let root = &model.parameters().root;
    let mut info = GrowthInfo::zeros(n);

    for i in 0..n {
        let forest_type = model.index().forest_type(species[i])?;
        info.forest_type[i] = forest_type;
        if let Some(gate) = gate {
            if !gate[i] {
                continue;
            }
        }
        let (merch_i, foliage_i, other_i, coarse_i, fine_i) = match forest_type {
            ForestType::Softwood => {
                (idx.sw_merch, idx.sw_foliage, idx.sw_other, idx.sw_coarse, idx.sw_fine)
            }
            ForestType::Hardwood => {
                (idx.hw_merch, idx.hw_foliage, idx.hw_other, idx.hw_coarse, idx.hw_fine)
            }
        };
        let merch = pools[[i, merch_i]];
        let foliage = pools[[i, foliage_i]];
        let other = pools[[i, other_i]];
        let coarse = pools[[i, coarse_i]];
        let fine = pools[[i, fine_i]];

        let scale = multiplier.map_or(1.0, |m| m[i]);
        for (name, value) in [
            ("merch", ag.merch[i]),
            ("foliage", ag.foliage[i]),
            ("other", ag.other[i]),
        ] {
            if !value.is_finite() {
                return Err(CoreError::Domain(format!(
                    "non-finite {name} increment for stand {i}"
                )));
            }
        }
        // Net change cannot remove more carbon than the pool holds.
        let merch_inc = (ag.merch[i] * scale).max(-merch);
        let foliage_inc = (ag.foliage[i] * scale).max(-foliage);
        let other_inc = (ag.other[i] * scale).max(-other);

        let ag_carbon =
            merch + merch_inc + foliage + foliage_inc + other + other_inc;
        let total_root = root.total_root_biomass(forest_type, ag_carbon.max(0.0));
        let fine_prop = root.fine_root_proportion(total_root);
        let coarse_inc =
            (total_root * (1.0 - fine_prop) * root.biomass_to_carbon - coarse).max(-coarse);
        let fine_inc =
            (total_root * fine_prop * root.biomass_to_carbon - fine).max(-fine);

        // Decline proportions feed the addition formula, so they are
        // resolved first.
        let total_inc = merch_inc + foliage_inc + other_inc + coarse_inc + fine_inc;
        let mut merch_decline = 0.0;
        let mut foliage_decline = 0.0;
        let mut other_decline = 0.0;
        let mut coarse_decline = 0.0;
        let mut fine_decline = 0.0;
        let turnover = model.turnover_parameter(spatial_unit[i], forest_type)?;
        if total_inc < DECLINE_TOLERANCE {
            if merch_inc < 0.0 && merch > 0.0 {
                merch_decline = -merch_inc / merch;
                info.merch_to_stem_snag[i] = merch_decline;
            }
            if other_inc < 0.0 && other > 0.0 {
                other_decline = -other_inc / other;
                info.other_to_branch_snag[i] = other_decline * turnover.branch_snag_split;
                info.other_to_ag_fast[i] =
                    other_decline * (1.0 - turnover.branch_snag_split);
            }
            if foliage_inc < 0.0 && foliage > 0.0 {
                foliage_decline = -foliage_inc / foliage;
                info.foliage_to_ag_very_fast[i] = foliage_decline;
            }
            if coarse_inc < 0.0 && coarse > 0.0 {
                coarse_decline = -coarse_inc / coarse;
                info.coarse_to_ag_fast[i] = coarse_decline * turnover.coarse_root_ag_split;
                info.coarse_to_bg_fast[i] =
                    coarse_decline * (1.0 - turnover.coarse_root_ag_split);
            }
            if fine_inc < 0.0 && fine > 0.0 {
                fine_decline = -fine_inc / fine;
                info.fine_to_ag_very_fast[i] = fine_decline * turnover.fine_root_ag_split;
                info.fine_to_bg_very_fast[i] =
                    fine_decline * (1.0 - turnover.fine_root_ag_split);
            }
        }

        info.merch_add[i] =
            gross_addition(merch_inc, turnover.stem_turnover, merch_decline, merch) / 2.0;
        info.foliage_add[i] =
            gross_addition(foliage_inc, turnover.foliage_fall, foliage_decline, foliage) / 2.0;
        info.other_add[i] =
            gross_addition(other_inc, turnover.branch_turnover, other_decline, other) / 2.0;
        info.coarse_add[i] =
            gross_addition(coarse_inc, turnover.coarse_root_turnover, coarse_decline, coarse)
                / 2.0;
        info.fine_add[i] =
            gross_addition(fine_inc, turnover.fine_root_turnover, fine_decline, fine) / 2.0;
    }
    Ok(info)
}
