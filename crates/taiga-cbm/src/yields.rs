//! Yield-curve-driven growth: the volume-to-biomass engine variant.
//!
//! Growth curves give merchantable volume by age per classifier set and
//! species. Each stand resolves to the most specific matching curve (`?`
//! is a wildcard classifier value), volumes are interpolated at integer
//! ages and converted to per-age biomass carbon through the species-level
//! volume-to-biomass table. Ages beyond the last defined point extend the
//! last volume, so increments vanish at the top of the curve.

use crate::growth::{AgIncrements, GrowthSource};
use crate::variables::{CbmVariables, Inventory};
use serde::{Deserialize, Serialize};
use taiga_core::errors::{CoreError, CoreResult};

/// A piecewise-linear age → merchantable volume curve for one classifier
/// set × species.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthCurve {
    /// Classifier values; `?` matches any stand value.
    pub classifier_set: Vec<String>,
    pub species_id: i32,
    /// (age, volume) pairs, ages strictly increasing.
    pub age_volume_pairs: Vec<(i32, f64)>,
}

/// Species-level conversion from merchantable volume to biomass carbon.
///
/// Merchantable carbon follows a power form of volume; foliage and
/// other-wood carbon are expansion ratios of merchantable carbon. Root
/// carbon is derived downstream from the root biomass equations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeToBiomass {
    pub species_id: i32,
    /// `merch_c = a · volume^b`
    pub merch_a: f64,
    pub merch_b: f64,
    pub foliage_ratio: f64,
    pub other_ratio: f64,
}

impl VolumeToBiomass {
    pub fn merch_carbon(&self, volume: f64) -> f64 {
        if volume <= 0.0 {
            0.0
        } else {
            self.merch_a * volume.powf(self.merch_b)
        }
    }
}

/// How specific a curve's classifier set is for a stand: the number of
/// non-wildcard values, or None when any value conflicts.
fn match_specificity(curve: &[String], stand: &[String]) -> Option<usize> {
    let mut specificity = 0;
    for (c, s) in curve.iter().zip(stand) {
        if c == "?" {
            continue;
        }
        if c != s {
            return None;
        }
        specificity += 1;
    }
    Some(specificity)
}

/// Interpolate a curve at integer ages `0..=max_age`, clamping outside the
/// defined range.
fn interpolate(pairs: &[(i32, f64)], max_age: i32) -> Vec<f64> {
    let mut volumes = Vec::with_capacity(max_age as usize + 1);
    for age in 0..=max_age {
        let volume = match pairs.iter().position(|&(a, _)| a >= age) {
            None => pairs.last().map_or(0.0, |&(_, v)| v),
            Some(0) => pairs[0].1,
            Some(k) => {
                let (a0, v0) = pairs[k - 1];
                let (a1, v1) = pairs[k];
                v0 + (v1 - v0) * f64::from(age - a0) / f64::from(a1 - a0)
            }
        };
        volumes.push(volume);
    }
    volumes
}

/// Yield-curve growth source with per-stand curve resolution performed
/// once at construction.
#[derive(Debug, Clone)]
pub struct YieldCurveGrowth {
    curve_of_stand: Vec<usize>,
    /// Per curve: biomass carbon at integer ages `0..=max_age`.
    merch_carbon: Vec<Vec<f64>>,
    foliage_carbon: Vec<Vec<f64>>,
    other_carbon: Vec<Vec<f64>>,
}

impl YieldCurveGrowth {
    pub fn new(
        curves: &[GrowthCurve],
        conversions: &[VolumeToBiomass],
        inventory: &Inventory,
    ) -> CoreResult<Self> {
        if curves.is_empty() {
            return Err(CoreError::Configuration("no growth curves".to_string()));
        }
        for curve in curves {
            let ages_ok = curve
                .age_volume_pairs
                .windows(2)
                .all(|w| w[1].0 > w[0].0);
            if curve.age_volume_pairs.is_empty() || !ages_ok {
                return Err(CoreError::Configuration(format!(
                    "growth curve for species {} needs strictly increasing ages",
                    curve.species_id
                )));
            }
            if curve.age_volume_pairs.iter().any(|&(_, v)| !v.is_finite() || v < 0.0) {
                return Err(CoreError::Domain(format!(
                    "growth curve for species {} has invalid volumes",
                    curve.species_id
                )));
            }
        }

        let mut curve_of_stand = Vec::with_capacity(inventory.len());
        for i in 0..inventory.len() {
            let stand_classifiers = &inventory.classifiers[i];
            let mut best: Option<(usize, usize)> = None;
            for (k, curve) in curves.iter().enumerate() {
                if curve.species_id != inventory.species[i] {
                    continue;
                }
                if curve.classifier_set.len() != stand_classifiers.len() {
                    return Err(CoreError::Dimension(format!(
                        "curve classifier set has {} values, stand {} has {}",
                        curve.classifier_set.len(),
                        i,
                        stand_classifiers.len()
                    )));
                }
                if let Some(specificity) =
                    match_specificity(&curve.classifier_set, stand_classifiers)
                {
                    // Most specific match wins; earlier curves win ties.
                    if best.map_or(true, |(_, s)| specificity > s) {
                        best = Some((k, specificity));
                    }
                }
            }
            let (k, _) = best.ok_or_else(|| {
                CoreError::Configuration(format!(
                    "no growth curve matches stand {} (species {}, classifiers {:?})",
                    i, inventory.species[i], stand_classifiers
                ))
            })?;
            curve_of_stand.push(k);
        }

        let mut merch_carbon = Vec::with_capacity(curves.len());
        let mut foliage_carbon = Vec::with_capacity(curves.len());
        let mut other_carbon = Vec::with_capacity(curves.len());
        for curve in curves {
            let conversion = conversions
                .iter()
                .find(|c| c.species_id == curve.species_id)
                .ok_or_else(|| {
                    CoreError::Configuration(format!(
                        "no volume-to-biomass parameters for species {}",
                        curve.species_id
                    ))
                })?;
            let max_age = curve.age_volume_pairs.last().unwrap().0;
            let volumes = interpolate(&curve.age_volume_pairs, max_age);
            let merch: Vec<f64> = volumes
                .iter()
                .map(|&v| conversion.merch_carbon(v))
                .collect();
            foliage_carbon.push(merch.iter().map(|&m| m * conversion.foliage_ratio).collect());
            other_carbon.push(merch.iter().map(|&m| m * conversion.other_ratio).collect());
            merch_carbon.push(merch);
        }

        Ok(Self {
            curve_of_stand,
            merch_carbon,
            foliage_carbon,
            other_carbon,
        })
    }

    pub fn n_stands(&self) -> usize {
        self.curve_of_stand.len()
    }

    fn carbon_at(values: &[f64], age: i32) -> f64 {
        if values.is_empty() || age < 0 {
            return 0.0;
        }
        let clamped = (age as usize).min(values.len() - 1);
        values[clamped]
    }

    /// Net increments for growing each stand from `ages[i]` to
    /// `ages[i] + 1`.
    pub fn increments_at(&self, ages: &[i32]) -> CoreResult<AgIncrements> {
        if ages.len() != self.n_stands() {
            return Err(CoreError::Dimension(format!(
                "{} ages for {} resolved stands",
                ages.len(),
                self.n_stands()
            )));
        }
        let mut out = AgIncrements::zeros(ages.len());
        for (i, &age) in ages.iter().enumerate() {
            let k = self.curve_of_stand[i];
            out.merch[i] = Self::carbon_at(&self.merch_carbon[k], age + 1)
                - Self::carbon_at(&self.merch_carbon[k], age);
            out.foliage[i] = Self::carbon_at(&self.foliage_carbon[k], age + 1)
                - Self::carbon_at(&self.foliage_carbon[k], age);
            out.other[i] = Self::carbon_at(&self.other_carbon[k], age + 1)
                - Self::carbon_at(&self.other_carbon[k], age);
        }
        Ok(out)
    }
}

impl GrowthSource for YieldCurveGrowth {
    fn step_increments(&self, vars: &CbmVariables) -> CoreResult<AgIncrements> {
        self.increments_at(&vars.state.age)
    }

    fn spinup_increments(&self, ages: &[i32]) -> CoreResult<AgIncrements> {
        self.increments_at(ages)
    }
}
