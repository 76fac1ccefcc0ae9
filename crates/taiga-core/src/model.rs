//! Engine configuration: the pool set and flux indicators of one model
//! instance, with validated compute entry points.

use crate::errors::{CoreError, CoreResult};
use crate::kernel;
use crate::ops::Operation;
use crate::pools::{FluxIndicator, FluxIndicatorDefinition, PoolDefinition, Pools};
use ndarray::Array2;
use std::collections::HashSet;

/// An abstraction of a carbon budget model: the fixed pool ordering, the
/// flux indicator configuration, and the kernel entry points.
///
/// All configuration errors are raised here, at initialization; the compute
/// methods only raise dimension errors.
#[derive(Debug, Clone)]
pub struct ModelDefinition {
    pools: Pools,
    flux_indicators: Vec<FluxIndicator>,
}

impl ModelDefinition {
    pub fn new(
        pool_definitions: Vec<PoolDefinition>,
        flux_definitions: &[FluxIndicatorDefinition],
    ) -> CoreResult<Self> {
        let pools = Pools::new(pool_definitions)?;
        Self::with_pools(pools, flux_definitions)
    }

    pub fn with_pools(
        pools: Pools,
        flux_definitions: &[FluxIndicatorDefinition],
    ) -> CoreResult<Self> {
        let mut seen = HashSet::new();
        for def in flux_definitions {
            if !seen.insert(def.name.as_str()) {
                return Err(CoreError::Configuration(format!(
                    "duplicate flux indicator '{}'",
                    def.name
                )));
            }
        }
        let flux_indicators = flux_definitions
            .iter()
            .map(|def| FluxIndicator::resolve(def, &pools))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self {
            pools,
            flux_indicators,
        })
    }

    pub fn pools(&self) -> &Pools {
        &self.pools
    }

    pub fn n_pools(&self) -> usize {
        self.pools.len()
    }

    pub fn flux_indicators(&self) -> &[FluxIndicator] {
        &self.flux_indicators
    }

    pub fn n_flux_indicators(&self) -> usize {
        self.flux_indicators.len()
    }

    pub fn flux_index_of(&self, name: &str) -> CoreResult<usize> {
        self.flux_indicators
            .iter()
            .position(|f| f.name() == name)
            .ok_or_else(|| CoreError::Configuration(format!("unknown flux indicator '{name}'")))
    }

    /// Allocate a zeroed pool matrix with the Input column set to 1.0.
    pub fn allocate_pools(&self, n_stands: usize) -> Array2<f64> {
        let mut pools = Array2::zeros((n_stands, self.pools.len()));
        pools
            .column_mut(self.pools.input_index())
            .fill(1.0);
        pools
    }

    pub fn allocate_flux(&self, n_stands: usize) -> Array2<f64> {
        Array2::zeros((n_stands, self.flux_indicators.len()))
    }

    /// Apply ops in order to every enabled stand.
    pub fn compute_pools(
        &self,
        ops: &[Operation],
        pools: &mut Array2<f64>,
        enabled: Option<&[bool]>,
    ) -> CoreResult<()> {
        kernel::compute_pools(ops, pools, enabled)
    }

    /// Apply ops in order, accumulating matching flux indicators.
    pub fn compute_flux(
        &self,
        ops: &[Operation],
        pools: &mut Array2<f64>,
        flux: &mut Array2<f64>,
        enabled: Option<&[bool]>,
    ) -> CoreResult<()> {
        kernel::compute_flux(ops, &self.flux_indicators, pools, flux, enabled)
    }
}
