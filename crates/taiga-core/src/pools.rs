//! Pool and flux-indicator configuration.
//!
//! Pools are the named scalar carbon quantities tracked per stand. The set
//! of pools is fixed when an engine instance is created and every pool is
//! identified by a stable dense integer index. One pool must be named
//! [`INPUT_POOL`]; it holds the constant value 1.0 and acts as the mass
//! source that growth operations drain from.
//!
//! Flux indicators are named accumulators over (source pool × sink pool)
//! flows, attributed only to operations whose process id matches.

use crate::errors::{CoreError, CoreResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Name of the reserved constant-1.0 source pool.
pub const INPUT_POOL: &str = "Input";

/// A named pool with its stable integer id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDefinition {
    pub name: String,
    pub id: usize,
}

impl PoolDefinition {
    pub fn new(name: impl Into<String>, id: usize) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

/// The ordered pool set for one engine instance.
///
/// Ids must be dense (`0..P`) and names unique. Order is fixed for the
/// lifetime of the engine: pool vectors, matrices and flux definitions all
/// use these indices.
#[derive(Debug, Clone)]
pub struct Pools {
    names: Vec<String>,
    index: IndexMap<String, usize>,
    input: usize,
}

impl Pools {
    pub fn new(definitions: Vec<PoolDefinition>) -> CoreResult<Self> {
        let n = definitions.len();
        if n == 0 {
            return Err(CoreError::Configuration("empty pool list".to_string()));
        }
        let mut names = vec![String::new(); n];
        let mut index = IndexMap::with_capacity(n);
        for def in definitions {
            if def.id >= n {
                return Err(CoreError::Configuration(format!(
                    "pool '{}' has id {} but only {} pools are defined",
                    def.name, def.id, n
                )));
            }
            if !names[def.id].is_empty() {
                return Err(CoreError::Configuration(format!(
                    "duplicate pool id {} ('{}' and '{}')",
                    def.id, names[def.id], def.name
                )));
            }
            if index.insert(def.name.clone(), def.id).is_some() {
                return Err(CoreError::Configuration(format!(
                    "duplicate pool name '{}'",
                    def.name
                )));
            }
            names[def.id] = def.name;
        }
        let input = *index.get(INPUT_POOL).ok_or_else(|| {
            CoreError::Configuration(format!("pool list does not define '{INPUT_POOL}'"))
        })?;
        Ok(Self {
            names,
            index,
            input,
        })
    }

    /// Build a pool set from names alone, assigning ids in order.
    pub fn from_names<S: Into<String>>(names: impl IntoIterator<Item = S>) -> CoreResult<Self> {
        Self::new(
            names
                .into_iter()
                .enumerate()
                .map(|(id, name)| PoolDefinition::new(name, id))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, id: usize) -> &str {
        &self.names[id]
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Index of the reserved Input pool.
    pub fn input_index(&self) -> usize {
        self.input
    }

    pub fn index_of(&self, name: &str) -> CoreResult<usize> {
        self.index.get(name).copied().ok_or_else(|| {
            CoreError::Configuration(format!("unknown pool '{name}'"))
        })
    }
}

/// Flux indicator configured by pool name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxIndicatorDefinition {
    pub name: String,
    /// Process id this indicator attributes flows to.
    pub process_id: u16,
    pub source_pools: Vec<String>,
    pub sink_pools: Vec<String>,
}

impl FluxIndicatorDefinition {
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        process_id: u16,
        source_pools: impl IntoIterator<Item = S>,
        sink_pools: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            process_id,
            source_pools: source_pools.into_iter().map(Into::into).collect(),
            sink_pools: sink_pools.into_iter().map(Into::into).collect(),
        }
    }
}

/// A flux indicator resolved against a pool set.
///
/// Source and sink membership are stored as bitmaps over the pool index so
/// the kernel can test membership per matrix entry without hashing.
#[derive(Debug, Clone)]
pub struct FluxIndicator {
    name: String,
    process_id: u16,
    source: Vec<bool>,
    sink: Vec<bool>,
}

impl FluxIndicator {
    pub fn resolve(definition: &FluxIndicatorDefinition, pools: &Pools) -> CoreResult<Self> {
        if definition.source_pools.is_empty() || definition.sink_pools.is_empty() {
            return Err(CoreError::Configuration(format!(
                "flux indicator '{}' has an empty source or sink set",
                definition.name
            )));
        }
        let mut source = vec![false; pools.len()];
        let mut sink = vec![false; pools.len()];
        for name in &definition.source_pools {
            source[pools.index_of(name)?] = true;
        }
        for name in &definition.sink_pools {
            sink[pools.index_of(name)?] = true;
        }
        Ok(Self {
            name: definition.name.clone(),
            process_id: definition.process_id,
            source,
            sink,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn process_id(&self) -> u16 {
        self.process_id
    }

    #[inline]
    pub fn is_source(&self, pool: usize) -> bool {
        self.source[pool]
    }

    #[inline]
    pub fn is_sink(&self, pool: usize) -> bool {
        self.sink[pool]
    }
}
