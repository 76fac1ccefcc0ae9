//! Tabular matrix-op specifications.
//!
//! The assembly layer accepts operations written as tables: each row is one
//! matrix (a parameter bucket), and column names carry the meaning. A
//! column named `Merch.StemSnag` holds the Merch→StemSnag coefficient of
//! each bucket; a column named `[inventory.spatial_unit]` declares a lookup
//! dimension that selects the bucket for each stand. Column names are
//! parsed once into an [`OpSpec`], never re-parsed per step.
//!
//! Row-count semantics when building an operation:
//! * one row — the single matrix is broadcast to every stand;
//! * one row per stand, no lookup columns — stand i uses matrix i;
//! * otherwise — rows are parameter buckets and each stand's lookup-key
//!   tuple is merged against the bucket keys.

use crate::errors::{CoreError, CoreResult};
use crate::matrix::MatrixBase;
use crate::ops::{CoordColumn, Operation};
use crate::pools::Pools;
use crate::storage::VariableTable;
use std::collections::HashMap;

/// A view of one per-stand column supplied by the simulation state.
#[derive(Debug, Clone, Copy)]
pub enum ColumnView<'a> {
    F64(&'a [f64]),
    I32(&'a [i32]),
    Bool(&'a [bool]),
}

/// Source of per-stand columns, addressed as `(table, column)`.
///
/// Implemented by the simulation-variable bundle so op specifications can
/// declare lookup dimensions like `[state.spatial_unit]`.
pub trait ColumnSource {
    fn lookup(&self, table: &str, column: &str) -> CoreResult<ColumnView<'_>>;
}

/// One classified specification column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecColumn {
    /// `SRC.SINK`: a coefficient cell, resolved to pool indices.
    Coefficient { source: usize, sink: usize },
    /// `[table.var]`: a lookup dimension.
    Key { table: String, column: String },
}

/// A parsed op specification.
#[derive(Debug, Clone)]
pub struct OpSpec {
    name: String,
    process_id: u16,
    columns: Vec<(String, SpecColumn)>,
}

impl OpSpec {
    /// Classify column names once against the pool registry.
    pub fn parse(
        name: impl Into<String>,
        process_id: u16,
        column_names: &[String],
        pools: &Pools,
    ) -> CoreResult<Self> {
        let name = name.into();
        let mut columns = Vec::with_capacity(column_names.len());
        for raw in column_names {
            let spec = if let Some(key) = raw.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                let (table, column) = key.split_once('.').ok_or_else(|| {
                    CoreError::Configuration(format!(
                        "op '{name}': lookup column '{raw}' is not of the form [table.var]"
                    ))
                })?;
                SpecColumn::Key {
                    table: table.to_string(),
                    column: column.to_string(),
                }
            } else {
                let (source, sink) = raw.split_once('.').ok_or_else(|| {
                    CoreError::Configuration(format!(
                        "op '{name}': column '{raw}' is neither SRC.SINK nor [table.var]"
                    ))
                })?;
                SpecColumn::Coefficient {
                    source: pools.index_of(source)?,
                    sink: pools.index_of(sink)?,
                }
            };
            columns.push((raw.clone(), spec));
        }
        Ok(Self {
            name,
            process_id,
            columns,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn process_id(&self) -> u16 {
        self.process_id
    }

    fn key_columns(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.columns.iter().filter_map(|(raw, spec)| match spec {
            SpecColumn::Key { table, column } => Some((raw.as_str(), table.as_str(), column.as_str())),
            _ => None,
        })
    }

    /// Build the operation for the current stand population.
    ///
    /// `data` holds one row per matrix with the coefficient and key columns
    /// named by this spec; `source` supplies the per-stand lookup columns;
    /// diagonals are implied per `base`.
    pub fn build(
        &self,
        data: &VariableTable,
        source: &dyn ColumnSource,
        n_stands: usize,
        base: MatrixBase,
        pools: &Pools,
    ) -> CoreResult<Operation> {
        let mut coords = Vec::new();
        for (raw, spec) in &self.columns {
            if let SpecColumn::Coefficient { source: src, sink } = spec {
                coords.push(CoordColumn::per_matrix(
                    *src,
                    *sink,
                    data.f64(raw)?.to_vec(),
                ));
            }
        }
        if coords.is_empty() {
            return Err(CoreError::Configuration(format!(
                "op '{}' defines no coefficient columns",
                self.name
            )));
        }
        let matrix_index = self.merge_index(data, source, n_stands)?;
        Operation::from_coordinates(
            pools.len(),
            base,
            &coords,
            matrix_index,
            self.process_id,
            Some(pools.input_index()),
        )
    }

    /// Resolve each stand's matrix index against the bucket rows.
    pub fn merge_index(
        &self,
        data: &VariableTable,
        source: &dyn ColumnSource,
        n_stands: usize,
    ) -> CoreResult<Vec<u32>> {
        let n_buckets = data.n_rows();
        let keys: Vec<_> = self.key_columns().collect();
        if keys.is_empty() {
            if n_buckets == 1 {
                return Ok(vec![0; n_stands]);
            }
            if n_buckets == n_stands {
                return Ok((0..n_stands as u32).collect());
            }
            return Err(CoreError::Dimension(format!(
                "op '{}' has {} rows for {} stands and no lookup columns",
                self.name, n_buckets, n_stands
            )));
        }

        let bucket_keys: Vec<&[i32]> = keys
            .iter()
            .map(|(raw, _, _)| data.i32(raw))
            .collect::<CoreResult<_>>()?;
        let mut index: HashMap<Vec<i32>, u32> = HashMap::with_capacity(n_buckets);
        for row in 0..n_buckets {
            let key: Vec<i32> = bucket_keys.iter().map(|col| col[row]).collect();
            if index.insert(key.clone(), row as u32).is_some() {
                return Err(CoreError::Configuration(format!(
                    "op '{}': duplicate parameter bucket for key {:?}",
                    self.name, key
                )));
            }
        }

        let stand_keys: Vec<&[i32]> = keys
            .iter()
            .map(|(_, table, column)| match source.lookup(table, column)? {
                ColumnView::I32(values) => {
                    if values.len() != n_stands {
                        return Err(CoreError::Dimension(format!(
                            "lookup column [{table}.{column}] has {} rows, expected {}",
                            values.len(),
                            n_stands
                        )));
                    }
                    Ok(values)
                }
                _ => Err(CoreError::Configuration(format!(
                    "lookup column [{table}.{column}] must be i32"
                ))),
            })
            .collect::<CoreResult<_>>()?;

        let mut matrix_index = Vec::with_capacity(n_stands);
        let mut key = Vec::with_capacity(keys.len());
        for stand in 0..n_stands {
            key.clear();
            key.extend(stand_keys.iter().map(|col| col[stand]));
            let bucket = index.get(&key).ok_or_else(|| {
                CoreError::Configuration(format!(
                    "op '{}': no parameter bucket for stand {} key {:?}",
                    self.name, stand, key
                ))
            })?;
            matrix_index.push(*bucket);
        }
        Ok(matrix_index)
    }
}
