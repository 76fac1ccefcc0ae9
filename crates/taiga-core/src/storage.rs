//! Columnar per-stand variable storage.
//!
//! A [`VariableTable`] is a set of equally sized named columns, one value
//! per stand. The kernel consumes dense contiguous buffers; the matrix-op
//! assembly layer consumes this table form for human-readable
//! specifications and parameter buckets.

use crate::errors::{CoreError, CoreResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Typed column data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Column {
    F64(Vec<f64>),
    I32(Vec<i32>),
    Bool(Vec<bool>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::F64(v) => v.len(),
            Column::I32(v) => v.len(),
            Column::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn type_name(&self) -> &'static str {
        match self {
            Column::F64(_) => "f64",
            Column::I32(_) => "i32",
            Column::Bool(_) => "bool",
        }
    }
}

/// A named typed column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    name: String,
    data: Column,
}

impl Series {
    pub fn f64(name: impl Into<String>, data: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            data: Column::F64(data),
        }
    }

    pub fn i32(name: impl Into<String>, data: Vec<i32>) -> Self {
        Self {
            name: name.into(),
            data: Column::I32(data),
        }
    }

    pub fn bool(name: impl Into<String>, data: Vec<bool>) -> Self {
        Self {
            name: name.into(),
            data: Column::Bool(data),
        }
    }

    /// A column filled with one repeated value.
    pub fn broadcast_f64(name: impl Into<String>, value: f64, n: usize) -> Self {
        Self::f64(name, vec![value; n])
    }

    pub fn broadcast_i32(name: impl Into<String>, value: i32, n: usize) -> Self {
        Self::i32(name, vec![value; n])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn type_error(&self, wanted: &str) -> CoreError {
        CoreError::Configuration(format!(
            "column '{}' is {}, expected {}",
            self.name,
            self.data.type_name(),
            wanted
        ))
    }

    pub fn as_f64(&self) -> CoreResult<&[f64]> {
        match &self.data {
            Column::F64(v) => Ok(v),
            _ => Err(self.type_error("f64")),
        }
    }

    pub fn as_i32(&self) -> CoreResult<&[i32]> {
        match &self.data {
            Column::I32(v) => Ok(v),
            _ => Err(self.type_error("i32")),
        }
    }

    pub fn as_bool(&self) -> CoreResult<&[bool]> {
        match &self.data {
            Column::Bool(v) => Ok(v),
            _ => Err(self.type_error("bool")),
        }
    }

    pub fn as_f64_mut(&mut self) -> CoreResult<&mut [f64]> {
        match &mut self.data {
            Column::F64(v) => Ok(v),
            _ => Err(CoreError::Configuration(format!(
                "column '{}' is not f64",
                self.name
            ))),
        }
    }

    pub fn as_i32_mut(&mut self) -> CoreResult<&mut [i32]> {
        match &mut self.data {
            Column::I32(v) => Ok(v),
            _ => Err(CoreError::Configuration(format!(
                "column '{}' is not i32",
                self.name
            ))),
        }
    }

    /// Broadcast a scalar over the whole column.
    pub fn fill_f64(&mut self, value: f64) -> CoreResult<()> {
        self.as_f64_mut()?.fill(value);
        Ok(())
    }

    /// Assign an aligned vector.
    pub fn assign_f64(&mut self, values: &[f64]) -> CoreResult<()> {
        let dst = self.as_f64_mut()?;
        if dst.len() != values.len() {
            return Err(CoreError::Dimension(format!(
                "assigning {} values to a column of length {}",
                values.len(),
                dst.len()
            )));
        }
        dst.copy_from_slice(values);
        Ok(())
    }

    /// Assign a scalar where the mask is set.
    pub fn assign_f64_where(&mut self, mask: &[bool], value: f64) -> CoreResult<()> {
        let dst = self.as_f64_mut()?;
        if dst.len() != mask.len() {
            return Err(CoreError::Dimension(format!(
                "mask of length {} for a column of length {}",
                mask.len(),
                dst.len()
            )));
        }
        for (d, &m) in dst.iter_mut().zip(mask) {
            if m {
                *d = value;
            }
        }
        Ok(())
    }

    /// Add an aligned vector in place.
    pub fn add_assign_f64(&mut self, values: &[f64]) -> CoreResult<()> {
        let dst = self.as_f64_mut()?;
        if dst.len() != values.len() {
            return Err(CoreError::Dimension(format!(
                "adding {} values to a column of length {}",
                values.len(),
                dst.len()
            )));
        }
        for (d, v) in dst.iter_mut().zip(values) {
            *d += v;
        }
        Ok(())
    }

    pub fn zero(&mut self) {
        match &mut self.data {
            Column::F64(v) => v.fill(0.0),
            Column::I32(v) => v.fill(0),
            Column::Bool(v) => v.fill(false),
        }
    }

    /// Gather a subset of rows into a new series.
    pub fn gather(&self, rows: &[usize]) -> Series {
        let data = match &self.data {
            Column::F64(v) => Column::F64(rows.iter().map(|&i| v[i]).collect()),
            Column::I32(v) => Column::I32(rows.iter().map(|&i| v[i]).collect()),
            Column::Bool(v) => Column::Bool(rows.iter().map(|&i| v[i]).collect()),
        };
        Series {
            name: self.name.clone(),
            data,
        }
    }
}

/// Ordered named columns of equal length.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableTable {
    columns: IndexMap<String, Series>,
    n_rows: usize,
}

impl VariableTable {
    pub fn new(columns: Vec<Series>) -> CoreResult<Self> {
        let mut table = Self {
            columns: IndexMap::with_capacity(columns.len()),
            n_rows: 0,
        };
        for series in columns {
            table.add_column(series)?;
        }
        Ok(table)
    }

    pub fn add_column(&mut self, series: Series) -> CoreResult<()> {
        if self.columns.is_empty() {
            self.n_rows = series.len();
        } else if series.len() != self.n_rows {
            return Err(CoreError::Dimension(format!(
                "column '{}' has {} rows, table has {}",
                series.name(),
                series.len(),
                self.n_rows
            )));
        }
        let name = series.name().to_string();
        if self.columns.insert(name.clone(), series).is_some() {
            return Err(CoreError::Configuration(format!(
                "duplicate column '{name}'"
            )));
        }
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> CoreResult<&Series> {
        self.columns.get(name).ok_or_else(|| {
            CoreError::Configuration(format!("table has no column '{name}'"))
        })
    }

    pub fn column_mut(&mut self, name: &str) -> CoreResult<&mut Series> {
        self.columns.get_mut(name).ok_or_else(|| {
            CoreError::Configuration(format!("table has no column '{name}'"))
        })
    }

    pub fn f64(&self, name: &str) -> CoreResult<&[f64]> {
        self.column(name)?.as_f64()
    }

    pub fn i32(&self, name: &str) -> CoreResult<&[i32]> {
        self.column(name)?.as_i32()
    }

    pub fn bool(&self, name: &str) -> CoreResult<&[bool]> {
        self.column(name)?.as_bool()
    }

    /// Gather a subset of rows across all columns.
    pub fn gather(&self, rows: &[usize]) -> VariableTable {
        let mut table = VariableTable {
            columns: IndexMap::with_capacity(self.columns.len()),
            n_rows: rows.len(),
        };
        for series in self.columns.values() {
            table
                .columns
                .insert(series.name().to_string(), series.gather(rows));
        }
        table
    }

    /// Zero every column.
    pub fn zero(&mut self) {
        for series in self.columns.values_mut() {
            series.zero();
        }
    }
}
