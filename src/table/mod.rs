//! # Wide draw tables
//!
//! A `WideTable` holds one row per `(chain, iteration, draw, row)` key and one
//! named value column per coefficient or contrast. Values live in a dense
//! `faer` matrix; keys and column metadata are kept alongside.

use std::collections::{HashMap, HashSet};

use faer::Mat;
use thiserror::Error;

use crate::draws::{DrawRecord, DrawTable};

pub mod render;

pub use render::{render_draws_preview, render_summary_table};

/// Errors raised while pivoting, merging, or extending tables.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("variable '{variable}' has {columns} distinct columns but {labels} labels were supplied")]
    LabelCountMismatch {
        variable: String,
        labels: usize,
        columns: usize,
    },
    #[error(
        "duplicate draw for {variable}[{row},{col}] at chain {chain_id}, iteration {iteration}, draw {draw}"
    )]
    DuplicateCell {
        variable: String,
        chain_id: u32,
        iteration: u32,
        draw: u32,
        row: usize,
        col: usize,
    },
    #[error("a wide table holds one variable; found {0:?}")]
    MixedVariables(Vec<String>),
    #[error("column '{0}' already exists")]
    DuplicateColumn(String),
    #[error("merge changed row count from {before} to {after}; row keys are not aligned")]
    RowCountChanged { before: usize, after: usize },
    #[error("{missing} of {rows} rows have no matching key on the right-hand side")]
    MissingKeys { missing: usize, rows: usize },
    #[error("column '{name}' has {len} values; expected {rows}")]
    ColumnLength {
        name: String,
        len: usize,
        rows: usize,
    },
    #[error("table has {keys} row keys but {rows} value rows")]
    KeyCountMismatch { keys: usize, rows: usize },
    #[error("table names {columns} columns but holds {values} value columns")]
    ColumnCountMismatch { columns: usize, values: usize },
}

/// Row key of a wide table. `row` is 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey {
    pub chain_id: u32,
    pub iteration: u32,
    pub draw: u32,
    pub row: usize,
}

/// Where a value column came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSource {
    /// Pivoted from `variable[.., col]` (0-based `col`).
    Coefficient { variable: String, col: usize },
    /// Derived by evaluating a contrast formula.
    Contrast { formula: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub source: ColumnSource,
}

#[derive(Debug, Clone)]
pub struct WideTable {
    keys: Vec<RowKey>,
    columns: Vec<Column>,
    values: Mat<f64>,
}

impl Default for WideTable {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            columns: Vec::new(),
            values: Mat::zeros(0, 0),
        }
    }
}

impl WideTable {
    /// # Errors
    ///
    /// Returns `TableError` if the value matrix does not match the key and
    /// column counts, or column names repeat.
    pub fn new(
        keys: Vec<RowKey>,
        columns: Vec<Column>,
        values: Mat<f64>,
    ) -> Result<Self, TableError> {
        if values.nrows() != keys.len() {
            return Err(TableError::KeyCountMismatch {
                keys: keys.len(),
                rows: values.nrows(),
            });
        }
        if values.ncols() != columns.len() {
            return Err(TableError::ColumnCountMismatch {
                columns: columns.len(),
                values: values.ncols(),
            });
        }
        let mut seen = HashSet::new();
        if let Some(dup) = columns.iter().find(|column| !seen.insert(column.name.as_str())) {
            return Err(TableError::DuplicateColumn(dup.name.clone()));
        }
        Ok(Self {
            keys,
            columns,
            values,
        })
    }

    #[must_use]
    pub const fn nrows(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub const fn ncols(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn keys(&self) -> &[RowKey] {
        &self.keys
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|column| column.name.as_str()).collect()
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    #[must_use]
    pub fn column_values(&self, name: &str) -> Option<Vec<f64>> {
        let col = self.column_index(name)?;
        Some((0..self.nrows()).map(|row| self.values[(row, col)]).collect())
    }

    #[must_use]
    pub fn value(&self, row: usize, col: usize) -> f64 {
        self.values[(row, col)]
    }

    #[must_use]
    pub const fn values(&self) -> &Mat<f64> {
        &self.values
    }

    /// Append one value column.
    ///
    /// # Errors
    ///
    /// Returns `TableError` if the name exists or the length is wrong.
    pub fn with_column(
        self,
        name: impl Into<String>,
        source: ColumnSource,
        values: Vec<f64>,
    ) -> Result<Self, TableError> {
        let name = name.into();
        if self.column_index(&name).is_some() {
            return Err(TableError::DuplicateColumn(name));
        }
        if values.len() != self.nrows() {
            return Err(TableError::ColumnLength {
                name,
                len: values.len(),
                rows: self.nrows(),
            });
        }
        let old_cols = self.ncols();
        let merged = Mat::from_fn(self.nrows(), old_cols + 1, |i, j| {
            if j < old_cols {
                self.values[(i, j)]
            } else {
                values[i]
            }
        });
        let mut columns = self.columns;
        columns.push(Column { name, source });
        Ok(Self {
            keys: self.keys,
            columns,
            values: merged,
        })
    }

    /// Left-join `right` on the full row key, appending its columns.
    ///
    /// The row count of `self` is preserved or the join fails. Left keys with
    /// no match are fatal unless `tolerate_missing` is set, in which case the
    /// appended cells are NaN.
    ///
    /// # Errors
    ///
    /// Returns `TableError::RowCountChanged` if a left key matches several
    /// right rows, `TableError::MissingKeys` for unmatched keys, and
    /// `TableError::DuplicateColumn` for clashing column names.
    pub fn left_join(&self, right: &Self, tolerate_missing: bool) -> Result<Self, TableError> {
        if let Some(dup) = right
            .columns
            .iter()
            .find(|column| self.column_index(&column.name).is_some())
        {
            return Err(TableError::DuplicateColumn(dup.name.clone()));
        }

        let mut right_rows: HashMap<RowKey, Vec<usize>> = HashMap::with_capacity(right.nrows());
        for (idx, key) in right.keys.iter().enumerate() {
            right_rows.entry(*key).or_default().push(idx);
        }

        let before = self.nrows();
        let mut after = 0usize;
        let mut missing = 0usize;
        let mut matched = Vec::with_capacity(before);
        for key in &self.keys {
            match right_rows.get(key).map(Vec::as_slice) {
                Some([single]) => {
                    after += 1;
                    matched.push(Some(*single));
                }
                Some(many) if !many.is_empty() => {
                    after += many.len();
                    matched.push(None);
                }
                _ => {
                    after += 1;
                    missing += 1;
                    matched.push(None);
                }
            }
        }

        if after != before {
            return Err(TableError::RowCountChanged { before, after });
        }
        if missing > 0 && !tolerate_missing {
            return Err(TableError::MissingKeys {
                missing,
                rows: before,
            });
        }

        let left_cols = self.ncols();
        let values = Mat::from_fn(before, left_cols + right.ncols(), |i, j| {
            if j < left_cols {
                self.values[(i, j)]
            } else {
                matched[i].map_or(f64::NAN, |r| right.values[(r, j - left_cols)])
            }
        });
        let mut columns = self.columns.clone();
        columns.extend(right.columns.iter().cloned());

        Ok(Self {
            keys: self.keys.clone(),
            columns,
            values,
        })
    }

    /// Melt coefficient columns back into long draw records.
    ///
    /// Contrast columns have no `(variable, col)` origin and are skipped.
    #[must_use]
    pub fn melt(&self) -> DrawTable {
        let mut records = Vec::with_capacity(self.nrows() * self.ncols());
        for (j, column) in self.columns.iter().enumerate() {
            let ColumnSource::Coefficient { variable, col } = &column.source else {
                continue;
            };
            for (i, key) in self.keys.iter().enumerate() {
                records.push(DrawRecord {
                    chain_id: key.chain_id,
                    iteration: key.iteration,
                    draw: key.draw,
                    variable: variable.clone(),
                    row: key.row,
                    col: *col,
                    value: self.values[(i, j)],
                });
            }
        }
        DrawTable::from_records(records)
    }
}
