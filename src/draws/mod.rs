//! # Draw and summary reshaping
//!
//! Turns the engine's flat, name-indexed draws and summaries into records
//! indexed by `(variable, row, col)`.

use std::collections::BTreeSet;

use regex::Regex;
use thiserror::Error;

use crate::inference::InferenceError;
use crate::table::TableError;

pub mod index;
pub mod reshape;
pub mod summary;

pub use index::{ParameterIndex, variable_component};
pub use reshape::{reshape_draws, reshape_variable_draws};
pub use summary::{
    DEFAULT_QUANTILES, R_HAT_COLUMNS, SummaryRecord, SummaryTable, reshape_summary,
    summarize_fit, summarize_variable,
};

/// Errors returned by the draw and summary reshapers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReshapeError {
    #[error("invalid variable pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("summary is missing required column '{0}'")]
    MissingSummaryColumn(String),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Table(#[from] TableError),
}

/// One posterior draw of one matrix cell. `row` and `col` are 0-based;
/// `draw` is a dense 1-based sequence within each `(variable, row, col)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub chain_id: u32,
    pub iteration: u32,
    pub draw: u32,
    pub variable: String,
    pub row: usize,
    pub col: usize,
    pub value: f64,
}

/// Long draw table in canonical `(variable, row, col, chain, iteration)`
/// order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawTable {
    records: Vec<DrawRecord>,
}

impl DrawTable {
    /// Wrap records, sorting them stably into canonical order.
    #[must_use]
    pub fn from_records(mut records: Vec<DrawRecord>) -> Self {
        records.sort_by(|a, b| {
            a.variable
                .cmp(&b.variable)
                .then(a.row.cmp(&b.row))
                .then(a.col.cmp(&b.col))
                .then(a.chain_id.cmp(&b.chain_id))
                .then(a.iteration.cmp(&b.iteration))
        });
        Self { records }
    }

    #[must_use]
    pub fn records(&self) -> &[DrawRecord] {
        &self.records
    }

    #[must_use]
    pub fn into_records(self) -> Vec<DrawRecord> {
        self.records
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct variable names, sorted.
    #[must_use]
    pub fn variables(&self) -> Vec<String> {
        self.records
            .iter()
            .map(|record| record.variable.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Keep only records of exactly `variable`.
    #[must_use]
    pub fn filter_variable(self, variable: &str) -> Self {
        Self {
            records: self
                .records
                .into_iter()
                .filter(|record| record.variable == variable)
                .collect(),
        }
    }

    /// Swap the `row` and `col` index of every record.
    ///
    /// Draw numbers are kept: they are dense per cell, which a swap preserves.
    #[must_use]
    pub fn transposed(self) -> Self {
        let records = self
            .records
            .into_iter()
            .map(|record| DrawRecord {
                row: record.col,
                col: record.row,
                ..record
            })
            .collect();
        Self::from_records(records)
    }

    /// Reassign `draw` as `1..=N` within each `(variable, row, col)` group,
    /// following the canonical chain-then-iteration order.
    #[must_use]
    pub fn renumber_draws(self) -> Self {
        let mut records = Self::from_records(self.records).records;
        let mut next = 0u32;
        let mut previous: Option<(String, usize, usize)> = None;
        for record in &mut records {
            let same_group = previous.as_ref().is_some_and(|(variable, row, col)| {
                *variable == record.variable && *row == record.row && *col == record.col
            });
            if !same_group {
                next = 0;
                previous = Some((record.variable.clone(), record.row, record.col));
            }
            next += 1;
            record.draw = next;
        }
        Self { records }
    }
}

pub(crate) fn compile_pattern(pattern: &str) -> Result<Regex, ReshapeError> {
    Regex::new(pattern).map_err(|err| ReshapeError::InvalidPattern {
        pattern: pattern.to_string(),
        message: err.to_string(),
    })
}

/// Pattern matching exactly one variable name.
pub(crate) fn exact_variable_pattern(variable: &str) -> String {
    format!("^{}$", regex::escape(variable))
}

/// Pattern matching the flat names of one variable's entries (`beta[1,2]`),
/// optionally behind a numeric chain prefix.
pub(crate) fn flat_name_pattern(variable: &str) -> String {
    format!(r"^(?:[0-9]+\.)?{}\[", regex::escape(variable))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(variable: &str, chain_id: u32, iteration: u32, row: usize, col: usize) -> DrawRecord {
        DrawRecord {
            chain_id,
            iteration,
            draw: 0,
            variable: variable.to_string(),
            row,
            col,
            value: 0.0,
        }
    }

    #[test]
    fn from_records_sorts_canonically() {
        let table = DrawTable::from_records(vec![
            record("b", 1, 1, 0, 0),
            record("a", 2, 1, 0, 1),
            record("a", 1, 2, 0, 1),
            record("a", 1, 1, 0, 1),
        ]);
        let order = table
            .records()
            .iter()
            .map(|r| (r.variable.as_str(), r.chain_id, r.iteration))
            .collect::<Vec<_>>();
        assert_eq!(order, vec![("a", 1, 1), ("a", 1, 2), ("a", 2, 1), ("b", 1, 1)]);
    }

    #[test]
    fn renumber_restarts_per_group() {
        let table = DrawTable::from_records(vec![
            record("a", 2, 1, 0, 0),
            record("a", 1, 1, 0, 0),
            record("a", 1, 2, 0, 0),
            record("a", 1, 1, 0, 1),
            record("a", 2, 1, 0, 1),
        ])
        .renumber_draws();
        let draws = table.records().iter().map(|r| r.draw).collect::<Vec<_>>();
        assert_eq!(draws, vec![1, 2, 3, 1, 2]);
        assert_eq!(table.records()[2].chain_id, 2);
    }

    #[test]
    fn filter_variable_is_exact() {
        let table = DrawTable::from_records(vec![
            record("random_effect", 1, 1, 0, 0),
            record("random_effect_2", 1, 1, 0, 0),
        ]);
        let filtered = table.filter_variable("random_effect");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.variables(), vec!["random_effect".to_string()]);
    }

    #[test]
    fn transposed_swaps_indices_and_keeps_draws() {
        let table = DrawTable::from_records(vec![
            record("beta", 1, 1, 0, 1),
            record("beta", 1, 2, 0, 1),
            record("beta", 1, 1, 1, 0),
        ])
        .renumber_draws();
        let transposed = table.clone().transposed();
        let cells = transposed
            .records()
            .iter()
            .map(|r| (r.row, r.col, r.draw))
            .collect::<Vec<_>>();
        assert_eq!(cells, vec![(0, 1, 1), (1, 0, 1), (1, 0, 2)]);
        assert_eq!(transposed.transposed(), table);
    }

    #[test]
    fn invalid_patterns_are_reported() {
        let err = compile_pattern("beta[").expect_err("unclosed class");
        assert!(matches!(err, ReshapeError::InvalidPattern { .. }));
        let exact = compile_pattern(&exact_variable_pattern("x.y")).expect("escaped");
        assert!(exact.is_match("x.y"));
        assert!(!exact.is_match("xzy"));
    }

    #[test]
    fn flat_name_pattern_matches_indexed_entries_only() {
        let flat = compile_pattern(&flat_name_pattern("random_effect")).expect("escaped");
        assert!(flat.is_match("random_effect[1,2]"));
        assert!(flat.is_match("2.random_effect[1,2]"));
        assert!(!flat.is_match("random_effect_2[1,2]"));
        assert!(!flat.is_match("random_effect"));
    }
}
