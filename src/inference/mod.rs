//! Interface to the external inference engine.
//!
//! The engine is a black box exposing three things: the set of logical
//! variable names, a long draw table keyed by chain/iteration/draw, and a
//! summary table keyed by flat parameter name.

use std::collections::BTreeSet;

use thiserror::Error;

pub mod diagnostics;
pub mod memory;

pub use memory::InMemoryFit;

/// Errors for engine frames and the in-memory engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("draw frame key columns must have equal length (chain {chains}, iteration {iterations}, draw {draws})")]
    KeyLengthMismatch {
        chains: usize,
        iterations: usize,
        draws: usize,
    },
    #[error("draw column '{name}' has {len} values; expected {rows}")]
    DrawColumnLength {
        name: String,
        len: usize,
        rows: usize,
    },
    #[error("summary column '{name}' has {len} values; expected {rows}")]
    SummaryColumnLength {
        name: String,
        len: usize,
        rows: usize,
    },
    #[error("chain {chain_id} provides {found} parameters; expected {expected}")]
    ChainParameterCount {
        chain_id: u32,
        found: usize,
        expected: usize,
    },
    #[error("parameter '{name}' in chain {chain_id} has {found} draws; expected {expected}")]
    ChainDrawCount {
        chain_id: u32,
        name: String,
        found: usize,
        expected: usize,
    },
    #[error("chain id {0} is registered twice")]
    DuplicateChain(u32),
    #[error("quantile {0} must lie in [0, 100]")]
    InvalidQuantile(String),
}

/// A posterior fit produced by an external engine.
///
/// Matrix coefficients are expected as `name[category, factor]`; fits that
/// store them as `name[factor, category]` are read with
/// `CoefficientLayout::FactorByCategory`.
pub trait PosteriorFit {
    /// Logical variable names, e.g. `beta` for `beta[1,2]`.
    fn variable_names(&self) -> BTreeSet<String>;

    /// Long draw table holding every flat parameter of the requested
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns `InferenceError` if the engine cannot produce the frame.
    fn draws_long(&self, variables: &[String]) -> Result<DrawFrame, InferenceError>;

    /// Summary table for every flat parameter with mean and the requested
    /// quantiles (given in percent).
    ///
    /// # Errors
    ///
    /// Returns `InferenceError` if the engine cannot produce the summary.
    fn summary(&self, quantiles: &[f64]) -> Result<SummaryFrame, InferenceError>;
}

impl<F: PosteriorFit + ?Sized> PosteriorFit for &F {
    fn variable_names(&self) -> BTreeSet<String> {
        (**self).variable_names()
    }

    fn draws_long(&self, variables: &[String]) -> Result<DrawFrame, InferenceError> {
        (**self).draws_long(variables)
    }

    fn summary(&self, quantiles: &[f64]) -> Result<SummaryFrame, InferenceError> {
        (**self).summary(quantiles)
    }
}

/// One named draw column of a `DrawFrame`.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawColumn {
    pub name: String,
    pub values: Vec<f64>,
}

/// Engine draw table: one row per (chain, iteration, draw) and one column per
/// flat parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawFrame {
    pub chain_ids: Vec<u32>,
    pub iterations: Vec<u32>,
    pub draws: Vec<u32>,
    pub columns: Vec<DrawColumn>,
}

impl DrawFrame {
    #[must_use]
    pub const fn nrows(&self) -> usize {
        self.chain_ids.len()
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|column| column.name == name)
            .map(|column| column.values.as_slice())
    }

    /// # Errors
    ///
    /// Returns `InferenceError` if key or draw columns disagree in length.
    pub fn validate(&self) -> Result<(), InferenceError> {
        let rows = self.chain_ids.len();
        if self.iterations.len() != rows || self.draws.len() != rows {
            return Err(InferenceError::KeyLengthMismatch {
                chains: rows,
                iterations: self.iterations.len(),
                draws: self.draws.len(),
            });
        }
        if let Some(column) = self.columns.iter().find(|c| c.values.len() != rows) {
            return Err(InferenceError::DrawColumnLength {
                name: column.name.clone(),
                len: column.values.len(),
                rows,
            });
        }
        Ok(())
    }
}

/// Engine summary table indexed by flat parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryFrame {
    pub names: Vec<String>,
    pub columns: Vec<(String, Vec<f64>)>,
}

impl SummaryFrame {
    #[must_use]
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names,
            columns: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_column(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.columns.push((name.into(), values));
        self
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, values)| values.as_slice())
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// # Errors
    ///
    /// Returns `InferenceError` if a column length differs from the row count.
    pub fn validate(&self) -> Result<(), InferenceError> {
        let rows = self.names.len();
        if let Some((name, values)) = self.columns.iter().find(|(_, v)| v.len() != rows) {
            return Err(InferenceError::SummaryColumnLength {
                name: name.clone(),
                len: values.len(),
                rows,
            });
        }
        Ok(())
    }
}
