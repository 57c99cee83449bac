//! Credible-interval and convergence summaries indexed by `(variable, row, col)`.

use log::debug;

use super::{ReshapeError, compile_pattern, flat_name_pattern};
use crate::inference::{PosteriorFit, SummaryFrame};
use crate::utils::quantile_column_name;

/// Quantiles (percent) requested from the engine by default.
pub const DEFAULT_QUANTILES: [f64; 5] = [5.0, 25.0, 50.0, 75.0, 95.0];

/// Engine column names accepted for the R-hat diagnostic, in lookup order.
pub const R_HAT_COLUMNS: [&str; 3] = ["R_hat", "Rhat", "khat"];

pub const EFFECTIVE_SAMPLE_SIZE_COLUMN: &str = "N_Eff";
pub const MEAN_COLUMN: &str = "Mean";

/// Label of the unified R-hat / k-hat diagnostic.
pub const R_K_HAT_LABEL: &str = "R_k_hat";

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRecord {
    pub variable: String,
    /// 0-based.
    pub row: usize,
    /// 0-based; `None` for vector-shaped summaries.
    pub col: Option<usize>,
    pub mean: f64,
    /// Aligned with `SummaryTable::quantiles`.
    pub quantiles: Vec<f64>,
    /// NaN when the engine does not report it.
    pub effective_sample_size: f64,
    /// NaN when the engine does not report it.
    pub r_k_hat: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryTable {
    quantiles: Vec<f64>,
    records: Vec<SummaryRecord>,
}

impl SummaryTable {
    #[must_use]
    pub fn quantiles(&self) -> &[f64] {
        &self.quantiles
    }

    #[must_use]
    pub fn quantile_names(&self) -> Vec<String> {
        self.quantiles.iter().map(|q| quantile_column_name(*q)).collect()
    }

    #[must_use]
    pub fn records(&self) -> &[SummaryRecord] {
        &self.records
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Value of the quantile `percent` for `record`, if it was requested.
    #[must_use]
    pub fn quantile(&self, record: &SummaryRecord, percent: f64) -> Option<f64> {
        self.quantiles
            .iter()
            .position(|q| (q - percent).abs() < 1e-9)
            .and_then(|idx| record.quantiles.get(idx).copied())
    }

    #[must_use]
    pub fn find(&self, variable: &str, row: usize, col: Option<usize>) -> Option<&SummaryRecord> {
        self.records
            .iter()
            .find(|record| record.variable == variable && record.row == row && record.col == col)
    }

    /// Swap `row` and `col` of every matrix-shaped record; vector-shaped
    /// records are left alone.
    #[must_use]
    pub fn transposed(self) -> Self {
        let records = self
            .records
            .into_iter()
            .map(|record| match record.col {
                Some(col) => SummaryRecord {
                    row: col,
                    col: Some(record.row),
                    ..record
                },
                None => record,
            })
            .collect();
        Self {
            quantiles: self.quantiles,
            records,
        }
    }

    #[must_use]
    pub fn filter_variable(self, variable: &str) -> Self {
        Self {
            quantiles: self.quantiles,
            records: self
                .records
                .into_iter()
                .filter(|record| record.variable == variable)
                .collect(),
        }
    }
}

/// Reshape an engine summary for the parameters matching `variable_pattern`.
///
/// Names are split on brackets, commas and whitespace into `variable`, `row`
/// and (with `has_col`) `col`; rows whose indices cannot be read are dropped.
/// `N_Eff` and R-hat default to NaN when absent.
///
/// # Errors
///
/// Returns `ReshapeError` for an invalid pattern, a malformed frame, or a
/// missing `Mean`/quantile column.
pub fn reshape_summary(
    summary: &SummaryFrame,
    variable_pattern: &str,
    has_col: bool,
    quantiles: &[f64],
) -> Result<SummaryTable, ReshapeError> {
    summary.validate()?;
    let pattern = compile_pattern(variable_pattern)?;

    let mean = required_column(summary, MEAN_COLUMN)?;
    let quantile_columns = quantiles
        .iter()
        .map(|q| required_column(summary, &quantile_column_name(*q)))
        .collect::<Result<Vec<_>, _>>()?;
    let ess = summary.column(EFFECTIVE_SAMPLE_SIZE_COLUMN);
    let r_hat = R_HAT_COLUMNS.iter().find_map(|name| summary.column(name));

    let mut records = Vec::new();
    let mut dropped = 0usize;
    for (idx, name) in summary.names.iter().enumerate() {
        if !pattern.is_match(name) {
            continue;
        }
        let Some((variable, row, col)) = split_summary_name(name, has_col) else {
            dropped += 1;
            continue;
        };
        records.push(SummaryRecord {
            variable,
            row,
            col,
            mean: mean[idx],
            quantiles: quantile_columns.iter().map(|column| column[idx]).collect(),
            effective_sample_size: ess.map_or(f64::NAN, |values| values[idx]),
            r_k_hat: r_hat.map_or(f64::NAN, |values| values[idx]),
        });
    }
    if dropped > 0 {
        debug!("dropped {dropped} summary rows without readable indices");
    }

    Ok(SummaryTable {
        quantiles: quantiles.to_vec(),
        records,
    })
}

/// Request a summary from `fit` and reshape it.
///
/// # Errors
///
/// Returns `ReshapeError` if the engine fails or the summary is malformed.
pub fn summarize_fit<F: PosteriorFit + ?Sized>(
    fit: &F,
    variable_pattern: &str,
    has_col: bool,
    quantiles: &[f64],
) -> Result<SummaryTable, ReshapeError> {
    let summary = fit.summary(quantiles)?;
    reshape_summary(&summary, variable_pattern, has_col, quantiles)
}

/// Summarise exactly one `[row,col]` variable; `random_effect` does not pick
/// up `random_effect_2`.
///
/// # Errors
///
/// Returns `ReshapeError` if the engine fails or the summary is malformed.
pub fn summarize_variable<F: PosteriorFit + ?Sized>(
    fit: &F,
    variable: &str,
    quantiles: &[f64],
) -> Result<SummaryTable, ReshapeError> {
    let summary = summarize_fit(fit, &flat_name_pattern(variable), true, quantiles)?;
    Ok(summary.filter_variable(variable))
}

fn required_column<'a>(summary: &'a SummaryFrame, name: &str) -> Result<&'a [f64], ReshapeError> {
    summary
        .column(name)
        .ok_or_else(|| ReshapeError::MissingSummaryColumn(name.to_string()))
}

fn split_summary_name(name: &str, has_col: bool) -> Option<(String, usize, Option<usize>)> {
    let mut tokens = name
        .split(|c: char| c == '[' || c == ']' || c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty());
    let variable = tokens.next()?.to_string();
    let row = tokens.next()?.parse::<usize>().ok()?.checked_sub(1)?;
    let col = if has_col {
        Some(tokens.next()?.parse::<usize>().ok()?.checked_sub(1)?)
    } else {
        None
    };
    Some((variable, row, col))
}
