/////////////////////////////////////////////////////////////////////////////////////////////\
//
// Abundance contrast draws and their convergence summaries.
//
// Created on: 18 Oct 2026     Author: Tobias Kragholm
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Abundance contrast draws
//!
//! Composes the reshaping, pivoting, merging and contrast steps into the
//! per-draw coefficient table of a compositional abundance fit:
//!
//! 1. the fixed-effect matrix (`beta`) is pivoted to one column per design
//!    label and one row per `(chain, iteration, draw, category)`;
//! 2. each random-effect group gains its reference level, is pivoted the same
//!    way and left-joined on the full row key;
//! 3. contrasts, if any, are appended;
//! 4. every row is labelled with its outcome category;
//! 5. convergence diagnostics of the fixed effects are attached.
//!
//! A table with no value columns short-circuits to the list of categories.

use std::collections::BTreeSet;

use log::debug;
use thiserror::Error;

use crate::contrast::{ContrastError, ContrastSet, ContrastWarning, apply_contrasts};
use crate::draws::{
    DrawTable, ReshapeError, SummaryRecord, SummaryTable, reshape_variable_draws,
    summarize_variable,
};
use crate::inference::PosteriorFit;
use crate::input::{
    AbundanceOptions, CoefficientLayout, InputError, ModelDescription, RandomEffectGroup,
};
use crate::table::{ColumnSource, TableError, WideTable, render_draws_preview};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlignmentError {
    #[error("{rows} rows reference outcome categories beyond the {categories} named ones (first: row {first})")]
    UnlabelledRows {
        rows: usize,
        first: usize,
        categories: usize,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AbundanceError {
    #[error("the fit has no draws for random-effect variable '{0}'")]
    MissingDraws(String),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Reshape(#[from] ReshapeError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Contrast(#[from] ContrastError),
    #[error(transparent)]
    Alignment(#[from] AlignmentError),
}

/// A fit together with its description and pipeline options.
#[derive(Debug, Clone)]
pub struct AbundanceModel<F> {
    pub fit: F,
    pub description: ModelDescription,
    pub options: AbundanceOptions,
}

impl<F: PosteriorFit> AbundanceModel<F> {
    #[must_use]
    pub fn new(fit: F, description: ModelDescription) -> Self {
        Self {
            fit,
            description,
            options: AbundanceOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(self, options: AbundanceOptions) -> Self {
        Self { options, ..self }
    }

    /// See [`get_abundance_contrast_draws`].
    ///
    /// # Errors
    ///
    /// Returns `AbundanceError` if any pipeline step fails.
    pub fn contrast_draws(
        &self,
        contrasts: Option<&ContrastSet>,
    ) -> Result<AbundanceContrasts, AbundanceError> {
        get_abundance_contrast_draws(self, contrasts)
    }
}

/// One outcome category and its 0-based row index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupLabel {
    pub label: String,
    pub row: usize,
}

/// Wide draws whose rows are all labelled with an outcome category.
#[derive(Debug, Clone)]
pub struct LabelledDraws {
    category_names: Vec<String>,
    table: WideTable,
}

impl LabelledDraws {
    /// # Errors
    ///
    /// Returns `AlignmentError::UnlabelledRows` if a row index has no
    /// category name.
    pub fn new(table: WideTable, category_names: Vec<String>) -> Result<Self, AlignmentError> {
        let unlabelled = table
            .keys()
            .iter()
            .filter(|key| key.row >= category_names.len())
            .map(|key| key.row)
            .collect::<Vec<_>>();
        if let Some(first) = unlabelled.iter().copied().min() {
            return Err(AlignmentError::UnlabelledRows {
                rows: unlabelled.len(),
                first,
                categories: category_names.len(),
            });
        }
        Ok(Self {
            category_names,
            table,
        })
    }

    #[must_use]
    pub const fn table(&self) -> &WideTable {
        &self.table
    }

    #[must_use]
    pub fn into_table(self) -> WideTable {
        self.table
    }

    #[must_use]
    pub fn category_names(&self) -> &[String] {
        &self.category_names
    }

    /// Category label of table row `index`.
    #[must_use]
    pub fn label(&self, index: usize) -> Option<&str> {
        let key = self.table.keys().get(index)?;
        self.category_names.get(key.row).map(String::as_str)
    }

    /// Distinct `(label, row)` pairs present in the table, by row.
    #[must_use]
    pub fn groups(&self) -> Vec<GroupLabel> {
        self.table
            .keys()
            .iter()
            .map(|key| key.row)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|row| GroupLabel {
                label: self.category_names[row].clone(),
                row,
            })
            .collect()
    }

    /// Values of column `name` for every row labelled `label`, in table order.
    #[must_use]
    pub fn values_for(&self, label: &str, name: &str) -> Option<Vec<f64>> {
        let row = self.category_names.iter().position(|c| c == label)?;
        let col = self.table.column_index(name)?;
        Some(
            self.table
                .keys()
                .iter()
                .enumerate()
                .filter(|(_, key)| key.row == row)
                .map(|(i, _)| self.table.value(i, col))
                .collect(),
        )
    }

    #[must_use]
    pub fn render_preview(&self, max_rows: usize) -> String {
        render_draws_preview(&self.table, Some(self.category_names.as_slice()), max_rows)
    }
}

/// Per-draw coefficients and contrasts with convergence diagnostics.
#[derive(Debug, Clone)]
pub struct ContrastDraws {
    pub draws: LabelledDraws,
    /// Summary of the fixed-effect variable.
    pub convergence: SummaryTable,
    pub warnings: Vec<ContrastWarning>,
}

impl ContrastDraws {
    /// Convergence summary of the fixed-effect coefficient shown as column
    /// `factor_label` for outcome category `group_label`.
    #[must_use]
    pub fn convergence_for(&self, group_label: &str, factor_label: &str) -> Option<&SummaryRecord> {
        let row = self
            .draws
            .category_names
            .iter()
            .position(|name| name == group_label)?;
        let column = self
            .draws
            .table
            .columns()
            .iter()
            .find(|column| column.name == factor_label)?;
        let ColumnSource::Coefficient { variable, col } = &column.source else {
            return None;
        };
        self.convergence.find(variable, row, Some(*col))
    }
}

#[derive(Debug, Clone)]
pub enum AbundanceContrasts {
    /// No coefficient or contrast columns: only the categories are reported.
    GroupsOnly(Vec<GroupLabel>),
    Draws(ContrastDraws),
}

/// Build the labelled per-draw coefficient table of `model`, apply
/// `contrasts`, and attach convergence diagnostics of the fixed effects.
///
/// # Errors
///
/// Returns `AbundanceError` for an invalid description or options, a
/// declared random-effect group without draws, label/column count
/// mismatches, merges that change the row count or miss keys, strict-mode
/// contrast failures, and rows without an outcome category.
pub fn get_abundance_contrast_draws<F: PosteriorFit>(
    model: &AbundanceModel<F>,
    contrasts: Option<&ContrastSet>,
) -> Result<AbundanceContrasts, AbundanceError> {
    let AbundanceModel {
        fit,
        description,
        options,
    } = model;
    description.validate()?;
    options.validate()?;

    let fixed = &options.fixed_effect_variable;
    let mut table = coefficient_draws(fit, fixed, options.layout)?
        .pivot_wider(&description.design_matrix_labels)?;
    debug!(
        "pivoted '{fixed}' to {} rows x {} columns",
        table.nrows(),
        table.ncols()
    );

    for group in &description.random_effect_groups {
        let group_table = random_effect_table(fit, group, options.layout)?;
        table = table.left_join(&group_table, options.tolerate_missing_keys)?;
        debug!("merged '{}' ({} columns)", group.variable, group_table.ncols());
    }

    let warnings = match contrasts.filter(|set| !set.is_empty()) {
        Some(contrasts) => {
            let outcome = apply_contrasts(table, contrasts, options.contrast_mode)?;
            table = outcome.table;
            outcome.warnings
        }
        None => Vec::new(),
    };

    let draws = LabelledDraws::new(table, description.outcome_category_names.clone())?;
    if draws.table.ncols() == 0 {
        debug!("no value columns; reporting categories only");
        return Ok(AbundanceContrasts::GroupsOnly(draws.groups()));
    }

    let convergence = summarize_variable(fit, fixed, &options.quantiles)?;
    let convergence = match options.layout {
        CoefficientLayout::CategoryByFactor => convergence,
        CoefficientLayout::FactorByCategory => convergence.transposed(),
    };
    Ok(AbundanceContrasts::Draws(ContrastDraws {
        draws,
        convergence,
        warnings,
    }))
}

/// Draws of `variable` with `row` addressing the outcome category.
fn coefficient_draws<F: PosteriorFit>(
    fit: &F,
    variable: &str,
    layout: CoefficientLayout,
) -> Result<DrawTable, ReshapeError> {
    let draws = reshape_variable_draws(fit, variable)?;
    Ok(match layout {
        CoefficientLayout::CategoryByFactor => draws,
        CoefficientLayout::FactorByCategory => draws.transposed(),
    })
}

fn random_effect_table<F: PosteriorFit>(
    fit: &F,
    group: &RandomEffectGroup,
    layout: CoefficientLayout,
) -> Result<WideTable, AbundanceError> {
    let draws = coefficient_draws(fit, &group.variable, layout)?;
    if draws.is_empty() {
        return Err(AbundanceError::MissingDraws(group.variable.clone()));
    }
    Ok(draws.with_reference_level()?.pivot_wider(&group.labels)?)
}
