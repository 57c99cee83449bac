//! # Model description
//!
//! Everything the orchestrator needs to know about a fitted abundance model
//! besides the draws themselves: the labels of the fixed-effect design
//! columns, up to two random-effect groups with their labels, and the names of
//! the outcome categories.
//!
//! # Examples
//!
//! ```
//! use abundance_draws::{ModelDescription, RandomEffectGroup};
//!
//! let description = ModelDescription::new(
//!     vec!["(Intercept)".to_string(), "typecancer".to_string()],
//!     vec!["B cell".to_string(), "T cell".to_string()],
//! )
//! .with_random_effect_group(RandomEffectGroup::new(
//!     "random_effect",
//!     vec!["group1".to_string(), "group2".to_string()],
//! ));
//!
//! assert!(description.validate().is_ok());
//! ```

use thiserror::Error;

use crate::contrast::ErrorMode;
use crate::draws::DEFAULT_QUANTILES;

/// Random-effect groups beyond this count are not supported.
pub const MAX_RANDOM_EFFECT_GROUPS: usize = 2;

/// Default draw variable names of the random-effect groups, in order.
pub const RANDOM_EFFECT_VARIABLES: [&str; MAX_RANDOM_EFFECT_GROUPS] =
    ["random_effect", "random_effect_2"];

/// Errors returned when validating a model description or options.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("design matrix must have at least one labelled column")]
    EmptyDesign,
    #[error("at most two random-effect groups are supported; got {0}")]
    TooManyRandomEffectGroups(usize),
    #[error("random-effect group '{0}' has no labels")]
    EmptyGroupLabels(String),
    #[error("variable name must not be empty")]
    EmptyVariableName,
    #[error("variable '{0}' is used by more than one coefficient block")]
    DuplicateVariable(String),
    #[error("outcome category names ({names}) must match the category count ({count})")]
    OutcomeCategoryMismatch { names: usize, count: usize },
    #[error("quantile {0} must lie in [0, 100]")]
    InvalidQuantile(String),
}

/// One random-effect coefficient block.
///
/// `labels` names every level including the derived reference level, so a
/// block with `K` levels in the fit carries `K + 1` labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomEffectGroup {
    pub variable: String,
    pub labels: Vec<String>,
}

impl RandomEffectGroup {
    #[must_use]
    pub fn new(variable: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            variable: variable.into(),
            labels,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescription {
    pub design_matrix_labels: Vec<String>,
    pub random_effect_groups: Vec<RandomEffectGroup>,
    pub outcome_category_names: Vec<String>,
    pub outcome_category_count: usize,
}

impl ModelDescription {
    /// Description without random effects; the category count is taken from
    /// the names.
    #[must_use]
    pub fn new(design_matrix_labels: Vec<String>, outcome_category_names: Vec<String>) -> Self {
        let outcome_category_count = outcome_category_names.len();
        Self {
            design_matrix_labels,
            random_effect_groups: Vec::new(),
            outcome_category_names,
            outcome_category_count,
        }
    }

    #[must_use]
    pub fn with_random_effect_group(mut self, group: RandomEffectGroup) -> Self {
        self.random_effect_groups.push(group);
        self
    }

    /// Add a random-effect group under the next default variable name
    /// (`random_effect`, then `random_effect_2`).
    #[must_use]
    pub fn with_random_effect(self, labels: Vec<String>) -> Self {
        let index = self.random_effect_groups.len();
        let variable = RANDOM_EFFECT_VARIABLES
            .get(index)
            .map_or_else(|| format!("random_effect_{}", index + 1), |v| (*v).to_string());
        self.with_random_effect_group(RandomEffectGroup::new(variable, labels))
    }

    #[must_use]
    pub const fn with_outcome_category_count(mut self, count: usize) -> Self {
        self.outcome_category_count = count;
        self
    }

    #[must_use]
    pub const fn random_effect_count(&self) -> usize {
        self.random_effect_groups.len()
    }

    /// # Errors
    ///
    /// Returns `InputError` if labels are missing, too many random-effect
    /// groups are declared, variable names repeat, or the outcome category
    /// names disagree with the category count.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.design_matrix_labels.is_empty() {
            return Err(InputError::EmptyDesign);
        }
        if self.random_effect_groups.len() > MAX_RANDOM_EFFECT_GROUPS {
            return Err(InputError::TooManyRandomEffectGroups(
                self.random_effect_groups.len(),
            ));
        }
        for (idx, group) in self.random_effect_groups.iter().enumerate() {
            if group.variable.is_empty() {
                return Err(InputError::EmptyVariableName);
            }
            if group.labels.is_empty() {
                return Err(InputError::EmptyGroupLabels(group.variable.clone()));
            }
            if self.random_effect_groups[..idx]
                .iter()
                .any(|other| other.variable == group.variable)
            {
                return Err(InputError::DuplicateVariable(group.variable.clone()));
            }
        }
        if self.outcome_category_names.len() != self.outcome_category_count {
            return Err(InputError::OutcomeCategoryMismatch {
                names: self.outcome_category_names.len(),
                count: self.outcome_category_count,
            });
        }
        Ok(())
    }
}

/// Which index of a `name[i,j]` coefficient addresses the outcome category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CoefficientLayout {
    /// `beta[category, factor]`: rows are categories, columns are design
    /// labels (or random-effect levels).
    #[default]
    CategoryByFactor,
    /// `beta[factor, category]`, the layout of fits whose linear predictor is
    /// written `X * beta`.
    FactorByCategory,
}

/// Knobs of the abundance-contrast pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct AbundanceOptions {
    /// Draw variable of the fixed-effect coefficients.
    pub fixed_effect_variable: String,
    /// Quantiles (percent) of the convergence summary.
    pub quantiles: Vec<f64>,
    /// Fill unmatched merge keys with NaN instead of failing.
    pub tolerate_missing_keys: bool,
    pub contrast_mode: ErrorMode,
    pub layout: CoefficientLayout,
}

impl Default for AbundanceOptions {
    fn default() -> Self {
        Self {
            fixed_effect_variable: "beta".to_string(),
            quantiles: DEFAULT_QUANTILES.to_vec(),
            tolerate_missing_keys: false,
            contrast_mode: ErrorMode::Lenient,
            layout: CoefficientLayout::CategoryByFactor,
        }
    }
}

impl AbundanceOptions {
    #[must_use]
    pub fn with_fixed_effect_variable(self, variable: impl Into<String>) -> Self {
        Self {
            fixed_effect_variable: variable.into(),
            ..self
        }
    }

    #[must_use]
    pub fn with_quantiles(self, quantiles: Vec<f64>) -> Self {
        Self { quantiles, ..self }
    }

    #[must_use]
    pub const fn with_tolerate_missing_keys(mut self, tolerate: bool) -> Self {
        self.tolerate_missing_keys = tolerate;
        self
    }

    #[must_use]
    pub const fn with_contrast_mode(mut self, mode: ErrorMode) -> Self {
        self.contrast_mode = mode;
        self
    }

    #[must_use]
    pub const fn with_layout(mut self, layout: CoefficientLayout) -> Self {
        self.layout = layout;
        self
    }

    /// # Errors
    ///
    /// Returns `InputError` for an empty variable name or a quantile outside
    /// `[0, 100]`.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.fixed_effect_variable.is_empty() {
            return Err(InputError::EmptyVariableName);
        }
        if let Some(q) = self
            .quantiles
            .iter()
            .find(|q| !(0.0..=100.0).contains(*q))
        {
            return Err(InputError::InvalidQuantile(q.to_string()));
        }
        Ok(())
    }
}
