#![forbid(unsafe_code)]

//! # `abundance_draws`
//!
//! Post-processing of posterior draws from compositional abundance
//! regressions: flat parameter names such as `beta[2,5]` are turned into
//! per-draw coefficient tables, credible-interval summaries and derived
//! contrasts between groups.
//!
//! Sampling is out of scope. Fits are reached through the [`PosteriorFit`]
//! trait; [`InMemoryFit`] implements it over draws already held in memory.
//!
//! ```
//! use abundance_draws::{
//!     AbundanceContrasts, AbundanceModel, ContrastSet, InMemoryFit, ModelDescription,
//! };
//!
//! let parameters = ["beta[1,1]", "beta[1,2]", "beta[2,1]", "beta[2,2]"]
//!     .map(String::from)
//!     .to_vec();
//! let fit = InMemoryFit::from_fn(parameters, 2, 3, |chain, iteration, param| {
//!     f64::from(chain) + f64::from(u32::try_from(iteration + param).unwrap_or(0))
//! });
//! let description = ModelDescription::new(
//!     vec!["(Intercept)".to_string(), "treated".to_string()],
//!     vec!["B cell".to_string(), "T cell".to_string()],
//! );
//! let contrasts = ContrastSet::new().with_contrast("effect", "treated - (Intercept)");
//!
//! let model = AbundanceModel::new(fit, description);
//! let AbundanceContrasts::Draws(result) = model.contrast_draws(Some(&contrasts))? else {
//!     unreachable!("the fit has fixed-effect draws");
//! };
//! assert_eq!(result.draws.table().nrows(), 12);
//! assert_eq!(result.convergence.len(), 4);
//! assert!(result.convergence_for("T cell", "treated").is_some());
//! # Ok::<(), abundance_draws::AbundanceError>(())
//! ```

pub mod abundance;
pub mod contrast;
pub mod draws;
pub mod inference;
pub mod input;
pub mod table;
pub mod utils;

pub use abundance::{
    AbundanceContrasts, AbundanceError, AbundanceModel, AlignmentError, ContrastDraws,
    GroupLabel, LabelledDraws, get_abundance_contrast_draws,
};
pub use contrast::{
    ContrastError, ContrastOutcome, ContrastSet, ContrastWarning, ErrorMode, apply_contrasts,
    escape_formula, referenced_identifiers,
};
pub use draws::{
    DEFAULT_QUANTILES, DrawRecord, DrawTable, ParameterIndex, R_HAT_COLUMNS, ReshapeError,
    SummaryRecord, SummaryTable, reshape_draws, reshape_summary, reshape_variable_draws,
    summarize_fit, summarize_variable,
};
pub use inference::{DrawColumn, DrawFrame, InMemoryFit, InferenceError, PosteriorFit, SummaryFrame};
pub use input::{
    AbundanceOptions, CoefficientLayout, InputError, ModelDescription, RandomEffectGroup,
};
pub use table::{
    Column, ColumnSource, RowKey, TableError, WideTable, render_draws_preview,
    render_summary_table,
};
