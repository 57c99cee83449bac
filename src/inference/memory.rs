//! In-memory inference engine over per-chain draw vectors.

use std::collections::{BTreeSet, HashSet};

use statrs::statistics::Statistics;

use super::diagnostics::{pooled_effective_sample_size, split_rhat};
use super::{DrawColumn, DrawFrame, InferenceError, PosteriorFit, SummaryFrame};
use crate::draws::index::variable_component;
use crate::utils::{percentile, quantile_column_name};

#[derive(Debug, Clone)]
struct ChainDraws {
    chain_id: u32,
    /// One draw vector per parameter, in `InMemoryFit::parameters` order.
    values: Vec<Vec<f64>>,
}

impl ChainDraws {
    fn len(&self) -> usize {
        self.values.first().map_or(0, Vec::len)
    }
}

/// Posterior fit held entirely in memory.
///
/// Parameters are flat names such as `beta[1,2]`. Each chain stores one draw
/// vector per parameter; iterations are numbered from 1 within a chain and
/// draws are numbered from 1 across all chains in registration order.
#[derive(Debug, Clone)]
pub struct InMemoryFit {
    parameters: Vec<String>,
    chains: Vec<ChainDraws>,
    report_diagnostics: bool,
}

impl InMemoryFit {
    #[must_use]
    pub const fn new(parameters: Vec<String>) -> Self {
        Self {
            parameters,
            chains: Vec::new(),
            report_diagnostics: true,
        }
    }

    /// Build a fit by evaluating `value(chain_id, iteration, parameter)` for
    /// chains `1..=chain_count` and 0-based iterations/parameter indices.
    #[must_use]
    pub fn from_fn(
        parameters: Vec<String>,
        chain_count: u32,
        draws_per_chain: usize,
        value: impl Fn(u32, usize, usize) -> f64,
    ) -> Self {
        let chains = (1..=chain_count)
            .map(|chain_id| ChainDraws {
                chain_id,
                values: (0..parameters.len())
                    .map(|param| {
                        (0..draws_per_chain)
                            .map(|iteration| value(chain_id, iteration, param))
                            .collect()
                    })
                    .collect(),
            })
            .collect();
        Self {
            parameters,
            chains,
            report_diagnostics: true,
        }
    }

    /// Register one chain with one draw vector per parameter.
    ///
    /// # Errors
    ///
    /// Returns `InferenceError` if the chain id is already registered, the
    /// parameter count differs, or draw vectors differ in length.
    pub fn with_chain(
        mut self,
        chain_id: u32,
        values: Vec<Vec<f64>>,
    ) -> Result<Self, InferenceError> {
        if self.chains.iter().any(|chain| chain.chain_id == chain_id) {
            return Err(InferenceError::DuplicateChain(chain_id));
        }
        if values.len() != self.parameters.len() {
            return Err(InferenceError::ChainParameterCount {
                chain_id,
                found: values.len(),
                expected: self.parameters.len(),
            });
        }
        let expected = values.first().map_or(0, Vec::len);
        if let Some((idx, draws)) = values
            .iter()
            .enumerate()
            .find(|(_, draws)| draws.len() != expected)
        {
            return Err(InferenceError::ChainDrawCount {
                chain_id,
                name: self.parameters[idx].clone(),
                found: draws.len(),
                expected,
            });
        }
        self.chains.push(ChainDraws { chain_id, values });
        Ok(self)
    }

    /// Omit `N_Eff` and `R_hat` from summaries, as some engines do.
    #[must_use]
    pub const fn without_diagnostics(mut self) -> Self {
        self.report_diagnostics = false;
        self
    }

    #[must_use]
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    #[must_use]
    pub const fn chain_count(&self) -> usize {
        self.chains.len()
    }

    #[must_use]
    pub fn total_draws(&self) -> usize {
        self.chains.iter().map(ChainDraws::len).sum()
    }
}

impl PosteriorFit for InMemoryFit {
    fn variable_names(&self) -> BTreeSet<String> {
        self.parameters
            .iter()
            .map(|name| variable_component(name).to_string())
            .collect()
    }

    fn draws_long(&self, variables: &[String]) -> Result<DrawFrame, InferenceError> {
        let wanted = variables.iter().map(String::as_str).collect::<HashSet<_>>();
        let selected = self
            .parameters
            .iter()
            .enumerate()
            .filter(|(_, name)| wanted.contains(variable_component(name)))
            .collect::<Vec<_>>();

        let rows = self.total_draws();
        let mut frame = DrawFrame {
            chain_ids: Vec::with_capacity(rows),
            iterations: Vec::with_capacity(rows),
            draws: Vec::with_capacity(rows),
            columns: selected
                .iter()
                .map(|(_, name)| DrawColumn {
                    name: (*name).clone(),
                    values: Vec::with_capacity(rows),
                })
                .collect(),
        };

        let mut draw = 0u32;
        for chain in &self.chains {
            for iteration in 0..chain.len() {
                draw += 1;
                frame.chain_ids.push(chain.chain_id);
                frame
                    .iterations
                    .push(u32::try_from(iteration + 1).unwrap_or(u32::MAX));
                frame.draws.push(draw);
                for (column, (param, _)) in frame.columns.iter_mut().zip(&selected) {
                    column.values.push(chain.values[*param][iteration]);
                }
            }
        }

        frame.validate()?;
        Ok(frame)
    }

    fn summary(&self, quantiles: &[f64]) -> Result<SummaryFrame, InferenceError> {
        if let Some(bad) = quantiles.iter().find(|q| !(0.0..=100.0).contains(*q)) {
            return Err(InferenceError::InvalidQuantile(bad.to_string()));
        }

        let n_params = self.parameters.len();
        let mut means = Vec::with_capacity(n_params);
        let mut quantile_values = vec![Vec::with_capacity(n_params); quantiles.len()];
        let mut ess = Vec::with_capacity(n_params);
        let mut rhat = Vec::with_capacity(n_params);

        for param in 0..n_params {
            let per_chain = self
                .chains
                .iter()
                .map(|chain| chain.values[param].as_slice())
                .collect::<Vec<_>>();
            let mut pooled = per_chain.concat();
            means.push(pooled.iter().mean());
            pooled.sort_by(f64::total_cmp);
            for (values, q) in quantile_values.iter_mut().zip(quantiles) {
                values.push(percentile(&pooled, q / 100.0));
            }
            ess.push(pooled_effective_sample_size(&per_chain));
            rhat.push(split_rhat(&per_chain).unwrap_or(f64::NAN));
        }

        let mut summary = SummaryFrame::new(self.parameters.clone()).with_column("Mean", means);
        for (values, q) in quantile_values.into_iter().zip(quantiles) {
            summary = summary.with_column(quantile_column_name(*q), values);
        }
        if self.report_diagnostics {
            summary = summary.with_column("N_Eff", ess).with_column("R_hat", rhat);
        }
        Ok(summary)
    }
}
