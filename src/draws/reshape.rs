//! Long-format draw reshaping, reference-level derivation and pivoting.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use faer::Mat;
use log::debug;

use super::index::ParameterIndex;
use super::{DrawRecord, DrawTable, ReshapeError, compile_pattern, exact_variable_pattern};
use crate::inference::PosteriorFit;
use crate::table::{Column, ColumnSource, RowKey, TableError, WideTable};

/// Reshape the draws of every variable matching `variable_pattern` (a
/// case-sensitive regex searched anywhere in the name) into a long table with
/// draws renumbered per `(variable, row, col)`.
///
/// Parameters whose names do not carry two indices are dropped. No match is
/// an empty table, not an error.
///
/// # Errors
///
/// Returns `ReshapeError` for an invalid pattern or a malformed engine frame.
pub fn reshape_draws<F: PosteriorFit + ?Sized>(
    fit: &F,
    variable_pattern: &str,
) -> Result<DrawTable, ReshapeError> {
    let pattern = compile_pattern(variable_pattern)?;
    let selected = fit
        .variable_names()
        .into_iter()
        .filter(|name| pattern.is_match(name))
        .collect::<Vec<_>>();
    if selected.is_empty() {
        debug!("no variables match pattern '{variable_pattern}'");
        return Ok(DrawTable::default());
    }

    let frame = fit.draws_long(&selected)?;
    frame.validate()?;

    let mut records = Vec::with_capacity(frame.nrows() * frame.columns.len());
    let mut dropped = 0usize;
    for column in &frame.columns {
        let Some(index) = ParameterIndex::parse(&column.name) else {
            dropped += 1;
            continue;
        };
        if !pattern.is_match(&index.variable) {
            continue;
        }
        let Some((row, col)) = index.to_zero_based() else {
            dropped += 1;
            continue;
        };
        records.extend(column.values.iter().enumerate().map(|(i, value)| DrawRecord {
            chain_id: frame.chain_ids[i],
            iteration: frame.iterations[i],
            draw: frame.draws[i],
            variable: index.variable.clone(),
            row,
            col,
            value: *value,
        }));
    }
    if dropped > 0 {
        debug!("dropped {dropped} draw columns without a [row,col] index");
    }

    let table = DrawTable::from_records(records).renumber_draws();
    debug!(
        "reshaped {} draw records for pattern '{variable_pattern}'",
        table.len()
    );
    Ok(table)
}

/// Reshape the draws of exactly one variable; `random_effect` does not pick
/// up `random_effect_2`.
///
/// # Errors
///
/// Returns `ReshapeError` for a malformed engine frame.
pub fn reshape_variable_draws<F: PosteriorFit + ?Sized>(
    fit: &F,
    variable: &str,
) -> Result<DrawTable, ReshapeError> {
    Ok(reshape_draws(fit, &exact_variable_pattern(variable))?.filter_variable(variable))
}

impl DrawTable {
    fn single_variable(&self) -> Result<Option<&str>, TableError> {
        let variables = self.variables();
        match variables.len() {
            0 => Ok(None),
            1 => Ok(self.records().first().map(|record| record.variable.as_str())),
            _ => Err(TableError::MixedVariables(variables)),
        }
    }

    /// Append the implicit reference level of a sum-to-zero random effect.
    ///
    /// With observed levels `col = 0..K`, level `K` is the negated sum of the
    /// observed values for each `(chain, iteration, draw, row)`.
    ///
    /// # Errors
    ///
    /// Returns `TableError::MixedVariables` if the table holds more than one
    /// variable.
    pub fn with_reference_level(&self) -> Result<Self, TableError> {
        let Some(variable) = self.single_variable()? else {
            return Ok(self.clone());
        };
        let reference_col = self
            .records()
            .iter()
            .map(|record| record.col)
            .max()
            .map_or(0, |max| max + 1);

        let mut sums: BTreeMap<RowKey, f64> = BTreeMap::new();
        for record in self.records() {
            *sums.entry(record_key(record)).or_insert(0.0) += record.value;
        }

        let mut records = self.records().to_vec();
        records.extend(sums.into_iter().map(|(key, sum)| DrawRecord {
            chain_id: key.chain_id,
            iteration: key.iteration,
            draw: key.draw,
            variable: variable.to_string(),
            row: key.row,
            col: reference_col,
            value: -sum,
        }));
        Ok(Self::from_records(records))
    }

    /// Pivot one variable to a wide table: one row per
    /// `(chain, iteration, draw, row)`, one column per distinct `col`, named
    /// by `labels` in ascending `col` order.
    ///
    /// Cells without a draw are NaN. An empty table pivots to an empty table
    /// whatever the labels.
    ///
    /// # Errors
    ///
    /// Returns `TableError` if the table mixes variables, the label count
    /// differs from the column count, or a cell is drawn twice.
    pub fn pivot_wider(&self, labels: &[String]) -> Result<WideTable, TableError> {
        let Some(variable) = self.single_variable()? else {
            return Ok(WideTable::default());
        };

        let cols = self
            .records()
            .iter()
            .map(|record| record.col)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        if labels.len() != cols.len() {
            return Err(TableError::LabelCountMismatch {
                variable: variable.to_string(),
                labels: labels.len(),
                columns: cols.len(),
            });
        }
        let keys = self
            .records()
            .iter()
            .map(record_key)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();

        let col_position = cols
            .iter()
            .enumerate()
            .map(|(pos, col)| (*col, pos))
            .collect::<HashMap<_, _>>();
        let key_position = keys
            .iter()
            .enumerate()
            .map(|(pos, key)| (*key, pos))
            .collect::<HashMap<_, _>>();

        let ncols = cols.len();
        let mut dense = vec![f64::NAN; keys.len() * ncols];
        let mut filled = vec![false; keys.len() * ncols];
        for record in self.records() {
            let cell = key_position[&record_key(record)] * ncols + col_position[&record.col];
            if filled[cell] {
                return Err(TableError::DuplicateCell {
                    variable: record.variable.clone(),
                    chain_id: record.chain_id,
                    iteration: record.iteration,
                    draw: record.draw,
                    row: record.row,
                    col: record.col,
                });
            }
            filled[cell] = true;
            dense[cell] = record.value;
        }

        let columns = cols
            .iter()
            .zip(labels)
            .map(|(col, label)| Column {
                name: label.clone(),
                source: ColumnSource::Coefficient {
                    variable: variable.to_string(),
                    col: *col,
                },
            })
            .collect();
        let values = Mat::from_fn(keys.len(), ncols, |i, j| dense[i * ncols + j]);
        WideTable::new(keys, columns, values)
    }
}

const fn record_key(record: &DrawRecord) -> RowKey {
    RowKey {
        chain_id: record.chain_id,
        iteration: record.iteration,
        draw: record.draw,
        row: record.row,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::InMemoryFit;
    use approx::assert_relative_eq;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| (*name).to_string()).collect()
    }

    /// Two chains of three draws; `beta` is 2x2 and `random_effect` 2x1.
    fn sample_fit() -> InMemoryFit {
        let parameters = labels(&[
            "beta[1,1]",
            "beta[1,2]",
            "beta[2,1]",
            "beta[2,2]",
            "random_effect[1,1]",
            "random_effect[2,1]",
            "random_effect_2[1,1]",
            "sigma",
        ]);
        InMemoryFit::from_fn(parameters, 2, 3, |chain, iteration, param| {
            f64::from(chain) * 100.0
                + f64::from(u32::try_from(iteration).unwrap_or(0)) * 10.0
                + f64::from(u32::try_from(param).unwrap_or(0))
        })
    }

    #[test]
    fn reshape_renumbers_draws_per_cell() {
        let table = reshape_draws(&sample_fit(), "beta").expect("reshape");
        assert_eq!(table.len(), 4 * 6);
        for group in table.records().chunks(6) {
            let draws = group.iter().map(|r| r.draw).collect::<Vec<_>>();
            assert_eq!(draws, vec![1, 2, 3, 4, 5, 6]);
            let chains = group.iter().map(|r| r.chain_id).collect::<Vec<_>>();
            assert_eq!(chains, vec![1, 1, 1, 2, 2, 2]);
        }
        let first = &table.records()[0];
        assert_eq!((first.variable.as_str(), first.row, first.col), ("beta", 0, 0));
    }

    #[test]
    fn pattern_family_is_split_by_exact_variable() {
        let family = reshape_draws(&sample_fit(), "random_effect").expect("reshape");
        assert_eq!(
            family.variables(),
            labels(&["random_effect", "random_effect_2"])
        );
        let exact = reshape_variable_draws(&sample_fit(), "random_effect").expect("reshape");
        assert_eq!(exact.variables(), labels(&["random_effect"]));
        assert_eq!(exact.len(), 2 * 6);
    }

    #[test]
    fn unmatched_pattern_is_empty() {
        let table = reshape_draws(&sample_fit(), "^gamma$").expect("reshape");
        assert!(table.is_empty());
    }

    #[test]
    fn scalar_parameters_are_dropped() {
        let table = reshape_draws(&sample_fit(), "sigma").expect("reshape");
        assert!(table.is_empty());
    }

    #[test]
    fn reference_level_is_negated_sum() {
        let table = reshape_variable_draws(&sample_fit(), "beta")
            .expect("reshape")
            .with_reference_level()
            .expect("reference level");
        assert_eq!(table.len(), 6 * 6);

        let wide = table
            .pivot_wider(&labels(&["x1", "x2", "reference"]))
            .expect("pivot");
        let x1 = wide.column_values("x1").expect("x1");
        let x2 = wide.column_values("x2").expect("x2");
        let reference = wide.column_values("reference").expect("reference");
        for i in 0..wide.nrows() {
            assert_relative_eq!(reference[i], -(x1[i] + x2[i]));
        }
    }

    #[test]
    fn reference_level_rejects_mixed_variables() {
        let family = reshape_draws(&sample_fit(), "random_effect").expect("reshape");
        let err = family.with_reference_level().expect_err("mixed");
        assert!(matches!(err, TableError::MixedVariables(_)));
    }

    #[test]
    fn pivot_orders_keys_and_names_columns() {
        let wide = reshape_variable_draws(&sample_fit(), "beta")
            .expect("reshape")
            .pivot_wider(&labels(&["(Intercept)", "treated"]))
            .expect("pivot");
        assert_eq!(wide.nrows(), 6 * 2);
        assert_eq!(wide.column_names(), vec!["(Intercept)", "treated"]);
        let first = wide.keys()[0];
        assert_eq!((first.chain_id, first.iteration, first.draw, first.row), (1, 1, 1, 0));
        let second = wide.keys()[1];
        assert_eq!((second.draw, second.row), (1, 1));
        // chain 1, first iteration, beta[2,2] is parameter 3.
        assert_relative_eq!(wide.value(1, 1), 103.0);
    }

    #[test]
    fn pivot_rejects_wrong_label_count() {
        let err = reshape_variable_draws(&sample_fit(), "beta")
            .expect("reshape")
            .pivot_wider(&labels(&["only_one"]))
            .expect_err("label mismatch");
        assert_eq!(
            err,
            TableError::LabelCountMismatch {
                variable: "beta".to_string(),
                labels: 1,
                columns: 2,
            }
        );
    }

    #[test]
    fn pivot_rejects_duplicate_cells() {
        let record = DrawRecord {
            chain_id: 1,
            iteration: 1,
            draw: 1,
            variable: "beta".to_string(),
            row: 0,
            col: 0,
            value: 1.0,
        };
        let table = DrawTable::from_records(vec![record.clone(), record]);
        let err = table.pivot_wider(&labels(&["a"])).expect_err("duplicate");
        assert!(matches!(err, TableError::DuplicateCell { .. }));
    }

    #[test]
    fn empty_table_pivots_to_empty() {
        let wide = DrawTable::default()
            .pivot_wider(&labels(&["a", "b"]))
            .expect("empty pivot");
        assert_eq!(wide.nrows(), 0);
        assert_eq!(wide.ncols(), 0);
    }
}
