/////////////////////////////////////////////////////////////////////////////////////////////\
//
// Contrast formulas over per-draw coefficient tables.
//
// Created on: 18 Oct 2026     Author: Tobias Kragholm
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Contrasts
//!
//! Derived columns defined by arithmetic formulas over the columns of a
//! `WideTable`, e.g. `"typeA - typeB"` or `` "2/3*`(Intercept)` - b" ``.
//!
//! Every identifier a formula references is checked against the table before
//! evaluation. Missing identifiers are fatal in `ErrorMode::Strict` and
//! reported as warnings in `ErrorMode::Lenient`, where the affected values
//! become NaN.

use std::sync::LazyLock;

use log::warn;
use regex::Regex;
use thiserror::Error;

use crate::table::{ColumnSource, TableError, WideTable};
use crate::utils::is_bare_identifier;

pub mod expr;

pub use expr::{CompiledExpr, ExprError};

static FRACTION_FACTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9]+/[0-9]+\s?\*").expect("fraction factor is a valid regex")
});

static DECIMAL_FACTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9]+\.[0-9]+\s?\*").expect("decimal factor is a valid regex")
});

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContrastError {
    #[error("contrast identifiers not present in the table: {0:?}")]
    MissingIdentifiers(Vec<String>),
    #[error("failed to evaluate contrast '{name}' ({formula}): {message}")]
    Evaluation {
        name: String,
        formula: String,
        message: String,
    },
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Non-fatal issues found while applying contrasts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContrastWarning {
    #[error("contrast elements require backquotes: {0:?}")]
    RequiresQuoting(Vec<String>),
    #[error("contrast identifiers not present in the table: {0:?}")]
    MissingIdentifiers(Vec<String>),
    #[error("error while processing contrast '{name}' ({formula}): {message}")]
    Evaluation {
        name: String,
        formula: String,
        message: String,
    },
}

/// How validation and evaluation failures are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorMode {
    Strict,
    #[default]
    Lenient,
}

/// Ordered `name -> formula` contrasts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContrastSet {
    entries: Vec<(String, String)>,
}

impl ContrastSet {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Contrasts named by their own formula text.
    #[must_use]
    pub fn from_formulas<I, S>(formulas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: formulas
                .into_iter()
                .map(|formula| {
                    let formula = formula.into();
                    (formula.clone(), formula)
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn with_contrast(mut self, name: impl Into<String>, formula: impl Into<String>) -> Self {
        self.entries.push((name.into(), formula.into()));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, formula)| (name.as_str(), formula.as_str()))
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, F: Into<String>> FromIterator<(N, F)> for ContrastSet {
    fn from_iter<T: IntoIterator<Item = (N, F)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(name, formula)| (name.into(), formula.into()))
                .collect(),
        }
    }
}

/// Table with the contrast columns appended, plus any warnings raised.
#[derive(Debug, Clone)]
pub struct ContrastOutcome {
    pub table: WideTable,
    pub warnings: Vec<ContrastWarning>,
}

/// Identifiers referenced by `formula`, in order of first appearance.
///
/// Backtick-quoted spans and occurrences of `columns` that are not plain
/// identifiers are taken whole. Elsewhere, numeric factors such as `2/3*` or
/// `0.5*` are stripped, the text is split on `+ - * /`, and parentheses,
/// whitespace and purely numeric tokens are discarded.
#[must_use]
pub fn referenced_identifiers(formula: &str, columns: &[&str]) -> Vec<String> {
    let protected = protected_names(columns);
    let mut identifiers: Vec<String> = Vec::new();
    let mut push = |identifier: String| {
        if !identifiers.contains(&identifier) {
            identifiers.push(identifier);
        }
    };
    for segment in segments(formula, &protected) {
        match segment {
            Segment::Name(name) => push(name),
            Segment::Text(text) => {
                let text = FRACTION_FACTOR.replace_all(&text, "");
                let text = DECIMAL_FACTOR.replace_all(&text, "");
                for token in text.split(['+', '-', '*', '/']) {
                    let token = token
                        .chars()
                        .filter(|c| !matches!(c, '(' | ')') && !c.is_whitespace())
                        .collect::<String>();
                    if !token.is_empty() && !is_numeric_literal(&token) {
                        push(token);
                    }
                }
            }
        }
    }
    identifiers
}

/// Wrap every occurrence of a column name that is not a plain identifier in
/// backticks. Already quoted spans are left as they are.
#[must_use]
pub fn escape_formula(formula: &str, columns: &[&str]) -> String {
    let protected = protected_names(columns);
    segments(formula, &protected)
        .into_iter()
        .map(|segment| match segment {
            Segment::Name(name) => format!("`{name}`"),
            Segment::Text(text) => text,
        })
        .collect()
}

/// Append one column per contrast, in order. Later contrasts may reference
/// earlier ones.
///
/// # Errors
///
/// In `ErrorMode::Strict`, returns `ContrastError::MissingIdentifiers` listing
/// every unknown identifier across all formulas, or
/// `ContrastError::Evaluation` for the first formula that fails to compile.
/// In either mode, returns `ContrastError::Table` if a contrast name clashes
/// with an existing column.
pub fn apply_contrasts(
    table: WideTable,
    contrasts: &ContrastSet,
    mode: ErrorMode,
) -> Result<ContrastOutcome, ContrastError> {
    let mut warnings = Vec::new();
    validate_identifiers(&table, contrasts, mode, &mut warnings)?;

    let mut table = table;
    for (name, formula) in contrasts.iter() {
        let values = {
            let columns = table.column_names();
            let escaped = escape_formula(formula, &columns);
            match CompiledExpr::compile(&escaped, &columns, mode == ErrorMode::Lenient) {
                Ok(expr) => evaluate(&table, &expr),
                Err(err) => {
                    if mode == ErrorMode::Strict {
                        return Err(ContrastError::Evaluation {
                            name: name.to_string(),
                            formula: formula.to_string(),
                            message: err.to_string(),
                        });
                    }
                    record_warning(
                        &mut warnings,
                        ContrastWarning::Evaluation {
                            name: name.to_string(),
                            formula: formula.to_string(),
                            message: err.to_string(),
                        },
                    );
                    vec![f64::NAN; table.nrows()]
                }
            }
        };
        table = table.with_column(
            name,
            ColumnSource::Contrast {
                formula: formula.to_string(),
            },
            values,
        )?;
    }

    Ok(ContrastOutcome { table, warnings })
}

fn validate_identifiers(
    table: &WideTable,
    contrasts: &ContrastSet,
    mode: ErrorMode,
    warnings: &mut Vec<ContrastWarning>,
) -> Result<(), ContrastError> {
    let mut known = table
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let mut requires_quoting = Vec::new();
    let mut missing = Vec::new();

    for (name, formula) in contrasts.iter() {
        let known_refs = known.iter().map(String::as_str).collect::<Vec<_>>();
        for identifier in referenced_identifiers(formula, &known_refs) {
            if known.contains(&identifier) {
                continue;
            }
            if !is_bare_identifier(&identifier) && !requires_quoting.contains(&identifier) {
                requires_quoting.push(identifier.clone());
            }
            if !missing.contains(&identifier) {
                missing.push(identifier);
            }
        }
        known.push(name.to_string());
    }

    if !requires_quoting.is_empty() {
        record_warning(warnings, ContrastWarning::RequiresQuoting(requires_quoting));
    }
    if !missing.is_empty() {
        if mode == ErrorMode::Strict {
            return Err(ContrastError::MissingIdentifiers(missing));
        }
        record_warning(warnings, ContrastWarning::MissingIdentifiers(missing));
    }
    Ok(())
}

fn evaluate(table: &WideTable, expr: &CompiledExpr) -> Vec<f64> {
    let rows = table.nrows();
    let columns = expr
        .columns
        .iter()
        .map(|name| {
            table
                .column_values(name)
                .unwrap_or_else(|| vec![f64::NAN; rows])
        })
        .collect::<Vec<_>>();
    let slices = columns.iter().map(Vec::as_slice).collect::<Vec<_>>();
    expr.eval_bulk(&slices, rows)
}

fn record_warning(warnings: &mut Vec<ContrastWarning>, warning: ContrastWarning) {
    warn!("{warning}");
    warnings.push(warning);
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Name(String),
    Text(String),
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// `[A-Za-z_][A-Za-z0-9_]*`, i.e. usable unquoted in an expression.
fn is_plain_identifier(name: &str) -> bool {
    is_bare_identifier(name) && !name.starts_with(|c: char| c.is_ascii_digit())
}

fn is_numeric_literal(token: &str) -> bool {
    token.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// Column names needing protection, longest first so that overlapping names
/// resolve to the longest match.
fn protected_names<'a>(columns: &[&'a str]) -> Vec<&'a str> {
    let mut protected = columns
        .iter()
        .copied()
        .filter(|name| !name.is_empty() && !is_plain_identifier(name))
        .collect::<Vec<_>>();
    protected.sort_by_key(|name| std::cmp::Reverse(name.len()));
    protected
}

fn matches_at(formula: &str, at: usize, name: &str) -> bool {
    if !formula[at..].starts_with(name) {
        return false;
    }
    let before = formula[..at].chars().next_back();
    let after = formula[at + name.len()..].chars().next();
    let starts_word = name.starts_with(is_identifier_char);
    let ends_word = name.ends_with(is_identifier_char);
    !(starts_word && before.is_some_and(is_identifier_char))
        && !(ends_word && after.is_some_and(is_identifier_char))
}

fn segments(formula: &str, protected: &[&str]) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut text = String::new();
    let flush = |text: &mut String, out: &mut Vec<Segment>| {
        if !text.is_empty() {
            out.push(Segment::Text(std::mem::take(text)));
        }
    };

    let mut at = 0;
    while let Some(ch) = formula[at..].chars().next() {
        if ch == '`'
            && let Some(len) = formula[at + 1..].find('`')
        {
            flush(&mut text, &mut out);
            out.push(Segment::Name(formula[at + 1..at + 1 + len].to_string()));
            at += len + 2;
            continue;
        }
        if let Some(name) = protected.iter().find(|name| matches_at(formula, at, name)) {
            flush(&mut text, &mut out);
            out.push(Segment::Name((*name).to_string()));
            at += name.len();
            continue;
        }
        text.push(ch);
        at += ch.len_utf8();
    }
    flush(&mut text, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Column, RowKey};
    use approx::assert_relative_eq;
    use faer::Mat;

    fn sample_table() -> WideTable {
        let keys = (1..=3)
            .map(|draw| RowKey {
                chain_id: 1,
                iteration: draw,
                draw,
                row: 0,
            })
            .collect::<Vec<_>>();
        let columns = ["(Intercept)", "a", "b"]
            .iter()
            .enumerate()
            .map(|(col, name)| Column {
                name: (*name).to_string(),
                source: ColumnSource::Coefficient {
                    variable: "beta".to_string(),
                    col,
                },
            })
            .collect();
        // (Intercept) = 1, a = 3 * draw, b = draw
        let values = Mat::from_fn(3, 3, |i, j| {
            let draw = f64::from(u32::try_from(i + 1).unwrap_or(0));
            match j {
                0 => 1.0,
                1 => 3.0 * draw,
                _ => draw,
            }
        });
        WideTable::new(keys, columns, values).expect("table")
    }

    #[test]
    fn extracts_identifiers_without_numeric_factors() {
        assert_eq!(
            referenced_identifiers("2/3*a - b", &["a", "b"]),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(
            referenced_identifiers("0.5 * a + (b - a) / 2", &[]),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn protects_quoted_and_non_bare_column_names() {
        let columns = ["(Intercept)", "type-A"];
        assert_eq!(
            referenced_identifiers("(Intercept) - type-A", &columns),
            vec!["(Intercept)".to_string(), "type-A".to_string()]
        );
        assert_eq!(
            referenced_identifiers("`x y` + z", &columns),
            vec!["x y".to_string(), "z".to_string()]
        );
        assert_eq!(
            escape_formula("(Intercept) - `type-A`", &columns),
            "`(Intercept)` - `type-A`"
        );
    }

    #[test]
    fn protection_respects_word_boundaries() {
        let columns = ["1st"];
        assert_eq!(escape_formula("a1st + 1st", &columns), "a1st + `1st`");
    }

    #[test]
    fn evaluates_contrasts_in_order() {
        let contrasts = ContrastSet::new()
            .with_contrast("diff", "2/3*a - b")
            .with_contrast("scaled", "diff * (Intercept)");
        let outcome =
            apply_contrasts(sample_table(), &contrasts, ErrorMode::Strict).expect("contrasts");
        assert!(outcome.warnings.is_empty());
        let diff = outcome.table.column_values("diff").expect("diff column");
        for (i, value) in diff.iter().enumerate() {
            let draw = f64::from(u32::try_from(i + 1).unwrap_or(0));
            assert_relative_eq!(*value, draw, epsilon = 1e-12);
        }
        assert_eq!(
            outcome.table.column_values("scaled"),
            outcome.table.column_values("diff")
        );
        assert_eq!(
            outcome.table.columns()[3].source,
            ColumnSource::Contrast {
                formula: "2/3*a - b".to_string()
            }
        );
    }

    #[test]
    fn strict_mode_names_all_missing_identifiers() {
        let contrasts = ContrastSet::from_formulas(["a - c", "d + b"]);
        let err = apply_contrasts(sample_table(), &contrasts, ErrorMode::Strict)
            .expect_err("c and d are missing");
        assert_eq!(
            err,
            ContrastError::MissingIdentifiers(vec!["c".to_string(), "d".to_string()])
        );
    }

    #[test]
    fn lenient_mode_adds_nan_column_and_warns() {
        let table = sample_table();
        let without_b = WideTable::new(
            table.keys().to_vec(),
            table.columns()[..2].to_vec(),
            Mat::from_fn(3, 2, |i, j| table.value(i, j)),
        )
        .expect("table without b");
        let contrasts = ContrastSet::from_formulas(["2/3*a - b"]);
        let outcome =
            apply_contrasts(without_b, &contrasts, ErrorMode::Lenient).expect("lenient");
        assert_eq!(
            outcome.warnings,
            vec![ContrastWarning::MissingIdentifiers(vec!["b".to_string()])]
        );
        let values = outcome.table.column_values("2/3*a - b").expect("column exists");
        assert!(values.iter().all(|value| value.is_nan()));
    }

    #[test]
    fn lenient_mode_survives_unparseable_formulas() {
        let contrasts = ContrastSet::from_formulas(["a.b + a"]);
        let outcome =
            apply_contrasts(sample_table(), &contrasts, ErrorMode::Lenient).expect("lenient");
        assert!(matches!(
            outcome.warnings.as_slice(),
            [
                ContrastWarning::RequiresQuoting(_),
                ContrastWarning::MissingIdentifiers(_),
                ContrastWarning::Evaluation { .. }
            ]
        ));
        let values = outcome.table.column_values("a.b + a").expect("column exists");
        assert!(values.iter().all(|value| value.is_nan()));

        let err = apply_contrasts(
            sample_table(),
            &ContrastSet::from_formulas(["a +"]),
            ErrorMode::Strict,
        )
        .expect_err("syntax error");
        assert!(matches!(err, ContrastError::Evaluation { .. }));
    }

    #[test]
    fn contrast_names_must_be_new() {
        let contrasts = ContrastSet::new().with_contrast("a", "b");
        let err = apply_contrasts(sample_table(), &contrasts, ErrorMode::Lenient)
            .expect_err("duplicate column");
        assert_eq!(err, ContrastError::Table(TableError::DuplicateColumn("a".to_string())));
    }
}
