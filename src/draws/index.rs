//! Parsing of flat parameter names such as `beta[3,7]` or `2.beta[3,7]`.

use std::sync::LazyLock;

use regex::Regex;

static PARAMETER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:([1-9][0-9]*)\.)?([A-Za-z0-9_.]+)\[\s*([0-9]+)\s*,\s*([0-9]+)")
        .expect("parameter name grammar is a valid regex")
});

/// Indices of a matrix-shaped parameter, exactly as written in its name
/// (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterIndex {
    /// Optional numeric chain prefix, e.g. `2` in `2.beta[1,1]`.
    pub chain_prefix: Option<u32>,
    pub variable: String,
    pub row: usize,
    pub col: usize,
}

impl ParameterIndex {
    /// Parse `[<chain>.]<variable>[<row>,<col>`; text after the second index
    /// is ignored.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let caps = PARAMETER_NAME.captures(name)?;
        let chain_prefix = match caps.get(1) {
            Some(prefix) => Some(prefix.as_str().parse().ok()?),
            None => None,
        };
        Some(Self {
            chain_prefix,
            variable: caps.get(2)?.as_str().to_string(),
            row: caps.get(3)?.as_str().parse().ok()?,
            col: caps.get(4)?.as_str().parse().ok()?,
        })
    }

    /// `(row, col)` translated to 0-based positions; `None` if either index
    /// is 0.
    #[must_use]
    pub const fn to_zero_based(&self) -> Option<(usize, usize)> {
        match (self.row.checked_sub(1), self.col.checked_sub(1)) {
            (Some(row), Some(col)) => Some((row, col)),
            _ => None,
        }
    }
}

/// Variable part of any flat parameter name: `beta` for `beta[1,2]`,
/// `sigma` for `sigma`, `beta` for `2.beta[1,1]`.
#[must_use]
pub fn variable_component(name: &str) -> &str {
    let stem = name.split_once('[').map_or(name, |(stem, _)| stem).trim();
    match stem.split_once('.') {
        Some((prefix, rest))
            if !rest.is_empty()
                && !prefix.is_empty()
                && prefix.bytes().all(|b| b.is_ascii_digit()) =>
        {
            rest
        }
        _ => stem,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_matrix_names() {
        let index = ParameterIndex::parse("beta[3,7]").expect("valid name");
        assert_eq!(
            index,
            ParameterIndex {
                chain_prefix: None,
                variable: "beta".to_string(),
                row: 3,
                col: 7,
            }
        );
    }

    #[test]
    fn parses_chain_prefix_and_ignores_trailing_text() {
        let index = ParameterIndex::parse("2.random_effect[10,4]").expect("valid name");
        assert_eq!(index.chain_prefix, Some(2));
        assert_eq!(index.variable, "random_effect");
        assert_eq!((index.row, index.col), (10, 4));

        let index = ParameterIndex::parse("beta[1,2,3]").expect("third index ignored");
        assert_eq!((index.row, index.col), (1, 2));
    }

    #[test]
    fn tolerates_dots_digits_and_spaces() {
        let index = ParameterIndex::parse("prec.coeff_2[ 4, 5 ]").expect("valid name");
        assert_eq!(index.chain_prefix, None);
        assert_eq!(index.variable, "prec.coeff_2");
        assert_eq!((index.row, index.col), (4, 5));
    }

    #[test]
    fn rejects_scalars_and_vectors() {
        assert!(ParameterIndex::parse("sigma").is_none());
        assert!(ParameterIndex::parse("alpha[3]").is_none());
        assert!(ParameterIndex::parse("[1,2]").is_none());
    }

    #[test]
    fn recovers_every_generated_name() {
        for variable in ["beta", "random_effect_2", "x.y", "b0"] {
            for row in 1..=4 {
                for col in 1..=3 {
                    let name = format!("{variable}[{row},{col}]");
                    let index = ParameterIndex::parse(&name).expect("generated name");
                    assert_eq!(index.variable, variable);
                    assert_eq!((index.row, index.col), (row, col));
                }
            }
        }
    }

    #[test]
    fn zero_based_translation_rejects_zero() {
        let index = ParameterIndex::parse("beta[1,3]").expect("valid name");
        assert_eq!(index.to_zero_based(), Some((0, 2)));
        let index = ParameterIndex::parse("beta[0,3]").expect("valid name");
        assert_eq!(index.to_zero_based(), None);
    }

    #[test]
    fn variable_component_handles_scalars_and_prefixes() {
        assert_eq!(variable_component("beta[1,2]"), "beta");
        assert_eq!(variable_component("sigma"), "sigma");
        assert_eq!(variable_component("1.beta[1,1]"), "beta");
        assert_eq!(variable_component("x.y[2,2]"), "x.y");
    }
}
