use std::collections::BTreeSet;

use abundance_draws::{
    AbundanceContrasts, AbundanceError, AbundanceModel, AbundanceOptions, ContrastDraws,
    ContrastSet, ContrastWarning, DrawFrame, InMemoryFit, InferenceError, ModelDescription,
    PosteriorFit, SummaryFrame, TableError, render_summary_table,
};
use approx::assert_relative_eq;

fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_string()).collect()
}

fn idx_to_f64(idx: usize) -> f64 {
    f64::from(u32::try_from(idx).unwrap_or(u32::MAX))
}

/// 2 chains x 3 draws. `beta` is 2 categories x 2 design columns; the random
/// effects are 2 categories x 1 observed level each.
fn sample_fit() -> InMemoryFit {
    let parameters = names(&[
        "beta[1,1]",
        "beta[1,2]",
        "beta[2,1]",
        "beta[2,2]",
        "random_effect[1,1]",
        "random_effect[2,1]",
        "random_effect_2[1,1]",
        "random_effect_2[2,1]",
        "lp__",
    ]);
    InMemoryFit::from_fn(parameters, 2, 3, |chain, iteration, param| {
        f64::from(chain) * 0.1 + idx_to_f64(iteration) * 0.01 + idx_to_f64(param)
    })
}

fn description() -> ModelDescription {
    ModelDescription::new(names(&["(Intercept)", "typecancer"]), names(&["B cell", "T cell"]))
}

fn expect_draws(result: AbundanceContrasts) -> ContrastDraws {
    match result {
        AbundanceContrasts::Draws(draws) => draws,
        AbundanceContrasts::GroupsOnly(groups) => panic!("expected draws, got {groups:?}"),
    }
}

#[test]
fn fixed_effect_workflow_yields_six_draws_per_category() {
    let model = AbundanceModel::new(sample_fit(), description());
    let result = expect_draws(model.contrast_draws(None).expect("pipeline should succeed"));
    let table = result.draws.table();

    assert_eq!(table.nrows(), 12);
    assert_eq!(table.column_names(), vec!["(Intercept)", "typecancer"]);
    for row in 0..2 {
        let draws = table
            .keys()
            .iter()
            .filter(|key| key.row == row)
            .map(|key| key.draw)
            .collect::<Vec<_>>();
        assert_eq!(draws, vec![1, 2, 3, 4, 5, 6]);
    }
    assert_eq!(
        result.draws.groups().iter().map(|g| g.label.as_str()).collect::<Vec<_>>(),
        vec!["B cell", "T cell"]
    );

    // Draw 4 is the first iteration of chain 2; beta[2,2] is parameter 3.
    let t_cell = result.draws.values_for("T cell", "typecancer").expect("values");
    assert_relative_eq!(t_cell[3], 3.2, epsilon = 1e-12);

    assert_eq!(result.convergence.len(), 4);
    let record = result
        .convergence_for("B cell", "typecancer")
        .expect("beta[1,2] summary");
    assert_eq!((record.row, record.col), (0, Some(1)));
    let expected_mean = (0.1 + 0.11 + 0.12 + 0.2 + 0.21 + 0.22) / 6.0 + 1.0;
    assert_relative_eq!(record.mean, expected_mean, epsilon = 1e-12);
    assert_eq!(result.convergence.quantiles(), &[5.0, 25.0, 50.0, 75.0, 95.0]);

    let rendered = render_summary_table(&result.convergence);
    assert!(rendered.contains("R_k_hat"));
    assert!(result.draws.render_preview(3).contains("B cell"));
}

#[test]
fn random_effects_and_contrasts_are_merged_on_draw_keys() {
    let description = description()
        .with_random_effect(names(&["site1", "site_ref"]))
        .with_random_effect(names(&["batch1", "batch_ref"]));
    let contrasts = ContrastSet::new()
        .with_contrast("cancer_vs_site", "typecancer - site1")
        .with_contrast("half_batch", "0.5 * batch_ref");
    let model = AbundanceModel::new(sample_fit(), description);
    let result = expect_draws(model.contrast_draws(Some(&contrasts)).expect("pipeline"));
    let table = result.draws.table();

    assert_eq!(table.nrows(), 12);
    assert_eq!(
        table.column_names(),
        vec![
            "(Intercept)",
            "typecancer",
            "site1",
            "site_ref",
            "batch1",
            "batch_ref",
            "cancer_vs_site",
            "half_batch"
        ]
    );
    assert!(result.warnings.is_empty());

    let col = |name: &str| table.column_values(name).expect(name);
    let (typecancer, site1, site_ref) = (col("typecancer"), col("site1"), col("site_ref"));
    let (batch1, batch_ref, half_batch) = (col("batch1"), col("batch_ref"), col("half_batch"));
    let contrast = col("cancer_vs_site");
    for i in 0..table.nrows() {
        assert_relative_eq!(site_ref[i], -site1[i]);
        assert_relative_eq!(batch_ref[i], -batch1[i]);
        assert_relative_eq!(contrast[i], typecancer[i] - site1[i]);
        assert_relative_eq!(half_batch[i], 0.5 * batch_ref[i]);
    }
}

#[test]
fn lenient_contrasts_report_missing_identifiers() {
    let contrasts = ContrastSet::from_formulas(["typecancer - unknown_group"]);
    let model = AbundanceModel::new(sample_fit(), description());
    let result = expect_draws(model.contrast_draws(Some(&contrasts)).expect("lenient"));

    assert_eq!(
        result.warnings,
        vec![ContrastWarning::MissingIdentifiers(names(&["unknown_group"]))]
    );
    let values = result
        .draws
        .table()
        .column_values("typecancer - unknown_group")
        .expect("column is still added");
    assert!(values.iter().all(|value| value.is_nan()));
}

/// Delegates to an in-memory fit but renumbers the iterations of one
/// variable, so its draws no longer line up with the others.
struct MisalignedFit {
    inner: InMemoryFit,
    shifted_variable: &'static str,
}

impl PosteriorFit for MisalignedFit {
    fn variable_names(&self) -> BTreeSet<String> {
        self.inner.variable_names()
    }

    fn draws_long(&self, variables: &[String]) -> Result<DrawFrame, InferenceError> {
        let mut frame = self.inner.draws_long(variables)?;
        if variables.iter().any(|v| v == self.shifted_variable) {
            for iteration in &mut frame.iterations {
                *iteration += 1_000;
            }
        }
        Ok(frame)
    }

    fn summary(&self, quantiles: &[f64]) -> Result<SummaryFrame, InferenceError> {
        self.inner.summary(quantiles)
    }
}

#[test]
fn misaligned_random_effect_draws_are_rejected_unless_tolerated() {
    let fit = MisalignedFit {
        inner: sample_fit(),
        shifted_variable: "random_effect",
    };
    let description = description().with_random_effect(names(&["site1", "site_ref"]));
    let model = AbundanceModel::new(fit, description);

    let err = model.contrast_draws(None).expect_err("keys do not align");
    assert_eq!(
        err,
        AbundanceError::Table(TableError::MissingKeys {
            missing: 12,
            rows: 12
        })
    );

    let tolerant =
        model.with_options(AbundanceOptions::default().with_tolerate_missing_keys(true));
    let result = expect_draws(tolerant.contrast_draws(None).expect("tolerated"));
    let table = result.draws.table();
    assert_eq!(table.nrows(), 12);
    assert!(
        table
            .column_values("site_ref")
            .expect("site_ref")
            .iter()
            .all(|value| value.is_nan())
    );
}

#[test]
fn summaries_without_diagnostics_yield_nan() {
    let model = AbundanceModel::new(sample_fit().without_diagnostics(), description());
    let result = expect_draws(model.contrast_draws(None).expect("pipeline"));
    assert!(
        result
            .convergence
            .records()
            .iter()
            .all(|record| record.r_k_hat.is_nan() && record.effective_sample_size.is_nan())
    );
}
