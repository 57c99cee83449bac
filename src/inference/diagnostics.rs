//! MCMC convergence diagnostics used by the in-memory engine.

use statrs::statistics::Statistics;

use crate::utils::usize_to_f64;

/// Lag-`k` autocorrelation for a scalar chain.
#[must_use]
pub fn autocorrelation(series: &[f64], lag: usize) -> f64 {
    if series.is_empty() || lag >= series.len() {
        return 0.0;
    }

    let n = series.len() - lag;
    let mean = series.iter().mean();

    let denominator = series
        .iter()
        .map(|value| {
            let centered = value - mean;
            centered * centered
        })
        .sum::<f64>();
    if denominator <= 0.0 {
        return 0.0;
    }

    let numerator = (0..n)
        .map(|idx| (series[idx] - mean) * (series[idx + lag] - mean))
        .sum::<f64>();

    numerator / denominator
}

/// Heuristic effective sample size using positive autocorrelation truncation.
#[must_use]
pub fn effective_sample_size(series: &[f64]) -> f64 {
    let n = series.len();
    if n < 2 {
        return usize_to_f64(n);
    }

    let mut rho_sum = 0.0;
    for lag in 1..n {
        let rho = autocorrelation(series, lag);
        if rho <= 0.0 {
            break;
        }
        rho_sum += rho;
    }

    usize_to_f64(n) / (2.0f64.mul_add(rho_sum, 1.0)).max(1.0)
}

/// Effective sample size pooled across chains (sum of per-chain estimates).
#[must_use]
pub fn pooled_effective_sample_size(chains: &[&[f64]]) -> f64 {
    chains
        .iter()
        .map(|chain| effective_sample_size(chain))
        .sum()
}

/// Split-R-hat across chains.
///
/// Chains are truncated to the shortest even length and each is split in
/// half. Returns `None` with fewer than two chains or fewer than four draws
/// per chain.
#[must_use]
pub fn split_rhat(chains: &[&[f64]]) -> Option<f64> {
    if chains.len() < 2 {
        return None;
    }
    let min_draws = chains.iter().map(|chain| chain.len()).min().unwrap_or(0);
    let used = min_draws - (min_draws % 2);
    if used < 4 {
        return None;
    }

    let half = used / 2;
    let split_chains = chains
        .iter()
        .flat_map(|chain| [&chain[..half], &chain[half..used]])
        .collect::<Vec<_>>();

    Some(rhat_scalar(&split_chains, half))
}

fn rhat_scalar(chains: &[&[f64]], n: usize) -> f64 {
    let chain_means = chains
        .iter()
        .map(|chain| chain.iter().mean())
        .collect::<Vec<_>>();
    let within = chains
        .iter()
        .map(|chain| chain.iter().variance())
        .collect::<Vec<_>>()
        .mean();
    let between = usize_to_f64(n) * chain_means.iter().variance();

    if !(within.is_finite() && within > 0.0 && between.is_finite()) {
        return 1.0;
    }

    let n_f64 = usize_to_f64(n);
    let var_plus = ((n_f64 - 1.0) / n_f64).mul_add(within, between / n_f64);
    if !var_plus.is_finite() || var_plus <= 0.0 {
        return 1.0;
    }

    (var_plus / within).sqrt().max(1.0)
}
