//! Bootstrap significance of a profit-factor improvement

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::fitness::profit_factor;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BootstrapResult {
    /// Fraction of resamples where the candidate was not better
    pub p_value: f64,
    pub significant: bool,
    pub iterations: usize,
    /// Profit-factor delta on the original (unresampled) lists
    pub observed_delta: f64,
    pub candidate_trades: usize,
    pub baseline_trades: usize,
}

fn resample<R: Rng + ?Sized>(values: &[f64], out: &mut Vec<f64>, rng: &mut R) {
    out.clear();
    out.extend((0..values.len()).map(|_| values[rng.gen_range(0..values.len())]));
}

/// Paired bootstrap of the candidate-minus-baseline profit factor.
///
/// Lists shorter than `min_trades` (or zero iterations) give p = 1.0.
pub fn bootstrap_pf_delta<R: Rng + ?Sized>(
    candidate: &[f64],
    baseline: &[f64],
    iterations: usize,
    alpha: f64,
    min_trades: usize,
    rng: &mut R,
) -> BootstrapResult {
    let observed_delta = profit_factor(candidate) - profit_factor(baseline);
    let mut result = BootstrapResult {
        p_value: 1.0,
        significant: false,
        iterations: 0,
        observed_delta,
        candidate_trades: candidate.len(),
        baseline_trades: baseline.len(),
    };

    let min_trades = min_trades.max(1);
    if candidate.len() < min_trades || baseline.len() < min_trades || iterations == 0 {
        return result;
    }

    let mut cand_sample = Vec::with_capacity(candidate.len());
    let mut base_sample = Vec::with_capacity(baseline.len());
    let mut not_better = 0usize;
    for _ in 0..iterations {
        resample(candidate, &mut cand_sample, rng);
        resample(baseline, &mut base_sample, rng);
        if profit_factor(&cand_sample) - profit_factor(&base_sample) <= 0.0 {
            not_better += 1;
        }
    }

    result.iterations = iterations;
    result.p_value = not_better as f64 / iterations as f64;
    result.significant = result.p_value < alpha;
    result
}
