//! Walk-forward consistency over overlapping sliding windows

use serde::{Deserialize, Serialize};

use crate::fitness::FitnessEvaluator;
use crate::params::ResolvedConfig;
use crate::types::SimulationRow;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkForwardSettings {
    pub windows: usize,
    /// Fraction of a window shared with the next one
    pub overlap: f64,
    /// Trailing fraction of each window used as its test slice
    pub test_fraction: f64,
    pub min_window_size: usize,
    /// Fraction of windows that must favour the candidate
    pub consistency_ratio: f64,
}

impl Default for WalkForwardSettings {
    fn default() -> Self {
        WalkForwardSettings {
            windows: 5,
            overlap: 0.5,
            test_fraction: 0.3,
            min_window_size: 100,
            consistency_ratio: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowResult {
    pub index: usize,
    /// Row range of the whole window
    pub start: usize,
    pub end: usize,
    pub test_signals: usize,
    pub candidate_pf: f64,
    pub baseline_pf: f64,
    pub delta: f64,
    pub positive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardResult {
    pub windows: Vec<WindowResult>,
    pub window_count: usize,
    pub positive_count: usize,
    pub required_positive: usize,
    pub consistent: bool,
}

/// `(start, end)` row ranges of the sliding windows.
///
/// Sized so `windows` windows with the configured overlap span all rows,
/// but never smaller than `min_window_size`; windows that would run past
/// the end are dropped.
pub fn window_bounds(rows: usize, settings: &WalkForwardSettings) -> Vec<(usize, usize)> {
    let k = settings.windows.max(1);
    let overlap = settings.overlap.clamp(0.0, 0.95);
    let span = 1.0 + (k as f64 - 1.0) * (1.0 - overlap);
    let size = ((rows as f64 / span).floor() as usize).max(settings.min_window_size).max(1);
    let step = ((size as f64 * (1.0 - overlap)).floor() as usize).max(1);

    (0..k)
        .map(|i| (i * step, i * step + size))
        .take_while(|(_, end)| *end <= rows)
        .collect()
}

pub fn walk_forward(
    rows: &[SimulationRow],
    candidate: &ResolvedConfig,
    baseline: &ResolvedConfig,
    evaluator: &FitnessEvaluator<'_>,
    settings: &WalkForwardSettings,
) -> WalkForwardResult {
    let windows: Vec<WindowResult> = window_bounds(rows.len(), settings)
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| {
            let len = end - start;
            let test_len = ((len as f64 * settings.test_fraction).ceil() as usize).clamp(1, len);
            let test = &rows[end - test_len..end];

            let candidate_pf = evaluator.evaluate(test, candidate).stats.profit_factor;
            let baseline_pf = evaluator.evaluate(test, baseline).stats.profit_factor;
            let delta = candidate_pf - baseline_pf;
            WindowResult {
                index,
                start,
                end,
                test_signals: test.len(),
                candidate_pf,
                baseline_pf,
                delta,
                positive: delta > 0.0,
            }
        })
        .collect();

    let window_count = windows.len();
    let positive_count = windows.iter().filter(|w| w.positive).count();
    let required_positive = (settings.consistency_ratio * window_count as f64).ceil() as usize;

    tracing::debug!(
        "Walk-forward: {}/{} windows positive (need {})",
        positive_count,
        window_count,
        required_positive
    );

    WalkForwardResult {
        windows,
        window_count,
        positive_count,
        required_positive,
        consistent: window_count > 0 && positive_count >= required_positive,
    }
}
