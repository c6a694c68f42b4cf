//! Acceptance gates and the final verdict

use serde::{Deserialize, Serialize};
use std::fmt;

use super::regime::RegimeStats;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateThresholds {
    pub min_test_trades: usize,
    /// Minimum test-fitness improvement over baseline, in percent
    pub min_fitness_improvement_pct: f64,
    /// Minimum absolute test profit-factor improvement
    pub min_pf_improvement: f64,
    pub significance_alpha: f64,
    /// Maximum (train - validation) / train for the candidate
    pub max_train_validation_gap: f64,
    pub min_sideways_pf: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        GateThresholds {
            min_test_trades: 20,
            min_fitness_improvement_pct: 5.0,
            min_pf_improvement: 0.1,
            significance_alpha: 0.05,
            max_train_validation_gap: 0.3,
            min_sideways_pf: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateSeverity {
    Required,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub name: String,
    pub severity: GateSeverity,
    pub passed: bool,
    pub value: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Proposable,
    Conditional,
    Rejected,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Proposable => "PROPOSABLE",
            Verdict::Conditional => "CONDITIONAL",
            Verdict::Rejected => "REJECTED",
        };
        write!(f, "{}", s)
    }
}

/// Measurements the gates are evaluated on
#[derive(Debug, Clone, Copy)]
pub struct GateInputs<'a> {
    pub test_trades: usize,
    pub candidate_test_fitness: f64,
    pub baseline_test_fitness: f64,
    pub candidate_test_pf: f64,
    pub baseline_test_pf: f64,
    pub bootstrap_p_value: f64,
    pub candidate_train_fitness: f64,
    pub candidate_validation_fitness: f64,
    pub sideways: Option<&'a RegimeStats>,
}

/// Percent change over baseline; a non-positive baseline counts any
/// positive candidate as a 100% improvement
pub fn improvement_pct(candidate: f64, baseline: f64) -> f64 {
    if baseline > 0.0 {
        (candidate - baseline) / baseline * 100.0
    } else if candidate > 0.0 {
        100.0
    } else {
        0.0
    }
}

/// Relative train/validation gap; zero when train fitness is not positive
pub fn relative_gap(train: f64, validation: f64) -> f64 {
    if train > 0.0 {
        (train - validation) / train
    } else {
        0.0
    }
}

pub fn evaluate_gates(inputs: &GateInputs<'_>, t: &GateThresholds) -> Vec<GateResult> {
    let required = |name: &str, passed: bool, value: f64, threshold: f64| GateResult {
        name: name.to_string(),
        severity: GateSeverity::Required,
        passed,
        value,
        threshold,
    };

    let fitness_gain = improvement_pct(inputs.candidate_test_fitness, inputs.baseline_test_fitness);
    let pf_gain = inputs.candidate_test_pf - inputs.baseline_test_pf;
    let gap = relative_gap(inputs.candidate_train_fitness, inputs.candidate_validation_fitness);

    // No sideways trades means nothing to flag
    let (sideways_pf, sideways_ok) = match inputs.sideways.filter(|s| s.trades > 0) {
        Some(s) => (s.profit_factor, s.profit_factor >= t.min_sideways_pf),
        None => (0.0, true),
    };

    vec![
        required(
            "min_test_trades",
            inputs.test_trades >= t.min_test_trades,
            inputs.test_trades as f64,
            t.min_test_trades as f64,
        ),
        required(
            "fitness_improvement",
            fitness_gain >= t.min_fitness_improvement_pct,
            fitness_gain,
            t.min_fitness_improvement_pct,
        ),
        required(
            "profit_factor_improvement",
            pf_gain >= t.min_pf_improvement,
            pf_gain,
            t.min_pf_improvement,
        ),
        required(
            "bootstrap_significance",
            inputs.bootstrap_p_value < t.significance_alpha,
            inputs.bootstrap_p_value,
            t.significance_alpha,
        ),
        required(
            "train_validation_gap",
            gap <= t.max_train_validation_gap,
            gap,
            t.max_train_validation_gap,
        ),
        GateResult {
            name: "sideways_profit_factor".to_string(),
            severity: GateSeverity::Warning,
            passed: sideways_ok,
            value: sideways_pf,
            threshold: t.min_sideways_pf,
        },
    ]
}

pub fn verdict(gates: &[GateResult]) -> Verdict {
    let failed = |severity| gates.iter().any(|g| g.severity == severity && !g.passed);
    if failed(GateSeverity::Required) {
        Verdict::Rejected
    } else if failed(GateSeverity::Warning) {
        Verdict::Conditional
    } else {
        Verdict::Proposable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::regime::MarketRegime;

    fn strong_inputs(sideways: Option<&RegimeStats>) -> GateInputs<'_> {
        GateInputs {
            test_trades: 40,
            candidate_test_fitness: 1.2,
            baseline_test_fitness: 0.8,
            candidate_test_pf: 1.9,
            baseline_test_pf: 1.3,
            bootstrap_p_value: 0.01,
            candidate_train_fitness: 1.3,
            candidate_validation_fitness: 1.1,
            sideways,
        }
    }

    #[test]
    fn test_clean_candidate_is_proposable() {
        let gates = evaluate_gates(&strong_inputs(None), &GateThresholds::default());
        assert_eq!(gates.len(), 6);
        assert!(gates.iter().all(|g| g.passed));
        assert_eq!(verdict(&gates), Verdict::Proposable);
    }

    #[test]
    fn test_weak_sideways_is_conditional() {
        let sideways = RegimeStats {
            regime: MarketRegime::Sideways,
            trades: 8,
            win_rate: 0.3,
            profit_factor: 0.7,
        };
        let gates = evaluate_gates(&strong_inputs(Some(&sideways)), &GateThresholds::default());
        assert_eq!(verdict(&gates), Verdict::Conditional);
    }

    #[test]
    fn test_failed_required_gate_rejects() {
        let mut inputs = strong_inputs(None);
        inputs.bootstrap_p_value = 0.2;
        let gates = evaluate_gates(&inputs, &GateThresholds::default());
        assert_eq!(verdict(&gates), Verdict::Rejected);

        let mut inputs = strong_inputs(None);
        inputs.candidate_validation_fitness = 0.5;
        let gates = evaluate_gates(&inputs, &GateThresholds::default());
        let gap = gates.iter().find(|g| g.name == "train_validation_gap").unwrap();
        assert!(!gap.passed);
    }

    #[test]
    fn test_improvement_over_zero_baseline() {
        assert_eq!(improvement_pct(0.5, 0.0), 100.0);
        assert_eq!(improvement_pct(0.0, 0.0), 0.0);
        assert!((improvement_pct(1.1, 1.0) - 10.0).abs() < 1e-9);
    }
}
