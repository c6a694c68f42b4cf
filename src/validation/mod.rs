//! Statistical validation of candidate configurations
//!
//! Each candidate is checked against the baseline with a bootstrap test on
//! test-split P&L, a walk-forward consistency run over all rows and a
//! market-regime breakdown; the results feed a fixed set of gates that
//! decide the verdict.

pub mod bootstrap;
pub mod gates;
pub mod regime;
pub mod walk_forward;

pub use bootstrap::{bootstrap_pf_delta, BootstrapResult};
pub use gates::{evaluate_gates, verdict, GateInputs, GateResult, GateSeverity, GateThresholds, Verdict};
pub use regime::{MarketRegime, RegimeBreakdown, RegimeStats};
pub use walk_forward::{walk_forward, WalkForwardResult, WalkForwardSettings, WindowResult};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::fitness::{DataSplit, FitnessEvaluator, SplitEvaluation};
use crate::params::ResolvedConfig;
use crate::types::SimulationRow;

/// `validation` section of the run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    pub bootstrap_iterations: usize,
    /// Below this many trades on either side the bootstrap reports p = 1
    pub min_bootstrap_trades: usize,
    pub walk_forward: WalkForwardSettings,
    pub gates: GateThresholds,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        ValidationSettings {
            bootstrap_iterations: 1000,
            min_bootstrap_trades: 5,
            walk_forward: WalkForwardSettings::default(),
            gates: GateThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub bootstrap: BootstrapResult,
    pub walk_forward: WalkForwardResult,
    pub regimes: RegimeBreakdown,
    pub gates: Vec<GateResult>,
    pub verdict: Verdict,
}

/// A configuration together with its per-split evaluation
#[derive(Debug, Clone, Copy)]
pub struct Scored<'a> {
    pub config: &'a ResolvedConfig,
    pub splits: &'a SplitEvaluation,
}

pub struct Validator<'a> {
    evaluator: FitnessEvaluator<'a>,
    settings: ValidationSettings,
}

impl<'a> Validator<'a> {
    pub fn new(evaluator: FitnessEvaluator<'a>, settings: ValidationSettings) -> Self {
        Validator { evaluator, settings }
    }

    pub fn validate<R: Rng + ?Sized>(
        &self,
        rows: &[SimulationRow],
        split: &DataSplit<'_>,
        candidate: Scored<'_>,
        baseline: Scored<'_>,
        rng: &mut R,
    ) -> ValidationReport {
        let s = &self.settings;

        let bootstrap = bootstrap_pf_delta(
            &candidate.splits.test.stats.pnls,
            &baseline.splits.test.stats.pnls,
            s.bootstrap_iterations,
            s.gates.significance_alpha,
            s.min_bootstrap_trades,
            rng,
        );

        let walk_forward = walk_forward(
            rows,
            candidate.config,
            baseline.config,
            &self.evaluator,
            &s.walk_forward,
        );

        let test_outcomes = self.evaluator.outcomes(split.test, candidate.config);
        let regimes = RegimeBreakdown::from_outcomes(split.test, &test_outcomes);

        let inputs = GateInputs {
            test_trades: candidate.splits.test.stats.executed,
            candidate_test_fitness: candidate.splits.test.fitness,
            baseline_test_fitness: baseline.splits.test.fitness,
            candidate_test_pf: candidate.splits.test.stats.profit_factor,
            baseline_test_pf: baseline.splits.test.stats.profit_factor,
            bootstrap_p_value: bootstrap.p_value,
            candidate_train_fitness: candidate.splits.train.fitness,
            candidate_validation_fitness: candidate.splits.validation.fitness,
            sideways: regimes.get(MarketRegime::Sideways),
        };
        let gates = evaluate_gates(&inputs, &s.gates);
        let verdict = verdict(&gates);

        ValidationReport {
            bootstrap,
            walk_forward,
            regimes,
            gates,
            verdict,
        }
    }
}
