//! Fitness evaluation and chronological data splits

use serde::{Deserialize, Serialize};

use crate::params::ResolvedConfig;
use crate::simulator::{simulate, SimOutcome, SimulationSettings, TradeOutcome};
use crate::types::{ScoreTimeline, SimulationRow};

/// Profit factor reported when there are profits and no losses
pub const PROFIT_FACTOR_CAP: f64 = 10.0;

/// Gross profit / gross loss, capped at [`PROFIT_FACTOR_CAP`]
pub fn profit_factor(pnls: &[f64]) -> f64 {
    let gross_profit: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
    let gross_loss: f64 = pnls.iter().filter(|p| **p < 0.0).map(|p| -p).sum();

    if gross_loss > 0.0 {
        (gross_profit / gross_loss).min(PROFIT_FACTOR_CAP)
    } else if gross_profit > 0.0 {
        PROFIT_FACTOR_CAP
    } else {
        0.0
    }
}

/// Trade statistics over a subset of rows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FitnessStats {
    pub signals: usize,
    /// Rows that opened a trade (exited or not)
    pub triggered: usize,
    /// Triggered trades that reached an exit; the only ones scored
    pub executed: usize,
    pub no_exit: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub gross_profit_pct: f64,
    pub gross_loss_pct: f64,
    pub avg_pnl_pct: f64,
    pub total_pnl_pct: f64,
    /// P&L of every executed trade, in row order
    #[serde(skip)]
    pub pnls: Vec<f64>,
}

impl FitnessStats {
    pub fn from_trades<'a>(signals: usize, trades: impl IntoIterator<Item = &'a TradeOutcome>) -> Self {
        let mut stats = FitnessStats {
            signals,
            ..Default::default()
        };

        for trade in trades {
            stats.triggered += 1;
            if !trade.is_exited() {
                stats.no_exit += 1;
                continue;
            }
            stats.executed += 1;
            stats.pnls.push(trade.pnl_pct);
            if trade.pnl_pct > 0.0 {
                stats.wins += 1;
                stats.gross_profit_pct += trade.pnl_pct;
            } else if trade.pnl_pct < 0.0 {
                stats.losses += 1;
                stats.gross_loss_pct -= trade.pnl_pct;
            }
        }

        if stats.executed > 0 {
            stats.win_rate = stats.wins as f64 / stats.executed as f64;
            stats.total_pnl_pct = stats.pnls.iter().sum();
            stats.avg_pnl_pct = stats.total_pnl_pct / stats.executed as f64;
        }
        stats.profit_factor = profit_factor(&stats.pnls);
        stats
    }

    /// win-rate × profit-factor, or 0 below `min_trades` executed trades
    pub fn fitness(&self, min_trades: usize) -> f64 {
        if self.executed < min_trades || self.executed == 0 {
            return 0.0;
        }
        self.win_rate * self.profit_factor
    }
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub fitness: f64,
    pub stats: FitnessStats,
}

/// Replays and simulates every row under one configuration
#[derive(Debug, Clone, Copy)]
pub struct FitnessEvaluator<'a> {
    pub timeline: &'a ScoreTimeline,
    pub settings: SimulationSettings,
    pub min_trades: usize,
}

impl<'a> FitnessEvaluator<'a> {
    pub fn new(timeline: &'a ScoreTimeline, settings: SimulationSettings, min_trades: usize) -> Self {
        Self {
            timeline,
            settings,
            min_trades,
        }
    }

    pub fn outcomes(&self, rows: &[SimulationRow], config: &ResolvedConfig) -> Vec<SimOutcome> {
        rows.iter()
            .map(|row| simulate(row, config, self.timeline, &self.settings))
            .collect()
    }

    pub fn evaluate(&self, rows: &[SimulationRow], config: &ResolvedConfig) -> Evaluation {
        let outcomes = self.outcomes(rows, config);
        let stats = FitnessStats::from_trades(rows.len(), outcomes.iter().filter_map(|o| o.trade()));
        Evaluation {
            fitness: stats.fitness(self.min_trades),
            stats,
        }
    }

    pub fn fitness(&self, rows: &[SimulationRow], config: &ResolvedConfig) -> f64 {
        self.evaluate(rows, config).fitness
    }
}

// ============================================================================
// Splits
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatios {
    pub train: f64,
    pub validation: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        SplitRatios {
            train: 0.6,
            validation: 0.2,
        }
    }
}

/// Chronological partition. The test split takes the remainder.
#[derive(Debug, Clone, Copy)]
pub struct DataSplit<'a> {
    pub train: &'a [SimulationRow],
    pub validation: &'a [SimulationRow],
    pub test: &'a [SimulationRow],
}

/// Split rows, which must already be in timestamp order, without shuffling
pub fn split(rows: &[SimulationRow], ratios: SplitRatios) -> DataSplit<'_> {
    let n = rows.len();
    let train_end = ((n as f64 * ratios.train).floor() as usize).min(n);
    let validation_end = (train_end + (n as f64 * ratios.validation).floor() as usize).min(n);

    DataSplit {
        train: &rows[..train_end],
        validation: &rows[train_end..validation_end],
        test: &rows[validation_end..],
    }
}

/// Fitness of one configuration on each split
#[derive(Debug, Clone)]
pub struct SplitEvaluation {
    pub train: Evaluation,
    pub validation: Evaluation,
    pub test: Evaluation,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitScores {
    pub train: f64,
    pub validation: f64,
    pub test: f64,
}

impl SplitEvaluation {
    pub fn compute(evaluator: &FitnessEvaluator<'_>, split: &DataSplit<'_>, config: &ResolvedConfig) -> Self {
        SplitEvaluation {
            train: evaluator.evaluate(split.train, config),
            validation: evaluator.evaluate(split.validation, config),
            test: evaluator.evaluate(split.test, config),
        }
    }

    pub fn scores(&self) -> SplitScores {
        SplitScores {
            train: self.train.fitness,
            validation: self.validation.fitness,
            test: self.test.fitness,
        }
    }
}
