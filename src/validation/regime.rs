//! Market-regime breakdown of executed trades

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::fitness::profit_factor;
use crate::simulator::SimOutcome;
use crate::types::{IndicatorSnapshot, SimulationRow};

pub const HIGH_VOLATILITY_PCT: f64 = 3.0;
pub const TRENDING_ADX: f64 = 25.0;
pub const SIDEWAYS_ADX: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    HighVolatility,
    Trending,
    Sideways,
}

impl MarketRegime {
    pub const ALL: [MarketRegime; 3] = [
        MarketRegime::HighVolatility,
        MarketRegime::Trending,
        MarketRegime::Sideways,
    ];

    /// Volatility wins over trend strength; the ADX gap between the
    /// sideways and trending cut-offs counts as trending
    pub fn classify(ind: &IndicatorSnapshot) -> Self {
        if ind.volatility_pct >= HIGH_VOLATILITY_PCT {
            MarketRegime::HighVolatility
        } else if ind.adx >= TRENDING_ADX {
            MarketRegime::Trending
        } else if ind.adx < SIDEWAYS_ADX {
            MarketRegime::Sideways
        } else {
            MarketRegime::Trending
        }
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MarketRegime::HighVolatility => "high_volatility",
            MarketRegime::Trending => "trending",
            MarketRegime::Sideways => "sideways",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeStats {
    pub regime: MarketRegime,
    pub trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeBreakdown {
    pub buckets: Vec<RegimeStats>,
}

impl RegimeBreakdown {
    /// `rows` and `outcomes` are parallel; only exited trades count
    pub fn from_outcomes(rows: &[SimulationRow], outcomes: &[SimOutcome]) -> Self {
        let mut pnls: [Vec<f64>; 3] = Default::default();
        for (row, outcome) in rows.iter().zip(outcomes) {
            let Some(trade) = outcome.trade().filter(|t| t.is_exited()) else {
                continue;
            };
            let slot = match MarketRegime::classify(&row.indicators) {
                MarketRegime::HighVolatility => 0,
                MarketRegime::Trending => 1,
                MarketRegime::Sideways => 2,
            };
            pnls[slot].push(trade.pnl_pct);
        }

        let buckets = MarketRegime::ALL
            .iter()
            .zip(pnls.iter())
            .map(|(regime, pnls)| {
                let wins = pnls.iter().filter(|p| **p > 0.0).count();
                RegimeStats {
                    regime: *regime,
                    trades: pnls.len(),
                    win_rate: if pnls.is_empty() {
                        0.0
                    } else {
                        wins as f64 / pnls.len() as f64
                    },
                    profit_factor: profit_factor(pnls),
                }
            })
            .collect();

        RegimeBreakdown { buckets }
    }

    pub fn get(&self, regime: MarketRegime) -> Option<&RegimeStats> {
        self.buckets.iter().find(|b| b.regime == regime)
    }
}
