//! Stop-loss / take-profit level computation
//!
//! ATR-based levels with confidence- and volatility-adaptive multipliers,
//! blended toward nearby support/resistance, then constrained by a maximum
//! stop width, a minimum risk:reward and a round-trip fee floor (in that order).

use serde::{Deserialize, Serialize};

use crate::params::{LevelMultipliers, ResolvedConfig, SrBlendBand};
use crate::types::{Side, SimulationRow};

pub const HIGH_CONFIDENCE: f64 = 0.70;
pub const LOW_CONFIDENCE: f64 = 0.40;
/// ATR% band over which target multipliers interpolate low-vol -> high-vol
pub const LOW_VOL_ATR_PCT: f64 = 1.5;
pub const HIGH_VOL_ATR_PCT: f64 = 4.0;
/// Assumed ATR% when the row carries no usable ATR
pub const DEFAULT_ATR_PCT: f64 = 2.0;
pub const MAX_SWING_STOP_PCT: f64 = 8.0;
pub const MAX_DAY_STOP_PCT: f64 = 3.0;
/// Stop distance (in ATR) substituted when risk collapses to zero
pub const DEGENERATE_RISK_ATR: f64 = 1.0;
/// Targets derived from S/R sit this fraction inside the level
pub const SR_TARGET_DISCOUNT: f64 = 0.002;

/// How a level was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelMethod {
    Atr,
    /// Blended toward (or placed on) a support/resistance level
    SrBlend,
    /// Fixed ATR floor after a degenerate risk distance
    AtrFloor,
    /// Target pushed out to meet the minimum risk:reward
    RrTarget,
    /// Target pushed out to cover risk plus round-trip fees
    FeeFloor,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TradeLevels {
    pub side: Side,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub stop_method: LevelMethod,
    pub target_method: LevelMethod,
    /// ATR used for the levels (possibly the default-ATR% fallback)
    pub atr: f64,
    /// Stop multiplier chosen from the confidence tier; reused for trailing
    pub stop_multiplier: f64,
}

impl TradeLevels {
    pub fn risk(&self) -> f64 {
        self.side.sign() * (self.entry - self.stop)
    }

    pub fn reward(&self) -> f64 {
        self.side.sign() * (self.target - self.entry)
    }

    pub fn risk_reward(&self) -> f64 {
        let risk = self.risk();
        if risk > 0.0 {
            self.reward() / risk
        } else {
            0.0
        }
    }
}

/// ATR and ATR% for a row, falling back to `DEFAULT_ATR_PCT` of entry
pub fn effective_atr(row: &SimulationRow) -> (f64, f64) {
    let entry = row.entry_price();
    match row.atr.filter(|a| a.is_finite() && *a > 0.0) {
        Some(atr) => {
            let pct = row
                .atr_pct
                .filter(|p| p.is_finite() && *p > 0.0)
                .unwrap_or(atr / entry * 100.0);
            (atr, pct)
        }
        None => (entry * DEFAULT_ATR_PCT / 100.0, DEFAULT_ATR_PCT),
    }
}

fn stop_multiplier(family: &LevelMultipliers, confidence: f64) -> f64 {
    if confidence >= HIGH_CONFIDENCE {
        family.stop.tightest()
    } else if confidence < LOW_CONFIDENCE {
        family.stop.widest()
    } else {
        family.stop.default()
    }
}

fn target_multiplier(family: &LevelMultipliers, atr_pct: f64) -> f64 {
    let t = (atr_pct - LOW_VOL_ATR_PCT) / (HIGH_VOL_ATR_PCT - LOW_VOL_ATR_PCT);
    family.target.lerp(t)
}

/// Blend an ATR level toward an S/R level by the level's ATR distance.
///
/// At or inside `near_atr` the S/R level is used as-is; at or beyond
/// `far_atr` the ATR level wins; linear in between.
fn blend_with_level(
    entry: f64,
    atr_level: f64,
    sr_level: f64,
    atr: f64,
    band: &SrBlendBand,
) -> Option<f64> {
    let distance = (entry - sr_level).abs() / atr;
    if distance >= band.far_atr {
        return None;
    }
    if distance <= band.near_atr {
        return Some(sr_level);
    }
    let t = (distance - band.near_atr) / (band.far_atr - band.near_atr);
    Some(sr_level + (atr_level - sr_level) * t)
}

/// Compute levels for a trade on `row` in direction `side`
pub fn compute_levels(
    row: &SimulationRow,
    side: Side,
    config: &ResolvedConfig,
    round_trip_fee_pct: f64,
) -> TradeLevels {
    let entry = row.entry_price();
    let sign = side.sign();
    let (atr, atr_pct) = effective_atr(row);

    let (family, max_stop_pct) = match side {
        Side::Buy => (&config.swing, MAX_SWING_STOP_PCT),
        Side::Sell => (&config.day, MAX_DAY_STOP_PCT),
    };
    let stop_mult = stop_multiplier(family, row.confidence);
    let target_mult = target_multiplier(family, atr_pct);

    let mut stop = entry - sign * stop_mult * atr;
    let mut stop_method = LevelMethod::Atr;
    let mut target = entry + sign * target_mult * atr;
    let mut target_method = LevelMethod::Atr;

    // Protective side: support under a long, resistance over a short
    let protective = match side {
        Side::Buy => row.support.filter(|s| *s < entry),
        Side::Sell => row.resistance.filter(|r| *r > entry),
    };
    if let Some(level) = protective {
        if let Some(blended) = blend_with_level(entry, stop, level, atr, &config.sr_blend) {
            stop = blended;
            stop_method = LevelMethod::SrBlend;
        }
    }

    let objective = match side {
        Side::Buy => row.resistance.map(|r| r * (1.0 - SR_TARGET_DISCOUNT)),
        Side::Sell => row.support.map(|s| s * (1.0 + SR_TARGET_DISCOUNT)),
    }
    .filter(|level| sign * (level - entry) > 0.0);
    if let Some(level) = objective {
        if let Some(blended) = blend_with_level(entry, target, level, atr, &config.sr_blend) {
            target = blended;
            target_method = LevelMethod::SrBlend;
        }
    }

    let max_risk = entry * max_stop_pct / 100.0;
    if sign * (entry - stop) > max_risk {
        stop = entry - sign * max_risk;
    }

    if !(sign * (entry - stop) > 0.0) {
        stop = entry - sign * (DEGENERATE_RISK_ATR * atr).min(max_risk);
        stop_method = LevelMethod::AtrFloor;
    }
    let risk = sign * (entry - stop);

    // Only the target moves; the stop is never tightened for R:R
    let min_reward = risk * config.min_risk_reward;
    if !(sign * (target - entry) >= min_reward) {
        target = entry + sign * min_reward;
        target_method = LevelMethod::RrTarget;
    }

    let fee_reward = risk + entry * round_trip_fee_pct / 100.0;
    if sign * (target - entry) < fee_reward {
        target = entry + sign * fee_reward;
        target_method = LevelMethod::FeeFloor;
    }

    TradeLevels {
        side,
        entry,
        stop,
        target,
        stop_method,
        target_method,
        atr,
        stop_multiplier: stop_mult,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterSpace;
    use crate::types::{CandleWindow, Decision, IndicatorSnapshot, StoredScores, Symbol};
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};

    fn row(close: f64, atr: Option<f64>, confidence: f64) -> SimulationRow {
        SimulationRow {
            signal_id: 7,
            ticker: Symbol::new("MSFT"),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 5, 15, 0, 0).unwrap(),
            stored_decision: Decision::Buy,
            indicators: IndicatorSnapshot {
                close,
                sma_20: close,
                sma_50: close,
                rsi: 50.0,
                macd: 0.0,
                macd_signal: 0.0,
                macd_histogram: 0.0,
                bb_upper: close * 1.02,
                bb_middle: close,
                bb_lower: close * 0.98,
                stoch_k: 50.0,
                adx: 20.0,
                volatility_pct: 2.0,
            },
            stored: StoredScores {
                technical: 0.0,
                sentiment: 0.0,
                risk: 0.0,
                combined: 0.0,
            },
            articles: Vec::new(),
            atr,
            atr_pct: atr.map(|a| a / close * 100.0),
            support: None,
            resistance: None,
            confidence,
            future_candles: CandleWindow::from_candles(Vec::new()),
        }
    }

    #[test]
    fn test_pure_atr_long_levels() {
        let cfg = ParameterSpace::new().baseline();
        // ATR% 1.5 -> low-vol target multiplier 3.0; default confidence -> 2.0
        let levels = compute_levels(&row(100.0, Some(1.5), 0.5), Side::Buy, &cfg, 0.1);
        assert_relative_eq!(levels.stop, 97.0);
        assert_relative_eq!(levels.target, 104.5);
        assert_eq!(levels.stop_method, LevelMethod::Atr);
        assert_eq!(levels.target_method, LevelMethod::Atr);
    }

    #[test]
    fn test_missing_atr_uses_default_pct() {
        let (atr, pct) = effective_atr(&row(200.0, None, 0.5));
        assert_relative_eq!(atr, 4.0);
        assert_eq!(pct, DEFAULT_ATR_PCT);
    }

    #[test]
    fn test_near_support_used_as_is() {
        let cfg = ParameterSpace::new().baseline();
        let mut r = row(100.0, Some(2.0), 0.8);
        r.support = Some(99.2);
        let levels = compute_levels(&r, Side::Buy, &cfg, 0.1);
        assert_relative_eq!(levels.stop, 99.2);
        assert_eq!(levels.stop_method, LevelMethod::SrBlend);
    }

    #[test]
    fn test_support_inside_band_is_blended() {
        let cfg = ParameterSpace::new().baseline();
        let mut r = row(100.0, Some(2.0), 0.5);
        // 1.25 ATR away: halfway through the 0.5..2.0 band
        r.support = Some(97.5);
        let levels = compute_levels(&r, Side::Buy, &cfg, 0.1);
        // ATR stop 96.0, blended halfway from 97.5
        assert_relative_eq!(levels.stop, 96.75);
    }

    #[test]
    fn test_short_stop_width_is_capped() {
        let cfg = ParameterSpace::new().baseline();
        let r = row(100.0, Some(5.0), 0.2);
        let levels = compute_levels(&r, Side::Sell, &cfg, 0.1);
        assert_relative_eq!(levels.stop, 103.0);
        assert!(levels.target < levels.entry);
    }

    #[test]
    fn test_rr_pushes_target_not_stop() {
        let cfg = ParameterSpace::new().baseline();
        let mut r = row(100.0, Some(2.0), 0.5);
        // Resistance right above entry would give a tiny reward
        r.resistance = Some(100.5);
        let levels = compute_levels(&r, Side::Buy, &cfg, 0.1);
        assert_relative_eq!(levels.stop, 96.0);
        assert_eq!(levels.target_method, LevelMethod::RrTarget);
        assert_relative_eq!(levels.risk_reward(), cfg.min_risk_reward, epsilon = 1e-9);
    }

    #[test]
    fn test_fee_floor_tagged() {
        let cfg = ParameterSpace::new().baseline();
        let r = row(100.0, Some(0.2), 0.5);
        // Huge fee relative to a tiny ATR
        let levels = compute_levels(&r, Side::Buy, &cfg, 2.0);
        assert_eq!(levels.target_method, LevelMethod::FeeFloor);
        assert!(levels.risk_reward() >= cfg.min_risk_reward);
    }
}
