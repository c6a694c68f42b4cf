//! Score replay
//!
//! Recomputes the technical and sentiment sub-scores of a historical signal
//! under a candidate configuration, combines them with the stored risk score
//! and classifies the result. Only data frozen at signal time is used, so
//! replaying the same row twice is bit-identical.

use serde::Serialize;

use crate::params::{AlignmentTier, DecisionThresholds, ResolvedConfig};
use crate::types::{ArticleSentiment, Decision, IndicatorSnapshot, SimulationRow};

/// Every sub-indicator score and the combined score are clamped to ±this
pub const SCORE_LIMIT: f64 = 100.0;
/// ADX at or above this marks a strong trend
pub const STRONG_TREND_ADX: f64 = 25.0;
/// Histogram size (as a fraction of price) that earns the full MACD score
const MACD_FULL_STRENGTH: f64 = 0.002;

// Stored article decay values are bucketed back into the four recency tiers
const DECAY_FRESH_MIN: f64 = 0.85;
const DECAY_RECENT_MIN: f64 = 0.55;
const DECAY_DAY_MIN: f64 = 0.275;

const CREDIBILITY_HIGH_MIN: f64 = 0.8;
const CREDIBILITY_MEDIUM_MIN: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SubScores {
    pub technical: f64,
    pub sentiment: f64,
    pub risk: f64,
}

/// Result of replaying one row
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Replay {
    pub combined: f64,
    pub decision: Decision,
    pub sub_scores: SubScores,
    /// Signed alignment bonus included in `combined`
    pub alignment_bonus: f64,
}

/// Replay a row under `config`
pub fn replay(row: &SimulationRow, config: &ResolvedConfig) -> Replay {
    let sub_scores = SubScores {
        technical: technical_score(&row.indicators, config),
        sentiment: sentiment_score(&row.articles, row.stored.sentiment, config),
        // Risk inputs are not captured for replay
        risk: row.stored.risk,
    };
    let (combined, alignment_bonus) = combine(sub_scores, config);

    Replay {
        combined,
        decision: classify(combined, &config.thresholds),
        sub_scores,
        alignment_bonus,
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(-SCORE_LIMIT, SCORE_LIMIT)
    } else {
        0.0
    }
}

// ============================================================================
// Technical
// ============================================================================

/// Weighted technical score in [-100, 100]
pub fn technical_score(ind: &IndicatorSnapshot, config: &ResolvedConfig) -> f64 {
    let w = &config.technical_weights;
    let components = [
        (moving_average_score(ind, config), w.moving_average),
        (rsi_score(ind, config), w.rsi),
        (macd_score(ind, config), w.macd),
        (bollinger_score(ind, config), w.bollinger),
        (stochastic_score(ind, config), w.stochastic),
    ];

    clamp_score(components.iter().map(|(score, weight)| score * weight).sum())
}

fn moving_average_score(ind: &IndicatorSnapshot, config: &ResolvedConfig) -> f64 {
    let s = &config.technical_scores;
    let score = if ind.close > ind.sma_20 && ind.sma_20 > ind.sma_50 {
        s.ma_full.bullish
    } else if ind.close < ind.sma_20 && ind.sma_20 < ind.sma_50 {
        s.ma_full.bearish
    } else if ind.close > ind.sma_50 {
        s.ma_partial.bullish
    } else if ind.close < ind.sma_50 {
        s.ma_partial.bearish
    } else {
        0.0
    };
    clamp_score(score)
}

/// Zone score, dampened when a strong trend runs against the reading
fn rsi_score(ind: &IndicatorSnapshot, config: &ResolvedConfig) -> f64 {
    let s = &config.technical_scores;
    let zones = &config.rsi_zones;

    let raw = if ind.rsi <= zones.oversold() {
        s.rsi_extreme.bullish
    } else if ind.rsi >= zones.overbought() {
        s.rsi_extreme.bearish
    } else if ind.rsi < zones.neutral_low() {
        s.rsi_mild.bullish
    } else if ind.rsi > zones.neutral_high() {
        s.rsi_mild.bearish
    } else {
        0.0
    };

    let strong_trend = ind.adx >= STRONG_TREND_ADX;
    let against_downtrend = raw > 0.0 && ind.close < ind.sma_50;
    let against_uptrend = raw < 0.0 && ind.close > ind.sma_50;
    let score = if strong_trend && (against_downtrend || against_uptrend) {
        raw * (1.0 - s.rsi_trend_dampening)
    } else {
        raw
    };
    clamp_score(score)
}

fn macd_score(ind: &IndicatorSnapshot, config: &ResolvedConfig) -> f64 {
    if ind.close <= 0.0 {
        return 0.0;
    }
    let strength = (ind.macd_histogram / (ind.close * MACD_FULL_STRENGTH)).clamp(-1.0, 1.0);
    clamp_score(strength * config.technical_scores.macd.bullish)
}

/// Linear in %B: lower band is fully bullish, upper band fully bearish
fn bollinger_score(ind: &IndicatorSnapshot, config: &ResolvedConfig) -> f64 {
    let width = ind.bb_upper - ind.bb_lower;
    if width <= 0.0 {
        return 0.0;
    }
    let percent_b = (ind.close - ind.bb_lower) / width;
    clamp_score((0.5 - percent_b) * 2.0 * config.technical_scores.bollinger.bullish)
}

fn stochastic_score(ind: &IndicatorSnapshot, config: &ResolvedConfig) -> f64 {
    let s = &config.technical_scores.stochastic;
    let zones = &config.stoch_zones;
    let score = if ind.stoch_k <= zones.low() {
        s.bullish
    } else if ind.stoch_k >= zones.high() {
        s.bearish
    } else {
        0.0
    };
    clamp_score(score)
}

// ============================================================================
// Sentiment
// ============================================================================

/// Credibility- and recency-weighted mean article sentiment, scaled to ±100.
///
/// Falls back to `stored` when there are no articles or every weight is zero.
pub fn sentiment_score(articles: &[ArticleSentiment], stored: f64, config: &ResolvedConfig) -> f64 {
    let (weighted, total_weight) = articles.iter().fold((0.0, 0.0), |(sum, total), a| {
        let weight = decay_weight(a.decay, config) * credibility_weight(a.credibility, config);
        (sum + a.score * weight, total + weight)
    });

    if total_weight <= 0.0 {
        return stored;
    }
    clamp_score(weighted / total_weight * SCORE_LIMIT)
}

fn decay_weight(stored_decay: f64, config: &ResolvedConfig) -> f64 {
    let d = &config.decay;
    if stored_decay >= DECAY_FRESH_MIN {
        d.fresh()
    } else if stored_decay >= DECAY_RECENT_MIN {
        d.recent()
    } else if stored_decay >= DECAY_DAY_MIN {
        d.day()
    } else {
        d.stale()
    }
}

fn credibility_weight(credibility: f64, config: &ResolvedConfig) -> f64 {
    let c = &config.credibility;
    if credibility >= CREDIBILITY_HIGH_MIN {
        c.high
    } else if credibility >= CREDIBILITY_MEDIUM_MIN {
        c.medium
    } else {
        c.low
    }
}

// ============================================================================
// Combination
// ============================================================================

/// Direction shared by every score once each clears `threshold`
fn aligned_direction(scores: &[f64], tier: &AlignmentTier) -> Option<f64> {
    if scores.iter().all(|s| *s >= tier.threshold) {
        Some(1.0)
    } else if scores.iter().all(|s| *s <= -tier.threshold) {
        Some(-1.0)
    } else {
        None
    }
}

/// Weighted sum plus the first matching alignment tier, clamped.
/// Returns `(combined, signed_bonus)`.
pub fn combine(sub: SubScores, config: &ResolvedConfig) -> (f64, f64) {
    let w = &config.weights;
    let base = w.sentiment * sub.sentiment + w.technical * sub.technical + w.risk * sub.risk;

    let a = &config.alignment;
    let all_three = [sub.sentiment, sub.technical, sub.risk];
    let technical_risk = [sub.technical, sub.risk];
    let sentiment_technical = [sub.sentiment, sub.technical];
    let sentiment_risk = [sub.sentiment, sub.risk];
    let tiers: [(&AlignmentTier, &[f64]); 4] = [
        (&a.all_three, &all_three),
        (&a.technical_risk, &technical_risk),
        (&a.sentiment_technical, &sentiment_technical),
        (&a.sentiment_risk, &sentiment_risk),
    ];
    let bonus = tiers
        .iter()
        .find_map(|(tier, scores)| aligned_direction(scores, tier).map(|dir| dir * tier.bonus))
        .unwrap_or(0.0);

    (clamp_score(base + bonus), bonus)
}

pub fn classify(combined: f64, thresholds: &DecisionThresholds) -> Decision {
    if combined >= thresholds.buy {
        Decision::Buy
    } else if combined <= thresholds.sell {
        Decision::Sell
    } else {
        Decision::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterSpace;
    use crate::types::{CandleWindow, StoredScores, Symbol};
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};

    fn bullish_snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            close: 105.0,
            sma_20: 103.0,
            sma_50: 100.0,
            rsi: 28.0,
            macd: 0.8,
            macd_signal: 0.5,
            macd_histogram: 0.3,
            bb_upper: 110.0,
            bb_middle: 104.0,
            bb_lower: 98.0,
            stoch_k: 15.0,
            adx: 18.0,
            volatility_pct: 1.8,
        }
    }

    fn row(indicators: IndicatorSnapshot, articles: Vec<ArticleSentiment>) -> SimulationRow {
        SimulationRow {
            signal_id: 1,
            ticker: Symbol::new("AAPL"),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap(),
            stored_decision: Decision::Buy,
            indicators,
            stored: StoredScores {
                technical: 40.0,
                sentiment: 22.0,
                risk: 10.0,
                combined: 30.0,
            },
            articles,
            atr: Some(2.0),
            atr_pct: Some(1.9),
            support: None,
            resistance: None,
            confidence: 0.6,
            future_candles: CandleWindow::from_candles(Vec::new()),
        }
    }

    #[test]
    fn test_replay_is_deterministic() {
        let cfg = ParameterSpace::new().baseline();
        let r = row(
            bullish_snapshot(),
            vec![ArticleSentiment {
                score: 0.4,
                credibility: 0.9,
                decay: 1.0,
            }],
        );
        let first = replay(&r, &cfg);
        let second = replay(&r, &cfg);
        assert_eq!(first, second);
        assert_eq!(first.combined.to_bits(), second.combined.to_bits());
    }

    #[test]
    fn test_sub_indicators_stay_clamped() {
        let cfg = ParameterSpace::new().baseline();
        let mut ind = bullish_snapshot();
        ind.close = 50.0;
        ind.bb_upper = 110.0;
        ind.bb_lower = 100.0;
        let score = bollinger_score(&ind, &cfg);
        assert_eq!(score, SCORE_LIMIT);
        assert!(technical_score(&ind, &cfg).abs() <= SCORE_LIMIT);
    }

    #[test]
    fn test_rsi_dampened_against_strong_downtrend() {
        let cfg = ParameterSpace::new().baseline();
        let mut ind = bullish_snapshot();
        ind.close = 95.0;
        ind.adx = 32.0;
        // Oversold (+70) against a strong downtrend, dampening 0.5
        assert_relative_eq!(rsi_score(&ind, &cfg), 35.0);
        ind.adx = 12.0;
        assert_relative_eq!(rsi_score(&ind, &cfg), 70.0);
    }

    #[test]
    fn test_sentiment_falls_back_to_stored() {
        let cfg = ParameterSpace::new().baseline();
        assert_eq!(sentiment_score(&[], 22.0, &cfg), 22.0);
    }

    #[test]
    fn test_sentiment_reweights_articles() {
        let cfg = ParameterSpace::new().baseline();
        let articles = [
            ArticleSentiment {
                score: 0.5,
                credibility: 0.9,
                decay: 1.0,
            },
            ArticleSentiment {
                score: -0.5,
                credibility: 0.2,
                decay: 0.1,
            },
        ];
        // weights: 1.0 * 1.0 and 0.15 * 0.4
        let expected = (0.5 - 0.5 * 0.06) / 1.06 * 100.0;
        assert_relative_eq!(sentiment_score(&articles, 0.0, &cfg), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_baseline_combination_matches_history() {
        let cfg = ParameterSpace::new().baseline();
        let sub = SubScores {
            technical: 50.0,
            sentiment: 40.0,
            risk: 20.0,
        };
        // 0.30*40 + 0.45*50 + 0.25*20 = 39.5; sentiment+technical tier (35 / +8)
        let stored_combined = 47.5;
        let (combined, bonus) = combine(sub, &cfg);
        assert_relative_eq!(combined, stored_combined, epsilon = 1e-9);
        assert_eq!(bonus, 8.0);
        assert_eq!(classify(combined, &cfg.thresholds), Decision::Buy);
    }

    #[test]
    fn test_bearish_alignment_is_signed() {
        let cfg = ParameterSpace::new().baseline();
        let sub = SubScores {
            technical: -60.0,
            sentiment: -45.0,
            risk: -50.0,
        };
        let (combined, bonus) = combine(sub, &cfg);
        assert_eq!(bonus, -15.0);
        assert!(combined < cfg.thresholds.sell);
        assert_eq!(classify(combined, &cfg.thresholds), Decision::Sell);
        assert_eq!(classify(0.0, &cfg.thresholds), Decision::Hold);
    }
}
