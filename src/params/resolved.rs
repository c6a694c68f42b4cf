//! Typed, constraint-satisfied configuration decoded from a search vector.

use serde::{Deserialize, Serialize};

use super::ordered::{DecaySchedule, OrderedPair, OrderedTriple, OscillatorZones};
use super::space::{idx, DIMENSION_COUNT};

/// Minimum share kept by the residual member of a weight group
pub const MIN_WEIGHT_SHARE: f64 = 0.05;
/// Minimum separation between consecutive RSI zone thresholds
pub const RSI_MIN_GAP: f64 = 5.0;
/// Minimum separation between stochastic oversold/overbought
pub const STOCH_MIN_GAP: f64 = 10.0;
/// Differences at or below this are not reported by `diff`
pub const DIFF_EPSILON: f64 = 1e-6;

const WEIGHT_DECIMALS: f64 = 10_000.0;

/// Resolve a sum-to-one group where the residual member absorbs rounding.
///
/// Searched members are rounded down to four decimals; when they leave less
/// than `floor` for the residual they are scaled down proportionally first.
/// Degenerate input falls back to equal shares.
fn resolve_weight_group<const N: usize>(searched: [f64; N], floor: f64) -> ([f64; N], f64) {
    let sum: f64 = searched.iter().sum();
    if !sum.is_finite() || sum <= 0.0 || searched.iter().any(|w| *w < 0.0) {
        let share = 1.0 / (N as f64 + 1.0);
        return ([share; N], 1.0 - share * N as f64);
    }

    let scale = if 1.0 - sum < floor {
        (1.0 - floor) / sum
    } else {
        1.0
    };

    let mut resolved = [0.0; N];
    for (out, w) in resolved.iter_mut().zip(searched.iter()) {
        *out = (w * scale * WEIGHT_DECIMALS + 1e-9).floor() / WEIGHT_DECIMALS;
    }
    let residual = 1.0 - resolved.iter().sum::<f64>();
    (resolved, residual)
}

/// Top-level weights for combining sub-scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub sentiment: f64,
    pub technical: f64,
    pub risk: f64,
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.sentiment + self.technical + self.risk
    }
}

/// Weights of the technical sub-indicators
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TechnicalWeights {
    pub moving_average: f64,
    pub rsi: f64,
    pub macd: f64,
    pub bollinger: f64,
    pub stochastic: f64,
}

impl TechnicalWeights {
    pub fn sum(&self) -> f64 {
        self.moving_average + self.rsi + self.macd + self.bollinger + self.stochastic
    }
}

/// Multipliers by source credibility tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CredibilityWeights {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

/// A bullish magnitude and its mirrored bearish counterpart
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreMagnitude {
    pub bullish: f64,
    pub bearish: f64,
}

impl ScoreMagnitude {
    pub fn mirrored(bullish: f64) -> Self {
        Self {
            bullish,
            bearish: -bullish,
        }
    }
}

/// Per-indicator score magnitudes used by the technical replay
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TechnicalScores {
    /// Price and both moving averages aligned
    pub ma_full: ScoreMagnitude,
    /// Price on one side of the slow average only
    pub ma_partial: ScoreMagnitude,
    pub rsi_extreme: ScoreMagnitude,
    pub rsi_mild: ScoreMagnitude,
    /// Fraction of an extreme RSI reading discarded when the trend runs against it
    pub rsi_trend_dampening: f64,
    pub macd: ScoreMagnitude,
    pub bollinger: ScoreMagnitude,
    pub stochastic: ScoreMagnitude,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentTier {
    /// Minimum absolute strength each participating sub-score must reach
    pub threshold: f64,
    pub bonus: f64,
}

/// Bonus tiers in evaluation priority order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentBonuses {
    pub all_three: AlignmentTier,
    pub technical_risk: AlignmentTier,
    pub sentiment_technical: AlignmentTier,
    pub sentiment_risk: AlignmentTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionThresholds {
    pub buy: f64,
    /// Always `-buy`
    pub sell: f64,
    /// Minimum |combined score| for a non-HOLD decision to open a trade
    pub activation: f64,
    /// Minimum |score| of a later signal that forces an exit
    pub opposing: f64,
}

/// ATR multipliers for one trade family
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelMultipliers {
    /// tightest = high confidence, widest = low confidence
    pub stop: OrderedTriple,
    /// low = low-volatility tier, high = high-volatility tier
    pub target: OrderedPair,
}

/// Distance band, in ATR units, over which stops blend toward S/R levels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SrBlendBand {
    pub near_atr: f64,
    pub far_atr: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingRules {
    pub tighten_after_days: u32,
    pub tighten_factor: f64,
    pub max_hold_days: u32,
}

/// Fully resolved configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub weights: ScoreWeights,
    pub technical_weights: TechnicalWeights,
    pub decay: DecaySchedule,
    pub credibility: CredibilityWeights,
    pub rsi_zones: OscillatorZones,
    pub stoch_zones: OrderedPair,
    pub technical_scores: TechnicalScores,
    pub alignment: AlignmentBonuses,
    pub thresholds: DecisionThresholds,
    pub swing: LevelMultipliers,
    pub day: LevelMultipliers,
    pub sr_blend: SrBlendBand,
    pub min_risk_reward: f64,
    pub trailing: TrailingRules,
}

/// One resolved parameter that differs from the baseline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamChange {
    pub name: &'static str,
    pub baseline: f64,
    pub candidate: f64,
}

impl ResolvedConfig {
    /// Genes must already be clamped and rounded.
    pub(crate) fn from_genes(g: &[f64; DIMENSION_COUNT]) -> Self {
        let ([sentiment, technical], risk) = resolve_weight_group(
            [g[idx::WEIGHT_SENTIMENT], g[idx::WEIGHT_TECHNICAL]],
            MIN_WEIGHT_SHARE,
        );
        let ([moving_average, rsi, macd, bollinger], stochastic) = resolve_weight_group(
            [
                g[idx::TECH_WEIGHT_MA],
                g[idx::TECH_WEIGHT_RSI],
                g[idx::TECH_WEIGHT_MACD],
                g[idx::TECH_WEIGHT_BOLLINGER],
            ],
            MIN_WEIGHT_SHARE,
        );

        let decay = DecaySchedule::from_unsorted([
            g[idx::DECAY_FRESH],
            g[idx::DECAY_FRESH + 1],
            g[idx::DECAY_FRESH + 2],
            g[idx::DECAY_STALE],
        ]);

        let cred = OrderedPair::from_unsorted(g[idx::CREDIBILITY_HIGH], g[idx::CREDIBILITY_LOW]);
        let credibility = CredibilityWeights {
            high: cred.high(),
            medium: (cred.high() + cred.low()) / 2.0,
            low: cred.low(),
        };

        let rsi_zones = OscillatorZones::from_unsorted(
            [
                g[idx::RSI_OVERSOLD],
                g[idx::RSI_OVERSOLD + 1],
                g[idx::RSI_OVERSOLD + 2],
                g[idx::RSI_OVERBOUGHT],
            ],
            RSI_MIN_GAP,
        );
        let stoch_zones = OrderedPair::with_min_gap(
            g[idx::STOCH_OVERSOLD],
            g[idx::STOCH_OVERBOUGHT],
            STOCH_MIN_GAP,
        );

        let technical_scores = TechnicalScores {
            ma_full: ScoreMagnitude::mirrored(g[idx::MA_SCORE]),
            ma_partial: ScoreMagnitude::mirrored(g[idx::MA_SCORE] / 2.0),
            rsi_extreme: ScoreMagnitude::mirrored(g[idx::RSI_EXTREME_SCORE]),
            rsi_mild: ScoreMagnitude::mirrored(g[idx::RSI_MILD_SCORE]),
            rsi_trend_dampening: g[idx::RSI_TREND_DAMPENING],
            macd: ScoreMagnitude::mirrored(g[idx::MACD_SCORE]),
            bollinger: ScoreMagnitude::mirrored(g[idx::BOLLINGER_SCORE]),
            stochastic: ScoreMagnitude::mirrored(g[idx::STOCH_SCORE]),
        };

        let tier = |threshold: usize, bonus: usize| AlignmentTier {
            threshold: g[threshold],
            bonus: g[bonus],
        };
        let alignment = AlignmentBonuses {
            all_three: tier(idx::ALIGN_ALL_THRESHOLD, idx::ALIGN_ALL_BONUS),
            technical_risk: tier(idx::ALIGN_TECH_RISK_THRESHOLD, idx::ALIGN_TECH_RISK_BONUS),
            sentiment_technical: tier(idx::ALIGN_SENT_TECH_THRESHOLD, idx::ALIGN_SENT_TECH_BONUS),
            sentiment_risk: tier(idx::ALIGN_SENT_RISK_THRESHOLD, idx::ALIGN_SENT_RISK_BONUS),
        };

        let thresholds = DecisionThresholds {
            buy: g[idx::HOLD_ZONE],
            sell: -g[idx::HOLD_ZONE],
            activation: g[idx::ACTIVATION_THRESHOLD],
            opposing: g[idx::OPPOSING_THRESHOLD],
        };

        let family = |stop: usize, target: usize| LevelMultipliers {
            stop: OrderedTriple::from_unsorted(g[stop], g[stop + 1], g[stop + 2]),
            target: OrderedPair::from_unsorted(g[target], g[target + 1]),
        };

        let band = OrderedPair::from_unsorted(g[idx::SR_BLEND_NEAR], g[idx::SR_BLEND_FAR]);

        ResolvedConfig {
            weights: ScoreWeights {
                sentiment,
                technical,
                risk,
            },
            technical_weights: TechnicalWeights {
                moving_average,
                rsi,
                macd,
                bollinger,
                stochastic,
            },
            decay,
            credibility,
            rsi_zones,
            stoch_zones,
            technical_scores,
            alignment,
            thresholds,
            swing: family(idx::SWING_STOP_FIRST, idx::SWING_TARGET_FIRST),
            day: family(idx::DAY_STOP_FIRST, idx::DAY_TARGET_FIRST),
            sr_blend: SrBlendBand {
                near_atr: band.low(),
                far_atr: band.high(),
            },
            min_risk_reward: g[idx::MIN_RISK_REWARD],
            trailing: TrailingRules {
                tighten_after_days: g[idx::TRAILING_TIGHTEN_DAY] as u32,
                tighten_factor: g[idx::TRAILING_TIGHTEN_FACTOR],
                max_hold_days: g[idx::MAX_HOLD_DAYS] as u32,
            },
        }
    }

    /// Every resolved value by name, derived parameters included
    pub fn named_values(&self) -> Vec<(&'static str, f64)> {
        let s = &self.technical_scores;
        let a = &self.alignment;
        vec![
            ("weight_sentiment", self.weights.sentiment),
            ("weight_technical", self.weights.technical),
            ("weight_risk", self.weights.risk),
            ("tech_weight_ma", self.technical_weights.moving_average),
            ("tech_weight_rsi", self.technical_weights.rsi),
            ("tech_weight_macd", self.technical_weights.macd),
            ("tech_weight_bollinger", self.technical_weights.bollinger),
            ("tech_weight_stochastic", self.technical_weights.stochastic),
            ("decay_fresh", self.decay.fresh()),
            ("decay_recent", self.decay.recent()),
            ("decay_day", self.decay.day()),
            ("decay_stale", self.decay.stale()),
            ("credibility_high", self.credibility.high),
            ("credibility_medium", self.credibility.medium),
            ("credibility_low", self.credibility.low),
            ("rsi_oversold", self.rsi_zones.oversold()),
            ("rsi_neutral_low", self.rsi_zones.neutral_low()),
            ("rsi_neutral_high", self.rsi_zones.neutral_high()),
            ("rsi_overbought", self.rsi_zones.overbought()),
            ("stoch_oversold", self.stoch_zones.low()),
            ("stoch_overbought", self.stoch_zones.high()),
            ("ma_score", s.ma_full.bullish),
            ("ma_partial_score", s.ma_partial.bullish),
            ("rsi_extreme_score", s.rsi_extreme.bullish),
            ("rsi_mild_score", s.rsi_mild.bullish),
            ("rsi_trend_dampening", s.rsi_trend_dampening),
            ("macd_score", s.macd.bullish),
            ("bollinger_score", s.bollinger.bullish),
            ("stoch_score", s.stochastic.bullish),
            ("align_all_threshold", a.all_three.threshold),
            ("align_all_bonus", a.all_three.bonus),
            ("align_tech_risk_threshold", a.technical_risk.threshold),
            ("align_tech_risk_bonus", a.technical_risk.bonus),
            ("align_sent_tech_threshold", a.sentiment_technical.threshold),
            ("align_sent_tech_bonus", a.sentiment_technical.bonus),
            ("align_sent_risk_threshold", a.sentiment_risk.threshold),
            ("align_sent_risk_bonus", a.sentiment_risk.bonus),
            ("buy_threshold", self.thresholds.buy),
            ("sell_threshold", self.thresholds.sell),
            ("activation_threshold", self.thresholds.activation),
            ("opposing_threshold", self.thresholds.opposing),
            ("swing_stop_high_conf", self.swing.stop.tightest()),
            ("swing_stop_default", self.swing.stop.default()),
            ("swing_stop_low_conf", self.swing.stop.widest()),
            ("swing_target_low_vol", self.swing.target.low()),
            ("swing_target_high_vol", self.swing.target.high()),
            ("day_stop_high_conf", self.day.stop.tightest()),
            ("day_stop_default", self.day.stop.default()),
            ("day_stop_low_conf", self.day.stop.widest()),
            ("day_target_low_vol", self.day.target.low()),
            ("day_target_high_vol", self.day.target.high()),
            ("sr_blend_near_atr", self.sr_blend.near_atr),
            ("sr_blend_far_atr", self.sr_blend.far_atr),
            ("min_risk_reward", self.min_risk_reward),
            ("trailing_tighten_day", self.trailing.tighten_after_days as f64),
            ("trailing_tighten_factor", self.trailing.tighten_factor),
            ("max_hold_days", self.trailing.max_hold_days as f64),
        ]
    }

    /// Field-by-field comparison; `self` is treated as the baseline
    pub fn diff(&self, candidate: &ResolvedConfig, epsilon: f64) -> Vec<ParamChange> {
        self.named_values()
            .into_iter()
            .zip(candidate.named_values())
            .filter(|((_, base), (_, cand))| (base - cand).abs() > epsilon)
            .map(|((name, baseline), (_, candidate))| ParamChange {
                name,
                baseline,
                candidate,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterSpace;
    use approx::assert_relative_eq;

    #[test]
    fn test_baseline_decodes_to_deployed_values() {
        let cfg = ParameterSpace::new().baseline();
        assert_relative_eq!(cfg.weights.risk, 0.25, epsilon = 1e-12);
        assert_relative_eq!(cfg.technical_weights.stochastic, 0.15, epsilon = 1e-12);
        assert_eq!(cfg.thresholds.sell, -15.0);
        assert_eq!(cfg.technical_scores.ma_partial.bullish, 30.0);
        assert_eq!(cfg.technical_scores.rsi_extreme.bearish, -70.0);
        assert_relative_eq!(cfg.credibility.medium, 0.7, epsilon = 1e-12);
        assert_eq!(cfg.trailing.max_hold_days, 10);
    }

    #[test]
    fn test_overfull_weight_group_scales_to_floor() {
        let ([a, b], residual) = resolve_weight_group([0.6, 0.8], MIN_WEIGHT_SHARE);
        assert!(residual >= MIN_WEIGHT_SHARE);
        assert_relative_eq!(a + b + residual, 1.0, epsilon = 1e-12);
        assert!(a < b);
    }

    #[test]
    fn test_degenerate_weight_group_falls_back_to_equal_shares() {
        let (weights, residual) = resolve_weight_group([f64::NAN, 0.2, 0.1], MIN_WEIGHT_SHARE);
        assert_eq!(weights, [0.25; 3]);
        assert_eq!(residual, 0.25);
    }

    #[test]
    fn test_swapped_multipliers_are_reordered() {
        let space = ParameterSpace::new();
        let mut v = space.baseline_vector();
        let genes = v.genes_mut();
        genes[idx::SWING_STOP_FIRST] = 2.9;
        genes[idx::SWING_STOP_FIRST + 2] = 1.6;
        let cfg = space.decode(&v);
        assert_eq!(cfg.swing.stop.tightest(), 1.6);
        assert_eq!(cfg.swing.stop.default(), 2.0);
        assert_eq!(cfg.swing.stop.widest(), 2.9);
    }

    #[test]
    fn test_named_values_cover_every_field_once() {
        let cfg = ParameterSpace::new().baseline();
        let names: Vec<_> = cfg.named_values().into_iter().map(|(n, _)| n).collect();
        let mut unique = names.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(names.len(), unique.len());
        assert_eq!(names.len(), 57);
    }
}
