//! Property tests over the full parameter bound space

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use signal_tuner::levels::{compute_levels, LevelMethod};
use signal_tuner::params::{ConfigVector, ParameterSpace, ResolvedConfig, DIMENSION_COUNT, MIN_WEIGHT_SHARE};
use signal_tuner::replay::{replay, SCORE_LIMIT};
use signal_tuner::{
    CandleWindow, Decision, IndicatorSnapshot, Side, SimulationRow, StoredScores, Symbol,
};

/// Unit positions inside each dimension's bounds, with the edges over-sampled
fn unit_genes() -> impl Strategy<Value = Vec<f64>> {
    proptest::collection::vec(prop_oneof![1 => Just(0.0), 1 => Just(1.0), 6 => 0.0f64..=1.0], DIMENSION_COUNT)
}

fn to_vector(units: &[f64]) -> ConfigVector {
    let space = ParameterSpace::new();
    let mut vector = ConfigVector::new(
        space
            .dimensions()
            .iter()
            .zip(units)
            .map(|(d, u)| d.lower + u * (d.upper - d.lower))
            .collect(),
    );
    space.clamp(&mut vector);
    vector
}

fn sample_row(close: f64, atr_pct: Option<f64>, confidence: f64, sr: (Option<f64>, Option<f64>)) -> SimulationRow {
    SimulationRow {
        signal_id: 1,
        ticker: Symbol::new("PROP"),
        timestamp: Utc.with_ymd_and_hms(2024, 5, 6, 15, 0, 0).unwrap(),
        stored_decision: Decision::Buy,
        indicators: IndicatorSnapshot {
            close,
            sma_20: close * 0.99,
            sma_50: close * 0.98,
            rsi: 35.0,
            macd: 0.1,
            macd_signal: 0.05,
            macd_histogram: 0.05,
            bb_upper: close * 1.02,
            bb_middle: close,
            bb_lower: close * 0.98,
            stoch_k: 30.0,
            adx: 18.0,
            volatility_pct: 2.0,
        },
        stored: StoredScores {
            technical: 20.0,
            sentiment: 10.0,
            risk: 15.0,
            combined: 18.0,
        },
        articles: Vec::new(),
        atr: atr_pct.map(|p| close * p / 100.0),
        atr_pct,
        support: sr.0.map(|f| close * f),
        resistance: sr.1.map(|f| close * f),
        confidence,
        future_candles: CandleWindow::from_candles(Vec::new()),
    }
}

fn assert_invariants(cfg: &ResolvedConfig) {
    let w = &cfg.weights;
    assert!((w.sum() - 1.0).abs() < 1e-9, "score weights sum {}", w.sum());
    assert!(w.risk >= MIN_WEIGHT_SHARE - 1e-9);
    assert!(w.sentiment >= 0.0 && w.technical >= 0.0);

    let t = &cfg.technical_weights;
    let tech_sum = t.moving_average + t.rsi + t.macd + t.bollinger + t.stochastic;
    assert!((tech_sum - 1.0).abs() < 1e-9, "technical weights sum {}", tech_sum);
    assert!(t.stochastic >= MIN_WEIGHT_SHARE - 1e-9);

    let d = cfg.decay.as_array();
    assert!(d.windows(2).all(|p| p[0] >= p[1]), "decay not monotonic: {:?}", d);

    let z = &cfg.rsi_zones;
    assert!(z.oversold() < z.neutral_low());
    assert!(z.neutral_low() <= z.neutral_high());
    assert!(z.neutral_high() < z.overbought());
    assert!(cfg.stoch_zones.low() < cfg.stoch_zones.high());

    for family in [&cfg.swing, &cfg.day] {
        assert!(family.stop.tightest() <= family.stop.default());
        assert!(family.stop.default() <= family.stop.widest());
        assert!(family.target.low() <= family.target.high());
    }
    assert!(cfg.sr_blend.near_atr <= cfg.sr_blend.far_atr);
    assert!(cfg.credibility.low <= cfg.credibility.medium && cfg.credibility.medium <= cfg.credibility.high);
    assert_eq!(cfg.thresholds.sell, -cfg.thresholds.buy);

    for (name, value) in cfg.named_values() {
        assert!(value.is_finite(), "{} is not finite", name);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn decode_satisfies_group_invariants(units in unit_genes()) {
        let space = ParameterSpace::new();
        let vector = to_vector(&units);
        let a = space.decode(&vector);
        let b = space.decode(&vector);
        prop_assert_eq!(&a, &b);
        assert_invariants(&a);
    }

    #[test]
    fn decode_tolerates_out_of_bound_genes(raw in proptest::collection::vec(-1e3f64..1e3, DIMENSION_COUNT)) {
        assert_invariants(&ParameterSpace::new().decode(&raw));
    }

    #[test]
    fn stops_sit_on_the_protective_side(
        units in unit_genes(),
        close in 1.0f64..2_000.0,
        atr_pct in prop_oneof![Just(None), (0.05f64..12.0).prop_map(Some)],
        confidence in 0.0f64..=1.0,
        support in prop_oneof![Just(None), (0.80f64..1.10).prop_map(Some)],
        resistance in prop_oneof![Just(None), (0.90f64..1.20).prop_map(Some)],
        fee in 0.0f64..0.5,
    ) {
        let cfg = ParameterSpace::new().decode(&to_vector(&units));
        let row = sample_row(close, atr_pct, confidence, (support, resistance));

        let long = compute_levels(&row, Side::Buy, &cfg, fee);
        prop_assert!(long.stop < long.entry, "long stop {} >= entry {}", long.stop, long.entry);
        prop_assert!(long.target > long.entry);

        let short = compute_levels(&row, Side::Sell, &cfg, fee);
        prop_assert!(short.stop > short.entry, "short stop {} <= entry {}", short.stop, short.entry);
        prop_assert!(short.target < short.entry);
    }

    #[test]
    fn reward_meets_the_risk_reward_floor(
        units in unit_genes(),
        close in 1.0f64..2_000.0,
        atr_pct in 0.05f64..12.0,
        confidence in 0.0f64..=1.0,
        resistance in prop_oneof![Just(None), (1.0f64..1.05).prop_map(Some)],
        fee in 0.0f64..0.5,
    ) {
        let cfg = ParameterSpace::new().decode(&to_vector(&units));
        let row = sample_row(close, Some(atr_pct), confidence, (None, resistance));
        for side in [Side::Buy, Side::Sell] {
            let levels = compute_levels(&row, side, &cfg, fee);
            prop_assert!(levels.risk() > 0.0);
            let rr = levels.reward() / levels.risk();
            prop_assert!(rr >= cfg.min_risk_reward - 1e-9, "rr {} < {}", rr, cfg.min_risk_reward);

            // The fee floor only ever lifts the target past the risk:reward minimum
            let at_minimum = (rr - cfg.min_risk_reward).abs() < 1e-9;
            prop_assert!(
                !(at_minimum && levels.target_method == LevelMethod::FeeFloor),
                "fee floor left rr {} at the minimum", rr
            );
            if levels.target_method == LevelMethod::FeeFloor {
                let fee_reward = levels.risk() + levels.entry * fee / 100.0;
                prop_assert!((levels.reward() - fee_reward).abs() <= 1e-9 * levels.entry);
            }
        }
    }

    #[test]
    fn replay_is_bit_identical(units in unit_genes(), rsi in 0.0f64..100.0, stoch in 0.0f64..100.0) {
        let cfg = ParameterSpace::new().decode(&to_vector(&units));
        let mut row = sample_row(100.0, Some(2.0), 0.5, (None, None));
        row.indicators.rsi = rsi;
        row.indicators.stoch_k = stoch;
        let a = replay(&row, &cfg);
        let b = replay(&row, &cfg);
        prop_assert_eq!(a.combined.to_bits(), b.combined.to_bits());
        prop_assert_eq!(a.decision, b.decision);
        prop_assert!(a.combined.abs() <= SCORE_LIMIT);
    }
}
