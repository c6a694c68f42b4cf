//! Trade simulation
//!
//! Replays a row, decides whether a trade opens, computes its levels and
//! walks the row's future candles to the first exit. Rows that never open a
//! trade come back as [`SimOutcome::NotTriggered`] with the reason.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::levels::{compute_levels, LevelMethod, TradeLevels};
use crate::params::ResolvedConfig;
use crate::replay::{replay, Replay};
use crate::types::{Candle, Decision, ScorePoint, ScoreTimeline, Side, SimulationRow, Symbol};

/// Regular trading hours in UTC minutes-of-day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingSession {
    pub open_minute: u32,
    pub close_minute: u32,
    pub bar_minutes: u32,
}

impl Default for TradingSession {
    fn default() -> Self {
        TradingSession {
            open_minute: 14 * 60 + 30,
            close_minute: 21 * 60,
            bar_minutes: 5,
        }
    }
}

impl TradingSession {
    fn minute_of_day(dt: &DateTime<Utc>) -> u32 {
        dt.hour() * 60 + dt.minute()
    }

    /// Weekday and inside [open, close)
    pub fn contains(&self, dt: &DateTime<Utc>) -> bool {
        if matches!(dt.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let m = Self::minute_of_day(dt);
        m >= self.open_minute && m < self.close_minute
    }

    /// Bar whose interval ends at (or past) the close
    pub fn is_last_bar(&self, dt: &DateTime<Utc>) -> bool {
        Self::minute_of_day(dt) + self.bar_minutes >= self.close_minute
    }

    /// Opening instant of the session on `day`
    pub fn open_on(&self, day: NaiveDate) -> DateTime<Utc> {
        let open = day.and_time(NaiveTime::MIN) + chrono::Duration::minutes(self.open_minute as i64);
        open.and_utc()
    }

    /// `point` falls in the same session as `candle_time`, at or after its open
    fn same_session(&self, point: &DateTime<Utc>, candle_time: &DateTime<Utc>) -> bool {
        point.date_naive() == candle_time.date_naive()
            && Self::minute_of_day(point) >= self.open_minute
    }
}

/// Everything the simulator needs besides the row and the configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationSettings {
    pub session: TradingSession,
    pub round_trip_fee_pct: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        SimulationSettings {
            session: TradingSession::default(),
            round_trip_fee_pct: 0.1,
        }
    }
}

/// Why a row produced no trade
#[derive(Debug, Clone, Copy, PartialEq, Error, Serialize)]
pub enum NotTriggered {
    #[error("replayed decision is HOLD")]
    Hold,

    #[error("|score| {score:.2} below activation threshold {threshold:.2}")]
    BelowActivation { score: f64, threshold: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopHit,
    TargetHit,
    OpposingSignal,
    EndOfDay,
    MaxHold,
    NoExit,
}

/// One simulated trade. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct TradeOutcome {
    pub signal_id: i64,
    pub ticker: Symbol,
    pub timestamp: DateTime<Utc>,
    pub replay: Replay,
    pub side: Side,
    pub entry: f64,
    /// Stop at entry, before any trailing
    pub initial_stop: f64,
    pub target: f64,
    pub stop_method: LevelMethod,
    pub target_method: LevelMethod,
    pub exit_reason: ExitReason,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub pnl_pct: f64,
    /// Session boundaries crossed while the trade was open
    pub days_held: u32,
}

impl TradeOutcome {
    /// Executed and closed by some exit rule
    pub fn is_exited(&self) -> bool {
        self.exit_reason != ExitReason::NoExit
    }
}

#[derive(Debug, Clone)]
pub enum SimOutcome {
    Triggered(TradeOutcome),
    NotTriggered(NotTriggered),
}

impl SimOutcome {
    pub fn trade(&self) -> Option<&TradeOutcome> {
        match self {
            SimOutcome::Triggered(trade) => Some(trade),
            SimOutcome::NotTriggered(_) => None,
        }
    }
}

/// Percentage move from entry to exit in the profitable direction
pub fn pnl_pct(side: Side, entry: f64, exit: f64) -> f64 {
    side.sign() * (exit - entry) / entry * 100.0
}

/// Replay `row` under `config` and simulate the resulting trade
pub fn simulate(
    row: &SimulationRow,
    config: &ResolvedConfig,
    timeline: &ScoreTimeline,
    settings: &SimulationSettings,
) -> SimOutcome {
    let replayed = replay(row, config);

    let side = match replayed.decision {
        Decision::Buy => Side::Buy,
        Decision::Sell => Side::Sell,
        Decision::Hold => return SimOutcome::NotTriggered(NotTriggered::Hold),
    };
    if replayed.combined.abs() < config.thresholds.activation {
        return SimOutcome::NotTriggered(NotTriggered::BelowActivation {
            score: replayed.combined,
            threshold: config.thresholds.activation,
        });
    }

    let levels = compute_levels(row, side, config, settings.round_trip_fee_pct);
    let walk = CandleWalk::new(row, &levels, config, timeline.for_ticker(&row.ticker), settings);
    let exit = walk.run(row.future_candles.candles());

    let pnl = match exit.price {
        Some(price) => pnl_pct(side, levels.entry, price),
        None => 0.0,
    };

    SimOutcome::Triggered(TradeOutcome {
        signal_id: row.signal_id,
        ticker: row.ticker.clone(),
        timestamp: row.timestamp,
        replay: replayed,
        side,
        entry: levels.entry,
        initial_stop: levels.stop,
        target: levels.target,
        stop_method: levels.stop_method,
        target_method: levels.target_method,
        exit_reason: exit.reason,
        exit_price: exit.price,
        exit_time: exit.time,
        pnl_pct: pnl,
        days_held: exit.days_held,
    })
}

// ============================================================================
// Candle walk
// ============================================================================

struct Exit {
    reason: ExitReason,
    price: Option<f64>,
    time: Option<DateTime<Utc>>,
    days_held: u32,
}

/// State of one active trade while candles are consumed
struct CandleWalk<'a> {
    side: Side,
    stop: f64,
    target: f64,
    atr: f64,
    stop_multiplier: f64,
    opposing_threshold: f64,
    tighten_after_days: u32,
    tighten_factor: f64,
    max_hold_days: u32,
    session: TradingSession,
    signals: &'a [ScorePoint],
    /// The trade's own signal, never treated as opposing
    entry_time: DateTime<Utc>,
    /// Next unconsumed timeline point
    cursor: usize,
    /// Most recent opposing signal seen so far
    last_opposing: Option<DateTime<Utc>>,
    current_day: Option<NaiveDate>,
    prev_close: Option<(f64, DateTime<Utc>)>,
    days_held: u32,
}

impl<'a> CandleWalk<'a> {
    fn new(
        row: &SimulationRow,
        levels: &TradeLevels,
        config: &ResolvedConfig,
        signals: &'a [ScorePoint],
        settings: &SimulationSettings,
    ) -> Self {
        // Signals from the entry session's open onward can force an exit
        let session_open = settings.session.open_on(row.timestamp.date_naive());
        let cursor = signals.partition_point(|p| p.timestamp < session_open);
        CandleWalk {
            side: levels.side,
            stop: levels.stop,
            target: levels.target,
            atr: levels.atr,
            stop_multiplier: levels.stop_multiplier,
            opposing_threshold: config.thresholds.opposing,
            tighten_after_days: config.trailing.tighten_after_days,
            tighten_factor: config.trailing.tighten_factor,
            max_hold_days: config.trailing.max_hold_days,
            session: settings.session,
            signals,
            entry_time: row.timestamp,
            cursor,
            last_opposing: None,
            current_day: None,
            prev_close: None,
            days_held: 0,
        }
    }

    fn exit(&self, reason: ExitReason, price: f64, time: DateTime<Utc>) -> Exit {
        Exit {
            reason,
            price: Some(price),
            time: Some(time),
            days_held: self.days_held,
        }
    }

    fn run(mut self, candles: &[Candle]) -> Exit {
        for candle in candles {
            if !self.session.contains(&candle.datetime) {
                continue;
            }
            if let Some(exit) = self.step(candle) {
                return exit;
            }
            self.prev_close = Some((candle.close, candle.datetime));
        }

        Exit {
            reason: ExitReason::NoExit,
            price: None,
            time: None,
            days_held: self.days_held,
        }
    }

    fn step(&mut self, candle: &Candle) -> Option<Exit> {
        let day = candle.datetime.date_naive();
        let new_day = self.current_day.is_some_and(|d| d != day);
        self.current_day = Some(day);
        if new_day {
            self.days_held += 1;
        }

        // A short still open on a new session missed its closing bar
        if new_day && self.side == Side::Sell {
            if let Some((close, time)) = self.prev_close {
                return Some(self.exit(ExitReason::EndOfDay, close, time));
            }
        }

        let stop_hit = match self.side {
            Side::Buy => candle.low <= self.stop,
            Side::Sell => candle.high >= self.stop,
        };
        if stop_hit {
            return Some(self.exit(ExitReason::StopHit, self.stop, candle.datetime));
        }

        let target_hit = match self.side {
            Side::Buy => candle.high >= self.target,
            Side::Sell => candle.low <= self.target,
        };
        if target_hit {
            return Some(self.exit(ExitReason::TargetHit, self.target, candle.datetime));
        }

        if new_day && self.side == Side::Buy {
            if let Some(exit) = self.on_day_boundary() {
                return Some(exit);
            }
        }

        if self.opposing_signal_active(&candle.datetime) {
            return Some(self.exit(ExitReason::OpposingSignal, candle.close, candle.datetime));
        }

        if self.side == Side::Sell && self.session.is_last_bar(&candle.datetime) {
            return Some(self.exit(ExitReason::EndOfDay, candle.close, candle.datetime));
        }

        None
    }

    /// Trail the stop from the prior close, then enforce the holding limit
    fn on_day_boundary(&mut self) -> Option<Exit> {
        let (prev_close, prev_time) = self.prev_close?;

        let mut distance = self.stop_multiplier * self.atr;
        if self.days_held >= self.tighten_after_days {
            distance *= self.tighten_factor;
        }
        let trailed = prev_close - distance;
        if trailed > self.stop {
            self.stop = trailed;
        }

        if self.days_held > self.max_hold_days {
            return Some(self.exit(ExitReason::MaxHold, prev_close, prev_time));
        }
        None
    }

    /// Consume timeline points up to `now` and report whether an opposing
    /// signal has appeared since this session opened
    fn opposing_signal_active(&mut self, now: &DateTime<Utc>) -> bool {
        while let Some(point) = self.signals.get(self.cursor) {
            if point.timestamp > *now {
                break;
            }
            let opposing = point.timestamp != self.entry_time
                && match self.side {
                    Side::Buy => point.score <= -self.opposing_threshold,
                    Side::Sell => point.score >= self.opposing_threshold,
                };
            if opposing {
                self.last_opposing = Some(point.timestamp);
            }
            self.cursor += 1;
        }

        self.last_opposing
            .is_some_and(|ts| self.session.same_session(&ts, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterSpace;
    use crate::types::{CandleWindow, IndicatorSnapshot, StoredScores};
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;

    // 2024-03-04 is a Monday
    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, minute, 0).unwrap()
    }

    fn bar(dt: DateTime<Utc>, low: f64, high: f64, close: f64) -> Candle {
        Candle {
            datetime: dt,
            open: close,
            high,
            low,
            close,
            volume: 1_000.0,
        }
    }

    /// Row whose baseline replay is a strong signal in the stored direction
    fn row(decision: Decision, candles: Vec<Candle>) -> SimulationRow {
        let bullish = decision == Decision::Buy;
        let (close, sma_20, sma_50, rsi, stoch) = if bullish {
            (100.0, 99.0, 97.0, 28.0, 15.0)
        } else {
            (100.0, 101.0, 103.0, 75.0, 90.0)
        };
        let score = if bullish { 60.0 } else { -60.0 };
        SimulationRow {
            signal_id: 1,
            ticker: Symbol::new("NVDA"),
            timestamp: at(4, 15, 0),
            stored_decision: decision,
            indicators: IndicatorSnapshot {
                close,
                sma_20,
                sma_50,
                rsi,
                macd: 0.0,
                macd_signal: 0.0,
                macd_histogram: if bullish { 0.5 } else { -0.5 },
                bb_upper: 104.0,
                bb_middle: 100.0,
                bb_lower: 96.0,
                stoch_k: stoch,
                adx: 15.0,
                volatility_pct: 1.5,
            },
            stored: StoredScores {
                technical: score,
                sentiment: score,
                risk: score,
                combined: score,
            },
            articles: Vec::new(),
            atr: Some(1.0),
            atr_pct: Some(1.0),
            support: None,
            resistance: None,
            confidence: 0.5,
            future_candles: CandleWindow::from_candles(candles),
        }
    }

    fn run(row: &SimulationRow, timeline: &ScoreTimeline) -> TradeOutcome {
        let cfg = ParameterSpace::new().baseline();
        match simulate(row, &cfg, timeline, &SimulationSettings::default()) {
            SimOutcome::Triggered(trade) => trade,
            SimOutcome::NotTriggered(reason) => panic!("not triggered: {reason}"),
        }
    }

    #[test]
    fn test_session_filter() {
        let session = TradingSession::default();
        assert!(session.contains(&at(4, 14, 30)));
        assert!(!session.contains(&at(4, 21, 0)));
        assert!(!session.contains(&at(2, 15, 0))); // Saturday
        assert!(session.is_last_bar(&at(4, 20, 55)));
        assert!(!session.is_last_bar(&at(4, 20, 50)));
    }

    #[test]
    fn test_hold_is_not_triggered() {
        let cfg = ParameterSpace::new().baseline();
        let mut r = row(Decision::Buy, Vec::new());
        r.indicators = IndicatorSnapshot {
            rsi: 50.0,
            stoch_k: 50.0,
            macd_histogram: 0.0,
            sma_20: 100.0,
            sma_50: 100.0,
            ..r.indicators
        };
        r.stored = StoredScores {
            technical: 0.0,
            sentiment: 0.0,
            risk: 0.0,
            combined: 0.0,
        };
        let outcome = simulate(&r, &cfg, &ScoreTimeline::default(), &SimulationSettings::default());
        assert!(matches!(outcome, SimOutcome::NotTriggered(NotTriggered::Hold)));
    }

    #[test]
    fn test_long_stop_hit_at_level() {
        // Baseline long: stop 98.0 (2.0 ATR), target 103.0
        let candles = vec![
            bar(at(4, 15, 5), 99.5, 100.5, 100.0),
            bar(at(4, 15, 10), 97.5, 100.0, 98.2),
        ];
        let trade = run(&row(Decision::Buy, candles), &ScoreTimeline::default());
        assert_eq!(trade.exit_reason, ExitReason::StopHit);
        assert_relative_eq!(trade.exit_price.unwrap(), 98.0);
        assert_relative_eq!(trade.pnl_pct, -2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_stop_checked_before_target() {
        let candles = vec![bar(at(4, 15, 5), 90.0, 110.0, 100.0)];
        let trade = run(&row(Decision::Buy, candles), &ScoreTimeline::default());
        assert_eq!(trade.exit_reason, ExitReason::StopHit);
    }

    #[test]
    fn test_out_of_session_candles_skipped() {
        let candles = vec![
            bar(at(4, 22, 0), 50.0, 150.0, 100.0),
            bar(at(5, 15, 0), 99.0, 103.5, 103.0),
        ];
        let trade = run(&row(Decision::Buy, candles), &ScoreTimeline::default());
        assert_eq!(trade.exit_reason, ExitReason::TargetHit);
        assert_eq!(trade.days_held, 0);
    }

    #[test]
    fn test_short_liquidated_at_session_close() {
        let candles = vec![
            bar(at(4, 20, 50), 99.8, 100.2, 100.0),
            bar(at(4, 20, 55), 99.0, 100.0, 99.5),
        ];
        let trade = run(&row(Decision::Sell, candles), &ScoreTimeline::default());
        assert_eq!(trade.side, Side::Sell);
        assert_eq!(trade.exit_reason, ExitReason::EndOfDay);
        assert_relative_eq!(trade.pnl_pct, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_opposing_signal_exits_at_close() {
        let r = row(Decision::Buy, vec![
            bar(at(4, 15, 30), 99.5, 100.5, 100.2),
            bar(at(4, 15, 35), 99.6, 100.8, 100.6),
        ]);
        let timeline = ScoreTimeline::new(HashMap::from([(
            r.ticker.clone(),
            vec![
                ScorePoint {
                    timestamp: r.timestamp,
                    score: 60.0,
                    stop_loss: None,
                    take_profit: None,
                },
                ScorePoint {
                    timestamp: at(4, 15, 32),
                    score: -45.0,
                    stop_loss: None,
                    take_profit: None,
                },
            ],
        )]));
        let trade = run(&r, &timeline);
        assert_eq!(trade.exit_reason, ExitReason::OpposingSignal);
        assert_relative_eq!(trade.exit_price.unwrap(), 100.6);
    }

    #[test]
    fn test_opposing_signal_earlier_in_entry_session_exits() {
        let r = row(Decision::Buy, vec![bar(at(4, 15, 5), 99.9, 100.1, 100.0)]);
        let timeline = ScoreTimeline::new(HashMap::from([(
            r.ticker.clone(),
            vec![
                ScorePoint {
                    timestamp: at(4, 14, 45),
                    score: -60.0,
                    stop_loss: None,
                    take_profit: None,
                },
                ScorePoint {
                    timestamp: r.timestamp,
                    score: 60.0,
                    stop_loss: None,
                    take_profit: None,
                },
            ],
        )]));
        let trade = run(&r, &timeline);
        assert_eq!(trade.exit_reason, ExitReason::OpposingSignal);
        assert_relative_eq!(trade.exit_price.unwrap(), 100.0);
    }

    #[test]
    fn test_own_signal_never_opposes() {
        // Stored combined disagrees with the replayed decision
        let r = row(Decision::Buy, vec![bar(at(4, 15, 5), 99.9, 100.1, 100.0)]);
        let timeline = ScoreTimeline::new(HashMap::from([(
            r.ticker.clone(),
            vec![ScorePoint {
                timestamp: r.timestamp,
                score: -80.0,
                stop_loss: None,
                take_profit: None,
            }],
        )]));
        assert_eq!(run(&r, &timeline).exit_reason, ExitReason::NoExit);
    }

    #[test]
    fn test_session_open_instant() {
        let day = at(4, 0, 0).date_naive();
        assert_eq!(TradingSession::default().open_on(day), at(4, 14, 30));
    }

    #[test]
    fn test_opposing_signal_from_prior_session_ignored() {
        let r = row(Decision::Buy, vec![bar(at(5, 15, 0), 99.5, 100.5, 100.2)]);
        let timeline = ScoreTimeline::new(HashMap::from([(
            r.ticker.clone(),
            vec![ScorePoint {
                timestamp: at(4, 19, 0),
                score: -80.0,
                stop_loss: None,
                take_profit: None,
            }],
        )]));
        let trade = run(&r, &timeline);
        assert_eq!(trade.exit_reason, ExitReason::NoExit);
        assert_eq!(trade.pnl_pct, 0.0);
        assert!(!trade.is_exited());
    }

    #[test]
    fn test_long_liquidated_after_max_hold() {
        // Drifts sideways inside the stop/target band across many sessions
        let mut candles = Vec::new();
        let mut day = at(4, 15, 0);
        while candles.len() < 16 {
            if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
                candles.push(bar(day, 99.8, 100.4, 100.1));
            }
            day += Duration::days(1);
        }
        let trade = run(&row(Decision::Buy, candles), &ScoreTimeline::default());
        assert_eq!(trade.exit_reason, ExitReason::MaxHold);
        assert_eq!(trade.days_held, 11);
        assert_relative_eq!(trade.exit_price.unwrap(), 100.1);
    }

    #[test]
    fn test_trailing_stop_only_ratchets_up() {
        let candles = vec![
            bar(at(4, 15, 5), 100.0, 102.5, 102.4),
            // Next day: trailed stop = 102.4 - 2.0 = 100.4
            bar(at(5, 15, 0), 100.5, 102.0, 101.0),
            bar(at(5, 15, 5), 100.3, 101.0, 100.5),
        ];
        let trade = run(&row(Decision::Buy, candles), &ScoreTimeline::default());
        assert_eq!(trade.exit_reason, ExitReason::StopHit);
        assert_relative_eq!(trade.exit_price.unwrap(), 100.4, epsilon = 1e-9);
        assert!(trade.pnl_pct > 0.0);
    }
}
