//! Core data types used across the tuning engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Validation errors for candle data
#[derive(Debug, Error)]
pub enum CandleValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// OHLCV candlestick data (5-minute bars in the signal store)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Create a new candle with validation
    pub fn new(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleValidationError> {
        let candle = Self {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        };
        candle.validate()?;
        Ok(candle)
    }

    pub fn validate(&self) -> Result<(), CandleValidationError> {
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(CandleValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(CandleValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume < 0.0 {
            return Err(CandleValidationError::NegativeVolume(self.volume));
        }

        Ok(())
    }
}

/// Ticker symbol using Arc<str> for cheap cloning
///
/// Every simulation row carries its ticker, and rows are shared across
/// worker threads, so clones must not allocate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] Arc<str>);

mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trade direction
///
/// Longs are swing trades (held across sessions); shorts are day trades
/// that are always flat by the session close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for longs, -1 for shorts
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

/// Signal classification produced by the scoring engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Buy,
    Sell,
    Hold,
}

impl Decision {
    pub fn side(self) -> Option<Side> {
        match self {
            Decision::Buy => Some(Side::Buy),
            Decision::Sell => Some(Side::Sell),
            Decision::Hold => None,
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Decision::Buy),
            "SELL" => Ok(Decision::Sell),
            "HOLD" => Ok(Decision::Hold),
            other => Err(format!("unknown decision '{}'", other)),
        }
    }
}

/// Technical indicator values frozen at signal time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub close: f64,
    pub sma_20: f64,
    pub sma_50: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub stoch_k: f64,
    /// Trend strength (ADX). Missing values are stored as 0.
    pub adx: f64,
    /// Recent realised volatility in percent
    pub volatility_pct: f64,
}

/// Sub-scores and combined score as recorded by the live generator
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StoredScores {
    pub technical: f64,
    pub sentiment: f64,
    pub risk: f64,
    pub combined: f64,
}

/// One news article's contribution to the sentiment score
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ArticleSentiment {
    /// Raw article sentiment in [-1, 1]
    pub score: f64,
    /// Source credibility in [0, 1]
    pub credibility: f64,
    /// Discretised recency decay recorded when the signal was generated
    pub decay: f64,
}

/// Bounded view into a ticker's shared candle series
///
/// Rows for the same ticker share one `Arc<[Candle]>`; each row only keeps
/// the index range that follows its own signal timestamp.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    series: Arc<[Candle]>,
    start: usize,
    end: usize,
}

impl CandleWindow {
    pub fn new(series: Arc<[Candle]>, start: usize, end: usize) -> Self {
        let end = end.min(series.len());
        let start = start.min(end);
        Self { series, start, end }
    }

    /// Owns its candles outright (tests, synthetic data)
    pub fn from_candles(candles: Vec<Candle>) -> Self {
        let len = candles.len();
        Self::new(Arc::from(candles), 0, len)
    }

    pub fn candles(&self) -> &[Candle] {
        &self.series[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Full replay context of one historical signal. Never mutated after load.
#[derive(Debug, Clone)]
pub struct SimulationRow {
    pub signal_id: i64,
    pub ticker: Symbol,
    pub timestamp: DateTime<Utc>,
    pub stored_decision: Decision,
    pub indicators: IndicatorSnapshot,
    pub stored: StoredScores,
    pub articles: Vec<ArticleSentiment>,
    pub atr: Option<f64>,
    pub atr_pct: Option<f64>,
    pub support: Option<f64>,
    pub resistance: Option<f64>,
    /// Blended signal confidence in [0, 1]
    pub confidence: f64,
    pub future_candles: CandleWindow,
}

impl SimulationRow {
    pub fn entry_price(&self) -> f64 {
        self.indicators.close
    }
}

/// One entry of a ticker's historical signal timeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScorePoint {
    pub timestamp: DateTime<Utc>,
    pub score: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

/// Per-ticker, time-ordered list of historical signal scores
#[derive(Debug, Clone, Default)]
pub struct ScoreTimeline {
    by_ticker: HashMap<Symbol, Vec<ScorePoint>>,
}

impl ScoreTimeline {
    /// Points are sorted per ticker on construction
    pub fn new(mut by_ticker: HashMap<Symbol, Vec<ScorePoint>>) -> Self {
        for points in by_ticker.values_mut() {
            points.sort_by_key(|p| p.timestamp);
        }
        Self { by_ticker }
    }

    pub fn for_ticker(&self, ticker: &Symbol) -> &[ScorePoint] {
        self.by_ticker
            .get(ticker)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn tickers(&self) -> usize {
        self.by_ticker.len()
    }

    pub fn total_points(&self) -> usize {
        self.by_ticker.values().map(|v| v.len()).sum()
    }
}
