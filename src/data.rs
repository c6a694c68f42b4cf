//! Historical signal loading
//!
//! Reads the signal store (SQLite, opened read-only) once per run and builds
//! immutable simulation rows plus the per-ticker score timeline. Candles are
//! fetched with one query per ticker; each row gets a bounded window into its
//! ticker's shared series located by binary search.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, Row};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{
    ArticleSentiment, Candle, CandleWindow, Decision, IndicatorSnapshot, ScorePoint, ScoreTimeline,
    SimulationRow, StoredScores, Symbol,
};

// =============================================================================
// Schema
// =============================================================================

/// Tables read by the loader. Timestamps are RFC 3339 or `YYYY-MM-DD HH:MM:SS` (UTC).
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS signals (
    id INTEGER PRIMARY KEY,
    ticker TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    decision TEXT,
    close REAL, sma_20 REAL, sma_50 REAL, rsi REAL,
    macd REAL, macd_signal REAL, macd_histogram REAL,
    bb_upper REAL, bb_middle REAL, bb_lower REAL,
    stoch_k REAL, adx REAL, volatility_pct REAL,
    technical_score REAL, sentiment_score REAL, risk_score REAL, combined_score REAL,
    atr REAL, atr_pct REAL, support REAL, resistance REAL,
    confidence REAL, stop_loss REAL, take_profit REAL
);
CREATE TABLE IF NOT EXISTS signal_articles (
    signal_id INTEGER NOT NULL,
    sentiment REAL NOT NULL,
    credibility REAL NOT NULL,
    decay REAL NOT NULL
);
CREATE TABLE IF NOT EXISTS candles (
    ticker TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    open REAL NOT NULL, high REAL NOT NULL, low REAL NOT NULL, close REAL NOT NULL,
    volume REAL NOT NULL
);
";

const SIGNAL_QUERY: &str = "SELECT * FROM signals ORDER BY timestamp, id";

// =============================================================================
// Errors and reporting
// =============================================================================

/// Why a stored signal was excluded from simulation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowRejection {
    #[error("signal {id}: missing mandatory field '{field}'")]
    MissingField { id: i64, field: &'static str },

    #[error("signal {id}: unparsable timestamp '{raw}'")]
    BadTimestamp { id: i64, raw: String },

    #[error("signal {id}: unknown decision '{raw}'")]
    BadDecision { id: i64, raw: String },

    #[error("signal {id}: no candles for {ticker}")]
    NoCandles { id: i64, ticker: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub signals_read: usize,
    pub rows_loaded: usize,
    pub missing_field: usize,
    pub bad_timestamp: usize,
    pub bad_decision: usize,
    pub no_candles: usize,
    pub invalid_candles: usize,
    pub tickers: usize,
    pub timeline_points: usize,
}

impl LoadReport {
    fn record(&mut self, rejection: &RowRejection) {
        match rejection {
            RowRejection::MissingField { .. } => self.missing_field += 1,
            RowRejection::BadTimestamp { .. } => self.bad_timestamp += 1,
            RowRejection::BadDecision { .. } => self.bad_decision += 1,
            RowRejection::NoCandles { .. } => self.no_candles += 1,
        }
    }

    pub fn rejected(&self) -> usize {
        self.missing_field + self.bad_timestamp + self.bad_decision + self.no_candles
    }
}

/// Everything one run needs, resident in memory
#[derive(Debug, Clone)]
pub struct LoadedData {
    /// Sorted by timestamp, then signal id
    pub rows: Vec<SimulationRow>,
    pub timeline: ScoreTimeline,
    pub report: LoadReport,
}

// =============================================================================
// Parsing helpers
// =============================================================================

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Signal row as stored, before validation
struct StoredSignal {
    id: i64,
    ticker: String,
    timestamp: String,
    decision: Option<String>,
    values: HashMap<&'static str, f64>,
}

const NUMERIC_COLUMNS: &[&str] = &[
    "close",
    "sma_20",
    "sma_50",
    "rsi",
    "macd",
    "macd_signal",
    "macd_histogram",
    "bb_upper",
    "bb_middle",
    "bb_lower",
    "stoch_k",
    "adx",
    "volatility_pct",
    "technical_score",
    "sentiment_score",
    "risk_score",
    "combined_score",
    "atr",
    "atr_pct",
    "support",
    "resistance",
    "confidence",
    "stop_loss",
    "take_profit",
];

impl StoredSignal {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let mut values = HashMap::with_capacity(NUMERIC_COLUMNS.len());
        for col in NUMERIC_COLUMNS {
            if let Some(v) = row.get::<_, Option<f64>>(*col)? {
                if v.is_finite() {
                    values.insert(*col, v);
                }
            }
        }
        Ok(StoredSignal {
            id: row.get("id")?,
            ticker: row.get("ticker")?,
            timestamp: row.get("timestamp")?,
            decision: row.get("decision")?,
            values,
        })
    }

    fn opt(&self, field: &'static str) -> Option<f64> {
        self.values.get(field).copied()
    }

    fn req(&self, field: &'static str) -> Result<f64, RowRejection> {
        self.opt(field)
            .ok_or(RowRejection::MissingField { id: self.id, field })
    }

    fn parsed_timestamp(&self) -> Result<DateTime<Utc>, RowRejection> {
        parse_timestamp(&self.timestamp).ok_or_else(|| RowRejection::BadTimestamp {
            id: self.id,
            raw: self.timestamp.clone(),
        })
    }

    /// Everything but the candle window
    fn into_row(
        self,
        timestamp: DateTime<Utc>,
        articles: Vec<ArticleSentiment>,
    ) -> Result<SimulationRow, RowRejection> {
        let raw_decision = self.decision.clone().unwrap_or_default();
        let stored_decision = raw_decision
            .parse::<Decision>()
            .map_err(|_| RowRejection::BadDecision {
                id: self.id,
                raw: raw_decision.clone(),
            })?;

        let close = self.req("close")?;
        if close <= 0.0 {
            return Err(RowRejection::MissingField {
                id: self.id,
                field: "close",
            });
        }
        let bb_upper = self.req("bb_upper")?;
        let bb_lower = self.req("bb_lower")?;
        let atr = self.opt("atr").filter(|a| *a > 0.0);
        let atr_pct = self
            .opt("atr_pct")
            .filter(|p| *p > 0.0)
            .or(atr.map(|a| a / close * 100.0));

        let indicators = IndicatorSnapshot {
            close,
            sma_20: self.req("sma_20")?,
            sma_50: self.req("sma_50")?,
            rsi: self.req("rsi")?,
            macd: self.opt("macd").unwrap_or(0.0),
            macd_signal: self.opt("macd_signal").unwrap_or(0.0),
            macd_histogram: self.req("macd_histogram")?,
            bb_upper,
            bb_middle: self.opt("bb_middle").unwrap_or((bb_upper + bb_lower) / 2.0),
            bb_lower,
            stoch_k: self.req("stoch_k")?,
            adx: self.opt("adx").unwrap_or(0.0),
            volatility_pct: self
                .opt("volatility_pct")
                .or(atr_pct)
                .unwrap_or(0.0),
        };

        let stored = StoredScores {
            technical: self.req("technical_score")?,
            sentiment: self.req("sentiment_score")?,
            risk: self.req("risk_score")?,
            combined: self.req("combined_score")?,
        };

        Ok(SimulationRow {
            signal_id: self.id,
            ticker: Symbol::new(&self.ticker),
            timestamp,
            stored_decision,
            indicators,
            stored,
            articles,
            atr,
            atr_pct,
            support: self.opt("support").filter(|s| *s > 0.0),
            resistance: self.opt("resistance").filter(|r| *r > 0.0),
            confidence: self.opt("confidence").unwrap_or(0.5).clamp(0.0, 1.0),
            future_candles: CandleWindow::from_candles(Vec::new()),
        })
    }
}

// =============================================================================
// Store
// =============================================================================

/// Read-only access to the historical signal store
pub struct SignalStore {
    conn: Connection,
}

impl SignalStore {
    /// Open a database file read-only
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open signal database: {}", path.display()))?;
        Ok(SignalStore { conn })
    }

    /// Wrap an existing connection (in-memory databases, tests)
    pub fn from_connection(conn: Connection) -> Self {
        SignalStore { conn }
    }

    /// Load every row, its articles and candles, and the score timeline
    pub fn load(&self, lookahead_days: i64) -> Result<LoadedData> {
        let mut report = LoadReport::default();

        let stored = self.read_signals()?;
        report.signals_read = stored.len();
        let mut articles = self.read_articles()?;

        let mut timeline: HashMap<Symbol, Vec<ScorePoint>> = HashMap::new();
        let mut pending = Vec::with_capacity(stored.len());
        for signal in stored {
            let timestamp = match signal.parsed_timestamp() {
                Ok(ts) => ts,
                Err(rejection) => {
                    warn!("Dropping {}", rejection);
                    report.record(&rejection);
                    continue;
                }
            };

            if let Some(score) = signal.opt("combined_score") {
                timeline
                    .entry(Symbol::new(&signal.ticker))
                    .or_default()
                    .push(ScorePoint {
                        timestamp,
                        score,
                        stop_loss: signal.opt("stop_loss"),
                        take_profit: signal.opt("take_profit"),
                    });
            }

            let row_articles = articles.remove(&signal.id).unwrap_or_default();
            match signal.into_row(timestamp, row_articles) {
                Ok(row) => pending.push(row),
                Err(rejection) => {
                    debug!("Excluding {}", rejection);
                    report.record(&rejection);
                }
            }
        }

        let tickers: BTreeSet<Symbol> = pending.iter().map(|r| r.ticker.clone()).collect();
        let mut series: HashMap<Symbol, Arc<[Candle]>> = HashMap::with_capacity(tickers.len());
        for ticker in tickers {
            let (candles, invalid) = self.read_candles(&ticker)?;
            report.invalid_candles += invalid;
            if !candles.is_empty() {
                series.insert(ticker, Arc::from(candles));
            }
        }
        report.tickers = series.len();

        let lookahead = Duration::days(lookahead_days.max(1));
        let mut rows = Vec::with_capacity(pending.len());
        for mut row in pending {
            let Some(candles) = series.get(&row.ticker) else {
                let rejection = RowRejection::NoCandles {
                    id: row.signal_id,
                    ticker: row.ticker.to_string(),
                };
                debug!("Excluding {}", rejection);
                report.record(&rejection);
                continue;
            };
            let horizon = row.timestamp + lookahead;
            let start = candles.partition_point(|c| c.datetime <= row.timestamp);
            let end = candles.partition_point(|c| c.datetime <= horizon);
            row.future_candles = CandleWindow::new(Arc::clone(candles), start, end);
            rows.push(row);
        }
        rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.signal_id.cmp(&b.signal_id)));

        let timeline = ScoreTimeline::new(timeline);
        report.rows_loaded = rows.len();
        report.timeline_points = timeline.total_points();

        info!(
            "Loaded {} simulation rows from {} signals ({} rejected, {} tickers, {} timeline points)",
            report.rows_loaded,
            report.signals_read,
            report.rejected(),
            report.tickers,
            report.timeline_points
        );

        Ok(LoadedData {
            rows,
            timeline,
            report,
        })
    }

    fn read_signals(&self) -> Result<Vec<StoredSignal>> {
        let mut stmt = self
            .conn
            .prepare(SIGNAL_QUERY)
            .context("Failed to query signals")?;
        let signals = stmt
            .query_map([], |row| StoredSignal::from_row(row))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read signal rows")?;
        Ok(signals)
    }

    fn read_articles(&self) -> Result<HashMap<i64, Vec<ArticleSentiment>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT signal_id, sentiment, credibility, decay FROM signal_articles")
            .context("Failed to query signal articles")?;
        let mut grouped: HashMap<i64, Vec<ArticleSentiment>> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                ArticleSentiment {
                    score: row.get(1)?,
                    credibility: row.get(2)?,
                    decay: row.get(3)?,
                },
            ))
        })?;
        for entry in rows {
            let (signal_id, article) = entry.context("Failed to read article row")?;
            grouped.entry(signal_id).or_default().push(article);
        }
        Ok(grouped)
    }

    /// One ticker's candles in time order; returns `(valid, invalid_count)`
    fn read_candles(&self, ticker: &Symbol) -> Result<(Vec<Candle>, usize)> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT timestamp, open, high, low, close, volume FROM candles
             WHERE ticker = ?1 ORDER BY timestamp",
        )?;
        let raw = stmt
            .query_map(params![ticker.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Failed to read candles for {}", ticker))?;

        let mut invalid = 0;
        let mut candles = Vec::with_capacity(raw.len());
        for (ts, open, high, low, close, volume) in raw {
            let candle = parse_timestamp(&ts)
                .and_then(|dt| Candle::new(dt, open, high, low, close, volume).ok());
            match candle {
                Some(c) => candles.push(c),
                None => invalid += 1,
            }
        }
        if invalid > 0 {
            warn!("{}: skipped {} invalid candles", ticker, invalid);
        }
        // Text ordering can disagree with mixed timestamp formats
        candles.sort_by_key(|c| c.datetime);
        Ok((candles, invalid))
    }
}
