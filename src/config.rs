//! Configuration management
//!
//! Handles loading and parsing of the JSON run configuration with environment
//! variable support for the signal database location.

use anyhow::{bail, Context, Result};
use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::fitness::SplitRatios;
use crate::optimizer::GeneticConfig;
use crate::params::{idx, DIMENSIONS};
use crate::simulator::{SimulationSettings, TradingSession};
use crate::validation::ValidationSettings;

/// Environment variable overriding `data.db_path`
pub const DB_PATH_ENV: &str = "SIGNAL_DB_PATH";

/// Calendar days of candles needed for the longest searchable hold to expire.
///
/// A long is liquidated once `days_held > max_hold_days`, so the window must
/// span one session past the upper bound, plus weekends and a week of holidays.
pub fn min_lookahead_days() -> i64 {
    let sessions = DIMENSIONS[idx::MAX_HOLD_DAYS].upper as i64 + 1;
    (sessions * 7 + 4) / 5 + 7
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub session: SessionConfig,
    pub optimizer: GeneticConfig,
    pub fitness: FitnessConfig,
    pub validation: ValidationSettings,
    pub results_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data: DataConfig::default(),
            session: SessionConfig::default(),
            optimizer: GeneticConfig::default(),
            fitness: FitnessConfig::default(),
            validation: ValidationSettings::default(),
            results_dir: PathBuf::from("results"),
        }
    }
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.apply_env();
        config.check()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, used when no file is given
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env();
        config.check()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var(DB_PATH_ENV) {
            if !path.trim().is_empty() {
                self.data.db_path = PathBuf::from(path);
            }
        }
    }

    /// Reject settings no run could use
    pub fn check(&self) -> Result<()> {
        let split = &self.fitness.split;
        if split.train <= 0.0 || split.validation < 0.0 || split.train + split.validation >= 1.0 {
            bail!(
                "Invalid split ratios: train={} validation={} (test takes the remainder)",
                split.train,
                split.validation
            );
        }
        if !(0.0..=1.0).contains(&self.optimizer.train_weight) {
            bail!("optimizer.train_weight must be in [0, 1]");
        }
        if self.data.lookahead_days < min_lookahead_days() {
            bail!(
                "data.lookahead_days = {} cannot cover max_hold_days up to {} (need at least {})",
                self.data.lookahead_days,
                DIMENSIONS[idx::MAX_HOLD_DAYS].upper,
                min_lookahead_days()
            );
        }
        if self.optimizer.tournament_size == 0 {
            bail!("optimizer.tournament_size must be at least 1");
        }
        self.session.to_settings()?;
        Ok(())
    }
}

/// Signal store location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub db_path: PathBuf,
    /// Days of candles after each signal available to the simulator
    pub lookahead_days: i64,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            db_path: PathBuf::from("data/signals.db"),
            lookahead_days: min_lookahead_days(),
        }
    }
}

/// Trading session in UTC and execution costs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// `HH:MM`, UTC
    pub open: String,
    pub close: String,
    pub bar_minutes: u32,
    pub round_trip_fee_pct: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            open: "14:30".to_string(),
            close: "21:00".to_string(),
            bar_minutes: 5,
            round_trip_fee_pct: 0.1,
        }
    }
}

fn parse_minute_of_day(raw: &str) -> Result<u32> {
    let time = NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .with_context(|| format!("Invalid session time '{}', expected HH:MM", raw))?;
    Ok(time.hour() * 60 + time.minute())
}

impl SessionConfig {
    pub fn to_settings(&self) -> Result<SimulationSettings> {
        let open_minute = parse_minute_of_day(&self.open)?;
        let close_minute = parse_minute_of_day(&self.close)?;
        if open_minute >= close_minute {
            bail!("Session open {} must be before close {}", self.open, self.close);
        }
        if self.bar_minutes == 0 {
            bail!("session.bar_minutes must be positive");
        }
        if self.round_trip_fee_pct < 0.0 {
            bail!("session.round_trip_fee_pct must not be negative");
        }
        Ok(SimulationSettings {
            session: TradingSession {
                open_minute,
                close_minute,
                bar_minutes: self.bar_minutes,
            },
            round_trip_fee_pct: self.round_trip_fee_pct,
        })
    }
}

/// Fitness scoring and data partitioning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FitnessConfig {
    /// Executed trades below which fitness is forced to zero
    pub min_trades: usize,
    pub split: SplitRatios,
}

impl Default for FitnessConfig {
    fn default() -> Self {
        FitnessConfig {
            min_trades: 10,
            split: SplitRatios::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_session_matches_regular_hours() {
        let settings = SessionConfig::default().to_settings().unwrap();
        assert_eq!(settings.session, TradingSession::default());
        assert_eq!(settings.round_trip_fee_pct, 0.1);
    }

    #[test]
    fn test_partial_file_keeps_section_defaults() {
        let json = r#"{
            "data": { "db_path": "/tmp/x.db" },
            "optimizer": { "population_size": 15, "generations": 5 },
            "results_dir": "out"
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.data.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.data.lookahead_days, min_lookahead_days());
        assert_eq!(config.optimizer.population_size, 15);
        assert_eq!(config.optimizer.tournament_size, 3);
        assert_eq!(config.fitness.split, SplitRatios::default());
        assert_eq!(config.results_dir, PathBuf::from("out"));
        config.check().unwrap();
    }

    #[test]
    fn test_shipped_config_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/configs/default.json");
        let config = Config::from_file(path).unwrap();
        assert_eq!(config.optimizer.population_size, 50);
        assert_eq!(config.validation.walk_forward.windows, 5);
        assert_eq!(config.validation.gates.min_test_trades, 20);
    }

    #[test]
    fn test_bad_session_rejected() {
        let session = SessionConfig {
            open: "21:00".into(),
            close: "14:30".into(),
            ..Default::default()
        };
        assert!(session.to_settings().is_err());

        let session = SessionConfig {
            open: "9am".into(),
            ..Default::default()
        };
        assert!(session.to_settings().is_err());
    }

    #[test]
    fn test_lookahead_covers_longest_hold() {
        // 21 sessions span at most 31 calendar days
        assert!(min_lookahead_days() >= 31);
        assert_eq!(DataConfig::default().lookahead_days, min_lookahead_days());

        let mut config = Config::default();
        config.data.lookahead_days = 10;
        assert!(config.check().is_err());
    }

    #[test]
    fn test_split_ratios_must_leave_a_test_set() {
        let mut config = Config::default();
        config.fitness.split = SplitRatios {
            train: 0.8,
            validation: 0.2,
        };
        assert!(config.check().is_err());
    }
}
