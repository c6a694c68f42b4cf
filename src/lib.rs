//! Signal Tuner
//!
//! Parameter self-tuning for a rule-based trading signal generator: replays
//! historical signals under candidate configurations, simulates the trades
//! they would have produced, searches the configuration space with a genetic
//! algorithm and gates the winners behind statistical validation.

pub mod config;
pub mod data;
pub mod fitness;
pub mod levels;
pub mod optimizer;
pub mod params;
pub mod pipeline;
pub mod replay;
pub mod simulator;
pub mod types;
pub mod validation;

pub use config::Config;
pub use pipeline::{run_on_data, run_optimization, Proposal, RunReport, RunStatus};
pub use types::*;
