//! Backtest command implementation

use anyhow::{bail, Context, Result};
use signal_tuner::data::SignalStore;
use signal_tuner::fitness::{split, Evaluation, FitnessEvaluator, SplitEvaluation};
use signal_tuner::params::{ConfigVector, ParameterSpace, DIMENSION_COUNT};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Accepts a bare array of numbers or any object with a `genes` array (a proposal)
fn load_vector(path: &Path) -> Result<ConfigVector> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read vector file: {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&contents).context("Failed to parse vector JSON")?;
    let genes = match value {
        serde_json::Value::Array(_) => value,
        serde_json::Value::Object(mut obj) => match obj.remove("genes") {
            Some(genes) => genes,
            None => bail!("Vector file has no 'genes' field"),
        },
        _ => bail!("Vector file must hold an array or an object with 'genes'"),
    };
    let genes: Vec<f64> = serde_json::from_value(genes).context("Genes must be numbers")?;
    if genes.len() != DIMENSION_COUNT {
        warn!(
            "Vector has {} genes, expected {}; missing genes take baseline values",
            genes.len(),
            DIMENSION_COUNT
        );
    }
    Ok(ConfigVector::new(genes))
}

fn print_row(label: &str, eval: &Evaluation) {
    let s = &eval.stats;
    println!(
        "{:<12} {:>8} {:>9} {:>9} {:>8} {:>8.1} {:>8.2} {:>9.3} {:>9.4}",
        label,
        s.signals,
        s.triggered,
        s.executed,
        s.no_exit,
        s.win_rate * 100.0,
        s.profit_factor,
        s.avg_pnl_pct,
        eval.fitness
    );
}

fn print_table(title: &str, evals: &SplitEvaluation) {
    println!("\n{}", title);
    println!(
        "{:<12} {:>8} {:>9} {:>9} {:>8} {:>8} {:>8} {:>9} {:>9}",
        "Split", "Signals", "Triggered", "Executed", "NoExit", "WinR%", "PF", "AvgPnL%", "Fitness"
    );
    println!("{}", "-".repeat(90));
    print_row("train", &evals.train);
    print_row("validation", &evals.validation);
    print_row("test", &evals.test);
}

pub fn run(config_path: Option<String>, vector_path: Option<PathBuf>) -> Result<()> {
    info!("Starting backtest");
    let config = super::load_config(config_path.as_deref())?;
    let settings = config.session.to_settings()?;

    info!("Loading signals from: {}", config.data.db_path.display());
    let data = SignalStore::open(&config.data.db_path)?.load(config.data.lookahead_days)?;
    let parts = split(&data.rows, config.fitness.split);
    let evaluator = FitnessEvaluator::new(&data.timeline, settings, config.fitness.min_trades);

    let space = ParameterSpace::new();
    let baseline = SplitEvaluation::compute(&evaluator, &parts, &space.baseline());

    println!("\n{}", "=".repeat(90));
    println!("BACKTEST RESULTS");
    println!("{}", "=".repeat(90));
    println!(
        "Rows: {} (train {}, validation {}, test {})",
        data.rows.len(),
        parts.train.len(),
        parts.validation.len(),
        parts.test.len()
    );
    print_table("Baseline configuration", &baseline);

    if let Some(path) = vector_path {
        let genes = load_vector(&path)?;
        let candidate = SplitEvaluation::compute(&evaluator, &parts, &space.decode(&genes));
        print_table(&format!("Candidate ({})", path.display()), &candidate);

        let changes = space.diff(&genes);
        println!("\n{} resolved parameters differ from baseline:", changes.len());
        for change in &changes {
            println!(
                "  {:<36} {:>10.4} -> {:>10.4}",
                change.name, change.baseline, change.candidate
            );
        }
    }
    println!("{}", "=".repeat(90));

    Ok(())
}
