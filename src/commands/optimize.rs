//! Optimize command implementation with progress tracking and a stop file

use anyhow::{anyhow, Result};
use indicatif::{ProgressBar, ProgressStyle};
use signal_tuner::optimizer::StopSignal;
use signal_tuner::pipeline::{run_optimization, write_report};
use signal_tuner::RunStatus;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

const STOP_FILE_POLL: Duration = Duration::from_millis(500);

pub struct OptimizeArgs {
    pub config: Option<String>,
    pub population: Option<usize>,
    pub generations: Option<usize>,
    pub crossover: Option<f64>,
    pub mutation: Option<f64>,
    pub seed: Option<u64>,
    pub workers: Option<usize>,
    pub stop_file: Option<PathBuf>,
}

/// Trigger `stop` once `path` exists; exits when `done` is set
fn watch_stop_file(path: PathBuf, stop: StopSignal, done: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !done.load(Ordering::Relaxed) {
            if path.exists() {
                info!("Stop file {} found; stopping after this generation", path.display());
                stop.trigger();
                return;
            }
            thread::sleep(STOP_FILE_POLL);
        }
    })
}

pub fn run(args: OptimizeArgs) -> Result<()> {
    info!("Starting optimization");
    let mut config = super::load_config(args.config.as_deref())?;

    let ga = &mut config.optimizer;
    if let Some(p) = args.population {
        info!("Overriding population size to: {}", p);
        ga.population_size = p;
    }
    if let Some(g) = args.generations {
        info!("Overriding generations to: {}", g);
        ga.generations = g;
    }
    if let Some(c) = args.crossover {
        ga.crossover_prob = c.clamp(0.0, 1.0);
    }
    if let Some(m) = args.mutation {
        ga.mutation_prob = m.clamp(0.0, 1.0);
    }
    if args.seed.is_some() {
        ga.seed = args.seed;
    }
    if args.workers.is_some() {
        ga.workers = args.workers;
    }

    println!("\n{}", "=".repeat(70));
    println!("OPTIMIZATION");
    println!("{}", "=".repeat(70));
    println!("  Database:     {}", config.data.db_path.display());
    println!("  Population:   {}", config.optimizer.population_size);
    println!("  Generations:  {}", config.optimizer.generations);
    println!("  Crossover:    {:.2}", config.optimizer.crossover_prob);
    println!("  Mutation:     {:.2}", config.optimizer.mutation_prob);
    println!("  Workers:      {}", config.optimizer.worker_count());
    if let Some(path) = &args.stop_file {
        println!("  Stop file:    {}", path.display());
    }
    println!("{}\n", "=".repeat(70));

    let stop = StopSignal::new();
    let done = Arc::new(AtomicBool::new(false));
    let watcher = args
        .stop_file
        .clone()
        .map(|path| watch_stop_file(path, stop.clone(), Arc::clone(&done)));

    let pb = ProgressBar::new(config.optimizer.generations as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("⚡ {percent:>3}%|{bar:40}| gen {pos}/{len} [{elapsed}<{eta}] {msg}")?
            .progress_chars("█░ "),
    );

    let report = run_optimization(&config, &stop, |stats| {
        pb.set_position(stats.generation as u64 + 1);
        pb.set_message(format!(
            "best {:.3} | train {:.3} | val {:.3}",
            stats.best_blended, stats.best_train, stats.best_validation
        ));
    });
    pb.finish_and_clear();

    done.store(true, Ordering::Relaxed);
    if let Some(handle) = watcher {
        handle.join().ok();
    }

    let run_dir = write_report(&report, &config.results_dir)?;

    println!("\n{}", "=".repeat(110));
    println!(
        "RUN {:?}: {} generations, {} evaluations, {:.1}s",
        report.status,
        report.generations.len(),
        report.evaluations,
        report.timing.total_secs
    );
    println!("{}", "=".repeat(110));
    if let Some(load) = &report.load {
        println!(
            "Rows: {} loaded / {} signals ({} rejected)",
            load.rows_loaded,
            load.signals_read,
            load.rejected()
        );
    }
    if let Some(base) = &report.baseline {
        println!(
            "Baseline fitness: train {:.4}  validation {:.4}  test {:.4}",
            base.train, base.validation, base.test
        );
    }

    if !report.proposals.is_empty() {
        println!(
            "\n{:<4} {:<12} {:>8} {:>8} {:>8} {:>9} {:>7} {:>8} {:>7} | Fingerprint",
            "Rank", "Verdict", "Train", "Val", "Test", "BaseTest", "Trades", "p-value", "Changes"
        );
        println!("{}", "-".repeat(110));
        for p in &report.proposals {
            println!(
                "{:<4} {:<12} {:>8.4} {:>8.4} {:>8.4} {:>9.4} {:>7} {:>8.3} {:>7} | {}",
                p.rank,
                p.verdict.to_string(),
                p.candidate.train,
                p.candidate.validation,
                p.candidate.test,
                p.baseline.test,
                p.candidate_test.executed,
                p.validation.bootstrap.p_value,
                p.changes.len(),
                &p.fingerprint[..12.min(p.fingerprint.len())]
            );
        }

        if let Some(best) = report.best() {
            println!("\nGates for proposal #{}:", best.rank);
            for gate in &best.validation.gates {
                println!(
                    "  [{}] {:<28} {:>10.4} (threshold {:.4}, {:?})",
                    if gate.passed { "PASS" } else { "FAIL" },
                    gate.name,
                    gate.value,
                    gate.threshold,
                    gate.severity
                );
            }
            println!("\nLargest changes:");
            let mut changes = best.changes.clone();
            changes.sort_by(|a, b| {
                let da = (a.candidate - a.baseline).abs() / a.baseline.abs().max(1e-9);
                let db = (b.candidate - b.baseline).abs() / b.baseline.abs().max(1e-9);
                db.total_cmp(&da)
            });
            for change in changes.iter().take(10) {
                println!(
                    "  {:<36} {:>10.4} -> {:>10.4}",
                    change.name, change.baseline, change.candidate
                );
            }
        }
    } else {
        println!("No proposals.");
    }
    println!("\nReport saved to {}", run_dir.display());

    match report.status {
        RunStatus::Failed { error } => Err(anyhow!("Optimization failed: {}", error)),
        _ => Ok(()),
    }
}
