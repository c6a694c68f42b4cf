//! Run orchestration
//!
//! load -> split -> genetic search -> hall-of-fame evaluation against the
//! baseline on every split -> validation -> ranked proposals.
//!
//! A run always ends with a recorded [`RunStatus`]. Errors and panics raised
//! anywhere below are caught here and turned into [`RunStatus::Failed`].

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::any::Any;
use std::cmp::Reverse;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

use crate::config::Config;
use crate::data::{LoadReport, LoadedData, SignalStore};
use crate::fitness::{split, FitnessEvaluator, FitnessStats, SplitEvaluation, SplitScores};
use crate::optimizer::{EvalContext, Fitness, GenerationStats, GeneticOptimizer, Individual, StopSignal};
use crate::params::{ConfigVector, ParamChange, ParameterSpace, ResolvedConfig};
use crate::validation::{Scored, ValidationReport, Validator, Verdict};

/// Offset mixed into the search seed for validation resampling
const VALIDATION_SEED_OFFSET: u64 = 0x5eed;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Stop signal observed at a generation boundary
    Stopped,
    Failed { error: String },
}

impl RunStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, RunStatus::Failed { .. })
    }
}

/// A validated candidate configuration
#[derive(Debug, Clone, Serialize)]
pub struct Proposal {
    /// 1-based, after ranking
    pub rank: usize,
    pub genes: ConfigVector,
    /// SHA-256 of the resolved configuration
    pub fingerprint: String,
    pub changes: Vec<ParamChange>,
    pub search_fitness: Fitness,
    pub candidate: SplitScores,
    pub baseline: SplitScores,
    pub candidate_test: FitnessStats,
    pub baseline_test: FitnessStats,
    pub validation: ValidationReport,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunTiming {
    pub started_at: DateTime<Utc>,
    pub load_secs: f64,
    pub search_secs: f64,
    pub validation_secs: f64,
    pub total_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub load: Option<LoadReport>,
    pub split_sizes: Option<[usize; 3]>,
    pub baseline: Option<SplitScores>,
    pub generations: Vec<GenerationStats>,
    pub evaluations: usize,
    pub proposals: Vec<Proposal>,
    pub timing: RunTiming,
}

impl RunReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        RunReport {
            status: RunStatus::Completed,
            load: None,
            split_sizes: None,
            baseline: None,
            generations: Vec::new(),
            evaluations: 0,
            proposals: Vec::new(),
            timing: RunTiming {
                started_at,
                load_secs: 0.0,
                search_secs: 0.0,
                validation_secs: 0.0,
                total_secs: 0.0,
            },
        }
    }

    pub fn best(&self) -> Option<&Proposal> {
        self.proposals.first()
    }
}

/// Load the signal store named in `config` and run the full pipeline
pub fn run_optimization<F>(config: &Config, stop: &StopSignal, on_generation: F) -> RunReport
where
    F: FnMut(&GenerationStats),
{
    guarded(|report| {
        let load_start = Instant::now();
        let store = SignalStore::open(&config.data.db_path)?;
        let data = store.load(config.data.lookahead_days)?;
        report.timing.load_secs = load_start.elapsed().as_secs_f64();
        report.load = Some(data.report.clone());
        search_and_validate(config, &data, stop, on_generation, report)
    })
}

/// Run the pipeline on data already resident in memory
pub fn run_on_data<F>(config: &Config, data: &LoadedData, stop: &StopSignal, on_generation: F) -> RunReport
where
    F: FnMut(&GenerationStats),
{
    guarded(|report| {
        report.load = Some(data.report.clone());
        search_and_validate(config, data, stop, on_generation, report)
    })
}

fn guarded<F>(body: F) -> RunReport
where
    F: FnOnce(&mut RunReport) -> Result<RunStatus>,
{
    let clock = Instant::now();
    let mut report = RunReport::new(Utc::now());

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&mut report)));
    report.status = match outcome {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => RunStatus::Failed {
            error: format!("{:#}", e),
        },
        Err(payload) => RunStatus::Failed {
            error: format!("worker panicked: {}", panic_message(payload.as_ref())),
        },
    };
    report.timing.total_secs = clock.elapsed().as_secs_f64();

    match &report.status {
        RunStatus::Failed { error } => warn!("Run failed: {}", error),
        status => info!(
            "Run finished ({:?}): {} generations, {} proposals in {:.1}s",
            status,
            report.generations.len(),
            report.proposals.len(),
            report.timing.total_secs
        ),
    }
    report
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn search_and_validate<F>(
    config: &Config,
    data: &LoadedData,
    stop: &StopSignal,
    mut on_generation: F,
    report: &mut RunReport,
) -> Result<RunStatus>
where
    F: FnMut(&GenerationStats),
{
    let settings = config.session.to_settings()?;
    let parts = split(&data.rows, config.fitness.split);
    report.split_sizes = Some([parts.train.len(), parts.validation.len(), parts.test.len()]);
    info!(
        "Split {} rows: train={} validation={} test={}",
        data.rows.len(),
        parts.train.len(),
        parts.validation.len(),
        parts.test.len()
    );
    if parts.train.is_empty() || parts.test.is_empty() {
        warn!("Not enough rows for a meaningful search; every fitness will be zero");
    }

    let space = ParameterSpace::new();
    let evaluator = FitnessEvaluator::new(&data.timeline, settings, config.fitness.min_trades);
    let baseline_cfg = space.baseline();
    let baseline_eval = SplitEvaluation::compute(&evaluator, &parts, &baseline_cfg);
    let baseline_scores = baseline_eval.scores();
    report.baseline = Some(baseline_scores);
    info!(
        "Baseline fitness: train={:.4} validation={:.4} test={:.4}",
        baseline_scores.train, baseline_scores.validation, baseline_scores.test
    );

    let search_start = Instant::now();
    let optimizer = GeneticOptimizer::new(config.optimizer.clone(), space)?;
    let ctx = EvalContext {
        train: parts.train,
        validation: parts.validation,
        evaluator,
        space,
    };
    let generations = &mut report.generations;
    let outcome = optimizer.run(&ctx, stop, |stats| {
        generations.push(*stats);
        on_generation(stats);
    });
    report.evaluations = outcome.evaluations;
    report.timing.search_secs = search_start.elapsed().as_secs_f64();

    let validation_start = Instant::now();
    let validator = Validator::new(evaluator, config.validation.clone());
    let mut rng = match config.optimizer.seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(VALIDATION_SEED_OFFSET)),
        None => StdRng::from_entropy(),
    };
    let baseline_scored = Scored {
        config: &baseline_cfg,
        splits: &baseline_eval,
    };

    let mut proposals = outcome
        .hall_of_fame
        .iter()
        .map(|individual| {
            let cfg = space.decode(&individual.genes);
            let splits = SplitEvaluation::compute(&evaluator, &parts, &cfg);
            let candidate = Scored {
                config: &cfg,
                splits: &splits,
            };
            let validation = validator.validate(&data.rows, &parts, candidate, baseline_scored, &mut rng);
            build_proposal(&space, individual, &cfg, &splits, &baseline_eval, validation)
        })
        .collect::<Result<Vec<_>>>()?;
    rank_proposals(&mut proposals);
    report.timing.validation_secs = validation_start.elapsed().as_secs_f64();

    for p in &proposals {
        info!(
            "Proposal #{} {}: test fitness {:.4} vs baseline {:.4}, {} parameter changes",
            p.rank,
            p.verdict,
            p.candidate.test,
            p.baseline.test,
            p.changes.len()
        );
    }
    report.proposals = proposals;

    Ok(if outcome.stopped {
        RunStatus::Stopped
    } else {
        RunStatus::Completed
    })
}

fn build_proposal(
    space: &ParameterSpace,
    individual: &Individual,
    cfg: &ResolvedConfig,
    splits: &SplitEvaluation,
    baseline: &SplitEvaluation,
    validation: ValidationReport,
) -> Result<Proposal> {
    Ok(Proposal {
        rank: 0,
        genes: individual.genes.clone(),
        fingerprint: fingerprint(cfg)?,
        changes: space.diff(&individual.genes),
        search_fitness: individual.fitness,
        candidate: splits.scores(),
        baseline: baseline.scores(),
        candidate_test: splits.test.stats.clone(),
        baseline_test: baseline.test.stats.clone(),
        verdict: validation.verdict,
        validation,
    })
}

/// SHA-256 (hex) of the resolved configuration's JSON form
pub fn fingerprint(cfg: &ResolvedConfig) -> Result<String> {
    let bytes = serde_json::to_vec(cfg).context("Failed to serialize resolved configuration")?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Verdict first (PROPOSABLE best), then test fitness, best first
pub fn rank_proposals(proposals: &mut [Proposal]) {
    proposals.sort_by_key(|p| (p.verdict, Reverse(OrderedFloat(p.candidate.test))));
    for (i, p) in proposals.iter_mut().enumerate() {
        p.rank = i + 1;
    }
}

// =============================================================================
// Report output
// =============================================================================

/// Write `report.json` and `generations.csv` into a fresh run directory
pub fn write_report(report: &RunReport, results_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let run_dir = results_dir.as_ref().join(format!(
        "run_{}",
        report.timing.started_at.format("%Y%m%d_%H%M%S")
    ));
    fs::create_dir_all(&run_dir)
        .with_context(|| format!("Failed to create results directory: {}", run_dir.display()))?;

    let json_path = run_dir.join("report.json");
    fs::write(&json_path, serde_json::to_string_pretty(report)?)
        .with_context(|| format!("Failed to write {}", json_path.display()))?;

    let csv_path = run_dir.join("generations.csv");
    let mut writer = csv::Writer::from_path(&csv_path)
        .with_context(|| format!("Failed to create {}", csv_path.display()))?;
    for stats in &report.generations {
        writer.serialize(stats)?;
    }
    writer.flush()?;

    info!("Saved run report to {}", run_dir.display());
    Ok(run_dir)
}
