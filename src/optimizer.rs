//! Genetic search over configuration vectors
//!
//! Generation 0 is a bounded-uniform random population seeded with the
//! baseline vector. Each later generation keeps the elites unchanged and
//! fills the rest through tournament selection, two-point crossover and
//! per-gene Gaussian mutation. Individuals are ranked on a blend of train and
//! validation fitness. Evaluation runs on a dedicated rayon pool; all
//! bookkeeping stays on the calling thread.

use anyhow::{Context, Result};
use itertools::{Itertools, MinMaxResult};
use ordered_float::OrderedFloat;
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::fitness::FitnessEvaluator;
use crate::params::{ConfigVector, ParameterSpace};
use crate::types::SimulationRow;

/// Search settings (`optimizer` section of the run configuration)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneticConfig {
    pub population_size: usize,
    pub generations: usize,
    pub crossover_prob: f64,
    pub mutation_prob: f64,
    /// Mutation sigma as a fraction of each dimension's bound range
    pub mutation_sigma: f64,
    pub tournament_size: usize,
    pub elite_count: usize,
    pub hall_of_fame_size: usize,
    /// Weight of train fitness in the blend; validation gets the rest
    pub train_weight: f64,
    /// Generations between refreshes of the reported validation fitness
    pub validation_stride: usize,
    /// Worker threads; defaults to all cores but one
    pub workers: Option<usize>,
    pub seed: Option<u64>,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        GeneticConfig {
            population_size: 50,
            generations: 30,
            crossover_prob: 0.7,
            mutation_prob: 0.2,
            mutation_sigma: 0.1,
            tournament_size: 3,
            elite_count: 2,
            hall_of_fame_size: 3,
            train_weight: 0.5,
            validation_stride: 1,
            workers: None,
            seed: None,
        }
    }
}

impl GeneticConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.filter(|w| *w > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1).max(1))
                .unwrap_or(1)
        })
    }
}

/// Cooperative stop flag, polled once per generation
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Read-only data shared by every evaluation
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub train: &'a [SimulationRow],
    pub validation: &'a [SimulationRow],
    pub evaluator: FitnessEvaluator<'a>,
    pub space: ParameterSpace,
}

impl EvalContext<'_> {
    pub fn score(&self, genes: &ConfigVector, train_weight: f64) -> Fitness {
        let config = self.space.decode(genes);
        let train = self.evaluator.fitness(self.train, &config);
        let validation = self.evaluator.fitness(self.validation, &config);
        Fitness {
            blended: train_weight * train + (1.0 - train_weight) * validation,
            train,
            validation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fitness {
    pub blended: f64,
    pub train: f64,
    pub validation: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Individual {
    pub genes: ConfigVector,
    pub fitness: Fitness,
}

/// One row of the per-generation progress series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationStats {
    pub generation: usize,
    pub best_blended: f64,
    pub best_train: f64,
    pub avg_train: f64,
    pub worst_train: f64,
    /// Validation fitness of the best individual at the last refresh
    pub best_validation: f64,
    /// Train minus validation fitness of that same individual
    pub train_validation_gap: f64,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub generations: Vec<GenerationStats>,
    /// Best distinct individuals seen in any generation, best first
    pub hall_of_fame: Vec<Individual>,
    pub stopped: bool,
    pub evaluations: usize,
}

pub struct GeneticOptimizer {
    config: GeneticConfig,
    space: ParameterSpace,
    pool: rayon::ThreadPool,
    unit_normal: Normal,
}

impl GeneticOptimizer {
    pub fn new(config: GeneticConfig, space: ParameterSpace) -> Result<Self> {
        let workers = config.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("fitness-{}", i))
            .build()
            .context("Failed to start fitness worker pool")?;
        let unit_normal = Normal::new(0.0, 1.0).context("Failed to build mutation distribution")?;

        tracing::info!(
            "Genetic optimizer: population={}, generations={}, workers={}",
            config.population_size,
            config.generations,
            workers
        );

        Ok(GeneticOptimizer {
            config,
            space,
            pool,
            unit_normal,
        })
    }

    pub fn config(&self) -> &GeneticConfig {
        &self.config
    }

    /// Run the search, calling `on_generation` after each recorded generation
    pub fn run<F>(&self, ctx: &EvalContext<'_>, stop: &StopSignal, mut on_generation: F) -> SearchOutcome
    where
        F: FnMut(&GenerationStats),
    {
        let cfg = &self.config;
        let mut rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let population_size = cfg.population_size.max(cfg.elite_count + 1).max(2);

        let mut outcome = SearchOutcome {
            generations: Vec::with_capacity(cfg.generations),
            hall_of_fame: Vec::new(),
            stopped: false,
            evaluations: 0,
        };
        let mut population: Vec<Individual> = Vec::new();
        // Best individual as of the last validation refresh
        let mut reported = Fitness {
            blended: 0.0,
            train: 0.0,
            validation: 0.0,
        };

        for generation in 0..cfg.generations {
            if stop.is_set() {
                tracing::info!("Stop requested; ending search before generation {}", generation);
                outcome.stopped = true;
                break;
            }

            let (elites, candidates) = if generation == 0 {
                let initial: Vec<ConfigVector> = std::iter::once(self.space.baseline_vector())
                    .chain((1..population_size).map(|_| self.space.random_vector(&mut rng)))
                    .collect();
                (Vec::new(), initial)
            } else {
                self.breed(&population, population_size, &mut rng)
            };

            outcome.evaluations += candidates.len();
            population = elites;
            population.extend(self.evaluate(ctx, candidates));
            population.sort_by_key(|ind| Reverse(OrderedFloat(ind.fitness.blended)));

            let best = &population[0];
            let last = generation + 1 == cfg.generations;
            if generation % cfg.validation_stride.max(1) == 0 || last {
                reported = best.fitness;
            }
            let stats = generation_stats(generation, &population, &reported);
            tracing::debug!(
                "Generation {}: best={:.4} train={:.4} avg={:.4} val={:.4}",
                generation,
                stats.best_blended,
                stats.best_train,
                stats.avg_train,
                stats.best_validation
            );

            update_hall_of_fame(&mut outcome.hall_of_fame, &population, cfg.hall_of_fame_size);
            outcome.generations.push(stats);
            on_generation(&stats);
        }

        outcome
    }

    fn evaluate(&self, ctx: &EvalContext<'_>, candidates: Vec<ConfigVector>) -> Vec<Individual> {
        let train_weight = self.config.train_weight;
        self.pool.install(|| {
            candidates
                .into_par_iter()
                .map(|genes| {
                    let fitness = ctx.score(&genes, train_weight);
                    Individual { genes, fitness }
                })
                .collect()
        })
    }

    /// Elites (already scored) plus unscored offspring filling the population
    fn breed(
        &self,
        ranked: &[Individual],
        population_size: usize,
        rng: &mut StdRng,
    ) -> (Vec<Individual>, Vec<ConfigVector>) {
        let elites: Vec<Individual> = ranked.iter().take(self.config.elite_count).cloned().collect();
        let needed = population_size.saturating_sub(elites.len());

        let mut offspring = Vec::with_capacity(needed);
        while offspring.len() < needed {
            let mut a = self.tournament(ranked, rng).genes.clone();
            let mut b = self.tournament(ranked, rng).genes.clone();
            if rng.gen_bool(self.config.crossover_prob.clamp(0.0, 1.0)) {
                two_point_crossover(&mut a, &mut b, rng);
            }
            self.mutate(&mut a, rng);
            self.mutate(&mut b, rng);
            offspring.push(a);
            if offspring.len() < needed {
                offspring.push(b);
            }
        }

        (elites, offspring)
    }

    fn tournament<'p>(&self, ranked: &'p [Individual], rng: &mut StdRng) -> &'p Individual {
        let size = self.config.tournament_size.max(1);
        (0..size)
            .map(|_| &ranked[rng.gen_range(0..ranked.len())])
            .max_by_key(|ind| OrderedFloat(ind.fitness.blended))
            .unwrap_or(&ranked[0])
    }

    fn mutate(&self, genes: &mut ConfigVector, rng: &mut StdRng) {
        let prob = self.config.mutation_prob.clamp(0.0, 1.0);
        let sigma = self.config.mutation_sigma;
        for (gene, dim) in genes.genes_mut().iter_mut().zip(self.space.dimensions()) {
            if rng.gen_bool(prob) {
                *gene += self.unit_normal.sample(rng) * sigma * dim.range();
            }
        }
        self.space.clamp(genes);
    }
}

/// Swap the genes between two cut points
fn two_point_crossover(a: &mut ConfigVector, b: &mut ConfigVector, rng: &mut StdRng) {
    let len = a.len().min(b.len());
    if len < 2 {
        return;
    }
    let mut i = rng.gen_range(0..len);
    let mut j = rng.gen_range(0..len);
    if i > j {
        std::mem::swap(&mut i, &mut j);
    }
    let (a, b) = (a.genes_mut(), b.genes_mut());
    a[i..=j].swap_with_slice(&mut b[i..=j]);
}

/// `reported` is the individual whose validation fitness is published; the
/// gap is taken from that same individual
fn generation_stats(generation: usize, ranked: &[Individual], reported: &Fitness) -> GenerationStats {
    let best = &ranked[0];
    let (worst_train, best_train) = match ranked.iter().map(|i| OrderedFloat(i.fitness.train)).minmax() {
        MinMaxResult::NoElements => (0.0, 0.0),
        MinMaxResult::OneElement(v) => (v.0, v.0),
        MinMaxResult::MinMax(lo, hi) => (lo.0, hi.0),
    };
    let avg_train = ranked.iter().map(|i| i.fitness.train).sum::<f64>() / ranked.len() as f64;

    GenerationStats {
        generation,
        best_blended: best.fitness.blended,
        best_train,
        avg_train,
        worst_train,
        best_validation: reported.validation,
        train_validation_gap: reported.train - reported.validation,
    }
}

fn update_hall_of_fame(hall: &mut Vec<Individual>, ranked: &[Individual], size: usize) {
    for ind in ranked.iter().take(size) {
        if !hall.iter().any(|h| h.genes == ind.genes) {
            hall.push(ind.clone());
        }
    }
    hall.sort_by_key(|ind| Reverse(OrderedFloat(ind.fitness.blended)));
    hall.truncate(size);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulationSettings;
    use crate::types::ScoreTimeline;

    fn individual(genes: Vec<f64>, blended: f64) -> Individual {
        Individual {
            genes: ConfigVector::new(genes),
            fitness: Fitness {
                blended,
                train: blended,
                validation: blended,
            },
        }
    }

    #[test]
    fn test_crossover_preserves_gene_multiset() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut a = ConfigVector::new(vec![1.0; 10]);
        let mut b = ConfigVector::new(vec![2.0; 10]);
        two_point_crossover(&mut a, &mut b, &mut rng);
        let total: f64 = a.iter().chain(b.iter()).sum();
        assert_eq!(total, 30.0);
        for i in 0..10 {
            assert_eq!(a[i] + b[i], 3.0);
        }
    }

    #[test]
    fn test_hall_of_fame_is_distinct_and_bounded() {
        let mut hall = Vec::new();
        let ranked = vec![
            individual(vec![1.0], 3.0),
            individual(vec![1.0], 3.0),
            individual(vec![2.0], 2.0),
            individual(vec![3.0], 1.0),
        ];
        update_hall_of_fame(&mut hall, &ranked, 3);
        update_hall_of_fame(&mut hall, &[individual(vec![4.0], 2.5)], 3);
        let fitness: Vec<f64> = hall.iter().map(|i| i.fitness.blended).collect();
        assert_eq!(fitness, vec![3.0, 2.5, 2.0]);
    }

    #[test]
    fn test_generation_stats() {
        let ranked = vec![
            individual(vec![1.0], 4.0),
            individual(vec![2.0], 2.0),
            individual(vec![3.0], 0.0),
        ];
        let stats = generation_stats(1, &ranked, &ranked[0].fitness);
        assert_eq!(stats.best_train, 4.0);
        assert_eq!(stats.worst_train, 0.0);
        assert_eq!(stats.avg_train, 2.0);
        assert_eq!(stats.best_validation, 4.0);
        assert_eq!(stats.train_validation_gap, 0.0);
    }

    #[test]
    fn test_gap_uses_the_reported_individual() {
        // Validation refreshed for an earlier best, then a new best appears
        let earlier = Fitness {
            blended: 2.0,
            train: 2.5,
            validation: 1.0,
        };
        let ranked = vec![individual(vec![1.0], 4.0), individual(vec![2.0], 2.0)];
        let stats = generation_stats(3, &ranked, &earlier);
        assert_eq!(stats.best_train, 4.0);
        assert_eq!(stats.best_validation, 1.0);
        assert_eq!(stats.train_validation_gap, 1.5);
    }

    #[test]
    fn test_stop_before_start_records_nothing() {
        let timeline = ScoreTimeline::default();
        let ctx = EvalContext {
            train: &[],
            validation: &[],
            evaluator: FitnessEvaluator::new(&timeline, SimulationSettings::default(), 1),
            space: ParameterSpace::new(),
        };
        let optimizer = GeneticOptimizer::new(
            GeneticConfig {
                population_size: 4,
                generations: 3,
                workers: Some(1),
                seed: Some(1),
                ..Default::default()
            },
            ParameterSpace::new(),
        )
        .unwrap();
        let stop = StopSignal::new();
        stop.trigger();
        let outcome = optimizer.run(&ctx, &stop, |_| {});
        assert!(outcome.stopped);
        assert!(outcome.generations.is_empty());
        assert_eq!(outcome.evaluations, 0);
    }

    #[test]
    fn test_run_on_empty_data_keeps_shape() {
        let timeline = ScoreTimeline::default();
        let ctx = EvalContext {
            train: &[],
            validation: &[],
            evaluator: FitnessEvaluator::new(&timeline, SimulationSettings::default(), 1),
            space: ParameterSpace::new(),
        };
        let optimizer = GeneticOptimizer::new(
            GeneticConfig {
                population_size: 6,
                generations: 4,
                workers: Some(2),
                seed: Some(11),
                ..Default::default()
            },
            ParameterSpace::new(),
        )
        .unwrap();
        let mut seen = Vec::new();
        let outcome = optimizer.run(&ctx, &StopSignal::new(), |s| seen.push(s.generation));
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert!(!outcome.stopped);
        // Generation 0 evaluates everyone; later ones skip the 2 elites
        assert_eq!(outcome.evaluations, 6 + 3 * 4);
        assert!(outcome.hall_of_fame.len() <= 3);
        // Ties keep the baseline seed first
        assert_eq!(outcome.hall_of_fame[0].genes, ParameterSpace::new().baseline_vector());
    }
}
