// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — Genetic Optimizer
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Genetic search over the weight simplex: elitism, tournament
//! selection, one-point crossover and per-gene uniform mutation.
//! Fully deterministic for a fixed seed.

use crate::objectives::ObjectiveEvaluator;
use crate::weights::{project, projected, OptimizationOutcome};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rt_types::config::OptimizationConfig;
use rt_types::run::{CancelToken, RunBudget, RunStatus};
use tracing::debug;

/// Fraction of the population preserved unchanged each generation.
const ELITE_FRACTION: f64 = 0.1;

/// Tournament size k.
const TOURNAMENT_SIZE: usize = 3;

/// Mutation perturbation bound: gene += U(−0.2, 0.2).
const MUTATION_SPAN: f64 = 0.2;

/// Search stops once the best fitness drops below this.
const FITNESS_TARGET: f64 = 1e-4;

#[derive(Debug, Clone)]
pub struct GeneticOptimizer {
    pub population_size: usize,
    pub max_generations: usize,
    pub mutation_rate: f64,
    pub crossover_rate: f64,
    pub seed: u64,
}

impl GeneticOptimizer {
    pub fn from_config(config: &OptimizationConfig, seed: u64) -> Self {
        GeneticOptimizer {
            population_size: config.population_size,
            max_generations: config.max_iterations,
            mutation_rate: config.mutation_rate,
            crossover_rate: config.crossover_rate,
            seed,
        }
    }

    pub fn optimize(
        &self,
        evaluator: &ObjectiveEvaluator,
        initial: &[f64],
        token: &CancelToken,
        budget: &RunBudget,
    ) -> OptimizationOutcome {
        let genes = initial.len();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let initial_w = projected(initial);
        let initial_objective = evaluator.objective(&initial_w);

        // Seed population: the incoming vector plus random simplex points.
        let mut population: Vec<Vec<f64>> = Vec::with_capacity(self.population_size);
        population.push(initial_w.clone());
        while population.len() < self.population_size {
            let mut candidate: Vec<f64> = (0..genes).map(|_| rng.gen::<f64>()).collect();
            project(&mut candidate);
            population.push(candidate);
        }

        let mut fitness: Vec<f64> = population.iter().map(|w| evaluator.objective(w)).collect();
        let mut history = Vec::new();
        let mut status = RunStatus::Completed;
        let mut generations = 0;

        for generation in 0..self.max_generations {
            if token.is_cancelled() {
                status = RunStatus::Cancelled;
                break;
            }
            if budget.expired() {
                status = RunStatus::TimedOut;
                break;
            }
            generations = generation + 1;

            // Rank ascending: lower objective is fitter.
            let mut order: Vec<usize> = (0..population.len()).collect();
            order.sort_by(|&a, &b| fitness[a].total_cmp(&fitness[b]));
            let best = fitness[order[0]];
            history.push(best);
            debug!(generation, best, "genetic generation");
            if best < FITNESS_TARGET {
                break;
            }

            let elite_count = ((self.population_size as f64 * ELITE_FRACTION).ceil() as usize)
                .clamp(1, self.population_size);
            let mut next: Vec<Vec<f64>> = order[..elite_count]
                .iter()
                .map(|&i| population[i].clone())
                .collect();

            while next.len() < self.population_size {
                let a = self.tournament(&fitness, &mut rng);
                let b = self.tournament(&fitness, &mut rng);
                let mut child = if rng.gen::<f64>() < self.crossover_rate && genes > 1 {
                    let cut = rng.gen_range(1..genes);
                    let mut child = population[a][..cut].to_vec();
                    child.extend_from_slice(&population[b][cut..]);
                    child
                } else {
                    population[a].clone()
                };

                for gene in child.iter_mut() {
                    if rng.gen::<f64>() < self.mutation_rate {
                        *gene = (*gene + rng.gen_range(-MUTATION_SPAN..MUTATION_SPAN))
                            .clamp(0.0, 1.0);
                    }
                }
                project(&mut child);
                next.push(child);
            }

            population = next;
            fitness = population.iter().map(|w| evaluator.objective(w)).collect();
        }

        // Best individual over the final population.
        let (best_index, best_fitness) = fitness
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, &f)| (i, f))
            .expect("population is never empty");

        let converged = best_fitness < FITNESS_TARGET;
        OptimizationOutcome {
            weights: population[best_index].clone(),
            objective: best_fitness,
            initial_objective,
            history,
            iterations: generations,
            converged,
            status,
        }
    }

    /// k-way tournament: best of k uniformly drawn competitors.
    fn tournament(&self, fitness: &[f64], rng: &mut StdRng) -> usize {
        let mut best = rng.gen_range(0..fitness.len());
        for _ in 1..TOURNAMENT_SIZE {
            let challenger = rng.gen_range(0..fitness.len());
            if fitness[challenger] < fitness[best] {
                best = challenger;
            }
        }
        best
    }
}
