// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — Gradient Descent Optimizer
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Projected gradient descent over the control-point weight vector.
//!
//! The gradient comes from forward finite differences — one objective
//! evaluation per weight, parallel across weight indices. Each step
//! clamps to w ≥ 0 and renormalizes to Σw = 1.

use crate::objectives::ObjectiveEvaluator;
use crate::weights::{project, projected, OptimizationOutcome};
use rayon::prelude::*;
use rt_types::config::OptimizationConfig;
use rt_types::run::{CancelToken, RunBudget, RunStatus};
use tracing::debug;

/// Forward-difference step h.
const FD_STEP: f64 = 1e-5;

#[derive(Debug, Clone)]
pub struct GradientOptimizer {
    pub learning_rate: f64,
    pub max_iterations: usize,
    pub convergence_threshold: f64,
}

impl GradientOptimizer {
    pub fn from_config(config: &OptimizationConfig) -> Self {
        GradientOptimizer {
            learning_rate: config.learning_rate,
            max_iterations: config.max_iterations,
            convergence_threshold: config.convergence_threshold,
        }
    }

    /// Minimize the evaluator's objective starting from `initial`.
    /// Returns the best weights seen, so the result never regresses
    /// below the starting point.
    pub fn optimize(
        &self,
        evaluator: &ObjectiveEvaluator,
        initial: &[f64],
        token: &CancelToken,
        budget: &RunBudget,
    ) -> OptimizationOutcome {
        let mut w = projected(initial);
        let initial_objective = evaluator.objective(&w);

        let mut best_w = w.clone();
        let mut best_f = initial_objective;
        let mut history = vec![initial_objective];
        let mut previous = initial_objective;
        let mut converged = false;
        let mut status = RunStatus::Completed;
        let mut iterations = 0;

        for iteration in 0..self.max_iterations {
            if token.is_cancelled() {
                status = RunStatus::Cancelled;
                break;
            }
            if budget.expired() {
                status = RunStatus::TimedOut;
                break;
            }
            iterations = iteration + 1;

            // ∂f/∂wᵢ by forward differences, parallel across weights.
            let f0 = evaluator.objective(&w);
            let gradient: Vec<f64> = (0..w.len())
                .into_par_iter()
                .map(|i| {
                    let mut perturbed = w.clone();
                    perturbed[i] += FD_STEP;
                    (evaluator.objective(&perturbed) - f0) / FD_STEP
                })
                .collect();

            for (wi, g) in w.iter_mut().zip(gradient.iter()) {
                *wi -= self.learning_rate * g;
            }
            project(&mut w);

            let f = evaluator.objective(&w);
            history.push(f);
            if f < best_f {
                best_f = f;
                best_w = w.clone();
            }
            debug!(iteration, objective = f, "gradient step");

            if (previous - f).abs() < self.convergence_threshold {
                converged = true;
                break;
            }
            previous = f;
        }

        OptimizationOutcome {
            weights: best_w,
            objective: best_f,
            initial_objective,
            history,
            iterations,
            converged,
            status,
        }
    }
}
