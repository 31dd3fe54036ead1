// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — Weight Vectors
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Shared weight-vector handling and the optimizer result type.

use rt_types::run::RunStatus;

/// Project a weight vector onto the feasible set: clamp to w ≥ 0, then
/// normalize to Σw = 1 (uniform when everything clamps to zero).
pub fn project(weights: &mut [f64]) {
    for w in weights.iter_mut() {
        if *w < 0.0 {
            *w = 0.0;
        }
    }
    let sum: f64 = weights.iter().sum();
    if sum > 0.0 {
        for w in weights.iter_mut() {
            *w /= sum;
        }
    } else if !weights.is_empty() {
        let uniform = 1.0 / weights.len() as f64;
        for w in weights.iter_mut() {
            *w = uniform;
        }
    }
}

/// Projected copy.
pub fn projected(weights: &[f64]) -> Vec<f64> {
    let mut out = weights.to_vec();
    project(&mut out);
    out
}

/// Result of one optimizer run. Both backends guarantee Σw = 1, w ≥ 0
/// and f(weights) ≤ f(initial weights).
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub weights: Vec<f64>,
    pub objective: f64,
    pub initial_objective: f64,
    /// Objective value per iteration / best fitness per generation.
    pub history: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
    pub status: RunStatus,
}
