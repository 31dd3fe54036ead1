// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — Config
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use crate::error::{PlanError, PlanResult};
use serde::{Deserialize, Serialize};

/// Dose-calculation backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseAlgorithmKind {
    CollapsedCone,
    PencilBeam,
    Aaa,
    Acuros,
    MonteCarlo,
}

/// Optimizer backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Gradient,
    Genetic,
}

/// Top-level planning configuration.
/// Maps 1:1 to planning_config.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningConfig {
    #[serde(default = "default_plan_name")]
    pub plan_name: String,
    #[serde(default)]
    pub dose_calculation: DoseCalcConfig,
    #[serde(default)]
    pub optimization: OptimizationConfig,
    #[serde(default)]
    pub monte_carlo: MonteCarloConfig,
}

fn default_plan_name() -> String {
    "Unnamed Plan".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoseCalcConfig {
    pub algorithm: DoseAlgorithmKind,
    /// Dose-grid resolution (mm).
    pub resolution_mm: f64,
    /// Worker threads for voxel-parallel loops.
    pub threads: usize,
    /// Optional two-column HU → ρ_e anchor file.
    pub hu_to_density_table: Option<String>,
}

impl Default for DoseCalcConfig {
    fn default() -> Self {
        DoseCalcConfig {
            algorithm: DoseAlgorithmKind::CollapsedCone,
            resolution_mm: 2.5,
            threads: 4,
            hu_to_density_table: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationConfig {
    pub algorithm: OptimizerKind,
    pub max_iterations: usize,
    pub convergence_threshold: f64,
    /// Gradient-descent step size η.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Genetic population size M.
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    /// Per-gene mutation probability.
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    /// One-point crossover probability.
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f64,
    /// Genetic-search seed, for reproducible runs.
    #[serde(default)]
    pub seed: u64,
}

fn default_learning_rate() -> f64 {
    0.1
}
fn default_population_size() -> usize {
    50
}
fn default_mutation_rate() -> f64 {
    0.2
}
fn default_crossover_rate() -> f64 {
    0.8
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        OptimizationConfig {
            algorithm: OptimizerKind::Gradient,
            max_iterations: 100,
            convergence_threshold: 1e-4,
            learning_rate: default_learning_rate(),
            population_size: default_population_size(),
            mutation_rate: default_mutation_rate(),
            crossover_rate: default_crossover_rate(),
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloConfig {
    pub num_particles_per_iteration: usize,
    /// Target relative uncertainty (%) in the high-dose region.
    pub target_uncertainty: f64,
    pub max_iterations: usize,
    #[serde(default)]
    pub seed: u64,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        MonteCarloConfig {
            num_particles_per_iteration: 100_000,
            target_uncertainty: 2.0,
            max_iterations: 20,
            seed: 0,
        }
    }
}

impl PlanningConfig {
    /// Load from a JSON file.
    pub fn from_file(path: &str) -> PlanResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range parameters at setup time.
    pub fn validate(&self) -> PlanResult<()> {
        let dc = &self.dose_calculation;
        if dc.resolution_mm <= 0.0 {
            return Err(PlanError::ConfigError(format!(
                "dose_calculation.resolution_mm must be positive, got {}",
                dc.resolution_mm
            )));
        }
        if dc.threads == 0 {
            return Err(PlanError::ConfigError(
                "dose_calculation.threads must be >= 1".to_string(),
            ));
        }

        let opt = &self.optimization;
        if opt.max_iterations == 0 {
            return Err(PlanError::ConfigError(
                "optimization.max_iterations must be >= 1".to_string(),
            ));
        }
        if opt.convergence_threshold <= 0.0 {
            return Err(PlanError::ConfigError(format!(
                "optimization.convergence_threshold must be positive, got {}",
                opt.convergence_threshold
            )));
        }
        if opt.learning_rate <= 0.0 {
            return Err(PlanError::ConfigError(format!(
                "optimization.learning_rate must be positive, got {}",
                opt.learning_rate
            )));
        }
        if opt.population_size < 2 {
            return Err(PlanError::ConfigError(
                "optimization.population_size must be >= 2".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&opt.mutation_rate) {
            return Err(PlanError::ConfigError(format!(
                "optimization.mutation_rate must be in [0, 1], got {}",
                opt.mutation_rate
            )));
        }
        if !(0.0..=1.0).contains(&opt.crossover_rate) {
            return Err(PlanError::ConfigError(format!(
                "optimization.crossover_rate must be in [0, 1], got {}",
                opt.crossover_rate
            )));
        }

        let mc = &self.monte_carlo;
        if mc.num_particles_per_iteration == 0 {
            return Err(PlanError::ConfigError(
                "monte_carlo.num_particles_per_iteration must be >= 1".to_string(),
            ));
        }
        if mc.target_uncertainty <= 0.0 {
            return Err(PlanError::ConfigError(format!(
                "monte_carlo.target_uncertainty must be positive, got {}",
                mc.target_uncertainty
            )));
        }
        if mc.max_iterations == 0 {
            return Err(PlanError::ConfigError(
                "monte_carlo.max_iterations must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PlanningConfig {
    fn default() -> Self {
        PlanningConfig {
            plan_name: default_plan_name(),
            dose_calculation: DoseCalcConfig::default(),
            optimization: OptimizationConfig::default(),
            monte_carlo: MonteCarloConfig::default(),
        }
    }
}
