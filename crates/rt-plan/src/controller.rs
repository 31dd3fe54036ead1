// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — Plan Controller
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! End-to-end pipeline: prepare inputs, run the dose engine, optimize
//! beam weights against the plan objectives, and reduce the result to
//! DVHs, quality indices and dose-response estimates.

use rt_core::engine::{DoseEngine, DoseReport};
use rt_eval::dvh::{dvh, DvhCurve};
use rt_eval::metrics::{
    cold_spot, conformity_index, gradient_index, homogeneity_index, hot_spot,
    paddick_conformity_index, target_coverage, DoseSpot,
};
use rt_eval::radiobiology::{
    bed, eqd2, eud, ntcp_lkb, tcp_logistic, AlphaBetaTable, LkbParameters,
};
use rt_opt::genetic::GeneticOptimizer;
use rt_opt::gradient::GradientOptimizer;
use rt_opt::objectives::ObjectiveEvaluator;
use rt_opt::weights::OptimizationOutcome;
use rt_types::config::{OptimizerKind, PlanningConfig};
use rt_types::error::{PlanError, PlanResult};
use rt_types::run::{CancelToken, RunBudget, RunStatus};
use rt_types::state::{CtVolume, DoseGrid, Plan, StructureRole, StructureSet};
use tracing::{debug, warn};

/// Default TCP parameters: D₅₀ at the prescription, γ₅₀ = 2.
const TCP_GAMMA50: f64 = 2.0;

/// Default LKB parameters applied to organs at risk without a specific
/// model entry.
const DEFAULT_LKB: LkbParameters = LkbParameters {
    td50_gy: 50.0,
    m: 0.18,
    n: 1.0,
};

/// The control-point weights a plan delivers as-is, normalized to
/// Σw = 1.
fn delivered_weights(plan: &Plan) -> Vec<f64> {
    let mut weights: Vec<f64> = plan
        .beams
        .iter()
        .flat_map(|b| b.resolved_control_points())
        .map(|cp| cp.weight)
        .collect();
    rt_opt::weights::project(&mut weights);
    weights
}

/// Scalar quality summary of a finished plan.
#[derive(Debug, Clone)]
pub struct PlanMetricsSummary {
    pub conformity_index: f64,
    pub paddick_ci: f64,
    pub homogeneity_index: f64,
    pub gradient_index: f64,
    /// V95 of the target (fraction).
    pub target_coverage: f64,
    pub hot_spot: Option<DoseSpot>,
    pub cold_spot: Option<DoseSpot>,
    pub target_bed_gy: f64,
    pub target_eqd2_gy: f64,
    pub tcp: f64,
    /// (structure name, NTCP) per organ at risk.
    pub ntcp_per_oar: Vec<(String, f64)>,
}

/// Everything the controller emits for one plan run.
#[derive(Debug)]
pub struct PlanOutcome {
    pub dose: DoseGrid,
    /// Final weight vector, Σw = 1, one entry per control point.
    pub weights: Vec<f64>,
    pub dvhs: Vec<DvhCurve>,
    pub metrics: Option<PlanMetricsSummary>,
    pub optimization: Option<OptimizationOutcome>,
    pub status: RunStatus,
    pub warnings: Vec<String>,
}

/// Orchestrates engine, optimizer and evaluation for one plan.
pub struct PlanController {
    config: PlanningConfig,
    engine: DoseEngine,
    alpha_beta: AlphaBetaTable,
}

impl PlanController {
    pub fn new(config: PlanningConfig) -> PlanResult<Self> {
        let engine = DoseEngine::new(&config)?;
        Ok(PlanController {
            config,
            engine,
            alpha_beta: AlphaBetaTable::default(),
        })
    }

    pub fn alpha_beta_mut(&mut self) -> &mut AlphaBetaTable {
        &mut self.alpha_beta
    }

    /// Run the full pipeline. Optimizes when the plan carries objectives
    /// and more than one control point, then computes the final dose at
    /// the optimized weights and evaluates it.
    pub fn run(
        &mut self,
        plan: &Plan,
        ct: &CtVolume,
        structures: &StructureSet,
        token: &CancelToken,
        budget: &RunBudget,
    ) -> PlanResult<PlanOutcome> {
        plan.validate()
            .map_err(|e| e.in_component("plan controller"))?;
        let mut warnings = Vec::new();

        // 1. Optimize beam weights against the objectives.
        let (final_plan, weights, optimization) = if !plan.objectives.is_empty()
            && plan.total_control_points() > 1
        {
            match self.optimize(plan, ct, structures, token, budget)? {
                Some(outcome) => {
                    if !outcome.converged && outcome.status == RunStatus::Completed {
                        warn!(
                            iterations = outcome.iterations,
                            objective = outcome.objective,
                            "optimizer stopped at the iteration cap without converging"
                        );
                        warnings.push(format!(
                            "optimizer unconverged after {} iterations (objective {:.3e})",
                            outcome.iterations, outcome.objective
                        ));
                    }
                    let weighted = plan
                        .with_weights(&outcome.weights)
                        .map_err(|e| e.in_component("plan controller"))?;
                    (weighted, outcome.weights.clone(), Some(outcome))
                }
                None => {
                    warnings.push(
                        "optimization skipped: beam decomposition returned partial".to_string(),
                    );
                    (plan.clone(), delivered_weights(plan), None)
                }
            }
        } else {
            (plan.clone(), delivered_weights(plan), None)
        };

        // 2. Final dose at the delivered weights.
        let report: DoseReport = self
            .engine
            .compute_dose(&final_plan, ct, structures, token, budget)
            .map_err(|e| e.in_component("dose engine"))?;
        warnings.extend(report.warnings.iter().cloned());
        let mut status = report.status;
        if let Some(opt) = &optimization {
            if opt.status.is_partial() {
                status = opt.status;
            }
        }

        // 3. DVH reduction per structure.
        let mut dvhs = Vec::new();
        for structure in structures.iter() {
            match dvh(structure, &report.dose) {
                Ok(curve) => dvhs.push(curve),
                Err(PlanError::MissingStructure(name)) => {
                    warn!(structure = %name, "empty structure skipped in DVH reduction");
                    warnings.push(format!("structure '{name}' empty; DVH skipped"));
                }
                Err(e) => return Err(e.in_component("DVH builder")),
            }
        }

        // 4. Plan quality indices and dose-response models.
        let metrics = self.evaluate_metrics(&final_plan, &report.dose, structures, &dvhs);

        debug!(status = ?status, warnings = warnings.len(), "plan run finished");
        Ok(PlanOutcome {
            dose: report.dose,
            weights,
            dvhs,
            metrics,
            optimization,
            status,
            warnings,
        })
    }

    /// Decompose the plan into per-control-point fields and run the
    /// configured optimizer. `None` when the decomposition came back
    /// partial.
    fn optimize(
        &mut self,
        plan: &Plan,
        ct: &CtVolume,
        structures: &StructureSet,
        token: &CancelToken,
        budget: &RunBudget,
    ) -> PlanResult<Option<OptimizationOutcome>> {
        let cp_set = self
            .engine
            .compute_control_point_doses(plan, ct, token, budget)
            .map_err(|e| e.in_component("dose engine"))?;
        if cp_set.status.is_partial() {
            return Ok(None);
        }
        structures
            .grid
            .check_shape(cp_set.grid.shape(), "structure set vs dose grid")
            .map_err(|e| e.in_component("plan controller"))?;

        let evaluator = ObjectiveEvaluator::new(&plan.objectives, structures, cp_set)
            .map_err(|e| e.in_component("objective evaluator"))?;
        let initial = plan.initial_weights();

        let outcome = match self.config.optimization.algorithm {
            OptimizerKind::Gradient => GradientOptimizer::from_config(&self.config.optimization)
                .optimize(&evaluator, &initial, token, budget),
            OptimizerKind::Genetic => GeneticOptimizer::from_config(
                &self.config.optimization,
                self.config.optimization.seed,
            )
            .optimize(&evaluator, &initial, token, budget),
        };
        Ok(Some(outcome))
    }

    fn evaluate_metrics(
        &self,
        plan: &Plan,
        dose: &DoseGrid,
        structures: &StructureSet,
        dvhs: &[DvhCurve],
    ) -> Option<PlanMetricsSummary> {
        let ptv = structures.ptv()?;
        let prescription = plan.prescription;
        let prescribed = prescription.total_dose_gy;

        let target_dvh = dvhs.iter().find(|c| c.structure == ptv.name)?;
        let alpha_beta = self.alpha_beta.for_structure(&ptv.name, StructureRole::Ptv);

        let target_values = dose.values_in(&ptv.mask);
        let target_eud = eud(&target_values, 1.0);

        let ntcp_per_oar = structures
            .iter()
            .filter(|s| s.role == StructureRole::Oar)
            .filter_map(|s| {
                let values = dose.values_in(&s.mask);
                if values.is_empty() {
                    None
                } else {
                    Some((s.name.clone(), ntcp_lkb(&values, &DEFAULT_LKB)))
                }
            })
            .collect();

        Some(PlanMetricsSummary {
            conformity_index: conformity_index(dose, &ptv.mask, prescribed),
            paddick_ci: paddick_conformity_index(dose, &ptv.mask, prescribed),
            homogeneity_index: homogeneity_index(target_dvh),
            gradient_index: gradient_index(dose, prescribed),
            target_coverage: target_coverage(dose, &ptv.mask, prescribed, 0.95),
            hot_spot: hot_spot(dose, prescribed),
            cold_spot: cold_spot(dose, &ptv.mask, prescribed),
            target_bed_gy: bed(prescribed, prescription.fractions, alpha_beta),
            target_eqd2_gy: eqd2(prescribed, prescription.fractions, alpha_beta),
            tcp: tcp_logistic(target_eud, prescribed, TCP_GAMMA50),
            ntcp_per_oar,
        })
    }
}
