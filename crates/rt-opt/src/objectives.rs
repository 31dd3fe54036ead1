// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — Objective Evaluator
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Composite objective over the linear dose model dose(w) = Σ wᵢ·fieldᵢ.
//!
//! Structure masks compile to flat voxel-index lists at setup, so the
//! hot evaluation path never touches a string or a 3-D index.

use crate::weights::projected;
use rt_core::engine::CpDoseSet;
use rt_types::error::PlanResult;
use rt_types::state::{DoseObjective, Grid3, ObjectiveKind, StructureSet};
use tracing::warn;

/// Degenerate-denominator guard for the homogeneity ratio.
const MIN_REFERENCE_DOSE: f64 = 1e-9;

struct CompiledObjective {
    objective: DoseObjective,
    /// Flat voxel indices of the structure mask; `None` when the
    /// structure has no mask (objective skipped, warning recorded).
    voxels: Option<Vec<usize>>,
}

/// Value of every objective plus the weighted total.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub total: f64,
    pub per_objective: Vec<f64>,
}

/// Objective oracle shared by both optimizer backends.
pub struct ObjectiveEvaluator {
    voxel_count: usize,
    fields: Vec<Vec<f64>>,
    compiled: Vec<CompiledObjective>,
    warnings: Vec<String>,
}

impl ObjectiveEvaluator {
    /// Compile objectives against the structure set and take ownership
    /// of the per-control-point dose fields.
    pub fn new(
        objectives: &[DoseObjective],
        structures: &StructureSet,
        cp_doses: CpDoseSet,
    ) -> PlanResult<Self> {
        let fields: Vec<Vec<f64>> = cp_doses
            .fields
            .into_iter()
            .map(|f| f.dose.into_raw_vec_and_offset().0)
            .collect();
        Self::from_fields(objectives, structures, &cp_doses.grid, fields)
    }

    /// Build from raw flat fields (one per weight entry).
    pub fn from_fields(
        objectives: &[DoseObjective],
        structures: &StructureSet,
        grid: &Grid3,
        fields: Vec<Vec<f64>>,
    ) -> PlanResult<Self> {
        let voxel_count = grid.voxel_count();
        let mut warnings = Vec::new();
        let mut compiled = Vec::with_capacity(objectives.len());

        for objective in objectives {
            objective.validate()?;
            let voxels = match structures.index_of(&objective.structure) {
                Some(index) => {
                    let mask = &structures.by_index(index).mask;
                    let flat: Vec<usize> = mask
                        .iter()
                        .enumerate()
                        .filter_map(|(i, &m)| if m { Some(i) } else { None })
                        .collect();
                    if flat.is_empty() {
                        warn!(structure = %objective.structure, "structure mask is empty; objective skipped");
                        warnings.push(format!(
                            "structure '{}' has an empty mask; objective skipped",
                            objective.structure
                        ));
                        None
                    } else {
                        Some(flat)
                    }
                }
                None => {
                    warn!(structure = %objective.structure, "structure has no mask; objective skipped");
                    warnings.push(format!(
                        "structure '{}' has no mask; objective skipped",
                        objective.structure
                    ));
                    None
                }
            };
            compiled.push(CompiledObjective {
                objective: objective.clone(),
                voxels,
            });
        }

        Ok(ObjectiveEvaluator {
            voxel_count,
            fields,
            compiled,
            warnings,
        })
    }

    /// Length of the weight vector this evaluator expects.
    pub fn weight_count(&self) -> usize {
        self.fields.len()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Total dose vector for a weight vector.
    pub fn dose_for_weights(&self, weights: &[f64]) -> Vec<f64> {
        let mut dose = vec![0.0_f64; self.voxel_count];
        for (w, field) in weights.iter().zip(self.fields.iter()) {
            if *w == 0.0 {
                continue;
            }
            for (d, f) in dose.iter_mut().zip(field.iter()) {
                *d += w * f;
            }
        }
        dose
    }

    /// Evaluate the composite objective at a raw weight vector. The
    /// vector is projected (w ≥ 0, Σw = 1) before the dose is formed, so
    /// the oracle is well-defined on all of weight space.
    pub fn evaluate(&self, weights: &[f64]) -> Evaluation {
        let w = projected(weights);
        let dose = self.dose_for_weights(&w);

        let per_objective: Vec<f64> = self
            .compiled
            .iter()
            .map(|c| match &c.voxels {
                Some(voxels) => objective_penalty(&c.objective, voxels, &dose),
                None => 0.0,
            })
            .collect();

        let total = per_objective
            .iter()
            .zip(self.compiled.iter())
            .map(|(p, c)| p * c.objective.weight)
            .sum();

        Evaluation {
            total,
            per_objective,
        }
    }

    /// Scalar shortcut for the optimizers.
    pub fn objective(&self, weights: &[f64]) -> f64 {
        self.evaluate(weights).total
    }
}

/// Dose exceeded by exactly v% of the structure volume: index
/// ⌊(1 − v/100)·N⌋ into the ascending-sorted dose vector.
fn dose_at_volume(sorted: &[f64], volume_pct: f64) -> f64 {
    let n = sorted.len();
    let index = ((1.0 - volume_pct / 100.0) * n as f64).floor() as usize;
    sorted[index.min(n - 1)]
}

fn objective_penalty(objective: &DoseObjective, voxels: &[usize], dose: &[f64]) -> f64 {
    let target = objective.dose_gy;
    let mut values: Vec<f64> = voxels.iter().map(|&i| dose[i]).collect();
    values.sort_unstable_by(f64::total_cmp);
    let n = values.len();

    match objective.kind {
        ObjectiveKind::MaxDose => {
            let max = values[n - 1];
            if max > target {
                (max - target).powi(2)
            } else {
                0.0
            }
        }
        ObjectiveKind::MinDose => {
            let min = values[0];
            if min < target {
                (target - min).powi(2)
            } else {
                0.0
            }
        }
        ObjectiveKind::MaxDvh => {
            let v = objective.volume_pct.expect("validated DVH objective");
            let d = dose_at_volume(&values, v);
            if d > target {
                (d - target).powi(2)
            } else {
                0.0
            }
        }
        ObjectiveKind::MinDvh => {
            let v = objective.volume_pct.expect("validated DVH objective");
            let d = dose_at_volume(&values, v);
            if d < target {
                (target - d).powi(2)
            } else {
                0.0
            }
        }
        ObjectiveKind::MeanDose => {
            let mean = values.iter().sum::<f64>() / n as f64;
            (mean - target).powi(2)
        }
        ObjectiveKind::Conformity => 1.0 - paddick_ci(voxels, dose, target),
        ObjectiveKind::Homogeneity => {
            let d2 = dose_at_volume(&values, 2.0);
            let d98 = dose_at_volume(&values, 98.0);
            (d2 / d98.max(MIN_REFERENCE_DOSE) - 1.0).powi(2) * 100.0
        }
        ObjectiveKind::Uniformity => {
            let mean = values.iter().sum::<f64>() / n as f64;
            if mean <= 0.0 {
                return 0.0;
            }
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
            (var.sqrt() / mean).powi(2) * 100.0
        }
    }
}

/// Paddick conformity index TV_PIV² / (TV · PIV), with PIV the voxels
/// (anywhere in the grid) at or above the reference dose. In [0, 1];
/// exactly 1 iff the reference isodose coincides with the target.
pub fn paddick_ci(target_voxels: &[usize], dose: &[f64], reference_dose: f64) -> f64 {
    let tv = target_voxels.len() as f64;
    let piv = dose.iter().filter(|&&d| d >= reference_dose).count() as f64;
    let tv_piv = target_voxels
        .iter()
        .filter(|&&i| dose[i] >= reference_dose)
        .count() as f64;
    if tv <= 0.0 || piv <= 0.0 {
        return 0.0;
    }
    (tv_piv * tv_piv) / (tv * piv)
}
