// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — Radiobiology
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Linear-quadratic dose-response models: BED, EQD2, EUD, TCP and the
//! Lyman-Kutcher-Burman NTCP.

use ndarray::Array3;
use rt_math::special::normal_cdf;
use rt_types::constants::{ALPHA_BETA_LATE, ALPHA_BETA_TARGET};
use rt_types::state::StructureRole;
use std::collections::HashMap;

/// Built-in α/β values (Gy) by structure name, tumors and late-reacting
/// normal tissues.
const DEFAULT_ALPHA_BETA: [(&str, f64); 23] = [
    ("PROSTATE", 1.5),
    ("BREAST", 4.0),
    ("HEAD_NECK", 10.0),
    ("LUNG", 10.0),
    ("BRAIN", 10.0),
    ("GBM", 10.0),
    ("CERVIX", 10.0),
    ("COLORECTAL", 5.0),
    ("MELANOMA", 2.5),
    ("SPINAL_CORD", 2.0),
    ("BRAINSTEM", 2.0),
    ("LUNG_NORMAL", 3.0),
    ("HEART", 2.5),
    ("ESOPHAGUS", 3.0),
    ("RECTUM", 3.0),
    ("BLADDER", 5.0),
    ("KIDNEY", 2.5),
    ("LIVER", 2.5),
    ("PAROTID", 3.0),
    ("OPTIC_NERVE", 3.0),
    ("COCHLEA", 3.0),
    ("LENS", 1.2),
    ("SKIN", 2.8),
];

/// Configurable α/β lookup, falling back to the role defaults (targets
/// 10 Gy, late-responding tissue 3 Gy).
#[derive(Debug, Clone)]
pub struct AlphaBetaTable {
    values: HashMap<String, f64>,
}

impl Default for AlphaBetaTable {
    fn default() -> Self {
        AlphaBetaTable {
            values: DEFAULT_ALPHA_BETA
                .iter()
                .map(|&(name, v)| (name.to_string(), v))
                .collect(),
        }
    }
}

impl AlphaBetaTable {
    /// Override or add an entry.
    pub fn set(&mut self, structure: impl Into<String>, alpha_beta: f64) {
        self.values.insert(structure.into().to_uppercase(), alpha_beta);
    }

    /// α/β for a structure, by name first, then by role.
    pub fn for_structure(&self, name: &str, role: StructureRole) -> f64 {
        if let Some(&v) = self.values.get(&name.to_uppercase()) {
            return v;
        }
        match role {
            StructureRole::Ptv => ALPHA_BETA_TARGET,
            StructureRole::Oar | StructureRole::Other => ALPHA_BETA_LATE,
        }
    }
}

/// Biologically effective dose: BED = D·(1 + d/(α/β)) with d = D/n.
pub fn bed(total_dose_gy: f64, fractions: u32, alpha_beta: f64) -> f64 {
    if total_dose_gy <= 0.0 || fractions == 0 {
        return 0.0;
    }
    let dose_per_fraction = total_dose_gy / fractions as f64;
    total_dose_gy * (1.0 + dose_per_fraction / alpha_beta)
}

/// Equivalent dose in 2 Gy fractions: EQD2 = BED / (1 + 2/(α/β)).
pub fn eqd2(total_dose_gy: f64, fractions: u32, alpha_beta: f64) -> f64 {
    bed(total_dose_gy, fractions, alpha_beta) / (1.0 + 2.0 / alpha_beta)
}

/// Voxel-wise BED transform of a total-dose grid.
pub fn bed_distribution(dose: &Array3<f64>, fractions: u32, alpha_beta: f64) -> Array3<f64> {
    let n = fractions.max(1) as f64;
    dose.mapv(|d| d * (1.0 + (d / n) / alpha_beta))
}

/// Voxel-wise EQD2 transform of a total-dose grid.
pub fn eqd2_distribution(dose: &Array3<f64>, fractions: u32, alpha_beta: f64) -> Array3<f64> {
    let scale = 1.0 + 2.0 / alpha_beta;
    bed_distribution(dose, fractions, alpha_beta).mapv(|b| b / scale)
}

/// Generalized equivalent uniform dose over equal-volume voxels:
/// EUD = (Σ vᵢ · Dᵢ^(1/n))^n with vᵢ = 1/N.
pub fn eud(dose_values: &[f64], volume_parameter_n: f64) -> f64 {
    if dose_values.is_empty() {
        return 0.0;
    }
    let inv_n = 1.0 / volume_parameter_n;
    let mean_pow = dose_values
        .iter()
        .map(|&d| d.max(0.0).powf(inv_n))
        .sum::<f64>()
        / dose_values.len() as f64;
    mean_pow.powf(volume_parameter_n)
}

/// Logistic tumor-control probability:
/// TCP = 1 / (1 + (D₅₀/EUD)^(4γ₅₀)).
pub fn tcp_logistic(eud_gy: f64, d50_gy: f64, gamma50: f64) -> f64 {
    if eud_gy <= 0.0 {
        return 0.0;
    }
    1.0 / (1.0 + (d50_gy / eud_gy).powf(4.0 * gamma50))
}

/// Poisson/LQ tumor-control probability:
/// TCP = exp(−N·exp(−α·BED)).
pub fn tcp_poisson(
    total_dose_gy: f64,
    fractions: u32,
    alpha: f64,
    alpha_beta: f64,
    clonogen_count: f64,
) -> f64 {
    let bed_gy = bed(total_dose_gy, fractions, alpha_beta);
    (-clonogen_count * (-alpha * bed_gy).exp()).exp()
}

/// LKB model parameters for one organ.
#[derive(Debug, Clone, Copy)]
pub struct LkbParameters {
    /// Uniform dose giving 50% complication probability.
    pub td50_gy: f64,
    /// Slope parameter m.
    pub m: f64,
    /// Volume-effect parameter n (1 = parallel, → 0 = serial).
    pub n: f64,
}

/// Lyman-Kutcher-Burman NTCP: Φ((EUD − TD50) / (m·TD50)), with the EUD
/// computed at the organ's volume parameter.
pub fn ntcp_lkb(dose_values: &[f64], params: &LkbParameters) -> f64 {
    let eud_gy = eud(dose_values, params.n);
    let t = (eud_gy - params.td50_gy) / (params.m * params.td50_gy);
    normal_cdf(t)
}
