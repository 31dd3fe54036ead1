// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — Dose Kernels
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Precomputed 3-D point-spread kernels per (family, modality, energy),
//! normalized to unit sum and cached by resolution.

use ndarray::Array3;
use rt_types::config::DoseAlgorithmKind;
use rt_types::constants::{
    ELECTRON_RANGE_MM_PER_MEV, MU_PHOTON_10MV, MU_PHOTON_6MV, MU_PHOTON_HIGH,
    PROTON_RANGE_MM_PER_MEV,
};
use rt_types::state::Modality;
use std::collections::HashMap;

/// Kernel grid edge (odd).
const KERNEL_SIZE: usize = 11;

/// AAA scatter kernel decay constant (1/mm).
const AAA_BETA_PER_MM: f64 = 0.0067;

/// Weights below this do not contribute to the support radius.
const SUPPORT_EPS: f64 = 1e-8;

/// Kernel flavor, one per deterministic dose backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelFamily {
    /// Isotropic Gaussian point-spread (collapsed-cone superposition).
    CollapsedCone,
    /// Narrow radial Gaussian, elongated along the axis (pencil beam).
    PencilBeam,
    /// Exponential scatter tails around a primary core (AAA).
    Aaa,
}

impl KernelFamily {
    pub fn for_algorithm(kind: DoseAlgorithmKind) -> Option<Self> {
        match kind {
            DoseAlgorithmKind::CollapsedCone => Some(KernelFamily::CollapsedCone),
            DoseAlgorithmKind::PencilBeam => Some(KernelFamily::PencilBeam),
            DoseAlgorithmKind::Aaa => Some(KernelFamily::Aaa),
            DoseAlgorithmKind::Acuros | DoseAlgorithmKind::MonteCarlo => None,
        }
    }
}

/// Normalized point-spread kernel on an odd cubic grid.
#[derive(Debug, Clone)]
pub struct DoseKernel {
    pub data: Array3<f64>,
    pub size: usize,
    /// Largest |offset| along any axis carrying non-negligible weight.
    pub support: usize,
}

impl DoseKernel {
    pub fn center(&self) -> usize {
        self.size / 2
    }
}

/// Linear attenuation coefficient (1/mm) for the depth term
/// exp(−μ·radiological depth).
pub fn attenuation_mu_per_mm(modality: Modality, energy: f64) -> f64 {
    match modality {
        Modality::Photon => {
            if energy <= 6.0 {
                MU_PHOTON_6MV
            } else if energy <= 10.0 {
                MU_PHOTON_10MV
            } else {
                MU_PHOTON_HIGH
            }
        }
        // Falls to 1/e at the practical range.
        Modality::Electron => 1.0 / (ELECTRON_RANGE_MM_PER_MEV * energy).max(1.0),
        // Protons carry their depth structure in the Bragg kernel.
        Modality::Proton => 5e-4,
    }
}

/// Generate the kernel for (family, modality, energy) at the given dose
/// resolution. σ values are in mm and divided by the resolution so a
/// coarser grid sees a tighter kernel in index space.
pub fn generate(
    family: KernelFamily,
    modality: Modality,
    energy: f64,
    resolution_mm: f64,
) -> DoseKernel {
    let size = KERNEL_SIZE;
    let center = (size / 2) as f64;

    let mut data = Array3::zeros((size, size, size));
    match (modality, family) {
        (Modality::Proton, _) => {
            fill_bragg(&mut data, center, energy, resolution_mm);
        }
        (_, KernelFamily::CollapsedCone) => {
            let sigma_mm = match modality {
                Modality::Photon => 0.5 + 0.1 * energy,
                Modality::Electron => 0.3 + 0.05 * energy,
                Modality::Proton => unreachable!(),
            };
            let sigma = (sigma_mm / resolution_mm).max(0.3);
            fill_gaussian(&mut data, center, sigma);
        }
        (_, KernelFamily::PencilBeam) => {
            let sigma_mm = match modality {
                Modality::Photon => 3.0 + 0.5 * energy,
                Modality::Electron => 5.0 + 0.3 * energy,
                Modality::Proton => unreachable!(),
            };
            let sigma = (sigma_mm / resolution_mm).max(0.3);
            fill_radial_gaussian(&mut data, center, sigma);
        }
        (_, KernelFamily::Aaa) => {
            fill_exponential(&mut data, center, AAA_BETA_PER_MM * resolution_mm);
        }
    }

    normalize(&mut data);
    let support = support_radius(&data, size);
    DoseKernel {
        data,
        size,
        support,
    }
}

/// Isotropic Gaussian.
fn fill_gaussian(data: &mut Array3<f64>, center: f64, sigma: f64) {
    for ((z, y, x), v) in data.indexed_iter_mut() {
        let r2 = (x as f64 - center).powi(2)
            + (y as f64 - center).powi(2)
            + (z as f64 - center).powi(2);
        *v = (-r2 / (2.0 * sigma * sigma)).exp();
    }
}

/// Gaussian in the transverse plane, uniform along the kernel axis.
fn fill_radial_gaussian(data: &mut Array3<f64>, center: f64, sigma: f64) {
    for ((_, y, x), v) in data.indexed_iter_mut() {
        let r2 = (x as f64 - center).powi(2) + (y as f64 - center).powi(2);
        *v = (-r2 / (2.0 * sigma * sigma)).exp();
    }
}

/// Exponential scatter tails, unit primary core at the center.
fn fill_exponential(data: &mut Array3<f64>, center: f64, beta_per_voxel: f64) {
    for ((z, y, x), v) in data.indexed_iter_mut() {
        let r = ((x as f64 - center).powi(2)
            + (y as f64 - center).powi(2)
            + (z as f64 - center).powi(2))
        .sqrt();
        *v = (-beta_per_voxel * r).exp();
    }
}

/// Radially Gaussian, axially a Bragg-peak profile centered at the
/// (kernel-clamped) range with ~6× amplification at the peak.
fn fill_bragg(data: &mut Array3<f64>, center: f64, energy: f64, resolution_mm: f64) {
    let range_mm = PROTON_RANGE_MM_PER_MEV * energy;
    let range = (range_mm / resolution_mm).min(center);
    let sigma_r = (0.03 * range).max(0.3);

    for ((z, y, x), v) in data.indexed_iter_mut() {
        let r2 = (x as f64 - center).powi(2) + (y as f64 - center).powi(2);
        let depth = z as f64 - center;
        if depth <= range {
            let bragg = 1.0 + 5.0 * (-20.0 * (depth - range).powi(2)).exp();
            *v = bragg * (-r2 / (2.0 * sigma_r * sigma_r)).exp();
        }
    }
}

fn normalize(data: &mut Array3<f64>) {
    let sum: f64 = data.iter().sum();
    if sum > 0.0 {
        data.mapv_inplace(|v| v / sum);
    }
}

fn support_radius(data: &Array3<f64>, size: usize) -> usize {
    let center = (size / 2) as isize;
    let mut support = 0usize;
    for ((z, y, x), &v) in data.indexed_iter() {
        if v > SUPPORT_EPS {
            let r = (x as isize - center)
                .abs()
                .max((y as isize - center).abs())
                .max((z as isize - center).abs()) as usize;
            support = support.max(r);
        }
    }
    support
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct KernelKey {
    family: KernelFamily,
    modality: Modality,
    energy_bits: u64,
    resolution_bits: u64,
}

/// Kernels computed once and cached by (family, modality, energy,
/// resolution).
#[derive(Debug, Default)]
pub struct KernelCache {
    map: HashMap<KernelKey, DoseKernel>,
}

impl KernelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(
        &mut self,
        family: KernelFamily,
        modality: Modality,
        energy: f64,
        resolution_mm: f64,
    ) -> &DoseKernel {
        let key = KernelKey {
            family,
            modality,
            energy_bits: energy.to_bits(),
            resolution_bits: resolution_mm.to_bits(),
        };
        self.map
            .entry(key)
            .or_insert_with(|| generate(family, modality, energy, resolution_mm))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
