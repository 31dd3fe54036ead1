// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — Acuros Backend
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Deterministic transport backend with discrete material classes.
//!
//! Voxels are binned into {air, lung, soft tissue, bone, metal} by
//! relative electron density; primary fluence attenuates through the
//! per-material cross-sections along the beam axis and converts to dose
//! with a per-material factor.

use crate::aperture::{wedge_factor, Aperture, BeamFrame};
use ndarray::Array3;
use rayon::prelude::*;
use rt_math::geometry::sub;
use rt_types::state::{Beam, Grid3};

/// Density class boundaries (relative electron density). These follow
/// the HU bands −1000/−400/200/1200 through the default calibration.
const CLASS_BOUNDS: [f64; 4] = [0.05, 0.575, 1.32, 2.1];

/// Linear attenuation (1/mm) per material class.
const CLASS_MU_PER_MM: [f64; 5] = [0.0, 0.0005, 0.003, 0.015, 0.05];

/// Fluence → dose conversion per material class.
const CLASS_DOSE_CONVERSION: [f64; 5] = [0.0, 0.8, 1.0, 1.1, 0.9];

fn material_class(density: f64) -> usize {
    CLASS_BOUNDS.iter().position(|&b| density < b).unwrap_or(4)
}

/// Per-voxel attenuation and fluence → dose conversion fields for a
/// density volume. Computed once per calculation.
pub fn material_fields(density: &Array3<f64>) -> (Array3<f64>, Array3<f64>) {
    let mu = density.mapv(|d| CLASS_MU_PER_MM[material_class(d)]);
    let conversion = density.mapv(|d| CLASS_DOSE_CONVERSION[material_class(d)]);
    (mu, conversion)
}

/// Dose contribution of one control point: attenuated primary fluence
/// times the material conversion factor, inside the aperture.
///
/// `mu_depth` is the line integral of the per-material attenuation from
/// the source to each voxel (same ray march as the radiological depth).
#[allow(clippy::too_many_arguments)]
pub fn control_point_dose(
    conversion: &Array3<f64>,
    mu_depth: &Array3<f64>,
    grid: &Grid3,
    frame: &BeamFrame,
    aperture: &Aperture,
    beam: &Beam,
    weight: f64,
) -> Array3<f64> {
    let n = grid.voxel_count();
    let (nx, ny) = (grid.nx, grid.ny);
    let ssd = beam.ssd_mm;
    let iso = beam.isocenter_mm;
    let energy = beam.energy;

    let values: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|flat| {
            let x = flat % nx;
            let y = (flat / nx) % ny;
            let z = flat / (nx * ny);

            let rel = sub(grid.position(x, y, z), iso);
            let (forward, pu, pw) = frame.project(rel);
            if forward <= -ssd {
                return 0.0;
            }
            if !aperture.contains(pu, pw) {
                return 0.0;
            }

            let fluence = energy * (-mu_depth[[z, y, x]]).exp();
            let inverse_square = (ssd / (ssd + forward)).powi(2);
            let mut value = fluence * conversion[[z, y, x]] * inverse_square * weight;
            if let Some(wedge) = &beam.wedge {
                value *= wedge_factor(wedge, rel);
            }
            value
        })
        .collect();

    Array3::from_shape_vec(grid.shape(), values).expect("voxel count matches grid shape")
}
