// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — Plan Metrics
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Scalar plan-quality indices: conformity, homogeneity, gradient and
//! hot/cold-spot detection.

use crate::dvh::DvhCurve;
use ndarray::Array3;
use rt_types::state::DoseGrid;
use tracing::warn;

/// Hot spots are voxels above this fraction of the prescription.
const HOT_SPOT_FRACTION: f64 = 1.07;

/// Cold spots are target voxels below this fraction of the prescription.
const COLD_SPOT_FRACTION: f64 = 0.95;

/// Location and dose of an extreme voxel plus the size of its region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DoseSpot {
    /// Voxel index (x, y, z).
    pub voxel: (usize, usize, usize),
    pub dose_gy: f64,
    /// Number of voxels past the spot threshold.
    pub region_voxels: usize,
}

/// Simple conformity index: V_ref / V_PTV, the volume receiving at
/// least the prescription over the target volume.
pub fn conformity_index(dose: &DoseGrid, target: &Array3<bool>, prescribed_gy: f64) -> f64 {
    let target_volume = target.iter().filter(|&&m| m).count();
    if target_volume == 0 {
        warn!("conformity index undefined for an empty target");
        return 0.0;
    }
    let reference_volume = dose.data.iter().filter(|&&d| d >= prescribed_gy).count();
    reference_volume as f64 / target_volume as f64
}

/// Paddick conformity index TV_PIV² / (TV · PIV). In [0, 1], equal to 1
/// exactly when the prescription isodose coincides with the target.
pub fn paddick_conformity_index(
    dose: &DoseGrid,
    target: &Array3<bool>,
    prescribed_gy: f64,
) -> f64 {
    let tv = target.iter().filter(|&&m| m).count() as f64;
    let piv = dose.data.iter().filter(|&&d| d >= prescribed_gy).count() as f64;
    let tv_piv = dose
        .data
        .iter()
        .zip(target.iter())
        .filter(|(&d, &m)| m && d >= prescribed_gy)
        .count() as f64;
    if tv <= 0.0 || piv <= 0.0 {
        warn!("Paddick CI undefined: empty target or empty prescription isodose");
        return 0.0;
    }
    (tv_piv * tv_piv) / (tv * piv)
}

/// Homogeneity index (D2 − D98) / D50 from the target DVH.
pub fn homogeneity_index(target_dvh: &DvhCurve) -> f64 {
    let d2 = target_dvh.dose_at_volume(2.0);
    let d98 = target_dvh.dose_at_volume(98.0);
    let d50 = target_dvh.dose_at_volume(50.0);
    if d50 <= 0.0 {
        warn!(structure = %target_dvh.structure, "D50 is zero; homogeneity index undefined");
        return 0.0;
    }
    (d2 - d98) / d50
}

/// Gradient index V_50% / V_100% over the whole dose grid.
pub fn gradient_index(dose: &DoseGrid, prescribed_gy: f64) -> f64 {
    let v100 = dose.data.iter().filter(|&&d| d >= prescribed_gy).count();
    if v100 == 0 {
        warn!("gradient index undefined: nothing receives the prescription");
        return 0.0;
    }
    let v50 = dose
        .data
        .iter()
        .filter(|&&d| d >= 0.5 * prescribed_gy)
        .count();
    v50 as f64 / v100 as f64
}

/// Fraction of the target receiving at least `fraction` of the
/// prescription (target coverage, e.g. V95).
pub fn target_coverage(
    dose: &DoseGrid,
    target: &Array3<bool>,
    prescribed_gy: f64,
    fraction: f64,
) -> f64 {
    let threshold = fraction * prescribed_gy;
    let mut covered = 0usize;
    let mut total = 0usize;
    for (&d, &m) in dose.data.iter().zip(target.iter()) {
        if m {
            total += 1;
            if d >= threshold {
                covered += 1;
            }
        }
    }
    if total == 0 {
        0.0
    } else {
        covered as f64 / total as f64
    }
}

/// Hottest voxel anywhere in the grid, with the count of voxels above
/// 107% of prescription.
pub fn hot_spot(dose: &DoseGrid, prescribed_gy: f64) -> Option<DoseSpot> {
    let mut best: Option<((usize, usize, usize), f64)> = None;
    let mut region = 0usize;
    let threshold = HOT_SPOT_FRACTION * prescribed_gy;
    for ((z, y, x), &d) in dose.data.indexed_iter() {
        if d > threshold {
            region += 1;
        }
        if best.map_or(true, |(_, b)| d > b) {
            best = Some(((x, y, z), d));
        }
    }
    best.map(|(voxel, dose_gy)| DoseSpot {
        voxel,
        dose_gy,
        region_voxels: region,
    })
}

/// Coldest voxel inside the target, with the count of target voxels
/// below 95% of prescription.
pub fn cold_spot(dose: &DoseGrid, target: &Array3<bool>, prescribed_gy: f64) -> Option<DoseSpot> {
    let threshold = COLD_SPOT_FRACTION * prescribed_gy;
    let mut best: Option<((usize, usize, usize), f64)> = None;
    let mut region = 0usize;
    for (((z, y, x), &d), &m) in dose.data.indexed_iter().zip(target.iter()) {
        if !m {
            continue;
        }
        if d < threshold {
            region += 1;
        }
        if best.map_or(true, |(_, b)| d < b) {
            best = Some(((x, y, z), d));
        }
    }
    best.map(|(voxel, dose_gy)| DoseSpot {
        voxel,
        dose_gy,
        region_voxels: region,
    })
}
