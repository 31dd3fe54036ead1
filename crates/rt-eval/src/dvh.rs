// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — DVH Builder
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Cumulative dose-volume histograms.
//!
//! The dose axis is uniform, starts at 0 Gy and extends one bin past the
//! maximum dose. cumulative[i] is the volume fraction receiving at least
//! bins_gy[i]; it starts at 1.0, never increases, and ends at 0.0.

use rt_types::error::{PlanError, PlanResult};
use rt_types::state::{DoseGrid, Structure};

/// Bin-count ceiling: spacing is chosen so max_dose / width ≤ 2048.
const MAX_BINS: usize = 2048;

/// Cumulative DVH of one structure plus its scalar dose statistics.
#[derive(Debug, Clone)]
pub struct DvhCurve {
    pub structure: String,
    /// Dose axis (Gy), uniform from 0.
    pub bins_gy: Vec<f64>,
    /// Volume fraction receiving ≥ bins_gy[i].
    pub cumulative: Vec<f64>,
    /// Structure volume (cc).
    pub volume_cc: f64,
    voxel_volume_cc: f64,
    /// Structure dose values, ascending. Basis of the scalar metrics.
    sorted_values: Vec<f64>,
}

/// Build the cumulative DVH of `structure` over `dose`.
pub fn dvh(structure: &Structure, dose: &DoseGrid) -> PlanResult<DvhCurve> {
    dose.grid
        .check_shape(structure.mask.dim(), &format!("DVH mask '{}'", structure.name))?;

    let mut values = dose.values_in(&structure.mask);
    if values.is_empty() {
        return Err(PlanError::MissingStructure(structure.name.clone()));
    }
    values.sort_unstable_by(f64::total_cmp);

    let n = values.len();
    let max_dose = values[n - 1];
    let width = if max_dose > 0.0 {
        max_dose / MAX_BINS as f64
    } else {
        1.0
    };
    let bin_count = if max_dose > 0.0 { MAX_BINS + 2 } else { 2 };

    // Differential histogram, then cumulative-from-high.
    let mut hist = vec![0usize; bin_count];
    for &v in &values {
        let idx = ((v / width).floor() as usize).min(bin_count - 1);
        hist[idx] += 1;
    }
    let mut cumulative = vec![0.0; bin_count];
    let mut above = n;
    for i in 0..bin_count {
        cumulative[i] = above as f64 / n as f64;
        above -= hist[i];
    }

    let bins_gy: Vec<f64> = (0..bin_count).map(|i| i as f64 * width).collect();
    let voxel_volume_cc = dose.grid.voxel_volume_mm3() / 1000.0;

    Ok(DvhCurve {
        structure: structure.name.clone(),
        bins_gy,
        cumulative,
        volume_cc: n as f64 * voxel_volume_cc,
        voxel_volume_cc,
        sorted_values: values,
    })
}

impl DvhCurve {
    pub fn d_min(&self) -> f64 {
        self.sorted_values[0]
    }

    pub fn d_max(&self) -> f64 {
        self.sorted_values[self.sorted_values.len() - 1]
    }

    pub fn d_mean(&self) -> f64 {
        self.sorted_values.iter().sum::<f64>() / self.sorted_values.len() as f64
    }

    pub fn d_median(&self) -> f64 {
        self.dose_at_volume(50.0)
    }

    /// D_x: dose (Gy) received by at least x% of the volume, by inverse
    /// lookup of the cumulative curve with linear interpolation.
    pub fn dose_at_volume(&self, volume_pct: f64) -> f64 {
        let target = (volume_pct / 100.0).clamp(0.0, 1.0);
        if target >= self.cumulative[0] {
            return self.bins_gy[0];
        }
        for i in 1..self.cumulative.len() {
            if self.cumulative[i] <= target {
                let (c0, c1) = (self.cumulative[i - 1], self.cumulative[i]);
                let (d0, d1) = (self.bins_gy[i - 1], self.bins_gy[i]);
                if (c0 - c1).abs() < 1e-15 {
                    return d1;
                }
                return d0 + (d1 - d0) * (c0 - target) / (c0 - c1);
            }
        }
        self.d_max()
    }

    /// V_x: volume fraction receiving at least `dose_gy`, by forward
    /// lookup with linear interpolation.
    pub fn volume_at_dose(&self, dose_gy: f64) -> f64 {
        if dose_gy <= self.bins_gy[0] {
            return self.cumulative[0];
        }
        let last = self.bins_gy.len() - 1;
        if dose_gy >= self.bins_gy[last] {
            return self.cumulative[last];
        }
        let width = self.bins_gy[1] - self.bins_gy[0];
        let f = dose_gy / width;
        let i = (f.floor() as usize).min(last - 1);
        let t = f - i as f64;
        self.cumulative[i] * (1.0 - t) + self.cumulative[i + 1] * t
    }

    /// Absolute-volume lookup: dose received by the hottest 2 cc.
    pub fn d2cc(&self) -> f64 {
        self.dose_at_absolute_volume(2.0)
    }

    /// Dose received by the hottest `volume_cc` of the structure.
    pub fn dose_at_absolute_volume(&self, volume_cc: f64) -> f64 {
        let n = self.sorted_values.len();
        let k = (volume_cc / self.voxel_volume_cc).floor() as usize;
        if k == 0 {
            return self.d_max();
        }
        if k >= n {
            return self.d_min();
        }
        self.sorted_values[n - k]
    }

    /// The standard D-metric table: D1, D2, D5 … D99.
    pub fn d_metrics(&self) -> Vec<(u8, f64)> {
        [1u8, 2, 5, 10, 20, 50, 80, 90, 95, 98, 99]
            .iter()
            .map(|&x| (x, self.dose_at_volume(x as f64)))
            .collect()
    }

    /// The standard V-metric table: V5 … V95 (fractions).
    pub fn v_metrics(&self) -> Vec<(u8, f64)> {
        [5u8, 10, 20, 30, 40, 50, 60, 70, 80, 90, 95]
            .iter()
            .map(|&x| (x, self.volume_at_dose(x as f64)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use rt_types::state::{Grid3, StructureRole};

    fn uniform_case(n_voxels_edge: usize, dose_gy: f64) -> (Structure, DoseGrid) {
        let grid = Grid3::centered(n_voxels_edge, n_voxels_edge, n_voxels_edge, [2.0, 2.0, 2.0]);
        let mask = Array3::from_elem(grid.shape(), true);
        let mut dose = DoseGrid::zeros(&grid).unwrap();
        dose.data.fill(dose_gy);
        (
            Structure {
                name: "PTV".into(),
                role: StructureRole::Ptv,
                color: [255, 0, 0],
                mask,
            },
            dose,
        )
    }

    #[test]
    fn test_invariants_uniform_dose() {
        let (structure, dose) = uniform_case(10, 70.0);
        let curve = dvh(&structure, &dose).unwrap();

        assert!((curve.cumulative[0] - 1.0).abs() < 1e-12);
        for pair in curve.cumulative.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-12, "cumulative increased");
        }
        assert_eq!(*curve.cumulative.last().unwrap(), 0.0);
        assert!((curve.bins_gy[0]).abs() < 1e-12);
    }

    #[test]
    fn test_uniform_70gy_endpoints() {
        let (structure, dose) = uniform_case(10, 70.0);
        let curve = dvh(&structure, &dose).unwrap();

        assert!((curve.d_min() - 70.0).abs() < 1e-9);
        assert!((curve.d_max() - 70.0).abs() < 1e-9);
        assert!((curve.d_mean() - 70.0).abs() < 1e-9);
        // Cumulative is 1.0 up to 70 Gy and 0.0 beyond.
        assert!((curve.volume_at_dose(35.0) - 1.0).abs() < 1e-9);
        assert!((curve.volume_at_dose(69.9) - 1.0).abs() < 0.01);
        assert_eq!(curve.volume_at_dose(75.0), 0.0);
        // D2 and D98 collapse onto 70 Gy.
        let width = curve.bins_gy[1] - curve.bins_gy[0];
        assert!((curve.dose_at_volume(2.0) - 70.0).abs() <= width + 1e-9);
        assert!((curve.dose_at_volume(98.0) - 70.0).abs() <= width + 1e-9);
    }

    #[test]
    fn test_zero_dose_structure() {
        let (structure, dose) = uniform_case(6, 0.0);
        let curve = dvh(&structure, &dose).unwrap();
        assert!((curve.cumulative[0] - 1.0).abs() < 1e-12);
        assert_eq!(*curve.cumulative.last().unwrap(), 0.0);
        assert_eq!(curve.d_max(), 0.0);
    }

    #[test]
    fn test_gradient_dose_quartiles() {
        // 100 voxels at doses 1..=100: D_x ≈ (100 − x).
        let grid = Grid3::new(100, 1, 1, [10.0, 10.0, 10.0], [0.0, 0.0, 0.0]);
        let mask = Array3::from_elem(grid.shape(), true);
        let mut dose = DoseGrid::zeros(&grid).unwrap();
        for (i, v) in dose.data.iter_mut().enumerate() {
            *v = (i + 1) as f64;
        }
        let structure = Structure {
            name: "ladder".into(),
            role: StructureRole::Other,
            color: [0, 0, 0],
            mask,
        };
        let curve = dvh(&structure, &dose).unwrap();

        assert!((curve.dose_at_volume(50.0) - 50.0).abs() < 1.5);
        assert!((curve.dose_at_volume(90.0) - 10.0).abs() < 1.5);
        assert!((curve.volume_at_dose(50.0) - 0.5).abs() < 0.02);
        assert!((curve.volume_at_dose(90.0) - 0.1).abs() < 0.02);
    }

    #[test]
    fn test_d2cc_picks_hot_region() {
        // Voxel volume 1 cc (10 mm cube); 2 cc = 2 voxels.
        let grid = Grid3::new(10, 1, 1, [10.0, 10.0, 10.0], [0.0, 0.0, 0.0]);
        let mask = Array3::from_elem(grid.shape(), true);
        let mut dose = DoseGrid::zeros(&grid).unwrap();
        for (i, v) in dose.data.iter_mut().enumerate() {
            *v = 10.0 * (i + 1) as f64; // 10..=100
        }
        let structure = Structure {
            name: "oar".into(),
            role: StructureRole::Oar,
            color: [0, 0, 0],
            mask,
        };
        let curve = dvh(&structure, &dose).unwrap();
        // The hottest 2 voxels receive 90 and 100 Gy.
        assert!((curve.d2cc() - 90.0).abs() < 1e-9);
        assert!((curve.volume_cc - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_mask_is_missing_structure() {
        let grid = Grid3::centered(4, 4, 4, [2.0, 2.0, 2.0]);
        let dose = DoseGrid::zeros(&grid).unwrap();
        let structure = Structure {
            name: "empty".into(),
            role: StructureRole::Other,
            color: [0, 0, 0],
            mask: Array3::from_elem(grid.shape(), false),
        };
        assert!(matches!(
            dvh(&structure, &dose),
            Err(PlanError::MissingStructure(_))
        ));
    }

    #[test]
    fn test_bin_count_capped() {
        let (structure, dose) = uniform_case(6, 123.4);
        let curve = dvh(&structure, &dose).unwrap();
        assert!(curve.bins_gy.len() <= MAX_BINS + 2);
        let width = curve.bins_gy[1] - curve.bins_gy[0];
        assert!(curve.d_max() / width <= MAX_BINS as f64 + 1e-9);
    }
}
