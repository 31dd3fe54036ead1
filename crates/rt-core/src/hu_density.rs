// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — HU → Electron Density
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Calibration table mapping Hounsfield units to relative electron
//! density. Linear between anchors, clamped outside, O(log N) per call.

use rt_math::interp::lerp_table;
use rt_types::error::{PlanError, PlanResult};
use rt_types::state::{CtVolume, DensityVolume};

/// Default anchors: air, lung, fat, water, soft tissue, bone, metal.
const DEFAULT_ANCHORS: [(f64, f64); 9] = [
    (-1000.0, 0.001),
    (-950.0, 0.001),
    (-700.0, 0.25),
    (-100.0, 0.9),
    (0.0, 1.0),
    (50.0, 1.05),
    (300.0, 1.5),
    (1000.0, 2.0),
    (3000.0, 3.0),
];

/// Sorted (HU, ρ_e) anchor table.
#[derive(Debug, Clone)]
pub struct HuDensityTable {
    anchors: Vec<(f64, f64)>,
}

impl Default for HuDensityTable {
    fn default() -> Self {
        HuDensityTable {
            anchors: DEFAULT_ANCHORS.to_vec(),
        }
    }
}

impl HuDensityTable {
    /// Build from explicit anchors. Sorted by HU; the density column must
    /// be non-negative and non-decreasing so conversion stays monotone.
    pub fn new(mut anchors: Vec<(f64, f64)>) -> PlanResult<Self> {
        if anchors.is_empty() {
            return Err(PlanError::ConfigError(
                "HU → density table has no anchors".to_string(),
            ));
        }
        anchors.sort_by(|a, b| a.0.total_cmp(&b.0));
        for pair in anchors.windows(2) {
            if pair[1].1 < pair[0].1 {
                return Err(PlanError::ConfigError(format!(
                    "HU → density table not monotone at HU {}",
                    pair[1].0
                )));
            }
        }
        if anchors[0].1 < 0.0 {
            return Err(PlanError::ConfigError(
                "electron density must be >= 0".to_string(),
            ));
        }
        Ok(HuDensityTable { anchors })
    }

    /// Load a two-column text file: `HU density` per line, `#` comments
    /// and blank lines ignored.
    pub fn from_file(path: &str) -> PlanResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut anchors = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let hu = fields.next().and_then(|t| t.parse::<f64>().ok());
            let density = fields.next().and_then(|t| t.parse::<f64>().ok());
            match (hu, density) {
                (Some(hu), Some(density)) => anchors.push((hu, density)),
                _ => {
                    return Err(PlanError::ConfigError(format!(
                        "{path}:{}: expected 'HU density', got '{line}'",
                        lineno + 1
                    )))
                }
            }
        }
        Self::new(anchors)
    }

    /// Relative electron density for one HU value. Pure and monotone
    /// non-decreasing.
    pub fn convert(&self, hu: f64) -> f64 {
        lerp_table(&self.anchors, hu)
    }

    /// Convert a whole CT volume.
    pub fn convert_volume(&self, ct: &CtVolume) -> DensityVolume {
        let data = ct.data.mapv(|hu| self.convert(hu as f64));
        DensityVolume {
            grid: ct.grid.clone(),
            data,
        }
    }

    pub fn anchors(&self) -> &[(f64, f64)] {
        &self.anchors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn root_path(relative: &str) -> String {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join(relative)
            .to_string_lossy()
            .to_string()
    }

    #[test]
    fn test_default_table_known_materials() {
        let table = HuDensityTable::default();
        assert!((table.convert(0.0) - 1.0).abs() < 1e-12, "water");
        assert!((table.convert(-700.0) - 0.25).abs() < 1e-12, "lung");
        assert!((table.convert(300.0) - 1.5).abs() < 1e-12, "bone");
    }

    #[test]
    fn test_convert_clamps_outside_table() {
        let table = HuDensityTable::default();
        assert!((table.convert(-5000.0) - 0.001).abs() < 1e-12);
        assert!((table.convert(10000.0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_convert_interpolates_between_anchors() {
        let table = HuDensityTable::default();
        // Halfway between water (0, 1.0) and soft tissue (50, 1.05)
        assert!((table.convert(25.0) - 1.025).abs() < 1e-12);
    }

    #[test]
    fn test_monotone_over_clinical_range() {
        let table = HuDensityTable::default();
        let mut last = f64::NEG_INFINITY;
        let mut hu = -1100.0;
        while hu <= 3100.0 {
            let d = table.convert(hu);
            assert!(d >= last, "density decreased at HU {hu}");
            last = d;
            hu += 7.0;
        }
    }

    #[test]
    fn test_rejects_non_monotone_table() {
        let result = HuDensityTable::new(vec![(0.0, 1.0), (100.0, 0.5)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_anchor_file() {
        let table = HuDensityTable::from_file(&root_path("data/hu_density.txt")).unwrap();
        assert_eq!(table.anchors().len(), 9);
        assert!((table.convert(-700.0) - 0.25).abs() < 1e-12);
        assert!((table.convert(0.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_convert_volume_uniform_water() {
        let ct = CtVolume::uniform(8, 8, 8, [2.0, 2.0, 2.0], 0);
        let table = HuDensityTable::default();
        let density = table.convert_volume(&ct);
        assert!(density.data.iter().all(|&d| (d - 1.0).abs() < 1e-12));
    }
}
