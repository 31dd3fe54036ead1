// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — Plan Bundle
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Plan-bundle persistence: metadata + weights as JSON, the final dose
//! grid as float32 `.npy`.

use ndarray::Array3;
use ndarray_npy::{read_npy, write_npy};
use rt_types::error::{PlanError, PlanResult};
use rt_types::state::{DoseGrid, Grid3, Plan, StructureSet};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

const METADATA_FILE: &str = "plan.json";
const DOSE_FILE: &str = "dose.npy";

/// Everything about a finished plan except the dose voxels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub plan: Plan,
    pub dose_grid: Grid3,
    /// Final weight vector, one entry per control point.
    pub weights: Vec<f64>,
    /// Names of the structure set the plan was evaluated against.
    pub structure_names: Vec<String>,
    pub created_unix_s: u64,
}

/// Write a plan bundle into `dir` (created if missing).
pub fn save_bundle(
    dir: &Path,
    plan: &Plan,
    dose: &DoseGrid,
    weights: &[f64],
    structures: &StructureSet,
) -> PlanResult<()> {
    std::fs::create_dir_all(dir)?;

    let metadata = BundleMetadata {
        plan: plan.clone(),
        dose_grid: dose.grid.clone(),
        weights: weights.to_vec(),
        structure_names: structures.iter().map(|s| s.name.clone()).collect(),
        created_unix_s: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    };
    let json = serde_json::to_string_pretty(&metadata)?;
    std::fs::write(dir.join(METADATA_FILE), json)?;

    let dose_f32: Array3<f32> = dose.data.mapv(|v| v as f32);
    write_npy(dir.join(DOSE_FILE), &dose_f32)
        .map_err(|e| PlanError::ConfigError(format!("dose grid write failed: {e}")))?;
    Ok(())
}

pub fn load_metadata(dir: &Path) -> PlanResult<BundleMetadata> {
    let contents = std::fs::read_to_string(dir.join(METADATA_FILE))?;
    Ok(serde_json::from_str(&contents)?)
}

pub fn load_dose(dir: &Path) -> PlanResult<Array3<f32>> {
    read_npy(dir.join(DOSE_FILE))
        .map_err(|e| PlanError::ConfigError(format!("dose grid read failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_types::state::{Beam, Modality, Prescription, Technique};

    fn temp_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "rt-bundle-{tag}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_bundle_roundtrip() {
        let grid = Grid3::centered(6, 6, 6, [2.0, 2.0, 2.0]);
        let mut dose = DoseGrid::zeros(&grid).unwrap();
        dose.data[[3, 3, 3]] = 2.5;

        let mut plan = Plan::new("bundle-test", Technique::ThreeDCrt, Prescription::new(2.0, 1));
        plan.beams.push(Beam::new("AP", Modality::Photon, 6.0));
        let structures = StructureSet::new(grid.clone());
        let weights = vec![1.0];

        let dir = temp_dir("roundtrip");
        save_bundle(&dir, &plan, &dose, &weights, &structures).unwrap();

        let metadata = load_metadata(&dir).unwrap();
        assert_eq!(metadata.plan.id, "bundle-test");
        assert_eq!(metadata.weights, weights);
        assert_eq!(metadata.dose_grid, grid);
        assert!(metadata.created_unix_s > 0);

        let loaded = load_dose(&dir).unwrap();
        assert_eq!(loaded.dim(), grid.shape());
        assert!((loaded[[3, 3, 3]] - 2.5).abs() < 1e-6);
        assert_eq!(loaded[[0, 0, 0]], 0.0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_bundle_is_io_error() {
        let dir = temp_dir("missing");
        assert!(matches!(
            load_metadata(&dir),
            Err(PlanError::Io(_))
        ));
    }
}
