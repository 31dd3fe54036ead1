// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — State
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Volumetric patient model and plan data model.
//!
//! All volumetric fields live on a [`Grid3`] and are stored as contiguous
//! C-order `Array3` indexed `[z, y, x]`, so the flat offset of voxel
//! (x, y, z) is `z·ny·nx + y·nx + x`.

use crate::error::{PlanError, PlanResult};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Angular spacing (deg) between generated arc control points.
const ARC_CP_SPACING_DEG: f64 = 2.0;

/// Regular 3-D voxel grid: dimensions, spacing and patient-space origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid3 {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    /// Voxel spacing (sx, sy, sz) in mm. Strictly positive.
    pub spacing: [f64; 3],
    /// Patient-space position (mm) of voxel (0, 0, 0).
    pub origin: [f64; 3],
}

impl Grid3 {
    pub fn new(nx: usize, ny: usize, nz: usize, spacing: [f64; 3], origin: [f64; 3]) -> Self {
        Grid3 {
            nx,
            ny,
            nz,
            spacing,
            origin,
        }
    }

    /// Grid with its geometric center at the patient-space origin.
    /// The standard phantom layout used across the test suites.
    pub fn centered(nx: usize, ny: usize, nz: usize, spacing: [f64; 3]) -> Self {
        let origin = [
            -0.5 * (nx as f64 - 1.0) * spacing[0],
            -0.5 * (ny as f64 - 1.0) * spacing[1],
            -0.5 * (nz as f64 - 1.0) * spacing[2],
        ];
        Grid3::new(nx, ny, nz, spacing, origin)
    }

    /// Shape in `Array3` axis order `[z, y, x]`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.nz, self.ny, self.nx)
    }

    pub fn voxel_count(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    pub fn voxel_volume_mm3(&self) -> f64 {
        self.spacing[0] * self.spacing[1] * self.spacing[2]
    }

    pub fn min_spacing(&self) -> f64 {
        self.spacing[0].min(self.spacing[1]).min(self.spacing[2])
    }

    /// Patient-space position (mm) of voxel (x, y, z).
    pub fn position(&self, x: usize, y: usize, z: usize) -> [f64; 3] {
        [
            self.origin[0] + x as f64 * self.spacing[0],
            self.origin[1] + y as f64 * self.spacing[1],
            self.origin[2] + z as f64 * self.spacing[2],
        ]
    }

    /// Voxel index containing the patient-space point, if inside the grid.
    pub fn voxel_at(&self, p: [f64; 3]) -> Option<(usize, usize, usize)> {
        let fx = (p[0] - self.origin[0]) / self.spacing[0];
        let fy = (p[1] - self.origin[1]) / self.spacing[1];
        let fz = (p[2] - self.origin[2]) / self.spacing[2];
        if fx < -0.5 || fy < -0.5 || fz < -0.5 {
            return None;
        }
        let (x, y, z) = (
            fx.round() as usize,
            fy.round() as usize,
            fz.round() as usize,
        );
        if x < self.nx && y < self.ny && z < self.nz {
            Some((x, y, z))
        } else {
            None
        }
    }

    pub fn same_geometry(&self, other: &Grid3) -> bool {
        self.nx == other.nx
            && self.ny == other.ny
            && self.nz == other.nz
            && self
                .spacing
                .iter()
                .zip(other.spacing.iter())
                .all(|(a, b)| (a - b).abs() < 1e-9)
    }

    /// Check that `dim` matches this grid, reporting `context` on mismatch.
    pub fn check_shape(&self, dim: (usize, usize, usize), context: &str) -> PlanResult<()> {
        if dim != self.shape() {
            return Err(PlanError::InvalidGeometry {
                context: context.to_string(),
                expected: self.shape(),
                actual: dim,
            });
        }
        Ok(())
    }
}

/// CT image: Hounsfield units on a regular grid.
#[derive(Debug, Clone)]
pub struct CtVolume {
    pub grid: Grid3,
    pub data: Array3<i16>,
}

impl CtVolume {
    pub fn new(grid: Grid3, data: Array3<i16>) -> PlanResult<Self> {
        grid.check_shape(data.dim(), "CT volume")?;
        Ok(CtVolume { grid, data })
    }

    /// Uniform-HU phantom, grid centered on the origin.
    pub fn uniform(nx: usize, ny: usize, nz: usize, spacing: [f64; 3], hu: i16) -> Self {
        let grid = Grid3::centered(nx, ny, nz, spacing);
        let data = Array3::from_elem(grid.shape(), hu);
        CtVolume { grid, data }
    }
}

/// Relative electron density (water = 1.0) on the CT grid.
#[derive(Debug, Clone)]
pub struct DensityVolume {
    pub grid: Grid3,
    pub data: Array3<f64>,
}

impl DensityVolume {
    pub fn new(grid: Grid3, data: Array3<f64>) -> PlanResult<Self> {
        grid.check_shape(data.dim(), "density volume")?;
        Ok(DensityVolume { grid, data })
    }
}

/// Absorbed dose (Gy) on the dose grid. Created zero-filled, accumulated
/// into by the dose engine, immutable once a plan is finalized.
#[derive(Debug, Clone)]
pub struct DoseGrid {
    pub grid: Grid3,
    pub data: Array3<f64>,
}

impl DoseGrid {
    /// Allocate a zero-filled dose grid, surfacing allocation failure
    /// instead of aborting.
    pub fn zeros(grid: &Grid3) -> PlanResult<Self> {
        let n = grid.voxel_count();
        let mut buf: Vec<f64> = Vec::new();
        buf.try_reserve_exact(n).map_err(|_| {
            PlanError::ResourceExhausted(format!("dose grid of {n} voxels"))
        })?;
        buf.resize(n, 0.0);
        let data = Array3::from_shape_vec(grid.shape(), buf)
            .expect("shape/voxel count agree by construction");
        Ok(DoseGrid {
            grid: grid.clone(),
            data,
        })
    }

    pub fn max_value(&self) -> f64 {
        self.data.iter().cloned().fold(0.0_f64, f64::max)
    }

    /// Mean dose over the voxels selected by `mask`, or `None` for an
    /// empty mask.
    pub fn mean_in(&self, mask: &Array3<bool>) -> Option<f64> {
        let mut sum = 0.0;
        let mut count = 0usize;
        for (d, &m) in self.data.iter().zip(mask.iter()) {
            if m {
                sum += d;
                count += 1;
            }
        }
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }

    /// Dose values (Gy) at voxels inside `mask`, in flat scan order.
    pub fn values_in(&self, mask: &Array3<bool>) -> Vec<f64> {
        self.data
            .iter()
            .zip(mask.iter())
            .filter_map(|(&d, &m)| if m { Some(d) } else { None })
            .collect()
    }

    pub fn scale(&mut self, factor: f64) {
        self.data.mapv_inplace(|v| v * factor);
    }

    /// Fail with `NumericFailure` if any voxel is NaN or infinite.
    pub fn check_finite(&self, context: &str) -> PlanResult<()> {
        if self.data.iter().any(|v| !v.is_finite()) {
            return Err(PlanError::NumericFailure {
                context: context.to_string(),
                message: "NaN or Inf in dose grid".to_string(),
            });
        }
        Ok(())
    }
}

/// Clinical role of a delineated structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureRole {
    Ptv,
    Oar,
    Other,
}

/// Named binary mask co-registered with the dose grid.
#[derive(Debug, Clone)]
pub struct Structure {
    pub name: String,
    pub role: StructureRole,
    /// Display color (RGB).
    pub color: [u8; 3],
    pub mask: Array3<bool>,
}

impl Structure {
    pub fn voxel_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    pub fn volume_cc(&self, grid: &Grid3) -> f64 {
        self.voxel_count() as f64 * grid.voxel_volume_mm3() / 1000.0
    }
}

/// Structure set with a name → index table so hot loops never compare
/// strings.
#[derive(Debug, Clone)]
pub struct StructureSet {
    pub grid: Grid3,
    structures: Vec<Structure>,
    index: HashMap<String, usize>,
}

impl StructureSet {
    pub fn new(grid: Grid3) -> Self {
        StructureSet {
            grid,
            structures: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Add a structure. Exactly one mask per name; the mask must match
    /// the set's grid.
    pub fn add(&mut self, structure: Structure) -> PlanResult<()> {
        self.grid
            .check_shape(structure.mask.dim(), &format!("mask '{}'", structure.name))?;
        if self.index.contains_key(&structure.name) {
            return Err(PlanError::ConfigError(format!(
                "duplicate structure name '{}'",
                structure.name
            )));
        }
        self.index
            .insert(structure.name.clone(), self.structures.len());
        self.structures.push(structure);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Structure> {
        self.index.get(name).map(|&i| &self.structures[i])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn by_index(&self, i: usize) -> &Structure {
        &self.structures[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Structure> {
        self.structures.iter()
    }

    pub fn len(&self) -> usize {
        self.structures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    /// The normalization target: first structure with the PTV role, else
    /// a structure literally named "PTV" (case-insensitive).
    pub fn ptv(&self) -> Option<&Structure> {
        self.structures
            .iter()
            .find(|s| s.role == StructureRole::Ptv)
            .or_else(|| {
                self.structures
                    .iter()
                    .find(|s| s.name.eq_ignore_ascii_case("ptv"))
            })
    }
}

/// Radiation modality of a beam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Photon,
    Electron,
    Proton,
}

/// Physical or virtual wedge filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WedgeFilter {
    pub angle_deg: f64,
    pub orientation_deg: f64,
}

/// Arc sweep parameters for rotational delivery.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArcSweep {
    pub start_deg: f64,
    pub stop_deg: f64,
    /// +1 clockwise, −1 counter-clockwise.
    pub direction: i8,
}

impl ArcSweep {
    /// Signed gantry sweep (deg) from start to stop following `direction`.
    /// A zero-length arc has zero sweep regardless of direction.
    pub fn signed_sweep(&self) -> f64 {
        if (self.start_deg - self.stop_deg).abs() < 1e-12 {
            return 0.0;
        }
        let cw = (self.stop_deg - self.start_deg).rem_euclid(360.0);
        if self.direction >= 0 {
            cw
        } else {
            cw - 360.0
        }
    }

    /// Number of generated control points: one every 2° of sweep, at
    /// least two for a real arc, exactly one when start = stop.
    pub fn control_point_count(&self) -> usize {
        let sweep = self.signed_sweep().abs();
        if sweep == 0.0 {
            1
        } else {
            ((sweep / ARC_CP_SPACING_DEG).ceil() as usize).max(2)
        }
    }
}

/// Jaw window in the beam's-eye-view (u, w) frame: u ∈ [x1, x2],
/// w ∈ [y1, y2], all mm at isocenter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JawWindow {
    pub x1: f64,
    pub x2: f64,
    pub y1: f64,
    pub y2: f64,
}

impl JawWindow {
    pub fn symmetric(width_mm: f64, height_mm: f64) -> Self {
        JawWindow {
            x1: -width_mm / 2.0,
            x2: width_mm / 2.0,
            y1: -height_mm / 2.0,
            y2: height_mm / 2.0,
        }
    }

    pub fn contains(&self, u: f64, w: f64) -> bool {
        u >= self.x1 && u <= self.x2 && w >= self.y1 && w <= self.y2
    }
}

/// Snapshot of machine state along a beam: gantry angle, MLC bank, jaws
/// and monitor-unit fraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    pub gantry_deg: f64,
    /// Leaf pairs as (left, right) edges in mm, ordered along w. Empty
    /// means an open rectangular field of the beam's `field_size_mm`.
    pub mlc: Vec<[f64; 2]>,
    pub jaws: Option<JawWindow>,
    /// Monitor-unit fraction, ≥ 0.
    pub weight: f64,
}

impl ControlPoint {
    pub fn open(gantry_deg: f64, weight: f64) -> Self {
        ControlPoint {
            gantry_deg,
            mlc: Vec::new(),
            jaws: None,
            weight,
        }
    }
}

/// Immutable configuration of one external radiation field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beam {
    pub id: String,
    pub modality: Modality,
    /// Nominal energy: MV for photons, MeV for electrons/protons.
    pub energy: f64,
    pub isocenter_mm: [f64; 3],
    pub gantry_deg: f64,
    pub collimator_deg: f64,
    pub couch_deg: f64,
    pub ssd_mm: f64,
    /// Open-field (width, height) in mm used when no MLC bank is present.
    pub field_size_mm: [f64; 2],
    pub wedge: Option<WedgeFilter>,
    pub arc: Option<ArcSweep>,
    pub control_points: Vec<ControlPoint>,
}

impl Beam {
    pub fn new(id: impl Into<String>, modality: Modality, energy: f64) -> Self {
        Beam {
            id: id.into(),
            modality,
            energy,
            isocenter_mm: [0.0, 0.0, 0.0],
            gantry_deg: 0.0,
            collimator_deg: 0.0,
            couch_deg: 0.0,
            ssd_mm: crate::constants::DEFAULT_SSD_MM,
            field_size_mm: [
                crate::constants::DEFAULT_FIELD_SIZE_MM,
                crate::constants::DEFAULT_FIELD_SIZE_MM,
            ],
            wedge: None,
            arc: None,
            control_points: Vec::new(),
        }
    }

    /// Number of control points the engine will iterate, without
    /// materializing them.
    pub fn control_point_count(&self) -> usize {
        if !self.control_points.is_empty() {
            self.control_points.len()
        } else if let Some(arc) = &self.arc {
            arc.control_point_count()
        } else {
            1
        }
    }

    /// The control points actually delivered. An explicit list wins;
    /// otherwise arcs expand to one point every 2° of sweep and static
    /// beams collapse to a single open field.
    pub fn resolved_control_points(&self) -> Vec<ControlPoint> {
        if !self.control_points.is_empty() {
            return self.control_points.clone();
        }
        if let Some(arc) = &self.arc {
            let n = arc.control_point_count();
            if n == 1 {
                return vec![ControlPoint::open(arc.start_deg.rem_euclid(360.0), 1.0)];
            }
            let sweep = arc.signed_sweep();
            return (0..n)
                .map(|i| {
                    let t = i as f64 / (n - 1) as f64;
                    ControlPoint::open(
                        (arc.start_deg + sweep * t).rem_euclid(360.0),
                        1.0 / n as f64,
                    )
                })
                .collect();
        }
        vec![ControlPoint::open(self.gantry_deg, 1.0)]
    }
}

/// Delivery technique of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    #[serde(rename = "3dcrt")]
    ThreeDCrt,
    FieldInField,
    Imrt,
    Vmat,
    Stereotactic,
    Proton,
    Adaptive,
}

/// Prescribed dose and fractionation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prescription {
    pub total_dose_gy: f64,
    pub fractions: u32,
}

impl Prescription {
    pub fn new(total_dose_gy: f64, fractions: u32) -> Self {
        Prescription {
            total_dose_gy,
            fractions,
        }
    }

    pub fn dose_per_fraction_gy(&self) -> f64 {
        self.total_dose_gy / self.fractions.max(1) as f64
    }
}

/// Dose criterion kinds supported by the objective evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveKind {
    MaxDose,
    MinDose,
    MaxDvh,
    MinDvh,
    MeanDose,
    Conformity,
    Homogeneity,
    Uniformity,
}

impl ObjectiveKind {
    pub fn needs_volume(&self) -> bool {
        matches!(self, ObjectiveKind::MaxDvh | ObjectiveKind::MinDvh)
    }
}

/// One optimization criterion on a named structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseObjective {
    pub structure: String,
    pub kind: ObjectiveKind,
    /// Target dose (Gy).
    pub dose_gy: f64,
    /// Volume parameter (%) for DVH kinds.
    pub volume_pct: Option<f64>,
    pub weight: f64,
}

impl DoseObjective {
    pub fn validate(&self) -> PlanResult<()> {
        if self.dose_gy < 0.0 {
            return Err(PlanError::ConfigError(format!(
                "objective on '{}': dose must be >= 0, got {}",
                self.structure, self.dose_gy
            )));
        }
        if self.weight < 0.0 {
            return Err(PlanError::ConfigError(format!(
                "objective on '{}': weight must be >= 0, got {}",
                self.structure, self.weight
            )));
        }
        if self.kind.needs_volume() {
            match self.volume_pct {
                Some(v) if (0.0..=100.0).contains(&v) => {}
                Some(v) => {
                    return Err(PlanError::ConfigError(format!(
                        "objective on '{}': volume must be in [0, 100] %, got {}",
                        self.structure, v
                    )))
                }
                None => {
                    return Err(PlanError::ConfigError(format!(
                        "objective on '{}': DVH objective needs a volume parameter",
                        self.structure
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Complete treatment plan handed to the engine and optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub technique: Technique,
    pub prescription: Prescription,
    pub beams: Vec<Beam>,
    pub objectives: Vec<DoseObjective>,
}

impl Plan {
    pub fn new(id: impl Into<String>, technique: Technique, prescription: Prescription) -> Self {
        Plan {
            id: id.into(),
            technique,
            prescription,
            beams: Vec::new(),
            objectives: Vec::new(),
        }
    }

    /// Length of the optimizer weight vector: one entry per control point,
    /// flattened in beam order.
    pub fn total_control_points(&self) -> usize {
        self.beams.iter().map(|b| b.control_point_count()).sum()
    }

    /// Uniform initial weight vector (1/n each).
    pub fn initial_weights(&self) -> Vec<f64> {
        let n = self.total_control_points().max(1);
        vec![1.0 / n as f64; n]
    }

    /// Copy of the plan with the flattened weight vector written back
    /// onto materialized control points, one entry per control point in
    /// beam order.
    pub fn with_weights(&self, weights: &[f64]) -> PlanResult<Plan> {
        if weights.len() != self.total_control_points() {
            return Err(PlanError::ConfigError(format!(
                "weight vector length {} does not match {} control points",
                weights.len(),
                self.total_control_points()
            )));
        }
        let mut out = self.clone();
        let mut index = 0;
        for beam in &mut out.beams {
            let mut cps = beam.resolved_control_points();
            for cp in &mut cps {
                cp.weight = weights[index];
                index += 1;
            }
            beam.control_points = cps;
        }
        Ok(out)
    }

    pub fn validate(&self) -> PlanResult<()> {
        if self.prescription.fractions < 1 {
            return Err(PlanError::ConfigError(
                "fraction count must be >= 1".to_string(),
            ));
        }
        if self.prescription.total_dose_gy <= 0.0 {
            return Err(PlanError::ConfigError(format!(
                "prescribed dose must be positive, got {}",
                self.prescription.total_dose_gy
            )));
        }
        if self.beams.is_empty() {
            return Err(PlanError::ConfigError("plan has no beams".to_string()));
        }
        for objective in &self.objectives {
            objective.validate()?;
        }
        for beam in &self.beams {
            for cp in &beam.control_points {
                if cp.weight < 0.0 {
                    return Err(PlanError::ConfigError(format!(
                        "beam '{}': control-point weight must be >= 0",
                        beam.id
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_centered_symmetric() {
        let grid = Grid3::centered(32, 32, 32, [2.0, 2.0, 2.0]);
        let first = grid.position(0, 0, 0);
        let last = grid.position(31, 31, 31);
        for k in 0..3 {
            assert!((first[k] + last[k]).abs() < 1e-9, "axis {k} not symmetric");
        }
        assert_eq!(grid.shape(), (32, 32, 32));
        assert!((grid.voxel_volume_mm3() - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_grid_voxel_roundtrip() {
        let grid = Grid3::centered(16, 16, 16, [2.5, 2.5, 2.5]);
        let p = grid.position(3, 7, 11);
        assert_eq!(grid.voxel_at(p), Some((3, 7, 11)));
        assert_eq!(grid.voxel_at([1e6, 0.0, 0.0]), None);
    }

    #[test]
    fn test_dose_grid_zeros_and_scale() {
        let grid = Grid3::centered(8, 8, 8, [2.0, 2.0, 2.0]);
        let mut dose = DoseGrid::zeros(&grid).unwrap();
        assert_eq!(dose.max_value(), 0.0);
        dose.data[[0, 0, 0]] = 1.5;
        dose.scale(2.0);
        assert!((dose.data[[0, 0, 0]] - 3.0).abs() < 1e-12);
        dose.check_finite("test").unwrap();
    }

    #[test]
    fn test_dose_grid_check_finite_rejects_nan() {
        let grid = Grid3::centered(4, 4, 4, [1.0, 1.0, 1.0]);
        let mut dose = DoseGrid::zeros(&grid).unwrap();
        dose.data[[1, 2, 3]] = f64::NAN;
        assert!(matches!(
            dose.check_finite("test"),
            Err(PlanError::NumericFailure { .. })
        ));
    }

    #[test]
    fn test_structure_set_rejects_duplicates_and_mismatched_masks() {
        let grid = Grid3::centered(8, 8, 8, [2.0, 2.0, 2.0]);
        let mut set = StructureSet::new(grid.clone());
        let mask = Array3::from_elem(grid.shape(), true);
        set.add(Structure {
            name: "PTV".into(),
            role: StructureRole::Ptv,
            color: [255, 0, 0],
            mask: mask.clone(),
        })
        .unwrap();

        let dup = set.add(Structure {
            name: "PTV".into(),
            role: StructureRole::Ptv,
            color: [255, 0, 0],
            mask: mask.clone(),
        });
        assert!(matches!(dup, Err(PlanError::ConfigError(_))));

        let bad = set.add(Structure {
            name: "Cord".into(),
            role: StructureRole::Oar,
            color: [0, 255, 0],
            mask: Array3::from_elem((4, 4, 4), false),
        });
        assert!(matches!(bad, Err(PlanError::InvalidGeometry { .. })));
    }

    #[test]
    fn test_ptv_lookup_by_role_then_name() {
        let grid = Grid3::centered(4, 4, 4, [1.0, 1.0, 1.0]);
        let mask = Array3::from_elem(grid.shape(), true);
        let mut set = StructureSet::new(grid.clone());
        set.add(Structure {
            name: "target".into(),
            role: StructureRole::Ptv,
            color: [255, 0, 0],
            mask: mask.clone(),
        })
        .unwrap();
        assert_eq!(set.ptv().unwrap().name, "target");

        let mut set2 = StructureSet::new(grid);
        set2.add(Structure {
            name: "ptv".into(),
            role: StructureRole::Other,
            color: [0, 0, 255],
            mask,
        })
        .unwrap();
        assert_eq!(set2.ptv().unwrap().name, "ptv");
    }

    #[test]
    fn test_arc_zero_sweep_single_control_point() {
        let arc = ArcSweep {
            start_deg: 90.0,
            stop_deg: 90.0,
            direction: 1,
        };
        assert_eq!(arc.control_point_count(), 1);
        let arc_ccw = ArcSweep {
            start_deg: 90.0,
            stop_deg: 90.0,
            direction: -1,
        };
        assert_eq!(arc_ccw.control_point_count(), 1);
    }

    #[test]
    fn test_arc_expansion_two_degree_spacing() {
        let mut beam = Beam::new("arc1", Modality::Photon, 6.0);
        beam.arc = Some(ArcSweep {
            start_deg: 180.0,
            stop_deg: 360.0,
            direction: 1,
        });
        let cps = beam.resolved_control_points();
        assert_eq!(cps.len(), 90);
        assert!((cps[0].gantry_deg - 180.0).abs() < 1e-9);
        assert!((cps.last().unwrap().gantry_deg - 0.0).abs() < 1e-9);
        let total_weight: f64 = cps.iter().map(|cp| cp.weight).sum();
        assert!((total_weight - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_arc_counter_clockwise_goes_the_other_way() {
        let arc = ArcSweep {
            start_deg: 10.0,
            stop_deg: 350.0,
            direction: -1,
        };
        // CCW from 10° to 350° is a 20° sweep, not 340°.
        assert!((arc.signed_sweep() + 20.0).abs() < 1e-9);
        assert_eq!(arc.control_point_count(), 10);
    }

    #[test]
    fn test_static_beam_resolves_to_single_open_field() {
        let mut beam = Beam::new("b1", Modality::Photon, 6.0);
        beam.gantry_deg = 72.0;
        let cps = beam.resolved_control_points();
        assert_eq!(cps.len(), 1);
        assert!((cps[0].gantry_deg - 72.0).abs() < 1e-12);
        assert!(cps[0].mlc.is_empty());
        assert!((cps[0].weight - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_explicit_control_points_win_over_arc() {
        let mut beam = Beam::new("b1", Modality::Photon, 6.0);
        beam.arc = Some(ArcSweep {
            start_deg: 0.0,
            stop_deg: 180.0,
            direction: 1,
        });
        beam.control_points = vec![
            ControlPoint::open(0.0, 0.5),
            ControlPoint::open(90.0, 0.5),
        ];
        assert_eq!(beam.control_point_count(), 2);
        assert_eq!(beam.resolved_control_points().len(), 2);
    }

    #[test]
    fn test_objective_validation() {
        let good = DoseObjective {
            structure: "PTV".into(),
            kind: ObjectiveKind::MinDvh,
            dose_gy: 60.0,
            volume_pct: Some(95.0),
            weight: 1.0,
        };
        good.validate().unwrap();

        let missing_volume = DoseObjective {
            volume_pct: None,
            ..good.clone()
        };
        assert!(missing_volume.validate().is_err());

        let bad_volume = DoseObjective {
            volume_pct: Some(130.0),
            ..good.clone()
        };
        assert!(bad_volume.validate().is_err());

        let negative_dose = DoseObjective {
            dose_gy: -1.0,
            ..good
        };
        assert!(negative_dose.validate().is_err());
    }

    #[test]
    fn test_plan_weight_vector_counts_control_points() {
        let prescription = Prescription::new(2.0, 1);
        let mut plan = Plan::new("p1", Technique::Imrt, prescription);
        let mut b1 = Beam::new("b1", Modality::Photon, 6.0);
        b1.control_points = vec![
            ControlPoint::open(0.0, 0.4),
            ControlPoint::open(0.0, 0.3),
            ControlPoint::open(0.0, 0.3),
        ];
        let b2 = Beam::new("b2", Modality::Photon, 6.0);
        plan.beams.push(b1);
        plan.beams.push(b2);

        assert_eq!(plan.total_control_points(), 4);
        let w = plan.initial_weights();
        assert_eq!(w.len(), 4);
        let sum: f64 = w.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_with_weights_materializes_control_points() {
        let mut plan = Plan::new("p", Technique::Vmat, Prescription::new(50.0, 25));
        let mut arc_beam = Beam::new("arc", Modality::Photon, 6.0);
        arc_beam.arc = Some(ArcSweep {
            start_deg: 0.0,
            stop_deg: 8.0,
            direction: 1,
        });
        plan.beams.push(arc_beam);

        let n = plan.total_control_points();
        assert_eq!(n, 4);
        let weights: Vec<f64> = vec![0.4, 0.3, 0.2, 0.1];
        let weighted = plan.with_weights(&weights).unwrap();
        let cps = &weighted.beams[0].control_points;
        assert_eq!(cps.len(), 4);
        for (cp, w) in cps.iter().zip(&weights) {
            assert!((cp.weight - w).abs() < 1e-12);
        }

        let wrong = plan.with_weights(&[0.5, 0.5]);
        assert!(wrong.is_err());
    }

    #[test]
    fn test_beam_serde_roundtrip() {
        let mut beam = Beam::new("field-a", Modality::Proton, 150.0);
        beam.wedge = Some(WedgeFilter {
            angle_deg: 30.0,
            orientation_deg: 90.0,
        });
        beam.control_points = vec![ControlPoint {
            gantry_deg: 45.0,
            mlc: vec![[-20.0, 20.0], [-25.0, 25.0]],
            jaws: Some(JawWindow::symmetric(80.0, 80.0)),
            weight: 1.0,
        }];
        let json = serde_json::to_string(&beam).unwrap();
        let back: Beam = serde_json::from_str(&json).unwrap();
        assert_eq!(beam, back);
    }
}
