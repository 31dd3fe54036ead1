// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — Dose Engine
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Per-beam dose pipeline.
//!
//! All backends share the same outer loop: resolve control points,
//! derive the beam frame, test aperture membership per voxel and apply
//! inverse-square, depth attenuation, control-point weight and wedge
//! modulation. The deterministic backends differ only in the kernel they
//! convolve; Acuros swaps the kernel sum for a material-based fluence
//! march and Monte Carlo replaces the loop body with particle transport.

use crate::acuros;
use crate::aperture::{wedge_factor, Aperture, BeamFrame};
use crate::hu_density::HuDensityTable;
use crate::kernels::{attenuation_mu_per_mm, DoseKernel, KernelCache, KernelFamily};
use crate::montecarlo;
use crate::raytrace::radiological_depth;
use ndarray::Array3;
use rayon::prelude::*;
use rt_math::geometry::sub;
use rt_math::interp::trilinear;
use rt_types::config::{DoseAlgorithmKind, MonteCarloConfig, PlanningConfig};
use rt_types::error::{PlanError, PlanResult};
use rt_types::run::{CancelToken, RunBudget, RunStatus};
use rt_types::state::{Beam, ControlPoint, CtVolume, DoseGrid, Grid3, Plan, StructureSet};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Result of a full plan dose calculation.
#[derive(Debug)]
pub struct DoseReport {
    pub dose: DoseGrid,
    pub status: RunStatus,
    /// Scale applied so the mean PTV dose equals the prescription;
    /// `None` when normalization was skipped.
    pub normalization_scale: Option<f64>,
    pub warnings: Vec<String>,
    pub calc_time_ms: f64,
}

/// Unit-weight dose field of one control point, for the optimizer's
/// linear dose model.
#[derive(Debug)]
pub struct ControlPointDose {
    pub beam_index: usize,
    pub cp_index: usize,
    pub dose: Array3<f64>,
}

/// Per-control-point dose decomposition of a plan.
#[derive(Debug)]
pub struct CpDoseSet {
    pub grid: Grid3,
    pub fields: Vec<ControlPointDose>,
    pub status: RunStatus,
}

/// Patient model prepared on the dose grid.
struct PatientModel {
    grid: Grid3,
    density: Array3<f64>,
    acuros_mu: Option<Array3<f64>>,
    acuros_conv: Option<Array3<f64>>,
}

/// Model-based dose calculation engine, polymorphic over the configured
/// backend.
pub struct DoseEngine {
    algorithm: DoseAlgorithmKind,
    resolution_mm: f64,
    threads: usize,
    hu_table: HuDensityTable,
    kernel_cache: KernelCache,
    mc_config: MonteCarloConfig,
    pool: rayon::ThreadPool,
}

impl DoseEngine {
    /// Build an engine from a validated configuration. Loads the HU
    /// calibration file when one is configured.
    pub fn new(config: &PlanningConfig) -> PlanResult<Self> {
        config.validate()?;
        let hu_table = match &config.dose_calculation.hu_to_density_table {
            Some(path) => HuDensityTable::from_file(path)?,
            None => HuDensityTable::default(),
        };
        Self::with_table(config, hu_table)
    }

    /// Build with an explicit HU → density table.
    pub fn with_table(config: &PlanningConfig, hu_table: HuDensityTable) -> PlanResult<Self> {
        config.validate()?;
        let threads = config.dose_calculation.threads;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| PlanError::ConfigError(format!("thread pool: {e}")))?;
        Ok(DoseEngine {
            algorithm: config.dose_calculation.algorithm,
            resolution_mm: config.dose_calculation.resolution_mm,
            threads,
            hu_table,
            kernel_cache: KernelCache::new(),
            mc_config: config.monte_carlo.clone(),
            pool,
        })
    }

    pub fn algorithm(&self) -> DoseAlgorithmKind {
        self.algorithm
    }

    pub fn hu_table(&self) -> &HuDensityTable {
        &self.hu_table
    }

    /// The dose grid geometry for a CT: the CT grid itself when its
    /// spacing already matches the configured resolution, otherwise a
    /// cubic-resolution grid over the same physical extent.
    pub fn dose_grid_for(&self, ct_grid: &Grid3) -> Grid3 {
        let res = self.resolution_mm;
        if ct_grid.spacing.iter().all(|&s| (s - res).abs() < 1e-9) {
            return ct_grid.clone();
        }
        let extent = [
            (ct_grid.nx - 1) as f64 * ct_grid.spacing[0],
            (ct_grid.ny - 1) as f64 * ct_grid.spacing[1],
            (ct_grid.nz - 1) as f64 * ct_grid.spacing[2],
        ];
        Grid3::new(
            (extent[0] / res).floor() as usize + 1,
            (extent[1] / res).floor() as usize + 1,
            (extent[2] / res).floor() as usize + 1,
            [res, res, res],
            ct_grid.origin,
        )
    }

    /// Compute the plan's absorbed dose grid.
    pub fn compute_dose(
        &mut self,
        plan: &Plan,
        ct: &CtVolume,
        structures: &StructureSet,
        token: &CancelToken,
        budget: &RunBudget,
    ) -> PlanResult<DoseReport> {
        let start = std::time::Instant::now();
        plan.validate()?;

        let model = self.prepare_model(ct)?;
        structures
            .grid
            .check_shape(model.grid.shape(), "structure set vs dose grid")?;

        let mut dose = DoseGrid::zeros(&model.grid)?;
        let mut warnings = Vec::new();
        let mut status = RunStatus::Completed;

        let DoseEngine {
            algorithm,
            resolution_mm,
            threads,
            kernel_cache,
            mc_config,
            pool,
            ..
        } = self;

        pool.install(|| -> PlanResult<()> {
            for (beam_index, beam) in plan.beams.iter().enumerate() {
                if let Some(stop) = checkpoint(token, budget) {
                    status = stop;
                    break;
                }
                debug!(beam = %beam.id, index = beam_index, "computing beam dose");
                let (beam_field, beam_status) = beam_dose(
                    *algorithm,
                    kernel_cache,
                    *resolution_mm,
                    mc_config,
                    *threads,
                    &model,
                    beam,
                    beam_index,
                    token,
                    budget,
                )?;
                azip_add(&mut dose.data, &beam_field);
                if beam_status.is_partial() {
                    status = beam_status;
                    break;
                }
            }
            Ok(())
        })?;

        dose.check_finite("dose engine")?;

        let normalization_scale = if status == RunStatus::Completed {
            normalize_to_prescription(
                &mut dose,
                structures,
                plan.prescription.total_dose_gy,
                &mut warnings,
            )
        } else {
            warnings.push("partial dose grid returned without normalization".to_string());
            None
        };

        Ok(DoseReport {
            dose,
            status,
            normalization_scale,
            warnings,
            calc_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Compute each control point's unit-weight dose field. The plan
    /// dose for a weight vector w is then Σ wᵢ · fieldᵢ.
    pub fn compute_control_point_doses(
        &mut self,
        plan: &Plan,
        ct: &CtVolume,
        token: &CancelToken,
        budget: &RunBudget,
    ) -> PlanResult<CpDoseSet> {
        plan.validate()?;
        let model = self.prepare_model(ct)?;

        let mut fields = Vec::with_capacity(plan.total_control_points());
        let mut status = RunStatus::Completed;

        let DoseEngine {
            algorithm,
            resolution_mm,
            threads,
            kernel_cache,
            mc_config,
            pool,
            ..
        } = self;

        pool.install(|| -> PlanResult<()> {
            'beams: for (beam_index, beam) in plan.beams.iter().enumerate() {
                let mut depth_cache = HashMap::new();
                let cps = beam.resolved_control_points();
                for (cp_index, cp) in cps.iter().enumerate() {
                    if let Some(stop) = checkpoint(token, budget) {
                        status = stop;
                        break 'beams;
                    }
                    let (field, cp_status) = control_point_dose(
                        *algorithm,
                        kernel_cache,
                        *resolution_mm,
                        mc_config,
                        *threads,
                        &model,
                        beam,
                        beam_index,
                        cp,
                        cp_index,
                        1.0,
                        &mut depth_cache,
                        token,
                        budget,
                    )?;
                    fields.push(ControlPointDose {
                        beam_index,
                        cp_index,
                        dose: field,
                    });
                    if cp_status.is_partial() {
                        status = cp_status;
                        break 'beams;
                    }
                }
            }
            Ok(())
        })?;

        for field in &fields {
            if field.dose.iter().any(|v| !v.is_finite()) {
                return Err(PlanError::NumericFailure {
                    context: "control-point dose".to_string(),
                    message: "NaN or Inf in beam contribution".to_string(),
                });
            }
        }

        Ok(CpDoseSet {
            grid: model.grid,
            fields,
            status,
        })
    }

    fn prepare_model(&self, ct: &CtVolume) -> PlanResult<PatientModel> {
        let dose_grid = self.dose_grid_for(&ct.grid);
        let density_ct = self.hu_table.convert_volume(ct);

        let density = if dose_grid.same_geometry(&ct.grid) {
            density_ct.data
        } else {
            // Resample onto the dose grid.
            let src_grid = ct.grid.clone();
            let src = density_ct.data;
            Array3::from_shape_fn(dose_grid.shape(), |(z, y, x)| {
                trilinear(&src, &src_grid, dose_grid.position(x, y, z))
            })
        };

        let (acuros_mu, acuros_conv) = if self.algorithm == DoseAlgorithmKind::Acuros {
            let (mu, conv) = acuros::material_fields(&density);
            (Some(mu), Some(conv))
        } else {
            (None, None)
        };

        Ok(PatientModel {
            grid: dose_grid,
            density,
            acuros_mu,
            acuros_conv,
        })
    }
}

/// Observe the cancel flag and wall-clock budget at a coarse checkpoint.
pub(crate) fn checkpoint(token: &CancelToken, budget: &RunBudget) -> Option<RunStatus> {
    if token.is_cancelled() {
        Some(RunStatus::Cancelled)
    } else if budget.expired() {
        Some(RunStatus::TimedOut)
    } else {
        None
    }
}

fn azip_add(out: &mut Array3<f64>, add: &Array3<f64>) {
    out.zip_mut_with(add, |o, &a| *o += a);
}

/// One beam's dose at the control-point weights the beam carries.
#[allow(clippy::too_many_arguments)]
fn beam_dose(
    algorithm: DoseAlgorithmKind,
    kernel_cache: &mut KernelCache,
    resolution_mm: f64,
    mc_config: &MonteCarloConfig,
    threads: usize,
    model: &PatientModel,
    beam: &Beam,
    beam_index: usize,
    token: &CancelToken,
    budget: &RunBudget,
) -> PlanResult<(Array3<f64>, RunStatus)> {
    let mut out = Array3::zeros(model.grid.shape());
    let mut status = RunStatus::Completed;
    let mut depth_cache = HashMap::new();

    let cps = beam.resolved_control_points();
    for (cp_index, cp) in cps.iter().enumerate() {
        if let Some(stop) = checkpoint(token, budget) {
            status = stop;
            break;
        }
        let weight = cp.weight;
        let (field, cp_status) = control_point_dose(
            algorithm,
            kernel_cache,
            resolution_mm,
            mc_config,
            threads,
            model,
            beam,
            beam_index,
            cp,
            cp_index,
            weight,
            &mut depth_cache,
            token,
            budget,
        )?;
        azip_add(&mut out, &field);
        if cp_status.is_partial() {
            status = cp_status;
            break;
        }
    }
    Ok((out, status))
}

/// Dose contribution of a single control point at the given weight.
#[allow(clippy::too_many_arguments)]
fn control_point_dose(
    algorithm: DoseAlgorithmKind,
    kernel_cache: &mut KernelCache,
    resolution_mm: f64,
    mc_config: &MonteCarloConfig,
    threads: usize,
    model: &PatientModel,
    beam: &Beam,
    beam_index: usize,
    cp: &ControlPoint,
    cp_index: usize,
    weight: f64,
    depth_cache: &mut HashMap<(u64, u64), Array3<f64>>,
    token: &CancelToken,
    budget: &RunBudget,
) -> PlanResult<(Array3<f64>, RunStatus)> {
    let frame = BeamFrame::from_angles(cp.gantry_deg, beam.couch_deg);
    let aperture = Aperture::from_control_point(cp, beam.field_size_mm);

    match algorithm {
        DoseAlgorithmKind::MonteCarlo => {
            let (field, stats, status) = montecarlo::control_point_dose(
                mc_config,
                &model.density,
                &model.grid,
                beam,
                beam_index,
                cp_index,
                &frame,
                &aperture,
                weight,
                threads,
                token,
                budget,
            );
            debug!(
                beam = %beam.id,
                cp = cp_index,
                batches = stats.batches,
                uncertainty_pct = stats.uncertainty_pct,
                "monte carlo control point"
            );
            Ok((field, status))
        }
        DoseAlgorithmKind::Acuros => {
            let mu = model
                .acuros_mu
                .as_ref()
                .expect("acuros fields prepared with the model");
            let conv = model
                .acuros_conv
                .as_ref()
                .expect("acuros fields prepared with the model");
            let depth_mu = cached_depth(depth_cache, cp, beam, mu, &model.grid, &frame);
            let field = acuros::control_point_dose(
                conv,
                &depth_mu,
                &model.grid,
                &frame,
                &aperture,
                beam,
                weight,
            );
            Ok((field, RunStatus::Completed))
        }
        deterministic => {
            let family = KernelFamily::for_algorithm(deterministic)
                .expect("deterministic backends map to a kernel family");
            let kernel = kernel_cache.get(family, beam.modality, beam.energy, resolution_mm);
            let depth =
                cached_depth(depth_cache, cp, beam, &model.density, &model.grid, &frame);
            let field = kernel_cp_dose(
                kernel,
                &model.density,
                &depth,
                &model.grid,
                &frame,
                &aperture,
                beam,
                weight,
            );
            Ok((field, RunStatus::Completed))
        }
    }
}

/// Radiological depth for a control point, shared across control points
/// with the same beam direction.
fn cached_depth(
    cache: &mut HashMap<(u64, u64), Array3<f64>>,
    cp: &ControlPoint,
    beam: &Beam,
    field: &Array3<f64>,
    grid: &Grid3,
    frame: &BeamFrame,
) -> Array3<f64> {
    let key = (cp.gantry_deg.to_bits(), beam.couch_deg.to_bits());
    cache
        .entry(key)
        .or_insert_with(|| radiological_depth(field, grid, frame.direction, beam.ssd_mm))
        .clone()
}

/// Shared deterministic voxel loop: kernel-weighted neighborhood sum
/// inside the aperture, scaled by inverse-square, depth attenuation,
/// control-point weight and wedge modulation.
#[allow(clippy::too_many_arguments)]
fn kernel_cp_dose(
    kernel: &DoseKernel,
    density: &Array3<f64>,
    depth: &Array3<f64>,
    grid: &Grid3,
    frame: &BeamFrame,
    aperture: &Aperture,
    beam: &Beam,
    weight: f64,
) -> Array3<f64> {
    let n = grid.voxel_count();
    let (nx, ny, nz) = (grid.nx, grid.ny, grid.nz);
    let mu = attenuation_mu_per_mm(beam.modality, beam.energy);
    let ssd = beam.ssd_mm;
    let iso = beam.isocenter_mm;
    let center = kernel.center() as isize;
    let support = kernel.support as isize;

    let values: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|flat| {
            let x = flat % nx;
            let y = (flat / nx) % ny;
            let z = flat / (nx * ny);

            let rel = sub(grid.position(x, y, z), iso);
            let (forward, pu, pw) = frame.project(rel);
            // Behind-the-source voxels get nothing.
            if forward <= -ssd {
                return 0.0;
            }
            if !aperture.contains(pu, pw) {
                return 0.0;
            }

            // Kernel-weighted neighborhood density sum.
            let mut sum = 0.0;
            for kz in -support..=support {
                let nz_i = z as isize + kz;
                if nz_i < 0 || nz_i >= nz as isize {
                    continue;
                }
                for ky in -support..=support {
                    let ny_i = y as isize + ky;
                    if ny_i < 0 || ny_i >= ny as isize {
                        continue;
                    }
                    for kx in -support..=support {
                        let nx_i = x as isize + kx;
                        if nx_i < 0 || nx_i >= nx as isize {
                            continue;
                        }
                        let kv = kernel.data[[
                            (center + kz) as usize,
                            (center + ky) as usize,
                            (center + kx) as usize,
                        ]];
                        sum += kv * density[[nz_i as usize, ny_i as usize, nx_i as usize]];
                    }
                }
            }

            let inverse_square = (ssd / (ssd + forward)).powi(2);
            let attenuation = (-mu * depth[[z, y, x]]).exp();
            let mut value = sum * inverse_square * attenuation * weight;
            if let Some(wedge) = &beam.wedge {
                value *= wedge_factor(wedge, rel);
            }
            value
        })
        .collect();

    Array3::from_shape_vec(grid.shape(), values).expect("voxel count matches grid shape")
}

/// Scale the summed dose so the mean PTV dose equals the prescription.
/// Skipped, with a warning, when no PTV exists or its mean is zero.
fn normalize_to_prescription(
    dose: &mut DoseGrid,
    structures: &StructureSet,
    prescribed_gy: f64,
    warnings: &mut Vec<String>,
) -> Option<f64> {
    let Some(ptv) = structures.ptv() else {
        warn!("no PTV structure found; dose normalization skipped");
        warnings.push("no PTV structure found; dose normalization skipped".to_string());
        return None;
    };
    match dose.mean_in(&ptv.mask) {
        Some(mean) if mean > 0.0 && mean.is_finite() => {
            let scale = prescribed_gy / mean;
            dose.scale(scale);
            debug!(ptv = %ptv.name, mean, scale, "normalized to prescription");
            Some(scale)
        }
        _ => {
            warn!(ptv = %ptv.name, "mean PTV dose is zero; normalization skipped");
            warnings.push(format!(
                "mean dose in '{}' is zero; normalization skipped",
                ptv.name
            ));
            None
        }
    }
}
