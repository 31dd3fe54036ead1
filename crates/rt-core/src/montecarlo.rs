// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — Monte Carlo Transport
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Photon-history Monte Carlo dose backend.
//!
//! Histories run in batches; after each batch the relative uncertainty
//! in the high-dose region decides whether another batch is needed.
//! Seeds are derived per (beam, control point, batch, chunk) from the
//! configured master seed, so identical seed + batch schedule reproduces
//! the dose grid bit-for-bit regardless of thread count.

use crate::aperture::{Aperture, BeamFrame};
use crate::engine::checkpoint;
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use rt_math::geometry::{add, cross, dot, normalize, scale, sub};
use rt_math::interp::lerp_table;
use rt_types::config::MonteCarloConfig;
use rt_types::run::{CancelToken, RunBudget, RunStatus};
use rt_types::state::{Beam, Grid3};

/// Linear attenuation (1/cm) at 6 MV, by relative electron density.
const ATTENUATION_BY_DENSITY: [(f64, f64); 11] = [
    (0.001, 0.00004),
    (0.05, 0.019),
    (0.25, 0.019),
    (0.6, 0.03),
    (0.92, 0.03),
    (1.0, 0.04),
    (1.07, 0.043),
    (1.3, 0.05),
    (1.6, 0.06),
    (1.8, 0.07),
    (2.0, 0.08),
];

/// Compton / (Compton + photoelectric) branching ratio by density.
const COMPTON_BY_DENSITY: [(f64, f64); 11] = [
    (0.001, 0.9999),
    (0.05, 0.99),
    (0.25, 0.98),
    (0.6, 0.97),
    (0.92, 0.95),
    (1.0, 0.95),
    (1.07, 0.93),
    (1.3, 0.9),
    (1.6, 0.85),
    (1.8, 0.8),
    (2.0, 0.7),
];

/// History terminates below this statistical weight.
const MIN_WEIGHT: f64 = 0.05;

/// Weight retained after a Compton scatter.
const COMPTON_WEIGHT_FACTOR: f64 = 0.8;

/// Angular noise (rad) on the initial direction.
const SOURCE_DIVERGENCE_SIGMA: f64 = 0.01;

/// Compton polar-angle spread (rad).
const SCATTER_THETA_SIGMA: f64 = 0.2;

/// Fraction of the grid maximum defining the high-dose region used for
/// the uncertainty estimate.
const HIGH_DOSE_FRACTION: f64 = 0.5;

/// Batch statistics of one control-point transport run.
#[derive(Debug, Clone, Copy)]
pub struct McRunStats {
    pub batches: usize,
    pub histories: u64,
    /// Mean relative uncertainty (%) over the high-dose region.
    pub uncertainty_pct: f64,
}

/// Transport one control point. Returns the (weighted) dose field, run
/// statistics, and whether the batch loop was cut short.
#[allow(clippy::too_many_arguments)]
pub fn control_point_dose(
    config: &MonteCarloConfig,
    density: &Array3<f64>,
    grid: &Grid3,
    beam: &Beam,
    beam_index: usize,
    cp_index: usize,
    frame: &BeamFrame,
    aperture: &Aperture,
    weight: f64,
    threads: usize,
    token: &CancelToken,
    budget: &RunBudget,
) -> (Array3<f64>, McRunStats, RunStatus) {
    let n = grid.voxel_count();
    let mut dose = vec![0.0_f64; n];
    let mut variance = vec![0.0_f64; n];
    let mut status = RunStatus::Completed;
    let mut batches = 0usize;
    let mut histories = 0u64;
    let mut uncertainty = f64::INFINITY;

    if aperture.fully_blocked() {
        let field = Array3::from_shape_vec(grid.shape(), dose).expect("shape matches");
        return (
            field,
            McRunStats {
                batches: 0,
                histories: 0,
                uncertainty_pct: 0.0,
            },
            status,
        );
    }

    let chunks = threads.max(1);
    for batch in 0..config.max_iterations {
        if let Some(stop) = checkpoint(token, budget) {
            status = stop;
            break;
        }

        let per_chunk = config.num_particles_per_iteration / chunks;
        let remainder = config.num_particles_per_iteration - per_chunk * chunks;

        // Disjoint reproducible streams: one derived seed per chunk.
        let partials: Vec<(Vec<f64>, Vec<f64>)> = (0..chunks)
            .into_par_iter()
            .map(|chunk| {
                let count = per_chunk + usize::from(chunk == chunks - 1) * remainder;
                let seed = derive_seed(
                    config.seed,
                    beam_index as u64,
                    cp_index as u64,
                    batch as u64,
                    chunk as u64,
                );
                simulate_chunk(count, seed, density, grid, beam, frame, aperture)
            })
            .collect();

        for (chunk_dose, chunk_var) in partials {
            for i in 0..n {
                dose[i] += chunk_dose[i];
                variance[i] += chunk_var[i];
            }
        }

        batches += 1;
        histories += config.num_particles_per_iteration as u64;
        uncertainty = high_dose_uncertainty_pct(&dose, &variance);
        if uncertainty <= config.target_uncertainty {
            break;
        }
    }

    let mut field = Array3::from_shape_vec(grid.shape(), dose).expect("shape matches");
    if weight != 1.0 {
        field.mapv_inplace(|v| v * weight);
    }
    (
        field,
        McRunStats {
            batches,
            histories,
            uncertainty_pct: if uncertainty.is_finite() {
                uncertainty
            } else {
                100.0
            },
        },
        status,
    )
}

/// SplitMix64 finalizer over the combined stream coordinates.
fn derive_seed(master: u64, beam: u64, cp: u64, batch: u64, chunk: u64) -> u64 {
    let mut z = master
        ^ beam.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ cp.wrapping_mul(0xBF58_476D_1CE4_E5B9)
        ^ batch.wrapping_mul(0x94D0_49BB_1331_11EB)
        ^ chunk.wrapping_mul(0xD6E8_FEB8_6659_FD93);
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn simulate_chunk(
    histories: usize,
    seed: u64,
    density: &Array3<f64>,
    grid: &Grid3,
    beam: &Beam,
    frame: &BeamFrame,
    aperture: &Aperture,
) -> (Vec<f64>, Vec<f64>) {
    let n = grid.voxel_count();
    let mut dose = vec![0.0_f64; n];
    let mut variance = vec![0.0_f64; n];
    let mut rng = StdRng::seed_from_u64(seed);
    let divergence = Normal::new(0.0, SOURCE_DIVERGENCE_SIGMA).expect("valid sigma");

    let source = sub(beam.isocenter_mm, scale(frame.direction, beam.ssd_mm));
    let step = grid.min_spacing() / 2.0;

    let lo = [
        grid.origin[0] - 0.5 * grid.spacing[0],
        grid.origin[1] - 0.5 * grid.spacing[1],
        grid.origin[2] - 0.5 * grid.spacing[2],
    ];
    let hi = [
        grid.origin[0] + (grid.nx as f64 - 0.5) * grid.spacing[0],
        grid.origin[1] + (grid.ny as f64 - 0.5) * grid.spacing[1],
        grid.origin[2] + (grid.nz as f64 - 0.5) * grid.spacing[2],
    ];
    let diagonal = ((hi[0] - lo[0]).powi(2) + (hi[1] - lo[1]).powi(2) + (hi[2] - lo[2]).powi(2))
        .sqrt();
    // Generous bound: scattered histories may re-cross the volume.
    let max_steps = (4.0 * diagonal / step).ceil() as usize;
    let energy_scale = 6.0 / beam.energy.max(1.0);

    let (u_lo, u_hi, w_lo, w_hi) = aperture.jaw_bounds();
    if u_hi <= u_lo || w_hi <= w_lo {
        return (dose, variance);
    }

    for _ in 0..histories {
        let su = rng.gen_range(u_lo..u_hi);
        let sw = rng.gen_range(w_lo..w_hi);
        // Leaves absorb: a blocked sample delivers nothing.
        if !aperture.contains(su, sw) {
            continue;
        }

        let start = add(source, add(scale(frame.u, su), scale(frame.w, sw)));
        let mut dir = normalize([
            frame.direction[0] + divergence.sample(&mut rng),
            frame.direction[1] + divergence.sample(&mut rng),
            frame.direction[2] + divergence.sample(&mut rng),
        ]);

        // Skip the air gap: advance to the volume entry point.
        let mut t_entry: f64 = 0.0;
        let mut t_exit = f64::INFINITY;
        for k in 0..3 {
            if dir[k].abs() > 1e-12 {
                let t0 = (lo[k] - start[k]) / dir[k];
                let t1 = (hi[k] - start[k]) / dir[k];
                t_entry = t_entry.max(t0.min(t1));
                t_exit = t_exit.min(t0.max(t1));
            } else if start[k] < lo[k] || start[k] > hi[k] {
                t_entry = f64::INFINITY;
            }
        }
        if t_entry > t_exit || !t_entry.is_finite() {
            continue;
        }
        let mut pos = add(start, scale(dir, t_entry));
        let mut particle_weight = 1.0_f64;

        for _ in 0..max_steps {
            if particle_weight <= MIN_WEIGHT {
                break;
            }
            let fx = (pos[0] - grid.origin[0]) / grid.spacing[0];
            let fy = (pos[1] - grid.origin[1]) / grid.spacing[1];
            let fz = (pos[2] - grid.origin[2]) / grid.spacing[2];
            let inside = (-0.5..grid.nx as f64 - 0.5).contains(&fx)
                && (-0.5..grid.ny as f64 - 0.5).contains(&fy)
                && (-0.5..grid.nz as f64 - 0.5).contains(&fz);
            if !inside {
                break;
            }

            let (vx, vy, vz) = (
                fx.round() as usize,
                fy.round() as usize,
                fz.round() as usize,
            );
            let rho = density[[vz, vy, vx]];
            let mu_cm = lerp_table(&ATTENUATION_BY_DENSITY, rho) * energy_scale;
            let compton_prob = lerp_table(&COMPTON_BY_DENSITY, rho);

            // Step length in cm for the interaction probability.
            let p_interact = 1.0 - (-mu_cm * step / 10.0).exp();

            let deposit = particle_weight * p_interact * (1.0 - compton_prob);
            let flat = vz * grid.ny * grid.nx + vy * grid.nx + vx;
            dose[flat] += deposit;
            variance[flat] += deposit * deposit;

            if rng.gen::<f64>() < p_interact {
                if rng.gen::<f64>() < compton_prob {
                    particle_weight *= COMPTON_WEIGHT_FACTOR;
                    dir = compton_scatter(dir, &mut rng);
                } else {
                    // Photoelectric absorption ends the history.
                    break;
                }
            }

            pos = add(pos, scale(dir, step * 1.01));
        }
    }

    (dose, variance)
}

/// Rotate the direction by a small random polar angle about a uniform
/// azimuth.
fn compton_scatter(dir: [f64; 3], rng: &mut StdRng) -> [f64; 3] {
    let theta_dist = Normal::new(0.0, SCATTER_THETA_SIGMA).expect("valid sigma");
    let theta: f64 = theta_dist.sample(rng);
    let phi: f64 = rng.gen_range(0.0..std::f64::consts::TAU);

    let mut axis1 = if dir[0].abs() < 0.9 {
        [1.0, 0.0, 0.0]
    } else {
        [0.0, 1.0, 0.0]
    };
    let along = dot(axis1, dir);
    axis1 = normalize(sub(axis1, scale(dir, along)));
    let axis2 = cross(dir, axis1);

    let (sin_t, cos_t) = theta.sin_cos();
    let (sin_p, cos_p) = phi.sin_cos();
    normalize(add(
        scale(dir, cos_t),
        add(scale(axis1, sin_t * cos_p), scale(axis2, sin_t * sin_p)),
    ))
}

/// Mean σ/dose (%) over voxels above half the grid maximum.
fn high_dose_uncertainty_pct(dose: &[f64], variance: &[f64]) -> f64 {
    let max = dose.iter().cloned().fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return f64::INFINITY;
    }
    let threshold = HIGH_DOSE_FRACTION * max;
    let mut total = 0.0;
    let mut count = 0usize;
    for (d, v) in dose.iter().zip(variance.iter()) {
        if *d > threshold {
            total += v.sqrt() / d;
            count += 1;
        }
    }
    if count == 0 {
        f64::INFINITY
    } else {
        total / count as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_types::state::{ControlPoint, CtVolume, Modality};

    fn setup(n: usize) -> (Array3<f64>, Grid3, Beam, BeamFrame, Aperture) {
        let ct = CtVolume::uniform(n, n, n, [2.0, 2.0, 2.0], 0);
        let grid = ct.grid.clone();
        let density = Array3::from_elem(grid.shape(), 1.0);
        let beam = Beam::new("mc", Modality::Photon, 6.0);
        let frame = BeamFrame::from_angles(0.0, 0.0);
        let cp = ControlPoint::open(0.0, 1.0);
        let aperture = Aperture::from_control_point(&cp, beam.field_size_mm);
        (density, grid, beam, frame, aperture)
    }

    fn small_config(seed: u64) -> MonteCarloConfig {
        MonteCarloConfig {
            num_particles_per_iteration: 2000,
            target_uncertainty: 0.1,
            max_iterations: 2,
            seed,
        }
    }

    #[test]
    fn test_seed_reproducibility() {
        let (density, grid, beam, frame, aperture) = setup(10);
        let run = |seed| {
            control_point_dose(
                &small_config(seed),
                &density,
                &grid,
                &beam,
                0,
                0,
                &frame,
                &aperture,
                1.0,
                2,
                &CancelToken::new(),
                &RunBudget::unlimited(),
            )
            .0
        };
        assert_eq!(run(11), run(11));
        assert_ne!(run(11), run(12));
    }

    #[test]
    fn test_deposits_energy_inside_phantom() {
        let (density, grid, beam, frame, aperture) = setup(10);
        let (field, stats, status) = control_point_dose(
            &small_config(3),
            &density,
            &grid,
            &beam,
            0,
            0,
            &frame,
            &aperture,
            1.0,
            2,
            &CancelToken::new(),
            &RunBudget::unlimited(),
        );
        assert_eq!(status, RunStatus::Completed);
        assert!(stats.histories > 0);
        assert!(field.iter().any(|&v| v > 0.0), "no energy deposited");
        assert!(field.iter().all(|&v| v >= 0.0 && v.is_finite()));
    }

    #[test]
    fn test_blocked_aperture_zero_dose() {
        let (density, grid, beam, frame, _) = setup(8);
        let cp = ControlPoint {
            gantry_deg: 0.0,
            mlc: vec![[0.0, 0.0]; 6],
            jaws: None,
            weight: 1.0,
        };
        let aperture = Aperture::from_control_point(&cp, beam.field_size_mm);
        let (field, stats, _) = control_point_dose(
            &small_config(3),
            &density,
            &grid,
            &beam,
            0,
            0,
            &frame,
            &aperture,
            1.0,
            2,
            &CancelToken::new(),
            &RunBudget::unlimited(),
        );
        assert_eq!(stats.batches, 0);
        assert!(field.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_cancelled_before_first_batch() {
        let (density, grid, beam, frame, aperture) = setup(8);
        let token = CancelToken::new();
        token.cancel();
        let (_, stats, status) = control_point_dose(
            &small_config(3),
            &density,
            &grid,
            &beam,
            0,
            0,
            &frame,
            &aperture,
            1.0,
            2,
            &token,
            &RunBudget::unlimited(),
        );
        assert_eq!(status, RunStatus::Cancelled);
        assert_eq!(stats.batches, 0);
    }

    #[test]
    fn test_uncertainty_decreases_with_more_batches() {
        let (density, grid, beam, frame, aperture) = setup(8);
        let run = |max_iterations| {
            let config = MonteCarloConfig {
                num_particles_per_iteration: 2000,
                target_uncertainty: 1e-6,
                max_iterations,
                seed: 5,
            };
            control_point_dose(
                &config,
                &density,
                &grid,
                &beam,
                0,
                0,
                &frame,
                &aperture,
                1.0,
                2,
                &CancelToken::new(),
                &RunBudget::unlimited(),
            )
            .1
        };
        let one = run(1);
        let four = run(4);
        assert_eq!(one.batches, 1);
        assert_eq!(four.batches, 4);
        assert!(
            four.uncertainty_pct < one.uncertainty_pct,
            "{} !< {}",
            four.uncertainty_pct,
            one.uncertainty_pct
        );
    }
}
