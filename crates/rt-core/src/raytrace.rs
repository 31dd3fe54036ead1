// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — Ray Tracer
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Radiological-depth field: per-voxel line integral of electron density
//! from the beam source to the voxel, in mm water-equivalent.
//!
//! Fixed-step traversal with step ≤ ½·min(sx, sy, sz). Embarrassingly
//! parallel across voxels; the ordered map keeps the result independent
//! of thread count.

use ndarray::Array3;
use rayon::prelude::*;
use rt_math::geometry::{scale, sub};
use rt_types::state::Grid3;

/// Integrate `field` (ρ_e, or any per-mm coefficient) along the beam
/// axis from a source `source_distance_mm` upstream of each voxel.
///
/// `direction` must be a unit vector pointing from source to patient.
pub fn radiological_depth(
    field: &Array3<f64>,
    grid: &Grid3,
    direction: [f64; 3],
    source_distance_mm: f64,
) -> Array3<f64> {
    let n = grid.voxel_count();
    let step = grid.min_spacing() / 2.0;

    // Volume bounding box, half a voxel beyond the outermost centers.
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
    let max_steps = ((source_distance_mm + diagonal) / step).ceil() as usize + 4;

    let (nx, ny) = (grid.nx, grid.ny);
    let depths: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|flat| {
            let x = flat % nx;
            let y = (flat / nx) % ny;
            let z = flat / (nx * ny);
            trace_to_voxel(
                field,
                grid,
                direction,
                source_distance_mm,
                (x, y, z),
                step,
                lo,
                hi,
                max_steps,
            )
        })
        .collect();

    Array3::from_shape_vec(grid.shape(), depths).expect("voxel count matches grid shape")
}

#[allow(clippy::too_many_arguments)]
fn trace_to_voxel(
    field: &Array3<f64>,
    grid: &Grid3,
    direction: [f64; 3],
    source_distance_mm: f64,
    target: (usize, usize, usize),
    step: f64,
    lo: [f64; 3],
    hi: [f64; 3],
    max_steps: usize,
) -> f64 {
    let target_pos = grid.position(target.0, target.1, target.2);
    let mut pos = sub(target_pos, scale(direction, source_distance_mm));

    // Advance to the volume entry point (slab intersection) so the empty
    // air gap between source and patient is not marched through.
    let mut t_entry: f64 = 0.0;
    for k in 0..3 {
        if direction[k].abs() > 1e-12 {
            let t0 = (lo[k] - pos[k]) / direction[k];
            let t1 = (hi[k] - pos[k]) / direction[k];
            t_entry = t_entry.max(t0.min(t1));
        }
    }
    if t_entry > 0.0 {
        pos = [
            pos[0] + t_entry * direction[0],
            pos[1] + t_entry * direction[1],
            pos[2] + t_entry * direction[2],
        ];
    }

    let mut depth = 0.0;
    for _ in 0..max_steps {
        if pos[0] < lo[0]
            || pos[0] > hi[0]
            || pos[1] < lo[1]
            || pos[1] > hi[1]
            || pos[2] < lo[2]
            || pos[2] > hi[2]
        {
            break;
        }

        let vx = (((pos[0] - grid.origin[0]) / grid.spacing[0]).round() as isize)
            .clamp(0, grid.nx as isize - 1) as usize;
        let vy = (((pos[1] - grid.origin[1]) / grid.spacing[1]).round() as isize)
            .clamp(0, grid.ny as isize - 1) as usize;
        let vz = (((pos[2] - grid.origin[2]) / grid.spacing[2]).round() as isize)
            .clamp(0, grid.nz as isize - 1) as usize;

        depth += field[[vz, vy, vx]] * step;

        if (vx, vy, vz) == target {
            break;
        }

        pos[0] += step * direction[0];
        pos[1] += step * direction[1];
        pos[2] += step * direction[2];
    }
    depth
}
