//! Trilinear interpolation on Grid3 and piecewise-linear table lookup.

use ndarray::Array3;
use rt_types::state::Grid3;

/// Trilinear interpolation of `field` at patient-space position `p`.
/// Clamps to grid boundaries outside the volume.
pub fn trilinear(field: &Array3<f64>, grid: &Grid3, p: [f64; 3]) -> f64 {
    // Map to fractional voxel indices
    let fx = (p[0] - grid.origin[0]) / grid.spacing[0];
    let fy = (p[1] - grid.origin[1]) / grid.spacing[1];
    let fz = (p[2] - grid.origin[2]) / grid.spacing[2];

    let x0 = (fx.floor() as isize).clamp(0, grid.nx as isize - 2) as usize;
    let y0 = (fy.floor() as isize).clamp(0, grid.ny as isize - 2) as usize;
    let z0 = (fz.floor() as isize).clamp(0, grid.nz as isize - 2) as usize;

    let tx = (fx - x0 as f64).clamp(0.0, 1.0);
    let ty = (fy - y0 as f64).clamp(0.0, 1.0);
    let tz = (fz - z0 as f64).clamp(0.0, 1.0);

    let mut acc = 0.0;
    for (dz, wz) in [(0usize, 1.0 - tz), (1, tz)] {
        for (dy, wy) in [(0usize, 1.0 - ty), (1, ty)] {
            for (dx, wx) in [(0usize, 1.0 - tx), (1, tx)] {
                acc += wz * wy * wx * field[[z0 + dz, y0 + dy, x0 + dx]];
            }
        }
    }
    acc
}

/// Piecewise-linear lookup in a table of (x, y) anchors sorted by x.
/// Clamps to the first/last anchor outside the table. O(log N).
pub fn lerp_table(table: &[(f64, f64)], x: f64) -> f64 {
    debug_assert!(!table.is_empty());
    if x <= table[0].0 {
        return table[0].1;
    }
    if x >= table[table.len() - 1].0 {
        return table[table.len() - 1].1;
    }
    // partition_point: first anchor with anchor.x > x
    let hi = table.partition_point(|&(ax, _)| ax <= x);
    let (x0, y0) = table[hi - 1];
    let (x1, y1) = table[hi];
    if x1 == x0 {
        return y0;
    }
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}
