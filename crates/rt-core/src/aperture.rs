// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — Field Aperture
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Beam's-eye-view frame, MLC/jaw aperture membership and wedge
//! modulation.

use rt_math::geometry::{beam_direction, dot, perpendicular_basis};
use rt_types::constants::WEDGE_FACTOR_FLOOR;
use rt_types::state::{ControlPoint, JawWindow, WedgeFilter};

/// Wedge gradient is normalized over this distance (mm) from the
/// isocenter along the wedge orientation.
const WEDGE_NORM_DISTANCE_MM: f64 = 100.0;

/// Orthonormal frame attached to a control point's beam direction.
#[derive(Debug, Clone, Copy)]
pub struct BeamFrame {
    pub direction: [f64; 3],
    pub u: [f64; 3],
    pub w: [f64; 3],
}

impl BeamFrame {
    pub fn from_angles(gantry_deg: f64, couch_deg: f64) -> Self {
        let direction = beam_direction(gantry_deg, couch_deg);
        let (u, w) = perpendicular_basis(direction);
        BeamFrame { direction, u, w }
    }

    /// Decompose a vector relative to the isocenter into (forward
    /// projection, u, w) coordinates.
    pub fn project(&self, rel: [f64; 3]) -> (f64, f64, f64) {
        (dot(rel, self.direction), dot(rel, self.u), dot(rel, self.w))
    }
}

/// Field aperture of one control point: jaw window plus an optional MLC
/// bank indexed along w.
#[derive(Debug, Clone)]
pub struct Aperture {
    jaws: JawWindow,
    mlc: Vec<[f64; 2]>,
    leaf_width: f64,
    half_height: f64,
}

impl Aperture {
    /// Build the aperture for a control point. An empty MLC bank leaves
    /// the jaw rectangle (defaulting to the beam's open field size).
    pub fn from_control_point(cp: &ControlPoint, field_size_mm: [f64; 2]) -> Self {
        let jaws = cp
            .jaws
            .unwrap_or_else(|| JawWindow::symmetric(field_size_mm[0], field_size_mm[1]));
        let half_height = field_size_mm[1] / 2.0;
        let leaf_width = if cp.mlc.is_empty() {
            0.0
        } else {
            field_size_mm[1] / cp.mlc.len() as f64
        };
        Aperture {
            jaws,
            mlc: cp.mlc.clone(),
            leaf_width,
            half_height,
        }
    }

    /// Aperture membership at beam's-eye-view coordinates (u, w).
    /// Leaf i covers w ∈ [−H/2 + i·W, −H/2 + (i+1)·W]; a voxel is inside
    /// iff the jaws admit it and u lies between the covering leaf pair.
    pub fn contains(&self, u: f64, w: f64) -> bool {
        if !self.jaws.contains(u, w) {
            return false;
        }
        if self.mlc.is_empty() {
            return true;
        }
        let idx = ((w + self.half_height) / self.leaf_width).floor();
        if idx < 0.0 || idx >= self.mlc.len() as f64 {
            return false;
        }
        let [left, right] = self.mlc[idx as usize];
        u >= left && u <= right
    }

    /// True when every leaf pair is closed (left ≥ right).
    pub fn fully_blocked(&self) -> bool {
        !self.mlc.is_empty() && self.mlc.iter().all(|&[l, r]| l >= r)
    }

    /// Jaw window as (u_min, u_max, w_min, w_max), the sampling bounds
    /// for stochastic backends.
    pub fn jaw_bounds(&self) -> (f64, f64, f64, f64) {
        (self.jaws.x1, self.jaws.x2, self.jaws.y1, self.jaws.y2)
    }
}

/// Linear wedge modulation along the wedge orientation, clamped to the
/// transmission floor. Zero wedge angle is the identity.
pub fn wedge_factor(wedge: &WedgeFilter, rel: [f64; 3]) -> f64 {
    let alpha = wedge.angle_deg.to_radians();
    let theta = wedge.orientation_deg.to_radians();
    let wedge_dir = [theta.cos(), 0.0, theta.sin()];
    let projection = dot(rel, wedge_dir);
    let t = projection / WEDGE_NORM_DISTANCE_MM;
    (1.0 - (1.0 - alpha.cos()) * t).max(WEDGE_FACTOR_FLOOR)
}
