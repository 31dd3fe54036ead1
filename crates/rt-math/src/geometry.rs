// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — Geometry
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Beam geometry: direction vectors and the beam's-eye-view frame.

/// Dot product.
pub fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Cross product a × b.
pub fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub fn norm(a: [f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

/// Unit vector along `a`; `a` unchanged if its norm vanishes.
pub fn normalize(a: [f64; 3]) -> [f64; 3] {
    let n = norm(a);
    if n > 0.0 {
        [a[0] / n, a[1] / n, a[2] / n]
    } else {
        a
    }
}

pub fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn add(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub fn scale(a: [f64; 3], s: f64) -> [f64; 3] {
    [a[0] * s, a[1] * s, a[2] * s]
}

/// Unit beam direction from gantry and couch angles (degrees).
///
/// Spherical → Cartesian with gantry 0° pointing along +y:
/// d = (sin g · cos c, cos g, sin g · sin c).
pub fn beam_direction(gantry_deg: f64, couch_deg: f64) -> [f64; 3] {
    let g = gantry_deg.to_radians();
    let c = couch_deg.to_radians();
    normalize([g.sin() * c.cos(), g.cos(), g.sin() * c.sin()])
}

/// Deterministic perpendicular frame for a unit beam direction `d`.
///
/// Returns (u, w) with u := normalize(−d_z, 0, d_x), falling back to
/// (1, 0, 0) when the beam runs along the y-axis, and w := d × u.
/// Every beam direction gets a unique, stable frame.
pub fn perpendicular_basis(d: [f64; 3]) -> ([f64; 3], [f64; 3]) {
    let mut u = [-d[2], 0.0, d[0]];
    let mag = (u[0] * u[0] + u[2] * u[2]).sqrt();
    if mag > 0.0 {
        u[0] /= mag;
        u[2] /= mag;
    } else {
        u = [1.0, 0.0, 0.0];
    }
    let w = cross(d, u);
    (u, normalize(w))
}
