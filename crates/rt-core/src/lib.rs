// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — RT Core
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Dose-calculation engine: patient model, ray tracing, kernels and the
//! per-beam dose pipeline.

pub mod acuros;
pub mod aperture;
pub mod engine;
pub mod hu_density;
pub mod kernels;
pub mod montecarlo;
pub mod raytrace;
