// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — Constants
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
/// Default source-surface distance (mm).
pub const DEFAULT_SSD_MM: f64 = 1000.0;

/// Default rectangular field edge (mm) when a control point carries no MLC bank.
pub const DEFAULT_FIELD_SIZE_MM: f64 = 100.0;

/// Linear attenuation coefficient (1/mm) for photon beams up to 6 MV.
pub const MU_PHOTON_6MV: f64 = 0.0061;

/// Linear attenuation coefficient (1/mm) for photon beams up to 10 MV.
pub const MU_PHOTON_10MV: f64 = 0.005;

/// Linear attenuation coefficient (1/mm) for photon beams above 10 MV.
pub const MU_PHOTON_HIGH: f64 = 0.003;

/// Proton CSDA range approximation: range (mm) per MeV of nominal energy.
pub const PROTON_RANGE_MM_PER_MEV: f64 = 3.0;

/// Electron practical range approximation: R_p (mm) per MeV.
pub const ELECTRON_RANGE_MM_PER_MEV: f64 = 5.0;

/// α/β ratio (Gy) assumed for targets when no table entry exists.
pub const ALPHA_BETA_TARGET: f64 = 10.0;

/// α/β ratio (Gy) assumed for late-responding normal tissue.
pub const ALPHA_BETA_LATE: f64 = 3.0;

/// Wedge transmission is never allowed below this factor.
pub const WEDGE_FACTOR_FLOOR: f64 = 0.1;
