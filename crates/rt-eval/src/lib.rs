// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — RT Evaluation
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Plan evaluation: dose-volume histograms, quality indices and
//! dose-response models.

pub mod dvh;
pub mod metrics;
pub mod radiobiology;
