// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — Technique Presets
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Beam-arrangement generators per delivery technique. These produce
//! ordinary beams the engine consumes; segment MLC patterns are
//! deterministic so plans reproduce exactly.

use rt_types::state::{ArcSweep, Beam, ControlPoint, JawWindow, Modality, Technique};

/// MLC leaf pairs per bank in generated segments.
const LEAF_COUNT: usize = 20;

/// Open aperture half-width (mm) of generated segments.
const SEGMENT_HALF_WIDTH_MM: f64 = 50.0;

fn open_bank(half_width: f64) -> Vec<[f64; 2]> {
    vec![[-half_width, half_width]; LEAF_COUNT]
}

/// Bank with the central third of the leaves closed (field-in-field
/// boost segment blocking the hot center).
fn center_blocked_bank(half_width: f64) -> Vec<[f64; 2]> {
    let mut bank = open_bank(half_width);
    for pair in bank.iter_mut().take(2 * LEAF_COUNT / 3).skip(LEAF_COUNT / 3) {
        *pair = [0.0, 0.0];
    }
    bank
}

/// Segment bank exposing a sliding band, one position per segment index.
fn band_bank(segment: usize, segments: usize, half_width: f64) -> Vec<[f64; 2]> {
    let band = 2.0 * half_width / segments as f64;
    let left = -half_width + segment as f64 * band;
    vec![[left, left + band]; LEAF_COUNT]
}

/// Four-field box: AP / PA / two laterals, open fields.
pub fn three_d_crt(energy: f64, isocenter_mm: [f64; 3]) -> Vec<Beam> {
    [0.0, 90.0, 180.0, 270.0]
        .iter()
        .enumerate()
        .map(|(i, &gantry)| {
            let mut beam = Beam::new(format!("FIELD-{}", i + 1), Modality::Photon, energy);
            beam.gantry_deg = gantry;
            beam.isocenter_mm = isocenter_mm;
            beam
        })
        .collect()
}

/// Two opposed beams, each with a main open segment and a reduced
/// center-blocked segment.
pub fn field_in_field(energy: f64, isocenter_mm: [f64; 3]) -> Vec<Beam> {
    [0.0, 180.0]
        .iter()
        .enumerate()
        .map(|(i, &gantry)| {
            let mut beam = Beam::new(format!("FIF-{}", i + 1), Modality::Photon, energy);
            beam.gantry_deg = gantry;
            beam.isocenter_mm = isocenter_mm;
            beam.control_points = vec![
                ControlPoint {
                    gantry_deg: gantry,
                    mlc: open_bank(SEGMENT_HALF_WIDTH_MM),
                    jaws: None,
                    weight: 0.8,
                },
                ControlPoint {
                    gantry_deg: gantry,
                    mlc: center_blocked_bank(SEGMENT_HALF_WIDTH_MM),
                    jaws: None,
                    weight: 0.2,
                },
            ];
            beam
        })
        .collect()
}

/// Equispaced coplanar IMRT beams, each with `segments` sliding-band
/// control points at uniform weight.
pub fn imrt(num_beams: usize, segments: usize, energy: f64, isocenter_mm: [f64; 3]) -> Vec<Beam> {
    let num_beams = num_beams.max(1);
    let segments = segments.max(1);
    (0..num_beams)
        .map(|i| {
            let gantry = 360.0 * i as f64 / num_beams as f64;
            let mut beam = Beam::new(format!("IMRT-{}", i + 1), Modality::Photon, energy);
            beam.gantry_deg = gantry;
            beam.isocenter_mm = isocenter_mm;
            beam.control_points = (0..segments)
                .map(|s| ControlPoint {
                    gantry_deg: gantry,
                    mlc: band_bank(s, segments, SEGMENT_HALF_WIDTH_MM),
                    jaws: None,
                    weight: 1.0 / segments as f64,
                })
                .collect();
            beam
        })
        .collect()
}

/// Single VMAT arc; control points are generated by the engine at 2°
/// spacing.
pub fn vmat(start_deg: f64, stop_deg: f64, direction: i8, energy: f64, isocenter_mm: [f64; 3]) -> Vec<Beam> {
    let mut beam = Beam::new("ARC-1", Modality::Photon, energy);
    beam.isocenter_mm = isocenter_mm;
    beam.gantry_deg = start_deg;
    beam.arc = Some(ArcSweep {
        start_deg,
        stop_deg,
        direction,
    });
    vec![beam]
}

/// Stereotactic arc set: non-coplanar arcs at spread couch angles with
/// a tight circular collimation.
pub fn stereotactic(arcs: usize, energy: f64, isocenter_mm: [f64; 3]) -> Vec<Beam> {
    let arcs = arcs.max(1);
    (0..arcs)
        .map(|i| {
            let couch = -40.0 + 80.0 * i as f64 / arcs.max(2).saturating_sub(1) as f64;
            let mut beam = Beam::new(format!("SRS-ARC-{}", i + 1), Modality::Photon, energy);
            beam.isocenter_mm = isocenter_mm;
            beam.couch_deg = couch;
            beam.field_size_mm = [30.0, 30.0];
            beam.arc = Some(ArcSweep {
                start_deg: 30.0,
                stop_deg: 330.0,
                direction: 1,
            });
            beam
        })
        .collect()
}

/// Default arrangement for a technique.
pub fn beams_for(technique: Technique, energy: f64, isocenter_mm: [f64; 3]) -> Vec<Beam> {
    match technique {
        Technique::ThreeDCrt | Technique::Adaptive => three_d_crt(energy, isocenter_mm),
        Technique::FieldInField => field_in_field(energy, isocenter_mm),
        Technique::Imrt => imrt(5, 3, energy, isocenter_mm),
        Technique::Vmat => vmat(180.0, 180.1, 1, energy, isocenter_mm),
        Technique::Stereotactic => stereotactic(5, energy, isocenter_mm),
        Technique::Proton => {
            let mut beams = three_d_crt(energy, isocenter_mm);
            beams.truncate(2);
            for beam in &mut beams {
                beam.modality = Modality::Proton;
            }
            beams
        }
    }
}
