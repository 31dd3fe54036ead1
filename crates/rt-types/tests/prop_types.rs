// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — Property-Based Tests (proptest) for rt-types
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Property-based tests for rt-types using proptest.
//!
//! Covers: Grid3 construction and index/position roundtrips, arc
//! control-point expansion, plan weight vectors, objective validation.

use proptest::prelude::*;
use rt_types::state::{
    ArcSweep, Beam, DoseObjective, Grid3, Modality, ObjectiveKind, Plan, Prescription, Technique,
};

// ── Grid3 Construction Invariants ────────────────────────────────────

proptest! {
    /// Grid dimensions and shape match constructor arguments.
    #[test]
    fn grid_dimensions_match(
        nx in 2usize..64,
        ny in 2usize..64,
        nz in 2usize..64,
    ) {
        let grid = Grid3::centered(nx, ny, nz, [2.0, 2.0, 2.0]);
        prop_assert_eq!(grid.nx, nx);
        prop_assert_eq!(grid.ny, ny);
        prop_assert_eq!(grid.nz, nz);
        prop_assert_eq!(grid.shape(), (nz, ny, nx));
        prop_assert_eq!(grid.voxel_count(), nx * ny * nz);
    }

    /// voxel_at(position(v)) is the identity for every voxel.
    #[test]
    fn grid_position_roundtrip(
        nx in 2usize..32,
        ny in 2usize..32,
        nz in 2usize..32,
        sx in 0.5f64..5.0,
        sy in 0.5f64..5.0,
        sz in 0.5f64..5.0,
    ) {
        let grid = Grid3::centered(nx, ny, nz, [sx, sy, sz]);
        let (x, y, z) = (nx / 2, ny / 3, nz - 1);
        let p = grid.position(x, y, z);
        prop_assert_eq!(grid.voxel_at(p), Some((x, y, z)));
    }

    /// A centered grid is symmetric about the patient-space origin.
    #[test]
    fn grid_centered_symmetry(
        nx in 2usize..64,
        s in 0.5f64..5.0,
    ) {
        let grid = Grid3::centered(nx, nx, nx, [s, s, s]);
        let lo = grid.position(0, 0, 0);
        let hi = grid.position(nx - 1, nx - 1, nx - 1);
        for k in 0..3 {
            prop_assert!((lo[k] + hi[k]).abs() < 1e-9);
        }
    }
}

// ── Arc Expansion Invariants ─────────────────────────────────────────

proptest! {
    /// Generated arc control-point weights always sum to 1.
    #[test]
    fn arc_weights_sum_to_one(
        start in 0.0f64..360.0,
        sweep in 4.0f64..358.0,
        cw in proptest::bool::ANY,
    ) {
        let mut beam = Beam::new("arc", Modality::Photon, 6.0);
        let stop = (start + if cw { sweep } else { -sweep }).rem_euclid(360.0);
        beam.arc = Some(ArcSweep {
            start_deg: start,
            stop_deg: stop,
            direction: if cw { 1 } else { -1 },
        });
        let cps = beam.resolved_control_points();
        prop_assert!(cps.len() >= 2);
        let total: f64 = cps.iter().map(|cp| cp.weight).sum();
        prop_assert!((total - 1.0).abs() < 1e-9,
            "weights sum to {}, expected 1", total);
    }

    /// The materialized list always matches the advertised count.
    #[test]
    fn arc_count_matches_resolved_len(
        start in 0.0f64..360.0,
        stop in 0.0f64..360.0,
        cw in proptest::bool::ANY,
    ) {
        let mut beam = Beam::new("arc", Modality::Photon, 6.0);
        beam.arc = Some(ArcSweep {
            start_deg: start,
            stop_deg: stop,
            direction: if cw { 1 } else { -1 },
        });
        prop_assert_eq!(beam.control_point_count(), beam.resolved_control_points().len());
    }

    /// Every generated gantry angle is in [0, 360).
    #[test]
    fn arc_angles_normalized(
        start in -720.0f64..720.0,
        stop in -720.0f64..720.0,
    ) {
        let mut beam = Beam::new("arc", Modality::Photon, 6.0);
        beam.arc = Some(ArcSweep {
            start_deg: start,
            stop_deg: stop,
            direction: 1,
        });
        for cp in beam.resolved_control_points() {
            prop_assert!((0.0..360.0).contains(&cp.gantry_deg),
                "gantry {} out of range", cp.gantry_deg);
        }
    }
}

// ── Plan Weight Vector Invariants ────────────────────────────────────

proptest! {
    /// Initial weights are uniform, non-negative and sum to 1.
    #[test]
    fn initial_weights_normalized(n_beams in 1usize..12) {
        let mut plan = Plan::new("p", Technique::Imrt, Prescription::new(60.0, 30));
        for i in 0..n_beams {
            plan.beams.push(Beam::new(format!("b{i}"), Modality::Photon, 6.0));
        }
        let w = plan.initial_weights();
        prop_assert_eq!(w.len(), n_beams);
        let sum: f64 = w.iter().sum();
        prop_assert!((sum - 1.0).abs() < 1e-9);
        for &wi in &w {
            prop_assert!(wi >= 0.0);
        }
    }
}

// ── Objective Validation ─────────────────────────────────────────────

proptest! {
    /// DVH objectives accept exactly the volumes in [0, 100] %.
    #[test]
    fn dvh_volume_range(volume in -50.0f64..150.0) {
        let objective = DoseObjective {
            structure: "PTV".into(),
            kind: ObjectiveKind::MaxDvh,
            dose_gy: 50.0,
            volume_pct: Some(volume),
            weight: 1.0,
        };
        let ok = objective.validate().is_ok();
        prop_assert_eq!(ok, (0.0..=100.0).contains(&volume));
    }

    /// Non-negative dose and weight are accepted for scalar objectives.
    #[test]
    fn scalar_objective_bounds(dose in 0.0f64..100.0, weight in 0.0f64..50.0) {
        let objective = DoseObjective {
            structure: "Cord".into(),
            kind: ObjectiveKind::MaxDose,
            dose_gy: dose,
            volume_pct: None,
            weight,
        };
        prop_assert!(objective.validate().is_ok());
    }
}
