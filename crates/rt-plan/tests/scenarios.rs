// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — End-to-End Planning Scenarios
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Full-pipeline scenarios: water phantoms, opposed beams, MLC
//! blocking, heterogeneity handling, degenerate DVHs and deterministic
//! genetic optimization.

use ndarray::Array3;
use rt_core::engine::DoseEngine;
use rt_eval::dvh::dvh;
use rt_plan::controller::PlanController;
use rt_types::config::{DoseAlgorithmKind, OptimizerKind, PlanningConfig};
use rt_types::run::{CancelToken, RunBudget, RunStatus};
use rt_types::state::{
    Beam, ControlPoint, CtVolume, DoseGrid, DoseObjective, Grid3, Modality, ObjectiveKind, Plan,
    Prescription, Structure, StructureRole, StructureSet, Technique,
};

fn water_phantom(n: usize, ptv_half_voxels: usize) -> (CtVolume, StructureSet) {
    let ct = CtVolume::uniform(n, n, n, [2.0, 2.0, 2.0], 0);
    let c = n / 2;
    // Cubic PTV of edge 2·ptv_half_voxels centered on the grid.
    let span = (c - ptv_half_voxels)..(c + ptv_half_voxels);
    let mask = Array3::from_shape_fn((n, n, n), |(z, y, x)| {
        span.contains(&x) && span.contains(&y) && span.contains(&z)
    });
    let mut structures = StructureSet::new(ct.grid.clone());
    structures
        .add(Structure {
            name: "PTV".into(),
            role: StructureRole::Ptv,
            color: [255, 0, 0],
            mask,
        })
        .expect("phantom mask matches grid");
    (ct, structures)
}

fn base_config() -> PlanningConfig {
    let mut config = PlanningConfig::default();
    config.dose_calculation.algorithm = DoseAlgorithmKind::CollapsedCone;
    config.dose_calculation.resolution_mm = 2.0;
    config.dose_calculation.threads = 2;
    config
}

fn photon_beam(id: &str, gantry: f64) -> Beam {
    let mut beam = Beam::new(id, Modality::Photon, 6.0);
    beam.gantry_deg = gantry;
    beam
}

/// S1 — single photon beam on a water phantom.
#[test]
fn scenario_single_beam_water_phantom() {
    let (ct, structures) = water_phantom(32, 4);
    let mut plan = Plan::new("S1", Technique::ThreeDCrt, Prescription::new(2.0, 1));
    plan.beams.push(photon_beam("AP", 0.0));

    let mut controller = PlanController::new(base_config()).unwrap();
    let outcome = controller
        .run(&plan, &ct, &structures, &CancelToken::new(), &RunBudget::unlimited())
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);

    // Mean PTV dose equals the prescription after normalization.
    let ptv = structures.get("PTV").unwrap();
    let mean = outcome.dose.mean_in(&ptv.mask).unwrap();
    assert!((mean - 2.0).abs() < 1e-3, "mean PTV dose {mean}");

    // Dose is finite and non-negative everywhere.
    assert!(outcome.dose.data.iter().all(|&v| v.is_finite() && v >= 0.0));

    // Dose falls off monotonically with depth past the PTV (beam
    // travels along +y through the center).
    let d = &outcome.dose.data;
    let mut last = f64::INFINITY;
    for y in 21..32 {
        let v = d[[16, y, 16]];
        assert!(v <= last + 1e-12, "dose rising past the target at y={y}");
        last = v;
    }

    // A single beam is never conformal, but the index must be sane.
    let metrics = outcome.metrics.expect("PTV present");
    assert!((0.0..=1.0).contains(&metrics.paddick_ci));
    assert!(metrics.gradient_index >= 1.0);

    // Weight vector: one control point, normalized.
    assert_eq!(outcome.weights.len(), 1);
    assert!((outcome.weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
}

/// S2 — two opposed beams: symmetric dose, flat target coverage.
#[test]
fn scenario_opposed_beams_symmetric() {
    let (ct, structures) = water_phantom(32, 4);
    let mut plan = Plan::new("S2", Technique::ThreeDCrt, Prescription::new(2.0, 1));
    for (id, gantry) in [("AP", 0.0), ("PA", 180.0)] {
        let mut beam = photon_beam(id, gantry);
        beam.control_points = vec![ControlPoint::open(gantry, 0.5)];
        plan.beams.push(beam);
    }

    let mut controller = PlanController::new(base_config()).unwrap();
    let outcome = controller
        .run(&plan, &ct, &structures, &CancelToken::new(), &RunBudget::unlimited())
        .unwrap();

    let ptv = structures.get("PTV").unwrap();
    let mean = outcome.dose.mean_in(&ptv.mask).unwrap();
    assert!((mean - 2.0).abs() < 1e-3);

    // Dose symmetric about the central axial plane within 1%.
    let d = &outcome.dose.data;
    let max = outcome.dose.max_value();
    for z in (0..32).step_by(5) {
        for y in 0..16 {
            for x in (0..32).step_by(5) {
                let a = d[[z, y, x]];
                let b = d[[z, 31 - y, x]];
                assert!(
                    (a - b).abs() <= 0.01 * max,
                    "asymmetry at ({x},{y},{z}): {a} vs {b}"
                );
            }
        }
    }

    // Opposed beams flatten the target dose: HI ≤ 0.15.
    let metrics = outcome.metrics.unwrap();
    assert!(
        metrics.homogeneity_index.abs() <= 0.15,
        "HI {}",
        metrics.homogeneity_index
    );
}

/// S3 — five-beam IMRT with one blocked segment, gradient optimization.
#[test]
fn scenario_imrt_blocking_and_optimization() {
    let (ct, structures) = water_phantom(24, 3);

    // OAR slab beside the target.
    let oar_mask = Array3::from_shape_fn((24, 24, 24), |(z, y, x)| {
        (16..20).contains(&x) && (10..14).contains(&y) && (10..14).contains(&z)
    });
    let mut structures = structures;
    structures
        .add(Structure {
            name: "Cord".into(),
            role: StructureRole::Oar,
            color: [0, 255, 0],
            mask: oar_mask,
        })
        .unwrap();

    let mut plan = Plan::new("S3", Technique::Imrt, Prescription::new(2.0, 1));
    for (i, gantry) in [0.0, 72.0, 144.0, 216.0, 288.0].iter().enumerate() {
        let mut beam = photon_beam(&format!("B{i}"), *gantry);
        let open = ControlPoint {
            gantry_deg: *gantry,
            mlc: vec![[-40.0, 40.0]; 10],
            jaws: None,
            weight: 1.0 / 3.0,
        };
        let mut blocked = open.clone();
        if i == 0 {
            // Central leaves closed on one segment of the first beam.
            for pair in blocked.mlc.iter_mut().take(7).skip(3) {
                *pair = [0.0, 0.0];
            }
        }
        beam.control_points = vec![open.clone(), blocked, open];
        plan.beams.push(beam);
    }
    plan.objectives = vec![
        DoseObjective {
            structure: "PTV".into(),
            kind: ObjectiveKind::MeanDose,
            dose_gy: 2.0,
            volume_pct: None,
            weight: 1.0,
        },
        DoseObjective {
            structure: "Cord".into(),
            kind: ObjectiveKind::MaxDose,
            dose_gy: 1.0,
            volume_pct: None,
            weight: 1.0,
        },
    ];

    let mut config = base_config();
    config.optimization.algorithm = OptimizerKind::Gradient;
    config.optimization.max_iterations = 25;

    // Blocked-segment check straight from the beam decomposition: the
    // central-axis voxel under the closed leaves loses ≥ 80% of its
    // open-segment dose.
    let mut engine = DoseEngine::new(&config).unwrap();
    let cp_set = engine
        .compute_control_point_doses(&plan, &ct, &CancelToken::new(), &RunBudget::unlimited())
        .unwrap();
    let open_field = &cp_set.fields[0].dose;
    let blocked_field = &cp_set.fields[1].dose;
    let probe = [12usize, 12, 12];
    let open_dose = open_field[[probe[2], probe[1], probe[0]]];
    let blocked_dose = blocked_field[[probe[2], probe[1], probe[0]]];
    assert!(open_dose > 0.0);
    assert!(
        blocked_dose <= 0.2 * open_dose,
        "blocked {blocked_dose} vs open {open_dose}"
    );

    let mut controller = PlanController::new(config).unwrap();
    let outcome = controller
        .run(&plan, &ct, &structures, &CancelToken::new(), &RunBudget::unlimited())
        .unwrap();

    let optimization = outcome.optimization.expect("objectives trigger optimization");
    assert!(optimization.objective <= optimization.initial_objective);
    assert_eq!(outcome.weights.len(), 15);
    assert!((outcome.weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    assert!(outcome.weights.iter().all(|&w| w >= 0.0));
}

/// S4 — lung heterogeneity raises the dose distal to the insert.
#[test]
fn scenario_lung_insert_raises_distal_dose() {
    let n = 32;
    let make_ct = |with_lung: bool| {
        let mut ct = CtVolume::uniform(n, n, n, [2.0, 2.0, 2.0], 0);
        if with_lung {
            // 10-voxel lung cube between the entry surface and the
            // center, in the path of a gantry-0 (+y) beam.
            for z in 11..21 {
                for y in 3..13 {
                    for x in 11..21 {
                        ct.data[[z, y, x]] = -700;
                    }
                }
            }
        }
        ct
    };

    let config = base_config();
    let mut engine = DoseEngine::new(&config).unwrap();

    // HU → density lookup inside the lung region.
    let lung_ct = make_ct(true);
    let density = engine.hu_table().convert_volume(&lung_ct);
    assert!((density.data[[16, 8, 16]] - 0.25).abs() <= 0.01);

    // Unnormalized runs (no PTV) so the raw attenuation shows through.
    let mut plan = Plan::new("S4", Technique::ThreeDCrt, Prescription::new(2.0, 1));
    plan.beams.push(photon_beam("AP", 0.0));
    let empty = StructureSet::new(lung_ct.grid.clone());

    let with_lung = engine
        .compute_dose(&plan, &lung_ct, &empty, &CancelToken::new(), &RunBudget::unlimited())
        .unwrap();
    let water_only = engine
        .compute_dose(
            &plan,
            &make_ct(false),
            &empty,
            &CancelToken::new(),
            &RunBudget::unlimited(),
        )
        .unwrap();

    // Distal to the insert (past y = 13 on the central axis) the lung
    // case reads at least 3% hotter.
    let probe = [16usize, 20, 16];
    let lung_dose = with_lung.dose.data[[probe[0], probe[1], probe[2]]];
    let water_dose = water_only.dose.data[[probe[0], probe[1], probe[2]]];
    assert!(
        lung_dose >= 1.03 * water_dose,
        "lung {lung_dose} vs water {water_dose}"
    );
}

/// S5 — DVH endpoints for a uniformly dosed 1000-voxel target.
#[test]
fn scenario_uniform_target_dvh_endpoints() {
    let grid = Grid3::centered(10, 10, 10, [2.0, 2.0, 2.0]);
    let mask = Array3::from_elem(grid.shape(), true);
    let mut dose = DoseGrid::zeros(&grid).unwrap();
    dose.data.fill(70.0);

    let structure = Structure {
        name: "PTV".into(),
        role: StructureRole::Ptv,
        color: [255, 0, 0],
        mask,
    };
    let curve = dvh(&structure, &dose).unwrap();

    assert!((curve.cumulative[0] - 1.0).abs() < 1e-12);
    assert_eq!(*curve.cumulative.last().unwrap(), 0.0);
    for pair in curve.cumulative.windows(2) {
        assert!(pair[1] <= pair[0] + 1e-12);
    }
    assert!((curve.volume_at_dose(35.0) - 1.0).abs() < 1e-9);
    assert_eq!(curve.volume_at_dose(71.0), 0.0);

    assert!((curve.d_min() - 70.0).abs() < 1e-9);
    assert!((curve.d_mean() - 70.0).abs() < 1e-9);
    assert!((curve.d_max() - 70.0).abs() < 1e-9);

    let width = curve.bins_gy[1] - curve.bins_gy[0];
    let d2 = curve.dose_at_volume(2.0);
    let d98 = curve.dose_at_volume(98.0);
    assert!((d2 - 70.0).abs() <= width + 1e-9);
    assert!((d98 - 70.0).abs() <= width + 1e-9);
    // HI = (D2 − D98) / D50 collapses to ~0.
    let d50 = curve.dose_at_volume(50.0);
    assert!(((d2 - d98) / d50).abs() < 1e-3);
}

/// S6 — genetic optimization is seed-deterministic with monotone best
/// fitness.
#[test]
fn scenario_genetic_deterministic() {
    let (ct, mut structures) = water_phantom(16, 3);
    let oar_mask = Array3::from_shape_fn((16, 16, 16), |(z, y, x)| {
        (11..14).contains(&x) && (6..10).contains(&y) && (6..10).contains(&z)
    });
    structures
        .add(Structure {
            name: "Cord".into(),
            role: StructureRole::Oar,
            color: [0, 255, 0],
            mask: oar_mask,
        })
        .unwrap();

    let mut plan = Plan::new("S6", Technique::Imrt, Prescription::new(2.0, 1));
    for (i, gantry) in [0.0, 120.0, 240.0].iter().enumerate() {
        plan.beams.push(photon_beam(&format!("B{i}"), *gantry));
    }
    plan.objectives = vec![
        DoseObjective {
            structure: "Cord".into(),
            kind: ObjectiveKind::MaxDose,
            dose_gy: 0.5,
            volume_pct: None,
            weight: 1.0,
        },
        DoseObjective {
            structure: "PTV".into(),
            kind: ObjectiveKind::MeanDose,
            dose_gy: 2.0,
            volume_pct: None,
            weight: 1.0,
        },
    ];

    let mut config = base_config();
    config.optimization.algorithm = OptimizerKind::Genetic;
    config.optimization.population_size = 30;
    config.optimization.max_iterations = 50;
    config.optimization.seed = 1234;

    let run = |config: &PlanningConfig| {
        let mut controller = PlanController::new(config.clone()).unwrap();
        controller
            .run(&plan, &ct, &structures, &CancelToken::new(), &RunBudget::unlimited())
            .unwrap()
    };

    let first = run(&config);
    let second = run(&config);

    let opt1 = first.optimization.expect("genetic optimization ran");
    let opt2 = second.optimization.expect("genetic optimization ran");
    assert_eq!(opt1.weights, opt2.weights, "seeded run must reproduce");
    assert_eq!(opt1.history, opt2.history);

    for pair in opt1.history.windows(2) {
        assert!(pair[1] <= pair[0] + 1e-12, "best fitness increased");
    }
    assert!((opt1.weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    assert!(opt1.objective <= opt1.initial_objective);
}
