mod common;

use std::time::Duration;

use bevy_gpu_mpm::config::{BoundaryConfig, WallKind};
use bevy_gpu_mpm::cpu::grid::GridPool;
use bevy_gpu_mpm::cpu::kernels::{self, NodeSet};
use bevy_gpu_mpm::cpu::particles::{MaterialState, ParticleKinematics, ParticlePool};
use bevy_gpu_mpm::cpu::solver::Kernel;
use bevy_gpu_mpm::cpu::svd::svd3;
use bevy_gpu_mpm::{ConfigError, Material, MpmSolver, SimConfig};
use glam::{Mat3, UVec3, Vec3};

use common::{block, single_particle};

#[test]
fn jello_at_rest_stays_put() {
    let config = SimConfig::default().with_gravity(Vec3::ZERO);
    let start = Vec3::new(0.1, 0.2, -0.3);
    let mut solver = single_particle(config, Material::Jello, start);

    for _ in 0..10 {
        solver.step_frame();
    }

    let p = solver.particles().kinematics()[0];
    assert!(p.pos.abs_diff_eq(start, 1e-6), "{:?}", p.pos);
    assert!(p.vel.length() < 1e-6, "{:?}", p.vel);
}

#[test]
fn free_fall_matches_gravity() {
    let config = SimConfig::default();
    let dt = config.dt;
    let mut solver = single_particle(config, Material::Fluid, Vec3::ZERO);

    let n = 10;
    for _ in 0..n {
        solver.substep();
    }

    let p = solver.particles().kinematics()[0];
    let expected = -9.8 * dt * n as f32;
    assert!((p.vel.y - expected).abs() < 1e-4, "{} vs {}", p.vel.y, expected);
    assert!(p.vel.x.abs() < 1e-5 && p.vel.z.abs() < 1e-5);
    assert!(p.pos.y < 0.0);
    assert_eq!(solver.steps(), n);
    assert!((solver.time() - dt * n as f32).abs() < 1e-6);
}

#[test]
fn boundary_band_removes_wall_velocity() {
    let config = SimConfig::default();
    let desc = config.validate().unwrap();
    let grid = GridPool::new(desc);
    let v = Vec3::ONE;

    let samples = [
        (UVec3::new(0, 25, 25), Vec3::new(0.0, 1.0, 1.0)),
        (UVec3::new(2, 25, 25), Vec3::new(0.0, 1.0, 1.0)),
        (UVec3::new(3, 25, 25), v),
        (UVec3::new(25, 25, 48), Vec3::new(1.0, 1.0, 0.0)),
        (UVec3::new(25, 25, 47), v),
        (UVec3::new(25, 1, 25), Vec3::new(1.0, 0.0, 1.0)),
        // sticky ceiling
        (UVec3::new(25, 50, 25), Vec3::ZERO),
        (UVec3::new(0, 49, 25), Vec3::ZERO),
        (UVec3::new(25, 25, 25), v),
    ];
    for (coord, _) in samples {
        let node = grid.node(desc.node_index(coord));
        node.mass.store(1.0);
        node.v_new.store(v);
    }

    kernels::set_boundary(&config, &grid, NodeSet::All(grid.len()));

    for (coord, expected) in samples {
        let got = grid.node(desc.node_index(coord)).v_new.load();
        assert_eq!(got, expected, "node {coord:?}");
    }
}

#[test]
fn all_slip_walls_keep_tangential_velocity() {
    let config = SimConfig::default().with_boundary(BoundaryConfig {
        thickness: 2,
        min_walls: [WallKind::Slip; 3],
        max_walls: [WallKind::Slip; 3],
    });
    let desc = config.validate().unwrap();
    let grid = GridPool::new(desc);
    let index = desc.node_index(UVec3::new(25, 50, 25));
    grid.node(index).v_new.store(Vec3::new(1.0, 2.0, 3.0));

    kernels::set_boundary(&config, &grid, NodeSet::All(grid.len()));

    assert_eq!(grid.node(index).v_new.load(), Vec3::new(1.0, 0.0, 3.0));
}

#[test]
fn falling_block_never_leaves_domain() {
    let config = SimConfig::default().with_substeps(8);
    let mut solver = block(config, Material::Snow, Vec3::new(0.0, -0.6, 0.0), 0.1);
    let desc = *solver.grid_desc();

    for _ in 0..20 {
        solver.step_frame();
    }
    assert!(solver.positions().all(|(p, _)| desc.contains(p)));
}

#[test]
fn timestamps_cover_every_kernel() {
    let config = SimConfig::default().with_timestamps(true);
    let mut solver = single_particle(config, Material::Jello, Vec3::ZERO);
    solver.substep();

    let records = solver.take_timestamps();
    assert_eq!(records.len(), 14);
    assert_eq!(records[0].kernel, Kernel::ClearGrid);
    assert_eq!(records[13].kernel, Kernel::G2p);
    assert!(records.iter().all(|r| r.end >= r.start));
    assert!(records.windows(2).all(|w| w[1].start >= w[0].end));
    assert!(solver.take_timestamps().is_empty());
}

#[test]
fn timestamps_skip_compaction_when_disabled() {
    let config = SimConfig::default()
        .with_timestamps(true)
        .with_compaction(false);
    let mut solver = single_particle(config, Material::Jello, Vec3::ZERO);
    solver.substep();

    let records = solver.take_timestamps();
    assert_eq!(records.len(), 8);
    assert!(!records.iter().any(|r| r.kernel == Kernel::UpSweep));
}

#[test]
fn timestamps_off_records_nothing() {
    let mut solver = single_particle(SimConfig::default(), Material::Jello, Vec3::ZERO);
    solver.step_frame();
    assert!(solver.take_timestamps().is_empty());
}

#[test]
fn timestamps_keep_only_the_latest_frame() {
    let config = SimConfig::default().with_timestamps(true).with_substeps(2);
    let mut solver = single_particle(config, Material::Jello, Vec3::ZERO);
    for _ in 0..3 {
        solver.step_frame();
    }
    assert_eq!(solver.take_timestamps().len(), 28);
}

#[test]
fn frame_budget_caps_substeps() {
    let config = SimConfig::default().with_substeps(20);
    let mut solver = single_particle(config, Material::Fluid, Vec3::ZERO);
    assert_eq!(solver.step_frame().substeps, 8);
}

#[test]
fn exhausted_wall_clock_still_runs_one_substep() {
    let mut config = SimConfig::default().with_substeps(4);
    config.frame_budget.wall_clock = Some(Duration::ZERO);
    let mut solver = single_particle(config, Material::Fluid, Vec3::ZERO);
    assert_eq!(solver.step_frame().substeps, 1);
    assert_eq!(solver.steps(), 1);
}

#[test]
fn compaction_does_not_change_results() {
    let center = Vec3::new(-0.2, 0.1, 0.3);
    let mut compacted = block(SimConfig::default(), Material::Jello, center, 0.1);
    let mut dense = block(SimConfig::default().with_compaction(false), Material::Jello, center, 0.1);

    for _ in 0..3 {
        let a = compacted.step_frame();
        let b = dense.step_frame();
        assert!(a.active_nodes > 0);
        assert_eq!(b.active_nodes, 0);
    }

    for ((a, _), (b, _)) in compacted.positions().zip(dense.positions()) {
        assert!(a.abs_diff_eq(b, 1e-5), "{a:?} vs {b:?}");
    }
}

#[test]
fn loading_kinematics_checks_count() {
    let mut solver = block(SimConfig::default(), Material::Fluid, Vec3::ZERO, 0.05);
    let mut records = solver.particles().kinematics().to_vec();
    records[0].vel = Vec3::X;
    solver.load_kinematics(records.clone()).unwrap();
    assert_eq!(solver.particles().kinematics()[0].vel, Vec3::X);

    records.pop();
    let err = solver.load_kinematics(records).unwrap_err();
    assert!(matches!(err, ConfigError::ParticleCountMismatch { .. }), "{err}");
}

#[test]
fn loading_kinematics_keeps_material_and_mass() {
    let mut solver = block(SimConfig::default(), Material::Fluid, Vec3::ZERO, 0.05);
    let before = solver.particles().kinematics().to_vec();

    let mut records = before.clone();
    records[3].material = Material::Snow;
    let err = solver.load_kinematics(records).unwrap_err();
    assert_eq!(
        err,
        ConfigError::FixedParticleFieldChanged {
            index: 3,
            field: "material"
        }
    );

    let mut records = before.clone();
    records[7].mass *= 2.0;
    records[7].vel = Vec3::Y;
    let err = solver.load_kinematics(records).unwrap_err();
    assert_eq!(
        err,
        ConfigError::FixedParticleFieldChanged {
            index: 7,
            field: "mass"
        }
    );

    assert_eq!(solver.particles().kinematics(), &before[..]);
}

/// A 0.2 m cube at the origin without gravity, with every particle passed
/// through `seed` before the solver takes it.
fn seeded_block(
    config: SimConfig,
    material: Material,
    seed: impl Fn(&mut ParticleKinematics, &mut MaterialState),
) -> MpmSolver {
    let config = config.with_gravity(Vec3::ZERO);
    let template = block(config.clone(), material, Vec3::ZERO, 0.1);
    let mut kinematics = template.particles().kinematics().to_vec();
    let mut states = template.particles().states().to_vec();
    for (p, s) in kinematics.iter_mut().zip(&mut states) {
        seed(p, s);
    }
    MpmSolver::new(config, ParticlePool::from_records(kinematics, states).unwrap()).unwrap()
}

fn mean(values: impl Iterator<Item = f32>) -> f32 {
    let (sum, n) = values.fold((0.0, 0), |(sum, n), v| (sum + v, n + 1));
    sum / n as f32
}

#[test]
fn compressed_fluid_expands() {
    let mut config = SimConfig::default();
    config.fluid.lambda = 100.0;
    let mut solver = seeded_block(config, Material::Fluid, |_, s| s.j = 0.8);

    for _ in 0..10 {
        solver.step_frame();
    }

    let mean_j = mean(solver.particles().states().iter().map(|s| s.j));
    assert!(mean_j > 0.805, "mean J {mean_j}");
    assert!(mean_j < 1.0, "mean J {mean_j}");
}

#[test]
fn fluid_volume_ratio_stops_at_floor() {
    let mut config = SimConfig::default();
    config.fluid.lambda = 1e-9;
    let min_j = config.fluid.min_j;
    let mut solver = seeded_block(config, Material::Fluid, |p, s| {
        p.vel = p.pos * -20.0;
        s.j = 0.052;
    });

    let report = solver.substep();

    assert!(report.clamped_fluid_j > 0);
    let states = solver.particles().states();
    assert!(states.iter().all(|s| s.j >= min_j));
    assert!(states.iter().any(|s| s.j == min_j));
}

#[test]
fn stretched_jello_contracts() {
    let mut solver = seeded_block(SimConfig::default(), Material::Jello, |_, s| {
        s.f = Mat3::from_diagonal(Vec3::new(1.2, 1.0, 1.0));
    });
    let f_xx = |solver: &MpmSolver| mean(solver.particles().states().iter().map(|s| s.f.x_axis.x));

    solver.step_frame();
    let first = f_xx(&solver);
    assert!(first < 1.2, "mean F_xx {first}");

    let mut lowest = first;
    for _ in 1..20 {
        solver.step_frame();
        lowest = lowest.min(f_xx(&solver));
    }
    assert!(lowest < 1.1, "mean F_xx never dropped below {lowest}");
}

#[test]
fn compressed_snow_hardens_plastically() {
    let mut solver = seeded_block(SimConfig::default(), Material::Snow, |p, _| {
        p.vel = p.pos * -10.0;
    });

    for _ in 0..4 {
        solver.step_frame();
    }

    let states = solver.particles().states();
    let mean_jp = mean(states.iter().map(|s| s.fp.determinant()));
    assert!(mean_jp < 1.0, "mean det(Fp) {mean_jp}");

    let (lo, hi) = solver.config().snow.stretch_range();
    for s in states {
        let sigma = svd3(s.fe).singular_values();
        assert!(sigma.min_element() >= lo - 5e-4, "{sigma:?}");
        assert!(sigma.max_element() <= hi + 5e-4, "{sigma:?}");
        assert!(s.f.abs_diff_eq(s.fe * s.fp, 1e-4));
    }
}
