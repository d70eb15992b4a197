use bevy_gpu_mpm::cpu::grid::GridPool;
use bevy_gpu_mpm::cpu::kernels;
use bevy_gpu_mpm::cpu::scene::{PointCloud, SceneBuilder, SceneObject};
use bevy_gpu_mpm::{Material, SimConfig};
use glam::Vec3;

fn relative_error(a: f32, b: f32) -> f32 {
    (a - b).abs() / b.abs().max(f32::EPSILON)
}

#[test]
fn p2g_conserves_mass() {
    let config = SimConfig::default();
    let pool = SceneBuilder::new(&config)
        .add(SceneObject::new(PointCloud::cube(0.3, 0.02), Material::Jello))
        .build()
        .unwrap();
    let grid = GridPool::new(config.validate().unwrap());

    kernels::clear_grid(&grid);
    let clamped = kernels::p2g(&grid, pool.kinematics());

    assert_eq!(clamped, 0);
    let err = relative_error(grid.total_mass(), pool.total_mass());
    assert!(err < 1e-4, "grid {} vs particles {}", grid.total_mass(), pool.total_mass());
}

#[test]
fn p2g_conserves_momentum() {
    let config = SimConfig::default();
    let velocity = Vec3::new(0.5, -1.0, 2.0);
    let pool = SceneBuilder::new(&config)
        .add(SceneObject::new(PointCloud::sphere(0.25, 0.02), Material::Fluid).with_velocity(velocity))
        .build()
        .unwrap();
    let grid = GridPool::new(config.validate().unwrap());

    kernels::clear_grid(&grid);
    kernels::p2g(&grid, pool.kinematics());

    let expected = velocity * pool.total_mass();
    let momentum = grid.total_momentum();
    for axis in 0..3 {
        let err = relative_error(momentum[axis], expected[axis]);
        assert!(err < 1e-4, "axis {axis}: {momentum:?} vs {expected:?}");
    }
}

#[test]
fn clear_grid_resets_accumulators() {
    let config = SimConfig::default();
    let pool = SceneBuilder::new(&config)
        .add(SceneObject::new(PointCloud::cube(0.1, 0.02), Material::Snow))
        .build()
        .unwrap();
    let grid = GridPool::new(config.validate().unwrap());

    kernels::p2g(&grid, pool.kinematics());
    assert!(grid.total_mass() > 0.0);
    kernels::clear_grid(&grid);
    assert_eq!(grid.total_mass(), 0.0);
    assert_eq!(grid.total_momentum(), Vec3::ZERO);
}

#[test]
fn uniform_translation_is_preserved() {
    // rest-state fluid carries no pressure, so only advection acts
    let config = SimConfig::default().with_gravity(Vec3::ZERO).with_flip_ratio(1.0);
    let velocity = Vec3::new(0.3, 0.0, -0.2);
    let pool = SceneBuilder::new(&config)
        .add(SceneObject::new(PointCloud::cube(0.1, 0.02), Material::Fluid).with_velocity(velocity))
        .build()
        .unwrap();
    let before: Vec<Vec3> = pool.kinematics().iter().map(|p| p.pos).collect();
    let mut solver = bevy_gpu_mpm::MpmSolver::new(config, pool).unwrap();

    let report = solver.substep();
    assert!(!report.has_anomalies(), "{report:?}");

    let dt = solver.config().dt;
    for (p, start) in solver.particles().kinematics().iter().zip(&before) {
        assert!(p.vel.abs_diff_eq(velocity, 1e-4), "{:?}", p.vel);
        assert!(p.pos.abs_diff_eq(*start + velocity * dt, 1e-5));
    }
}
