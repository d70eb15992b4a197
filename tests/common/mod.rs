// shared scene helpers for the integration tests
#![allow(dead_code)]

use bevy_gpu_mpm::cpu::scene::{PointCloud, SceneBuilder, SceneObject, SceneTransform};
use bevy_gpu_mpm::{Material, MpmSolver, SimConfig};
use glam::Vec3;

pub fn single_particle(config: SimConfig, material: Material, pos: Vec3) -> MpmSolver {
    let pool = SceneBuilder::new(&config)
        .add(SceneObject::new(PointCloud { points: vec![pos] }, material))
        .build()
        .unwrap();
    MpmSolver::new(config, pool).unwrap()
}

pub fn block(config: SimConfig, material: Material, center: Vec3, half_extent: f32) -> MpmSolver {
    let spacing = config.bounds.cell_width * 0.5;
    let pool = SceneBuilder::new(&config)
        .add(
            SceneObject::new(PointCloud::cube(half_extent, spacing), material)
                .with_transform(SceneTransform::from_translation(center)),
        )
        .build()
        .unwrap();
    MpmSolver::new(config, pool).unwrap()
}
