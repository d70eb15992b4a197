//! Turns point clouds into the initial particle pool.
//!
//! Point clouds normally come from an asset loader as flat `x, y, z` arrays.
//! The procedural samplers here give demos and tests something to work with.

use bevy::log::info;
use glam::{Affine3A, Quat, Vec3};

use crate::config::SimConfig;
use crate::cpu::particles::{Material, ParticlePool};
use crate::error::{ConfigError, Result};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointCloud {
    pub points: Vec<Vec3>,
}

impl PointCloud {
    pub fn from_flat(xyz: &[f32]) -> Result<Self> {
        if xyz.len() % 3 != 0 {
            return Err(ConfigError::MalformedPointCloud(xyz.len()));
        }
        Ok(Self {
            points: xyz.chunks_exact(3).map(Vec3::from_slice).collect(),
        })
    }

    /// Regular lattice filling `[-half_extent, half_extent]` on every axis.
    pub fn cube(half_extent: f32, spacing: f32) -> Self {
        let n = (2.0 * half_extent / spacing).floor() as i32;
        let start = -half_extent + 0.5 * (2.0 * half_extent - n as f32 * spacing);
        let mut points = Vec::with_capacity((n.max(0) as usize + 1).pow(3));
        for k in 0..=n {
            for j in 0..=n {
                for i in 0..=n {
                    points.push(Vec3::new(i as f32, j as f32, k as f32) * spacing + start);
                }
            }
        }
        Self { points }
    }

    /// Lattice points of [`PointCloud::cube`] that fall inside the ball.
    pub fn sphere(radius: f32, spacing: f32) -> Self {
        let mut cloud = Self::cube(radius, spacing);
        cloud.points.retain(|p| p.length_squared() <= radius * radius);
        cloud
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Placement of a cloud in the domain, applied as translation · rotation · scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneTransform {
    pub scale: Vec3,
    pub rotation: Quat,
    pub translation: Vec3,
}

impl Default for SceneTransform {
    fn default() -> Self {
        Self {
            scale: Vec3::ONE,
            rotation: Quat::IDENTITY,
            translation: Vec3::ZERO,
        }
    }
}

impl SceneTransform {
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Default::default()
        }
    }

    pub fn affine(&self) -> Affine3A {
        Affine3A::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

#[derive(Clone, Debug)]
pub struct SceneObject {
    pub cloud: PointCloud,
    pub material: Material,
    pub velocity: Vec3,
    pub transform: SceneTransform,
}

impl SceneObject {
    pub fn new(cloud: PointCloud, material: Material) -> Self {
        Self {
            cloud,
            material,
            velocity: Vec3::ZERO,
            transform: SceneTransform::default(),
        }
    }

    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_transform(mut self, transform: SceneTransform) -> Self {
        self.transform = transform;
        self
    }
}

pub struct SceneBuilder<'a> {
    config: &'a SimConfig,
    objects: Vec<SceneObject>,
}

impl<'a> SceneBuilder<'a> {
    pub fn new(config: &'a SimConfig) -> Self {
        Self {
            config,
            objects: Vec::new(),
        }
    }

    pub fn add(mut self, object: SceneObject) -> Self {
        self.objects.push(object);
        self
    }

    /// Places every object and validates the result against the grid.
    pub fn build(self) -> Result<ParticlePool> {
        let grid = self.config.validate()?;
        let total = self.objects.iter().map(|o| o.cloud.len()).sum();
        let mut pool = ParticlePool::with_capacity(total);

        for object in &self.objects {
            let affine = object.transform.affine();
            for &point in &object.cloud.points {
                let pos = affine.transform_point3(point);
                if !grid.contains(pos) {
                    return Err(ConfigError::ParticleOutsideDomain {
                        index: pool.len(),
                        position: pos.to_array(),
                    });
                }
                pool.spawn(pos, object.velocity, object.material, self.config);
            }
        }

        if pool.is_empty() {
            return Err(ConfigError::EmptyScene);
        }

        info!(
            "scene: {} jello, {} snow, {} fluid, {} particles total, {} grid nodes ({} padded)",
            pool.count(Material::Jello),
            pool.count(Material::Snow),
            pool.count(Material::Fluid),
            pool.len(),
            grid.num_nodes,
            grid.num_padded,
        );
        Ok(pool)
    }
}
