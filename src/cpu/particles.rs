// particle pool: two co-indexed record arrays, fixed size for the whole run
use glam::{Mat3, Vec3};

use crate::config::{Densities, SimConfig};
use crate::error::{ConfigError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Material {
    Jello = 0,
    Snow = 1,
    Fluid = 2,
}

impl Material {
    pub const ALL: [Material; 3] = [Material::Jello, Material::Snow, Material::Fluid];

    /// Numeric tag used in GPU buffers.
    pub fn tag(self) -> u32 {
        self as u32
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Material::Jello),
            1 => Some(Material::Snow),
            2 => Some(Material::Fluid),
            _ => None,
        }
    }

    pub fn density(self, densities: &Densities) -> f32 {
        match self {
            Material::Jello => densities.jello,
            Material::Snow => densities.snow,
            Material::Fluid => densities.fluid,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParticleKinematics {
    pub pos: Vec3,
    pub material: Material, // immutable after creation
    pub vel: Vec3,
    pub mass: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaterialState {
    /// Total deformation gradient.
    pub f: Mat3,
    /// Elastic part, snow only.
    pub fe: Mat3,
    /// Plastic part, snow only.
    pub fp: Mat3,
    /// Affine velocity matrix. Carried in the layout but unused by the transfers.
    pub c: Mat3,
    /// Volume ratio, fluid only.
    pub j: f32,
    pub volume: f32,
}

impl MaterialState {
    pub fn undeformed(volume: f32) -> Self {
        Self {
            f: Mat3::IDENTITY,
            fe: Mat3::IDENTITY,
            fp: Mat3::IDENTITY,
            c: Mat3::ZERO,
            j: 1.0,
            volume,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ParticlePool {
    pub(crate) kinematics: Vec<ParticleKinematics>,
    pub(crate) states: Vec<MaterialState>,
}

impl ParticlePool {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            kinematics: Vec::with_capacity(capacity),
            states: Vec::with_capacity(capacity),
        }
    }

    /// Builds a pool from prepared records. Both arrays must be co-indexed.
    pub fn from_records(
        kinematics: Vec<ParticleKinematics>,
        states: Vec<MaterialState>,
    ) -> Result<Self> {
        if kinematics.len() != states.len() {
            return Err(ConfigError::ParticleCountMismatch {
                expected: kinematics.len(),
                actual: states.len(),
            });
        }
        Ok(Self { kinematics, states })
    }

    /// Adds an undeformed particle with mass derived from the material density.
    pub fn spawn(&mut self, pos: Vec3, vel: Vec3, material: Material, config: &SimConfig) {
        let volume = config.reference_volume();
        self.kinematics.push(ParticleKinematics {
            pos,
            material,
            vel,
            mass: material.density(&config.densities) * volume,
        });
        self.states.push(MaterialState::undeformed(volume));
    }

    pub fn len(&self) -> usize {
        self.kinematics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinematics.is_empty()
    }

    pub fn kinematics(&self) -> &[ParticleKinematics] {
        &self.kinematics
    }

    pub fn states(&self) -> &[MaterialState] {
        &self.states
    }

    pub fn total_mass(&self) -> f32 {
        self.kinematics.iter().map(|p| p.mass).sum()
    }

    pub fn count(&self, material: Material) -> usize {
        self.kinematics
            .iter()
            .filter(|p| p.material == material)
            .count()
    }
}
