// plain-old-data mirrors of the WGSL structs in assets/shaders/mpm_types.wgsl
use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Vec3};

use crate::config::{GridDescriptor, SimConfig};
use crate::cpu::particles::{Material, MaterialState, ParticleKinematics};

pub const WORKGROUP_SIZE: u32 = 256;

/// Workgroups needed to cover `n` invocations.
pub fn workgroups(n: u32) -> u32 {
    n.max(1).div_ceil(WORKGROUP_SIZE)
}

// mat3x3<f32> columns are padded to 16 bytes
fn mat3_to_gpu(m: Mat3) -> [[f32; 4]; 3] {
    [m.x_axis, m.y_axis, m.z_axis].map(|c| c.extend(0.0).to_array())
}

fn mat3_from_gpu(cols: &[[f32; 4]; 3]) -> Mat3 {
    let [x, y, z] = cols.map(|c| Vec3::new(c[0], c[1], c[2]));
    Mat3::from_cols(x, y, z)
}

/// Uniform block shared by every kernel. Rows of 16 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuSimParams {
    pub gravity: [f32; 3],
    pub dt: f32,
    pub min_corner: [f32; 3],
    pub h: f32,
    pub max_corner: [f32; 3],
    pub flip_ratio: f32,
    pub grid_dims: [u32; 3],
    pub num_nodes: u32,
    pub num_particles: u32,
    pub num_padded: u32,
    pub boundary_thickness: u32,
    /// Bit `axis` for the low face, bit `3 + axis` for the high face.
    pub sticky_walls: u32,
    pub mu: f32,
    pub lambda: f32,
    pub e0: f32,
    pub nu_snow: f32,
    pub theta_c: f32,
    pub theta_s: f32,
    pub xi: f32,
    pub lambda_fluid: f32,
    pub gamma: f32,
    pub min_fluid_j: f32,
    pub use_compaction: u32,
    pub sweep_count: u32,
}

impl GpuSimParams {
    pub fn new(config: &SimConfig, grid: &GridDescriptor, num_particles: u32) -> Self {
        Self {
            gravity: config.gravity.to_array(),
            dt: config.dt,
            min_corner: grid.origin.to_array(),
            h: grid.cell_width,
            max_corner: grid.max_corner().to_array(),
            flip_ratio: config.flip_ratio,
            grid_dims: grid.dims.to_array(),
            num_nodes: grid.num_nodes,
            num_particles,
            num_padded: grid.num_padded,
            boundary_thickness: config.boundary.thickness,
            sticky_walls: config.boundary.sticky_mask(),
            mu: config.jello.mu(),
            lambda: config.jello.lambda(),
            e0: config.snow.e0,
            nu_snow: config.snow.poisson_ratio,
            theta_c: config.snow.theta_c,
            theta_s: config.snow.theta_s,
            xi: config.snow.xi,
            lambda_fluid: config.fluid.lambda,
            gamma: config.fluid.gamma,
            min_fluid_j: config.fluid.min_j,
            use_compaction: u32::from(config.use_compaction),
            sweep_count: grid.sweep_count,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuParticleKinematics {
    pub pos: [f32; 3],
    pub material: u32,
    pub vel: [f32; 3],
    pub mass: f32,
}

impl From<&ParticleKinematics> for GpuParticleKinematics {
    fn from(p: &ParticleKinematics) -> Self {
        Self {
            pos: p.pos.to_array(),
            material: p.material.tag(),
            vel: p.vel.to_array(),
            mass: p.mass,
        }
    }
}

impl GpuParticleKinematics {
    /// `None` when the material tag is corrupt.
    pub fn to_kinematics(&self) -> Option<ParticleKinematics> {
        Some(ParticleKinematics {
            pos: Vec3::from_array(self.pos),
            material: Material::from_tag(self.material)?,
            vel: Vec3::from_array(self.vel),
            mass: self.mass,
        })
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuParticleState {
    pub f: [[f32; 4]; 3],
    pub fe: [[f32; 4]; 3],
    pub fp: [[f32; 4]; 3],
    pub c: [[f32; 4]; 3],
    pub j: f32,
    pub volume: f32,
    pub _pad: [f32; 2],
}

impl From<&MaterialState> for GpuParticleState {
    fn from(s: &MaterialState) -> Self {
        Self {
            f: mat3_to_gpu(s.f),
            fe: mat3_to_gpu(s.fe),
            fp: mat3_to_gpu(s.fp),
            c: mat3_to_gpu(s.c),
            j: s.j,
            volume: s.volume,
            _pad: [0.0; 2],
        }
    }
}

impl From<&GpuParticleState> for MaterialState {
    fn from(s: &GpuParticleState) -> Self {
        Self {
            f: mat3_from_gpu(&s.f),
            fe: mat3_from_gpu(&s.fe),
            fp: mat3_from_gpu(&s.fp),
            c: mat3_from_gpu(&s.c),
            j: s.j,
            volume: s.volume,
        }
    }
}

/// Accessed as `array<atomic<u32>, N>` lanes by the scatter kernels.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct GpuGridNode {
    pub v_new: [f32; 4],
    pub v_old: [f32; 4],
    pub force: [f32; 3],
    pub mass: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct GpuCompactionSlot {
    pub criteria: u32,
    pub scan: u32,
    pub compact: u32,
    /// Sweep depth this slot has reached.
    pub depth: u32,
}

/// Indirect dispatch arguments followed by the active node count.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct GpuActiveArgs {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub count: u32,
}
