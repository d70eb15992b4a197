//! The substep kernels, one function per dispatch.
//!
//! Each kernel runs one logical thread per particle or per grid node through
//! rayon. Particle records are only ever touched by their own thread. Grid
//! fields shared between particles are updated through atomics.

use glam::{Mat3, Vec3};
use rayon::prelude::*;

use crate::config::{SimConfig, WallKind};
use crate::cpu::compaction::Compaction;
use crate::cpu::constitutive::{project_snow, stress_term};
use crate::cpu::grid::GridPool;
use crate::cpu::interp::Stencil;
use crate::cpu::particles::{Material, MaterialState, ParticleKinematics};

/// Which grid nodes a per-node kernel visits.
#[derive(Clone, Copy, Debug)]
pub enum NodeSet<'a> {
    All(usize),
    Active(&'a Compaction),
}

impl NodeSet<'_> {
    fn for_each<F>(self, f: F)
    where
        F: Fn(usize) + Sync + Send,
    {
        match self {
            NodeSet::All(n) => (0..n).into_par_iter().for_each(f),
            NodeSet::Active(compaction) => compaction.active().for_each(f),
        }
    }
}

pub fn clear_grid(grid: &GridPool) {
    grid.clear();
}

/// Scatters mass and momentum. Returns how many stencils had to be clamped.
pub fn p2g(grid: &GridPool, particles: &[ParticleKinematics]) -> usize {
    let desc = &grid.desc;
    particles
        .par_iter()
        .map(|p| {
            let stencil = Stencil::new(desc, p.pos);
            for n in stencil.nodes(desc) {
                let node = grid.node(n.index);
                let m = p.mass * n.weight;
                node.mass.fetch_add(m);
                node.v_old.fetch_add(p.vel * m);
            }
            usize::from(stencil.clamped)
        })
        .sum()
}

/// Turns momentum into velocity and seeds the force with gravity.
pub fn add_gravity(config: &SimConfig, grid: &GridPool, nodes: NodeSet<'_>) {
    nodes.for_each(|i| {
        let node = grid.node(i);
        let mass = node.mass.load();
        if mass > 0.0 {
            node.v_old.store(node.v_old.load() / mass);
            node.force.store(config.gravity * mass);
        }
    });
}

/// Scatters the stress-divergence force of every particle.
pub fn add_material_force(
    config: &SimConfig,
    grid: &GridPool,
    particles: &[ParticleKinematics],
    states: &[MaterialState],
) {
    let desc = &grid.desc;
    particles
        .par_iter()
        .zip(states.par_iter())
        .for_each(|(p, state)| {
            let term = stress_term(p.material, state, config);
            let stencil = Stencil::new(desc, p.pos);
            for n in stencil.nodes(desc) {
                grid.node(n.index).force.fetch_add(term.force(n.grad));
            }
        });
}

/// Symplectic Euler on the grid. Empty nodes keep a zero velocity.
pub fn update_velocity(config: &SimConfig, grid: &GridPool, nodes: NodeSet<'_>) {
    let dt = config.dt;
    nodes.for_each(|i| {
        let node = grid.node(i);
        let mass = node.mass.load();
        if mass > 0.0 {
            node.v_new
                .store(node.v_old.load() + node.force.load() * (dt / mass));
        }
    });
}

pub fn set_boundary(config: &SimConfig, grid: &GridPool, nodes: NodeSet<'_>) {
    let desc = &grid.desc;
    let boundary = &config.boundary;
    let t = boundary.thickness;
    nodes.for_each(|i| {
        let coord = desc.node_coord(i).to_array();
        let dims = desc.dims.to_array();
        let node = grid.node(i);
        let mut v = node.v_new.load();

        for axis in 0..3 {
            let faces = [
                (coord[axis] < t, boundary.min_walls[axis]),
                (coord[axis] + t >= dims[axis], boundary.max_walls[axis]),
            ];
            for (inside, wall) in faces {
                if !inside {
                    continue;
                }
                match wall {
                    WallKind::Slip => v[axis] = 0.0,
                    WallKind::Sticky => v = Vec3::ZERO,
                }
            }
        }
        node.v_new.store(v);
    });
}

/// Advances F, the snow split, or fluid J from the grid velocity gradient.
/// Returns how many fluid particles hit the J floor.
pub fn evolve_deformation(
    config: &SimConfig,
    grid: &GridPool,
    particles: &[ParticleKinematics],
    states: &mut [MaterialState],
) -> usize {
    let desc = &grid.desc;
    let dt = config.dt;
    particles
        .par_iter()
        .zip(states.par_iter_mut())
        .map(|(p, state)| {
            let stencil = Stencil::new(desc, p.pos);
            match p.material {
                Material::Fluid => {
                    let div: f32 = stencil
                        .nodes(desc)
                        .map(|n| grid.node(n.index).v_new.load().dot(n.grad))
                        .sum();
                    let j = state.j * (1.0 + dt * div);
                    state.j = j.max(config.fluid.min_j);
                    usize::from(j < config.fluid.min_j)
                }
                material => {
                    let mut grad_v = Mat3::ZERO;
                    for n in stencil.nodes(desc) {
                        let v = grid.node(n.index).v_new.load();
                        grad_v += Mat3::from_cols(v * n.grad.x, v * n.grad.y, v * n.grad.z);
                    }
                    let step = Mat3::IDENTITY + grad_v * dt;
                    if material == Material::Snow {
                        let (fe, fp) = project_snow(step * state.fe, state.fp, &config.snow);
                        state.fe = fe;
                        state.fp = fp;
                        state.f = fe * fp;
                    } else {
                        state.f = step * state.f;
                    }
                    0
                }
            }
        })
        .sum()
}

/// Gathers PIC/FLIP velocities and advects with the PIC part.
/// Returns how many particles had to be pulled back inside the domain.
pub fn g2p(config: &SimConfig, grid: &GridPool, particles: &mut [ParticleKinematics]) -> usize {
    let desc = &grid.desc;
    let (lo, hi) = (desc.origin, desc.max_corner());
    let flip = config.flip_ratio;
    particles
        .par_iter_mut()
        .map(|p| {
            let stencil = Stencil::new(desc, p.pos);
            let mut v_pic = Vec3::ZERO;
            let mut v_flip = p.vel;
            for n in stencil.nodes(desc) {
                let node = grid.node(n.index);
                let v_new = node.v_new.load();
                v_pic += v_new * n.weight;
                v_flip += (v_new - node.v_old.load()) * n.weight;
            }
            p.vel = v_pic * (1.0 - flip) + v_flip * flip;

            let advected = p.pos + v_pic * config.dt;
            p.pos = advected.clamp(lo, hi);
            usize::from(p.pos != advected)
        })
        .sum()
}
