//! Host-side orchestration of the substep pipeline on the CPU.

use std::time::Instant;

use bevy::log::{debug, warn};
use bevy::prelude::*;
use glam::Vec3 as GVec3;

use crate::config::{GridDescriptor, SimConfig};
use crate::cpu::compaction::Compaction;
use crate::cpu::grid::GridPool;
use crate::cpu::kernels::{self, NodeSet};
use crate::cpu::particles::{Material, ParticleKinematics, ParticlePool};
use crate::error::{ConfigError, Result};

/// Named dispatches of one substep, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kernel {
    ClearGrid,
    P2g,
    ClearCompaction,
    GetCriteria,
    UpSweep,
    SetRootToZero,
    DownSweep,
    Scatter,
    AddGravity,
    AddMaterialForce,
    UpdateVelocity,
    SetBoundary,
    EvolveDeformation,
    G2p,
}

impl Kernel {
    pub fn label(self) -> &'static str {
        match self {
            Kernel::ClearGrid => "clear_grid",
            Kernel::P2g => "p2g",
            Kernel::ClearCompaction => "clear_compaction",
            Kernel::GetCriteria => "get_criteria",
            Kernel::UpSweep => "up_sweep",
            Kernel::SetRootToZero => "set_root_to_zero",
            Kernel::DownSweep => "down_sweep",
            Kernel::Scatter => "scatter",
            Kernel::AddGravity => "add_gravity",
            Kernel::AddMaterialForce => "add_material_force",
            Kernel::UpdateVelocity => "update_velocity",
            Kernel::SetBoundary => "set_boundary",
            Kernel::EvolveDeformation => "evolve_deformation",
            Kernel::G2p => "g2p",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct KernelTimestamp {
    pub kernel: Kernel,
    pub start: Instant,
    pub end: Instant,
}

#[derive(Debug, Default)]
struct Timeline {
    enabled: bool,
    records: Vec<KernelTimestamp>,
}

impl Timeline {
    fn record<R>(&mut self, kernel: Kernel, f: impl FnOnce() -> R) -> R {
        if !self.enabled {
            return f();
        }
        let start = Instant::now();
        let out = f();
        self.records.push(KernelTimestamp {
            kernel,
            start,
            end: Instant::now(),
        });
        out
    }
}

/// Guard counters gathered while stepping. Non-zero values mean the scene is
/// leaving the regime the integrator handles well.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepReport {
    pub substeps: u32,
    /// Stencils pulled inward because they reached past the grid.
    pub clamped_stencils: usize,
    /// Particles whose advected position was clamped to the domain.
    pub escaped_particles: usize,
    /// Fluid particles whose J hit the configured floor.
    pub clamped_fluid_j: usize,
    /// Active nodes in the last substep (0 when compaction is off).
    pub active_nodes: usize,
}

impl StepReport {
    pub fn merge(&mut self, other: StepReport) {
        self.substeps += other.substeps;
        self.clamped_stencils += other.clamped_stencils;
        self.escaped_particles += other.escaped_particles;
        self.clamped_fluid_j += other.clamped_fluid_j;
        self.active_nodes = other.active_nodes;
    }

    pub fn has_anomalies(&self) -> bool {
        self.clamped_stencils + self.escaped_particles + self.clamped_fluid_j > 0
    }
}

#[derive(Resource)]
pub struct MpmSolver {
    config: SimConfig,
    grid: GridPool,
    particles: ParticlePool,
    compaction: Compaction,
    timeline: Timeline,
    time: f32,
    steps: u64,
}

impl MpmSolver {
    /// Validates the configuration and the initial particles, then allocates the grid.
    pub fn new(config: SimConfig, particles: ParticlePool) -> Result<Self> {
        let desc = config.validate()?;
        if let Some((index, p)) = particles
            .kinematics()
            .iter()
            .enumerate()
            .find(|(_, p)| !desc.contains(p.pos))
        {
            return Err(ConfigError::ParticleOutsideDomain {
                index,
                position: p.pos.to_array(),
            });
        }

        Ok(Self {
            timeline: Timeline {
                enabled: config.record_timestamps,
                records: Vec::new(),
            },
            compaction: Compaction::for_grid(&desc),
            grid: GridPool::new(desc),
            particles,
            config,
            time: 0.0,
            steps: 0,
        })
    }

    /// Runs the eight stages once, advancing the simulation by `dt`.
    pub fn substep(&mut self) -> StepReport {
        let Self {
            config,
            grid,
            particles,
            compaction,
            timeline,
            ..
        } = self;
        let ParticlePool { kinematics, states } = particles;
        let (config, grid): (&SimConfig, &GridPool) = (config, grid);
        let mut report = StepReport {
            substeps: 1,
            ..Default::default()
        };

        timeline.record(Kernel::ClearGrid, || kernels::clear_grid(grid));
        report.clamped_stencils = timeline.record(Kernel::P2g, || kernels::p2g(grid, kinematics));

        let nodes = if config.use_compaction {
            timeline.record(Kernel::ClearCompaction, || compaction.clear());
            timeline.record(Kernel::GetCriteria, || compaction.get_criteria(grid));
            timeline.record(Kernel::UpSweep, || compaction.up_sweep());
            timeline.record(Kernel::SetRootToZero, || compaction.set_root_to_zero());
            timeline.record(Kernel::DownSweep, || compaction.down_sweep());
            timeline.record(Kernel::Scatter, || compaction.scatter());
            report.active_nodes = compaction.active_len();
            NodeSet::Active(&*compaction)
        } else {
            NodeSet::All(grid.len())
        };

        timeline.record(Kernel::AddGravity, || kernels::add_gravity(config, grid, nodes));
        timeline.record(Kernel::AddMaterialForce, || {
            kernels::add_material_force(config, grid, kinematics, states)
        });
        timeline.record(Kernel::UpdateVelocity, || kernels::update_velocity(config, grid, nodes));
        timeline.record(Kernel::SetBoundary, || kernels::set_boundary(config, grid, nodes));
        report.clamped_fluid_j = timeline.record(Kernel::EvolveDeformation, || {
            kernels::evolve_deformation(config, grid, kinematics, states)
        });
        report.escaped_particles =
            timeline.record(Kernel::G2p, || kernels::g2p(config, grid, kinematics));

        self.time += self.config.dt;
        self.steps += 1;
        report
    }

    /// Runs the substeps of one rendered frame, stopping early when the frame
    /// budget runs out. At least one substep always runs.
    ///
    /// Kernel timestamps left over from earlier frames are dropped, so only
    /// the latest frame is kept when nobody drains them.
    pub fn step_frame(&mut self) -> StepReport {
        self.timeline.records.clear();
        let budget = self.config.frame_budget;
        let target = self.config.substeps_per_frame.min(budget.max_substeps).max(1);
        let started = Instant::now();
        let mut report = StepReport::default();

        for _ in 0..target {
            report.merge(self.substep());
            if budget
                .wall_clock
                .is_some_and(|limit| started.elapsed() >= limit)
            {
                break;
            }
        }

        if report.substeps < self.config.substeps_per_frame {
            debug!(
                "frame budget: ran {} of {} substeps",
                report.substeps, self.config.substeps_per_frame
            );
        }
        if report.has_anomalies() {
            warn!(
                "step {}: {} clamped stencils, {} escaped particles, {} clamped fluid J",
                self.steps,
                report.clamped_stencils,
                report.escaped_particles,
                report.clamped_fluid_j
            );
        }
        report
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn grid_desc(&self) -> &GridDescriptor {
        &self.grid.desc
    }

    pub fn grid(&self) -> &GridPool {
        &self.grid
    }

    pub fn particles(&self) -> &ParticlePool {
        &self.particles
    }

    pub fn compaction(&self) -> &Compaction {
        &self.compaction
    }

    /// Simulated seconds so far.
    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Positions with their material tag, for rendering.
    pub fn positions(&self) -> impl Iterator<Item = (GVec3, Material)> + '_ {
        self.particles
            .kinematics()
            .iter()
            .map(|p| (p.pos, p.material))
    }

    pub fn velocities(&self) -> impl Iterator<Item = GVec3> + '_ {
        self.particles.kinematics().iter().map(|p| p.vel)
    }

    /// Replaces the particle kinematics, e.g. with a GPU readback.
    /// Material state is kept, so the count, material tags and masses must
    /// not change. Nothing is replaced when a record is rejected.
    pub fn load_kinematics(&mut self, kinematics: Vec<ParticleKinematics>) -> Result<()> {
        if kinematics.len() != self.particles.len() {
            return Err(ConfigError::ParticleCountMismatch {
                expected: self.particles.len(),
                actual: kinematics.len(),
            });
        }
        let current = self.particles.kinematics();
        for (index, (new, old)) in kinematics.iter().zip(current).enumerate() {
            let field = if new.material != old.material {
                "material"
            } else if new.mass != old.mass {
                "mass"
            } else {
                continue;
            };
            return Err(ConfigError::FixedParticleFieldChanged { index, field });
        }
        self.particles.kinematics = kinematics;
        Ok(())
    }

    /// Drains the kernel timestamps recorded since the last call, or since
    /// the start of the latest frame.
    pub fn take_timestamps(&mut self) -> Vec<KernelTimestamp> {
        std::mem::take(&mut self.timeline.records)
    }
}

/// Advances the [`MpmSolver`] resource by one frame every `Update`.
pub struct MpmCpuPlugin;

impl Plugin for MpmCpuPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Update, step_solver.run_if(resource_exists::<MpmSolver>));
    }
}

fn step_solver(mut solver: ResMut<MpmSolver>) {
    solver.step_frame();
}
