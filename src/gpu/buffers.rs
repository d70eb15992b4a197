use bevy::prelude::*;
use bevy::render::extract_resource::ExtractResource;
use bevy::render::render_resource::{
    BindGroup, BindGroupEntry, BindGroupLayout, BindGroupLayoutEntry, BindingType, Buffer,
    BufferBindingType, BufferDescriptor, BufferInitDescriptor, BufferUsages, Maintain, MapMode,
    ShaderStages,
};
use bevy::render::renderer::{RenderDevice, RenderQueue};
use bevy::render::{Extract, ExtractSchedule, Render, RenderApp, RenderSet};

use crate::cpu::solver::MpmSolver;
use crate::gpu::ffi::{
    GpuActiveArgs, GpuCompactionSlot, GpuGridNode, GpuParticleKinematics, GpuParticleState,
    GpuSimParams,
};
use crate::gpu::pipeline::{add_mpm_node_to_graph, prepare_mpm_pipelines};
use crate::gpu::readback::{MapStage, MapState, ReadbackPoll};
use crate::gpu::timestamps::{
    GpuTimestampQueries, GpuTimestamps, mark_timestamps_submitted, read_gpu_timestamps,
};

// ==================== resources ======================================

/* group 0: 0 params (uniform), 1 kinematics, 2 states, 3 grid, 4 compaction
group 1: 0 active args, must not be bound while it is an indirect dispatch source */
#[derive(Resource, Clone)]
pub struct MpmBindGroupLayout {
    pub main: BindGroupLayout,
    pub active_args: BindGroupLayout,
}

#[derive(Resource, Clone, ExtractResource)]
pub struct MpmBindGroup {
    pub main: BindGroup,
    pub active_args: BindGroup,
}

/// Device buffers for one simulation, created once from the initial solver state.
#[derive(Resource)]
pub struct MpmBuffers {
    pub params: Buffer,
    pub kinematics: Buffer,
    pub states: Buffer,
    pub grid: Buffer,
    pub compaction: Buffer,
    pub active_args: Buffer,
    pub num_particles: u32,
    pub num_nodes: u32,
    pub num_padded: u32,
    pub sweep_count: u32,
    pub substeps: u32,
    pub use_compaction: bool,
}

// Rendering world copy
#[derive(Resource, Clone, ExtractResource)]
pub struct ExtractedMpmBuffers {
    pub params: Buffer,
    pub kinematics: Buffer,
    pub states: Buffer,
    pub grid: Buffer,
    pub compaction: Buffer,
    pub active_args: Buffer,
    pub num_particles: u32,
    pub num_nodes: u32,
    pub num_padded: u32,
    pub sweep_count: u32,
    pub substeps: u32,
    pub use_compaction: bool,
}

/// When false the compute node records nothing and the particles freeze.
#[derive(Resource, Clone, Copy, ExtractResource)]
pub struct GpuStepping(pub bool);

impl Default for GpuStepping {
    fn default() -> Self {
        Self(true)
    }
}

/// Copy the kinematics buffer into [`ReadbackBuffer`] at the end of this frame.
#[derive(Resource, Clone, Copy, Default, ExtractResource)]
pub struct AllowCopy(pub bool);

/// Host-mappable mirror of the particle kinematics.
#[derive(Resource, Clone, ExtractResource)]
pub struct ReadbackBuffer {
    pub buffer: Buffer,
    pub size: u64,
    pub state: MapState,
}

// =====================================================================

// ========================== systems ==================================

fn init_mpm_buffers(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    render_queue: Res<RenderQueue>,
    solver: Option<Res<MpmSolver>>,
) {
    let Some(solver) = solver else {
        error!("GpuMpmPlugin needs an MpmSolver resource to seed the device buffers");
        return;
    };
    let buffers = MpmBuffers::new(&render_device, &solver);
    info!(
        "gpu buffers: {} particles, {} grid nodes ({} padded), {} substeps per frame",
        buffers.num_particles, buffers.num_nodes, buffers.num_padded, buffers.substeps
    );

    let size = buffers.kinematics.size();
    let readback = render_device.create_buffer(&BufferDescriptor {
        label: Some("mpm_readback_buffer"),
        size,
        usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    commands.insert_resource(ReadbackBuffer {
        buffer: readback,
        size,
        state: MapState::default(),
    });
    if solver.config().record_timestamps {
        if let Some(queries) = GpuTimestampQueries::new(&render_device, &render_queue, buffers.substeps) {
            info!("gpu timestamps: {} queries per frame", queries.count);
            commands.insert_resource(queries);
        }
    }
    commands.insert_resource(buffers);
}

fn buffer_entry(binding: u32, ty: BufferBindingType) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn init_mpm_bind_group_layout(mut commands: Commands, render_device: Res<RenderDevice>) {
    let rw = BufferBindingType::Storage { read_only: false };
    let main = render_device.create_bind_group_layout(
        Some("mpm_bind_group_layout"),
        &[
            buffer_entry(0, BufferBindingType::Uniform),
            buffer_entry(1, rw),
            buffer_entry(2, rw),
            buffer_entry(3, rw),
            buffer_entry(4, rw),
        ],
    );
    let active_args = render_device.create_bind_group_layout(
        Some("mpm_active_args_layout"),
        &[buffer_entry(0, rw)],
    );
    commands.insert_resource(MpmBindGroupLayout { main, active_args });
}

// Extract systems that send from App to Render

fn extract_mpm_buffers(mut commands: Commands, buffers: Extract<Option<Res<MpmBuffers>>>) {
    let Some(b) = buffers.as_ref() else {
        return;
    };
    commands.insert_resource(ExtractedMpmBuffers {
        params: b.params.clone(),
        kinematics: b.kinematics.clone(),
        states: b.states.clone(),
        grid: b.grid.clone(),
        compaction: b.compaction.clone(),
        active_args: b.active_args.clone(),
        num_particles: b.num_particles,
        num_nodes: b.num_nodes,
        num_padded: b.num_padded,
        sweep_count: b.sweep_count,
        substeps: b.substeps,
        use_compaction: b.use_compaction,
    });
}

fn extract_bind_group_layout(
    mut commands: Commands,
    layout: Extract<Option<Res<MpmBindGroupLayout>>>,
) {
    if let Some(layout) = layout.as_ref() {
        commands.insert_resource(MpmBindGroupLayout::clone(layout));
    }
}

fn extract_controls(
    mut commands: Commands,
    stepping: Extract<Res<GpuStepping>>,
    allow_copy: Extract<Res<AllowCopy>>,
    readback: Extract<Option<Res<ReadbackBuffer>>>,
    timestamps: Extract<Option<Res<GpuTimestampQueries>>>,
) {
    commands.insert_resource(**stepping);
    commands.insert_resource(**allow_copy);
    if let Some(readback) = readback.as_ref() {
        commands.insert_resource(ReadbackBuffer::clone(readback));
    }
    if let Some(timestamps) = timestamps.as_ref() {
        commands.insert_resource(GpuTimestampQueries::clone(timestamps));
    }
}

// Render world systems

fn prepare_mpm_bind_group(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    layout: Option<Res<MpmBindGroupLayout>>,
    extracted: Option<Res<ExtractedMpmBuffers>>,
) {
    let (Some(layout), Some(b)) = (layout, extracted) else {
        return;
    };
    let main = render_device.create_bind_group(
        Some("mpm_bind_group"),
        &layout.main,
        &[
            BindGroupEntry {
                binding: 0,
                resource: b.params.as_entire_binding(),
            },
            BindGroupEntry {
                binding: 1,
                resource: b.kinematics.as_entire_binding(),
            },
            BindGroupEntry {
                binding: 2,
                resource: b.states.as_entire_binding(),
            },
            BindGroupEntry {
                binding: 3,
                resource: b.grid.as_entire_binding(),
            },
            BindGroupEntry {
                binding: 4,
                resource: b.compaction.as_entire_binding(),
            },
        ],
    );
    let active_args = render_device.create_bind_group(
        Some("mpm_active_args_bind_group"),
        &layout.active_args,
        &[BindGroupEntry {
            binding: 0,
            resource: b.active_args.as_entire_binding(),
        }],
    );
    commands.insert_resource(MpmBindGroup { main, active_args });
}

// Implementations

impl MpmBuffers {
    pub fn new(render_device: &RenderDevice, solver: &MpmSolver) -> Self {
        let config = solver.config();
        let grid = solver.grid_desc();
        let particles = solver.particles();

        let kinematics: Vec<GpuParticleKinematics> =
            particles.kinematics().iter().map(Into::into).collect();
        let states: Vec<GpuParticleState> = particles.states().iter().map(Into::into).collect();
        let params = GpuSimParams::new(config, grid, kinematics.len() as u32);

        let params_buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("mpm_params"),
            contents: bytemuck::bytes_of(&params),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });
        let kinematics_buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("mpm_particle_kinematics"),
            contents: bytemuck::cast_slice(&kinematics),
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
        });
        let states_buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("mpm_particle_states"),
            contents: bytemuck::cast_slice(&states),
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
        });

        // grid and compaction contents are rebuilt by the kernels every substep
        let grid_buffer = render_device.create_buffer(&BufferDescriptor {
            label: Some("mpm_grid_nodes"),
            size: (grid.num_nodes as usize * size_of::<GpuGridNode>()) as u64,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let compaction_buffer = render_device.create_buffer(&BufferDescriptor {
            label: Some("mpm_compaction"),
            size: (grid.num_padded as usize * size_of::<GpuCompactionSlot>()) as u64,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let active_args = render_device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("mpm_active_args"),
            contents: bytemuck::bytes_of(&GpuActiveArgs::default()),
            usage: BufferUsages::STORAGE | BufferUsages::INDIRECT | BufferUsages::COPY_SRC,
        });

        Self {
            params: params_buffer,
            kinematics: kinematics_buffer,
            states: states_buffer,
            grid: grid_buffer,
            compaction: compaction_buffer,
            active_args,
            num_particles: kinematics.len() as u32,
            num_nodes: grid.num_nodes,
            num_padded: grid.num_padded,
            sweep_count: grid.sweep_count,
            substeps: config.substeps_per_frame.min(config.frame_budget.max_substeps).max(1),
            use_compaction: config.use_compaction,
        }
    }
}

impl ReadbackBuffer {
    /// Starts mapping the buffer. Call once the copy filled by [`AllowCopy`]
    /// has been submitted, and keep [`AllowCopy`] off until the read is done.
    /// False while an earlier request is still in flight.
    pub fn request_map(&self) -> bool {
        if !self.state.advance(MapStage::Idle, MapStage::Pending) {
            return false;
        }
        self.buffer
            .slice(..)
            .map_async(MapMode::Read, self.state.callback::<wgpu::BufferAsyncError>());
        true
    }

    /// Polls the device once and returns the particles when the map landed.
    pub fn try_read(&self, render_device: &RenderDevice) -> ReadbackPoll<Vec<GpuParticleKinematics>> {
        render_device.poll(Maintain::Poll);
        match self.state.stage() {
            MapStage::Pending => ReadbackPoll::Pending,
            MapStage::Mapped => {
                let particles = {
                    let data = self.buffer.slice(..).get_mapped_range();
                    bytemuck::cast_slice::<u8, GpuParticleKinematics>(&data).to_vec()
                };
                self.buffer.unmap();
                self.state.reset();
                ReadbackPoll::Ready(particles)
            }
            MapStage::Failed => {
                self.state.reset();
                ReadbackPoll::Failed
            }
            _ => ReadbackPoll::Idle,
        }
    }

    /// Synchronous readback for tests and tools. Stalls the calling thread
    /// until the device is idle and the map has landed, so frame loops
    /// should use [`Self::request_map`] and [`Self::try_read`] instead.
    /// `None` if mapping fails.
    pub fn read_particles(&self, render_device: &RenderDevice) -> Option<Vec<GpuParticleKinematics>> {
        render_device.poll(Maintain::Wait);
        self.request_map();
        loop {
            match self.try_read(render_device) {
                ReadbackPoll::Pending => std::thread::yield_now(),
                ReadbackPoll::Ready(particles) => return Some(particles),
                ReadbackPoll::Failed | ReadbackPoll::Idle => return None,
            }
        }
    }
}

// =====================================================================

// Plugin

/// Runs the substep pipeline as compute passes in the render graph.
/// Expects an [`MpmSolver`] resource holding the initial scene.
pub struct GpuMpmPlugin;

impl Plugin for GpuMpmPlugin {
    fn build(&self, app: &mut App) {
        // App
        app.init_resource::<GpuStepping>()
            .init_resource::<AllowCopy>()
            .init_resource::<GpuTimestamps>()
            .add_systems(Startup, (init_mpm_buffers, init_mpm_bind_group_layout))
            .add_systems(
                Update,
                read_gpu_timestamps.run_if(resource_exists::<GpuTimestampQueries>),
            );

        // Render
        let render_app = app.sub_app_mut(RenderApp);
        render_app
            .add_systems(
                ExtractSchedule,
                (extract_mpm_buffers, extract_bind_group_layout, extract_controls),
            )
            .add_systems(
                Render,
                (
                    prepare_mpm_bind_group.in_set(RenderSet::Prepare),
                    prepare_mpm_pipelines.in_set(RenderSet::Prepare),
                    mark_timestamps_submitted.in_set(RenderSet::Cleanup),
                ),
            );

        add_mpm_node_to_graph(render_app);
    }
}
