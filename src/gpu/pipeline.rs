use std::borrow::Cow;

use bevy::prelude::*;
use bevy::render::graph::CameraDriverLabel;
use bevy::render::render_graph::{
    Node, NodeRunError, RenderGraph, RenderGraphContext, RenderLabel,
};
use bevy::render::render_resource::{
    CachedComputePipelineId, CachedPipelineState, ComputePass, ComputePassDescriptor,
    ComputePipeline, ComputePipelineDescriptor, PipelineCache, PushConstantRange, ShaderDefVal,
};
use bevy::render::renderer::RenderContext;

use crate::gpu::buffers::{
    AllowCopy, ExtractedMpmBuffers, GpuStepping, MpmBindGroup, MpmBindGroupLayout,
    ReadbackBuffer,
};
use crate::gpu::ffi::workgroups;
use crate::gpu::timestamps::{GpuPass, GpuTimestampQueries};

/// Shader modules imported by the kernels. They only need to be loaded.
const IMPORTED_SHADERS: [&str; 2] = ["shaders/mpm_types.wgsl", "shaders/mpm_svd.wgsl"];

/// Every compute entry point of one substep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Pass {
    ClearGrid,
    P2g,
    ClearCompaction,
    GetCriteria,
    UpSweep,
    SetRootToZero,
    DownSweep,
    Scatter,
    WriteActiveArgs,
    AddGravity,
    AddMaterialForce,
    UpdateVelocity,
    SetBoundary,
    EvolveDeformation,
    G2p,
}

impl Pass {
    pub const ALL: [Pass; 15] = [
        Pass::ClearGrid,
        Pass::P2g,
        Pass::ClearCompaction,
        Pass::GetCriteria,
        Pass::UpSweep,
        Pass::SetRootToZero,
        Pass::DownSweep,
        Pass::Scatter,
        Pass::WriteActiveArgs,
        Pass::AddGravity,
        Pass::AddMaterialForce,
        Pass::UpdateVelocity,
        Pass::SetBoundary,
        Pass::EvolveDeformation,
        Pass::G2p,
    ];

    /// `(shader asset, entry point)`
    pub fn source(self) -> (&'static str, &'static str) {
        match self {
            Pass::ClearGrid => ("shaders/clear_grid.wgsl", "clear_grid"),
            Pass::P2g => ("shaders/p2g.wgsl", "p2g"),
            Pass::ClearCompaction => ("shaders/compaction.wgsl", "clear"),
            Pass::GetCriteria => ("shaders/compaction.wgsl", "get_criteria"),
            Pass::UpSweep => ("shaders/compaction.wgsl", "up_sweep"),
            Pass::SetRootToZero => ("shaders/compaction.wgsl", "set_root_to_zero"),
            Pass::DownSweep => ("shaders/compaction.wgsl", "down_sweep"),
            Pass::Scatter => ("shaders/compaction.wgsl", "scatter"),
            Pass::WriteActiveArgs => ("shaders/compaction.wgsl", "write_active_args"),
            Pass::AddGravity => ("shaders/grid_forces.wgsl", "add_gravity"),
            Pass::AddMaterialForce => ("shaders/material_force.wgsl", "add_material_force"),
            Pass::UpdateVelocity => ("shaders/update_grid.wgsl", "update_velocity"),
            Pass::SetBoundary => ("shaders/update_grid.wgsl", "set_boundary"),
            Pass::EvolveDeformation => ("shaders/evolve.wgsl", "evolve_deformation"),
            Pass::G2p => ("shaders/g2p.wgsl", "g2p"),
        }
    }

    /// Kernels that run one invocation per grid node and may use the active list.
    fn per_node(self) -> bool {
        matches!(self, Pass::AddGravity | Pass::UpdateVelocity | Pass::SetBoundary)
    }
}

#[derive(Resource)]
pub struct MpmPipelines(pub Vec<ComputePipeline>);

impl MpmPipelines {
    fn get(&self, pass: Pass) -> &ComputePipeline {
        &self.0[pass as usize]
    }
}

#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
pub struct MpmPassLabel;

#[derive(Default)]
struct MpmNode;

struct Dispatcher<'a> {
    pipelines: &'a MpmPipelines,
    bind_group: &'a MpmBindGroup,
    buffers: &'a ExtractedMpmBuffers,
}

impl Dispatcher<'_> {
    fn dispatch(&self, pass: &mut ComputePass<'_>, kernel: Pass) {
        let b = self.buffers;
        pass.set_pipeline(self.pipelines.get(kernel));
        pass.set_bind_group(0, &self.bind_group.main, &[]);

        if kernel.per_node() && b.use_compaction {
            pass.dispatch_workgroups_indirect(&b.active_args, 0);
            return;
        }
        let invocations = match kernel {
            Pass::ClearGrid
            | Pass::GetCriteria
            | Pass::AddGravity
            | Pass::UpdateVelocity
            | Pass::SetBoundary => b.num_nodes,
            Pass::ClearCompaction
            | Pass::UpSweep
            | Pass::SetRootToZero
            | Pass::DownSweep
            | Pass::Scatter => b.num_padded,
            Pass::WriteActiveArgs => 1,
            Pass::P2g | Pass::AddMaterialForce | Pass::EvolveDeformation | Pass::G2p => {
                b.num_particles
            }
        };
        pass.dispatch_workgroups(workgroups(invocations), 1, 1);
    }

    /// Records one substep. Dispatches inside a pass are ordered and see each
    /// other's writes. The active-list args are produced in a separate pass
    /// from the indirect dispatches that consume them.
    fn record_substep(
        &self,
        render_context: &mut RenderContext,
        substep: u32,
        timing: Option<&GpuTimestampQueries>,
    ) {
        let b = self.buffers;
        {
            let mut pass = render_context
                .command_encoder()
                .begin_compute_pass(&ComputePassDescriptor {
                    label: Some("mpm_transfer_pass"),
                    timestamp_writes: timing.and_then(|t| t.writes(substep, GpuPass::Transfer)),
                });
            self.dispatch(&mut pass, Pass::ClearGrid);
            self.dispatch(&mut pass, Pass::P2g);

            if b.use_compaction {
                self.dispatch(&mut pass, Pass::ClearCompaction);
                self.dispatch(&mut pass, Pass::GetCriteria);
                for _ in 0..b.sweep_count {
                    self.dispatch(&mut pass, Pass::UpSweep);
                }
                self.dispatch(&mut pass, Pass::SetRootToZero);
                for _ in 0..b.sweep_count {
                    self.dispatch(&mut pass, Pass::DownSweep);
                }
                self.dispatch(&mut pass, Pass::Scatter);

                pass.set_pipeline(self.pipelines.get(Pass::WriteActiveArgs));
                pass.set_bind_group(0, &self.bind_group.main, &[]);
                pass.set_bind_group(1, &self.bind_group.active_args, &[]);
                pass.dispatch_workgroups(1, 1, 1);
            }
        }

        let mut pass = render_context
            .command_encoder()
            .begin_compute_pass(&ComputePassDescriptor {
                label: Some("mpm_update_pass"),
                timestamp_writes: timing.and_then(|t| t.writes(substep, GpuPass::Update)),
            });
        for kernel in [
            Pass::AddGravity,
            Pass::AddMaterialForce,
            Pass::UpdateVelocity,
            Pass::SetBoundary,
            Pass::EvolveDeformation,
            Pass::G2p,
        ] {
            self.dispatch(&mut pass, kernel);
        }
    }
}

impl Node for MpmNode {
    fn run(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext,
        world: &World,
    ) -> Result<(), NodeRunError> {
        // nothing to do until the buffers and every pipeline exist
        let Some(pipelines) = world.get_resource::<MpmPipelines>() else { return Ok(()); };
        let Some(bind_group) = world.get_resource::<MpmBindGroup>() else { return Ok(()); };
        let Some(buffers) = world.get_resource::<ExtractedMpmBuffers>() else { return Ok(()); };

        let stepping = world.get_resource::<GpuStepping>().is_none_or(|s| s.0);
        if stepping && buffers.num_particles > 0 {
            let dispatcher = Dispatcher {
                pipelines,
                bind_group,
                buffers,
            };
            // skipped while the previous frame's timestamps are being read
            let timing = world
                .get_resource::<GpuTimestampQueries>()
                .filter(|queries| queries.begin_frame());
            for substep in 0..buffers.substeps {
                dispatcher.record_substep(render_context, substep, timing);
            }
            if let Some(queries) = timing {
                queries.resolve(render_context, buffers.substeps);
            }
        }

        let allow_copy = world.get_resource::<AllowCopy>().is_some_and(|c| c.0);
        if let (true, Some(readback)) = (allow_copy, world.get_resource::<ReadbackBuffer>()) {
            render_context.command_encoder().copy_buffer_to_buffer(
                &buffers.kinematics,
                0,
                &readback.buffer,
                0,
                readback.size,
            );
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct PipelineState {
    ids: Vec<CachedComputePipelineId>,
    shaders: Vec<Handle<Shader>>,
    reported: bool,
}

pub fn prepare_mpm_pipelines(
    mut commands: Commands,
    pipeline_cache: Res<PipelineCache>,
    layout: Option<Res<MpmBindGroupLayout>>,
    pipelines: Option<Res<MpmPipelines>>,
    mut state: Local<PipelineState>,
    assets: Res<AssetServer>,
) {
    let Some(layout) = layout else { return; };
    if pipelines.is_some() {
        return;
    }

    if state.ids.is_empty() {
        state.shaders = IMPORTED_SHADERS.iter().map(|path| assets.load(*path)).collect();
        let ids = Pass::ALL
            .iter()
            .map(|&pass| {
                let (path, entry) = pass.source();
                let mut layouts = vec![layout.main.clone()];
                if pass == Pass::WriteActiveArgs {
                    layouts.push(layout.active_args.clone());
                }
                pipeline_cache.queue_compute_pipeline(ComputePipelineDescriptor {
                    label: Some(format!("mpm_{entry}_pipeline").into()),
                    layout: layouts,
                    push_constant_ranges: Vec::<PushConstantRange>::new(),
                    shader: assets.load(path),
                    shader_defs: Vec::<ShaderDefVal>::new(),
                    entry_point: Cow::from(entry),
                    zero_initialize_workgroup_memory: false,
                })
            })
            .collect();
        state.ids = ids;
        return; // waits for compilation
    }

    let mut ready = Vec::with_capacity(state.ids.len());
    for (&id, pass) in state.ids.iter().zip(Pass::ALL) {
        match pipeline_cache.get_compute_pipeline_state(id) {
            CachedPipelineState::Ok(_) => {
                if let Some(pipeline) = pipeline_cache.get_compute_pipeline(id) {
                    ready.push(pipeline.clone());
                }
            }
            CachedPipelineState::Err(err) if !state.reported => {
                error!("mpm pipeline {:?} failed to compile: {err}", pass);
                state.reported = true;
                return;
            }
            _ => return,
        }
    }

    if ready.len() == Pass::ALL.len() {
        info!("mpm compute pipelines ready ({} kernels)", ready.len());
        commands.insert_resource(MpmPipelines(ready));
    }
}

pub fn add_mpm_node_to_graph(render_app: &mut bevy::app::SubApp) {
    let mut graph = render_app.world_mut().resource_mut::<RenderGraph>();
    graph.add_node(MpmPassLabel, MpmNode);
    graph.add_node_edge(MpmPassLabel, CameraDriverLabel);
}
