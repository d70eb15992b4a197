//! Device timestamps around the two compute passes of every substep.
//!
//! Enabled by [`SimConfig::record_timestamps`](crate::SimConfig) on adapters
//! with `TIMESTAMP_QUERY`. A frame only writes timestamps while the previous
//! readback is finished, so the map never blocks a submission.

use bevy::prelude::*;
use bevy::render::extract_resource::ExtractResource;
use bevy::render::render_resource::{Buffer, BufferDescriptor, BufferUsages, Maintain, MapMode};
use bevy::render::renderer::{RenderContext, RenderDevice, RenderQueue};

use crate::gpu::readback::{MapStage, MapState};

/// Begin and end of the transfer pass, then of the update pass.
pub const QUERIES_PER_SUBSTEP: u32 = 4;
/// Largest query set wgpu accepts.
const MAX_QUERIES: u32 = 4096;
/// Bytes per resolved query.
const QUERY_SIZE: u64 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum GpuPass {
    /// Grid clear, P2G and compaction.
    Transfer = 0,
    /// Grid update, deformation and G2P.
    Update = 1,
}

/// `(begin, end)` query slots of one pass.
pub fn query_indices(substep: u32, pass: GpuPass) -> (u32, u32) {
    let begin = substep * QUERIES_PER_SUBSTEP + pass as u32 * 2;
    (begin, begin + 1)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GpuPassTimestamp {
    pub substep: u32,
    pub pass: GpuPass,
    pub start_ns: f64,
    pub end_ns: f64,
}

impl GpuPassTimestamp {
    pub fn duration_ns(&self) -> f64 {
        (self.end_ns - self.start_ns).max(0.0)
    }
}

/// Turns resolved ticks, laid out by [`query_indices`], into nanoseconds.
pub fn decode(ticks: &[u64], period_ns: f32) -> Vec<GpuPassTimestamp> {
    let period = f64::from(period_ns);
    ticks
        .chunks_exact(2)
        .enumerate()
        .map(|(i, pair)| GpuPassTimestamp {
            substep: i as u32 / 2,
            pass: if i % 2 == 0 {
                GpuPass::Transfer
            } else {
                GpuPass::Update
            },
            start_ns: pair[0] as f64 * period,
            end_ns: pair[1] as f64 * period,
        })
        .collect()
}

/// Query set plus the buffers its results travel through.
#[derive(Resource, Clone, ExtractResource)]
pub struct GpuTimestampQueries {
    pub query_set: wgpu::QuerySet,
    /// `QUERY_RESOLVE` target, copied into `readback`.
    pub resolve: Buffer,
    pub readback: Buffer,
    pub count: u32,
    pub period_ns: f32,
    pub state: MapState,
}

impl GpuTimestampQueries {
    /// `None` when the adapter cannot time passes or the substeps need more
    /// queries than a set holds.
    pub fn new(render_device: &RenderDevice, render_queue: &RenderQueue, substeps: u32) -> Option<Self> {
        if !render_device.features().contains(wgpu::Features::TIMESTAMP_QUERY) {
            warn!("gpu timestamps requested but the adapter lacks TIMESTAMP_QUERY");
            return None;
        }
        let count = substeps * QUERIES_PER_SUBSTEP;
        if count > MAX_QUERIES {
            warn!("gpu timestamps disabled: {substeps} substeps need {count} queries");
            return None;
        }

        let query_set = render_device.wgpu_device().create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("mpm_timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count,
        });
        let size = u64::from(count) * QUERY_SIZE;
        let resolve = render_device.create_buffer(&BufferDescriptor {
            label: Some("mpm_timestamps_resolve"),
            size,
            usage: BufferUsages::QUERY_RESOLVE | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback = render_device.create_buffer(&BufferDescriptor {
            label: Some("mpm_timestamps_readback"),
            size,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Some(Self {
            query_set,
            resolve,
            readback,
            count,
            period_ns: render_queue.get_timestamp_period(),
            state: MapState::default(),
        })
    }

    /// Claims this frame for timing. False while an earlier readback is busy.
    pub fn begin_frame(&self) -> bool {
        self.state.advance(MapStage::Idle, MapStage::Copied)
    }

    /// Pass timestamp slots, or `None` past the end of the set.
    pub fn writes(&self, substep: u32, pass: GpuPass) -> Option<wgpu::ComputePassTimestampWrites<'_>> {
        let (begin, end) = query_indices(substep, pass);
        (end < self.count).then_some(wgpu::ComputePassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: Some(begin),
            end_of_pass_write_index: Some(end),
        })
    }

    /// Resolves the first `substeps` worth of queries into the readback buffer.
    pub fn resolve(&self, render_context: &mut RenderContext, substeps: u32) {
        let used = (substeps * QUERIES_PER_SUBSTEP).min(self.count);
        let encoder = render_context.command_encoder();
        encoder.resolve_query_set(&self.query_set, 0..used, &self.resolve, 0);
        encoder.copy_buffer_to_buffer(
            &self.resolve,
            0,
            &self.readback,
            0,
            u64::from(used) * QUERY_SIZE,
        );
    }
}

/// Latest decoded frame of pass timestamps.
#[derive(Resource, Clone, Debug, Default)]
pub struct GpuTimestamps {
    pub passes: Vec<GpuPassTimestamp>,
    /// Frames read back so far.
    pub frames: u64,
}

impl GpuTimestamps {
    /// Device time spent in all recorded passes of the latest frame.
    pub fn total_ns(&self) -> f64 {
        self.passes.iter().map(GpuPassTimestamp::duration_ns).sum()
    }
}

// Render world, after the graph was submitted.
pub(crate) fn mark_timestamps_submitted(queries: Option<Res<GpuTimestampQueries>>) {
    if let Some(queries) = queries {
        queries.state.advance(MapStage::Copied, MapStage::Submitted);
    }
}

// Main world. Advances the readback by at most one stage per frame.
pub(crate) fn read_gpu_timestamps(
    queries: Option<Res<GpuTimestampQueries>>,
    render_device: Res<RenderDevice>,
    mut timestamps: ResMut<GpuTimestamps>,
) {
    let Some(queries) = queries else {
        return;
    };
    match queries.state.stage() {
        MapStage::Submitted => {
            if queries.state.advance(MapStage::Submitted, MapStage::Pending) {
                queries
                    .readback
                    .slice(..)
                    .map_async(MapMode::Read, queries.state.callback::<wgpu::BufferAsyncError>());
            }
        }
        MapStage::Pending => {
            render_device.poll(Maintain::Poll);
        }
        MapStage::Mapped => {
            let ticks = {
                let data = queries.readback.slice(..).get_mapped_range();
                bytemuck::cast_slice::<u8, u64>(&data).to_vec()
            };
            queries.readback.unmap();
            queries.state.reset();
            timestamps.passes = decode(&ticks, queries.period_ns);
            timestamps.frames += 1;
        }
        MapStage::Failed => {
            warn!("gpu timestamp readback failed");
            queries.state.reset();
        }
        MapStage::Idle | MapStage::Copied => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_slots_do_not_overlap() {
        let mut seen = Vec::new();
        for substep in 0..3 {
            for pass in [GpuPass::Transfer, GpuPass::Update] {
                let (begin, end) = query_indices(substep, pass);
                assert_eq!(end, begin + 1);
                seen.extend([begin, end]);
            }
        }
        assert_eq!(seen, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn decode_scales_ticks_by_period() {
        let ticks = [100, 150, 160, 400, 500, 520, 530, 600];
        let passes = decode(&ticks, 2.0);
        assert_eq!(passes.len(), 4);

        assert_eq!(passes[0].substep, 0);
        assert_eq!(passes[0].pass, GpuPass::Transfer);
        assert_eq!(passes[0].start_ns, 200.0);
        assert_eq!(passes[0].duration_ns(), 100.0);

        assert_eq!(passes[3].substep, 1);
        assert_eq!(passes[3].pass, GpuPass::Update);
        assert_eq!(passes[3].duration_ns(), 140.0);

        let frame = GpuTimestamps {
            passes,
            frames: 1,
        };
        assert_eq!(frame.total_ns(), 100.0 + 480.0 + 40.0 + 140.0);
    }

    #[test]
    fn reversed_ticks_count_as_zero() {
        let passes = decode(&[50, 10], 1.0);
        assert_eq!(passes[0].duration_ns(), 0.0);
    }
}
