// Steps the same scene on the GPU and the CPU for one frame and compares
// the particle kinematics.

use bevy::app::AppExit;
use bevy::prelude::*;
use bevy::render::renderer::RenderDevice;
use bevy_gpu_mpm::cpu::scene::{PointCloud, SceneBuilder, SceneObject, SceneTransform};
use bevy_gpu_mpm::gpu::buffers::{AllowCopy, GpuStepping, ReadbackBuffer};
use bevy_gpu_mpm::{GpuMpmPlugin, Material as MpmMaterial, MpmSolver, SimConfig};
use glam::Vec3 as GVec3;

// frames to wait for pipeline compilation before the single GPU frame
const WARMUP_FRAMES: u32 = 120;
const MAX_POS_ERR: f32 = 1e-4;
const MAX_VEL_ERR: f32 = 1e-2;

fn main() {
    let config = SimConfig::default();
    let spacing = config.bounds.cell_width * 0.5;
    let pool = SceneBuilder::new(&config)
        .add(
            SceneObject::new(PointCloud::cube(0.1, spacing), MpmMaterial::Jello)
                .with_transform(SceneTransform::from_translation(GVec3::new(-0.3, 0.0, 0.0))),
        )
        .add(SceneObject::new(PointCloud::sphere(0.1, spacing), MpmMaterial::Snow))
        .add(
            SceneObject::new(PointCloud::cube(0.1, spacing), MpmMaterial::Fluid)
                .with_transform(SceneTransform::from_translation(GVec3::new(0.3, 0.0, 0.0))),
        )
        .build();
    let solver = match pool.and_then(|pool| MpmSolver::new(config, pool)) {
        Ok(solver) => solver,
        Err(err) => {
            eprintln!("invalid scene: {err}");
            return;
        }
    };

    App::new()
        .add_plugins(DefaultPlugins)
        .insert_resource(solver)
        .insert_resource(GpuStepping(false))
        .insert_resource(AllowCopy(false))
        .add_plugins(GpuMpmPlugin)
        .add_systems(Startup, |mut commands: Commands| {
            commands.spawn(Camera3d::default());
        })
        .add_systems(Update, compare)
        .run();
}

fn compare(
    mut stepping: ResMut<GpuStepping>,
    mut allow_copy: ResMut<AllowCopy>,
    mut solver: ResMut<MpmSolver>,
    readback: Option<Res<ReadbackBuffer>>,
    render_device: Res<RenderDevice>,
    mut exit: EventWriter<AppExit>,
    mut frame: Local<u32>,
) {
    let Some(readback) = readback else { return };
    *frame += 1;

    match *frame {
        f if f < WARMUP_FRAMES => {}
        f if f == WARMUP_FRAMES => {
            stepping.0 = true;
            solver.step_frame();
        }
        f if f == WARMUP_FRAMES + 1 => {
            stepping.0 = false;
            allow_copy.0 = true;
        }
        f if f == WARMUP_FRAMES + 2 => allow_copy.0 = false,
        _ => {
            let Some(gpu) = readback.read_particles(&render_device) else {
                error!("readback mapping failed");
                exit.write(AppExit::error());
                return;
            };
            let cpu = solver.particles().kinematics();
            if gpu.len() != cpu.len() {
                error!("particle counts differ: gpu {} cpu {}", gpu.len(), cpu.len());
                exit.write(AppExit::error());
                return;
            }

            let mut max_pos: f32 = 0.0;
            let mut max_vel: f32 = 0.0;
            for (g, c) in gpu.iter().zip(cpu) {
                max_pos = max_pos.max((GVec3::from_array(g.pos) - c.pos).abs().max_element());
                max_vel = max_vel.max((GVec3::from_array(g.vel) - c.vel).abs().max_element());
            }
            info!("max |dpos| = {max_pos:e}, max |dvel| = {max_vel:e}");

            if max_pos <= MAX_POS_ERR && max_vel <= MAX_VEL_ERR {
                info!("gpu and cpu agree over {} particles", cpu.len());
                exit.write(AppExit::Success);
            } else {
                error!("gpu and cpu diverge");
                exit.write(AppExit::error());
            }
        }
    }
}
