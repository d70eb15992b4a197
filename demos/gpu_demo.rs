use bevy::diagnostic::{DiagnosticsStore, FrameTimeDiagnosticsPlugin};
use bevy::prelude::*;
use bevy::render::renderer::RenderDevice;
use bevy_gpu_mpm::cpu::particles::ParticleKinematics;
use bevy_gpu_mpm::cpu::scene::{PointCloud, SceneBuilder, SceneObject, SceneTransform};
use bevy_gpu_mpm::gpu::buffers::{AllowCopy, ReadbackBuffer};
use bevy_gpu_mpm::gpu::readback::ReadbackPoll;
use bevy_gpu_mpm::gpu::timestamps::GpuTimestamps;
use bevy_gpu_mpm::{GpuMpmPlugin, Material as MpmMaterial, MpmSolver, SimConfig};
use glam::Vec3 as GVec3;

const PARTICLE_RADIUS: f32 = 0.008;

#[derive(Component)]
struct ParticleVisual(usize);

fn main() {
    let config = SimConfig::default().with_timestamps(true);
    let solver = match build_scene(config) {
        Ok(solver) => solver,
        Err(err) => {
            eprintln!("invalid scene: {err}");
            return;
        }
    };

    App::new()
        .add_plugins((DefaultPlugins, FrameTimeDiagnosticsPlugin::default()))
        .insert_resource(ClearColor(Color::Srgba(
            bevy::color::palettes::css::DARK_SLATE_GRAY,
        )))
        // seeds the device buffers, then mirrors the GPU readback
        .insert_resource(solver)
        .add_plugins(GpuMpmPlugin)
        .add_systems(Startup, setup)
        .add_systems(Update, (sync_particles_from_gpu, log_fps))
        .run();
}

fn build_scene(config: SimConfig) -> bevy_gpu_mpm::Result<MpmSolver> {
    let spacing = config.bounds.cell_width * 0.5;
    let at = |x: f32, y: f32| SceneTransform::from_translation(GVec3::new(x, y, 0.0));
    let pool = SceneBuilder::new(&config)
        .add(SceneObject::new(PointCloud::cube(0.2, spacing), MpmMaterial::Jello).with_transform(at(-0.45, 0.3)))
        .add(SceneObject::new(PointCloud::sphere(0.2, spacing), MpmMaterial::Snow).with_transform(at(0.1, 0.5)))
        .add(SceneObject::new(PointCloud::cube(0.25, spacing), MpmMaterial::Fluid).with_transform(at(0.45, -0.5)))
        .build()?;
    MpmSolver::new(config, pool)
}

fn setup(
    mut commands: Commands,
    solver: Res<MpmSolver>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    commands.spawn((
        Camera3d::default(),
        Transform::from_xyz(0.0, 0.3, 3.2).looking_at(Vec3::new(0.0, -0.2, 0.0), Vec3::Y),
    ));
    commands.spawn((
        DirectionalLight::default(),
        Transform::from_xyz(2.0, 4.0, 3.0).looking_at(Vec3::ZERO, Vec3::Y),
    ));

    let mesh = meshes.add(Sphere::new(PARTICLE_RADIUS).mesh().uv(8, 6));
    let palette = [
        Color::srgb(0.9, 0.2, 0.3),
        Color::srgb(0.95, 0.95, 1.0),
        Color::srgb(0.0, 0.6, 1.0),
    ]
    .map(|c| materials.add(c));

    for (i, (pos, material)) in solver.positions().enumerate() {
        commands.spawn((
            Mesh3d(mesh.clone()),
            MeshMaterial3d(palette[material.tag() as usize].clone()),
            Transform::from_translation(Vec3::from_array(pos.to_array())),
            ParticleVisual(i),
        ));
    }
}

// Read the GPU buffer without stalling the frame:
//   0: allow copy GPU -> readback
//   1: disable copy
//   2: wait for the submission
//   3: start mapping
//   4: poll until mapped, then mirror into the solver and update transforms
fn sync_particles_from_gpu(
    mut allow_copy: ResMut<AllowCopy>,
    readback: Option<Res<ReadbackBuffer>>,
    render_device: Res<RenderDevice>,
    mut solver: ResMut<MpmSolver>,
    mut q: Query<(&ParticleVisual, &mut Transform)>,
    mut fsm: Local<u8>,
) {
    let Some(readback) = readback else { return };

    match *fsm {
        0 => {
            allow_copy.0 = true;
            *fsm = 1;
        }
        1 => {
            allow_copy.0 = false;
            *fsm = 2;
        }
        2 => *fsm = 3,
        3 => {
            if readback.request_map() {
                *fsm = 4;
            }
        }
        _ => {
            let gpu = match readback.try_read(&render_device) {
                ReadbackPoll::Pending => return,
                ReadbackPoll::Ready(gpu) => gpu,
                ReadbackPoll::Failed | ReadbackPoll::Idle => {
                    warn!("readback mapping failed");
                    *fsm = 0;
                    return;
                }
            };
            *fsm = 0;
            let Some(kinematics) = gpu
                .iter()
                .map(|p| p.to_kinematics())
                .collect::<Option<Vec<ParticleKinematics>>>()
            else {
                warn!("readback carried an unknown material tag");
                return;
            };
            for (vis, mut tf) in q.iter_mut() {
                if let Some(p) = kinematics.get(vis.0) {
                    tf.translation = Vec3::from_array(p.pos.to_array());
                }
            }
            if let Err(err) = solver.load_kinematics(kinematics) {
                warn!("{err}");
            }
        }
    }
}

fn log_fps(
    diagnostics: Res<DiagnosticsStore>,
    timestamps: Res<GpuTimestamps>,
    mut counter: Local<u32>,
) {
    *counter += 1;
    if *counter < 120 {
        return;
    }
    *counter = 0;
    if let Some(avg) = diagnostics
        .get(&FrameTimeDiagnosticsPlugin::FPS)
        .and_then(|fps| fps.average())
    {
        info!("==== Average FPS over last ~2 s: {:.1} ====", avg);
    }
    if timestamps.frames > 0 {
        info!(
            "gpu: {} passes, {:.3} ms on device",
            timestamps.passes.len(),
            timestamps.total_ns() * 1e-6
        );
    }
}
