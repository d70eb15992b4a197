use bevy::diagnostic::{DiagnosticsStore, FrameTimeDiagnosticsPlugin};
use bevy::prelude::*;
use bevy_gpu_mpm::cpu::scene::{PointCloud, SceneBuilder, SceneObject, SceneTransform};
use bevy_gpu_mpm::{Material as MpmMaterial, MpmCpuPlugin, MpmSolver, SimConfig};
use glam::Vec3 as GVec3;

const PARTICLE_RADIUS: f32 = 0.008;

#[derive(Component)]
struct ParticleVisual(usize);

fn main() {
    let config = SimConfig::default();
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
        .insert_resource(solver)
        .add_plugins(MpmCpuPlugin)
        .add_systems(Startup, setup)
        .add_systems(Update, (sync_particles, log_fps))
        .run();
}

/// Jello cube, snowball and a block of water side by side.
fn build_scene(config: SimConfig) -> bevy_gpu_mpm::Result<MpmSolver> {
    let spacing = config.bounds.cell_width * 0.5;
    let at = |x: f32, y: f32| SceneTransform::from_translation(GVec3::new(x, y, 0.0));
    let pool = SceneBuilder::new(&config)
        .add(
            SceneObject::new(PointCloud::cube(0.15, spacing), MpmMaterial::Jello)
                .with_transform(at(-0.5, 0.2))
                .with_velocity(GVec3::new(0.0, -1.0, 0.0)),
        )
        .add(SceneObject::new(PointCloud::sphere(0.15, spacing), MpmMaterial::Snow).with_transform(at(0.0, 0.4)))
        .add(SceneObject::new(PointCloud::cube(0.2, spacing), MpmMaterial::Fluid).with_transform(at(0.5, -0.5)))
        .build()?;
    MpmSolver::new(config, pool)
}

fn material_color(material: MpmMaterial) -> Color {
    match material {
        MpmMaterial::Jello => Color::srgb(0.9, 0.2, 0.3),
        MpmMaterial::Snow => Color::srgb(0.95, 0.95, 1.0),
        MpmMaterial::Fluid => Color::srgb(0.0, 0.6, 1.0),
    }
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
    let palette = MpmMaterial::ALL.map(|m| materials.add(material_color(m)));

    for (i, (pos, material)) in solver.positions().enumerate() {
        commands.spawn((
            Mesh3d(mesh.clone()),
            MeshMaterial3d(palette[material.tag() as usize].clone()),
            Transform::from_translation(Vec3::from_array(pos.to_array())),
            ParticleVisual(i),
        ));
    }
}

fn sync_particles(solver: Res<MpmSolver>, mut q: Query<(&ParticleVisual, &mut Transform)>) {
    let particles = solver.particles().kinematics();
    for (vis, mut tf) in q.iter_mut() {
        if let Some(p) = particles.get(vis.0) {
            tf.translation = Vec3::from_array(p.pos.to_array());
        }
    }
}

fn log_fps(diagnostics: Res<DiagnosticsStore>, solver: Res<MpmSolver>, mut counter: Local<u32>) {
    *counter += 1;
    if *counter < 120 {
        return;
    }
    *counter = 0;
    if let Some(avg) = diagnostics
        .get(&FrameTimeDiagnosticsPlugin::FPS)
        .and_then(|fps| fps.average())
    {
        info!("t = {:.3}s, average FPS over last ~2 s: {:.1}", solver.time(), avg);
    }
}
