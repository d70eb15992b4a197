use bevy_gpu_mpm::cpu::scene::{PointCloud, SceneBuilder, SceneObject, SceneTransform};
use bevy_gpu_mpm::{Material, MpmSolver, SimConfig};
use criterion::{Criterion, criterion_group, criterion_main};
use glam::Vec3;

fn three_material_scene(config: SimConfig) -> MpmSolver {
    let spacing = config.bounds.cell_width * 0.5;
    let place = |x: f32| SceneTransform::from_translation(Vec3::new(x, -0.3, 0.0));
    let pool = SceneBuilder::new(&config)
        .add(SceneObject::new(PointCloud::cube(0.15, spacing), Material::Jello).with_transform(place(-0.5)))
        .add(SceneObject::new(PointCloud::sphere(0.15, spacing), Material::Snow).with_transform(place(0.0)))
        .add(SceneObject::new(PointCloud::cube(0.15, spacing), Material::Fluid).with_transform(place(0.5)))
        .build()
        .expect("bench scene");
    MpmSolver::new(config, pool).expect("bench solver")
}

fn bench_step(c: &mut Criterion) {
    let mut solver = three_material_scene(SimConfig::default());
    let n = solver.particles().len();
    c.bench_function(&format!("substep_{n}"), |b| b.iter(|| solver.substep()));

    let mut dense = three_material_scene(SimConfig::default().with_compaction(false));
    c.bench_function(&format!("substep_{n}_no_compaction"), |b| b.iter(|| dense.substep()));

    let mut framed = three_material_scene(SimConfig::default());
    c.bench_function(&format!("step_frame_{n}"), |b| b.iter(|| framed.step_frame()));
}

criterion_group!(benches, bench_step);
criterion_main!(benches);
