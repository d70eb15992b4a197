use bevy_gpu_mpm::cpu::constitutive::project_snow;
use bevy_gpu_mpm::cpu::svd::svd3;
use bevy_gpu_mpm::SimConfig;
use glam::{Mat3, Quat, Vec3};
use proptest::prelude::*;

/// Rotation times a positive stretch: well conditioned with det > 0.
fn well_conditioned() -> impl Strategy<Value = Mat3> {
    let axis = (-1.0f32..1.0, -1.0f32..1.0, 0.1f32..1.0);
    let stretch = (0.5f32..2.0, 0.5f32..2.0, 0.5f32..2.0);
    let shear = (-0.3f32..0.3, -0.3f32..0.3);
    (axis, -3.0f32..3.0, stretch, shear).prop_map(|((ax, ay, az), angle, (sx, sy, sz), (h1, h2))| {
        let rotation = Mat3::from_quat(Quat::from_axis_angle(Vec3::new(ax, ay, az).normalize(), angle));
        let mut stretch = Mat3::from_diagonal(Vec3::new(sx, sy, sz));
        stretch.y_axis.x = h1;
        stretch.z_axis.y = h2;
        rotation * stretch
    })
}

/// A reflection of [`well_conditioned`], so det < 0.
fn inverted() -> impl Strategy<Value = Mat3> {
    well_conditioned().prop_map(|a| a * Mat3::from_diagonal(Vec3::new(1.0, 1.0, -1.0)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn reconstructs_input(a in well_conditioned()) {
        let svd = svd3(a);
        let rebuilt = svd.reconstruct();
        prop_assert!(rebuilt.abs_diff_eq(a, 1e-4), "{:?} != {:?}", rebuilt, a);
    }

    #[test]
    fn singular_values_descend(a in well_conditioned()) {
        let s = svd3(a).singular_values();
        prop_assert!(s.x >= s.y - 1e-4 && s.y >= s.z - 1e-4, "{:?}", s);
        prop_assert!(s.min_element() >= -1e-5, "{:?}", s);
    }

    #[test]
    fn factors_are_rotations(a in well_conditioned()) {
        let svd = svd3(a);
        for m in [svd.u, svd.v] {
            prop_assert!((m * m.transpose()).abs_diff_eq(Mat3::IDENTITY, 1e-4));
            prop_assert!((m.determinant() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn inverted_input_keeps_rotations(a in inverted()) {
        let svd = svd3(a);
        let rebuilt = svd.reconstruct();
        prop_assert!(rebuilt.abs_diff_eq(a, 1e-4), "{:?} != {:?}", rebuilt, a);

        for m in [svd.u, svd.v] {
            prop_assert!((m * m.transpose()).abs_diff_eq(Mat3::IDENTITY, 1e-4));
            prop_assert!((m.determinant() - 1.0).abs() < 1e-4);
        }

        // the reflection ends up in sigma
        let s = svd.singular_values();
        let m = s.abs();
        prop_assert!(m.x >= m.y - 1e-4 && m.y >= m.z - 1e-4, "{:?}", s);
        prop_assert!(s.x * s.y * s.z < 0.0, "{:?}", s);
    }
}

#[test]
fn snow_projection_clamps_stretches() {
    let params = SimConfig::default().snow;
    let (lo, hi) = params.stretch_range();
    let fe_trial = Mat3::from_diagonal(Vec3::new(1.2, 1.0, 0.8));
    let (fe, fp) = project_snow(fe_trial, Mat3::IDENTITY, &params);

    let s = svd3(fe).singular_values();
    assert!(s.max_element() <= hi + 1e-5 && s.min_element() >= lo - 1e-5, "{s:?}");
    // total deformation is preserved
    assert!((fe * fp).abs_diff_eq(fe_trial, 1e-4));
}

#[test]
fn snow_projection_is_idempotent() {
    let params = SimConfig::default().snow;
    let rotation = Mat3::from_rotation_z(0.4) * Mat3::from_rotation_x(1.1);
    let fe_trial = rotation * Mat3::from_diagonal(Vec3::new(1.3, 0.99, 0.7));
    let (fe1, fp1) = project_snow(fe_trial, Mat3::IDENTITY, &params);
    let (fe2, fp2) = project_snow(fe1, fp1, &params);
    assert!(fe2.abs_diff_eq(fe1, 1e-4), "{fe1:?} -> {fe2:?}");
    assert!(fp2.abs_diff_eq(fp1, 1e-3), "{fp1:?} -> {fp2:?}");
}
