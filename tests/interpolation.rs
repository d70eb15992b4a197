use bevy_gpu_mpm::SimConfig;
use bevy_gpu_mpm::cpu::interp::{Stencil, weight, weight_derivative};
use glam::Vec3;
use proptest::prelude::*;

/// Positions at least two cells away from every face of the default box.
fn interior_position() -> impl Strategy<Value = Vec3> {
    let range = -0.9f32..0.9f32;
    (range.clone(), range.clone(), range).prop_map(|(x, y, z)| Vec3::new(x, y, z))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// The 27 weights of any interior particle sum to one.
    #[test]
    fn weights_partition_unity(pos in interior_position()) {
        let grid = SimConfig::default().validate().unwrap();
        let stencil = Stencil::new(&grid, pos);
        prop_assert!(!stencil.clamped);
        let total: f32 = stencil.nodes(&grid).map(|n| n.weight).sum();
        prop_assert!((total - 1.0).abs() < 1e-5, "sum = {}", total);
    }

    /// Gradients of a partition of unity cancel out.
    #[test]
    fn gradients_sum_to_zero(pos in interior_position()) {
        let grid = SimConfig::default().validate().unwrap();
        let stencil = Stencil::new(&grid, pos);
        let total: Vec3 = stencil.nodes(&grid).map(|n| n.grad).sum();
        prop_assert!(total.length() < 1e-2, "sum = {:?}", total);
    }

    #[test]
    fn weights_reproduce_linear_fields(pos in interior_position()) {
        let grid = SimConfig::default().validate().unwrap();
        let stencil = Stencil::new(&grid, pos);
        let center: Vec3 = stencil
            .nodes(&grid)
            .map(|n| grid.node_position(grid.node_coord(n.index)) * n.weight)
            .sum();
        prop_assert!(center.abs_diff_eq(pos, 1e-4), "{:?} vs {:?}", center, pos);
    }
}

#[test]
fn half_open_branches_at_node_boundaries() {
    // d = 0.5 belongs to the outer branch only
    assert_eq!(weight(0.5), 0.5);
    assert_eq!(weight(-0.5), 0.5);
    assert_eq!(weight(1.5), 0.0);
    assert_eq!(weight(-1.5), 0.0);
    assert_eq!(weight(0.0), 0.75);
    assert_eq!(weight_derivative(0.5), -1.0);
    assert_eq!(weight_derivative(-0.5), 1.0);
}

#[test]
fn stencil_nodes_are_distinct() {
    let grid = SimConfig::default().validate().unwrap();
    let stencil = Stencil::new(&grid, Vec3::new(0.013, -0.27, 0.5));
    let mut indices: Vec<usize> = stencil.nodes(&grid).map(|n| n.index).collect();
    indices.sort_unstable();
    indices.dedup();
    assert_eq!(indices.len(), 27);
}
