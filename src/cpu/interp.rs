//! Quadratic B-spline interpolation over a 3×3×3 node stencil.
//!
//! Positions are mapped into grid-index space, where node `n` sits at the
//! integer coordinate `n`. Each particle touches exactly 27 nodes starting at
//! `floor(x - 0.5)` on every axis.

use glam::{UVec3, Vec3};

use crate::config::GridDescriptor;

/// Margin keeping clamped coordinates strictly below the upper stencil limit.
const STENCIL_EPS: f32 = 1e-4;

/// Kernel value for a node at signed distance `d = x - node`.
///
/// The intervals are half-open so exactly one branch applies at a node boundary.
pub fn weight(d: f32) -> f32 {
    if (0.5..1.5).contains(&d) {
        0.5 * (1.5 - d) * (1.5 - d)
    } else if d > -0.5 && d < 0.5 {
        0.75 - d * d
    } else if d > -1.5 && d <= -0.5 {
        0.5 * (1.5 + d) * (1.5 + d)
    } else {
        0.0
    }
}

/// `d weight / d x`, same branches as [`weight`].
pub fn weight_derivative(d: f32) -> f32 {
    if (0.5..1.5).contains(&d) {
        d - 1.5
    } else if d > -0.5 && d < 0.5 {
        -2.0 * d
    } else if d > -1.5 && d <= -0.5 {
        1.5 + d
    } else {
        0.0
    }
}

/// Weights and derivatives of the three stencil nodes along one axis.
/// `x` is the index-space coordinate, `base` must be `floor(x - 0.5)`.
#[inline]
fn axis_weights(x: f32, base: f32) -> ([f32; 3], [f32; 3]) {
    let d0 = x - base;
    let d1 = d0 - 1.0;
    let d2 = d0 - 2.0;
    (
        [
            0.5 * (1.5 - d0) * (1.5 - d0),
            0.75 - d1 * d1,
            0.5 * (1.5 + d2) * (1.5 + d2),
        ],
        [d0 - 1.5, -2.0 * d1, 1.5 + d2],
    )
}

/// One node of a particle's stencil.
#[derive(Clone, Copy, Debug)]
pub struct StencilNode {
    pub index: usize,
    pub weight: f32,
    /// Weight gradient in world units (already divided by h).
    pub grad: Vec3,
}

/// The 27-node neighbourhood of a particle.
#[derive(Clone, Copy, Debug)]
pub struct Stencil {
    pub base: UVec3,
    weights: [Vec3; 3],
    derivs: [Vec3; 3],
    inv_h: f32,
    /// The particle sat too close to the grid edge and its coordinate was
    /// pulled inward so every stencil node is a valid node.
    pub clamped: bool,
}

impl Stencil {
    pub fn new(grid: &GridDescriptor, position: Vec3) -> Self {
        let raw = grid.to_index_space(position);
        let upper = (grid.dims.as_vec3() - 1.5 - STENCIL_EPS).max(Vec3::splat(0.5));
        let x = raw.clamp(Vec3::splat(0.5), upper);
        let clamped = x != raw;

        let base = (x - 0.5).floor();
        let (wx, dx) = axis_weights(x.x, base.x);
        let (wy, dy) = axis_weights(x.y, base.y);
        let (wz, dz) = axis_weights(x.z, base.z);

        Self {
            base: base.as_uvec3(),
            weights: [0, 1, 2].map(|i| Vec3::new(wx[i], wy[i], wz[i])),
            derivs: [0, 1, 2].map(|i| Vec3::new(dx[i], dy[i], dz[i])),
            inv_h: 1.0 / grid.cell_width,
            clamped,
        }
    }

    /// Stencil nodes in x-fastest order.
    pub fn nodes<'a>(&'a self, grid: &'a GridDescriptor) -> impl Iterator<Item = StencilNode> + 'a {
        (0..27u32).map(move |n| {
            let (i, j, k) = ((n % 3) as usize, ((n / 3) % 3) as usize, (n / 9) as usize);
            let (w, d) = (&self.weights, &self.derivs);
            let weight = w[i].x * w[j].y * w[k].z;
            let grad = Vec3::new(
                d[i].x * w[j].y * w[k].z,
                w[i].x * d[j].y * w[k].z,
                w[i].x * w[j].y * d[k].z,
            ) * self.inv_h;
            let coord = self.base + UVec3::new(i as u32, j as u32, k as u32);
            StencilNode {
                index: grid.node_index(coord),
                weight,
                grad,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    #[test]
    fn closed_form_matches_piecewise() {
        for x in [3.5f32, 3.51, 3.99, 4.0, 4.25, 4.49] {
            let base = (x - 0.5).floor();
            let (w, dw) = axis_weights(x, base);
            for n in 0..3 {
                let d = x - (base + n as f32);
                assert!((w[n] - weight(d)).abs() < 1e-6);
                assert!((dw[n] - weight_derivative(d)).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn edge_particle_is_clamped_into_grid() {
        let grid = SimConfig::default().validate().unwrap();
        let stencil = Stencil::new(&grid, grid.origin - Vec3::splat(0.3));
        assert!(stencil.clamped);
        assert_eq!(stencil.base, UVec3::ZERO);
        assert!(stencil.nodes(&grid).all(|n| n.index < grid.num_nodes as usize));
    }
}
