//! Simulation parameters and the grid descriptor derived from them.
//!
//! A [`SimConfig`] is immutable for the lifetime of a run. Changing the grid
//! resolution or the particle count means building a new solver.

use std::time::Duration;

use bevy::prelude::Resource;
use glam::{UVec3, Vec3};

use crate::error::{ConfigError, Result};

/// Axis-aligned box covered by the background grid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridBounds {
    pub min_corner: Vec3,
    pub max_corner: Vec3,
    pub cell_width: f32,
}

/// Fixed-corotated elasticity used by jello.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ElasticParams {
    pub youngs_modulus: f32,
    pub poisson_ratio: f32,
}

impl ElasticParams {
    pub fn mu(&self) -> f32 {
        lame_mu(self.youngs_modulus, self.poisson_ratio)
    }

    pub fn lambda(&self) -> f32 {
        lame_lambda(self.youngs_modulus, self.poisson_ratio)
    }
}

/// Elastoplastic snow with hardening (Stomakhin et al. 2013).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SnowParams {
    /// Young's modulus of undeformed snow.
    pub e0: f32,
    pub poisson_ratio: f32,
    /// Critical compression.
    pub theta_c: f32,
    /// Critical stretch.
    pub theta_s: f32,
    /// Hardening coefficient.
    pub xi: f32,
}

impl SnowParams {
    /// Young's modulus after plastic volume change `jp = det(Fp)`.
    pub fn youngs_modulus(&self, jp: f32) -> f32 {
        self.e0 * (self.xi * (1.0 - jp)).exp()
    }

    /// `(mu, lambda)` for the current plastic state.
    pub fn lame(&self, jp: f32) -> (f32, f32) {
        let e = self.youngs_modulus(jp);
        (lame_mu(e, self.poisson_ratio), lame_lambda(e, self.poisson_ratio))
    }

    /// Allowed range for the elastic singular values.
    pub fn stretch_range(&self) -> (f32, f32) {
        (1.0 - self.theta_c, 1.0 + self.theta_s)
    }
}

/// Weakly compressible fluid, `dΦ/dJ = -λ(J^-γ - 1)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FluidParams {
    pub lambda: f32,
    pub gamma: f32,
    /// Lower clamp for the volume ratio J.
    pub min_j: f32,
}

/// Reference densities per material.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Densities {
    pub jello: f32,
    pub snow: f32,
    pub fluid: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WallKind {
    /// Only the outward-normal velocity component is removed.
    #[default]
    Slip,
    /// The whole velocity vector is removed.
    Sticky,
}

/// Boundary band applied to grid velocities after the grid update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundaryConfig {
    /// Width of the band in cells.
    pub thickness: u32,
    /// Walls on the low side of each axis (x, y, z).
    pub min_walls: [WallKind; 3],
    /// Walls on the high side of each axis (x, y, z).
    pub max_walls: [WallKind; 3],
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            thickness: 3,
            min_walls: [WallKind::Slip; 3],
            max_walls: [WallKind::Slip, WallKind::Sticky, WallKind::Slip],
        }
    }
}

impl BoundaryConfig {
    /// Packs the stickiness of the six faces into a bitmask, bit `axis` for
    /// the low side and bit `3 + axis` for the high side.
    pub fn sticky_mask(&self) -> u32 {
        let mut mask = 0;
        for axis in 0..3 {
            if self.min_walls[axis] == WallKind::Sticky {
                mask |= 1 << axis;
            }
            if self.max_walls[axis] == WallKind::Sticky {
                mask |= 1 << (3 + axis);
            }
        }
        mask
    }
}

/// Bounds how much simulation work a single rendered frame may do.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameBudget {
    pub max_substeps: u32,
    /// Stop issuing substeps once this much wall-clock time has passed.
    /// At least one substep always runs.
    pub wall_clock: Option<Duration>,
}

impl Default for FrameBudget {
    fn default() -> Self {
        Self {
            max_substeps: 8,
            wall_clock: None,
        }
    }
}

#[derive(Resource, Clone, Debug, PartialEq)]
pub struct SimConfig {
    pub dt: f32,
    pub gravity: Vec3,
    pub bounds: GridBounds,
    pub jello: ElasticParams,
    pub snow: SnowParams,
    pub fluid: FluidParams,
    pub densities: Densities,
    pub boundary: BoundaryConfig,
    /// Share of FLIP in the PIC/FLIP velocity blend.
    pub flip_ratio: f32,
    /// Restrict per-node kernels to the compacted list of nodes with mass.
    pub use_compaction: bool,
    pub substeps_per_frame: u32,
    pub frame_budget: FrameBudget,
    /// Record start/end instants of every kernel dispatch.
    pub record_timestamps: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        let dt = 0.001;
        Self {
            dt,
            gravity: Vec3::new(0.0, -9.8, 0.0),
            bounds: GridBounds {
                min_corner: Vec3::splat(-1.0),
                max_corner: Vec3::splat(1.0),
                cell_width: 0.04,
            },
            jello: ElasticParams {
                youngs_modulus: 15_000.0,
                poisson_ratio: 0.3,
            },
            snow: SnowParams {
                e0: 14_000.0,
                poisson_ratio: 0.2,
                theta_c: 0.025,
                theta_s: 0.0075,
                xi: 10.0,
            },
            fluid: FluidParams {
                lambda: 10.0,
                gamma: 7.0,
                min_j: 0.05,
            },
            densities: Densities {
                jello: 1000.0,
                snow: 400.0,
                fluid: 997.0,
            },
            boundary: BoundaryConfig::default(),
            flip_ratio: 0.95,
            use_compaction: true,
            substeps_per_frame: substeps_for_frame_rate(dt, 24.0, 20.0),
            frame_budget: FrameBudget::default(),
            record_timestamps: false,
        }
    }
}

/// Substeps needed to cover `1 / fps` seconds, slowed down by `slowdown`.
fn substeps_for_frame_rate(dt: f32, fps: f32, slowdown: f32) -> u32 {
    ((1.0 / fps / dt / slowdown).floor() as u32).max(1)
}

impl SimConfig {
    pub fn with_dt(mut self, dt: f32) -> Self {
        self.dt = dt;
        self
    }

    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_bounds(mut self, min_corner: Vec3, max_corner: Vec3, cell_width: f32) -> Self {
        self.bounds = GridBounds {
            min_corner,
            max_corner,
            cell_width,
        };
        self
    }

    pub fn with_boundary(mut self, boundary: BoundaryConfig) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn with_compaction(mut self, enabled: bool) -> Self {
        self.use_compaction = enabled;
        self
    }

    pub fn with_substeps(mut self, substeps: u32) -> Self {
        self.substeps_per_frame = substeps;
        self
    }

    pub fn with_flip_ratio(mut self, ratio: f32) -> Self {
        self.flip_ratio = ratio;
        self
    }

    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.record_timestamps = enabled;
        self
    }

    /// Volume every particle represents: an eighth of a grid cell.
    pub fn reference_volume(&self) -> f32 {
        self.bounds.cell_width.powi(3) / 8.0
    }

    /// Checks every parameter and derives the grid layout.
    pub fn validate(&self) -> Result<GridDescriptor> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(ConfigError::InvalidTimeStep(self.dt));
        }
        if self.substeps_per_frame == 0 || self.frame_budget.max_substeps == 0 {
            return Err(ConfigError::ZeroSubsteps);
        }
        if !(0.0..=1.0).contains(&self.flip_ratio) {
            return Err(ConfigError::InvalidFlipRatio(self.flip_ratio));
        }

        for ratio in [self.jello.poisson_ratio, self.snow.poisson_ratio] {
            if !(ratio > -1.0 && ratio < 0.5) {
                return Err(ConfigError::InvalidPoissonRatio(ratio));
            }
        }

        let positive = [
            ("jello youngs modulus", self.jello.youngs_modulus),
            ("snow e0", self.snow.e0),
            ("fluid lambda", self.fluid.lambda),
            ("fluid gamma", self.fluid.gamma),
            ("fluid min j", self.fluid.min_j),
            ("jello density", self.densities.jello),
            ("snow density", self.densities.snow),
            ("fluid density", self.densities.fluid),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositiveParameter { name, value });
            }
        }
        for (name, value) in [
            ("snow theta_c", self.snow.theta_c),
            ("snow theta_s", self.snow.theta_s),
            ("snow xi", self.snow.xi),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::NonPositiveParameter { name, value });
            }
        }

        let grid = GridDescriptor::new(&self.bounds)?;
        // The boundary band on both sides plus one full stencil must fit.
        let needed = (2 * self.boundary.thickness + 1).max(3);
        if grid.dims.min_element() < needed {
            return Err(ConfigError::GridTooSmall {
                dims: grid.dims.to_array(),
                thickness: self.boundary.thickness,
            });
        }
        Ok(grid)
    }
}

fn lame_mu(e: f32, nu: f32) -> f32 {
    e / (2.0 * (1.0 + nu))
}

fn lame_lambda(e: f32, nu: f32) -> f32 {
    e * nu / ((1.0 + nu) * (1.0 - 2.0 * nu))
}

/// Layout of the uniform background grid. Computed once at setup.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridDescriptor {
    pub origin: Vec3,
    pub cell_width: f32,
    /// Node count per axis.
    pub dims: UVec3,
    pub num_nodes: u32,
    /// `num_nodes` rounded up to a power of two for the scan.
    pub num_padded: u32,
    /// Up-sweep (and down-sweep) iterations, `log2(num_padded)`.
    pub sweep_count: u32,
}

impl GridDescriptor {
    pub fn new(bounds: &GridBounds) -> Result<Self> {
        let h = bounds.cell_width;
        if !(h.is_finite() && h > 0.0) {
            return Err(ConfigError::InvalidCellWidth(h));
        }

        let extent = bounds.max_corner - bounds.min_corner;
        let mut dims = [0u32; 3];
        for axis in 0..3 {
            let (min, max) = (bounds.min_corner[axis], bounds.max_corner[axis]);
            if !(min.is_finite() && max.is_finite() && max > min) {
                return Err(ConfigError::DegenerateBounds { axis, min, max });
            }
            // Round up so the grid reaches max_corner. The tolerance keeps an
            // exact multiple of h from gaining a spurious extra cell.
            let cells = (extent[axis] / h - 1e-4).ceil().max(1.0);
            dims[axis] = cells as u32 + 1;
        }

        let dims = UVec3::from_array(dims);
        let num_nodes = dims.x * dims.y * dims.z;
        let num_padded = num_nodes.next_power_of_two();
        Ok(Self {
            origin: bounds.min_corner,
            cell_width: h,
            dims,
            num_nodes,
            num_padded,
            sweep_count: num_padded.trailing_zeros(),
        })
    }

    #[inline]
    pub fn node_index(&self, coord: UVec3) -> usize {
        (coord.x + self.dims.x * (coord.y + self.dims.y * coord.z)) as usize
    }

    #[inline]
    pub fn node_coord(&self, index: usize) -> UVec3 {
        let index = index as u32;
        let plane = self.dims.x * self.dims.y;
        UVec3::new(
            index % self.dims.x,
            (index % plane) / self.dims.x,
            index / plane,
        )
    }

    /// Position in grid-index space, where nodes sit on integer coordinates.
    #[inline]
    pub fn to_index_space(&self, position: Vec3) -> Vec3 {
        (position - self.origin) / self.cell_width
    }

    pub fn node_position(&self, coord: UVec3) -> Vec3 {
        self.origin + coord.as_vec3() * self.cell_width
    }

    /// Last grid node. Lies past the configured box when its extent is not a
    /// multiple of the cell width.
    pub fn max_corner(&self) -> Vec3 {
        self.node_position(self.dims - UVec3::ONE)
    }

    pub fn contains(&self, position: Vec3) -> bool {
        let p = self.to_index_space(position);
        let upper = (self.dims - UVec3::ONE).as_vec3();
        p.cmpge(Vec3::ZERO).all() && p.cmple(upper).all()
    }
}
