//! Per-material stress and plasticity.
//!
//! Every model reduces to a [`StressTerm`] that turns a stencil weight gradient
//! into the force a particle exerts on that node.

use glam::{Mat3, Vec3};

use crate::config::{FluidParams, SimConfig, SnowParams};
use crate::cpu::particles::{Material, MaterialState};
use crate::cpu::svd::svd3;

/// `dJ/dF` where `J = det(F)`.
pub fn cofactor(f: Mat3) -> Mat3 {
    let (c0, c1, c2) = (f.x_axis, f.y_axis, f.z_axis);
    Mat3::from_cols(c1.cross(c2), c2.cross(c0), c0.cross(c1))
}

/// First Piola-Kirchhoff stress of the fixed-corotated model.
pub fn fixed_corotated_pk1(f: Mat3, mu: f32, lambda: f32) -> Mat3 {
    let rotation = svd3(f).rotation();
    let j = f.determinant();
    (f - rotation) * (2.0 * mu) + cofactor(f) * (lambda * (j - 1.0))
}

/// `dΦ/dJ` of the weakly compressible fluid energy.
pub fn fluid_pressure_derivative(j: f32, params: &FluidParams) -> f32 {
    -params.lambda * (j.powf(-params.gamma) - 1.0)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StressTerm {
    /// `-V · P · Fᵀ`
    Tensor(Mat3),
    /// `-V · dΦ/dJ · J`
    Pressure(f32),
}

impl StressTerm {
    #[inline]
    pub fn force(&self, grad: Vec3) -> Vec3 {
        match self {
            StressTerm::Tensor(m) => *m * grad,
            StressTerm::Pressure(p) => grad * *p,
        }
    }
}

pub fn stress_term(material: Material, state: &MaterialState, config: &SimConfig) -> StressTerm {
    match material {
        Material::Jello => {
            let f = state.f;
            let p = fixed_corotated_pk1(f, config.jello.mu(), config.jello.lambda());
            StressTerm::Tensor(p * f.transpose() * -state.volume)
        }
        Material::Snow => {
            let fe = state.fe;
            let (mu, lambda) = config.snow.lame(state.fp.determinant());
            let p = fixed_corotated_pk1(fe, mu, lambda);
            StressTerm::Tensor(p * fe.transpose() * -state.volume)
        }
        Material::Fluid => {
            let j = state.j;
            StressTerm::Pressure(-state.volume * fluid_pressure_derivative(j, &config.fluid) * j)
        }
    }
}

/// Splits the trial elastic gradient into a clamped elastic part and a
/// plastic part that preserves the total `Fe' · Fp`. Returns `(Fe, Fp)`.
pub fn project_snow(fe_trial: Mat3, fp: Mat3, params: &SnowParams) -> (Mat3, Mat3) {
    let total = fe_trial * fp;
    let svd = svd3(fe_trial);
    let (lo, hi) = params.stretch_range();
    let clamped = svd.singular_values().clamp(Vec3::splat(lo), Vec3::splat(hi));
    let fe = svd.u * Mat3::from_diagonal(clamped) * svd.v.transpose();
    (fe, fe.inverse() * total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cofactor_is_det_times_inverse_transpose() {
        let f = Mat3::from_cols_array(&[1.1, 0.2, 0.0, -0.1, 0.9, 0.3, 0.05, 0.0, 1.2]);
        let expected = f.inverse().transpose() * f.determinant();
        assert!(cofactor(f).abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn undeformed_material_is_stress_free() {
        let config = SimConfig::default();
        let state = MaterialState::undeformed(config.reference_volume());
        for material in Material::ALL {
            let force = stress_term(material, &state, &config).force(Vec3::new(1.0, -2.0, 3.0));
            assert!(force.abs_diff_eq(Vec3::ZERO, 1e-4), "{material:?}: {force:?}");
        }
    }

    #[test]
    fn compressed_fluid_pushes_outward() {
        let params = SimConfig::default().fluid;
        assert!(fluid_pressure_derivative(0.9, &params) < 0.0);
        assert!(fluid_pressure_derivative(1.1, &params) > 0.0);
    }
}
