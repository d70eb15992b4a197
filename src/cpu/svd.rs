//! Branch-light 3×3 SVD after McAdams et al., "Computing the Singular Value
//! Decomposition of 3×3 matrices with minimal branching and elementary
//! floating point operations" (UW-Madison TR1690).
//!
//! The eigenanalysis runs a fixed number of Jacobi sweeps, which costs a little
//! accuracy but keeps the routine identical on the host and in WGSL.

use glam::{Mat3, Vec2, Vec3, Vec4};

/// `3 + sqrt(8)`
const GAMMA: f32 = 5.828_427_1;
/// `cos(pi / 8)`
const C_STAR: f32 = 0.923_879_5;
/// `sin(pi / 8)`
const S_STAR: f32 = 0.382_683_43;
const SVD_EPS: f32 = 1e-7;
const JACOBI_SWEEPS: usize = 5;

/// `A = U · sigma · Vᵀ`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Svd {
    pub u: Mat3,
    /// Upper triangular, diagonal by construction up to round-off.
    pub sigma: Mat3,
    pub v: Mat3,
}

impl Svd {
    /// Diagonal of sigma, in descending order.
    pub fn singular_values(&self) -> Vec3 {
        Vec3::new(self.sigma.x_axis.x, self.sigma.y_axis.y, self.sigma.z_axis.z)
    }

    /// Closest rotation to the decomposed matrix.
    pub fn rotation(&self) -> Mat3 {
        self.u * self.v.transpose()
    }

    pub fn reconstruct(&self) -> Mat3 {
        self.u * self.sigma * self.v.transpose()
    }
}

/// Cosine/sine of the half angle that approximately zeroes `s_pq`.
fn approx_givens(s_pp: f32, s_pq: f32, s_qq: f32) -> Vec2 {
    let c_h = 2.0 * (s_pp - s_qq);
    let s_h2 = s_pq * s_pq;
    let c_h2 = c_h * c_h;
    if GAMMA * s_h2 < c_h2 {
        let omega = 1.0 / (s_h2 + c_h2).sqrt();
        Vec2::new(omega * c_h, omega * s_pq)
    } else {
        Vec2::new(C_STAR, S_STAR)
    }
}

/// Rotation matrix of a unit quaternion stored as `(w, x, y, z)`.
fn quat_to_mat3(q: Vec4) -> Mat3 {
    let (w, x, y, z) = (q.x, q.y, q.z, q.w);
    let (qx2, qy2, qz2) = (x * x, y * y, z * z);
    let (qwqx, qwqy, qwqz) = (w * x, w * y, w * z);
    let (qxqy, qxqz, qyqz) = (x * y, x * z, y * z);
    Mat3::from_cols_array(&[
        1.0 - 2.0 * (qy2 + qz2),
        2.0 * (qxqy + qwqz),
        2.0 * (qxqz - qwqy),
        2.0 * (qxqy - qwqz),
        1.0 - 2.0 * (qx2 + qz2),
        2.0 * (qyqz + qwqx),
        2.0 * (qxqz + qwqy),
        2.0 * (qyqz - qwqx),
        1.0 - 2.0 * (qx2 + qy2),
    ])
}

/// Eigenvectors of `AᵀA`, i.e. the right singular vectors of `A`.
fn symmetric_eigenanalysis(a: Mat3) -> Mat3 {
    let mut s = a.transpose() * a;
    let mut v = Mat3::IDENTITY;

    let mut rotate = |s: &mut Mat3, q: Mat3| {
        *s = q.transpose() * *s * q;
        v *= q;
    };

    for _ in 0..JACOBI_SWEEPS {
        let cs = approx_givens(s.x_axis.x, s.x_axis.y, s.y_axis.y);
        rotate(&mut s, quat_to_mat3(Vec4::new(cs.x, 0.0, 0.0, cs.y)));

        let cs = approx_givens(s.x_axis.x, s.x_axis.z, s.z_axis.z);
        rotate(&mut s, quat_to_mat3(Vec4::new(cs.x, 0.0, -cs.y, 0.0)));

        let cs = approx_givens(s.y_axis.y, s.y_axis.z, s.z_axis.z);
        rotate(&mut s, quat_to_mat3(Vec4::new(cs.x, cs.y, 0.0, 0.0)));
    }
    v
}

/// Givens half angle that zeroes `a1` against `a0`.
fn approx_qr_givens(a0: f32, a1: f32) -> Vec2 {
    let rho = (a0 * a0 + a1 * a1).sqrt();
    let (mut s_h, rho_eps) = if rho <= SVD_EPS { (0.0, SVD_EPS) } else { (a1, rho) };
    let mut c_h = rho_eps + a0;
    if a0 < 0.0 {
        let temp = c_h - 2.0 * a0;
        c_h = s_h;
        s_h = temp;
    }
    let omega = 1.0 / (c_h * c_h + s_h * s_h).sqrt();
    Vec2::new(omega * c_h, omega * s_h)
}

/// Returns `(Q, R)` with `B = Q · R`.
fn qr_decompose(b: Mat3) -> (Mat3, Mat3) {
    let cs = approx_qr_givens(b.x_axis.x, b.x_axis.y);
    let q10 = quat_to_mat3(Vec4::new(cs.x, 0.0, 0.0, cs.y));
    let r = q10.transpose() * b;

    let cs = approx_qr_givens(r.x_axis.x, r.x_axis.z);
    let q20 = quat_to_mat3(Vec4::new(cs.x, 0.0, -cs.y, 0.0));
    let r = q20.transpose() * r;

    let cs = approx_qr_givens(r.y_axis.y, r.y_axis.z);
    let q21 = quat_to_mat3(Vec4::new(cs.x, cs.y, 0.0, 0.0));
    let r = q21.transpose() * r;

    (q10 * q20 * q21, r)
}

/// Swaps columns `i` and `j`, negating the one moved into `j` so the
/// handedness of the basis is preserved.
fn swap_negate(m: &mut Mat3, i: usize, j: usize) {
    let ci = m.col(i);
    let cj = m.col(j);
    *m.col_mut(i) = cj;
    *m.col_mut(j) = -ci;
}

pub fn svd3(a: Mat3) -> Svd {
    let mut v = symmetric_eigenanalysis(a);
    let mut b = a * v;

    // order columns by descending norm
    let mut rho = [0, 1, 2].map(|c| b.col(c).length_squared());
    for (i, j) in [(0, 1), (0, 2), (1, 2)] {
        if rho[i] < rho[j] {
            swap_negate(&mut b, i, j);
            swap_negate(&mut v, i, j);
            rho.swap(i, j);
        }
    }

    let (u, sigma) = qr_decompose(b);
    Svd { u, sigma, v }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_mat_close(a: Mat3, b: Mat3, tol: f32) {
        assert!(a.abs_diff_eq(b, tol), "{a:?} != {b:?}");
    }

    #[test]
    fn identity_decomposes_to_identity_values() {
        let svd = svd3(Mat3::IDENTITY);
        assert!(svd.singular_values().abs_diff_eq(Vec3::ONE, 1e-5));
        assert_mat_close(svd.rotation(), Mat3::IDENTITY, 1e-5);
    }

    #[test]
    fn diagonal_values_are_sorted() {
        let a = Mat3::from_diagonal(Vec3::new(0.5, 2.0, 1.0));
        let s = svd3(a).singular_values();
        assert!(s.abs_diff_eq(Vec3::new(2.0, 1.0, 0.5), 1e-4), "{s:?}");
    }

    #[test]
    fn rotation_of_stretched_rotation() {
        let rot = Mat3::from_rotation_y(0.7) * Mat3::from_rotation_x(-0.3);
        let a = rot * Mat3::from_diagonal(Vec3::new(1.2, 1.0, 0.9));
        let svd = svd3(a);
        assert_mat_close(svd.reconstruct(), a, 1e-4);
        assert_mat_close(svd.rotation(), rot, 1e-3);
    }
}
