//! Local parameterization of unit quaternions
//!
//! Orientation blocks are stored as 4 quaternion components but optimized in
//! a 3-dimensional tangent space: the solver proposes a rotation vector δ and
//! the block is updated as `q ⊗ exp(δ)`, renormalized. The same host-relative
//! scheme is used when differentiating residuals: δ is a jet variable at zero
//! and the current quaternion is a constant.

use nalgebra::SMatrix;
use posegraph_solver::math3d::{Quat, Vec3};
use posegraph_solver::{Jet, Real};

pub struct QuaternionManifold;

impl QuaternionManifold {
    pub const AMBIENT_DIM: usize = 4;
    pub const TANGENT_DIM: usize = 3;

    /// `normalize(q ⊗ exp(δ))`
    pub fn plus(q: &Quat<f64>, delta: [f64; 3]) -> Quat<f64> {
        (*q * Quat::exp(Vec3::from_array(delta))).normalize()
    }

    /// Host-relative rotation for differentiation: `q ⊗ exp(δ)` with `q`
    /// lifted as a constant and δ carrying derivatives
    pub fn plus_jet<T: Real>(q: &Quat<f64>, delta: Vec3<T>) -> Quat<T> {
        q.cast::<T>() * Quat::exp(delta)
    }

    /// 4×3 Jacobian of `plus(q, δ)` with respect to δ at δ = 0
    pub fn plus_jacobian(q: &Quat<f64>) -> SMatrix<f64, 4, 3> {
        let delta = Vec3::new(
            Jet::<3>::variable(0.0, 0),
            Jet::variable(0.0, 1),
            Jet::variable(0.0, 2),
        );
        let r = Self::plus_jet(q, delta);
        let rows = [r.w, r.x, r.y, r.z];
        SMatrix::from_fn(|i, j| rows[i].derivs[j])
    }
}

/// Euclidean update of a translation block
pub fn translation_plus(t: &Vec3<f64>, delta: [f64; 3]) -> Vec3<f64> {
    *t + Vec3::from_array(delta)
}
