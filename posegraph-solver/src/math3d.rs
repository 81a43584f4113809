//! 3D math primitives with automatic differentiation support
//!
//! Provides `Vec3` and the unit quaternion `Quat`, both generic over any
//! [`Real`], so the same rotation code runs on plain scalars and on jets.

use crate::Real;
use std::f64::consts::TAU;

/// Below this squared angle the exponential and logarithm maps switch to
/// their Taylor expansions. The truncation error there is far below f64
/// resolution, and the expansions keep derivatives exact at zero.
const SMALL_ANGLE_SQ: f64 = 1e-8;

// ============================================================================
// Vec3 - 3D Vector
// ============================================================================

/// 3D vector generic over any Real type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T: Copy> Vec3<T> {
    pub const fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }

    pub fn to_array(self) -> [T; 3] {
        [self.x, self.y, self.z]
    }

    pub fn from_array(a: [T; 3]) -> Self {
        Self::new(a[0], a[1], a[2])
    }
}

impl Vec3<f64> {
    /// Lift an f64 vector into any Real type as constants
    pub fn cast<T: Real>(self) -> Vec3<T> {
        Vec3::new(T::from_f64(self.x), T::from_f64(self.y), T::from_f64(self.z))
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl<T: Real> Vec3<T> {
    pub fn zero() -> Self {
        Self::new(T::zero(), T::zero(), T::zero())
    }

    pub fn dot(self, other: Self) -> T {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn norm_squared(self) -> T {
        self.dot(self)
    }

    pub fn norm(self) -> T {
        self.norm_squared().sqrt()
    }

    pub fn cross(self, other: Self) -> Self {
        Self {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    /// Multiply every component by a scalar
    pub fn scale(self, s: T) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }
}

impl<T: Real> std::ops::Add for Vec3<T> {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl<T: Real> std::ops::Sub for Vec3<T> {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl<T: Real> std::ops::Neg for Vec3<T> {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

// ============================================================================
// Quat - Unit Quaternion (for 3D rotations)
// ============================================================================

/// Quaternion for 3D rotations, generic over any Real type
///
/// Uses scalar-first convention: q = w + xi + yj + zk.
/// For rotations, quaternions should be normalized (|q| = 1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quat<T> {
    pub w: T,
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T: Copy> Quat<T> {
    pub const fn new(w: T, x: T, y: T, z: T) -> Self {
        Self { w, x, y, z }
    }

    /// Vector (imaginary) part
    pub fn vec(self) -> Vec3<T> {
        Vec3::new(self.x, self.y, self.z)
    }
}

impl Quat<f64> {
    /// Lift an f64 quaternion into any Real type as constants
    pub fn cast<T: Real>(self) -> Quat<T> {
        Quat::new(
            T::from_f64(self.w),
            T::from_f64(self.x),
            T::from_f64(self.y),
            T::from_f64(self.z),
        )
    }

    pub fn is_finite(&self) -> bool {
        self.w.is_finite() && self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Angle of the rotation in radians, in [0, π]
    pub fn angle(self) -> f64 {
        self.log().norm()
    }
}

impl<T: Real> Quat<T> {
    /// Identity quaternion (no rotation)
    pub fn identity() -> Self {
        Self::new(T::one(), T::zero(), T::zero(), T::zero())
    }

    /// Quaternion conjugate (inverse for unit quaternions)
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    pub fn norm_squared(self) -> T {
        self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z
    }

    pub fn norm(self) -> T {
        self.norm_squared().sqrt()
    }

    /// Normalize to unit length
    pub fn normalize(self) -> Self {
        let n = self.norm();
        Self::new(self.w / n, self.x / n, self.y / n, self.z / n)
    }

    /// Hamilton product; `a.mul(b)` applies `b` first, then `a`
    pub fn mul(self, other: Self) -> Self {
        Self {
            w: self.w * other.w - self.x * other.x - self.y * other.y - self.z * other.z,
            x: self.w * other.x + self.x * other.w + self.y * other.z - self.z * other.y,
            y: self.w * other.y - self.x * other.z + self.y * other.w + self.z * other.x,
            z: self.w * other.z + self.x * other.y - self.y * other.x + self.z * other.w,
        }
    }

    /// Rotate a 3D vector by this (unit) quaternion
    ///
    /// v' = v + w t + q_xyz × t, with t = 2 (q_xyz × v)
    pub fn rotate_vec(self, v: Vec3<T>) -> Vec3<T> {
        let two = T::from_f64(2.0);
        let qv = self.vec();
        let t = qv.cross(v).scale(two);
        v + t.scale(self.w) + qv.cross(t)
    }

    /// Exponential map: rotation vector (axis × angle) to unit quaternion
    ///
    /// q = (cos(θ/2), sin(θ/2)/θ · ω) with θ = |ω|
    pub fn exp(rvec: Vec3<T>) -> Self {
        let theta_sq = rvec.norm_squared();
        if theta_sq.value() < SMALL_ANGLE_SQ {
            // cos(θ/2) ≈ 1 - θ²/8, sin(θ/2)/θ ≈ 1/2 - θ²/48
            let w = T::one() - theta_sq * T::from_f64(1.0 / 8.0);
            let k = T::from_f64(0.5) - theta_sq * T::from_f64(1.0 / 48.0);
            return Self::new(w, rvec.x * k, rvec.y * k, rvec.z * k);
        }

        // |ω|² overflows past ~1e154, so take the norm of ω / max|ωᵢ|.
        // Dividing keeps f64::MAX exact where its reciprocal is subnormal.
        let scale = rvec
            .x
            .value()
            .abs()
            .max(rvec.y.value().abs())
            .max(rvec.z.value().abs());
        let s = T::from_f64(scale);
        let unit = Vec3::new(rvec.x / s, rvec.y / s, rvec.z / s);
        let norm = unit.norm();
        let half = norm * T::from_f64(0.5 * scale);

        // Period 2π in θ/2: reduce the argument, keeping the derivatives
        let reduced = half.value().rem_euclid(TAU);
        let half = T::from_f64(reduced) + (half - T::from_f64(half.value()));
        let k = half.sin() / norm;
        Self::new(half.cos(), unit.x * k, unit.y * k, unit.z * k)
    }

    /// Logarithm map: unit quaternion to the minimal rotation vector
    ///
    /// The result has norm in [0, π]; `q` and `-q` map to the same vector.
    pub fn log(self) -> Vec3<T> {
        // Pick the hemisphere with w >= 0 so the angle is the shortest one
        let q = if self.w.value() < 0.0 {
            Self::new(-self.w, -self.x, -self.y, -self.z)
        } else {
            self
        };
        let v = q.vec();
        let n_sq = v.norm_squared();
        let k = if n_sq.value() < SMALL_ANGLE_SQ {
            // θ/|v| = 2 atan(|v|/w)/|v| ≈ 2/w - 2|v|²/(3w³)
            let w_inv = T::one() / q.w;
            T::from_f64(2.0) * w_inv
                - T::from_f64(2.0 / 3.0) * n_sq * w_inv * w_inv * w_inv
        } else {
            let n = n_sq.sqrt();
            T::from_f64(2.0) * n.atan2(q.w) / n
        };
        v.scale(k)
    }
}

impl<T: Real> std::ops::Mul for Quat<T> {
    type Output = Self;

    fn mul(self, other: Self) -> Self {
        Quat::mul(self, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Jet;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    fn assert_vec_eq(a: Vec3<f64>, b: Vec3<f64>, eps: f64) {
        assert_abs_diff_eq!(a.x, b.x, epsilon = eps);
        assert_abs_diff_eq!(a.y, b.y, epsilon = eps);
        assert_abs_diff_eq!(a.z, b.z, epsilon = eps);
    }

    #[test]
    fn test_vec3_dot_and_cross() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(4.0, 5.0, 6.0);
        assert_eq!(a.dot(b), 32.0);
        assert_eq!(a.cross(b), Vec3::new(-3.0, 6.0, -3.0));
    }

    #[test]
    fn test_quat_identity_rotation() {
        let q = Quat::<f64>::identity();
        let v = Vec3::new(1.0, 2.0, 3.0);
        assert_vec_eq(q.rotate_vec(v), v, 1e-12);
    }

    #[test]
    fn test_quat_90deg_z_rotation() {
        let q = Quat::exp(Vec3::new(0.0, 0.0, PI / 2.0));
        let rotated = q.rotate_vec(Vec3::new(1.0, 0.0, 0.0));
        assert_vec_eq(rotated, Vec3::new(0.0, 1.0, 0.0), 1e-12);
    }

    #[test]
    fn test_quat_composition() {
        let q = Quat::exp(Vec3::new(0.0, 0.0, PI / 2.0));
        let rotated = (q * q).rotate_vec(Vec3::new(1.0, 0.0, 0.0));
        assert_vec_eq(rotated, Vec3::new(-1.0, 0.0, 0.0), 1e-12);
    }

    #[test]
    fn test_quat_inverse() {
        let q = Quat::exp(Vec3::new(0.3, 0.4, 0.5));
        let identity = q * q.conjugate();
        assert_abs_diff_eq!(identity.w, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(identity.vec().norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_exp_log_roundtrip() {
        let cases = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1e-6, -2e-6, 3e-7),
            Vec3::new(0.1, 0.2, 0.3),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.5, -0.5, 0.5),
            Vec3::new(0.0, 3.0, 0.0),
        ];
        for rvec in cases {
            let q = Quat::exp(rvec);
            assert_abs_diff_eq!(q.norm(), 1.0, epsilon = 1e-12);
            assert_vec_eq(q.log(), rvec, 1e-10);
        }
    }

    #[test]
    fn test_exp_of_huge_angles_is_finite() {
        // Wraps to the same rotation as a small angle about the same axis
        let theta = 1e6 * TAU + 0.3;
        let q = Quat::exp(Vec3::new(0.0, 0.0, theta));
        assert_vec_eq(q.log(), Vec3::new(0.0, 0.0, 0.3), 1e-6);

        for rvec in [
            Vec3::new(1e200, 0.0, 0.0),
            Vec3::new(f64::MAX, 0.0, 0.0),
            Vec3::new(f64::MAX, f64::MAX, -f64::MAX),
            Vec3::new(-1e300, 1e-300, 0.0),
        ] {
            let q = Quat::exp(rvec);
            assert!(q.norm().is_finite());
            assert_abs_diff_eq!(q.norm(), 1.0, epsilon = 1e-12);
            // The rotation axis stays parallel to ω
            let m = rvec.x.abs().max(rvec.y.abs()).max(rvec.z.abs());
            let axis = Vec3::new(rvec.x / m, rvec.y / m, rvec.z / m);
            assert_abs_diff_eq!(q.vec().cross(axis).norm(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_log_takes_shortest_path() {
        let q = Quat::exp(Vec3::new(0.0, 0.0, 0.4));
        let flipped = Quat::new(-q.w, -q.x, -q.y, -q.z);
        assert_vec_eq(flipped.log(), Vec3::new(0.0, 0.0, 0.4), 1e-12);
    }

    #[test]
    fn test_exp_derivative_at_zero() {
        type Jet3 = Jet<3>;
        let rvec = Vec3::new(
            Jet3::variable(0.0, 0),
            Jet3::variable(0.0, 1),
            Jet3::variable(0.0, 2),
        );
        let q = Quat::exp(rvec);

        // d(x, y, z)/dω = I/2 and dw/dω = 0 at the identity
        assert_eq!(q.w.derivs, [0.0, 0.0, 0.0]);
        assert_eq!(q.x.derivs, [0.5, 0.0, 0.0]);
        assert_eq!(q.y.derivs, [0.0, 0.5, 0.0]);
        assert_eq!(q.z.derivs, [0.0, 0.0, 0.5]);
    }

    #[test]
    fn test_log_derivative_matches_finite_difference() {
        type Jet3 = Jet<3>;
        let base = Quat::exp(Vec3::new(0.2, -0.4, 0.7));
        let omega = Vec3::new(
            Jet3::variable(0.0, 0),
            Jet3::variable(0.0, 1),
            Jet3::variable(0.0, 2),
        );
        let log = (base.cast::<Jet3>() * Quat::exp(omega)).log();

        let h = 1e-6;
        for j in 0..3 {
            let mut step = [0.0; 3];
            step[j] = h;
            let plus = (base * Quat::exp(Vec3::from_array(step))).log();
            step[j] = -h;
            let minus = (base * Quat::exp(Vec3::from_array(step))).log();
            let fd = (plus - minus).scale(0.5 / h);
            assert_abs_diff_eq!(log.x.derivs[j], fd.x, epsilon = 1e-7);
            assert_abs_diff_eq!(log.y.derivs[j], fd.y, epsilon = 1e-7);
            assert_abs_diff_eq!(log.z.derivs[j], fd.z, epsilon = 1e-7);
        }
    }
}
