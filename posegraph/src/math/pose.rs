//! Pose - rigid transform from a local frame to a parent frame
//!
//! `Pose<T>` is generic over [`Real`] so that residuals can compose poses whose
//! components are jets. Poses map local points into the parent frame:
//! `p_parent = R · p_local + t`.

use nalgebra::{Isometry3, Matrix4, Quaternion, Translation3, UnitQuaternion};
use posegraph_solver::math3d::{Quat, Vec3};
use posegraph_solver::Real;
use std::ops::Mul;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose<T> {
    /// Unit quaternion, local-to-parent rotation
    pub rotation: Quat<T>,
    /// Position of the local origin in the parent frame
    pub translation: Vec3<T>,
}

impl<T: Real> Pose<T> {
    pub fn identity() -> Self {
        Self {
            rotation: Quat::identity(),
            translation: Vec3::zero(),
        }
    }

    /// Create a pose, normalizing the rotation
    pub fn new(rotation: Quat<T>, translation: Vec3<T>) -> Self {
        Self {
            rotation: rotation.normalize(),
            translation,
        }
    }

    /// Create a pose from a rotation vector (axis × angle) and a translation
    pub fn from_rotation_vector(rvec: Vec3<T>, translation: Vec3<T>) -> Self {
        Self {
            rotation: Quat::exp(rvec),
            translation,
        }
    }

    /// `self · other`: apply `other` first, then `self`
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation.rotate_vec(other.translation) + self.translation,
        }
    }

    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.conjugate();
        Self {
            rotation,
            translation: -rotation.rotate_vec(self.translation),
        }
    }

    /// Map a point from the local frame into the parent frame
    pub fn transform_point(&self, p: Vec3<T>) -> Vec3<T> {
        self.rotation.rotate_vec(p) + self.translation
    }

    /// Relative transform `b⁻¹ · a`: pose of `a` expressed in the frame of `b`
    pub fn between(b: &Self, a: &Self) -> Self {
        b.inverse().compose(a)
    }

    /// Re-express `local`, given relative to `frame`, in the parent of `frame`
    ///
    /// This is `frame · local`; e.g. a pose measured in a secondary coordinate
    /// system mapped into the world using the secondary frame's pose.
    pub fn change_frame(frame: &Self, local: &Self) -> Self {
        frame.compose(local)
    }
}

impl Pose<f64> {
    /// Lift into any Real type as constants
    pub fn cast<T: Real>(&self) -> Pose<T> {
        Pose {
            rotation: self.rotation.cast(),
            translation: self.translation.cast(),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.rotation.is_finite() && self.translation.is_finite()
    }

    pub fn from_isometry(iso: &Isometry3<f64>) -> Self {
        let q = iso.rotation.quaternion();
        let t = iso.translation.vector;
        Self::new(Quat::new(q.w, q.i, q.j, q.k), Vec3::new(t.x, t.y, t.z))
    }

    pub fn to_isometry(&self) -> Isometry3<f64> {
        let q = self.rotation;
        let t = self.translation;
        Isometry3::from_parts(
            Translation3::new(t.x, t.y, t.z),
            UnitQuaternion::from_quaternion(Quaternion::new(q.w, q.x, q.y, q.z)),
        )
    }

    /// 4×4 homogeneous matrix, as consumed by renderers
    pub fn to_homogeneous(&self) -> Matrix4<f64> {
        self.to_isometry().to_homogeneous()
    }

    pub fn from_homogeneous(m: &Matrix4<f64>) -> Self {
        let rotation = m.fixed_view::<3, 3>(0, 0).into_owned();
        let q = UnitQuaternion::from_matrix(&rotation);
        Self::new(
            Quat::new(q.w, q.i, q.j, q.k),
            Vec3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]),
        )
    }
}

impl<T: Real> Default for Pose<T> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<T: Real> Mul for Pose<T> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        self.compose(&rhs)
    }
}
