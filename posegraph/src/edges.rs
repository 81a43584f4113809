//! Edge types and their residual functions
//!
//! All residual functions are generic over [`Real`] so the solver driver can
//! evaluate them with jets and obtain the Jacobian by forward-mode autodiff.
//! Sign convention throughout: estimate minus measurement.

use crate::math::{Pose, Vec3};
use crate::registry::{KeyframeId, Node, ParameterBlockId, SecondaryFrameId};
use posegraph_solver::Real;

/// Maximum residual dimension of any edge
pub const MAX_RESIDUAL_DIM: usize = 6;

/// A measurement constraining one or two registry entities
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Edge {
    /// Keyframe pose ≈ measured absolute pose
    UnaryAbsolute {
        keyframe: KeyframeId,
        measured: Pose<f64>,
    },
    /// Keyframe position ≈ measured point, scaled by `weight`
    UnaryPosition {
        keyframe: KeyframeId,
        measured: Vec3<f64>,
        weight: f64,
    },
    /// pose_b⁻¹ · pose_a ≈ t_ba
    BinaryRelative {
        b: KeyframeId,
        a: KeyframeId,
        t_ba: Pose<f64>,
    },
    /// pose_k ≈ pose_z · measured, with `measured` the keyframe pose expressed
    /// in the secondary frame's coordinate system
    IndirectUnary {
        keyframe: KeyframeId,
        frame: SecondaryFrameId,
        measured: Pose<f64>,
    },
}

impl Edge {
    pub fn residual_dim(&self) -> usize {
        match self {
            Edge::UnaryPosition { .. } => 3,
            _ => 6,
        }
    }

    /// Nodes whose poses are passed to [`Edge::residual`], in order
    pub fn nodes(&self) -> Vec<Node> {
        match *self {
            Edge::UnaryAbsolute { keyframe, .. } | Edge::UnaryPosition { keyframe, .. } => {
                vec![keyframe.into()]
            }
            Edge::BinaryRelative { b, a, .. } => vec![b.into(), a.into()],
            Edge::IndirectUnary {
                keyframe, frame, ..
            } => vec![frame.into(), keyframe.into()],
        }
    }

    /// Parameter blocks the residual depends on, in derivative-slot order
    pub fn parameter_blocks(&self) -> Vec<ParameterBlockId> {
        match *self {
            Edge::UnaryPosition { keyframe, .. } => vec![ParameterBlockId::translation(keyframe)],
            _ => self
                .nodes()
                .into_iter()
                .flat_map(|n| [ParameterBlockId::orientation(n), ParameterBlockId::translation(n)])
                .collect(),
        }
    }

    /// Evaluate the residual given the poses of [`Edge::nodes`]
    ///
    /// Writes `residual_dim()` values into `out`.
    pub fn residual<T: Real>(&self, poses: &[Pose<T>], out: &mut [T]) {
        match self {
            Edge::UnaryAbsolute { measured, .. } => {
                out[..6].copy_from_slice(&absolute_residual(&poses[0], &measured.cast()));
            }
            Edge::UnaryPosition {
                measured, weight, ..
            } => {
                out[..3].copy_from_slice(&position_residual(
                    &poses[0],
                    measured.cast(),
                    T::from_f64(*weight),
                ));
            }
            Edge::BinaryRelative { t_ba, .. } => {
                out[..6].copy_from_slice(&relative_residual(&poses[0], &poses[1], &t_ba.cast()));
            }
            Edge::IndirectUnary { measured, .. } => {
                let r = indirect_residual(&poses[1], &poses[0], &measured.cast());
                out[..6].copy_from_slice(&r);
            }
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            Edge::UnaryAbsolute { measured, .. }
            | Edge::BinaryRelative { t_ba: measured, .. }
            | Edge::IndirectUnary { measured, .. } => measured.is_finite(),
            Edge::UnaryPosition {
                measured, weight, ..
            } => measured.is_finite() && weight.is_finite(),
        }
    }
}

/// 6-vector discrepancy between two poses:
/// `log(q_est ⊗ q_meas⁻¹)` stacked with `t_est − t_meas`
pub fn pose_error<T: Real>(estimate: &Pose<T>, measured: &Pose<T>) -> [T; 6] {
    let r = (estimate.rotation * measured.rotation.conjugate()).log();
    let t = estimate.translation - measured.translation;
    [r.x, r.y, r.z, t.x, t.y, t.z]
}

pub fn absolute_residual<T: Real>(pose: &Pose<T>, measured: &Pose<T>) -> [T; 6] {
    pose_error(pose, measured)
}

pub fn position_residual<T: Real>(pose: &Pose<T>, measured: Vec3<T>, weight: T) -> [T; 3] {
    (pose.translation - measured).scale(weight).to_array()
}

pub fn relative_residual<T: Real>(pose_b: &Pose<T>, pose_a: &Pose<T>, t_ba: &Pose<T>) -> [T; 6] {
    pose_error(&Pose::between(pose_b, pose_a), t_ba)
}

pub fn indirect_residual<T: Real>(
    keyframe: &Pose<T>,
    frame: &Pose<T>,
    measured: &Pose<T>,
) -> [T; 6] {
    pose_error(keyframe, &Pose::change_frame(frame, measured))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Quat;
    use approx::assert_abs_diff_eq;
    use posegraph_solver::Jet;

    fn pose(r: [f64; 3], t: [f64; 3]) -> Pose<f64> {
        Pose::from_rotation_vector(Vec3::from_array(r), Vec3::from_array(t))
    }

    fn norm(r: &[f64]) -> f64 {
        r.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    #[test]
    fn test_pose_error_zero_when_equal() {
        let p = pose([0.3, 0.2, -1.0], [1.0, 2.0, 3.0]);
        assert!(norm(&pose_error(&p, &p)) < 1e-12);
    }

    #[test]
    fn test_pose_error_rotation_part() {
        let measured = Pose::identity();
        let estimate = pose([0.0, 0.0, 0.25], [0.0, 0.0, 0.0]);
        let e = pose_error(&estimate, &measured);
        assert_abs_diff_eq!(e[2], 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(norm(&e), 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_relative_residual_zero_for_consistent_poses() {
        let b = pose([0.1, 0.5, -0.2], [1.0, -1.0, 0.5]);
        let t_ba = pose([0.0, 0.3, 0.0], [2.0, 0.0, 0.0]);
        let a = b * t_ba;
        assert!(norm(&relative_residual(&b, &a, &t_ba)) < 1e-12);
        assert!(norm(&relative_residual(&a, &b, &t_ba)) > 1e-3);
    }

    #[test]
    fn test_indirect_residual_zero_for_consistent_poses() {
        let frame = pose([0.0, 0.0, 1.2], [5.0, 0.0, 0.0]);
        let measured = pose([0.4, 0.0, 0.0], [1.0, 1.0, 0.0]);
        let keyframe = Pose::change_frame(&frame, &measured);
        assert!(norm(&indirect_residual(&keyframe, &frame, &measured)) < 1e-12);
    }

    #[test]
    fn test_position_residual_is_weighted() {
        let p = pose([0.0; 3], [1.0, 2.0, 3.0]);
        let r = position_residual(&p, Vec3::new(0.0, 2.0, 5.0), 1e-2);
        assert_abs_diff_eq!(r[0], 1e-2);
        assert_abs_diff_eq!(r[1], 0.0);
        assert_abs_diff_eq!(r[2], -2e-2);
    }

    #[test]
    fn test_parameter_blocks_order() {
        let k = KeyframeId(3);
        let z = SecondaryFrameId(0);
        let edge = Edge::IndirectUnary {
            keyframe: k,
            frame: z,
            measured: Pose::identity(),
        };
        assert_eq!(
            edge.parameter_blocks(),
            vec![
                ParameterBlockId::orientation(z),
                ParameterBlockId::translation(z),
                ParameterBlockId::orientation(k),
                ParameterBlockId::translation(k),
            ]
        );

        let edge = Edge::UnaryPosition {
            keyframe: k,
            measured: Vec3::zero(),
            weight: 1.0,
        };
        assert_eq!(edge.parameter_blocks(), vec![ParameterBlockId::translation(k)]);
        assert_eq!(edge.residual_dim(), 3);
    }

    #[test]
    fn test_edge_residual_dispatch() {
        let b = pose([0.1, 0.0, 0.0], [0.0, 1.0, 0.0]);
        let a = pose([0.0, 0.2, 0.0], [1.0, 0.0, 0.0]);
        let t_ba = pose([0.0, 0.0, 0.1], [0.5, 0.0, 0.0]);
        let edge = Edge::BinaryRelative {
            b: KeyframeId(0),
            a: KeyframeId(1),
            t_ba,
        };
        let mut out = [0.0; MAX_RESIDUAL_DIM];
        edge.residual(&[b, a], &mut out);
        assert_eq!(out, relative_residual(&b, &a, &t_ba));
    }

    #[test]
    fn test_relative_residual_derivative_matches_finite_difference() {
        let b = pose([0.1, 0.5, -0.2], [1.0, -1.0, 0.5]);
        let a = pose([0.7, -0.3, 0.2], [0.0, 2.0, 1.0]);
        let t_ba = pose([0.2, 0.3, 0.0], [2.0, 0.5, 0.0]);

        // Differentiate with respect to a tangent perturbation of a's rotation
        let perturbed = |d: [f64; 3]| Pose {
            rotation: a.rotation * Quat::exp(Vec3::from_array(d)),
            translation: a.translation,
        };
        let delta = Vec3::new(
            Jet::<3>::variable(0.0, 0),
            Jet::variable(0.0, 1),
            Jet::variable(0.0, 2),
        );
        let a_jet = Pose {
            rotation: a.rotation.cast::<Jet<3>>() * Quat::exp(delta),
            translation: a.translation.cast::<Jet<3>>(),
        };
        let r = relative_residual(&b.cast(), &a_jet, &t_ba.cast());

        let h = 1e-6;
        for k in 0..3 {
            let mut dp = [0.0; 3];
            let mut dm = [0.0; 3];
            dp[k] = h;
            dm[k] = -h;
            let rp = relative_residual(&b, &perturbed(dp), &t_ba);
            let rm = relative_residual(&b, &perturbed(dm), &t_ba);
            for row in 0..6 {
                let numeric = (rp[row] - rm[row]) / (2.0 * h);
                assert_abs_diff_eq!(r[row].derivs[k], numeric, epsilon = 1e-7);
            }
        }
    }

    #[test]
    fn test_non_finite_measurement() {
        let edge = Edge::UnaryPosition {
            keyframe: KeyframeId(0),
            measured: Vec3::new(f64::NAN, 0.0, 0.0),
            weight: 1.0,
        };
        assert!(!edge.is_finite());
    }
}
