//! Simulation and synthetic data generation
//!
//! Produces a tracked trajectory with noisy odometry, plus noisy observations
//! of every keyframe from an external tracking system whose coordinate frame
//! is offset from the world by an unknown rigid transform.

use crate::error::Result;
use crate::graph::PoseGraph;
use crate::math::{Pose, Vec3};
use crate::registry::{KeyframeId, SecondaryFrameId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use std::f64::consts::TAU;

#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub n_keyframes: usize,
    /// Radius of the circular trajectory (meters)
    pub radius: f64,
    /// Odometry noise, per-axis standard deviation (radians)
    pub odometry_rotation_sigma: f64,
    /// Odometry noise, per-axis standard deviation (meters)
    pub odometry_translation_sigma: f64,
    /// External tracker noise, per-axis standard deviation (radians)
    pub tracker_rotation_sigma: f64,
    /// External tracker noise, per-axis standard deviation (meters)
    pub tracker_translation_sigma: f64,
    /// World-from-tracker transform to be recovered
    pub tracker_frame: Pose<f64>,
    pub seed: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            n_keyframes: 24,
            radius: 3.0,
            odometry_rotation_sigma: 0.01,
            odometry_translation_sigma: 0.02,
            tracker_rotation_sigma: 0.002,
            tracker_translation_sigma: 0.005,
            tracker_frame: Pose::from_rotation_vector(
                Vec3::new(0.05, -0.1, 0.6),
                Vec3::new(1.5, -0.5, 0.2),
            ),
            seed: 42,
        }
    }
}

impl ScenarioConfig {
    pub fn with_noise_scale(mut self, scale: f64) -> Self {
        self.odometry_rotation_sigma *= scale;
        self.odometry_translation_sigma *= scale;
        self.tracker_rotation_sigma *= scale;
        self.tracker_translation_sigma *= scale;
        self
    }
}

/// Ground truth plus the measurements derived from it
#[derive(Debug, Clone)]
pub struct Scenario {
    /// World poses of the keyframes
    pub ground_truth: Vec<Pose<f64>>,
    /// True world-from-tracker transform
    pub tracker_frame: Pose<f64>,
    /// Noisy `pose_i⁻¹ · pose_{i+1}`
    pub odometry: Vec<Pose<f64>>,
    /// Noisy keyframe poses expressed in the tracker frame
    pub tracker_measurements: Vec<Pose<f64>>,
}

/// Ids created by [`Scenario::populate`]
#[derive(Debug, Clone)]
pub struct ScenarioIds {
    pub keyframes: Vec<KeyframeId>,
    pub tracker_frame: SecondaryFrameId,
}

/// Keyframes on a horizontal circle, facing along the direction of travel
pub fn circular_trajectory(n: usize, radius: f64) -> Vec<Pose<f64>> {
    (0..n)
        .map(|i| {
            let angle = TAU * i as f64 / n.max(1) as f64;
            Pose::from_rotation_vector(
                Vec3::new(0.0, 0.0, angle + TAU / 4.0),
                Vec3::new(radius * angle.cos(), radius * angle.sin(), 0.0),
            )
        })
        .collect()
}

fn gaussian(rng: &mut ChaCha8Rng, sigma: f64) -> f64 {
    sigma * rng.sample::<f64, _>(StandardNormal)
}

/// Right-multiply `pose` by a random transform with the given spreads
pub fn perturb(
    pose: &Pose<f64>,
    rotation_sigma: f64,
    translation_sigma: f64,
    rng: &mut ChaCha8Rng,
) -> Pose<f64> {
    let mut sample = |sigma: f64| {
        Vec3::new(gaussian(rng, sigma), gaussian(rng, sigma), gaussian(rng, sigma))
    };
    let noise = Pose::from_rotation_vector(sample(rotation_sigma), sample(translation_sigma));
    *pose * noise
}

impl Scenario {
    pub fn generate(config: &ScenarioConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let ground_truth = circular_trajectory(config.n_keyframes, config.radius);

        let odometry = ground_truth
            .windows(2)
            .map(|w| {
                perturb(
                    &Pose::between(&w[0], &w[1]),
                    config.odometry_rotation_sigma,
                    config.odometry_translation_sigma,
                    &mut rng,
                )
            })
            .collect();

        let tracker_inverse = config.tracker_frame.inverse();
        let tracker_measurements = ground_truth
            .iter()
            .map(|pose| {
                perturb(
                    &(tracker_inverse * *pose),
                    config.tracker_rotation_sigma,
                    config.tracker_translation_sigma,
                    &mut rng,
                )
            })
            .collect();

        Self {
            ground_truth,
            tracker_frame: config.tracker_frame,
            odometry,
            tracker_measurements,
        }
    }

    /// Build the graph: the first keyframe is anchored at its true pose, the
    /// rest are chained by odometry, and every keyframe gets an indirect edge
    /// to the tracker frame. The tracker frame starts from the alignment
    /// implied by the first keyframe's measurement.
    pub fn populate(&self, graph: &PoseGraph) -> Result<ScenarioIds> {
        let mut keyframes = Vec::with_capacity(self.ground_truth.len());
        let Some(first) = self.ground_truth.first() else {
            let tracker_frame = graph.add_secondary_frame(None)?;
            return Ok(ScenarioIds {
                keyframes,
                tracker_frame,
            });
        };

        let k0 = graph.add_keyframe(Some(*first))?;
        graph.set_keyframe_constant(k0)?;
        keyframes.push(k0);
        for t in &self.odometry {
            let previous = keyframes[keyframes.len() - 1];
            keyframes.push(graph.add_relative_keyframe(previous, *t)?);
        }

        let initial_frame = *first * self.tracker_measurements[0].inverse();
        let tracker_frame = graph.add_secondary_frame(Some(initial_frame))?;
        for (&k, measured) in keyframes.iter().zip(&self.tracker_measurements) {
            graph.add_indirect_unary_edge(k, tracker_frame, *measured)?;
        }

        Ok(ScenarioIds {
            keyframes,
            tracker_frame,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_circular_trajectory() {
        let poses = circular_trajectory(8, 10.0);
        assert_eq!(poses.len(), 8);
        for pose in &poses {
            let dist = (pose.translation.x * pose.translation.x
                + pose.translation.y * pose.translation.y)
                .sqrt();
            assert_abs_diff_eq!(dist, 10.0, epsilon = 1e-12);
        }
        // Heading is tangent to the circle: local +x points along travel
        let forward = poses[0].rotation.rotate_vec(Vec3::new(1.0, 0.0, 0.0));
        assert_abs_diff_eq!(forward.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_noise_free_scenario_is_consistent() {
        let config = ScenarioConfig::default().with_noise_scale(0.0);
        let scenario = Scenario::generate(&config);
        assert_eq!(scenario.odometry.len(), config.n_keyframes - 1);

        for (i, t) in scenario.odometry.iter().enumerate() {
            let expected = Pose::between(&scenario.ground_truth[i], &scenario.ground_truth[i + 1]);
            assert!(Pose::between(&expected, t).translation.norm() < 1e-12);
        }
        for (pose, measured) in scenario.ground_truth.iter().zip(&scenario.tracker_measurements) {
            let world = Pose::change_frame(&scenario.tracker_frame, measured);
            assert!(Pose::between(pose, &world).translation.norm() < 1e-12);
        }
    }

    #[test]
    fn test_generation_is_deterministic() {
        let config = ScenarioConfig::default();
        let a = Scenario::generate(&config);
        let b = Scenario::generate(&config);
        assert_eq!(a.odometry, b.odometry);
        assert_eq!(a.tracker_measurements, b.tracker_measurements);
    }

    #[test]
    fn test_populate() {
        let scenario = Scenario::generate(&ScenarioConfig::default());
        let graph = PoseGraph::new();
        let ids = scenario.populate(&graph).unwrap();
        assert_eq!(ids.keyframes.len(), scenario.ground_truth.len());
        assert_eq!(graph.edge_count(), 2 * scenario.ground_truth.len() - 1);
        assert_eq!(ids.tracker_frame.index(), 0);
    }
}
