//! PoseGraph: thread-safe facade over a [`Problem`] with background solving
//!
//! The problem lives behind an `Arc<Mutex<_>>` shared with at most one solver
//! worker. Every builder call takes the lock briefly, so it is safe to keep
//! adding keyframes and edges while a solve runs; the additions are picked up
//! by the next solve.

use crate::config::PoseGraphConfig;
use crate::controller::SolveController;
use crate::error::{GraphError, Result};
use crate::math::{Pose, Vec3};
use crate::optimization::{optimize_shared, SolveSummary};
use crate::problem::Problem;
use crate::registry::{KeyframeId, ParameterBlockId, SecondaryFrameId};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

pub struct PoseGraph {
    problem: Arc<Mutex<Problem>>,
    last_summary: Arc<Mutex<Option<SolveSummary>>>,
    controller: SolveController,
    config: PoseGraphConfig,
}

impl Default for PoseGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl PoseGraph {
    pub fn new() -> Self {
        Self::with_config(PoseGraphConfig::default())
    }

    pub fn with_config(config: PoseGraphConfig) -> Self {
        Self {
            problem: Arc::new(Mutex::new(Problem::new(&config))),
            last_summary: Arc::new(Mutex::new(None)),
            controller: SolveController::new(config.worker_name.clone()),
            config,
        }
    }

    pub fn config(&self) -> &PoseGraphConfig {
        &self.config
    }

    /// Read access to the underlying problem, e.g. for rendering
    pub fn with_problem<R>(&self, f: impl FnOnce(&Problem) -> R) -> R {
        f(&self.problem.lock())
    }

    // ========================================================================
    // Graph construction
    // ========================================================================

    pub fn add_keyframe(&self, initial: Option<Pose<f64>>) -> Result<KeyframeId> {
        self.problem.lock().add_keyframe(initial)
    }

    pub fn add_relative_keyframe(&self, anchor: KeyframeId, t_ak: Pose<f64>) -> Result<KeyframeId> {
        self.problem.lock().add_relative_keyframe(anchor, t_ak)
    }

    pub fn add_secondary_frame(&self, initial: Option<Pose<f64>>) -> Result<SecondaryFrameId> {
        self.problem.lock().add_secondary_frame(initial)
    }

    pub fn add_binary_edge(&self, b: KeyframeId, a: KeyframeId, t_ba: Pose<f64>) -> Result<()> {
        self.problem.lock().add_binary_edge(b, a, t_ba)
    }

    pub fn add_unary_edge(&self, keyframe: KeyframeId, position: Vec3<f64>) -> Result<()> {
        self.problem.lock().add_unary_edge(keyframe, position)
    }

    pub fn add_absolute_edge(&self, keyframe: KeyframeId, pose: Pose<f64>) -> Result<()> {
        self.problem.lock().add_absolute_edge(keyframe, pose)
    }

    pub fn add_indirect_unary_edge(
        &self,
        keyframe: KeyframeId,
        frame: SecondaryFrameId,
        measured: Pose<f64>,
    ) -> Result<()> {
        self.problem
            .lock()
            .add_indirect_unary_edge(keyframe, frame, measured)
    }

    pub fn set_secondary_frame_free(&self, frame: SecondaryFrameId) -> Result<()> {
        self.problem.lock().set_secondary_frame_free(frame)
    }

    pub fn set_parameter_block_constant(&self, block: ParameterBlockId) -> Result<()> {
        self.problem.lock().set_parameter_block_constant(block)
    }

    pub fn set_parameter_block_variable(&self, block: ParameterBlockId) -> Result<()> {
        self.problem.lock().set_parameter_block_variable(block)
    }

    pub fn set_keyframe_constant(&self, id: KeyframeId) -> Result<()> {
        self.problem.lock().set_keyframe_constant(id)
    }

    pub fn set_keyframe_variable(&self, id: KeyframeId) -> Result<()> {
        self.problem.lock().set_keyframe_variable(id)
    }

    pub fn set_keyframe_pose(&self, id: KeyframeId, pose: Pose<f64>) -> Result<()> {
        self.problem.lock().set_keyframe_pose(id, pose)
    }

    pub fn set_secondary_frame_pose(&self, id: SecondaryFrameId, pose: Pose<f64>) -> Result<()> {
        self.problem.lock().set_secondary_frame_pose(id, pose)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Current (live) pose of a keyframe
    pub fn keyframe(&self, id: KeyframeId) -> Result<Pose<f64>> {
        Ok(self.problem.lock().keyframe(id)?.pose)
    }

    /// Current (live) pose of a secondary frame
    pub fn secondary_frame(&self, id: SecondaryFrameId) -> Result<Pose<f64>> {
        Ok(self.problem.lock().secondary_frame(id)?.pose)
    }

    pub fn keyframe_count(&self) -> usize {
        self.problem.lock().keyframe_count()
    }

    pub fn secondary_frame_count(&self) -> usize {
        self.problem.lock().secondary_frame_count()
    }

    pub fn edge_count(&self) -> usize {
        self.problem.lock().edge_count()
    }

    /// ½ Σ |r|² at the current poses
    pub fn cost(&self) -> Result<f64> {
        self.problem.lock().cost()
    }

    /// Summary of the most recently finished solve
    pub fn last_summary(&self) -> Option<SolveSummary> {
        self.last_summary.lock().clone()
    }

    // ========================================================================
    // Solving
    // ========================================================================

    /// Start a background solve
    ///
    /// Returns `false` without doing anything if a solve is already running.
    pub fn start(&self) -> bool {
        let problem = Arc::clone(&self.problem);
        let last_summary = Arc::clone(&self.last_summary);
        let options = self.config.solver.clone();

        let started = self.controller.start(move |token| {
            match optimize_shared(&problem, &options, Some(token)) {
                Ok(summary) => *last_summary.lock() = Some(summary),
                Err(e) => warn!(error = %e, "background solve failed"),
            }
        });
        if started {
            info!("background solve started");
        }
        started
    }

    /// Cancel a running background solve and wait for it to exit
    ///
    /// Poses keep the last accepted iterate.
    pub fn stop(&self) {
        self.controller.stop();
    }

    /// Wait for a running background solve to finish
    pub fn wait(&self) {
        self.controller.wait();
    }

    pub fn is_running(&self) -> bool {
        self.controller.is_running()
    }

    /// Solve on the calling thread
    pub fn solve(&self) -> Result<SolveSummary> {
        let summary = self
            .controller
            .run_inline(|token| optimize_shared(&self.problem, &self.config.solver, Some(token)))
            .ok_or(GraphError::SolveInProgress)??;
        *self.last_summary.lock() = Some(summary.clone());
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Quat;

    #[test]
    fn test_facade_forwards_builder_calls() {
        let graph = PoseGraph::new();
        let k0 = graph.add_keyframe(None).unwrap();
        let k1 = graph
            .add_relative_keyframe(k0, Pose::new(Quat::identity(), Vec3::new(1.0, 0.0, 0.0)))
            .unwrap();
        let z = graph.add_secondary_frame(None).unwrap();
        graph.add_indirect_unary_edge(k1, z, Pose::identity()).unwrap();
        graph.add_unary_edge(k0, Vec3::zero()).unwrap();

        assert_eq!(graph.keyframe_count(), 2);
        assert_eq!(graph.secondary_frame_count(), 1);
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.keyframe(k1).unwrap().translation, Vec3::new(1.0, 0.0, 0.0));
        assert!(graph.with_problem(|p| p.secondary_frame(z).unwrap().translation_constant));
        assert!(graph.last_summary().is_none());
    }

    #[test]
    fn test_solve_records_summary() {
        let graph = PoseGraph::new();
        let k0 = graph.add_keyframe(None).unwrap();
        graph.set_keyframe_constant(k0).unwrap();
        let k1 = graph
            .add_relative_keyframe(k0, Pose::new(Quat::identity(), Vec3::new(1.0, 0.0, 0.0)))
            .unwrap();
        graph.set_keyframe_pose(k1, Pose::identity()).unwrap();

        let summary = graph.solve().unwrap();
        assert!(summary.converged(), "{summary}");
        assert_eq!(graph.last_summary().map(|s| s.iterations), Some(summary.iterations));
        assert!((graph.keyframe(k1).unwrap().translation.x - 1.0).abs() < 1e-6);
    }
}
