//! Pose graph configuration

use posegraph_solver::SolverOptions;
use serde::Deserialize;

/// Configuration for a [`PoseGraph`](crate::PoseGraph)
///
/// Deserializable with per-field defaults so it can be embedded as a table in
/// a host application's config file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PoseGraphConfig {
    /// Levenberg-Marquardt options used by every solve
    pub solver: SolverOptions,
    /// Weight applied to positional (unary) edges
    pub position_prior_weight: f64,
    /// Freeze a secondary frame's translation when an indirect edge is added
    /// to it, so only its rotation is estimated
    pub freeze_secondary_translation: bool,
    /// Name of the background solver thread
    pub worker_name: String,
}

impl Default for PoseGraphConfig {
    fn default() -> Self {
        Self {
            solver: SolverOptions::default(),
            position_prior_weight: 1e-2,
            freeze_secondary_translation: true,
            worker_name: "posegraph-solver".to_string(),
        }
    }
}

impl PoseGraphConfig {
    /// Few iterations, for incremental re-solves while tracking
    pub fn incremental() -> Self {
        Self {
            solver: SolverOptions::default().with_max_iterations(20),
            ..Self::default()
        }
    }

    pub fn with_solver(mut self, solver: SolverOptions) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_position_prior_weight(mut self, weight: f64) -> Self {
        self.position_prior_weight = weight;
        self
    }

    pub fn with_freeze_secondary_translation(mut self, freeze: bool) -> Self {
        self.freeze_secondary_translation = freeze;
        self
    }

    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }
}
