//! posegraph: keyframe pose-graph estimation with secondary coordinate frames
//!
//! Keyframes and secondary coordinate frames are rigid poses connected by
//! relative, absolute, positional and indirect (frame-mediated) measurements.
//! The graph is solved by sparse Levenberg-Marquardt from posegraph-solver,
//! with orientations updated on the unit-quaternion manifold, either on the
//! calling thread or on a single background worker.

pub mod config;
pub mod controller;
pub mod edges;
pub mod error;
pub mod gauge;
pub mod graph;
pub mod manifold;
pub mod math;
pub mod optimization;
pub mod problem;
pub mod registry;
pub mod simulation;

// Re-export key types
pub use config::PoseGraphConfig;
pub use controller::{CancellationToken, SolveController, SolveState};
pub use edges::Edge;
pub use error::{GraphError, Result};
pub use graph::PoseGraph;
pub use manifold::QuaternionManifold;
pub use math::{Pose, Quat, Vec3};
pub use optimization::{optimize, optimize_shared, SolveSummary};
pub use problem::Problem;
pub use registry::{BlockKind, KeyframeId, Node, ParameterBlockId, PoseNode, SecondaryFrameId};
pub use posegraph_solver::{Jet, Real, SolverOptions, Termination};
