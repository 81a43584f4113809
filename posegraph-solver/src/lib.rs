//! posegraph-solver: forward-mode autodiff and sparse Levenberg-Marquardt
//!
//! This crate knows nothing about pose graphs. It provides const-generic dual
//! numbers, small generic 3D math (vectors and unit quaternions with exp/log
//! maps), and a sparse LM solver driven through [`LeastSquaresProblem`].

mod jet;
pub mod math3d;
pub mod options;
pub mod sparse_solver;

pub use jet::{Jet, Real};
pub use options::SolverOptions;
pub use sparse_solver::{
    build_jacobian, IterationSummary, LeastSquaresProblem, SolverReport,
    SparseLevenbergMarquardt, Termination,
};

// Re-export nalgebra for convenience
pub use nalgebra;
