//! Rigid-body transforms built on the solver's quaternion math

mod pose;

pub use pose::Pose;
pub use posegraph_solver::math3d::{Quat, Vec3};
