//! Error types for graph construction and solving

use thiserror::Error;

/// Errors returned by the pose graph API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// An id that does not name an existing entity
    #[error("invalid {kind} id {id} (only {len} exist)")]
    InvalidId {
        kind: &'static str,
        id: usize,
        len: usize,
    },

    /// A binary edge between a keyframe and itself
    #[error("binary edge from keyframe {0} to itself")]
    SelfEdge(usize),

    /// A measurement or pose containing NaN or infinity
    #[error("non-finite {0}")]
    NonFinite(&'static str),

    /// A synchronous solve was requested while a background solve is running
    #[error("a solve is already in progress")]
    SolveInProgress,
}

pub type Result<T> = std::result::Result<T, GraphError>;
