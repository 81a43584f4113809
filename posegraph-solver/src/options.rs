//! Solver configuration

use serde::Deserialize;

/// Levenberg-Marquardt options
///
/// Every field has a default, so a partial table in a host application's
/// config file is enough to override individual values.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Hard cap on the number of iterations
    pub max_iterations: usize,
    /// Stop when an accepted step reduces the cost by less than this fraction
    pub function_tolerance: f64,
    /// Stop when the largest gradient component falls below this value
    pub gradient_tolerance: f64,
    /// Stop when |δ| <= parameter_tolerance * (|x| + parameter_tolerance)
    pub parameter_tolerance: f64,
    /// Initial damping factor
    pub initial_lambda: f64,
    /// Damping multiplier after a rejected step
    pub lambda_scale_up: f64,
    /// Damping multiplier after an accepted step
    pub lambda_scale_down: f64,
    /// Give up once the damping factor exceeds this value
    pub max_lambda: f64,
    /// Check the normal equations for rank deficiency before iterating.
    /// Callers that know their problem's structure may run their own
    /// size-independent check under the same flag.
    pub check_rank: bool,
    /// Eigenvalues of JᵀJ below `rank_tolerance * λ_max` count as null directions
    pub rank_tolerance: f64,
    /// The rank check is a dense eigen-decomposition; skip it above this many
    /// tangent parameters
    pub rank_check_max_dim: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            function_tolerance: 1e-6,
            gradient_tolerance: 1e-10,
            parameter_tolerance: 1e-8,
            initial_lambda: 1e-4,
            lambda_scale_up: 10.0,
            lambda_scale_down: 0.1,
            max_lambda: 1e12,
            check_rank: true,
            rank_tolerance: 1e-12,
            rank_check_max_dim: 1500,
        }
    }
}

impl SolverOptions {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerances(mut self, function: f64, gradient: f64, parameter: f64) -> Self {
        self.function_tolerance = function;
        self.gradient_tolerance = gradient;
        self.parameter_tolerance = parameter;
        self
    }

    pub fn with_lambda_params(mut self, initial: f64, scale_up: f64, scale_down: f64) -> Self {
        self.initial_lambda = initial;
        self.lambda_scale_up = scale_up;
        self.lambda_scale_down = scale_down;
        self
    }

    pub fn with_rank_check(mut self, enabled: bool) -> Self {
        self.check_rank = enabled;
        self
    }
}
