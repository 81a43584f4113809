//! Sparse Levenberg-Marquardt solver using sprs
//!
//! The Jacobian of a pose graph touches at most four parameter blocks per
//! residual, so it is stored in CSR form with a sparsity pattern fixed at
//! construction; only the values change between iterations. The damped
//! normal equations are factorized with a sparse LDLᵀ.
//!
//! Parameters may live on a manifold: the solver only ever produces tangent
//! steps and hands them to [`LeastSquaresProblem::retract`].

use crate::SolverOptions;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use sprs::{CsMat, SymmetryCheck, TriMat};
use sprs_ldl::Ldl;
use std::fmt;
use std::ops::ControlFlow;
use tracing::{debug, warn};

/// Lower bound for the damping factor so repeated accepts cannot underflow it
const MIN_LAMBDA: f64 = 1e-15;

/// A nonlinear least-squares problem with manifold-valued state
pub trait LeastSquaresProblem {
    /// Full parameter state (may be over-parameterized, e.g. quaternions)
    type State: Clone;

    /// Number of scalar residuals
    fn residual_count(&self) -> usize;

    /// Number of tangent-space parameters (Jacobian columns)
    fn tangent_dim(&self) -> usize;

    /// Structural non-zeros of the Jacobian as (row, col), sorted row-major
    /// and free of duplicates
    fn jacobian_pattern(&self) -> Vec<(usize, usize)>;

    /// Write residuals and Jacobian values. Jacobian values must follow the
    /// order of [`jacobian_pattern`](Self::jacobian_pattern).
    fn evaluate(&self, state: &Self::State, residuals: &mut [f64], jacobian: &mut [f64]);

    /// Apply a tangent-space step to a state
    fn retract(&self, state: &Self::State, delta: &[f64]) -> Self::State;

    /// Norm of the variable part of the state (for the parameter tolerance)
    fn state_norm(&self, state: &Self::State) -> f64;

    /// Reject states containing non-finite values
    fn is_finite(&self, _state: &Self::State) -> bool {
        true
    }
}

/// Why the solver stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Relative cost decrease fell below the function tolerance
    FunctionTolerance,
    /// Gradient max-norm fell below the gradient tolerance
    GradientTolerance,
    /// Step became negligible relative to the parameters
    ParameterTolerance,
    /// Nothing to optimize
    NoVariables,
    /// Iteration cap reached
    MaxIterations,
    /// Damping grew without finding a decreasing step
    DampingDiverged,
    /// The iteration callback asked to stop
    Cancelled,
    /// The normal equations have null directions (e.g. free gauge)
    RankDeficient { deficiency: usize },
    /// The initial cost is NaN or infinite
    NonFiniteCost,
}

impl Termination {
    /// True for the outcomes that reached a stationary point
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            Termination::FunctionTolerance
                | Termination::GradientTolerance
                | Termination::ParameterTolerance
                | Termination::NoVariables
        )
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::FunctionTolerance => write!(f, "function tolerance reached"),
            Termination::GradientTolerance => write!(f, "gradient tolerance reached"),
            Termination::ParameterTolerance => write!(f, "parameter tolerance reached"),
            Termination::NoVariables => write!(f, "no variable parameters"),
            Termination::MaxIterations => write!(f, "maximum number of iterations reached"),
            Termination::DampingDiverged => write!(f, "damping diverged without a decreasing step"),
            Termination::Cancelled => write!(f, "cancelled"),
            Termination::RankDeficient { deficiency } => {
                write!(f, "normal equations rank deficient by {deficiency}")
            }
            Termination::NonFiniteCost => write!(f, "initial cost is not finite"),
        }
    }
}

/// Progress of one iteration, handed to the solve callback
#[derive(Debug, Clone, Copy)]
pub struct IterationSummary {
    pub iteration: usize,
    /// Cost (½|r|²) after this iteration
    pub cost: f64,
    /// Cost decrease achieved by this iteration (0 when rejected)
    pub cost_change: f64,
    pub step_norm: f64,
    pub gradient_max_norm: f64,
    pub lambda: f64,
    pub accepted: bool,
}

/// Outcome of a full solve
#[derive(Debug, Clone, Copy)]
pub struct SolverReport {
    pub iterations: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub termination: Termination,
}

impl SolverReport {
    pub fn converged(&self) -> bool {
        self.termination.is_converged()
    }
}

/// Build an all-zero CSR matrix with the given structure
///
/// `entries` must be sorted by (row, col) and unique, so that the CSR data
/// array lines up with the entry order.
pub fn build_jacobian(entries: &[(usize, usize)], n_rows: usize, n_cols: usize) -> CsMat<f64> {
    let mut tri = TriMat::with_capacity((n_rows, n_cols), entries.len());
    for &(row, col) in entries {
        tri.add_triplet(row, col, 0.0);
    }
    tri.to_csr()
}

/// JᵀJ split into its off-diagonal part and its diagonal, plus Jᵀr
struct NormalEquations {
    off_diagonal: CsMat<f64>,
    diagonal: Vec<f64>,
    gradient: DVector<f64>,
}

impl NormalEquations {
    fn build(jacobian: &CsMat<f64>, residuals: &DVector<f64>) -> Self {
        let n = jacobian.cols();
        let mut tri = TriMat::new((n, n));
        let mut diagonal = vec![0.0; n];
        let mut gradient = DVector::zeros(n);

        for (row_idx, row) in jacobian.outer_iterator().enumerate() {
            let r = residuals[row_idx];
            for (col_i, &v_i) in row.iter() {
                gradient[col_i] += v_i * r;
                diagonal[col_i] += v_i * v_i;
                for (col_j, &v_j) in row.iter() {
                    if col_i != col_j {
                        tri.add_triplet(col_i, col_j, v_i * v_j);
                    }
                }
            }
        }

        Self {
            off_diagonal: tri.to_csc(),
            diagonal,
            gradient,
        }
    }

    /// JᵀJ + λ·max(diag(JᵀJ), 1)
    fn damped(&self, lambda: f64) -> CsMat<f64> {
        let n = self.diagonal.len();
        let mut tri = TriMat::with_capacity((n, n), self.off_diagonal.nnz() + n);
        for (col, column) in self.off_diagonal.outer_iterator().enumerate() {
            for (row, &value) in column.iter() {
                tri.add_triplet(row, col, value);
            }
        }
        for (i, &d) in self.diagonal.iter().enumerate() {
            tri.add_triplet(i, i, d + lambda * d.max(1.0));
        }
        tri.to_csc()
    }

    /// Solve the damped system for s in (JᵀJ + λD) s = Jᵀr
    fn solve_damped(&self, lambda: f64) -> Option<Vec<f64>> {
        let damped = self.damped(lambda);
        let ldl = match Ldl::new()
            .check_symmetry(SymmetryCheck::DontCheckSymmetry)
            .numeric(damped.view())
        {
            Ok(ldl) => ldl,
            Err(e) => {
                debug!(lambda, error = ?e, "LDL factorization failed");
                return None;
            }
        };
        let rhs: Vec<f64> = self.gradient.iter().copied().collect();
        let step = ldl.solve(&rhs);
        step.iter().all(|s| s.is_finite()).then_some(step)
    }

    /// Number of eigenvalues of the undamped JᵀJ that are numerically zero
    fn rank_deficiency(&self, tolerance: f64) -> usize {
        let n = self.diagonal.len();
        let mut dense = DMatrix::<f64>::zeros(n, n);
        for (col, column) in self.off_diagonal.outer_iterator().enumerate() {
            for (row, &value) in column.iter() {
                dense[(row, col)] = value;
            }
        }
        for (i, &d) in self.diagonal.iter().enumerate() {
            dense[(i, i)] = d;
        }

        let eigenvalues = SymmetricEigen::new(dense).eigenvalues;
        let largest = eigenvalues.iter().fold(0.0_f64, |m, &e| m.max(e.abs()));
        if largest == 0.0 || !largest.is_finite() {
            return n;
        }
        eigenvalues
            .iter()
            .filter(|&&e| e <= tolerance * largest)
            .count()
    }
}

/// Sparse Levenberg-Marquardt solver
///
/// The Jacobian structure is fixed at construction time; only values change
/// during optimization. Two Jacobian/residual buffers are kept so that the
/// linearization of an accepted trial step is reused without re-evaluating.
pub struct SparseLevenbergMarquardt {
    options: SolverOptions,

    jacobian: CsMat<f64>,
    residuals: DVector<f64>,

    // Trial step evaluation, swapped in on acceptance
    trial_jacobian: CsMat<f64>,
    trial_residuals: DVector<f64>,
}

impl SparseLevenbergMarquardt {
    /// Create a new sparse solver
    ///
    /// # Arguments
    /// * `n_rows` - Number of residuals
    /// * `n_cols` - Number of tangent parameters
    /// * `entries` - (row, col) pairs defining the sparsity structure,
    ///   sorted row-major and unique
    pub fn new(n_rows: usize, n_cols: usize, entries: &[(usize, usize)]) -> Self {
        let jacobian = build_jacobian(entries, n_rows, n_cols);
        assert_eq!(
            jacobian.nnz(),
            entries.len(),
            "jacobian pattern contains duplicate entries"
        );

        Self {
            options: SolverOptions::default(),
            trial_jacobian: jacobian.clone(),
            jacobian,
            residuals: DVector::zeros(n_rows),
            trial_residuals: DVector::zeros(n_rows),
        }
    }

    /// Create a solver sized for `problem`
    pub fn for_problem<P: LeastSquaresProblem>(problem: &P) -> Self {
        Self::new(
            problem.residual_count(),
            problem.tangent_dim(),
            &problem.jacobian_pattern(),
        )
    }

    pub fn with_options(mut self, options: SolverOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    /// Number of non-zero entries in the Jacobian
    pub fn nnz(&self) -> usize {
        self.jacobian.nnz()
    }

    /// Minimize ½|r(x)|² starting from `state`
    ///
    /// `callback` runs after every iteration with the current state (the
    /// trial state if the step was accepted). Returning `ControlFlow::Break`
    /// stops the solve with [`Termination::Cancelled`]; the state reached so
    /// far is returned, never rolled back.
    pub fn solve<P, C>(
        &mut self,
        problem: &P,
        mut state: P::State,
        mut callback: C,
    ) -> (P::State, SolverReport)
    where
        P: LeastSquaresProblem,
        C: FnMut(&IterationSummary, &P::State) -> ControlFlow<()>,
    {
        let opts = self.options.clone();

        problem.evaluate(&state, self.residuals.as_mut_slice(), self.jacobian.data_mut());
        let mut cost = 0.5 * self.residuals.norm_squared();
        let initial_cost = cost;

        let finish = |state, iterations, final_cost, termination| {
            let report = SolverReport {
                iterations,
                initial_cost,
                final_cost,
                termination,
            };
            (state, report)
        };

        if !cost.is_finite() {
            warn!(cost, "initial cost is not finite, not solving");
            return finish(state, 0, cost, Termination::NonFiniteCost);
        }
        if self.jacobian.cols() == 0 {
            return finish(state, 0, cost, Termination::NoVariables);
        }

        let mut normal = NormalEquations::build(&self.jacobian, &self.residuals);

        let n_params = self.jacobian.cols();
        if opts.check_rank && n_params > opts.rank_check_max_dim {
            debug!(n_params, "problem too large for the dense rank check, skipping");
        } else if opts.check_rank {
            let deficiency = normal.rank_deficiency(opts.rank_tolerance);
            if deficiency > 0 {
                warn!(
                    deficiency,
                    n_params,
                    "normal equations are rank deficient, refusing to iterate"
                );
                return finish(state, 0, cost, Termination::RankDeficient { deficiency });
            }
        }

        let mut lambda = opts.initial_lambda;
        let mut iterations = 0;
        let mut termination = Termination::MaxIterations;

        for iteration in 0..opts.max_iterations {
            let gradient_max_norm = normal.gradient.amax();
            if gradient_max_norm <= opts.gradient_tolerance {
                termination = Termination::GradientTolerance;
                break;
            }
            iterations = iteration + 1;

            // Step s solves (JᵀJ + λD) s = Jᵀr; the update is δ = -s
            let delta: Option<Vec<f64>> = normal
                .solve_damped(lambda)
                .map(|s| s.into_iter().map(|v| -v).collect());

            let mut step_norm = f64::NAN;
            let mut cost_change = 0.0;
            let mut accepted = false;

            if let Some(delta) = delta {
                step_norm = delta.iter().map(|v| v * v).sum::<f64>().sqrt();
                let state_norm = problem.state_norm(&state);
                if step_norm <= opts.parameter_tolerance * (state_norm + opts.parameter_tolerance) {
                    termination = Termination::ParameterTolerance;
                    break;
                }

                let trial = problem.retract(&state, &delta);
                let trial_cost = if problem.is_finite(&trial) {
                    problem.evaluate(
                        &trial,
                        self.trial_residuals.as_mut_slice(),
                        self.trial_jacobian.data_mut(),
                    );
                    0.5 * self.trial_residuals.norm_squared()
                } else {
                    f64::NAN
                };

                if trial_cost.is_finite() && trial_cost < cost {
                    accepted = true;
                    cost_change = cost - trial_cost;
                    cost = trial_cost;
                    state = trial;
                    std::mem::swap(&mut self.jacobian, &mut self.trial_jacobian);
                    std::mem::swap(&mut self.residuals, &mut self.trial_residuals);
                    normal = NormalEquations::build(&self.jacobian, &self.residuals);
                }
            }

            if accepted {
                lambda = (lambda * opts.lambda_scale_down).max(MIN_LAMBDA);
            } else {
                lambda *= opts.lambda_scale_up;
            }

            let summary = IterationSummary {
                iteration,
                cost,
                cost_change,
                step_norm,
                gradient_max_norm,
                lambda,
                accepted,
            };
            debug!(
                iteration,
                cost,
                cost_change,
                step_norm,
                gradient_max_norm,
                lambda,
                accepted,
                "lm iteration"
            );

            if callback(&summary, &state).is_break() {
                termination = Termination::Cancelled;
                break;
            }

            if accepted && cost_change <= opts.function_tolerance * (cost + cost_change) {
                termination = Termination::FunctionTolerance;
                break;
            }
            if !accepted && (!lambda.is_finite() || lambda > opts.max_lambda) {
                warn!(iteration, lambda, gradient_max_norm, "damping diverged");
                termination = Termination::DampingDiverged;
                break;
            }
        }

        finish(state, iterations, cost, termination)
    }
}
