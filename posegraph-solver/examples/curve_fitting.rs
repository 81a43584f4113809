//! Fit a parabola y = ax² + bx + c with the sparse Levenberg-Marquardt solver
//!
//! The residual is written once, generically over `Real`, and differentiated
//! with `Jet<3>`.

use posegraph_solver::{IterationSummary, Jet, LeastSquaresProblem, Real, SparseLevenbergMarquardt};
use std::ops::ControlFlow;

fn parabola<T: Real>(params: [T; 3], x: f64) -> T {
    let x = T::from_f64(x);
    params[0] * x * x + params[1] * x + params[2]
}

struct Parabola {
    data: Vec<(f64, f64)>,
}

impl LeastSquaresProblem for Parabola {
    type State = [f64; 3];

    fn residual_count(&self) -> usize {
        self.data.len()
    }

    fn tangent_dim(&self) -> usize {
        3
    }

    fn jacobian_pattern(&self) -> Vec<(usize, usize)> {
        (0..self.data.len()).flat_map(|i| [(i, 0), (i, 1), (i, 2)]).collect()
    }

    fn evaluate(&self, state: &[f64; 3], residuals: &mut [f64], jacobian: &mut [f64]) {
        let params = [
            Jet::<3>::variable(state[0], 0),
            Jet::variable(state[1], 1),
            Jet::variable(state[2], 2),
        ];
        for (i, &(x, y)) in self.data.iter().enumerate() {
            let r = parabola(params, x) - Jet::constant(y);
            residuals[i] = r.value;
            jacobian[3 * i..3 * i + 3].copy_from_slice(&r.derivs);
        }
    }

    fn retract(&self, state: &[f64; 3], delta: &[f64]) -> [f64; 3] {
        [state[0] + delta[0], state[1] + delta[1], state[2] + delta[2]]
    }

    fn state_norm(&self, state: &[f64; 3]) -> f64 {
        state.iter().map(|v| v * v).sum::<f64>().sqrt()
    }
}

fn main() {
    println!("posegraph-solver: curve fitting");
    println!("===============================\n");

    // Noisy samples of a=2, b=1, c=3
    let problem = Parabola {
        data: vec![(0.0, 3.0), (1.0, 6.1), (2.0, 13.0), (3.0, 23.9), (4.0, 38.8)],
    };

    let mut solver = SparseLevenbergMarquardt::for_problem(&problem);
    println!("Jacobian nonzeros: {}", solver.nnz());

    let (params, report) = solver.solve(&problem, [1.0, 1.0, 1.0], |it: &IterationSummary, state| {
        println!(
            "  iter {:2}: cost={:.6e} lambda={:.1e} accepted={} params=[{:.6}, {:.6}, {:.6}]",
            it.iteration, it.cost, it.lambda, it.accepted, state[0], state[1], state[2]
        );
        ControlFlow::Continue(())
    });

    println!("\n{} after {} iterations", report.termination, report.iterations);
    println!("cost: {:.6e} -> {:.6e}", report.initial_cost, report.final_cost);
    println!("a={:.4}, b={:.4}, c={:.4}", params[0], params[1], params[2]);
}
