//! Sparse LM on a manifold-valued state: average a set of noisy rotations

use approx::assert_abs_diff_eq;
use posegraph_solver::math3d::{Quat, Vec3};
use posegraph_solver::{
    Jet, LeastSquaresProblem, SolverOptions, SparseLevenbergMarquardt, Termination,
};
use std::ops::ControlFlow;

struct RotationAverage {
    measurements: Vec<Quat<f64>>,
}

impl LeastSquaresProblem for RotationAverage {
    type State = Quat<f64>;

    fn residual_count(&self) -> usize {
        3 * self.measurements.len()
    }

    fn tangent_dim(&self) -> usize {
        3
    }

    fn jacobian_pattern(&self) -> Vec<(usize, usize)> {
        (0..self.residual_count())
            .flat_map(|row| (0..3).map(move |col| (row, col)))
            .collect()
    }

    fn evaluate(&self, q: &Quat<f64>, residuals: &mut [f64], jacobian: &mut [f64]) {
        let delta = Vec3::new(
            Jet::<3>::variable(0.0, 0),
            Jet::variable(0.0, 1),
            Jet::variable(0.0, 2),
        );
        let estimate = q.cast::<Jet<3>>() * Quat::exp(delta);
        for (i, m) in self.measurements.iter().enumerate() {
            let r = (estimate * m.cast::<Jet<3>>().conjugate()).log().to_array();
            for (k, value) in r.iter().enumerate() {
                let row = 3 * i + k;
                residuals[row] = value.value;
                jacobian[3 * row..3 * row + 3].copy_from_slice(&value.derivs);
            }
        }
    }

    fn retract(&self, q: &Quat<f64>, delta: &[f64]) -> Quat<f64> {
        (*q * Quat::exp(Vec3::new(delta[0], delta[1], delta[2]))).normalize()
    }

    fn state_norm(&self, q: &Quat<f64>) -> f64 {
        q.norm()
    }

    fn is_finite(&self, q: &Quat<f64>) -> bool {
        q.is_finite()
    }
}

#[test]
fn averages_rotations_on_the_manifold() {
    let truth = Quat::exp(Vec3::new(0.4, -1.2, 2.0));
    let offsets = [
        Vec3::new(0.01, 0.0, 0.0),
        Vec3::new(-0.01, 0.0, 0.0),
        Vec3::new(0.0, 0.02, 0.0),
        Vec3::new(0.0, -0.02, 0.0),
    ];
    let problem = RotationAverage {
        measurements: offsets.iter().map(|&o| truth * Quat::exp(o)).collect(),
    };

    let mut solver = SparseLevenbergMarquardt::for_problem(&problem);
    let mut accepted = 0;
    let (q, report) = solver.solve(&problem, Quat::identity(), |it, state| {
        assert_abs_diff_eq!(state.norm(), 1.0, epsilon = 1e-12);
        if it.accepted {
            accepted += 1;
        }
        ControlFlow::Continue(())
    });

    assert!(report.converged(), "termination: {}", report.termination);
    assert!(accepted > 0);
    let error = (q * truth.conjugate()).angle();
    assert!(error < 1e-4, "error {error}");
}

#[test]
fn iteration_cap_is_reported() {
    let problem = RotationAverage {
        measurements: vec![Quat::exp(Vec3::new(0.0, 0.0, 2.5))],
    };
    let options = SolverOptions::default()
        .with_max_iterations(1)
        .with_lambda_params(1e3, 10.0, 0.1);
    let mut solver = SparseLevenbergMarquardt::for_problem(&problem).with_options(options);
    let (_, report) = solver.solve(&problem, Quat::identity(), |_, _| ControlFlow::Continue(()));

    assert_eq!(report.termination, Termination::MaxIterations);
    assert_eq!(report.iterations, 1);
    assert!(!report.converged());
}
