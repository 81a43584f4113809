//! Solver driver
//!
//! Turns a [`Problem`] into a [`LeastSquaresProblem`] and runs sparse
//! Levenberg-Marquardt on it.
//!
//! Parameterization: each variable orientation block contributes 3 tangent
//! columns, updated host-relative as `q ⊗ exp(δ)`; each variable translation
//! block contributes 3 Euclidean columns. Residuals are differentiated with
//! `Jet<12>` (two nodes × two blocks × 3), with δ as jet variables at zero.
//!
//! The driver works on a snapshot of the problem so a shared problem is only
//! locked while taking the snapshot and while writing back accepted iterates.

use crate::controller::CancellationToken;
use crate::edges::{Edge, MAX_RESIDUAL_DIM};
use crate::error::Result;
use crate::gauge::{Anchor, GaugeCheck};
use crate::manifold::{translation_plus, QuaternionManifold};
use crate::math::{Pose, Vec3};
use crate::problem::Problem;
use crate::registry::{BlockKind, Node, ParameterBlockId};
use parking_lot::Mutex;
use posegraph_solver::{
    Jet, LeastSquaresProblem, SolverOptions, SolverReport, SparseLevenbergMarquardt,
    Termination,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::ControlFlow;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Derivative slots per residual: up to two nodes with two 3-dof blocks each
const JET_DIM: usize = 12;
type J = Jet<JET_DIM>;

/// Result of one solve
#[derive(Debug, Clone)]
pub struct SolveSummary {
    pub iterations: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub termination: Termination,
    /// Number of edges (residual terms)
    pub n_edges: usize,
    /// Number of scalar residuals
    pub n_residuals: usize,
    /// Number of variable parameter blocks
    pub n_variable_blocks: usize,
    /// Time spent solving (milliseconds)
    pub solve_time_ms: f64,
}

impl SolveSummary {
    pub fn converged(&self) -> bool {
        self.termination.is_converged()
    }
}

impl fmt::Display for SolveSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} iterations: cost {:.6e} -> {:.6e} ({} edges, {} residuals, {} variable blocks, {:.2} ms)",
            self.termination,
            self.iterations,
            self.initial_cost,
            self.final_cost,
            self.n_edges,
            self.n_residuals,
            self.n_variable_blocks,
            self.solve_time_ms,
        )
    }
}

struct SnapshotEdge {
    edge: Edge,
    /// Indices into the snapshot state, in `edge.nodes()` order
    nodes: Vec<usize>,
    /// Derivative slots of each node's (orientation, translation) blocks,
    /// `None` for constant blocks
    slots: Vec<[Option<usize>; 2]>,
    /// (derivative slot, first column) of each variable block, by column
    columns: Vec<(usize, usize)>,
    row: usize,
}

/// A problem frozen for one solve; the state is one pose per node
pub struct GraphProblem {
    nodes: Vec<Node>,
    edges: Vec<SnapshotEdge>,
    /// (state index, block kind) of each column block; block i owns
    /// columns 3i..3i+3
    variables: Vec<(usize, BlockKind)>,
    /// State indices of nodes with at least one variable block
    written_nodes: Vec<usize>,
    n_residuals: usize,
}

fn block_index(kind: BlockKind) -> usize {
    match kind {
        BlockKind::Orientation => 0,
        BlockKind::Translation => 1,
    }
}

impl GraphProblem {
    /// Capture structure and current poses of `problem`
    ///
    /// Variable blocks that no edge touches are left out, so they neither
    /// move nor make the normal equations singular.
    pub fn from_problem(problem: &Problem) -> Result<(Self, Vec<Pose<f64>>)> {
        let used: HashSet<ParameterBlockId> = problem
            .edges()
            .iter()
            .flat_map(Edge::parameter_blocks)
            .collect();
        let variable_blocks: Vec<ParameterBlockId> = problem
            .variable_blocks()
            .into_iter()
            .filter(|b| used.contains(b))
            .collect();

        let mut node_index: HashMap<Node, usize> = HashMap::new();
        let mut nodes = Vec::new();
        let mut state = Vec::new();
        for edge in problem.edges() {
            for node in edge.nodes() {
                if !node_index.contains_key(&node) {
                    node_index.insert(node, nodes.len());
                    nodes.push(node);
                    state.push(problem.pose(node)?);
                }
            }
        }

        let block_column: HashMap<ParameterBlockId, usize> = variable_blocks
            .iter()
            .enumerate()
            .map(|(i, &b)| (b, 3 * i))
            .collect();
        let variables: Vec<(usize, BlockKind)> = variable_blocks
            .iter()
            .map(|b| (node_index[&b.node], b.kind))
            .collect();
        let mut written_nodes: Vec<usize> = variables.iter().map(|&(n, _)| n).collect();
        written_nodes.dedup();

        let mut row = 0;
        let mut edges = Vec::with_capacity(problem.edge_count());
        for edge in problem.edges() {
            let edge_nodes = edge.nodes();
            let mut slots = vec![[None; 2]; edge_nodes.len()];
            let mut columns = Vec::new();
            for (slot, block) in edge.parameter_blocks().into_iter().enumerate() {
                if let Some(&col) = block_column.get(&block) {
                    columns.push((slot, col));
                    let local = edge_nodes
                        .iter()
                        .position(|&n| n == block.node)
                        .unwrap_or_default();
                    slots[local][block_index(block.kind)] = Some(slot);
                }
            }
            columns.sort_by_key(|&(_, col)| col);

            edges.push(SnapshotEdge {
                edge: *edge,
                nodes: edge_nodes.iter().map(|n| node_index[n]).collect(),
                slots,
                columns,
                row,
            });
            row += edge.residual_dim();
        }

        let snapshot = Self {
            nodes,
            edges,
            variables,
            written_nodes,
            n_residuals: row,
        };
        Ok((snapshot, state))
    }

    pub fn n_variable_blocks(&self) -> usize {
        self.variables.len()
    }

    /// Number of unconstrained gauge directions of the snapshot
    ///
    /// Relative and indirect edges join nodes into rigid components; absolute
    /// edges, positional edges and constant blocks anchor them. See
    /// [`crate::gauge`].
    pub fn gauge_deficiency(&self, state: &[Pose<f64>]) -> usize {
        let mut check = GaugeCheck::new(self.nodes.len());
        let mut variable = vec![[false; 2]; self.nodes.len()];
        for &(node, kind) in &self.variables {
            variable[node][block_index(kind)] = true;
            check.mark_variable(node);
        }

        let mut oriented = vec![false; self.nodes.len()];
        for e in &self.edges {
            match e.edge {
                Edge::UnaryAbsolute { .. } => check.anchor(e.nodes[0], Anchor::Pose),
                Edge::UnaryPosition {
                    measured, weight, ..
                } => {
                    if weight != 0.0 {
                        check.anchor(e.nodes[0], Anchor::Point(measured));
                    }
                }
                Edge::BinaryRelative { .. } | Edge::IndirectUnary { .. } => {
                    check.link(e.nodes[0], e.nodes[1])
                }
            }
            if !matches!(e.edge, Edge::UnaryPosition { .. }) {
                for &n in &e.nodes {
                    oriented[n] = true;
                }
            }
        }

        for (n, pose) in state.iter().enumerate() {
            if oriented[n] {
                check.mark_oriented(n);
                if !variable[n][0] {
                    check.anchor(n, Anchor::Orientation);
                }
            }
            if !variable[n][1] {
                check.anchor(n, Anchor::Point(pose.translation));
            }
        }
        check.deficiency()
    }

    /// ½ Σ‖r‖² at `state`
    pub fn cost(&self, state: &[Pose<f64>]) -> f64 {
        let mut out = [0.0; MAX_RESIDUAL_DIM];
        let mut total = 0.0;
        for e in &self.edges {
            let poses: Vec<Pose<f64>> = e.nodes.iter().map(|&n| state[n]).collect();
            let dim = e.edge.residual_dim();
            e.edge.residual(&poses, &mut out[..dim]);
            total += out[..dim].iter().map(|r| r * r).sum::<f64>();
        }
        0.5 * total
    }

    /// Store the poses of nodes with variable blocks into `problem`
    pub fn write_back(&self, problem: &mut Problem, state: &[Pose<f64>]) {
        for &i in &self.written_nodes {
            problem.store_pose(self.nodes[i], state[i]);
        }
    }
}

fn jet_delta(slot: usize) -> Vec3<J> {
    Vec3::new(
        J::variable(0.0, 3 * slot),
        J::variable(0.0, 3 * slot + 1),
        J::variable(0.0, 3 * slot + 2),
    )
}

/// Lift a pose into jets, with tangent variables on its variable blocks
fn jet_pose(pose: &Pose<f64>, slots: &[Option<usize>; 2]) -> Pose<J> {
    let rotation = match slots[0] {
        Some(slot) => QuaternionManifold::plus_jet(&pose.rotation, jet_delta(slot)),
        None => pose.rotation.cast::<J>(),
    };
    let translation = match slots[1] {
        Some(slot) => pose.translation.cast::<J>() + jet_delta(slot),
        None => pose.translation.cast::<J>(),
    };
    Pose {
        rotation,
        translation,
    }
}

impl LeastSquaresProblem for GraphProblem {
    type State = Vec<Pose<f64>>;

    fn residual_count(&self) -> usize {
        self.n_residuals
    }

    fn tangent_dim(&self) -> usize {
        3 * self.variables.len()
    }

    fn jacobian_pattern(&self) -> Vec<(usize, usize)> {
        let mut entries = Vec::new();
        for e in &self.edges {
            for r in 0..e.edge.residual_dim() {
                for &(_, col) in &e.columns {
                    entries.extend((col..col + 3).map(|c| (e.row + r, c)));
                }
            }
        }
        entries
    }

    fn evaluate(&self, state: &Self::State, residuals: &mut [f64], jacobian: &mut [f64]) {
        let mut out = [J::constant(0.0); MAX_RESIDUAL_DIM];
        let mut cursor = 0;
        for e in &self.edges {
            let poses: Vec<Pose<J>> = e
                .nodes
                .iter()
                .zip(&e.slots)
                .map(|(&n, slots)| jet_pose(&state[n], slots))
                .collect();
            let dim = e.edge.residual_dim();
            e.edge.residual(&poses, &mut out[..dim]);

            for (r, value) in out[..dim].iter().enumerate() {
                residuals[e.row + r] = value.value;
                for &(slot, _) in &e.columns {
                    jacobian[cursor..cursor + 3]
                        .copy_from_slice(&value.derivs[3 * slot..3 * slot + 3]);
                    cursor += 3;
                }
            }
        }
    }

    fn retract(&self, state: &Self::State, delta: &[f64]) -> Self::State {
        let mut next = state.clone();
        for (i, &(node, kind)) in self.variables.iter().enumerate() {
            let d = [delta[3 * i], delta[3 * i + 1], delta[3 * i + 2]];
            let pose = &mut next[node];
            match kind {
                BlockKind::Orientation => {
                    pose.rotation = QuaternionManifold::plus(&pose.rotation, d)
                }
                BlockKind::Translation => {
                    pose.translation = translation_plus(&pose.translation, d)
                }
            }
        }
        next
    }

    fn state_norm(&self, state: &Self::State) -> f64 {
        self.variables
            .iter()
            .map(|&(node, kind)| match kind {
                BlockKind::Orientation => state[node].rotation.norm_squared(),
                BlockKind::Translation => state[node].translation.norm_squared(),
            })
            .sum::<f64>()
            .sqrt()
    }

    fn is_finite(&self, state: &Self::State) -> bool {
        state.iter().all(Pose::is_finite)
    }
}

fn run(
    snapshot: &GraphProblem,
    state: Vec<Pose<f64>>,
    n_edges: usize,
    options: &SolverOptions,
    token: Option<&CancellationToken>,
    mut on_accept: impl FnMut(&[Pose<f64>]),
) -> (Vec<Pose<f64>>, SolveSummary) {
    let start = Instant::now();
    info!(
        n_edges,
        n_residuals = snapshot.n_residuals,
        n_variable_blocks = snapshot.n_variable_blocks(),
        "starting pose graph solve"
    );

    // The dense rank check in the solver only covers small problems; the
    // structural one covers every size
    let deficiency = if options.check_rank {
        snapshot.gauge_deficiency(&state)
    } else {
        0
    };

    let (state, report) = if deficiency > 0 {
        warn!(deficiency, "pose graph gauge is not fixed, refusing to iterate");
        let cost = snapshot.cost(&state);
        let report = SolverReport {
            iterations: 0,
            initial_cost: cost,
            final_cost: cost,
            termination: Termination::RankDeficient { deficiency },
        };
        (state, report)
    } else {
        let mut solver =
            SparseLevenbergMarquardt::for_problem(snapshot).with_options(options.clone());
        debug!(nnz = solver.nnz(), "jacobian structure built");

        solver.solve(snapshot, state, |iteration, state| {
            if iteration.accepted {
                on_accept(state.as_slice());
            }
            match token {
                Some(t) if t.is_cancelled() => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            }
        })
    };

    let summary = SolveSummary {
        iterations: report.iterations,
        initial_cost: report.initial_cost,
        final_cost: report.final_cost,
        termination: report.termination,
        n_edges,
        n_residuals: snapshot.n_residuals,
        n_variable_blocks: snapshot.n_variable_blocks(),
        solve_time_ms: start.elapsed().as_secs_f64() * 1000.0,
    };
    info!(%summary, "pose graph solve finished");
    (state, summary)
}

/// Solve a problem in place
pub fn optimize(problem: &mut Problem, options: &SolverOptions) -> Result<SolveSummary> {
    let (snapshot, state) = GraphProblem::from_problem(problem)?;
    let (state, summary) = run(&snapshot, state, problem.edge_count(), options, None, |_| {});
    snapshot.write_back(problem, &state);
    Ok(summary)
}

/// Solve a problem shared with other threads
///
/// The lock is held only to take the snapshot and to write back each
/// accepted iterate, so graph edits made meanwhile are safe; they take
/// effect at the next solve. On cancellation the last accepted iterate is
/// kept.
pub fn optimize_shared(
    problem: &Mutex<Problem>,
    options: &SolverOptions,
    token: Option<&CancellationToken>,
) -> Result<SolveSummary> {
    let (snapshot, state, n_edges) = {
        let guard = problem.lock();
        let (snapshot, state) = GraphProblem::from_problem(&guard)?;
        (snapshot, state, guard.edge_count())
    };

    let (_, summary) = run(&snapshot, state, n_edges, options, token, |state| {
        snapshot.write_back(&mut problem.lock(), state);
    });
    Ok(summary)
}
