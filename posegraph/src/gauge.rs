//! Structural gauge check
//!
//! Relative and indirect edges constrain the full relative pose of the two
//! nodes they join, so every connected component of the edge graph is rigid
//! up to one global rigid transform G. Only anchors remove that freedom:
//!
//! - an absolute pose edge fixes G entirely;
//! - a constant orientation block fixes the rotation of G;
//! - a fixed point (a constant translation block or a positional edge) fixes
//!   the translation of G, leaving rotations about that point. Two distinct
//!   points leave one rotation (about the line through them), three
//!   non-collinear points leave none.
//!
//! Rotations of G only matter in components where some orientation enters a
//! residual. The check costs O(nodes + edges), so unlike the dense
//! eigen-analysis it runs on graphs of any size.

use crate::math::Vec3;
use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use std::collections::HashMap;

/// Something in a component that removes (part of) its gauge freedom
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Anchor {
    /// Absolute pose prior
    Pose,
    /// Constant orientation block
    Orientation,
    /// Constant translation block or positional prior at this point
    Point(Vec3<f64>),
}

/// Union-find over snapshot nodes, plus the anchors attached to them
#[derive(Debug, Clone)]
pub struct GaugeCheck {
    parent: Vec<usize>,
    rank: Vec<usize>,
    variable: Vec<bool>,
    oriented: Vec<bool>,
    anchors: Vec<(usize, Anchor)>,
}

impl GaugeCheck {
    pub fn new(n_nodes: usize) -> Self {
        Self {
            parent: (0..n_nodes).collect(),
            rank: vec![0; n_nodes],
            variable: vec![false; n_nodes],
            oriented: vec![false; n_nodes],
            anchors: Vec::new(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            let root = self.find(self.parent[i]);
            self.parent[i] = root;
        }
        self.parent[i]
    }

    /// Record an edge that fixes the relative pose of `a` and `b`
    pub fn link(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        if self.rank[ra] < self.rank[rb] {
            self.parent[ra] = rb;
        } else if self.rank[ra] > self.rank[rb] {
            self.parent[rb] = ra;
        } else {
            self.parent[rb] = ra;
            self.rank[ra] += 1;
        }
    }

    /// Mark a node as owning at least one variable block
    pub fn mark_variable(&mut self, node: usize) {
        self.variable[node] = true;
    }

    /// Mark a node whose orientation enters at least one residual
    pub fn mark_oriented(&mut self, node: usize) {
        self.oriented[node] = true;
    }

    pub fn anchor(&mut self, node: usize, anchor: Anchor) {
        self.anchors.push((node, anchor));
    }

    /// Total number of unconstrained gauge directions over all components
    /// that contain a variable block
    pub fn deficiency(&mut self) -> usize {
        #[derive(Default)]
        struct Component {
            variable: bool,
            oriented: bool,
            pose: bool,
            orientation: bool,
            points: Vec<Vec3<f64>>,
        }

        let mut components: HashMap<usize, Component> = HashMap::new();
        for node in 0..self.parent.len() {
            let root = self.find(node);
            let component = components.entry(root).or_default();
            component.variable |= self.variable[node];
            component.oriented |= self.oriented[node];
        }
        let anchors = std::mem::take(&mut self.anchors);
        for &(node, anchor) in &anchors {
            let root = self.find(node);
            let component = components.entry(root).or_default();
            match anchor {
                Anchor::Pose => component.pose = true,
                Anchor::Orientation => component.orientation = true,
                Anchor::Point(p) => component.points.push(p),
            }
        }
        self.anchors = anchors;

        components
            .values()
            .filter(|c| c.variable && !c.pose)
            .map(|c| {
                let translation = if c.points.is_empty() { 3 } else { 0 };
                let rotation = if c.orientation || !c.oriented {
                    0
                } else {
                    match affine_rank(&c.points) {
                        0 => 3,
                        1 => 1,
                        _ => 0,
                    }
                };
                translation + rotation
            })
            .sum()
    }
}

/// Dimension of the affine hull of `points` (0 for none or coincident)
pub fn affine_rank(points: &[Vec3<f64>]) -> usize {
    if points.len() < 2 {
        return 0;
    }
    let to_vector = |p: &Vec3<f64>| Vector3::new(p.x, p.y, p.z);
    let mean = points.iter().map(to_vector).sum::<Vector3<f64>>() / points.len() as f64;
    let scale = points
        .iter()
        .map(|p| to_vector(p).norm_squared())
        .fold(1.0, f64::max);

    let scatter: Matrix3<f64> = points
        .iter()
        .map(|p| {
            let d = to_vector(p) - mean;
            d * d.transpose()
        })
        .sum();
    let eigenvalues = SymmetricEigen::new(scatter).eigenvalues;
    let largest = eigenvalues.amax();
    if largest <= 1e-18 * scale {
        return 0;
    }
    eigenvalues.iter().filter(|&&e| e > 1e-10 * largest).count()
}
