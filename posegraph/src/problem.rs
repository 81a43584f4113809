//! The least-squares problem: registry entities plus the edges between them

use crate::config::PoseGraphConfig;
use crate::edges::{Edge, MAX_RESIDUAL_DIM};
use crate::error::{GraphError, Result};
use crate::math::{Pose, Vec3};
use crate::registry::{
    BlockKind, KeyframeId, Node, ParameterBlockId, PoseNode, PoseRegistry, SecondaryFrameId,
};
use tracing::debug;

/// Parameter blocks and residual terms of a pose graph
///
/// Every keyframe and secondary frame contributes an orientation block and a
/// translation block; every edge contributes one residual term. Edges refer
/// to entities by id and are immutable once added.
#[derive(Debug, Clone)]
pub struct Problem {
    registry: PoseRegistry,
    edges: Vec<Edge>,
    position_prior_weight: f64,
    freeze_secondary_translation: bool,
}

impl Default for Problem {
    fn default() -> Self {
        Self::new(&PoseGraphConfig::default())
    }
}

fn check_pose(pose: &Pose<f64>) -> Result<()> {
    if pose.is_finite() {
        Ok(())
    } else {
        Err(GraphError::NonFinite("pose"))
    }
}

impl Problem {
    pub fn new(config: &PoseGraphConfig) -> Self {
        Self {
            registry: PoseRegistry::new(),
            edges: Vec::new(),
            position_prior_weight: config.position_prior_weight,
            freeze_secondary_translation: config.freeze_secondary_translation,
        }
    }

    pub fn registry(&self) -> &PoseRegistry {
        &self.registry
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn keyframe_count(&self) -> usize {
        self.registry.keyframe_count()
    }

    pub fn secondary_frame_count(&self) -> usize {
        self.registry.secondary_frame_count()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn residual_count(&self) -> usize {
        self.edges.iter().map(Edge::residual_dim).sum()
    }

    // ========================================================================
    // Entities
    // ========================================================================

    pub fn add_keyframe(&mut self, initial: Option<Pose<f64>>) -> Result<KeyframeId> {
        if let Some(pose) = &initial {
            check_pose(pose)?;
        }
        Ok(self.registry.add_keyframe(initial))
    }

    pub fn add_secondary_frame(&mut self, initial: Option<Pose<f64>>) -> Result<SecondaryFrameId> {
        if let Some(pose) = &initial {
            check_pose(pose)?;
        }
        Ok(self.registry.add_secondary_frame(initial))
    }

    pub fn keyframe(&self, id: KeyframeId) -> Result<&PoseNode> {
        self.registry.keyframe(id)
    }

    pub fn secondary_frame(&self, id: SecondaryFrameId) -> Result<&PoseNode> {
        self.registry.secondary_frame(id)
    }

    pub fn set_keyframe_pose(&mut self, id: KeyframeId, pose: Pose<f64>) -> Result<()> {
        check_pose(&pose)?;
        self.registry.keyframe_mut(id)?.pose = pose;
        Ok(())
    }

    pub fn set_secondary_frame_pose(
        &mut self,
        id: SecondaryFrameId,
        pose: Pose<f64>,
    ) -> Result<()> {
        check_pose(&pose)?;
        self.registry.secondary_frame_mut(id)?.pose = pose;
        Ok(())
    }

    // ========================================================================
    // Edges
    // ========================================================================

    fn push_edge(&mut self, edge: Edge) -> Result<()> {
        if !edge.is_finite() {
            return Err(GraphError::NonFinite("measurement"));
        }
        for node in edge.nodes() {
            self.registry.node(node)?;
        }
        self.edges.push(edge);
        Ok(())
    }

    /// Constrain a keyframe to a measured absolute pose
    pub fn add_absolute_edge(&mut self, keyframe: KeyframeId, measured: Pose<f64>) -> Result<()> {
        self.push_edge(Edge::UnaryAbsolute { keyframe, measured })
    }

    /// Constrain a keyframe's position to a measured point
    pub fn add_unary_edge(&mut self, keyframe: KeyframeId, measured: Vec3<f64>) -> Result<()> {
        let weight = self.position_prior_weight;
        self.push_edge(Edge::UnaryPosition {
            keyframe,
            measured,
            weight,
        })
    }

    /// Constrain `pose_b⁻¹ · pose_a` to `t_ba`
    pub fn add_binary_edge(&mut self, b: KeyframeId, a: KeyframeId, t_ba: Pose<f64>) -> Result<()> {
        if a == b {
            return Err(GraphError::SelfEdge(a.index()));
        }
        self.push_edge(Edge::BinaryRelative { b, a, t_ba })
    }

    /// Relate a keyframe to a pose measured in a secondary coordinate system
    ///
    /// With `freeze_secondary_translation` set, the secondary frame's
    /// translation block becomes constant so only its rotation is estimated.
    pub fn add_indirect_unary_edge(
        &mut self,
        keyframe: KeyframeId,
        frame: SecondaryFrameId,
        measured: Pose<f64>,
    ) -> Result<()> {
        self.push_edge(Edge::IndirectUnary {
            keyframe,
            frame,
            measured,
        })?;
        if self.freeze_secondary_translation {
            self.registry.secondary_frame_mut(frame)?.translation_constant = true;
        }
        Ok(())
    }

    /// Create a keyframe at `pose(anchor) · t_ak` linked to `anchor` by a
    /// relative edge
    pub fn add_relative_keyframe(
        &mut self,
        anchor: KeyframeId,
        t_ak: Pose<f64>,
    ) -> Result<KeyframeId> {
        check_pose(&t_ak)?;
        let anchor_pose = self.registry.keyframe(anchor)?.pose;
        let id = self.registry.add_keyframe(Some(anchor_pose * t_ak));
        self.push_edge(Edge::BinaryRelative {
            b: anchor,
            a: id,
            t_ba: t_ak,
        })?;
        Ok(id)
    }

    // ========================================================================
    // Constant / variable flags
    // ========================================================================

    pub fn set_parameter_block_constant(&mut self, block: ParameterBlockId) -> Result<()> {
        self.registry.node_mut(block.node)?.set_constant(block.kind, true);
        Ok(())
    }

    pub fn set_parameter_block_variable(&mut self, block: ParameterBlockId) -> Result<()> {
        self.registry.node_mut(block.node)?.set_constant(block.kind, false);
        Ok(())
    }

    pub fn set_keyframe_constant(&mut self, id: KeyframeId) -> Result<()> {
        let node = self.registry.keyframe_mut(id)?;
        node.orientation_constant = true;
        node.translation_constant = true;
        Ok(())
    }

    pub fn set_keyframe_variable(&mut self, id: KeyframeId) -> Result<()> {
        let node = self.registry.keyframe_mut(id)?;
        node.orientation_constant = false;
        node.translation_constant = false;
        Ok(())
    }

    /// Make both blocks of a secondary frame variable
    pub fn set_secondary_frame_free(&mut self, id: SecondaryFrameId) -> Result<()> {
        let node = self.registry.secondary_frame_mut(id)?;
        node.orientation_constant = false;
        node.translation_constant = false;
        debug!(frame = id.index(), "secondary frame set free");
        Ok(())
    }

    pub fn is_constant(&self, block: ParameterBlockId) -> Result<bool> {
        Ok(self.registry.node(block.node)?.is_constant(block.kind))
    }

    /// Variable parameter blocks in column order: node order, orientation
    /// before translation
    pub fn variable_blocks(&self) -> Vec<ParameterBlockId> {
        self.registry
            .nodes()
            .flat_map(|(node, pose_node)| {
                [BlockKind::Orientation, BlockKind::Translation]
                    .into_iter()
                    .filter(move |&kind| !pose_node.is_constant(kind))
                    .map(move |kind| ParameterBlockId { node, kind })
            })
            .collect()
    }

    pub fn pose(&self, node: Node) -> Result<Pose<f64>> {
        Ok(self.registry.node(node)?.pose)
    }

    /// Write back a solver iterate; nodes are never removed, so a missing
    /// node can only come from a different problem and is skipped
    pub(crate) fn store_pose(&mut self, node: Node, pose: Pose<f64>) {
        if let Ok(entry) = self.registry.node_mut(node) {
            entry.pose = pose;
        }
    }

    /// ½ Σ |r|² at the current poses
    pub fn cost(&self) -> Result<f64> {
        let mut total = 0.0;
        let mut out = [0.0; MAX_RESIDUAL_DIM];
        for edge in &self.edges {
            let poses = edge
                .nodes()
                .into_iter()
                .map(|n| self.pose(n))
                .collect::<Result<Vec<_>>>()?;
            let dim = edge.residual_dim();
            edge.residual(&poses, &mut out[..dim]);
            total += out[..dim].iter().map(|r| r * r).sum::<f64>();
        }
        Ok(0.5 * total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Quat;
    use approx::assert_abs_diff_eq;

    fn translation(x: f64, y: f64, z: f64) -> Pose<f64> {
        Pose::new(Quat::identity(), Vec3::new(x, y, z))
    }

    #[test]
    fn test_self_edge_rejected() {
        let mut problem = Problem::default();
        let k = problem.add_keyframe(None).unwrap();
        assert_eq!(
            problem.add_binary_edge(k, k, Pose::identity()),
            Err(GraphError::SelfEdge(0))
        );
        assert_eq!(problem.edge_count(), 0);
    }

    #[test]
    fn test_edge_with_unknown_id_rejected() {
        let mut problem = Problem::default();
        let k = problem.add_keyframe(None).unwrap();
        let missing = KeyframeId(7);
        assert!(matches!(
            problem.add_binary_edge(k, missing, Pose::identity()),
            Err(GraphError::InvalidId { id: 7, .. })
        ));
        assert!(problem
            .add_indirect_unary_edge(k, SecondaryFrameId(0), Pose::identity())
            .is_err());
        assert_eq!(problem.edge_count(), 0);
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut problem = Problem::default();
        let k = problem.add_keyframe(None).unwrap();
        let bad = translation(f64::NAN, 0.0, 0.0);
        assert_eq!(problem.add_keyframe(Some(bad)), Err(GraphError::NonFinite("pose")));
        assert_eq!(
            problem.add_absolute_edge(k, bad),
            Err(GraphError::NonFinite("measurement"))
        );
        assert!(problem.add_unary_edge(k, Vec3::new(0.0, f64::INFINITY, 0.0)).is_err());
        assert!(problem.set_keyframe_pose(k, bad).is_err());
        assert_eq!(problem.keyframe_count(), 1);
    }

    #[test]
    fn test_relative_keyframe_placement() {
        let mut problem = Problem::default();
        let anchor = problem
            .add_keyframe(Some(Pose::from_rotation_vector(
                Vec3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2),
                Vec3::new(1.0, 0.0, 0.0),
            )))
            .unwrap();
        let k = problem.add_relative_keyframe(anchor, translation(2.0, 0.0, 0.0)).unwrap();

        let pose = problem.keyframe(k).unwrap().pose;
        assert_abs_diff_eq!(pose.translation.x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pose.translation.y, 2.0, epsilon = 1e-12);
        assert_eq!(problem.edge_count(), 1);
        assert_abs_diff_eq!(problem.cost().unwrap(), 0.0, epsilon = 1e-20);
    }

    #[test]
    fn test_indirect_edge_freezes_secondary_translation() {
        let mut problem = Problem::default();
        let k = problem.add_keyframe(None).unwrap();
        let z = problem.add_secondary_frame(None).unwrap();
        problem.add_indirect_unary_edge(k, z, Pose::identity()).unwrap();

        let node = problem.secondary_frame(z).unwrap();
        assert!(node.translation_constant);
        assert!(!node.orientation_constant);

        problem.set_secondary_frame_free(z).unwrap();
        let node = problem.secondary_frame(z).unwrap();
        assert!(!node.translation_constant && !node.orientation_constant);
    }

    #[test]
    fn test_indirect_edge_freeze_can_be_disabled() {
        let config = PoseGraphConfig::default().with_freeze_secondary_translation(false);
        let mut problem = Problem::new(&config);
        let k = problem.add_keyframe(None).unwrap();
        let z = problem.add_secondary_frame(None).unwrap();
        problem.add_indirect_unary_edge(k, z, Pose::identity()).unwrap();
        assert!(!problem.secondary_frame(z).unwrap().translation_constant);
    }

    #[test]
    fn test_variable_blocks_order() {
        let mut problem = Problem::default();
        let k0 = problem.add_keyframe(None).unwrap();
        let k1 = problem.add_keyframe(None).unwrap();
        let z = problem.add_secondary_frame(None).unwrap();
        problem.set_keyframe_constant(k0).unwrap();
        problem
            .set_parameter_block_constant(ParameterBlockId::orientation(z))
            .unwrap();

        assert_eq!(
            problem.variable_blocks(),
            vec![
                ParameterBlockId::orientation(k1),
                ParameterBlockId::translation(k1),
                ParameterBlockId::translation(z),
            ]
        );

        problem.set_keyframe_variable(k0).unwrap();
        assert_eq!(problem.variable_blocks().len(), 5);
    }

    #[test]
    fn test_unary_edge_uses_configured_weight() {
        let config = PoseGraphConfig::default().with_position_prior_weight(2.0);
        let mut problem = Problem::new(&config);
        let k = problem.add_keyframe(None).unwrap();
        problem.add_unary_edge(k, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        // ½ (2 · 1)²
        assert_abs_diff_eq!(problem.cost().unwrap(), 2.0, epsilon = 1e-12);
    }
}
