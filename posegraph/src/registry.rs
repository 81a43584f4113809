//! Pose registry: keyframe and secondary-frame arenas
//!
//! Keyframes and secondary coordinate frames live in two separate vectors and
//! are addressed by typed indices. Ids are dense, assigned in creation order
//! starting at zero, and never reused. Each node owns its two parameter
//! blocks (orientation, translation) together with their constant flags.

use crate::error::{GraphError, Result};
use crate::math::Pose;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyframeId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecondaryFrameId(pub(crate) usize);

impl KeyframeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl SecondaryFrameId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for KeyframeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "keyframe {}", self.0)
    }
}

impl fmt::Display for SecondaryFrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "secondary frame {}", self.0)
    }
}

/// Either kind of registry entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Node {
    Keyframe(KeyframeId),
    SecondaryFrame(SecondaryFrameId),
}

impl From<KeyframeId> for Node {
    fn from(id: KeyframeId) -> Self {
        Node::Keyframe(id)
    }
}

impl From<SecondaryFrameId> for Node {
    fn from(id: SecondaryFrameId) -> Self {
        Node::SecondaryFrame(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockKind {
    /// Unit quaternion, 4 ambient / 3 tangent parameters
    Orientation,
    /// Euclidean 3-vector
    Translation,
}

/// One of the two parameter blocks of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParameterBlockId {
    pub node: Node,
    pub kind: BlockKind,
}

impl ParameterBlockId {
    pub fn orientation(node: impl Into<Node>) -> Self {
        Self {
            node: node.into(),
            kind: BlockKind::Orientation,
        }
    }

    pub fn translation(node: impl Into<Node>) -> Self {
        Self {
            node: node.into(),
            kind: BlockKind::Translation,
        }
    }
}

/// A pose together with the constant flags of its two parameter blocks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseNode {
    pub pose: Pose<f64>,
    pub orientation_constant: bool,
    pub translation_constant: bool,
}

impl PoseNode {
    fn new(pose: Pose<f64>) -> Self {
        Self {
            pose,
            orientation_constant: false,
            translation_constant: false,
        }
    }

    pub fn is_constant(&self, kind: BlockKind) -> bool {
        match kind {
            BlockKind::Orientation => self.orientation_constant,
            BlockKind::Translation => self.translation_constant,
        }
    }

    pub fn set_constant(&mut self, kind: BlockKind, constant: bool) {
        match kind {
            BlockKind::Orientation => self.orientation_constant = constant,
            BlockKind::Translation => self.translation_constant = constant,
        }
    }

    /// True if both blocks are held constant
    pub fn is_fixed(&self) -> bool {
        self.orientation_constant && self.translation_constant
    }
}

#[derive(Debug, Clone, Default)]
pub struct PoseRegistry {
    keyframes: Vec<PoseNode>,
    secondary_frames: Vec<PoseNode>,
}

fn lookup<'a>(nodes: &'a [PoseNode], kind: &'static str, id: usize) -> Result<&'a PoseNode> {
    nodes.get(id).ok_or(GraphError::InvalidId {
        kind,
        id,
        len: nodes.len(),
    })
}

fn lookup_mut<'a>(
    nodes: &'a mut [PoseNode],
    kind: &'static str,
    id: usize,
) -> Result<&'a mut PoseNode> {
    let len = nodes.len();
    nodes
        .get_mut(id)
        .ok_or(GraphError::InvalidId { kind, id, len })
}

impl PoseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a keyframe; a missing initial pose means identity
    pub fn add_keyframe(&mut self, initial: Option<Pose<f64>>) -> KeyframeId {
        let id = KeyframeId(self.keyframes.len());
        self.keyframes.push(PoseNode::new(initial.unwrap_or_default()));
        id
    }

    pub fn add_secondary_frame(&mut self, initial: Option<Pose<f64>>) -> SecondaryFrameId {
        let id = SecondaryFrameId(self.secondary_frames.len());
        self.secondary_frames
            .push(PoseNode::new(initial.unwrap_or_default()));
        id
    }

    pub fn keyframe(&self, id: KeyframeId) -> Result<&PoseNode> {
        lookup(&self.keyframes, "keyframe", id.0)
    }

    pub fn keyframe_mut(&mut self, id: KeyframeId) -> Result<&mut PoseNode> {
        lookup_mut(&mut self.keyframes, "keyframe", id.0)
    }

    pub fn secondary_frame(&self, id: SecondaryFrameId) -> Result<&PoseNode> {
        lookup(&self.secondary_frames, "secondary frame", id.0)
    }

    pub fn secondary_frame_mut(&mut self, id: SecondaryFrameId) -> Result<&mut PoseNode> {
        lookup_mut(&mut self.secondary_frames, "secondary frame", id.0)
    }

    pub fn node(&self, node: Node) -> Result<&PoseNode> {
        match node {
            Node::Keyframe(id) => self.keyframe(id),
            Node::SecondaryFrame(id) => self.secondary_frame(id),
        }
    }

    pub fn node_mut(&mut self, node: Node) -> Result<&mut PoseNode> {
        match node {
            Node::Keyframe(id) => self.keyframe_mut(id),
            Node::SecondaryFrame(id) => self.secondary_frame_mut(id),
        }
    }

    pub fn keyframe_count(&self) -> usize {
        self.keyframes.len()
    }

    pub fn secondary_frame_count(&self) -> usize {
        self.secondary_frames.len()
    }

    pub fn keyframe_ids(&self) -> impl Iterator<Item = KeyframeId> {
        (0..self.keyframes.len()).map(KeyframeId)
    }

    pub fn secondary_frame_ids(&self) -> impl Iterator<Item = SecondaryFrameId> {
        (0..self.secondary_frames.len()).map(SecondaryFrameId)
    }

    /// All nodes, keyframes first, in id order
    pub fn nodes(&self) -> impl Iterator<Item = (Node, &PoseNode)> {
        let keyframes = self
            .keyframes
            .iter()
            .enumerate()
            .map(|(i, n)| (Node::Keyframe(KeyframeId(i)), n));
        let secondary = self
            .secondary_frames
            .iter()
            .enumerate()
            .map(|(i, n)| (Node::SecondaryFrame(SecondaryFrameId(i)), n));
        keyframes.chain(secondary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;

    #[test]
    fn test_ids_are_dense_and_ordered() {
        let mut registry = PoseRegistry::new();
        let ids: Vec<usize> = (0..5).map(|_| registry.add_keyframe(None).index()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);

        // Secondary frames have their own id space
        assert_eq!(registry.add_secondary_frame(None).index(), 0);
        assert_eq!(registry.add_keyframe(None).index(), 5);
        assert_eq!(registry.add_secondary_frame(None).index(), 1);
        assert_eq!(registry.keyframe_count(), 6);
        assert_eq!(registry.secondary_frame_count(), 2);
    }

    #[test]
    fn test_missing_initial_pose_is_identity() {
        let mut registry = PoseRegistry::new();
        let id = registry.add_keyframe(None);
        let node = registry.keyframe(id).unwrap();
        assert_eq!(node.pose, Pose::identity());
        assert!(!node.orientation_constant && !node.translation_constant);
    }

    #[test]
    fn test_invalid_id() {
        let mut registry = PoseRegistry::new();
        registry.add_keyframe(None);
        let err = registry.keyframe(KeyframeId(3)).unwrap_err();
        assert_eq!(
            err,
            GraphError::InvalidId {
                kind: "keyframe",
                id: 3,
                len: 1
            }
        );
        assert!(registry.secondary_frame(SecondaryFrameId(0)).is_err());
    }

    #[test]
    fn test_block_flags() {
        let mut registry = PoseRegistry::new();
        let pose = Pose::new(crate::math::Quat::identity(), Vec3::new(1.0, 0.0, 0.0));
        let z = registry.add_secondary_frame(Some(pose));
        let node = registry.secondary_frame_mut(z).unwrap();
        node.set_constant(BlockKind::Translation, true);
        assert!(node.is_constant(BlockKind::Translation));
        assert!(!node.is_constant(BlockKind::Orientation));
        assert!(!node.is_fixed());
        node.set_constant(BlockKind::Orientation, true);
        assert!(node.is_fixed());
    }

    #[test]
    fn test_nodes_iteration_order() {
        let mut registry = PoseRegistry::new();
        let k0 = registry.add_keyframe(None);
        let z0 = registry.add_secondary_frame(None);
        let k1 = registry.add_keyframe(None);
        let nodes: Vec<Node> = registry.nodes().map(|(n, _)| n).collect();
        assert_eq!(nodes, vec![k0.into(), k1.into(), z0.into()]);
    }
}
