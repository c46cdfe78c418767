//! Interior octant.

use glam::IVec3;

use super::octant::{NodeId, OctantRef};

/// Interior octant with eight child slots.
///
/// `data` seeds newly allocated children; `min_data`/`max_data` carry
/// aggregate summaries of the subtree for occupancy maps and are left at
/// their defaults for TSDF maps.
#[derive(Clone, Debug)]
pub struct Node<D> {
  /// Minimum-corner voxel coordinate.
  pub coord: IVec3,
  /// Edge length in voxels, a power of two.
  pub size: i32,
  /// Back-pointer; `None` only at the root.
  pub parent: Option<NodeId>,
  children: [Option<OctantRef>; 8],
  /// Bitmask of populated child slots, kept bit-for-bit in sync with the
  /// slots themselves.
  pub children_mask: u8,
  /// Last frame that modified any descendant.
  pub timestamp: u64,
  pub data: D,
  pub min_data: D,
  pub max_data: D,
}

impl<D: Clone + Copy + Default> Node<D> {
  pub fn new(coord: IVec3, size: i32, parent: Option<NodeId>, data: D) -> Self {
    Self {
      coord,
      size,
      parent,
      children: [None; 8],
      children_mask: 0,
      timestamp: 0,
      data,
      min_data: data,
      max_data: data,
    }
  }

  /// Reinitialise a pooled slot for reuse.
  pub fn reset(&mut self, coord: IVec3, size: i32, parent: Option<NodeId>, data: D) {
    *self = Self::new(coord, size, parent, data);
  }

  #[inline]
  pub fn child(&self, idx: usize) -> Option<OctantRef> {
    self.children[idx]
  }

  #[inline]
  pub fn set_child(&mut self, idx: usize, child: OctantRef) {
    self.children[idx] = Some(child);
    self.children_mask |= 1 << idx;
  }

  #[inline]
  pub fn clear_child(&mut self, idx: usize) {
    self.children[idx] = None;
    self.children_mask &= !(1 << idx);
  }

  /// Whether no child slot is populated.
  #[inline]
  pub fn is_leaf(&self) -> bool {
    self.children_mask == 0
  }

  pub fn children(&self) -> impl Iterator<Item = (usize, OctantRef)> + '_ {
    self
      .children
      .iter()
      .enumerate()
      .filter_map(|(idx, child)| child.map(|c| (idx, c)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::data::TsdfData;
  use crate::octree::octant::BlockId;

  #[test]
  fn test_mask_tracks_slots() {
    let mut node: Node<TsdfData> = Node::new(IVec3::ZERO, 16, None, TsdfData::default());
    assert!(node.is_leaf());
    node.set_child(3, OctantRef::Block(BlockId(7)));
    node.set_child(5, OctantRef::Block(BlockId(9)));
    assert_eq!(node.children_mask, (1 << 3) | (1 << 5));
    node.clear_child(3);
    assert_eq!(node.children_mask, 1 << 5);
    assert_eq!(node.children().count(), 1);
  }
}
