//! The octree store: owns every node and block in pooled arenas addressed
//! by integer handles.
//!
//! Handles stay valid for the map's lifetime; deleted octants go onto free
//! lists and their slots are reinitialised on reuse, so allocation is O(1)
//! amortised.

use glam::IVec3;

use super::block::BlockStorage;
use super::node::Node;
use super::octant::{
  child_idx, child_offset, map_size_up, size_to_scale, BlockId, NodeId, OctantRef, BLOCK_SIZE,
};
use crate::error::MapError;

/// Inclusive voxel-space bounding box of all allocated blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoxelAabb {
  pub min: IVec3,
  pub max: IVec3,
}

impl VoxelAabb {
  pub fn contains(&self, voxel: IVec3) -> bool {
    voxel.cmpge(self.min).all() && voxel.cmple(self.max).all()
  }
}

pub struct Octree<B: BlockStorage> {
  size: i32,
  nodes: Vec<Node<B::Data>>,
  blocks: Vec<B>,
  free_nodes: Vec<NodeId>,
  free_blocks: Vec<BlockId>,
  root: NodeId,
  aabb: Option<VoxelAabb>,
  /// Upper bound on live octants; exceeding it is fatal.
  octant_limit: usize,
}

impl<B: BlockStorage> Octree<B> {
  /// Create an octree covering a cube of side `size` voxels (rounded up to
  /// a power of two, at least twice the block edge).
  pub fn new(size: i32) -> Self {
    let size = map_size_up(size);
    let root_node = Node::new(IVec3::ZERO, size, None, B::Data::default());
    Self {
      size,
      nodes: vec![root_node],
      blocks: Vec::new(),
      free_nodes: Vec::new(),
      free_blocks: Vec::new(),
      root: NodeId(0),
      aabb: None,
      octant_limit: usize::MAX,
    }
  }

  pub fn with_octant_limit(mut self, limit: usize) -> Self {
    self.octant_limit = limit;
    self
  }

  #[inline]
  pub fn size(&self) -> i32 {
    self.size
  }

  /// Scale of the root octant.
  #[inline]
  pub fn max_scale(&self) -> i32 {
    size_to_scale(self.size)
  }

  /// Tree depth at which blocks live.
  #[inline]
  pub fn block_depth(&self) -> i32 {
    self.max_scale() - size_to_scale(BLOCK_SIZE)
  }

  #[inline]
  pub fn root(&self) -> NodeId {
    self.root
  }

  #[inline]
  pub fn node(&self, id: NodeId) -> &Node<B::Data> {
    &self.nodes[id.0 as usize]
  }

  #[inline]
  pub fn node_mut(&mut self, id: NodeId) -> &mut Node<B::Data> {
    &mut self.nodes[id.0 as usize]
  }

  #[inline]
  pub fn block(&self, id: BlockId) -> &B {
    &self.blocks[id.0 as usize]
  }

  #[inline]
  pub fn block_mut(&mut self, id: BlockId) -> &mut B {
    &mut self.blocks[id.0 as usize]
  }

  /// Live octant count (allocated minus freed).
  pub fn octant_count(&self) -> usize {
    self.nodes.len() + self.blocks.len() - self.free_nodes.len() - self.free_blocks.len()
  }

  pub fn node_count(&self) -> usize {
    self.nodes.len() - self.free_nodes.len()
  }

  pub fn block_count(&self) -> usize {
    self.blocks.len() - self.free_blocks.len()
  }

  /// Whether a voxel coordinate lies inside the map cube.
  #[inline]
  pub fn contains(&self, voxel: IVec3) -> bool {
    voxel.cmpge(IVec3::ZERO).all() && voxel.cmplt(IVec3::splat(self.size)).all()
  }

  /// Bounding box of every allocated block, `None` while no block exists.
  #[inline]
  pub fn aabb(&self) -> Option<VoxelAabb> {
    self.aabb
  }

  fn aabb_extend(&mut self, coord: IVec3, size: i32) {
    let octant_max = coord + IVec3::splat(size - 1);
    self.aabb = Some(match self.aabb {
      None => VoxelAabb {
        min: coord,
        max: octant_max,
      },
      Some(aabb) => VoxelAabb {
        min: aabb.min.min(coord),
        max: aabb.max.max(octant_max),
      },
    });
  }

  pub fn coord_of(&self, octant: OctantRef) -> IVec3 {
    match octant {
      OctantRef::Node(id) => self.node(id).coord,
      OctantRef::Block(id) => self.block(id).coord(),
    }
  }

  pub fn size_of(&self, octant: OctantRef) -> i32 {
    match octant {
      OctantRef::Node(id) => self.node(id).size,
      OctantRef::Block(_) => BLOCK_SIZE,
    }
  }

  pub fn timestamp_of(&self, octant: OctantRef) -> u64 {
    match octant {
      OctantRef::Node(id) => self.node(id).timestamp,
      OctantRef::Block(id) => self.block(id).timestamp(),
    }
  }

  pub fn parent_of(&self, octant: OctantRef) -> Option<NodeId> {
    match octant {
      OctantRef::Node(id) => self.node(id).parent,
      OctantRef::Block(id) => Some(self.block(id).parent()),
    }
  }

  // ---------------------------------------------------------------------------
  // Allocation
  // ---------------------------------------------------------------------------

  fn check_limit(&self) -> Result<(), MapError> {
    if self.octant_count() >= self.octant_limit {
      Err(MapError::ResourceExhausted)
    } else {
      Ok(())
    }
  }

  fn pool_node(&mut self, coord: IVec3, size: i32, parent: NodeId, data: B::Data) -> NodeId {
    match self.free_nodes.pop() {
      Some(id) => {
        self.nodes[id.0 as usize].reset(coord, size, Some(parent), data);
        id
      }
      None => {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(coord, size, Some(parent), data));
        id
      }
    }
  }

  fn pool_block(&mut self, coord: IVec3, parent: NodeId, data: B::Data) -> BlockId {
    match self.free_blocks.pop() {
      Some(id) => {
        self.blocks[id.0 as usize].reset(coord, parent, data);
        id
      }
      None => {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(B::new(coord, parent, data));
        id
      }
    }
  }

  /// Allocate the child in `slot` of `parent`, seeding it from the parent's
  /// data. Returns the child and whether it was newly allocated.
  pub fn allocate(
    &mut self,
    parent: NodeId,
    slot: usize,
  ) -> Result<(OctantRef, bool), MapError> {
    debug_assert!(slot < 8);
    if let Some(child) = self.node(parent).child(slot) {
      return Ok((child, false));
    }
    self.check_limit()?;

    let parent_node = self.node(parent);
    let child_size = parent_node.size / 2;
    let child_coord = parent_node.coord + child_offset(slot) * child_size;
    let init_data = parent_node.data;

    let child = if child_size == BLOCK_SIZE {
      let id = self.pool_block(child_coord, parent, init_data);
      self.aabb_extend(child_coord, BLOCK_SIZE);
      OctantRef::Block(id)
    } else {
      OctantRef::Node(self.pool_node(child_coord, child_size, parent, init_data))
    };
    self.node_mut(parent).set_child(slot, child);
    Ok((child, true))
  }

  /// Allocate any missing children of `parent`.
  pub fn allocate_all_children(&mut self, parent: NodeId) -> Result<(), MapError> {
    for slot in 0..8 {
      self.allocate(parent, slot)?;
    }
    Ok(())
  }

  /// Recursively delete the subtree below `parent`, keeping the node itself
  /// as a leaf summary.
  pub fn delete_children(&mut self, parent: NodeId) {
    for slot in 0..8 {
      let Some(child) = self.node(parent).child(slot) else {
        continue;
      };
      match child {
        OctantRef::Block(id) => self.free_blocks.push(id),
        OctantRef::Node(id) => {
          self.delete_children(id);
          self.free_nodes.push(id);
        }
      }
      self.node_mut(parent).clear_child(slot);
    }
  }

  // ---------------------------------------------------------------------------
  // Fetching
  // ---------------------------------------------------------------------------

  /// The deepest allocated octant containing `voxel`.
  pub fn find_octant(&self, voxel: IVec3) -> OctantRef {
    debug_assert!(self.contains(voxel));
    let mut current = self.root;
    loop {
      let node = self.node(current);
      match node.child(child_idx(voxel, node.size / 2)) {
        Some(OctantRef::Node(id)) => current = id,
        Some(OctantRef::Block(id)) => return OctantRef::Block(id),
        None => return OctantRef::Node(current),
      }
    }
  }

  /// The allocated block containing `voxel`, if any.
  pub fn find_block(&self, voxel: IVec3) -> Option<BlockId> {
    if !self.contains(voxel) {
      return None;
    }
    self.find_octant(voxel).as_block()
  }

  /// The deepest allocated octant containing `voxel` whose edge is at least
  /// `2^scale` voxels.
  pub fn find_octant_at_scale(&self, voxel: IVec3, scale: i32) -> OctantRef {
    debug_assert!(self.contains(voxel));
    let min_size = 1 << scale;
    let mut current = self.root;
    loop {
      let node = self.node(current);
      if node.size <= min_size {
        return OctantRef::Node(current);
      }
      match node.child(child_idx(voxel, node.size / 2)) {
        Some(OctantRef::Node(id)) => current = id,
        Some(OctantRef::Block(id)) => return OctantRef::Block(id),
        None => return OctantRef::Node(current),
      }
    }
  }

  /// Descend from the root to the block containing `voxel`, allocating
  /// every missing octant on the way down.
  pub fn allocate_block_at(&mut self, voxel: IVec3) -> Result<(BlockId, bool), MapError> {
    debug_assert!(self.contains(voxel));
    let mut current = self.root;
    let mut newly_allocated = false;
    loop {
      let slot = child_idx(voxel, self.node(current).size / 2);
      let (child, fresh) = self.allocate(current, slot)?;
      newly_allocated |= fresh;
      match child {
        OctantRef::Node(id) => current = id,
        OctantRef::Block(id) => return Ok((id, newly_allocated)),
      }
    }
  }

  /// Split borrows over the two pools so callers can mutate blocks while
  /// reading nodes (or vice versa).
  pub fn split_pools_mut(&mut self) -> (&mut [Node<B::Data>], &mut [B]) {
    (&mut self.nodes, &mut self.blocks)
  }

  /// Disjoint mutable borrows of a set of blocks, for sharded updates.
  ///
  /// `ids` must be unique; the returned references come back in the same
  /// order.
  pub fn blocks_mut(&mut self, ids: &[BlockId]) -> Vec<&mut B> {
    debug_assert!({
      let mut sorted: Vec<_> = ids.to_vec();
      sorted.sort_unstable();
      sorted.windows(2).all(|w| w[0] != w[1])
    });
    let mut refs: Vec<Option<&mut B>> = Vec::with_capacity(ids.len());
    refs.resize_with(ids.len(), || None);
    let mut remaining: Vec<(usize, u32)> =
      ids.iter().enumerate().map(|(i, id)| (i, id.0)).collect();
    remaining.sort_unstable_by_key(|&(_, raw)| raw);

    let mut rest: &mut [B] = &mut self.blocks;
    let mut consumed = 0u32;
    for (slot, raw) in remaining {
      let (_, tail) = std::mem::take(&mut rest).split_at_mut((raw - consumed) as usize);
      let (target, tail) = tail.split_first_mut().expect("block id in range");
      refs[slot] = Some(target);
      rest = tail;
      consumed = raw + 1;
    }
    refs.into_iter().map(|r| r.expect("filled above")).collect()
  }
}

#[cfg(test)]
#[path = "tree_test.rs"]
mod tree_test;
