//! Octant addressing: integer handles into the octree arena plus the
//! coordinate/scale arithmetic shared by nodes and blocks.

use glam::IVec3;

/// Block edge length in voxels.
pub const BLOCK_SIZE: i32 = 8;

/// Voxels per block at the finest scale.
pub const BLOCK_SIZE_CB: usize = (BLOCK_SIZE * BLOCK_SIZE * BLOCK_SIZE) as usize;

/// Coarsest block scale: one voxel covering the whole block.
pub const BLOCK_MAX_SCALE: i32 = BLOCK_SIZE.trailing_zeros() as i32;

/// Handle of an interior octant in the node pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Handle of a leaf octant in the block pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Handle of either octant kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OctantRef {
  Node(NodeId),
  Block(BlockId),
}

impl OctantRef {
  #[inline]
  pub fn is_block(self) -> bool {
    matches!(self, OctantRef::Block(_))
  }

  #[inline]
  pub fn as_block(self) -> Option<BlockId> {
    match self {
      OctantRef::Block(id) => Some(id),
      OctantRef::Node(_) => None,
    }
  }

  #[inline]
  pub fn as_node(self) -> Option<NodeId> {
    match self {
      OctantRef::Node(id) => Some(id),
      OctantRef::Block(_) => None,
    }
  }
}

/// Edge length of a voxel cluster at `scale`.
#[inline]
pub fn scale_to_size(scale: i32) -> i32 {
  1 << scale
}

/// Scale of an octant with edge `size` (a power of two).
#[inline]
pub fn size_to_scale(size: i32) -> i32 {
  debug_assert!(size > 0 && (size & (size - 1)) == 0);
  size.trailing_zeros() as i32
}

/// Voxels along one edge of a block level at `scale`.
#[inline]
pub fn size_at_scale(scale: i32) -> i32 {
  BLOCK_SIZE >> scale
}

/// Voxel count of a block level at `scale`.
#[inline]
pub fn num_voxels_at_scale(scale: i32) -> usize {
  let n = size_at_scale(scale) as usize;
  n * n * n
}

/// Child slot of the octant containing `voxel` inside a parent of edge
/// `2 * child_size`: `4x + 2y + z` of the upper-half bits.
#[inline]
pub fn child_idx(voxel: IVec3, child_size: i32) -> usize {
  let shift = size_to_scale(child_size);
  let x = (voxel.x >> shift) & 1;
  let y = (voxel.y >> shift) & 1;
  let z = (voxel.z >> shift) & 1;
  (4 * x + 2 * y + z) as usize
}

/// Unit offset of child slot `idx`, inverse of [`child_idx`].
#[inline]
pub fn child_offset(idx: usize) -> IVec3 {
  IVec3::new(
    ((idx >> 2) & 1) as i32,
    ((idx >> 1) & 1) as i32,
    (idx & 1) as i32,
  )
}

/// Round up to the next power of two, at least `2 * BLOCK_SIZE`.
#[inline]
pub fn map_size_up(size: i32) -> i32 {
  (size.max(2 * BLOCK_SIZE) as u32).next_power_of_two() as i32
}
