//! The octree store: octant arenas, block storage flavours, iterators and
//! propagation.
//!
//! # Structure
//!
//! - [`octant`]: handles, block constants, coordinate/scale math
//! - [`node`]: interior octants with child masks and data summaries
//! - [`block`]: single-res grid, multi-res TSDF pyramid, scale-switch state
//! - [`occ_block`]: multi-res occupancy block with aliased pyramids
//! - [`tree`]: the arena octree with pooled allocation
//! - [`iter`]: depth-first iterator variants
//! - [`propagator`]: block-up/down and root-ward aggregation

pub mod block;
pub mod iter;
pub mod node;
pub mod occ_block;
pub mod octant;
pub mod propagator;
pub mod tree;

pub use block::{
  BlockStorage, MultiResTsdfBlock, PendingSwitch, ScaleSwitch, SingleResBlock, TsdfDelta,
};
pub use node::Node;
pub use occ_block::MultiResOccBlock;
pub use octant::{BlockId, NodeId, OctantRef, BLOCK_MAX_SCALE, BLOCK_SIZE, BLOCK_SIZE_CB};
pub use tree::{Octree, VoxelAabb};
