//! Up- and down-propagation of data summaries.
//!
//! Block-level passes aggregate every 2x2x2 child octet into its parent
//! voxel up the block pyramid; the root-ward pass then re-aggregates
//! parent nodes depth by depth, keeping the timestamp and min/max
//! invariants that the updated-since iterator and the ray-caster's
//! empty-space skipping rely on.

use std::collections::HashSet;

use super::block::{BlockStorage, MultiResTsdfBlock};
use super::occ_block::MultiResOccBlock;
use super::octant::{size_at_scale, BlockId, NodeId, OctantRef, BLOCK_MAX_SCALE};
use super::tree::Octree;
use crate::data::{OccupancyData, VoxelData};

/// Raise block timestamps into their ancestor chain so that
/// `iter_updated_since` prunes correctly. Idempotent.
pub fn propagate_timestamp_to_root<B: BlockStorage>(octree: &mut Octree<B>, blocks: &[BlockId]) {
  let mut wave: HashSet<NodeId> = HashSet::new();
  for &id in blocks {
    let timestamp = octree.block(id).timestamp();
    let parent = octree.block(id).parent();
    if octree.node(parent).timestamp < timestamp {
      octree.node_mut(parent).timestamp = timestamp;
      wave.insert(parent);
    }
  }
  while !wave.is_empty() {
    let mut next: HashSet<NodeId> = HashSet::new();
    for id in wave {
      let timestamp = octree.node(id).timestamp;
      if let Some(parent) = octree.node(id).parent {
        if octree.node(parent).timestamp < timestamp {
          octree.node_mut(parent).timestamp = timestamp;
          next.insert(parent);
        }
      }
    }
    wave = next;
  }
}

// =============================================================================
// TSDF block pyramid
// =============================================================================

/// Aggregate the TSDF pyramid from `init_scale` up to the coarsest scale:
/// each parent voxel becomes the weight-masked mean of its eight children.
pub fn tsdf_block_up(block: &mut MultiResTsdfBlock, init_scale: i32) {
  for child_scale in init_scale..BLOCK_MAX_SCALE {
    let parent_scale = child_scale + 1;
    let parent_n = size_at_scale(parent_scale);
    for z in 0..parent_n {
      for y in 0..parent_n {
        for x in 0..parent_n {
          let mut tsdf_sum = 0.0f32;
          let mut weight_sum = 0u32;
          let mut count = 0u32;
          for k in 0..2 {
            for j in 0..2 {
              for i in 0..2 {
                let child_idx = MultiResTsdfBlock::level_idx(
                  child_scale,
                  2 * x + i,
                  2 * y + j,
                  2 * z + k,
                );
                let child = *block.voxel(child_idx);
                if child.weight > 0 {
                  tsdf_sum += child.tsdf;
                  weight_sum += child.weight;
                  count += 1;
                }
              }
            }
          }
          let parent_idx = MultiResTsdfBlock::level_idx(parent_scale, x, y, z);
          if count > 0 {
            let parent = block.voxel_mut(parent_idx);
            parent.tsdf = tsdf_sum / count as f32;
            parent.weight = (weight_sum as f32 / count as f32).ceil() as u32;
            let tsdf = parent.tsdf;
            let past = block.past_mut(parent_idx);
            past.delta_tsdf = tsdf;
            past.delta_weight = 0;
          } else {
            *block.voxel_mut(parent_idx) = Default::default();
            *block.past_mut(parent_idx) = Default::default();
          }
        }
      }
    }
  }
}

/// Refresh the level one scale below `parent_scale` from its parents before
/// it becomes the integration target again.
///
/// Children that held data from an earlier fine period absorb the field
/// delta accumulated at the parent since the last propagation; empty
/// children take a plain copy of the parent.
pub fn tsdf_block_down(block: &mut MultiResTsdfBlock, parent_scale: i32, max_weight: u32) {
  debug_assert!(parent_scale > 0);
  let child_scale = parent_scale - 1;
  let parent_n = size_at_scale(parent_scale);
  for z in 0..parent_n {
    for y in 0..parent_n {
      for x in 0..parent_n {
        let parent_idx = MultiResTsdfBlock::level_idx(parent_scale, x, y, z);
        let parent = *block.voxel(parent_idx);
        let parent_past = *block.past(parent_idx);
        let delta_tsdf = parent.tsdf - parent_past.delta_tsdf;
        for k in 0..2 {
          for j in 0..2 {
            for i in 0..2 {
              let child_idx =
                MultiResTsdfBlock::level_idx(child_scale, 2 * x + i, 2 * y + j, 2 * z + k);
              let child = block.voxel_mut(child_idx);
              if child.weight > 0 {
                child.tsdf = (child.tsdf + delta_tsdf).clamp(-1.0, 1.0);
                child.weight = (child.weight + parent_past.delta_weight).min(max_weight);
                block.past_mut(child_idx).delta_weight = parent_past.delta_weight;
              } else {
                child.tsdf = parent.tsdf;
                child.weight = parent.weight;
                let tsdf = parent.tsdf;
                let past = block.past_mut(child_idx);
                past.delta_tsdf = tsdf;
                past.delta_weight = 0;
              }
            }
          }
        }
        let past = block.past_mut(parent_idx);
        past.delta_tsdf = parent.tsdf;
        past.delta_weight = 0;
      }
    }
  }
}

// =============================================================================
// Occupancy block pyramid
// =============================================================================

#[derive(Default)]
struct OctetAggregate {
  mean_occupancy: f32,
  mean_weight: u32,
  min: Option<OccupancyData>,
  max: Option<OccupancyData>,
  count: u32,
  observed_count: u32,
}

impl OctetAggregate {
  fn add(&mut self, mean: OccupancyData, min: OccupancyData, max: OccupancyData) {
    if max.weight > 0 {
      self.count += 1;
      self.mean_occupancy += mean.occupancy;
      self.mean_weight += mean.weight;
      if self.max.map_or(true, |m| max.field() > m.field()) {
        self.max = Some(max);
      }
      if self.min.map_or(true, |m| min.field() < m.field()) {
        self.min = Some(min);
      }
    }
    if max.observed {
      self.observed_count += 1;
    }
  }
}

/// Aggregate mean/min/max in lockstep from the block's current scale up to
/// the coarsest scale.
///
/// The mean aggregate never becomes `observed`; min/max become observed
/// only when all eight children are.
pub fn occ_block_up(block: &mut MultiResOccBlock) {
  let block_coord = block.coord();
  for child_scale in block.current_scale..BLOCK_MAX_SCALE {
    let parent_scale = child_scale + 1;
    let parent_n = size_at_scale(parent_scale);
    let child_stride = 1 << child_scale;
    for z in 0..parent_n {
      for y in 0..parent_n {
        for x in 0..parent_n {
          let parent_voxel =
            block_coord + glam::IVec3::new(x, y, z) * (1 << parent_scale);

          let mut agg = OctetAggregate::default();
          for k in 0..2 {
            for j in 0..2 {
              for i in 0..2 {
                let child_voxel =
                  parent_voxel + glam::IVec3::new(i, j, k) * child_stride;
                let mean = block.data_at_scale_exact(child_voxel, child_scale);
                let min = block.min_data_at_scale(child_voxel, child_scale);
                let max = block.max_data_at_scale(child_voxel, child_scale);
                agg.add(mean, min, max);
              }
            }
          }

          if agg.count == 0 {
            continue;
          }
          let all_observed = agg.observed_count == 8;

          let mean_idx = block.mean_idx(parent_voxel, parent_scale).expect("level allocated");
          {
            let mean = block.voxel_mut(mean_idx);
            mean.occupancy = agg.mean_occupancy / agg.count as f32;
            mean.weight = (agg.mean_weight as f32 / agg.count as f32).ceil() as u32;
            mean.observed = false;
          }
          let min_idx = block.min_idx(parent_voxel, parent_scale).expect("level allocated");
          if let Some(min) = agg.min {
            let slot = block.voxel_mut(min_idx);
            slot.occupancy = min.occupancy;
            slot.weight = min.weight;
            slot.observed = all_observed;
          }
          let max_idx = block.max_idx(parent_voxel, parent_scale).expect("level allocated");
          if let Some(max) = agg.max {
            let slot = block.voxel_mut(max_idx);
            slot.occupancy = max.occupancy;
            slot.weight = max.weight;
            slot.observed = all_observed;
          }
        }
      }
    }
  }
}

// =============================================================================
// Root-ward propagation (occupancy)
// =============================================================================

/// Re-aggregate an interior node from its children, stamping `frame`.
/// Returns the node's new max summary.
pub fn occ_node_up(
  octree: &mut Octree<MultiResOccBlock>,
  node_id: NodeId,
  frame: u64,
) -> OccupancyData {
  let mut agg = OctetAggregate::default();
  for slot in 0..8 {
    let Some(child) = octree.node(node_id).child(slot) else {
      continue;
    };
    let (min, max) = match child {
      OctantRef::Block(id) => {
        let block = octree.block(id);
        (block.min_data(), block.max_data())
      }
      OctantRef::Node(id) => {
        let node = octree.node(id);
        (node.min_data, node.max_data)
      }
    };
    // Node aggregation only tracks the min/max envelopes; reuse the max
    // record as the mean slot, it is ignored below.
    agg.add(max, min, max);
  }

  let all_observed = agg.observed_count == 8;
  let node = octree.node_mut(node_id);
  node.timestamp = frame;
  if let Some(min) = agg.min {
    node.min_data.occupancy = min.occupancy;
    node.min_data.weight = min.weight;
    if all_observed {
      node.min_data.observed = true;
    }
  }
  if let Some(max) = agg.max {
    node.max_data.occupancy = max.occupancy;
    node.max_data.weight = max.weight;
    if all_observed {
      node.max_data.observed = true;
    }
  }
  node.max_data
}

/// Propagate the frame's touched blocks up to the root, pruning subtrees
/// that have collapsed into confidently free space.
///
/// Nodes already stamped with `frame` are skipped, which both dedupes the
/// per-depth working sets and makes the pass idempotent. Returns the number
/// of pruned subtree roots.
pub fn occ_propagate_to_root(
  octree: &mut Octree<MultiResOccBlock>,
  touched: &[BlockId],
  touched_nodes: &[NodeId],
  frame: u64,
  min_occupancy: f32,
) -> usize {
  let block_depth = octree.block_depth();
  if block_depth == 0 {
    return 0;
  }
  let mut node_sets: Vec<HashSet<NodeId>> = vec![HashSet::new(); block_depth as usize];

  for &id in touched {
    node_sets[(block_depth - 1) as usize].insert(octree.block(id).parent());
  }
  // Bulk-freed nodes enter the wave at their parent's depth.
  let max_scale = octree.max_scale();
  for &id in touched_nodes {
    if let Some(parent) = octree.node(id).parent {
      let depth = max_scale - super::octant::size_to_scale(octree.node(id).size);
      if depth >= 1 {
        node_sets[(depth - 1) as usize].insert(parent);
      }
    }
  }

  let mut prune: Vec<NodeId> = Vec::new();
  for depth in (1..block_depth).rev() {
    let set: Vec<NodeId> = node_sets[depth as usize].iter().copied().collect();
    for node_id in set {
      if octree.node(node_id).timestamp == frame {
        continue;
      }
      let Some(parent) = octree.node(node_id).parent else {
        continue;
      };
      let max_summary = occ_node_up(octree, node_id, frame);
      node_sets[(depth - 1) as usize].insert(parent);

      if max_summary.observed && max_summary.field() <= 0.95 * min_occupancy {
        prune.push(node_id);
      }
    }
  }
  let root_set: Vec<NodeId> = node_sets[0].iter().copied().collect();
  for node_id in root_set {
    if octree.node(node_id).timestamp != frame {
      occ_node_up(octree, node_id, frame);
    }
  }

  let pruned = prune.len();
  for node_id in prune {
    // The subtree is uniformly free; keep its summary as the node's own
    // record so queries over the collapsed region stay answerable.
    let summary = octree.node(node_id).max_data;
    octree.delete_children(node_id);
    octree.node_mut(node_id).data = summary;
  }
  pruned
}

#[cfg(test)]
#[path = "propagator_test.rs"]
mod propagator_test;
