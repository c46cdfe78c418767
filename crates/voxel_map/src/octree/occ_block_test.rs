use glam::IVec3;

use super::*;
use crate::octree::block::SWITCH_MIN_INTEGRATIONS;
use crate::octree::octant::NodeId;

fn free_data(weight: u32) -> OccupancyData {
  OccupancyData {
    occupancy: -5.015,
    weight,
    observed: true,
    ..OccupancyData::default()
  }
}

#[test]
fn test_new_block_has_single_aliased_level() {
  let block = MultiResOccBlock::new(IVec3::ZERO, NodeId(0), OccupancyData::default());
  assert_eq!(block.alloc_scale(), BLOCK_MAX_SCALE);
  assert!(block.is_aliased(BLOCK_MAX_SCALE));
  assert!(block.mean_level(0).is_none());
  assert_eq!(block.min_scale, -1);
}

#[test]
fn test_allocate_down_to_aliases_only_finest() {
  let mut block = MultiResOccBlock::new(IVec3::ZERO, NodeId(0), OccupancyData::default());
  block.allocate_down_to(1);
  assert_eq!(block.alloc_scale(), 1);
  // The finest allocated scale shares one segment for mean/min/max.
  assert!(block.is_aliased(1));
  // Interior scales have three distinct segments.
  assert!(!block.is_aliased(2));
  assert!(!block.is_aliased(BLOCK_MAX_SCALE));
  assert_eq!(block.mean_level(1).unwrap().len(), 64);
  assert_eq!(block.mean_level(2).unwrap().len(), 8);
}

#[test]
fn test_aliasing_reads_through_all_three_pyramids() {
  let mut block = MultiResOccBlock::new(IVec3::ZERO, NodeId(0), OccupancyData::default());
  block.allocate_down_to(0);
  let idx = block.mean_idx(IVec3::new(2, 3, 4), 0).unwrap();
  block.voxel_mut(idx).occupancy = -1.5;
  block.voxel_mut(idx).weight = 4;
  let v = IVec3::new(2, 3, 4);
  assert_eq!(block.min_data_at_scale(v, 0).occupancy, -1.5);
  assert_eq!(block.max_data_at_scale(v, 0).occupancy, -1.5);
}

#[test]
fn test_allocate_down_keeps_coarse_content() {
  let mut block = MultiResOccBlock::new(IVec3::ZERO, NodeId(0), OccupancyData::default());
  let idx = block.mean_idx(IVec3::ZERO, BLOCK_MAX_SCALE).unwrap();
  *block.voxel_mut(idx) = free_data(7);
  block.allocate_down_to(1);
  // The old aliased level carried its mean content into the new min/max
  // segments.
  assert_eq!(block.max_data().weight, 7);
  assert_eq!(block.min_data().weight, 7);
}

#[test]
fn test_delete_up_to_restores_alias() {
  let mut block = MultiResOccBlock::new(IVec3::ZERO, NodeId(0), OccupancyData::default());
  block.allocate_down_to(0);
  block.delete_up_to(2);
  assert_eq!(block.alloc_scale(), 2);
  assert!(block.is_aliased(2));
  assert!(block.mean_level(0).is_none());
  assert!(block.mean_level(1).is_none());
}

#[test]
fn test_unallocated_scale_reads_init_data() {
  let init = free_data(3);
  let block = MultiResOccBlock::new(IVec3::ZERO, NodeId(0), init);
  let data = block.data_at_scale_exact(IVec3::new(1, 1, 1), 0);
  assert_eq!(data.weight, 3);
  assert!(data.observed);
}

#[test]
fn test_switch_requires_both_thresholds() {
  let mut block = MultiResOccBlock::new(IVec3::ZERO, NodeId(0), OccupancyData::default());
  block.allocate_down_to(1);
  block.current_scale = 1;
  block.min_scale = 1;
  block.curr_observed_count = 64;

  block.init_buffer(0);
  {
    let pending = block.switch.pending_mut().unwrap();
    pending.observed_count = 512;
    pending.integr_count = SWITCH_MIN_INTEGRATIONS - 1;
  }
  assert!(!block.try_switch());
  block.switch.pending_mut().unwrap().integr_count = SWITCH_MIN_INTEGRATIONS;
  assert!(block.try_switch());
  assert_eq!(block.current_scale, 0);
  assert!(block.switch.pending().is_none());
}

#[test]
fn test_switch_finer_adopts_buffer_content() {
  let mut block = MultiResOccBlock::new(IVec3::ZERO, NodeId(0), OccupancyData::default());
  block.allocate_down_to(1);
  block.current_scale = 1;
  block.min_scale = 1;
  block.curr_observed_count = 64;

  block.init_buffer(0);
  {
    let pending = block.switch.pending_mut().unwrap();
    for (i, data) in pending.data.iter_mut().enumerate() {
      *data = free_data(5);
      // A few voxels carry only seeded weight, no direct measurement.
      if i < 32 {
        data.observed = false;
      }
    }
    pending.integr_count = SWITCH_MIN_INTEGRATIONS;
    pending.observed_count = 480;
  }
  // 480 directly observed buffer voxels beat 0.9 * 512; the 32 seeded ones
  // become observed as part of the commit.
  assert!(block.try_switch());
  let data = block.data_at_scale_exact(IVec3::new(5, 5, 5), 0);
  assert!(data.observed);
  assert_eq!(data.weight, 5);
  assert_eq!(block.curr_observed_count, 512);
}

#[test]
fn test_switch_coarser_collapses_pyramid() {
  let mut block = MultiResOccBlock::new(IVec3::ZERO, NodeId(0), OccupancyData::default());
  block.allocate_down_to(0);
  block.current_scale = 0;
  block.min_scale = 0;
  block.curr_observed_count = 512;

  block.init_buffer(1);
  {
    let pending = block.switch.pending_mut().unwrap();
    for data in &mut pending.data {
      *data = free_data(2);
    }
    pending.integr_count = SWITCH_MIN_INTEGRATIONS;
    pending.observed_count = 64;
  }
  assert!(block.try_switch());
  assert_eq!(block.current_scale, 1);
  assert_eq!(block.alloc_scale(), 1);
  assert!(block.is_aliased(1));
  assert!(block.mean_level(0).is_none());
  assert_eq!(block.data_at(IVec3::new(7, 0, 0)).weight, 2);
}

#[test]
fn test_buffer_integr_counts_only_when_eligible() {
  let mut block = MultiResOccBlock::new(IVec3::ZERO, NodeId(0), OccupancyData::default());
  block.allocate_down_to(1);
  block.current_scale = 1;
  block.curr_observed_count = 64;
  block.init_buffer(0);

  // Not projecting inside and no observed coverage: no count.
  block.incr_buffer_integr(false);
  assert_eq!(block.switch.pending().unwrap().integr_count, 0);

  block.incr_buffer_integr(true);
  assert_eq!(block.switch.pending().unwrap().integr_count, 1);

  // Once the buffer covers ~all of the current volume it counts regardless.
  block.switch.pending_mut().unwrap().observed_count = 512;
  block.incr_buffer_integr(false);
  assert_eq!(block.switch.pending().unwrap().integr_count, 2);
}
