use glam::IVec3;

use super::*;
use crate::octree::octant::NodeId;

#[test]
fn test_single_res_indexing() {
  let block = SingleResBlock::<TsdfData>::new(IVec3::new(8, 16, 24), NodeId(0), TsdfData::default());
  assert_eq!(block.voxel_idx(IVec3::new(8, 16, 24)), 0);
  assert_eq!(block.voxel_idx(IVec3::new(9, 16, 24)), 1);
  assert_eq!(block.voxel_idx(IVec3::new(8, 17, 24)), 8);
  assert_eq!(block.voxel_idx(IVec3::new(8, 16, 25)), 64);
  assert_eq!(block.voxel_idx(IVec3::new(15, 23, 31)), 511);
}

#[test]
fn test_single_res_seeded_from_init() {
  let mut init = TsdfData::default();
  init.tsdf = -0.25;
  let block = SingleResBlock::<TsdfData>::new(IVec3::ZERO, NodeId(0), init);
  assert!(block.voxels().iter().all(|v| v.tsdf == -0.25));
}

#[test]
fn test_tsdf_pyramid_offsets() {
  assert_eq!(TSDF_SCALE_OFFSETS, [0, 512, 576, 584]);
  assert_eq!(TSDF_PYRAMID_LEN, 585);
}

#[test]
fn test_multires_tsdf_indexing_across_scales() {
  let block = MultiResTsdfBlock::new(IVec3::new(16, 0, 0), NodeId(0), TsdfData::default());
  // Scale 0: plain dense indexing.
  assert_eq!(block.voxel_idx(IVec3::new(17, 2, 3), 0), 1 + 2 * 8 + 3 * 64);
  // Scale 2 has a 2x2x2 level starting at offset 576.
  assert_eq!(block.voxel_idx(IVec3::new(16, 0, 0), 2), 576);
  assert_eq!(block.voxel_idx(IVec3::new(20, 4, 4), 2), 576 + 1 + 2 + 4);
  // Scale 3 is the single coarsest voxel.
  assert_eq!(block.voxel_idx(IVec3::new(23, 7, 7), 3), 584);
}

#[test]
fn test_data_at_scale_respects_current_scale() {
  let mut block = MultiResTsdfBlock::new(IVec3::ZERO, NodeId(0), TsdfData::default());
  block.current_scale = 2;
  let idx = block.voxel_idx(IVec3::new(1, 1, 1), 2);
  block.voxel_mut(idx).tsdf = -0.5;
  block.voxel_mut(idx).weight = 3;
  // Requesting finer data falls back to the current scale.
  let data = block.data_at_scale(IVec3::new(1, 1, 1), 0);
  assert_eq!(data.tsdf, -0.5);
}

#[test]
fn test_commit_level_switches_scale() {
  let mut block = MultiResTsdfBlock::new(IVec3::ZERO, NodeId(0), TsdfData::default());
  block.current_scale = 1;
  block.min_scale = 1;
  let mut level = vec![TsdfData::default(); 512];
  for voxel in &mut level {
    voxel.tsdf = -0.3;
    voxel.weight = 5;
  }
  block.commit_level(0, &level);
  assert_eq!(block.current_scale, 0);
  assert_eq!(block.min_scale, 0);
  assert_eq!(block.data_at(IVec3::new(3, 3, 3)).tsdf, -0.3);
}

#[test]
fn test_pending_switch_thresholds() {
  let mut pending = PendingSwitch::<TsdfData>::new(1);
  // 64 voxels at scale 1, each covering 8 finest voxels.
  pending.observed_count = 64;
  pending.integr_count = SWITCH_MIN_INTEGRATIONS - 1;
  assert!(!pending.ready(512.0));
  pending.integr_count = SWITCH_MIN_INTEGRATIONS;
  assert!(pending.ready(512.0));
  // Not enough observed volume against a fully observed finer scale.
  pending.observed_count = 32;
  assert!(!pending.ready(512.0));
}

#[test]
fn test_observed_volume_counts_valid_voxels() {
  let mut block = MultiResTsdfBlock::new(IVec3::ZERO, NodeId(0), TsdfData::default());
  block.current_scale = 1;
  for i in 0..32 {
    let idx = TSDF_SCALE_OFFSETS[1] + i;
    block.voxel_mut(idx).weight = 1;
  }
  // 32 observed voxels at scale 1 cover 256 finest voxels.
  assert_eq!(block.observed_volume(), 256.0);
}
