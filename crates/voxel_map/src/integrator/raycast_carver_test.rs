use glam::IVec3;

use super::*;
use crate::data::TsdfData;
use crate::integrator::test_utils::{constant_depth, identity_pose, test_camera, wall_config};
use crate::octree::block::SingleResBlock;

type TsdfTree = Octree<SingleResBlock<TsdfData>>;

fn carve_wall() -> (TsdfTree, Vec<BlockId>) {
  let config = wall_config();
  let camera = test_camera();
  let depth = constant_depth(&camera, 1.0);
  let mut octree = TsdfTree::new(config.size as i32);
  let blocks =
    raycast_carve(&mut octree, &config, &camera, &depth, identity_pose()).unwrap();
  (octree, blocks)
}

#[test]
fn test_allocates_band_around_surface() {
  let (octree, blocks) = carve_wall();
  assert!(!blocks.is_empty());
  // The block containing the central surface point is in the list.
  let wall_voxel = IVec3::new(128, 128, 75);
  let id = octree.find_block(wall_voxel).expect("wall block allocated");
  assert!(blocks.contains(&id));
}

#[test]
fn test_band_limited_to_truncation_boundary() {
  let config = wall_config();
  let (octree, blocks) = carve_wall();
  let band = config.truncation_boundary();
  for &id in &blocks {
    let coord = octree.block(id).coord();
    let centre_z = (coord.z as f32 + 4.0) * config.res + config.origin.z;
    // Block centres stay within the band around z = 1, padded by one block
    // diagonal.
    let slack = 8.0 * config.res;
    assert!(
      (centre_z - 1.0).abs() <= band + slack,
      "block centred at z = {centre_z} outside the truncation band"
    );
  }
}

#[test]
fn test_block_list_is_deduplicated() {
  let (_, blocks) = carve_wall();
  let mut sorted = blocks.clone();
  sorted.sort_unstable();
  sorted.dedup();
  assert_eq!(sorted.len(), blocks.len());
}

#[test]
fn test_invalid_depth_allocates_nothing() {
  let config = wall_config();
  let camera = test_camera();
  let depth = constant_depth(&camera, 0.0);
  let mut octree = TsdfTree::new(config.size as i32);
  let blocks =
    raycast_carve(&mut octree, &config, &camera, &depth, identity_pose()).unwrap();
  assert!(blocks.is_empty());
  assert_eq!(octree.block_count(), 0);
}

#[test]
fn test_block_alignment() {
  let (octree, blocks) = carve_wall();
  for &id in &blocks {
    let coord = octree.block(id).coord();
    assert_eq!(coord % 8, IVec3::ZERO);
  }
}
