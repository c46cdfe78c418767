use glam::IVec3;

use super::*;
use crate::config::MapConfig;
use crate::integrator::test_utils::{constant_depth, identity_pose, test_camera, wall_config};
use crate::octree::block::BlockStorage;

fn carve_wall() -> (Octree<MultiResOccBlock>, CarverAllocation, MapConfig) {
  let config = wall_config();
  let camera = test_camera();
  let depth = constant_depth(&camera, 1.0);
  let mut octree = Octree::new(config.size as i32);
  let alloc = volume_carve(&mut octree, &config, &camera, &depth, identity_pose()).unwrap();
  (octree, alloc, config)
}

#[test]
fn test_output_lists_are_parallel() {
  let (_, alloc, _) = carve_wall();
  assert_eq!(alloc.block_list.len(), alloc.variance_state.len());
  assert_eq!(alloc.block_list.len(), alloc.projects_inside.len());
  assert!(!alloc.block_list.is_empty());
}

#[test]
fn test_band_blocks_cover_the_wall() {
  let (octree, alloc, config) = carve_wall();
  // At least one Gradient block must contain the central surface point
  // (0, 0, 1.0), i.e. voxel (128, 128, 75).
  let wall_voxel = IVec3::new(128, 128, 75);
  let id = octree.find_block(wall_voxel).expect("wall block allocated");
  let gradient = alloc
    .block_list
    .iter()
    .zip(&alloc.variance_state)
    .any(|(&b, &v)| b == id && v == VarianceState::Gradient);
  assert!(gradient, "wall block classified for measurement fusion");
  let _ = config;
}

#[test]
fn test_free_space_is_carved() {
  let (_, alloc, _) = carve_wall();
  // The cone between the sensor and the wall produces free work: either
  // bulk node frees or freed blocks.
  assert!(
    !alloc.node_list.is_empty() || !alloc.freed_blocks.is_empty(),
    "free space between sensor and wall must be carved"
  );
}

#[test]
fn test_freed_nodes_are_childless() {
  let (octree, alloc, _) = carve_wall();
  for &id in &alloc.node_list {
    assert!(octree.node(id).is_leaf(), "bulk free writes need leaf nodes");
  }
}

#[test]
fn test_occluded_space_is_not_allocated() {
  let (octree, alloc, config) = carve_wall();
  // Space well behind the wall (z = 2.5 m, beyond the band) stays
  // untouched.
  let hidden_voxel = IVec3::new(128, 128, ((2.5 + 0.5) / config.res) as i32);
  assert!(octree.find_block(hidden_voxel).is_none());
  for &id in &alloc.block_list {
    let coord = octree.block(id).coord();
    let z_m = coord.z as f32 * config.res + config.origin.z;
    assert!(z_m < 2.0, "block at z = {z_m} should not receive updates");
  }
}

#[test]
fn test_blocks_outside_frustum_are_skipped() {
  let (octree, _, _) = carve_wall();
  // Behind the sensor.
  assert!(octree.find_block(IVec3::new(128, 128, 5)).is_none());
  // Far off to the side at the wall depth.
  assert!(octree.find_block(IVec3::new(4, 128, 75)).is_none());
}

#[test]
fn test_carve_respects_octant_limit() {
  let config = wall_config();
  let camera = test_camera();
  let depth = constant_depth(&camera, 1.0);
  let mut octree = Octree::new(config.size as i32).with_octant_limit(4);
  let result = volume_carve(&mut octree, &config, &camera, &depth, identity_pose());
  assert!(matches!(result, Err(crate::error::MapError::ResourceExhausted)));
}
