use std::collections::HashSet;

use glam::{Affine3A, Vec3};

use super::*;
use crate::config::MapConfig;
use crate::data::VoxelData;
use crate::sampling;
use voxel_sensor::RotatingLidar;

fn lidar() -> RotatingLidar {
  RotatingLidar::new(512, 32, -0.4, 0.4).with_near_far(0.5, 30.0)
}

fn lidar_config() -> MapConfig {
  MapConfig::new(0.05, 128).with_origin(Vec3::new(-3.2, -3.2, -3.2))
}

#[test]
fn test_single_ray_allocates_along_path() {
  let config = lidar_config();
  let sensor = lidar();
  let mut octree: Octree<MultiResOccBlock> = Octree::new(config.size as i32);
  let mut touched = HashSet::new();

  // Hit 2.5 m down +x from the origin.
  let ray_s = Vec3::new(2.5, 0.0, 0.0);
  integrate_ray(
    &mut octree,
    &config,
    &sensor,
    ray_s,
    Affine3A::IDENTITY,
    1,
    &mut touched,
  )
  .unwrap();

  assert!(!touched.is_empty());
  // Blocks exist near the origin and near the hit.
  let near_voxel = ((Vec3::new(0.5, 0.0, 0.0) - config.origin) / config.res)
    .floor()
    .as_ivec3();
  let hit_voxel = ((Vec3::new(2.5, 0.0, 0.0) - config.origin) / config.res)
    .floor()
    .as_ivec3();
  assert!(octree.find_block(near_voxel).is_some());
  assert!(octree.find_block(hit_voxel).is_some());
}

#[test]
fn test_ray_frees_path_and_occupies_hit() {
  let config = lidar_config();
  let sensor = lidar();
  let mut octree: Octree<MultiResOccBlock> = Octree::new(config.size as i32);
  let mut touched = HashSet::new();

  let ray_s = Vec3::new(2.5, 0.0, 0.0);
  for frame in 0..5 {
    integrate_ray(
      &mut octree,
      &config,
      &sensor,
      ray_s,
      Affine3A::IDENTITY,
      frame,
      &mut touched,
    )
    .unwrap();
  }

  let mid_voxel = ((Vec3::new(1.2, 0.0, 0.0) - config.origin) / config.res)
    .floor()
    .as_ivec3();
  let mid = sampling::data_at(&octree, mid_voxel);
  assert!(mid.is_valid());
  assert!(mid.field() < 0.0, "mid-ray voxels are free, got {}", mid.field());

  let hit_voxel = ((Vec3::new(2.52, 0.0, 0.0) - config.origin) / config.res)
    .floor()
    .as_ivec3();
  let hit = sampling::data_at(&octree, hit_voxel);
  assert!(hit.is_valid());
  assert!(
    hit.field() > mid.field(),
    "the hit region accumulates occupied evidence"
  );
}

#[test]
fn test_out_of_range_ray_is_ignored() {
  let config = lidar_config();
  let sensor = lidar();
  let mut octree: Octree<MultiResOccBlock> = Octree::new(config.size as i32);
  let mut touched = HashSet::new();
  integrate_ray(
    &mut octree,
    &config,
    &sensor,
    Vec3::new(0.1, 0.0, 0.0),
    Affine3A::IDENTITY,
    1,
    &mut touched,
  )
  .unwrap();
  assert!(touched.is_empty());
  assert_eq!(octree.block_count(), 0);
}

#[test]
fn test_batch_downsampling_skips_near_duplicates() {
  let config = lidar_config();
  let sensor = lidar();
  let mut octree: Octree<MultiResOccBlock> = Octree::new(config.size as i32);

  let ray = Vec3::new(2.0, 0.0, 0.0);
  let turned = Vec3::new(2.0, 0.4, 0.0);
  let batch = vec![
    (Affine3A::IDENTITY, ray),
    (Affine3A::IDENTITY, ray),
    (Affine3A::IDENTITY, ray),
    (Affine3A::IDENTITY, turned),
  ];
  let alloc = integrate_ray_batch(&mut octree, &config, &sensor, &batch, 1).unwrap();
  assert_eq!(alloc.skipped_rays, 2);
  assert!(!alloc.touched.is_empty());
}

#[test]
fn test_batch_through_map_api_propagates() {
  use crate::map::OccupancyMap;
  let mut map = OccupancyMap::new(lidar_config()).unwrap();
  let sensor = lidar();
  let batch: Vec<(Affine3A, Vec3)> = (0..20)
    .map(|i| {
      let angle = i as f32 * 0.05;
      (
        Affine3A::IDENTITY,
        Vec3::new(2.0 * angle.cos(), 2.0 * angle.sin(), 0.0),
      )
    })
    .collect();

  let stats = map.integrate_ray_batch(&sensor, &batch, 3, None).unwrap();
  assert!(stats.updated_blocks > 0);

  // Propagation stamped the root.
  assert_eq!(map.octree().node(map.octree().root()).timestamp, 3);
  // Summaries reached the touched blocks' parents: somewhere the max
  // summary is observedly free or occupied rather than default.
  let updated: Vec<_> = map.octree().iter_updated_since(3).collect();
  assert_eq!(updated.len(), stats.updated_blocks);
}
