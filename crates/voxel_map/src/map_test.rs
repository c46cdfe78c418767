use glam::{IVec3, Vec3};

use super::*;

fn test_map() -> TsdfMap {
  let config = MapConfig::new(0.1, 64).with_origin(Vec3::new(-3.2, -3.2, 0.0));
  TsdfMap::new(config).unwrap()
}

#[test]
fn test_new_rejects_invalid_config() {
  let mut config = MapConfig::new(0.0, 64);
  assert!(TsdfMap::new(config).is_err());
  config.res = 0.1;
  config.origin = Vec3::splat(f32::NAN);
  assert!(TsdfMap::new(config).is_err());
}

#[test]
fn test_voxel_point_round_trip() {
  let map = test_map();
  for voxel in [IVec3::ZERO, IVec3::new(10, 20, 30), IVec3::new(63, 63, 63)] {
    let point = map.voxel_to_point(voxel) + Vec3::splat(0.05);
    assert_eq!(map.point_to_voxel(point), voxel);
  }
}

#[test]
fn test_contains_point_respects_origin() {
  let map = test_map();
  assert!(map.contains_point(Vec3::new(0.0, 0.0, 3.0)));
  assert!(map.contains_point(Vec3::new(-3.2, -3.2, 0.0)));
  assert!(!map.contains_point(Vec3::new(-3.3, 0.0, 3.0)));
  assert!(!map.contains_point(Vec3::new(0.0, 0.0, 6.5)));
}

#[test]
fn test_dim_is_metric_cube_side() {
  let map = test_map();
  assert!((map.dim() - 6.4).abs() < 1e-6);
}

#[test]
fn test_octant_centre() {
  let map = test_map();
  let centre = map.octant_centre(IVec3::ZERO, 8);
  assert!((centre - Vec3::new(-2.8, -2.8, 0.4)).length() < 1e-5);
}

#[test]
fn test_queries_outside_map_are_empty() {
  let map = test_map();
  let outside = Vec3::new(100.0, 0.0, 0.0);
  assert!(map.field_interp(outside).is_none());
  assert!(map.field_grad(outside).is_none());
  use crate::data::VoxelData;
  assert!(!map.data(outside).is_valid());
}
