use glam::{Affine3A, Vec3};

use super::test_utils::{constant_depth, cropped_depth, identity_pose, test_camera, wall_config};
use super::*;
use crate::data::VoxelData;
use crate::sampling;

// -----------------------------------------------------------------------------
// Input validation
// -----------------------------------------------------------------------------

#[test]
fn test_mismatched_depth_dimensions_are_fatal_for_the_frame() {
  let camera = test_camera();
  let wrong = voxel_sensor::Image::new(10, 10, 1.0f32);
  let mut map = TsdfMap::new(wall_config()).unwrap();
  let measurements = Measurements::depth_only(&camera, &wrong, identity_pose());
  let err = map.integrate_depth(&measurements, 0, None).unwrap_err();
  assert!(matches!(err, MapError::InvalidInput(_)));
}

#[test]
fn test_non_finite_pose_is_rejected() {
  let camera = test_camera();
  let depth = constant_depth(&camera, 1.0);
  let mut map = OccupancyMap::new(wall_config()).unwrap();
  let bad_pose = Affine3A::from_translation(Vec3::splat(f32::NAN));
  let measurements = Measurements::depth_only(&camera, &depth, bad_pose);
  assert!(map.integrate_depth(&measurements, 0, None).is_err());
}

// -----------------------------------------------------------------------------
// Updated-since iteration across frames
// -----------------------------------------------------------------------------

#[test]
fn test_updated_since_tracks_frame_footprints() {
  let camera = test_camera();
  let full = constant_depth(&camera, 1.0);
  let cropped = cropped_depth(&camera, 1.0, 8);
  let mut map = TsdfMap::new(wall_config()).unwrap();

  // Frame 10 touches the full wall footprint X.
  let mut updated_full = Vec::new();
  let measurements = Measurements::depth_only(&camera, &full, identity_pose());
  map
    .integrate_depth(&measurements, 10, Some(&mut updated_full))
    .unwrap();
  let mut at_10: Vec<_> = map.octree().iter_updated_since(10).collect();
  let mut expected: Vec<_> = updated_full.clone();
  at_10.sort_by_key(|o| format!("{o:?}"));
  expected.sort_by_key(|o| format!("{o:?}"));
  assert_eq!(at_10, expected);

  // Frame 11 touches the cropped footprint X' (a strict subset).
  let mut updated_cropped = Vec::new();
  let measurements = Measurements::depth_only(&camera, &cropped, identity_pose());
  map
    .integrate_depth(&measurements, 11, Some(&mut updated_cropped))
    .unwrap();
  assert!(updated_cropped.len() < updated_full.len());

  let mut at_11: Vec<_> = map.octree().iter_updated_since(11).collect();
  let mut expected_11: Vec<_> = updated_cropped.clone();
  at_11.sort_by_key(|o| format!("{o:?}"));
  expected_11.sort_by_key(|o| format!("{o:?}"));
  assert_eq!(at_11, expected_11);

  // The earlier threshold still sees the union.
  assert_eq!(map.octree().iter_updated_since(10).count(), updated_full.len());
}

// -----------------------------------------------------------------------------
// Occupancy free-space scenario
// -----------------------------------------------------------------------------

#[test]
fn test_free_space_saturates_coarsens_and_prunes() {
  let mut config = wall_config();
  config.occupancy.fs_integr_scale = crate::octree::BLOCK_MAX_SCALE;
  let camera = test_camera();
  // Far-plane depth everywhere: the whole frustum is free space.
  let depth = constant_depth(&camera, 4.5);
  let mut map = OccupancyMap::new(config).unwrap();

  let mut nodes_after_first = 0;
  let mut stats = FrameStats::default();
  for frame in 0..5 {
    let measurements = Measurements::depth_only(&camera, &depth, identity_pose());
    stats = map.integrate_depth(&measurements, frame, None).unwrap();
    if frame == 0 {
      nodes_after_first = map.octree().node_count();
    }
  }

  // A block in the middle of the carved cone is saturated free at a
  // raised integration scale.
  let probe = Vec3::new(0.0, 0.0, 2.0);
  let voxel = map.point_to_voxel(probe);
  if let Some(id) = map.octree().find_block(voxel) {
    let block = map.octree().block(id);
    assert!(block.current_scale >= map.config().occupancy.fs_integr_scale - 1);
    let max = block.max_data();
    assert!(
      max.field() <= 0.95 * map.config().occupancy.log_odd_min,
      "saturated free block, got {}",
      max.field()
    );
  } else {
    // Bulk-freed at node level instead: the covering node must be free.
    let data = sampling::data_at(map.octree(), voxel);
    assert!(data.observed);
    assert!(data.field() < 0.0);
  }

  // Propagation prunes inner free subtrees.
  assert!(
    map.octree().node_count() < nodes_after_first || stats.pruned_nodes > 0,
    "free space should collapse: {} nodes vs {}",
    map.octree().node_count(),
    nodes_after_first
  );
}

#[test]
fn test_occupancy_wall_round_trip() {
  let camera = test_camera();
  let depth = constant_depth(&camera, 1.0);
  let mut map = OccupancyMap::new(wall_config()).unwrap();

  for frame in 0..3 {
    let measurements = Measurements::depth_only(&camera, &depth, identity_pose());
    let stats = map.integrate_depth(&measurements, frame, None).unwrap();
    assert!(stats.updated_blocks > 0);
  }

  // Behind the wall within the band the field turns positive; in front it
  // is negative.
  let front = map.data(Vec3::new(0.0, 0.0, 0.7));
  assert!(front.is_valid());
  assert!(front.field() < 0.0);
  let at_wall = map.data(Vec3::new(0.0, 0.0, 1.05));
  assert!(at_wall.is_valid());
  assert!(at_wall.field() > front.field());
}

// -----------------------------------------------------------------------------
// Colour and id fusion
// -----------------------------------------------------------------------------

#[test]
fn test_colour_and_ids_fused_into_surface_voxels() {
  let camera = test_camera();
  let depth = constant_depth(&camera, 1.0);
  let colour_img = voxel_sensor::Image::new(64, 48, Rgba::new(200, 40, 10, 255));
  let mut ids_img = voxel_sensor::Image::new(64, 48, 0u32);
  ids_img.fill(7);
  let mut map = TsdfMap::new(wall_config()).unwrap();

  let measurements = Measurements::depth_only(&camera, &depth, identity_pose())
    .with_colour(ColourMeasurement {
      sensor: &camera,
      image: &colour_img,
      t_s_sc: Affine3A::IDENTITY,
    })
    .with_ids(&ids_img);
  map.integrate_depth(&measurements, 0, None).unwrap();

  let surface = map.data(Vec3::new(0.0, 0.0, 1.01));
  assert!(surface.is_valid());
  assert_eq!(surface.rgba().r, 200);
  assert_eq!(surface.id(), 7);
}
