//! LiDAR ray integration: sparse DDA allocation over the block grid with
//! fused allocation-and-update per ray, batched so that propagation is
//! amortised over a whole scan interval.

use std::collections::HashSet;

use glam::{Affine3A, IVec3, Vec3};
use voxel_sensor::SensorModel;

use super::occupancy_updater::update_voxel;
use crate::config::MapConfig;
use crate::error::MapError;
use crate::octree::block::BlockStorage;
use crate::octree::occ_block::MultiResOccBlock;
use crate::octree::octant::{size_at_scale, BLOCK_MAX_SCALE, BLOCK_SIZE};
use crate::octree::{BlockId, Octree};

/// Pose difference below which consecutive batch rays collapse into one.
const DOWNSAMPLE_ANGLE_RAD: f32 = 0.002;

/// Outcome of a ray (or ray-batch) pass, before propagation.
#[derive(Default)]
pub struct RayAllocation {
  pub touched: Vec<BlockId>,
  /// Rays dropped by the batch downsampling guard.
  pub skipped_rays: usize,
}

/// Integrate a single ray, allocating the blocks it traverses and fusing
/// into them in one pass.
pub fn integrate_ray<S: SensorModel>(
  octree: &mut Octree<MultiResOccBlock>,
  config: &MapConfig,
  sensor: &S,
  ray_s: Vec3,
  t_ws: Affine3A,
  frame: u64,
  touched: &mut HashSet<BlockId>,
) -> Result<(), MapError> {
  let range = ray_s.length();
  if !(sensor.near_plane()..=sensor.far_plane()).contains(&range) {
    return Ok(());
  }

  let origin_w: Vec3 = t_ws.translation.into();
  let hit_w = t_ws.transform_point3(ray_s);
  let dir_w = (hit_w - origin_w) / range;
  let t_sw = t_ws.inverse();

  let tau = config.tau(range);
  let three_sigma = config.three_sigma(range);
  let t_end = range + tau;

  // March the block grid.
  let block_edge = BLOCK_SIZE as f32 * config.res;
  let map_size = octree.size();
  let mut last_block = None;
  let mut t = 0.0f32;
  while t < t_end {
    let point = origin_w + dir_w * t;
    let voxel = ((point - config.origin) / config.res).floor().as_ivec3();
    if voxel.cmpge(IVec3::ZERO).all() && voxel.cmplt(IVec3::splat(map_size)).all() {
      let block_coord = voxel & !(BLOCK_SIZE - 1);
      if last_block != Some(block_coord) {
        let (id, _) = octree.allocate_block_at(block_coord)?;
        let block = octree.block_mut(id);
        block.set_timestamp(frame);
        integrate_ray_block(
          block,
          config,
          sensor,
          &t_sw,
          origin_w,
          dir_w,
          range,
          tau,
          three_sigma,
        );
        touched.insert(id);
        last_block = Some(block_coord);
      }
    }
    // Half-edge strides never skip a traversed block entirely.
    t += block_edge / 2.0;
  }
  Ok(())
}

/// Integrate a batch of (pose, ray) pairs, skipping rays whose pose barely
/// moved since the previously integrated one.
pub fn integrate_ray_batch<S: SensorModel>(
  octree: &mut Octree<MultiResOccBlock>,
  config: &MapConfig,
  sensor: &S,
  batch: &[(Affine3A, Vec3)],
  frame: u64,
) -> Result<RayAllocation, MapError> {
  let mut touched = HashSet::new();
  let mut skipped = 0usize;
  let mut last_integrated: Option<(Vec3, Vec3)> = None;

  for &(t_ws, ray_s) in batch {
    let origin: Vec3 = t_ws.translation.into();
    let dir = t_ws.transform_vector3(ray_s).normalize_or_zero();
    if let Some((last_origin, last_dir)) = last_integrated {
      let moved = (origin - last_origin).length() > config.res / 2.0;
      let turned = last_dir.angle_between(dir) > DOWNSAMPLE_ANGLE_RAD;
      if !moved && !turned {
        skipped += 1;
        continue;
      }
    }
    integrate_ray(octree, config, sensor, ray_s, t_ws, frame, &mut touched)?;
    last_integrated = Some((origin, dir));
  }

  let mut touched: Vec<BlockId> = touched.into_iter().collect();
  touched.sort_unstable();
  Ok(RayAllocation {
    touched,
    skipped_rays: skipped,
  })
}

/// Fuse the ray into one block: voxels of the block's integration scale
/// whose centres lie within a voxel diagonal of the ray take a ranged
/// update.
#[allow(clippy::too_many_arguments)]
fn integrate_ray_block<S: SensorModel>(
  block: &mut MultiResOccBlock,
  config: &MapConfig,
  sensor: &S,
  t_sw: &Affine3A,
  origin_w: Vec3,
  dir_w: Vec3,
  range: f32,
  tau: f32,
  three_sigma: f32,
) {
  let occ = &config.occupancy;
  let centre_s = t_sw.transform_point3(
    config.origin + (block.coord().as_vec3() + BLOCK_SIZE as f32 / 2.0) * config.res,
  );

  // Eager one-step rescaling; the double-buffered protocol is reserved for
  // dense frames where whole-block evidence accumulates.
  let first_visit = block.min_scale == -1;
  let last_scale = if first_visit { 0 } else { block.current_scale };
  let computed = sensor.compute_integration_scale(
    centre_s,
    config.res,
    last_scale,
    block.min_scale,
    BLOCK_MAX_SCALE,
  );
  let scale = if first_visit {
    computed.clamp(0, BLOCK_MAX_SCALE)
  } else {
    computed
      .clamp(last_scale - 1, last_scale + 1)
      .clamp(0, BLOCK_MAX_SCALE)
  };
  if first_visit {
    block.allocate_down_to(scale);
    block.current_scale = scale;
    block.min_scale = scale;
    block.init_curr_counts();
  } else if scale < last_scale {
    rescale_finer(block, scale);
  } else if scale > last_scale {
    block.delete_up_to(scale);
    block.current_scale = scale;
    block.min_scale = scale;
    block.reset_curr_counts();
  }

  let scale = block.current_scale;
  let stride = 1 << scale;
  let n = size_at_scale(scale);
  let voxel_radius = 3.0f32.sqrt() / 2.0 * stride as f32 * config.res;
  let block_coord = block.coord();

  let mut newly_observed = 0u32;
  {
    let level = block.mean_level_mut(scale).expect("current level allocated");
    for z in 0..n {
      for y in 0..n {
        for x in 0..n {
          let centre_w = config.origin
            + (block_coord.as_vec3()
              + (Vec3::new(x as f32, y as f32, z as f32) + 0.5) * stride as f32)
              * config.res;
          // Distance from the voxel centre to the ray line.
          let to_centre = centre_w - origin_w;
          let along = to_centre.dot(dir_w);
          if along <= 0.0 {
            continue;
          }
          let perpendicular = (to_centre - along * dir_w).length();
          if perpendicular > voxel_radius {
            continue;
          }

          let m = to_centre.length();
          let range_diff = m - range;
          let idx = (x + y * n + z * n * n) as usize;
          if update_voxel(&mut level[idx], range_diff, tau, three_sigma, occ) {
            newly_observed += 1;
          }
        }
      }
    }
  }
  block.curr_observed_count += newly_observed;
  block.incr_curr_integr();
}

/// Grow the pyramid one (or more) scales finer, pushing the current values
/// down so the finer level starts from the coarse evidence.
fn rescale_finer(block: &mut MultiResOccBlock, new_scale: i32) {
  let old_scale = block.current_scale;
  block.allocate_down_to(new_scale);
  let block_coord = block.coord();
  let n = size_at_scale(new_scale);
  for z in 0..n {
    for y in 0..n {
      for x in 0..n {
        let voxel = block_coord + IVec3::new(x, y, z) * (1 << new_scale);
        let parent = block.data_at_scale_exact(voxel, old_scale);
        let idx = block.mean_idx(voxel, new_scale).expect("level allocated");
        let child = block.voxel_mut(idx);
        child.occupancy = parent.occupancy;
        child.weight = parent.weight;
        child.observed = false;
        child.rgba = parent.rgba;
        child.id = parent.id;
      }
    }
  }
  block.current_scale = new_scale;
  block.min_scale = new_scale;
  block.reset_curr_counts();
}

#[cfg(test)]
#[path = "ray_integrator_test.rs"]
mod ray_integrator_test;
