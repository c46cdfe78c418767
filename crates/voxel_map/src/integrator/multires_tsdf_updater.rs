//! Multi-resolution TSDF fusion with adaptive integration scale.
//!
//! Scale moves at most one step per visit. A change of recommended scale
//! opens a pending buffer at the new scale, seeded from the stable pyramid;
//! the buffer accumulates until it dominates the current scale's observed
//! volume and then commits atomically.

use glam::{IVec3, Vec3};
use rayon::prelude::*;
use voxel_sensor::SensorModel;

use super::CameraContext;
use crate::config::MapConfig;
use crate::data::TsdfData;
use crate::octree::block::{BlockStorage, MultiResTsdfBlock, PendingSwitch, ScaleSwitch};
use crate::octree::octant::{size_at_scale, BLOCK_MAX_SCALE, BLOCK_SIZE};
use crate::octree::propagator::{tsdf_block_down, tsdf_block_up};
use crate::octree::{BlockId, Octree};

/// Fuse the frame into every allocated block, in parallel over blocks.
/// Timestamp propagation follows as its own phase. Returns the number of
/// committed scale switches.
pub fn update_blocks<S: SensorModel>(
  octree: &mut Octree<MultiResTsdfBlock>,
  block_ids: &[BlockId],
  ctx: &CameraContext<S>,
  config: &MapConfig,
) -> usize {
  let mut blocks = octree.blocks_mut(block_ids);
  blocks
    .par_iter_mut()
    .map(|block| update_block(block, ctx, config) as usize)
    .sum()
}

fn update_block<S: SensorModel>(
  block: &mut MultiResTsdfBlock,
  ctx: &CameraContext<S>,
  config: &MapConfig,
) -> bool {
  let centre_s = ctx
    .t_sw
    .transform_point3(ctx.origin + (block.coord().as_vec3() + BLOCK_SIZE as f32 / 2.0) * ctx.res);

  let first_visit = block.min_scale == -1;
  let last_scale = if first_visit { 0 } else { block.current_scale };
  let computed = ctx.sensor.compute_integration_scale(
    centre_s,
    ctx.res,
    last_scale,
    block.min_scale,
    BLOCK_MAX_SCALE,
  );
  let recommended = if first_visit {
    computed.clamp(0, BLOCK_MAX_SCALE)
  } else {
    computed
      .clamp(last_scale - 1, last_scale + 1)
      .clamp(0, BLOCK_MAX_SCALE)
  };

  block.set_timestamp(ctx.frame);

  if first_visit {
    block.current_scale = recommended;
    block.min_scale = recommended;
  } else if recommended != last_scale {
    if block.switch.pending().map(|p| p.scale) != Some(recommended) {
      seed_buffer(block, recommended, config.tsdf.max_weight);
    }

    let block_coord = block.coord();
    let curr_observed_volume = block.observed_volume();
    let pending = block.switch.pending_mut().expect("pending switch active");
    let fresh_before = pending.fresh.iter().filter(|&&f| f).count() as u32;
    integrate_level(
      &mut pending.data,
      Some(&mut pending.fresh),
      block_coord,
      recommended,
      ctx,
      config,
    );
    let fresh_after = pending.fresh.iter().filter(|&&f| f).count() as u32;
    pending.observed_count += fresh_after - fresh_before;
    pending.integr_count += 1;

    if pending.ready(curr_observed_volume) {
      let ScaleSwitch::Pending(pending) = std::mem::take(&mut block.switch) else {
        unreachable!("checked pending above");
      };
      block.commit_level(pending.scale, &pending.data);
      let committed_scale = block.current_scale;
      tsdf_block_up(block, committed_scale);
      return true;
    }
  } else {
    block.switch.reset();
  }

  // Integrate into the stable representation.
  let scale = block.current_scale;
  let block_coord = block.coord();
  integrate_current_level(block, block_coord, scale, ctx, config);
  tsdf_block_up(block, scale);
  false
}

/// Seed a pending buffer from the stable pyramid: a finer buffer inherits
/// each parent voxel's value (refreshed by the accumulated delta first), a
/// coarser buffer starts from the propagated aggregates at that scale.
fn seed_buffer(block: &mut MultiResTsdfBlock, buffer_scale: i32, max_weight: u32) {
  if buffer_scale < block.current_scale {
    // Push deltas down so stale fine data is current before seeding.
    for parent_scale in ((buffer_scale + 1)..=block.current_scale).rev() {
      tsdf_block_down(block, parent_scale, max_weight);
    }
  }
  let mut pending = PendingSwitch::new(buffer_scale);
  let n = size_at_scale(buffer_scale);
  for z in 0..n {
    for y in 0..n {
      for x in 0..n {
        let idx = (x + y * n + z * n * n) as usize;
        let arena_idx = MultiResTsdfBlock::level_idx(buffer_scale, x, y, z);
        pending.data[idx] = *block.voxel(arena_idx);
      }
    }
  }
  block.switch = ScaleSwitch::Pending(pending);
}

fn integrate_level<S: SensorModel>(
  voxels: &mut [TsdfData],
  mut fresh: Option<&mut [bool]>,
  block_coord: IVec3,
  scale: i32,
  ctx: &CameraContext<S>,
  config: &MapConfig,
) {
  let truncation_boundary = config.truncation_boundary();
  let max_weight = config.tsdf.max_weight;
  let n = size_at_scale(scale);
  let stride = (1 << scale) as f32;

  for z in 0..n {
    for y in 0..n {
      for x in 0..n {
        let idx = (x + y * n + z * n * n) as usize;
        let Some((sdf_value, point_s)) = sample_sdf(
          block_coord,
          Vec3::new(x as f32, y as f32, z as f32),
          stride,
          ctx,
        ) else {
          continue;
        };
        let weight_before = voxels[idx].weight;
        if voxels[idx].update(sdf_value, truncation_boundary, max_weight) {
          ctx.fuse_appearance(&mut voxels[idx].rgba, &mut voxels[idx].id, point_s, weight_before);
          if let Some(fresh) = fresh.as_deref_mut() {
            fresh[idx] = true;
          }
        }
      }
    }
  }
}

fn integrate_current_level<S: SensorModel>(
  block: &mut MultiResTsdfBlock,
  block_coord: IVec3,
  scale: i32,
  ctx: &CameraContext<S>,
  config: &MapConfig,
) {
  let truncation_boundary = config.truncation_boundary();
  let max_weight = config.tsdf.max_weight;
  let n = size_at_scale(scale);
  let stride = (1 << scale) as f32;

  for z in 0..n {
    for y in 0..n {
      for x in 0..n {
        let Some((sdf_value, point_s)) = sample_sdf(
          block_coord,
          Vec3::new(x as f32, y as f32, z as f32),
          stride,
          ctx,
        ) else {
          continue;
        };
        let idx = MultiResTsdfBlock::level_idx(scale, x, y, z);
        let voxel = block.voxel_mut(idx);
        let weight_before = voxel.weight;
        if voxel.update(sdf_value, truncation_boundary, max_weight) {
          ctx.fuse_appearance(&mut voxel.rgba, &mut voxel.id, point_s, weight_before);
          block.past_mut(idx).delta_weight += 1;
        }
      }
    }
  }
}

/// Project one level voxel and return its signed distance sample.
fn sample_sdf<S: SensorModel>(
  block_coord: IVec3,
  local: Vec3,
  stride: f32,
  ctx: &CameraContext<S>,
) -> Option<(f32, Vec3)> {
  let near_plane = ctx.sensor.near_plane();
  let centre_w = ctx.origin + (block_coord.as_vec3() + (local + 0.5) * stride) * ctx.res;
  let point_s = ctx.t_sw.transform_point3(centre_w);

  if point_s.length() > ctx.sensor.far_dist(point_s.normalize_or_zero()) {
    return None;
  }
  let depth_value = ctx
    .sensor
    .project_to_pixel_value(point_s, ctx.depth, |d| d >= near_plane)?;
  let m = ctx.sensor.measurement_from_point(point_s);
  if m <= 0.0 {
    return None;
  }
  Some(((depth_value - m) / m * point_s.length(), point_s))
}

#[cfg(test)]
#[path = "multires_tsdf_updater_test.rs"]
mod multires_tsdf_updater_test;
