//! Multi-resolution log-odds occupancy fusion.
//!
//! Applies the volume carver's allocation: bulk free writes on childless
//! nodes, free updates on carved blocks, and per-voxel measurement fusion
//! on band-crossing blocks, with adaptive integration-scale selection and
//! the double-buffered scale switch.

use glam::{IVec3, Vec3};
use voxel_sensor::SensorModel;

use super::CameraContext;
use crate::config::{MapConfig, OccupancyConfig};
use crate::data::{OccupancyData, VoxelData};
use crate::octree::block::BlockStorage;
use crate::octree::octant::{size_at_scale, BLOCK_MAX_SCALE, BLOCK_SIZE};
use crate::octree::MultiResOccBlock;

// =============================================================================
// Per-voxel fusion
// =============================================================================

/// Log-odds sample for a voxel at `range_diff` metres past the measured
/// surface (negative is in front, toward the sensor).
///
/// Three segments: saturated free before the noise band, a linear ramp
/// crossing zero at the surface, and a constant occupied plateau inside the
/// band; beyond `tau` there is no update.
pub fn occupancy_sample(
  range_diff: f32,
  tau: f32,
  three_sigma: f32,
  occ: &OccupancyConfig,
) -> Option<f32> {
  if range_diff < -three_sigma {
    Some(occ.log_odd_min)
  } else if range_diff < tau / 2.0 {
    Some(
      (occ.log_odd_min - occ.log_odd_min / three_sigma * (range_diff + three_sigma))
        .min(occ.log_odd_max),
    )
  } else if range_diff < tau {
    Some((-occ.log_odd_min * tau / (2.0 * three_sigma)).min(occ.log_odd_max))
  } else {
    None
  }
}

/// Fuse a ranged measurement. Returns whether the voxel was newly observed.
pub fn update_voxel(
  data: &mut OccupancyData,
  range_diff: f32,
  tau: f32,
  three_sigma: f32,
  occ: &OccupancyConfig,
) -> bool {
  match occupancy_sample(range_diff, tau, three_sigma, occ) {
    Some(sample) => data.update(sample, occ.max_weight),
    None => false,
  }
}

/// Fuse a saturated free measurement.
pub fn free_voxel(data: &mut OccupancyData, occ: &OccupancyConfig) -> bool {
  data.update(occ.log_odd_min, occ.max_weight)
}

// =============================================================================
// Block-level integration
// =============================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum LevelMode {
  /// Project each voxel and fuse the ranged measurement.
  Measure,
  /// Project each voxel and fuse a free update (low-variance blocks).
  FreeProjected,
  /// Free every voxel without projecting (blocks freed by carving).
  FreeAll,
}

struct ScaleDecision {
  first_visit: bool,
  last_scale: i32,
  recommended: i32,
}

fn select_scale<S: SensorModel>(
  block: &MultiResOccBlock,
  centre_s: Vec3,
  ctx: &CameraContext<S>,
  config: &MapConfig,
  low_variance: bool,
) -> ScaleDecision {
  let occ = &config.occupancy;
  let first_visit = block.min_scale == -1;
  let last_scale = if first_visit { 0 } else { block.current_scale };

  let computed = ctx.sensor.compute_integration_scale(
    centre_s,
    config.res,
    last_scale,
    block.min_scale,
    BLOCK_MAX_SCALE,
  );

  // Saturated free space integrates coarsely; everything else moves at
  // most one scale per visit.
  let min_scale = if low_variance
    && (first_visit || block.max_value() < 0.95 * occ.log_odd_min)
  {
    occ.fs_integr_scale
  } else {
    (last_scale - 1).max(0)
  };
  let max_scale = if first_visit {
    BLOCK_MAX_SCALE
  } else {
    (last_scale + 1).min(BLOCK_MAX_SCALE)
  };

  ScaleDecision {
    first_visit,
    last_scale,
    recommended: computed.max(min_scale).min(max_scale),
  }
}

/// Integrate one level's voxels in place. Returns the newly-observed count;
/// `fresh` (the buffer's freshness mask) is updated when provided.
#[allow(clippy::too_many_arguments)]
fn integrate_level<S: SensorModel>(
  voxels: &mut [OccupancyData],
  mut fresh: Option<&mut [bool]>,
  block_coord: IVec3,
  scale: i32,
  ctx: &CameraContext<S>,
  config: &MapConfig,
  tau: f32,
  three_sigma: f32,
  mode: LevelMode,
) -> u32 {
  let occ = &config.occupancy;
  let n = size_at_scale(scale);
  let stride = (1 << scale) as f32;
  let near_plane = ctx.sensor.near_plane();
  let mut newly_observed = 0u32;

  for z in 0..n {
    for y in 0..n {
      for x in 0..n {
        let idx = (x + y * n + z * n * n) as usize;
        let centre_w = ctx.origin
          + (block_coord.as_vec3() + (Vec3::new(x as f32, y as f32, z as f32) + 0.5) * stride)
            * ctx.res;
        let point_s = ctx.t_sw.transform_point3(centre_w);

        let (applied, observed) = match mode {
          LevelMode::FreeAll => (true, free_voxel(&mut voxels[idx], occ)),
          LevelMode::FreeProjected => {
            if ctx
              .sensor
              .project_to_pixel_value(point_s, ctx.depth, |d| d >= near_plane)
              .is_none()
            {
              continue;
            }
            (true, free_voxel(&mut voxels[idx], occ))
          }
          LevelMode::Measure => {
            let Some(depth_value) = ctx
              .sensor
              .project_to_pixel_value(point_s, ctx.depth, |d| d >= near_plane)
            else {
              continue;
            };
            let m = ctx.sensor.measurement_from_point(point_s);
            if m <= 0.0 {
              continue;
            }
            let range = point_s.length();
            let range_diff = (m - depth_value) * (range / m);
            match occupancy_sample(range_diff, tau, three_sigma, occ) {
              Some(sample) => {
                let weight_before = voxels[idx].weight;
                let newly = voxels[idx].update(sample, occ.max_weight);
                ctx.fuse_appearance(
                  &mut voxels[idx].rgba,
                  &mut voxels[idx].id,
                  point_s,
                  weight_before,
                );
                (true, newly)
              }
              None => (false, false),
            }
          }
        };

        if observed {
          newly_observed += 1;
        }
        if applied {
          if let Some(fresh) = fresh.as_deref_mut() {
            fresh[idx] = true;
          }
        }
      }
    }
  }
  newly_observed
}

/// Seed a pending buffer from the stable representation.
///
/// A finer buffer takes each ancestor's value with `observed = false` so
/// the buffer accumulates its own observed count; a coarser buffer starts
/// from the propagated aggregates already present at that scale.
fn seed_buffer(block: &mut MultiResOccBlock, buffer_scale: i32) {
  let current = block.current_scale;
  let n = size_at_scale(buffer_scale);
  let mut seeded = vec![OccupancyData::default(); (n * n * n) as usize];

  if buffer_scale < current {
    let shift = current - buffer_scale;
    let cn = size_at_scale(current);
    let level = block.mean_level(current).expect("current level allocated");
    for z in 0..n {
      for y in 0..n {
        for x in 0..n {
          let (px, py, pz) = (x >> shift, y >> shift, z >> shift);
          let parent = level[(px + py * cn + pz * cn * cn) as usize];
          let idx = (x + y * n + z * n * n) as usize;
          seeded[idx] = OccupancyData {
            occupancy: parent.occupancy,
            weight: parent.weight,
            observed: false,
            rgba: parent.rgba,
            id: parent.id,
          };
        }
      }
    }
  } else {
    let level = block
      .mean_level(buffer_scale)
      .expect("coarser levels are always allocated");
    seeded.copy_from_slice(level);
    for data in &mut seeded {
      data.observed = false;
    }
  }

  block.init_buffer(buffer_scale);
  let pending = block.switch.pending_mut().expect("just initialised");
  pending.data.copy_from_slice(&seeded);
}

/// Apply a camera frame to one occupancy block. Returns whether the block
/// committed a scale switch.
pub(crate) fn integrate_block<S: SensorModel>(
  block: &mut MultiResOccBlock,
  ctx: &CameraContext<S>,
  config: &MapConfig,
  mode: LevelMode,
  projects_inside: bool,
) -> bool {
  let low_variance = mode != LevelMode::Measure;
  let centre_s = ctx
    .t_sw
    .transform_point3(ctx.origin + (block.coord().as_vec3() + BLOCK_SIZE as f32 / 2.0) * ctx.res);
  let m = ctx.sensor.measurement_from_point(centre_s);
  let tau = config.tau(m);
  let three_sigma = config.three_sigma(m);

  let decision = select_scale(block, centre_s, ctx, config, low_variance);
  block.set_timestamp(ctx.frame);

  if decision.first_visit {
    block.allocate_down_to(decision.recommended);
    block.current_scale = decision.recommended;
    block.min_scale = decision.recommended;
    block.init_curr_counts();
  } else if decision.recommended != decision.last_scale {
    let pending_scale = block.switch.pending().map(|p| p.scale);
    if pending_scale != Some(decision.recommended) {
      seed_buffer(block, decision.recommended);
    }

    let block_coord = block.coord();
    let pending = block.switch.pending_mut().expect("pending switch active");
    let observed = integrate_level(
      &mut pending.data,
      Some(&mut pending.fresh),
      block_coord,
      decision.recommended,
      ctx,
      config,
      tau,
      three_sigma,
      mode,
    );
    pending.observed_count += observed;
    block.incr_buffer_integr(projects_inside);

    if block.try_switch() {
      return true;
    }
  } else {
    block.switch.reset();
  }

  let scale = block.current_scale;
  let block_coord = block.coord();
  let level = block.mean_level_mut(scale).expect("current level allocated");
  // Split borrow: integrate_level only needs the level slice.
  let observed = integrate_level(
    level,
    None,
    block_coord,
    scale,
    ctx,
    config,
    tau,
    three_sigma,
    mode,
  );
  block.curr_observed_count += observed;
  block.incr_curr_integr();
  false
}

/// Bulk free write on a childless node's data record and summaries.
pub(crate) fn free_node_data(
  data: &mut OccupancyData,
  min_data: &mut OccupancyData,
  max_data: &mut OccupancyData,
  occ: &OccupancyConfig,
) {
  free_voxel(data, occ);
  *min_data = *data;
  *max_data = *data;
}

#[cfg(test)]
#[path = "occupancy_updater_test.rs"]
mod occupancy_updater_test;
