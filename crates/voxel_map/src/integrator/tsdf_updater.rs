//! Single-resolution TSDF fusion.

use glam::Vec3;
use rayon::prelude::*;
use voxel_sensor::SensorModel;

use super::CameraContext;
use crate::config::MapConfig;
use crate::data::TsdfData;
use crate::octree::block::{BlockStorage, SingleResBlock};
use crate::octree::octant::BLOCK_SIZE;
use crate::octree::{BlockId, Octree};

/// Fuse the frame into every allocated block, in parallel over blocks.
/// Timestamp propagation follows as its own phase.
pub fn update_blocks<S: SensorModel>(
  octree: &mut Octree<SingleResBlock<TsdfData>>,
  block_ids: &[BlockId],
  ctx: &CameraContext<S>,
  config: &MapConfig,
) {
  let truncation_boundary = config.truncation_boundary();
  let max_weight = config.tsdf.max_weight;
  let near_plane = ctx.sensor.near_plane();

  let mut blocks = octree.blocks_mut(block_ids);
  blocks.par_iter_mut().for_each(|block| {
    block.set_timestamp(ctx.frame);
    let coord = block.coord();

    for z in 0..BLOCK_SIZE {
      for y in 0..BLOCK_SIZE {
        for x in 0..BLOCK_SIZE {
          let voxel = coord + glam::IVec3::new(x, y, z);
          let centre_w = ctx.origin + (voxel.as_vec3() + Vec3::splat(0.5)) * ctx.res;
          let point_s = ctx.t_sw.transform_point3(centre_w);

          if point_s.length() > ctx.sensor.far_dist(point_s.normalize_or_zero()) {
            continue;
          }
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
          let sdf_value = (depth_value - m) / m * point_s.length();

          let data = block.data_mut(voxel);
          let weight_before = data.weight;
          if data.update(sdf_value, truncation_boundary, max_weight) {
            let (rgba, id) = (&mut data.rgba, &mut data.id);
            ctx.fuse_appearance(rgba, id, point_s, weight_before);
          }
        }
      }
    }
  });
}

#[cfg(test)]
#[path = "tsdf_updater_test.rs"]
mod tsdf_updater_test;
