//! Ray-casting allocation: the TSDF allocator.
//!
//! Every valid depth pixel defines a segment through the truncation band
//! around its measured point; the carver walks each segment in block-sized
//! strides and allocates every block it touches. The pixel sweep fans out
//! over rayon; the deduplicated coordinate set is then allocated in one
//! sequential descent pass.

use std::collections::HashSet;

use glam::{Affine3A, IVec3, Vec2, Vec3};
use rayon::prelude::*;
use voxel_sensor::{Image, SensorModel};

use crate::config::MapConfig;
use crate::error::MapError;
use crate::octree::block::BlockStorage;
use crate::octree::octant::BLOCK_SIZE;
use crate::octree::{BlockId, Octree};

/// Blocks a single measured point's truncation segment passes through.
fn touched_blocks<S: SensorModel>(
  config: &MapConfig,
  sensor: &S,
  t_ws: &Affine3A,
  pixel: (u32, u32),
  depth_value: f32,
  band: f32,
  map_size: i32,
  acc: &mut HashSet<IVec3>,
) {
  let dir_s = sensor.back_project(Vec2::new(pixel.0 as f32, pixel.1 as f32));
  let m_dir = sensor.measurement_from_point(dir_s);
  if m_dir <= 0.0 {
    return;
  }
  let point_s = dir_s * (depth_value / m_dir);
  let point_w = t_ws.transform_point3(point_s);
  let origin_w: Vec3 = t_ws.translation.into();
  let ray_dir = (point_w - origin_w).normalize_or_zero();
  if ray_dir == Vec3::ZERO {
    return;
  }

  let start = point_w - band * ray_dir;
  let segment = 2.0 * band;
  let step = BLOCK_SIZE as f32 * config.res / 2.0;
  let steps = (segment / step).ceil() as i32;

  for i in 0..=steps {
    let point = start + ray_dir * (segment * i as f32 / steps as f32);
    let voxel = ((point - config.origin) / config.res).floor().as_ivec3();
    if voxel.cmpge(IVec3::ZERO).all() && voxel.cmplt(IVec3::splat(map_size)).all() {
      acc.insert(voxel & !(BLOCK_SIZE - 1));
    }
  }
}

/// Allocate every block inside the frame's truncation band. Returns the
/// deduplicated list of blocks to update.
pub fn raycast_carve<B: BlockStorage, S: SensorModel>(
  octree: &mut Octree<B>,
  config: &MapConfig,
  sensor: &S,
  depth: &Image<f32>,
  t_ws: Affine3A,
) -> Result<Vec<BlockId>, MapError> {
  let band = config.truncation_boundary();
  let map_size = octree.size();
  let near = sensor.near_plane();
  let far = sensor.far_plane();

  let coords: HashSet<IVec3> = (0..depth.height())
    .into_par_iter()
    .fold(HashSet::new, |mut acc, y| {
      for x in 0..depth.width() {
        let d = *depth.get(x, y);
        if !(near..=far).contains(&d) {
          continue;
        }
        touched_blocks(config, sensor, &t_ws, (x, y), d, band, map_size, &mut acc);
      }
      acc
    })
    .reduce(HashSet::new, |mut a, b| {
      a.extend(b);
      a
    });

  // Sorted for deterministic allocation order.
  let mut coords: Vec<IVec3> = coords.into_iter().collect();
  coords.sort_unstable_by_key(|c| (c.z, c.y, c.x));

  let mut blocks = Vec::with_capacity(coords.len());
  for coord in coords {
    let (id, _) = octree.allocate_block_at(coord)?;
    blocks.push(id);
  }
  Ok(blocks)
}

#[cfg(test)]
#[path = "raycast_carver_test.rs"]
mod raycast_carver_test;
