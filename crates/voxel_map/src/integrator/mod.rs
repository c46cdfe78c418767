//! The integration pipeline: allocate, update, propagate.
//!
//! One call per frame on the map type in use:
//!
//! ```ignore
//! let measurements = Measurements::depth_only(&camera, &depth_img, t_ws);
//! let stats = map.integrate_depth(&measurements, frame, None)?;
//! ```
//!
//! Phases run strictly in order; inside each phase, work is sharded over
//! independent octants with rayon. Each frame returns a [`FrameStats`]
//! value with counters and per-phase timings.

pub mod multires_tsdf_updater;
pub mod occupancy_updater;
pub mod pooling;
pub mod ray_integrator;
pub mod raycast_carver;
#[cfg(test)]
pub(crate) mod test_utils;
pub mod tsdf_updater;
pub mod volume_carver;

use std::time::Instant;

use glam::{Affine3A, Vec3};
use rayon::prelude::*;
use voxel_sensor::{Image, SensorModel};

use crate::data::{Rgba, ID_NOT_MAPPED};
use crate::error::MapError;
use crate::map::{OccupancyMap, TsdfMap, TsdfMultiMap};
use crate::metrics::FrameStats;
use crate::octree::propagator::{
  occ_block_up, occ_propagate_to_root, propagate_timestamp_to_root,
};
use crate::octree::{BlockId, NodeId, OctantRef};
use occupancy_updater::LevelMode;
use volume_carver::VarianceState;

// =============================================================================
// Measurement bundles
// =============================================================================

/// A depth image with its sensor and world pose at capture.
pub struct DepthMeasurement<'a, S: SensorModel> {
  pub sensor: &'a S,
  pub image: &'a Image<f32>,
  /// World-from-sensor pose.
  pub t_ws: Affine3A,
}

/// A colour image, its sensor, and the depth-sensor-from-colour-sensor
/// extrinsics.
pub struct ColourMeasurement<'a, S: SensorModel> {
  pub sensor: &'a S,
  pub image: &'a Image<Rgba>,
  pub t_s_sc: Affine3A,
}

/// Everything one frame supplies to the integrator.
pub struct Measurements<'a, S: SensorModel> {
  pub depth: DepthMeasurement<'a, S>,
  pub colour: Option<ColourMeasurement<'a, S>>,
  /// Per-pixel object ids; `0` leaves voxel ids untouched.
  pub ids: Option<&'a Image<u32>>,
}

impl<'a, S: SensorModel> Measurements<'a, S> {
  pub fn depth_only(sensor: &'a S, image: &'a Image<f32>, t_ws: Affine3A) -> Self {
    Self {
      depth: DepthMeasurement {
        sensor,
        image,
        t_ws,
      },
      colour: None,
      ids: None,
    }
  }

  pub fn with_colour(mut self, colour: ColourMeasurement<'a, S>) -> Self {
    self.colour = Some(colour);
    self
  }

  pub fn with_ids(mut self, ids: &'a Image<u32>) -> Self {
    self.ids = Some(ids);
    self
  }

  fn validate(&self) -> Result<(), MapError> {
    let depth = &self.depth;
    if depth.image.width() != depth.sensor.width()
      || depth.image.height() != depth.sensor.height()
    {
      return Err(MapError::InvalidInput(format!(
        "depth image is {}x{}, sensor expects {}x{}",
        depth.image.width(),
        depth.image.height(),
        depth.sensor.width(),
        depth.sensor.height()
      )));
    }
    if !depth.t_ws.is_finite() {
      return Err(MapError::InvalidInput("pose T_WS is not finite".into()));
    }
    if let Some(colour) = &self.colour {
      if colour.image.width() != colour.sensor.width()
        || colour.image.height() != colour.sensor.height()
      {
        return Err(MapError::InvalidInput(
          "colour image dimensions disagree with its sensor".into(),
        ));
      }
      if !colour.t_s_sc.is_finite() {
        return Err(MapError::InvalidInput("pose T_SSc is not finite".into()));
      }
    }
    Ok(())
  }
}

// =============================================================================
// Shared per-frame context
// =============================================================================

pub(crate) struct ColourContext<'a, S: SensorModel> {
  sensor: &'a S,
  image: &'a Image<Rgba>,
  /// Colour-sensor-from-depth-sensor.
  t_sc_s: Affine3A,
}

/// Immutable state every updater voxel loop needs.
pub(crate) struct CameraContext<'a, S: SensorModel> {
  pub sensor: &'a S,
  pub depth: &'a Image<f32>,
  pub colour: Option<ColourContext<'a, S>>,
  pub ids: Option<&'a Image<u32>>,
  /// Sensor-from-world.
  pub t_sw: Affine3A,
  pub res: f32,
  pub origin: Vec3,
  pub frame: u64,
}

impl<'a, S: SensorModel> CameraContext<'a, S> {
  fn new(measurements: &'a Measurements<'a, S>, res: f32, origin: Vec3, frame: u64) -> Self {
    Self {
      sensor: measurements.depth.sensor,
      depth: measurements.depth.image,
      colour: measurements.colour.as_ref().map(|c| ColourContext {
        sensor: c.sensor,
        image: c.image,
        t_sc_s: c.t_s_sc.inverse(),
      }),
      ids: measurements.ids,
      t_sw: measurements.depth.t_ws.inverse(),
      res,
      origin,
      frame,
    }
  }

  /// Fuse colour and id for a voxel that just took a field update.
  pub(crate) fn fuse_appearance(
    &self,
    rgba: &mut Rgba,
    id: &mut u32,
    point_s: Vec3,
    weight_before: u32,
  ) {
    if let Some(colour) = &self.colour {
      let point_sc = colour.t_sc_s.transform_point3(point_s);
      let (pixel, status) = colour.sensor.project(point_sc);
      if status.is_ok() {
        if let Some(sample) = colour
          .image
          .try_get(pixel.x.round() as i32, pixel.y.round() as i32)
        {
          *rgba = rgba.fuse(*sample, weight_before);
        }
      }
    }
    if let Some(ids) = self.ids {
      let (pixel, status) = self.sensor.project(point_s);
      if status.is_ok() {
        if let Some(&sample) = ids.try_get(pixel.x.round() as i32, pixel.y.round() as i32) {
          if sample != ID_NOT_MAPPED {
            *id = sample;
          }
        }
      }
    }
  }
}

fn record_updated(
  updated: Option<&mut Vec<OctantRef>>,
  blocks: &[BlockId],
  nodes: &[NodeId],
) {
  if let Some(updated) = updated {
    updated.clear();
    updated.extend(blocks.iter().map(|&id| OctantRef::Block(id)));
    updated.extend(nodes.iter().map(|&id| OctantRef::Node(id)));
  }
}

// =============================================================================
// TSDF, single resolution
// =============================================================================

impl TsdfMap {
  /// Integrate one depth frame: ray-casting allocation, weighted TSDF
  /// fusion, timestamp propagation.
  pub fn integrate_depth<S: SensorModel>(
    &mut self,
    measurements: &Measurements<S>,
    frame: u64,
    updated_octants: Option<&mut Vec<OctantRef>>,
  ) -> Result<FrameStats, MapError> {
    measurements.validate()?;
    let config = *self.config();
    let ctx = CameraContext::new(measurements, config.res, config.origin, frame);
    let mut stats = FrameStats::default();

    let start = Instant::now();
    let blocks_before = self.octree().block_count();
    let blocks = raycast_carver::raycast_carve(
      self.octree_mut(),
      &config,
      measurements.depth.sensor,
      measurements.depth.image,
      measurements.depth.t_ws,
    )?;
    stats.allocated_blocks = self.octree().block_count() - blocks_before;
    stats.allocation_us = start.elapsed().as_micros() as u64;

    let start = Instant::now();
    tsdf_updater::update_blocks(self.octree_mut(), &blocks, &ctx, &config);
    stats.updated_blocks = blocks.len();
    stats.update_us = start.elapsed().as_micros() as u64;

    let start = Instant::now();
    propagate_timestamp_to_root(self.octree_mut(), &blocks);
    stats.propagation_us = start.elapsed().as_micros() as u64;

    record_updated(updated_octants, &blocks, &[]);
    Ok(stats)
  }
}

// =============================================================================
// TSDF, multi resolution
// =============================================================================

impl TsdfMultiMap {
  /// Integrate one depth frame with adaptive integration scales.
  pub fn integrate_depth<S: SensorModel>(
    &mut self,
    measurements: &Measurements<S>,
    frame: u64,
    updated_octants: Option<&mut Vec<OctantRef>>,
  ) -> Result<FrameStats, MapError> {
    measurements.validate()?;
    let config = *self.config();
    let ctx = CameraContext::new(measurements, config.res, config.origin, frame);
    let mut stats = FrameStats::default();

    let start = Instant::now();
    let blocks_before = self.octree().block_count();
    let blocks = raycast_carver::raycast_carve(
      self.octree_mut(),
      &config,
      measurements.depth.sensor,
      measurements.depth.image,
      measurements.depth.t_ws,
    )?;
    stats.allocated_blocks = self.octree().block_count() - blocks_before;
    stats.allocation_us = start.elapsed().as_micros() as u64;

    let start = Instant::now();
    stats.scale_switches =
      multires_tsdf_updater::update_blocks(self.octree_mut(), &blocks, &ctx, &config);
    stats.updated_blocks = blocks.len();
    stats.update_us = start.elapsed().as_micros() as u64;

    let start = Instant::now();
    propagate_timestamp_to_root(self.octree_mut(), &blocks);
    stats.propagation_us = start.elapsed().as_micros() as u64;

    record_updated(updated_octants, &blocks, &[]);
    Ok(stats)
  }
}

// =============================================================================
// Occupancy, multi resolution
// =============================================================================

impl OccupancyMap {
  /// Integrate one depth frame: volume carving, log-odds fusion with the
  /// adaptive-scale protocol, block and root propagation, pruning.
  pub fn integrate_depth<S: SensorModel>(
    &mut self,
    measurements: &Measurements<S>,
    frame: u64,
    updated_octants: Option<&mut Vec<OctantRef>>,
  ) -> Result<FrameStats, MapError> {
    measurements.validate()?;
    let config = *self.config();
    let ctx = CameraContext::new(measurements, config.res, config.origin, frame);
    let mut stats = FrameStats::default();

    // Allocation: volume carving.
    let start = Instant::now();
    let blocks_before = self.octree().block_count();
    let alloc = volume_carver::volume_carve(
      self.octree_mut(),
      &config,
      measurements.depth.sensor,
      measurements.depth.image,
      measurements.depth.t_ws,
    )?;
    stats.allocated_blocks = self.octree().block_count() - blocks_before;
    stats.allocation_us = start.elapsed().as_micros() as u64;

    // Update: measurement blocks, freed blocks, then bulk node frees.
    let start = Instant::now();
    let mut switches = 0usize;
    {
      let mut blocks = self.octree_mut().blocks_mut(&alloc.block_list);
      switches += blocks
        .par_iter_mut()
        .enumerate()
        .map(|(i, block)| {
          let mode = match alloc.variance_state[i] {
            VarianceState::Constant => LevelMode::FreeProjected,
            VarianceState::Gradient => LevelMode::Measure,
          };
          occupancy_updater::integrate_block(
            block,
            &ctx,
            &config,
            mode,
            alloc.projects_inside[i],
          ) as usize
        })
        .sum::<usize>();
    }
    {
      let mut freed = self.octree_mut().blocks_mut(&alloc.freed_blocks);
      switches += freed
        .par_iter_mut()
        .map(|block| {
          occupancy_updater::integrate_block(block, &ctx, &config, LevelMode::FreeAll, true)
            as usize
        })
        .sum::<usize>();
    }
    for &id in &alloc.node_list {
      let node = self.octree_mut().node_mut(id);
      occupancy_updater::free_node_data(
        &mut node.data,
        &mut node.min_data,
        &mut node.max_data,
        &config.occupancy,
      );
      node.timestamp = frame;
    }
    stats.scale_switches = switches;
    stats.updated_blocks = alloc.block_list.len();
    stats.freed_blocks = alloc.freed_blocks.len();
    stats.freed_nodes = alloc.node_list.len();
    stats.update_us = start.elapsed().as_micros() as u64;

    // Propagation: block pyramids in parallel, then root-ward with pruning.
    let start = Instant::now();
    let mut all_blocks = alloc.block_list.clone();
    all_blocks.extend_from_slice(&alloc.freed_blocks);
    {
      let mut blocks = self.octree_mut().blocks_mut(&all_blocks);
      blocks.par_iter_mut().for_each(|block| occ_block_up(block));
    }
    stats.pruned_nodes = occ_propagate_to_root(
      self.octree_mut(),
      &all_blocks,
      &alloc.node_list,
      frame,
      config.occupancy.min_occupancy,
    );
    stats.propagation_us = start.elapsed().as_micros() as u64;

    record_updated(updated_octants, &all_blocks, &alloc.node_list);
    Ok(stats)
  }

  /// Integrate a single LiDAR ray with its pose.
  pub fn integrate_ray<S: SensorModel>(
    &mut self,
    sensor: &S,
    ray_s: Vec3,
    t_ws: Affine3A,
    frame: u64,
    updated_octants: Option<&mut Vec<OctantRef>>,
  ) -> Result<FrameStats, MapError> {
    self.integrate_ray_batch(sensor, &[(t_ws, ray_s)], frame, updated_octants)
  }

  /// Integrate a batch of rays aggregated over a scan interval; allocation
  /// and fusion happen per ray, propagation once for the whole batch.
  pub fn integrate_ray_batch<S: SensorModel>(
    &mut self,
    sensor: &S,
    batch: &[(Affine3A, Vec3)],
    frame: u64,
    updated_octants: Option<&mut Vec<OctantRef>>,
  ) -> Result<FrameStats, MapError> {
    for (t_ws, ray_s) in batch {
      if !t_ws.is_finite() || !ray_s.is_finite() {
        return Err(MapError::InvalidInput("ray pose is not finite".into()));
      }
    }
    let config = *self.config();
    let mut stats = FrameStats::default();

    let start = Instant::now();
    let blocks_before = self.octree().block_count();
    let alloc =
      ray_integrator::integrate_ray_batch(self.octree_mut(), &config, sensor, batch, frame)?;
    stats.allocated_blocks = self.octree().block_count() - blocks_before;
    stats.updated_blocks = alloc.touched.len();
    stats.update_us = start.elapsed().as_micros() as u64;

    let start = Instant::now();
    {
      let mut blocks = self.octree_mut().blocks_mut(&alloc.touched);
      blocks.par_iter_mut().for_each(|block| occ_block_up(block));
    }
    stats.pruned_nodes = occ_propagate_to_root(
      self.octree_mut(),
      &alloc.touched,
      &[],
      frame,
      config.occupancy.min_occupancy,
    );
    stats.propagation_us = start.elapsed().as_micros() as u64;

    record_updated(updated_octants, &alloc.touched, &[]);
    Ok(stats)
  }
}

#[cfg(test)]
#[path = "integrator_test.rs"]
mod integrator_test;
