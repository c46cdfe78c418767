//! Map and field configuration.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::MapError;
use crate::octree::octant::BLOCK_MAX_SCALE;

/// TSDF field parameters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TsdfConfig {
  /// Truncation band as a multiple of the voxel edge.
  pub truncation_boundary_factor: f32,
  /// Saturation value for the integration weight.
  pub max_weight: u32,
}

impl Default for TsdfConfig {
  fn default() -> Self {
    Self {
      truncation_boundary_factor: 8.0,
      max_weight: 100,
    }
  }
}

/// Log-odds occupancy field parameters.
///
/// `tau` (the surface thickness band) and `sigma` (the measurement noise
/// band) both grow linearly with the measured range and are clamped to
/// multiples of the voxel edge.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct OccupancyConfig {
  /// Log-odds increment a fully-free measurement applies. Negative.
  pub log_odd_min: f32,
  /// Upper clamp for occupied log-odds increments. Positive.
  pub log_odd_max: f32,
  /// Saturation value for the integration weight.
  pub max_weight: u32,
  /// Lower clamp of `tau` as a multiple of the voxel edge.
  pub tau_min_factor: f32,
  /// Upper clamp of `tau` as a multiple of the voxel edge.
  pub tau_max_factor: f32,
  /// Linear growth of `tau` with range.
  pub k_tau: f32,
  /// Lower clamp of `sigma` as a multiple of the voxel edge.
  pub sigma_min_factor: f32,
  /// Upper clamp of `sigma` as a multiple of the voxel edge.
  pub sigma_max_factor: f32,
  /// Linear growth of `sigma` with range.
  pub k_sigma: f32,
  /// Coarsest scale raised to for saturated free space.
  pub fs_integr_scale: i32,
  /// Reference field level for confidently-free space: subtrees whose max
  /// summary sits at or below 95 % of this collapse into their parent.
  pub min_occupancy: f32,
}

impl Default for OccupancyConfig {
  fn default() -> Self {
    let log_odd_min = -5.015;
    Self {
      log_odd_min,
      log_odd_max: 5.015,
      max_weight: 20,
      tau_min_factor: 6.0,
      tau_max_factor: 16.0,
      k_tau: 0.026,
      sigma_min_factor: 1.0,
      sigma_max_factor: 3.0,
      k_sigma: 0.0052,
      fs_integr_scale: 1,
      min_occupancy: log_odd_min,
    }
  }
}

/// Full map configuration.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MapConfig {
  /// Voxel edge length in metres.
  pub res: f32,
  /// Map cube side in voxels. Rounded up to a power of two at construction.
  pub size: u32,
  /// World position of the voxel-(0,0,0) corner of the map cube.
  pub origin: Vec3,
  pub tsdf: TsdfConfig,
  pub occupancy: OccupancyConfig,
}

impl Default for MapConfig {
  fn default() -> Self {
    Self {
      res: 0.05,
      size: 512,
      origin: Vec3::ZERO,
      tsdf: TsdfConfig::default(),
      occupancy: OccupancyConfig::default(),
    }
  }
}

impl MapConfig {
  pub fn new(res: f32, size: u32) -> Self {
    Self {
      res,
      size,
      ..Self::default()
    }
  }

  pub fn with_origin(mut self, origin: Vec3) -> Self {
    self.origin = origin;
    self
  }

  pub fn with_tsdf(mut self, tsdf: TsdfConfig) -> Self {
    self.tsdf = tsdf;
    self
  }

  pub fn with_occupancy(mut self, occupancy: OccupancyConfig) -> Self {
    self.occupancy = occupancy;
    self
  }

  /// Truncation band `tau` in metres.
  #[inline]
  pub fn truncation_boundary(&self) -> f32 {
    self.res * self.tsdf.truncation_boundary_factor
  }

  /// Surface-band thickness for a measurement at range `m`, in metres.
  #[inline]
  pub fn tau(&self, m: f32) -> f32 {
    let occ = &self.occupancy;
    (occ.k_tau * m).clamp(occ.tau_min_factor * self.res, occ.tau_max_factor * self.res)
  }

  /// Three-sigma noise band for a measurement at range `m`, in metres.
  #[inline]
  pub fn three_sigma(&self, m: f32) -> f32 {
    let occ = &self.occupancy;
    3.0
      * (occ.k_sigma * m).clamp(
        occ.sigma_min_factor * self.res,
        occ.sigma_max_factor * self.res,
      )
  }

  pub fn validate(&self) -> Result<(), MapError> {
    if !(self.res > 0.0 && self.res.is_finite()) {
      return Err(MapError::InvalidInput(format!(
        "voxel resolution must be positive, got {}",
        self.res
      )));
    }
    if !self.origin.is_finite() {
      return Err(MapError::InvalidInput("map origin is not finite".into()));
    }
    let occ = &self.occupancy;
    if occ.log_odd_min >= 0.0 || occ.log_odd_max <= 0.0 {
      return Err(MapError::InvalidInput(format!(
        "log-odds bounds must straddle zero, got [{}, {}]",
        occ.log_odd_min, occ.log_odd_max
      )));
    }
    if occ.max_weight == 0 || self.tsdf.max_weight == 0 {
      return Err(MapError::InvalidInput("max_weight must be at least 1".into()));
    }
    if occ.tau_min_factor > occ.tau_max_factor || occ.sigma_min_factor > occ.sigma_max_factor {
      return Err(MapError::InvalidInput(
        "tau/sigma clamp factors are inverted".into(),
      ));
    }
    if !(0..=BLOCK_MAX_SCALE).contains(&occ.fs_integr_scale) {
      return Err(MapError::InvalidInput(format!(
        "fs_integr_scale {} outside block scales 0..={}",
        occ.fs_integr_scale, BLOCK_MAX_SCALE
      )));
    }
    if self.tsdf.truncation_boundary_factor <= 0.0 {
      return Err(MapError::InvalidInput(
        "truncation_boundary_factor must be positive".into(),
      ));
    }
    Ok(())
  }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
