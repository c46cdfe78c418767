//! Voxel records and their fusion rules.
//!
//! Two record kinds exist: truncated signed distance ([`TsdfData`]) and
//! log-odds occupancy ([`OccupancyData`]). Both carry an RGBA slot fused
//! with the same running average as the field, and an integer id where the
//! last write wins (`0` meaning "not mapped").

use serde::{Deserialize, Serialize};

/// Id value of unmapped voxels.
pub const ID_NOT_MAPPED: u32 = 0;

/// Packed colour fused alongside the field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgba {
  pub r: u8,
  pub g: u8,
  pub b: u8,
  pub a: u8,
}

impl Rgba {
  pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
    Self { r, g, b, a }
  }

  /// Running weighted average with `weight` prior samples.
  pub fn fuse(self, sample: Rgba, weight: u32) -> Rgba {
    let w = weight as f32;
    let avg = |old: u8, new: u8| ((old as f32 * w + new as f32) / (w + 1.0)).round() as u8;
    Rgba {
      r: avg(self.r, sample.r),
      g: avg(self.g, sample.g),
      b: avg(self.b, sample.b),
      a: avg(self.a, sample.a),
    }
  }
}

/// Shared surface of the two voxel record kinds.
///
/// `field` is the scalar the ray-caster and mesher consume: the truncated
/// signed distance for TSDF, `occupancy * weight` (accumulated log-odds)
/// for occupancy.
pub trait VoxelData: Clone + Copy + Default + Send + Sync + 'static {
  /// Iso-value separating free from occupied.
  const SURFACE_BOUNDARY: f32;

  /// Whether surface normals point along the field gradient.
  const NORMALS_ALONG_GRADIENT: bool;

  fn field(&self) -> f32;

  fn weight(&self) -> u32;

  /// Whether the record holds at least one integrated measurement.
  fn is_valid(&self) -> bool;

  /// Whether the record lies on the solid side of the surface.
  fn is_inside(&self) -> bool;

  fn rgba(&self) -> Rgba;

  fn id(&self) -> u32;
}

// =============================================================================
// TSDF
// =============================================================================

/// Truncated signed distance record.
///
/// `tsdf` is normalised to `[-1, 1]` by the truncation band; unobserved
/// voxels sit at `1` (free) with weight `0`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TsdfData {
  pub tsdf: f32,
  pub weight: u32,
  pub rgba: Rgba,
  pub id: u32,
}

impl Default for TsdfData {
  fn default() -> Self {
    Self {
      tsdf: 1.0,
      weight: 0,
      rgba: Rgba::default(),
      id: ID_NOT_MAPPED,
    }
  }
}

impl TsdfData {
  /// Fuse a signed distance sample (metres) into the record.
  ///
  /// Samples beyond the negative truncation band are rejected. Returns
  /// whether the record was updated.
  pub fn update(&mut self, sdf_value: f32, truncation_boundary: f32, max_weight: u32) -> bool {
    if sdf_value <= -truncation_boundary {
      return false;
    }
    let tsdf_value = (sdf_value / truncation_boundary).min(1.0);
    let w = self.weight as f32;
    self.tsdf = ((self.tsdf * w + tsdf_value) / (w + 1.0)).clamp(-1.0, 1.0);
    self.weight = (self.weight + 1).min(max_weight);
    true
  }
}

impl VoxelData for TsdfData {
  const SURFACE_BOUNDARY: f32 = 0.0;
  // TSDF decreases crossing into the surface: the gradient already points
  // out of it, toward free space.
  const NORMALS_ALONG_GRADIENT: bool = true;

  #[inline]
  fn field(&self) -> f32 {
    self.tsdf
  }

  #[inline]
  fn weight(&self) -> u32 {
    self.weight
  }

  #[inline]
  fn is_valid(&self) -> bool {
    self.weight > 0
  }

  #[inline]
  fn is_inside(&self) -> bool {
    self.tsdf < Self::SURFACE_BOUNDARY
  }

  #[inline]
  fn rgba(&self) -> Rgba {
    self.rgba
  }

  #[inline]
  fn id(&self) -> u32 {
    self.id
  }
}

// =============================================================================
// Occupancy
// =============================================================================

/// Log-odds occupancy record.
///
/// `occupancy` holds the mean log-odds sample; the field value scales it by
/// the weight so saturation thresholds are absolute.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OccupancyData {
  pub occupancy: f32,
  pub weight: u32,
  pub observed: bool,
  pub rgba: Rgba,
  pub id: u32,
}

impl OccupancyData {
  /// Fuse a log-odds sample. Returns whether the voxel was newly observed.
  pub fn update(&mut self, sample: f32, max_weight: u32) -> bool {
    let newly_observed = !self.observed;
    let w = self.weight as f32;
    self.occupancy = (self.occupancy * w + sample) / (w + 1.0);
    self.weight = (self.weight + 1).min(max_weight);
    self.observed = true;
    newly_observed
  }
}

impl VoxelData for OccupancyData {
  const SURFACE_BOUNDARY: f32 = -0.1;
  // Occupancy increases crossing into the surface; the normal is the
  // negated gradient.
  const NORMALS_ALONG_GRADIENT: bool = false;

  #[inline]
  fn field(&self) -> f32 {
    self.occupancy * self.weight as f32
  }

  #[inline]
  fn weight(&self) -> u32 {
    self.weight
  }

  #[inline]
  fn is_valid(&self) -> bool {
    self.observed
  }

  #[inline]
  fn is_inside(&self) -> bool {
    self.field() > Self::SURFACE_BOUNDARY
  }

  #[inline]
  fn rgba(&self) -> Rgba {
    self.rgba
  }

  #[inline]
  fn id(&self) -> u32 {
    self.id
  }
}

#[cfg(test)]
#[path = "data_test.rs"]
mod data_test;
