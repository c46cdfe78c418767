//! The map facade: a configured octree with world/voxel conversions and
//! point queries in metric coordinates.

use glam::{IVec3, Vec3};

use crate::config::MapConfig;
use crate::data::{OccupancyData, TsdfData};
use crate::error::MapError;
use crate::octree::{
  BlockStorage, MultiResOccBlock, MultiResTsdfBlock, Octree, SingleResBlock,
};
use crate::sampling;

/// Single-resolution TSDF map.
pub type TsdfMap = VoxelMap<SingleResBlock<TsdfData>>;

/// Multi-resolution TSDF map.
pub type TsdfMultiMap = VoxelMap<MultiResTsdfBlock>;

/// Multi-resolution log-odds occupancy map.
pub type OccupancyMap = VoxelMap<MultiResOccBlock>;

/// A volumetric map: the octree store plus its metric frame.
///
/// Voxel `(0,0,0)`'s minimum corner sits at `config.origin`; a voxel spans
/// `config.res` metres per edge.
pub struct VoxelMap<B: BlockStorage> {
  octree: Octree<B>,
  config: MapConfig,
}

impl<B: BlockStorage> VoxelMap<B> {
  pub fn new(config: MapConfig) -> Result<Self, MapError> {
    config.validate()?;
    Ok(Self {
      octree: Octree::new(config.size as i32),
      config,
    })
  }

  pub fn with_octant_limit(mut self, limit: usize) -> Self {
    self.octree = self.octree.with_octant_limit(limit);
    self
  }

  #[inline]
  pub fn config(&self) -> &MapConfig {
    &self.config
  }

  #[inline]
  pub fn res(&self) -> f32 {
    self.config.res
  }

  /// Metric side length of the map cube.
  #[inline]
  pub fn dim(&self) -> f32 {
    self.octree.size() as f32 * self.config.res
  }

  #[inline]
  pub fn octree(&self) -> &Octree<B> {
    &self.octree
  }

  #[inline]
  pub fn octree_mut(&mut self) -> &mut Octree<B> {
    &mut self.octree
  }

  // ---------------------------------------------------------------------------
  // Frame conversions
  // ---------------------------------------------------------------------------

  /// World position of a voxel's minimum corner.
  #[inline]
  pub fn voxel_to_point(&self, voxel: IVec3) -> Vec3 {
    self.config.origin + voxel.as_vec3() * self.config.res
  }

  /// World position of the centre of an octant of edge `size` voxels.
  #[inline]
  pub fn octant_centre(&self, voxel: IVec3, size: i32) -> Vec3 {
    self.config.origin + (voxel.as_vec3() + Vec3::splat(size as f32 / 2.0)) * self.config.res
  }

  /// Fractional voxel coordinates of a world point.
  #[inline]
  pub fn point_to_voxel_f(&self, point: Vec3) -> Vec3 {
    (point - self.config.origin) / self.config.res
  }

  /// Voxel containing a world point.
  #[inline]
  pub fn point_to_voxel(&self, point: Vec3) -> IVec3 {
    self.point_to_voxel_f(point).floor().as_ivec3()
  }

  /// Whether a world point lies inside the map cube.
  #[inline]
  pub fn contains_point(&self, point: Vec3) -> bool {
    let voxel = self.point_to_voxel_f(point);
    voxel.cmpge(Vec3::ZERO).all() && voxel.cmplt(Vec3::splat(self.octree.size() as f32)).all()
  }

  // ---------------------------------------------------------------------------
  // Point queries
  // ---------------------------------------------------------------------------

  /// Voxel data at a world point.
  pub fn data(&self, point: Vec3) -> B::Data {
    if !self.contains_point(point) {
      return B::Data::default();
    }
    sampling::data_at(&self.octree, self.point_to_voxel(point))
  }

  /// Interpolated field value at a world point, with the scale used.
  pub fn field_interp(&self, point: Vec3) -> Option<(f32, i32)> {
    if !self.contains_point(point) {
      return None;
    }
    sampling::field_interp(&self.octree, self.point_to_voxel_f(point), 0)
  }

  /// Field gradient at a world point, in 1/metre units.
  pub fn field_grad(&self, point: Vec3) -> Option<Vec3> {
    if !self.contains_point(point) {
      return None;
    }
    let grad = sampling::field_grad(&self.octree, self.point_to_voxel_f(point))?;
    Some(grad / self.config.res)
  }
}

impl OccupancyMap {
  /// Max occupancy summary at a world point and scale.
  pub fn max_data(&self, point: Vec3, scale: i32) -> OccupancyData {
    if !self.contains_point(point) {
      return OccupancyData::default();
    }
    sampling::max_data_at(&self.octree, self.point_to_voxel(point), scale)
  }
}

#[cfg(test)]
#[path = "map_test.rs"]
mod map_test;
