//! Point queries against the octree: voxel data lookup, coarse summaries,
//! trilinear field interpolation and gradients.
//!
//! Every query degrades gracefully: unallocated regions answer with the
//! deepest ancestor's data, and interpolation returns `None` whenever any
//! contributing sample is unobserved.

use glam::{IVec3, Vec3};

use crate::data::{OccupancyData, VoxelData};
use crate::octree::{
  BlockStorage, MultiResOccBlock, Octree, OctantRef, BLOCK_MAX_SCALE,
};

/// Data of the deepest allocated octant containing `voxel`, at the block's
/// current scale where a block exists.
pub fn data_at<B: BlockStorage>(octree: &Octree<B>, voxel: IVec3) -> B::Data {
  if !octree.contains(voxel) {
    return B::Data::default();
  }
  match octree.find_octant(voxel) {
    OctantRef::Block(id) => octree.block(id).data_at(voxel),
    OctantRef::Node(id) => octree.node(id).data,
  }
}

/// Like [`data_at`] but honouring a desired scale inside blocks; the
/// returned scale is the one actually read.
pub fn data_at_scale<B: BlockStorage>(
  octree: &Octree<B>,
  voxel: IVec3,
  desired_scale: i32,
) -> (B::Data, i32) {
  if !octree.contains(voxel) {
    return (B::Data::default(), desired_scale);
  }
  match octree.find_octant(voxel) {
    OctantRef::Block(id) => {
      let block = octree.block(id);
      let scale = desired_scale.max(block.current_scale()).min(BLOCK_MAX_SCALE);
      (block.data_at_scale(voxel, scale), scale)
    }
    OctantRef::Node(id) => {
      let node = octree.node(id);
      (node.data, crate::octree::octant::size_to_scale(node.size))
    }
  }
}

/// Field value at `voxel` if observed.
pub fn field_at<B: BlockStorage>(octree: &Octree<B>, voxel: IVec3) -> Option<f32> {
  let data = data_at(octree, voxel);
  data.is_valid().then(|| data.field())
}

/// Max occupancy summary covering `voxel` at `scale`.
///
/// Reads the node summary at the matching tree level, or the block's max
/// pyramid when `scale` is inside the block. This is what the ray-caster's
/// empty-space skipping consumes.
pub fn max_data_at(
  octree: &Octree<MultiResOccBlock>,
  voxel: IVec3,
  scale: i32,
) -> OccupancyData {
  if !octree.contains(voxel) {
    return OccupancyData::default();
  }
  match octree.find_octant_at_scale(voxel, scale) {
    OctantRef::Node(id) => octree.node(id).max_data,
    OctantRef::Block(id) => octree.block(id).max_data_at_scale(voxel, scale),
  }
}

/// Min occupancy summary covering `voxel` at `scale`.
pub fn min_data_at(
  octree: &Octree<MultiResOccBlock>,
  voxel: IVec3,
  scale: i32,
) -> OccupancyData {
  if !octree.contains(voxel) {
    return OccupancyData::default();
  }
  match octree.find_octant_at_scale(voxel, scale) {
    OctantRef::Node(id) => octree.node(id).min_data,
    OctantRef::Block(id) => octree.block(id).min_data_at_scale(voxel, scale),
  }
}

/// Finest scale at which `voxel` can be interpolated: the current scale of
/// its block, or `None` outside allocated blocks.
fn interp_scale<B: BlockStorage>(
  octree: &Octree<B>,
  voxel: IVec3,
  desired_scale: i32,
) -> Option<i32> {
  let id = octree.find_block(voxel)?;
  Some(
    desired_scale
      .max(octree.block(id).current_scale())
      .min(BLOCK_MAX_SCALE),
  )
}

/// Trilinear field interpolation at fractional voxel coordinates.
///
/// Samples live at voxel centres of the interpolation scale. Returns the
/// value and the scale used, or `None` when any of the eight samples is
/// unobserved.
pub fn field_interp<B: BlockStorage>(
  octree: &Octree<B>,
  voxel_f: Vec3,
  desired_scale: i32,
) -> Option<(f32, i32)> {
  let centre_voxel = voxel_f.floor().as_ivec3();
  if !octree.contains(centre_voxel) {
    return None;
  }
  let scale = interp_scale(octree, centre_voxel, desired_scale)?;
  let stride = (1 << scale) as f32;

  // Grid coordinates of the surrounding sample-centre lattice.
  let grid = voxel_f / stride - Vec3::splat(0.5);
  let base = grid.floor();
  let frac = grid - base;
  let base = base.as_ivec3();

  let mut values = [0.0f32; 8];
  for (i, value) in values.iter_mut().enumerate() {
    let offset = IVec3::new((i & 1) as i32, ((i >> 1) & 1) as i32, ((i >> 2) & 1) as i32);
    let sample_voxel = (base + offset) * stride as i32;
    if !octree.contains(sample_voxel) {
      return None;
    }
    let (data, _) = data_at_scale(octree, sample_voxel, scale);
    if !data.is_valid() {
      return None;
    }
    *value = data.field();
  }

  let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
  let x00 = lerp(values[0], values[1], frac.x);
  let x10 = lerp(values[2], values[3], frac.x);
  let x01 = lerp(values[4], values[5], frac.x);
  let x11 = lerp(values[6], values[7], frac.x);
  let y0 = lerp(x00, x10, frac.y);
  let y1 = lerp(x01, x11, frac.y);
  Some((lerp(y0, y1, frac.z), scale))
}

/// Field gradient (per voxel unit) by central differences of the
/// interpolated field, at the finest locally available scale.
pub fn field_grad<B: BlockStorage>(octree: &Octree<B>, voxel_f: Vec3) -> Option<Vec3> {
  let centre_voxel = voxel_f.floor().as_ivec3();
  if !octree.contains(centre_voxel) {
    return None;
  }
  let scale = interp_scale(octree, centre_voxel, 0)?;
  let h = (1 << scale) as f32;

  let mut grad = Vec3::ZERO;
  for axis in 0..3 {
    let mut offset = Vec3::ZERO;
    offset[axis] = h;
    let (hi, _) = field_interp(octree, voxel_f + offset, scale)?;
    let (lo, _) = field_interp(octree, voxel_f - offset, scale)?;
    grad[axis] = (hi - lo) / (2.0 * h);
  }
  Some(grad)
}

#[cfg(test)]
#[path = "sampling_test.rs"]
mod sampling_test;
