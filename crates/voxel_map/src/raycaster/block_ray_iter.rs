//! Block-ray enumeration: a DDA over the block grid yielding the allocated
//! blocks a ray passes through, in order, with entry/exit distances.

use glam::{IVec3, Vec3};

use crate::octree::block::BlockStorage;
use crate::octree::octant::BLOCK_SIZE;
use crate::octree::{BlockId, Octree};

/// Iterator over allocated blocks along a ray, everything in voxel units.
pub struct BlockRayIterator<'a, B: BlockStorage> {
  octree: &'a Octree<B>,
  origin: Vec3,
  dir: Vec3,
  /// Current travelled distance (voxel units).
  t: f32,
  t_max: f32,
  done: bool,
}

impl<'a, B: BlockStorage> BlockRayIterator<'a, B> {
  /// `origin` and `dir` in voxel coordinates, `t` range in voxel units.
  /// The range is clipped to the map cube.
  pub fn new(octree: &'a Octree<B>, origin: Vec3, dir: Vec3, t_min: f32, t_max: f32) -> Self {
    let (clip_min, clip_max) = clip_to_cube(origin, dir, octree.size() as f32);
    let t = t_min.max(clip_min);
    let t_max = t_max.min(clip_max);
    Self {
      octree,
      origin,
      dir,
      t,
      t_max,
      done: t >= t_max,
    }
  }

  /// Next allocated block with its `[t_entry, t_exit]` (voxel units).
  #[allow(clippy::should_implement_trait)]
  pub fn next(&mut self) -> Option<(BlockId, f32, f32)> {
    const EPS: f32 = 1e-4;
    while !self.done {
      let point = self.origin + self.dir * (self.t + EPS);
      let voxel = point.floor().as_ivec3();
      if !self.octree.contains(voxel) {
        self.done = true;
        return None;
      }
      let block_corner = voxel & !(BLOCK_SIZE - 1);
      let t_exit = exit_distance(self.origin, self.dir, block_corner, self.t);
      let t_entry = self.t;
      self.t = t_exit + EPS;
      if self.t >= self.t_max {
        self.done = true;
      }
      if let Some(id) = self.octree.find_block(voxel) {
        return Some((id, t_entry, t_exit.min(self.t_max)));
      }
    }
    None
  }
}

/// Distance at which the ray leaves the block starting at `corner`.
fn exit_distance(origin: Vec3, dir: Vec3, corner: IVec3, t: f32) -> f32 {
  let lo = corner.as_vec3();
  let hi = lo + Vec3::splat(BLOCK_SIZE as f32);
  let mut t_exit = f32::INFINITY;
  for axis in 0..3 {
    if dir[axis].abs() < 1e-9 {
      continue;
    }
    let boundary = if dir[axis] > 0.0 { hi[axis] } else { lo[axis] };
    let tb = (boundary - origin[axis]) / dir[axis];
    if tb > t {
      t_exit = t_exit.min(tb);
    }
  }
  if t_exit.is_finite() {
    t_exit
  } else {
    t + BLOCK_SIZE as f32
  }
}

/// Slab clip of the ray against `[0, size]^3`; returns an empty interval
/// when the ray misses.
pub fn clip_to_cube(origin: Vec3, dir: Vec3, size: f32) -> (f32, f32) {
  let mut t_min = 0.0f32;
  let mut t_max = f32::INFINITY;
  for axis in 0..3 {
    if dir[axis].abs() < 1e-9 {
      if origin[axis] < 0.0 || origin[axis] > size {
        return (1.0, 0.0);
      }
      continue;
    }
    let t0 = (0.0 - origin[axis]) / dir[axis];
    let t1 = (size - origin[axis]) / dir[axis];
    let (t0, t1) = if t0 < t1 { (t0, t1) } else { (t1, t0) };
    t_min = t_min.max(t0);
    t_max = t_max.min(t1);
  }
  (t_min, t_max)
}
