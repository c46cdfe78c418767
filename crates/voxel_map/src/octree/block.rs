//! Leaf octant storage: the single-resolution grid and the multi-resolution
//! TSDF pyramid, plus the double-buffered scale-switch state machine shared
//! with the occupancy block.

use glam::IVec3;

use super::octant::{
  num_voxels_at_scale, size_at_scale, NodeId, BLOCK_MAX_SCALE, BLOCK_SIZE, BLOCK_SIZE_CB,
};
use crate::data::{TsdfData, VoxelData};

/// Buffer integrations required before a pending scale switch can commit.
pub const SWITCH_MIN_INTEGRATIONS: u32 = 20;

/// Fraction of the current observed volume the buffer must reach.
pub const SWITCH_OBSERVED_FRACTION: f32 = 0.9;

/// Storage contract every block flavour offers the octree.
pub trait BlockStorage: Send + Sync + Sized {
  type Data: VoxelData;

  fn new(coord: IVec3, parent: NodeId, init: Self::Data) -> Self;

  /// Reinitialise a pooled slot for reuse.
  fn reset(&mut self, coord: IVec3, parent: NodeId, init: Self::Data);

  fn coord(&self) -> IVec3;

  fn parent(&self) -> NodeId;

  fn timestamp(&self) -> u64;

  fn set_timestamp(&mut self, timestamp: u64);

  /// Finest scale currently holding authoritative data; `0` for
  /// single-resolution blocks.
  fn current_scale(&self) -> i32;

  /// Read a voxel at the requested scale, falling back to the current scale
  /// when the request is finer than what is stored.
  fn data_at_scale(&self, voxel: IVec3, scale: i32) -> Self::Data;

  /// Read a voxel at the block's current scale.
  fn data_at(&self, voxel: IVec3) -> Self::Data {
    self.data_at_scale(voxel, self.current_scale())
  }
}

// =============================================================================
// Scale-switch state machine
// =============================================================================

/// Per-block double-buffer state: `Stable` or a pending rescale candidate.
///
/// While pending, measurements land in the owned buffer as well; the switch
/// commits only once the buffer has seen [`SWITCH_MIN_INTEGRATIONS`]
/// integrations and its observed voxel volume reaches
/// [`SWITCH_OBSERVED_FRACTION`] of the current scale's. Until then queries
/// keep reading the stable representation, never a partial mix.
#[derive(Clone, Debug, Default)]
pub enum ScaleSwitch<D> {
  #[default]
  Stable,
  Pending(PendingSwitch<D>),
}

#[derive(Clone, Debug)]
pub struct PendingSwitch<D> {
  pub scale: i32,
  pub data: Vec<D>,
  /// Voxels that received a direct measurement into the buffer (as opposed
  /// to being seeded from the stable representation).
  pub fresh: Vec<bool>,
  pub integr_count: u32,
  pub observed_count: u32,
}

impl<D: VoxelData> PendingSwitch<D> {
  pub fn new(scale: i32) -> Self {
    let n = num_voxels_at_scale(scale);
    Self {
      scale,
      data: vec![D::default(); n],
      fresh: vec![false; n],
      integr_count: 0,
      observed_count: 0,
    }
  }

  /// Observed voxel volume of the buffer, in finest-scale voxels.
  #[inline]
  pub fn observed_volume(&self) -> f32 {
    let v = 1 << (3 * self.scale);
    self.observed_count as f32 * v as f32
  }

  /// Whether the switch thresholds are met against the current scale's
  /// observed volume (also in finest-scale voxels).
  pub fn ready(&self, curr_observed_volume: f32) -> bool {
    self.integr_count >= SWITCH_MIN_INTEGRATIONS
      && self.observed_volume() >= SWITCH_OBSERVED_FRACTION * curr_observed_volume
  }
}

impl<D> ScaleSwitch<D> {
  #[inline]
  pub fn pending(&self) -> Option<&PendingSwitch<D>> {
    match self {
      ScaleSwitch::Pending(p) => Some(p),
      ScaleSwitch::Stable => None,
    }
  }

  #[inline]
  pub fn pending_mut(&mut self) -> Option<&mut PendingSwitch<D>> {
    match self {
      ScaleSwitch::Pending(p) => Some(p),
      ScaleSwitch::Stable => None,
    }
  }

  #[inline]
  pub fn reset(&mut self) {
    *self = ScaleSwitch::Stable;
  }
}

// =============================================================================
// Single-resolution block
// =============================================================================

/// Dense `B^3` voxel grid, indexed `x + y*B + z*B^2`.
#[derive(Clone, Debug)]
pub struct SingleResBlock<D> {
  coord: IVec3,
  parent: NodeId,
  timestamp: u64,
  data: Box<[D]>,
}

impl<D: VoxelData> SingleResBlock<D> {
  #[inline]
  pub fn voxel_idx(&self, voxel: IVec3) -> usize {
    let offset = voxel - self.coord;
    debug_assert!(offset.min_element() >= 0 && offset.max_element() < BLOCK_SIZE);
    (offset.x + offset.y * BLOCK_SIZE + offset.z * BLOCK_SIZE * BLOCK_SIZE) as usize
  }

  #[inline]
  pub fn voxel(&self, idx: usize) -> &D {
    &self.data[idx]
  }

  #[inline]
  pub fn voxel_mut(&mut self, idx: usize) -> &mut D {
    &mut self.data[idx]
  }

  #[inline]
  pub fn data_mut(&mut self, voxel: IVec3) -> &mut D {
    let idx = self.voxel_idx(voxel);
    &mut self.data[idx]
  }

  pub fn voxels(&self) -> &[D] {
    &self.data
  }
}

impl<D: VoxelData> BlockStorage for SingleResBlock<D> {
  type Data = D;

  fn new(coord: IVec3, parent: NodeId, init: D) -> Self {
    Self {
      coord,
      parent,
      timestamp: 0,
      data: vec![init; BLOCK_SIZE_CB].into_boxed_slice(),
    }
  }

  fn reset(&mut self, coord: IVec3, parent: NodeId, init: D) {
    self.coord = coord;
    self.parent = parent;
    self.timestamp = 0;
    self.data.fill(init);
  }

  fn coord(&self) -> IVec3 {
    self.coord
  }

  fn parent(&self) -> NodeId {
    self.parent
  }

  fn timestamp(&self) -> u64 {
    self.timestamp
  }

  fn set_timestamp(&mut self, timestamp: u64) {
    self.timestamp = timestamp;
  }

  fn current_scale(&self) -> i32 {
    0
  }

  fn data_at_scale(&self, voxel: IVec3, _scale: i32) -> D {
    self.data[self.voxel_idx(voxel)]
  }
}

// =============================================================================
// Multi-resolution TSDF block
// =============================================================================

/// Per-voxel bookkeeping for temporal delta propagation across scales.
#[derive(Clone, Copy, Debug, Default)]
pub struct TsdfDelta {
  /// Field value at the last up-propagation.
  pub delta_tsdf: f32,
  /// Integrations applied at this scale since the last down-propagation.
  pub delta_weight: u32,
}

/// Offsets of each scale's level inside the pyramid arena.
pub const TSDF_SCALE_OFFSETS: [usize; (BLOCK_MAX_SCALE + 1) as usize] = [0, 512, 576, 584];

/// Total voxels across the pyramid: 8^3 + 4^3 + 2^3 + 1.
pub const TSDF_PYRAMID_LEN: usize = 585;

/// Multi-resolution TSDF pyramid in one contiguous arena, finest level
/// first, with a parallel "past" record per voxel.
#[derive(Clone, Debug)]
pub struct MultiResTsdfBlock {
  coord: IVec3,
  parent: NodeId,
  timestamp: u64,
  data: Box<[TsdfData]>,
  past: Box<[TsdfDelta]>,
  /// Finest scale holding authoritative data.
  pub current_scale: i32,
  /// Finest scale ever integrated; `-1` before the first visit.
  pub min_scale: i32,
  pub switch: ScaleSwitch<TsdfData>,
}

impl MultiResTsdfBlock {
  /// Arena index of `voxel` at `scale`.
  #[inline]
  pub fn voxel_idx(&self, voxel: IVec3, scale: i32) -> usize {
    debug_assert!((0..=BLOCK_MAX_SCALE).contains(&scale));
    let offset = (voxel - self.coord) >> scale;
    let n = size_at_scale(scale);
    debug_assert!(offset.min_element() >= 0 && offset.max_element() < n);
    TSDF_SCALE_OFFSETS[scale as usize] + (offset.x + offset.y * n + offset.z * n * n) as usize
  }

  /// Linear index of a level-local voxel at `scale`.
  #[inline]
  pub fn level_idx(scale: i32, x: i32, y: i32, z: i32) -> usize {
    let n = size_at_scale(scale);
    TSDF_SCALE_OFFSETS[scale as usize] + (x + y * n + z * n * n) as usize
  }

  #[inline]
  pub fn voxel(&self, idx: usize) -> &TsdfData {
    &self.data[idx]
  }

  #[inline]
  pub fn voxel_mut(&mut self, idx: usize) -> &mut TsdfData {
    &mut self.data[idx]
  }

  #[inline]
  pub fn past(&self, idx: usize) -> &TsdfDelta {
    &self.past[idx]
  }

  #[inline]
  pub fn past_mut(&mut self, idx: usize) -> &mut TsdfDelta {
    &mut self.past[idx]
  }

  /// Read a voxel at exactly `scale`, regardless of the current scale.
  #[inline]
  pub fn data_at_scale_exact(&self, voxel: IVec3, scale: i32) -> TsdfData {
    self.data[self.voxel_idx(voxel, scale)]
  }

  /// Observed voxel volume at the current scale, in finest-scale voxels.
  pub fn observed_volume(&self) -> f32 {
    let scale = self.current_scale;
    let offset = TSDF_SCALE_OFFSETS[scale as usize];
    let n = num_voxels_at_scale(scale);
    let observed = self.data[offset..offset + n]
      .iter()
      .filter(|d| d.is_valid())
      .count();
    observed as f32 * (1 << (3 * scale)) as f32
  }

  /// Overwrite the level at `scale` and make it current.
  pub fn commit_level(&mut self, scale: i32, level: &[TsdfData]) {
    let offset = TSDF_SCALE_OFFSETS[scale as usize];
    let n = num_voxels_at_scale(scale);
    debug_assert_eq!(level.len(), n);
    self.data[offset..offset + n].copy_from_slice(level);
    for delta in &mut self.past[offset..offset + n] {
      *delta = TsdfDelta::default();
    }
    self.current_scale = scale;
    self.min_scale = if self.min_scale == -1 {
      scale
    } else {
      self.min_scale.min(scale)
    };
  }
}

impl BlockStorage for MultiResTsdfBlock {
  type Data = TsdfData;

  fn new(coord: IVec3, parent: NodeId, init: TsdfData) -> Self {
    Self {
      coord,
      parent,
      timestamp: 0,
      data: vec![init; TSDF_PYRAMID_LEN].into_boxed_slice(),
      past: vec![TsdfDelta::default(); TSDF_PYRAMID_LEN].into_boxed_slice(),
      current_scale: 0,
      min_scale: -1,
      switch: ScaleSwitch::Stable,
    }
  }

  fn reset(&mut self, coord: IVec3, parent: NodeId, init: TsdfData) {
    self.coord = coord;
    self.parent = parent;
    self.timestamp = 0;
    self.data.fill(init);
    self.past.fill(TsdfDelta::default());
    self.current_scale = 0;
    self.min_scale = -1;
    self.switch.reset();
  }

  fn coord(&self) -> IVec3 {
    self.coord
  }

  fn parent(&self) -> NodeId {
    self.parent
  }

  fn timestamp(&self) -> u64 {
    self.timestamp
  }

  fn set_timestamp(&mut self, timestamp: u64) {
    self.timestamp = timestamp;
  }

  fn current_scale(&self) -> i32 {
    self.current_scale
  }

  fn data_at_scale(&self, voxel: IVec3, scale: i32) -> TsdfData {
    let scale = scale.max(self.current_scale).min(BLOCK_MAX_SCALE);
    self.data[self.voxel_idx(voxel, scale)]
  }
}

#[cfg(test)]
#[path = "block_test.rs"]
mod block_test;
