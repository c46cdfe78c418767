//! Multi-resolution occupancy block.
//!
//! Three pyramids (mean, min, max) live in one owning arena, addressed by
//! per-scale offsets. At the finest allocated scale the three offsets point
//! at the same segment, so mean, min and max read the same storage there.
//! A pending rescale accumulates into the owned buffer of the
//! [`ScaleSwitch`] state machine and is committed atomically.

use glam::IVec3;

use super::block::{BlockStorage, PendingSwitch, ScaleSwitch};
use super::octant::{num_voxels_at_scale, size_at_scale, NodeId, BLOCK_MAX_SCALE};
use crate::data::{OccupancyData, VoxelData};

const NUM_SCALES: usize = (BLOCK_MAX_SCALE + 1) as usize;

#[derive(Clone, Debug)]
pub struct MultiResOccBlock {
  coord: IVec3,
  parent: NodeId,
  timestamp: u64,
  arena: Vec<OccupancyData>,
  mean_off: [Option<u32>; NUM_SCALES],
  min_off: [Option<u32>; NUM_SCALES],
  max_off: [Option<u32>; NUM_SCALES],
  init_data: OccupancyData,
  /// Finest scale holding authoritative data.
  pub current_scale: i32,
  /// Finest scale ever integrated; `-1` before the first visit.
  pub min_scale: i32,
  /// Finest allocated pyramid level.
  alloc_scale: i32,
  pub switch: ScaleSwitch<OccupancyData>,
  /// Integrations into the current scale since the last switch.
  pub curr_integr_count: u32,
  /// Observed voxels at the current scale.
  pub curr_observed_count: u32,
}

impl MultiResOccBlock {
  #[inline]
  fn level_voxel_idx(&self, voxel: IVec3, scale: i32) -> usize {
    let offset = (voxel - self.coord) >> scale;
    let n = size_at_scale(scale);
    debug_assert!(offset.min_element() >= 0 && offset.max_element() < n);
    (offset.x + offset.y * n + offset.z * n * n) as usize
  }

  #[inline]
  pub fn init_data(&self) -> OccupancyData {
    self.init_data
  }

  #[inline]
  pub fn alloc_scale(&self) -> i32 {
    self.alloc_scale
  }

  /// Mean level at `scale`, `None` when not allocated.
  pub fn mean_level(&self, scale: i32) -> Option<&[OccupancyData]> {
    let off = self.mean_off[scale as usize]? as usize;
    Some(&self.arena[off..off + num_voxels_at_scale(scale)])
  }

  pub fn mean_level_mut(&mut self, scale: i32) -> Option<&mut [OccupancyData]> {
    let off = self.mean_off[scale as usize]? as usize;
    Some(&mut self.arena[off..off + num_voxels_at_scale(scale)])
  }

  pub fn min_level(&self, scale: i32) -> Option<&[OccupancyData]> {
    let off = self.min_off[scale as usize]? as usize;
    Some(&self.arena[off..off + num_voxels_at_scale(scale)])
  }

  pub fn max_level(&self, scale: i32) -> Option<&[OccupancyData]> {
    let off = self.max_off[scale as usize]? as usize;
    Some(&self.arena[off..off + num_voxels_at_scale(scale)])
  }

  /// Whether the three pyramids share storage at `scale`.
  pub fn is_aliased(&self, scale: i32) -> bool {
    let s = scale as usize;
    self.mean_off[s].is_some()
      && self.mean_off[s] == self.min_off[s]
      && self.mean_off[s] == self.max_off[s]
  }

  /// Arena index of a mean voxel, `None` when the level is not allocated.
  #[inline]
  pub fn mean_idx(&self, voxel: IVec3, scale: i32) -> Option<usize> {
    Some(self.mean_off[scale as usize]? as usize + self.level_voxel_idx(voxel, scale))
  }

  #[inline]
  pub fn min_idx(&self, voxel: IVec3, scale: i32) -> Option<usize> {
    Some(self.min_off[scale as usize]? as usize + self.level_voxel_idx(voxel, scale))
  }

  #[inline]
  pub fn max_idx(&self, voxel: IVec3, scale: i32) -> Option<usize> {
    Some(self.max_off[scale as usize]? as usize + self.level_voxel_idx(voxel, scale))
  }

  #[inline]
  pub fn voxel(&self, idx: usize) -> &OccupancyData {
    &self.arena[idx]
  }

  #[inline]
  pub fn voxel_mut(&mut self, idx: usize) -> &mut OccupancyData {
    &mut self.arena[idx]
  }

  /// Read a voxel at exactly `scale`; init data when unallocated.
  pub fn data_at_scale_exact(&self, voxel: IVec3, scale: i32) -> OccupancyData {
    match self.mean_idx(voxel, scale) {
      Some(idx) => self.arena[idx],
      None => self.init_data,
    }
  }

  pub fn min_data_at_scale(&self, voxel: IVec3, scale: i32) -> OccupancyData {
    let scale = scale.max(self.current_scale);
    match self.min_idx(voxel, scale) {
      Some(idx) => self.arena[idx],
      None => self.init_data,
    }
  }

  pub fn max_data_at_scale(&self, voxel: IVec3, scale: i32) -> OccupancyData {
    let scale = scale.max(self.current_scale);
    match self.max_idx(voxel, scale) {
      Some(idx) => self.arena[idx],
      None => self.init_data,
    }
  }

  /// Min summary over the whole block (coarsest-scale min voxel).
  pub fn min_data(&self) -> OccupancyData {
    self.min_level(BLOCK_MAX_SCALE).map_or(self.init_data, |l| l[0])
  }

  /// Max summary over the whole block (coarsest-scale max voxel).
  pub fn max_data(&self) -> OccupancyData {
    self.max_level(BLOCK_MAX_SCALE).map_or(self.init_data, |l| l[0])
  }

  /// Field value of the max summary.
  pub fn max_value(&self) -> f32 {
    self.max_data().field()
  }

  /// Observed voxel volume at the current scale, in finest-scale voxels.
  #[inline]
  pub fn curr_observed_volume(&self) -> f32 {
    self.curr_observed_count as f32 * (1 << (3 * self.current_scale)) as f32
  }

  pub fn incr_curr_observed(&mut self, newly_observed: bool) {
    if newly_observed {
      self.curr_observed_count += 1;
    }
  }

  pub fn incr_curr_integr(&mut self) {
    self.curr_integr_count += 1;
  }

  pub fn reset_curr_counts(&mut self) {
    self.curr_integr_count = 0;
    self.curr_observed_count = 0;
  }

  /// Initialise the counters after the first allocation down to the
  /// integration scale, honouring an observed seed value.
  pub fn init_curr_counts(&mut self) {
    if self.init_data.observed {
      self.curr_integr_count = self.init_data.weight;
      self.curr_observed_count = num_voxels_at_scale(self.current_scale) as u32;
    } else {
      self.reset_curr_counts();
    }
  }

  // ---------------------------------------------------------------------------
  // Pyramid growth and collapse
  // ---------------------------------------------------------------------------

  fn rebuild(&mut self, new_alloc_scale: i32) {
    let mut arena = Vec::new();
    let mut mean_off = [None; NUM_SCALES];
    let mut min_off = [None; NUM_SCALES];
    let mut max_off = [None; NUM_SCALES];

    let mut push_level =
      |arena: &mut Vec<OccupancyData>, level: Option<&[OccupancyData]>, n: usize| -> u32 {
        let off = arena.len() as u32;
        match level {
          Some(level) => arena.extend_from_slice(level),
          None => arena.extend(std::iter::repeat(self.init_data).take(n)),
        }
        off
      };

    for scale in (new_alloc_scale..=BLOCK_MAX_SCALE).rev() {
      let s = scale as usize;
      let n = num_voxels_at_scale(scale);
      if scale > new_alloc_scale {
        // Interior level: three separate segments. A level that used to be
        // the aliased finest seeds its min/max from the mean content.
        mean_off[s] = Some(push_level(&mut arena, self.mean_level(scale), n));
        min_off[s] = Some(push_level(
          &mut arena,
          self.min_level(scale).or(self.mean_level(scale)),
          n,
        ));
        max_off[s] = Some(push_level(
          &mut arena,
          self.max_level(scale).or(self.mean_level(scale)),
          n,
        ));
      } else {
        // Finest level: one segment shared by all three pyramids.
        let off = push_level(&mut arena, self.mean_level(scale), n);
        mean_off[s] = Some(off);
        min_off[s] = Some(off);
        max_off[s] = Some(off);
      }
    }

    self.arena = arena;
    self.mean_off = mean_off;
    self.min_off = min_off;
    self.max_off = max_off;
    self.alloc_scale = new_alloc_scale;
  }

  /// Grow the pyramid so that `new_scale` is allocated (and aliased).
  pub fn allocate_down_to(&mut self, new_scale: i32) {
    let new_scale = new_scale.clamp(0, BLOCK_MAX_SCALE);
    if new_scale >= self.alloc_scale {
      return;
    }
    self.rebuild(new_scale);
  }

  /// Collapse the pyramid back up to `new_scale`, which becomes the aliased
  /// finest level; its previous separate min/max content is discarded in
  /// favour of the mean data.
  pub fn delete_up_to(&mut self, new_scale: i32) {
    let new_scale = new_scale.clamp(0, BLOCK_MAX_SCALE);
    if new_scale <= self.alloc_scale {
      return;
    }
    self.rebuild(new_scale);
  }

  // ---------------------------------------------------------------------------
  // Double-buffered scale switch
  // ---------------------------------------------------------------------------

  /// Begin (or restart) a pending switch toward `buffer_scale`.
  pub fn init_buffer(&mut self, buffer_scale: i32) {
    self.switch = ScaleSwitch::Pending(PendingSwitch::new(buffer_scale));
  }

  /// Buffer integration-count bump: counts when the block projected fully
  /// into the image, or once the buffer already covers most of the current
  /// observed volume.
  pub fn incr_buffer_integr(&mut self, projects_inside: bool) {
    let curr_volume = self.curr_observed_volume();
    if let Some(pending) = self.switch.pending_mut() {
      if projects_inside
        || pending.observed_volume() >= super::block::SWITCH_OBSERVED_FRACTION * curr_volume
      {
        pending.integr_count += 1;
      }
    }
  }

  /// Commit the pending switch when its thresholds are met.
  ///
  /// Returns true if the block switched; the buffer is released and the
  /// per-scale counters are reset either way only on a commit.
  pub fn try_switch(&mut self) -> bool {
    let curr_volume = self.curr_observed_volume();
    let ready = self
      .switch
      .pending()
      .is_some_and(|p| p.ready(curr_volume));
    if !ready {
      return false;
    }
    let ScaleSwitch::Pending(mut pending) = std::mem::take(&mut self.switch) else {
      return false;
    };

    // Voxels carrying seeded weight but no direct buffer measurement become
    // observed as part of the commit.
    for data in &mut pending.data {
      if data.weight > 0 && !data.observed {
        data.observed = true;
        pending.observed_count += 1;
      }
    }

    if pending.scale < self.current_scale {
      self.allocate_down_to(pending.scale);
      let level = self
        .mean_level_mut(pending.scale)
        .expect("level allocated above");
      level.copy_from_slice(&pending.data);
    } else {
      let level = self
        .mean_level_mut(pending.scale)
        .expect("coarser levels are always allocated");
      level.copy_from_slice(&pending.data);
      self.delete_up_to(pending.scale);
    }

    self.current_scale = pending.scale;
    self.min_scale = pending.scale;
    self.curr_integr_count = pending.integr_count;
    self.curr_observed_count = pending.observed_count;
    true
  }
}

impl BlockStorage for MultiResOccBlock {
  type Data = OccupancyData;

  fn new(coord: IVec3, parent: NodeId, init: OccupancyData) -> Self {
    let mut block = Self {
      coord,
      parent,
      timestamp: 0,
      arena: Vec::new(),
      mean_off: [None; NUM_SCALES],
      min_off: [None; NUM_SCALES],
      max_off: [None; NUM_SCALES],
      init_data: init,
      current_scale: BLOCK_MAX_SCALE,
      min_scale: -1,
      alloc_scale: BLOCK_MAX_SCALE,
      switch: ScaleSwitch::Stable,
      curr_integr_count: 0,
      curr_observed_count: 0,
    };
    block.rebuild(BLOCK_MAX_SCALE);
    block
  }

  fn reset(&mut self, coord: IVec3, parent: NodeId, init: OccupancyData) {
    *self = Self::new(coord, parent, init);
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

  fn data_at_scale(&self, voxel: IVec3, scale: i32) -> OccupancyData {
    let scale = scale.max(self.current_scale).min(BLOCK_MAX_SCALE);
    self.data_at_scale_exact(voxel, scale)
  }
}

#[cfg(test)]
#[path = "occ_block_test.rs"]
mod occ_block_test;
