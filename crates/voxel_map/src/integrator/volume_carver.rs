//! Volume carving: the occupancy allocator.
//!
//! Descends the tree from the root, classifying each octant against the
//! depth image's pooled min/max footprint, and produces the frame's work
//! lists: childless nodes to bulk-free, blocks to update (with variance
//! state and projects-inside flags) and blocks to free.
//!
//! Carving allocates, so it runs entirely in the allocation phase; the
//! updater only ever writes into octants listed here.

use glam::{IVec3, Vec3};
use voxel_sensor::{Image, ProjectionStatus, SensorModel};

use super::pooling::DepthPooling;
use crate::config::MapConfig;
use crate::error::MapError;
use crate::octree::octant::{child_offset, BLOCK_SIZE};
use crate::octree::{BlockId, MultiResOccBlock, NodeId, Octree, OctantRef};

/// Depth variability of a block's footprint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarianceState {
  /// The whole footprint is confidently on the free side; the block takes
  /// projected free updates.
  Constant,
  /// The footprint spans the surface band; the block needs per-voxel
  /// measurement fusion.
  Gradient,
}

/// Output of a carving pass.
#[derive(Default)]
pub struct CarverAllocation {
  /// Childless nodes whose data takes a bulk free write.
  pub node_list: Vec<NodeId>,
  /// Blocks to update, parallel to `variance_state` and `projects_inside`.
  pub block_list: Vec<BlockId>,
  pub variance_state: Vec<VarianceState>,
  pub projects_inside: Vec<bool>,
  /// Blocks whose entire volume was carved free.
  pub freed_blocks: Vec<BlockId>,
}

enum Class {
  Skip,
  Free,
  Band {
    variance: VarianceState,
    projects_inside: bool,
  },
}

pub fn volume_carve<S: SensorModel>(
  octree: &mut Octree<MultiResOccBlock>,
  config: &MapConfig,
  sensor: &S,
  depth: &Image<f32>,
  t_ws: glam::Affine3A,
) -> Result<CarverAllocation, MapError> {
  let pooling = DepthPooling::new(depth, sensor.near_plane());
  let root = octree.root();
  let mut carver = Carver {
    octree,
    config,
    sensor,
    pooling,
    t_sw: t_ws.inverse(),
    alloc: CarverAllocation::default(),
  };
  carver.carve_node(root)?;
  Ok(carver.alloc)
}

struct Carver<'a, S: SensorModel> {
  octree: &'a mut Octree<MultiResOccBlock>,
  config: &'a MapConfig,
  sensor: &'a S,
  pooling: DepthPooling,
  t_sw: glam::Affine3A,
  alloc: CarverAllocation,
}

impl<'a, S: SensorModel> Carver<'a, S> {
  fn carve_node(&mut self, node_id: NodeId) -> Result<(), MapError> {
    let (coord, size) = {
      let node = self.octree.node(node_id);
      (node.coord, node.size)
    };
    let child_size = size / 2;

    for slot in 0..8 {
      let child_coord = coord + child_offset(slot) * child_size;
      match self.classify(child_coord, child_size) {
        Class::Skip => {}
        Class::Free => self.free_octant(node_id, slot)?,
        Class::Band {
          variance,
          projects_inside,
        } => {
          if child_size == BLOCK_SIZE {
            let (child, _) = self.octree.allocate(node_id, slot)?;
            let id = child.as_block().expect("children of 2B nodes are blocks");
            self.alloc.block_list.push(id);
            self.alloc.variance_state.push(variance);
            self.alloc.projects_inside.push(projects_inside);
          } else {
            let (child, _) = self.octree.allocate(node_id, slot)?;
            self.carve_node(child.as_node().expect("interior octant"))?;
          }
        }
      }
    }
    Ok(())
  }

  /// A fully free octant is freed at the coarsest valid level: at its node
  /// when childless, at its block, or by descending through an existing
  /// subtree so no detail below survives unexamined.
  fn free_octant(&mut self, parent: NodeId, slot: usize) -> Result<(), MapError> {
    match self.octree.node(parent).child(slot) {
      None => {
        let (child, _) = self.octree.allocate(parent, slot)?;
        match child {
          OctantRef::Node(id) => self.alloc.node_list.push(id),
          OctantRef::Block(id) => self.alloc.freed_blocks.push(id),
        }
      }
      Some(OctantRef::Node(id)) => {
        if self.octree.node(id).is_leaf() {
          self.alloc.node_list.push(id);
        } else {
          self.carve_node(id)?;
        }
      }
      Some(OctantRef::Block(id)) => self.alloc.freed_blocks.push(id),
    }
    Ok(())
  }

  fn classify(&self, coord: IVec3, size: i32) -> Class {
    let centre_w =
      self.config.origin + (coord.as_vec3() + Vec3::splat(size as f32 / 2.0)) * self.config.res;
    let centre_s = self.t_sw.transform_point3(centre_w);
    let radius = 3.0f32.sqrt() / 2.0 * size as f32 * self.config.res;

    if !self.sensor.sphere_in_frustum(centre_s, radius) {
      return Class::Skip;
    }

    // Pixel footprint from the eight corners.
    let mut px_min = f32::INFINITY;
    let mut px_max = f32::NEG_INFINITY;
    let mut py_min = f32::INFINITY;
    let mut py_max = f32::NEG_INFINITY;
    let mut inside = 0;
    let mut behind = 0;
    for idx in 0..8 {
      let corner_w = self.config.origin
        + (coord + child_offset(idx) * size).as_vec3() * self.config.res;
      let corner_s = self.t_sw.transform_point3(corner_w);
      let (pixel, status) = self.sensor.project(corner_s);
      match status {
        ProjectionStatus::Behind => behind += 1,
        _ => {
          px_min = px_min.min(pixel.x);
          px_max = px_max.max(pixel.x);
          py_min = py_min.min(pixel.y);
          py_max = py_max.max(pixel.y);
          if status == ProjectionStatus::Ok {
            inside += 1;
          }
        }
      }
    }
    if behind == 8 {
      return Class::Skip;
    }
    if behind > 0 {
      // Footprint unbounded: descend, and leave a partially-behind block
      // to per-voxel projection checks.
      return Class::Band {
        variance: VarianceState::Gradient,
        projects_inside: false,
      };
    }
    let projects_inside = inside == 8;

    let range = self.pooling.query(
      px_min.floor() as i32,
      py_min.floor() as i32,
      px_max.ceil() as i32,
      py_max.ceil() as i32,
    );
    if range.is_empty() {
      return Class::Skip;
    }

    let centre_m = self.sensor.measurement_from_point(centre_s);
    let dist_min = (centre_m - radius).max(0.0);
    let dist_max = centre_m + radius;
    if dist_min > self.sensor.far_plane() || dist_max < self.sensor.near_plane() {
      return Class::Skip;
    }

    let tau = self.config.tau(range.max);
    let three_sigma = self.config.three_sigma(range.max);

    if range.min - dist_max > three_sigma {
      // Entirely on the free side of every measured surface.
      return if projects_inside {
        Class::Free
      } else if size == BLOCK_SIZE {
        Class::Band {
          variance: VarianceState::Constant,
          projects_inside,
        }
      } else {
        Class::Band {
          variance: VarianceState::Gradient,
          projects_inside,
        }
      };
    }
    if dist_min - range.max > tau {
      // Entirely occluded beyond the surface band.
      return Class::Skip;
    }
    Class::Band {
      variance: VarianceState::Gradient,
      projects_inside,
    }
  }
}

#[cfg(test)]
#[path = "volume_carver_test.rs"]
mod volume_carver_test;
