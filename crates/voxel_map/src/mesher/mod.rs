//! Isosurface extraction.
//!
//! Single-resolution maps run primal marching cubes over every leaf
//! block's voxel lattice. Multi-resolution maps run a dual variant on the
//! lattice of block corners: each dual cell's corners are the sample
//! centres of the (possibly different-scale) neighbouring blocks, and a
//! priority table over the 26 boundary cases decides which block emits a
//! shared cell, so T-junctions between scales are meshed exactly once.

pub mod mc_tables;

use glam::{IVec3, Vec3};
use rayon::prelude::*;
use smallvec::SmallVec;

use crate::data::VoxelData;
use crate::map::VoxelMap;
use crate::octree::block::BlockStorage;
use crate::octree::octant::BLOCK_SIZE;
use crate::octree::{BlockId, Octree, OctantRef};
use crate::sampling;
use mc_tables::{CORNER_OFFSETS, EDGE_CORNERS, TRI_TABLE};

/// One output triangle, vertices in voxel coordinates, with the scale of
/// the cell that produced it.
#[derive(Clone, Copy, Debug)]
pub struct Triangle {
  pub vertices: [Vec3; 3],
  pub scale: i8,
}

pub type SurfaceMesh = Vec<Triangle>;

// =============================================================================
// Primal marching cubes
// =============================================================================

fn gather_primal<B: BlockStorage>(octree: &Octree<B>, cell: IVec3) -> Option<([f32; 8], u8)> {
  let mut values = [0.0f32; 8];
  let mut config = 0u8;
  for (i, offset) in CORNER_OFFSETS.iter().enumerate() {
    let voxel = cell + IVec3::from_array(*offset);
    let data = sampling::data_at(octree, voxel);
    if !data.is_valid() {
      return None;
    }
    values[i] = data.field();
    if data.is_inside() {
      config |= 1 << i;
    }
  }
  Some((values, config))
}

/// Position of the isosurface crossing along cell edge `edge`, by linear
/// interpolation between the corner sample centres.
fn interp_vertex(cell: IVec3, edge: usize, values: &[f32; 8], boundary: f32) -> Vec3 {
  let [c0, c1] = EDGE_CORNERS[edge];
  let p0 = (cell + IVec3::from_array(CORNER_OFFSETS[c0])).as_vec3() + Vec3::splat(0.5);
  let p1 = (cell + IVec3::from_array(CORNER_OFFSETS[c1])).as_vec3() + Vec3::splat(0.5);
  let (v0, v1) = (values[c0], values[c1]);
  p0 + (boundary - v0) * (p1 - p0) / (v1 - v0)
}

fn vertex_outside(vertex: Vec3, size: f32) -> bool {
  vertex.min_element() <= 0.0 || vertex.max_element() > size
}

/// Primal marching cubes over every leaf block, at the finest scale.
pub fn marching_cubes<B: BlockStorage>(octree: &Octree<B>) -> SurfaceMesh {
  let boundary = B::Data::SURFACE_BOUNDARY;
  let size = octree.size();
  let blocks: Vec<BlockId> = octree.iter_blocks().filter_map(OctantRef::as_block).collect();

  blocks
    .par_iter()
    .map(|&id| {
      let mut triangles = SurfaceMesh::new();
      let start = octree.block(id).coord();
      let last = (start + IVec3::splat(BLOCK_SIZE)).min(IVec3::splat(size - 1));
      for x in start.x..last.x {
        for y in start.y..last.y {
          for z in start.z..last.z {
            let cell = IVec3::new(x, y, z);
            let Some((values, config)) = gather_primal(octree, cell) else {
              continue;
            };
            emit_cell(
              &mut triangles,
              config,
              |edge| interp_vertex(cell, edge, &values, boundary),
              0,
              size as f32,
            );
          }
        }
      }
      triangles
    })
    .reduce(SurfaceMesh::new, |mut a, b| {
      a.extend(b);
      a
    })
}

/// Emit the triangle fan of one cell configuration.
fn emit_cell<F: Fn(usize) -> Vec3>(
  triangles: &mut SurfaceMesh,
  config: u8,
  vertex_at: F,
  scale: i8,
  map_size: f32,
) {
  let edges = &TRI_TABLE[config as usize];
  let mut e = 0;
  while e < 16 && edges[e] != -1 {
    let v0 = vertex_at(edges[e] as usize);
    let v1 = vertex_at(edges[e + 1] as usize);
    let v2 = vertex_at(edges[e + 2] as usize);
    if !(vertex_outside(v0, map_size) || vertex_outside(v1, map_size) || vertex_outside(v2, map_size))
    {
      triangles.push(Triangle {
        vertices: [v0, v1, v2],
        scale,
      });
    }
    e += 3;
  }
}

// =============================================================================
// Dual marching cubes
// =============================================================================

/// Ownership and grouping of a boundary dual cell.
///
/// `lower` / `higher` are representative dual-corner indices of the
/// lower- and higher-priority neighbour blocks; `groups` partitions the
/// eight dual corners by the block that supplies them, group 0 being the
/// block currently iterating. Derived from the 26 binary crossing cases
/// (6 faces, 8 corners, 12 edges).
struct DualNeighbours {
  lower: &'static [usize],
  higher: &'static [usize],
  groups: &'static [&'static [usize]],
}

fn dual_cell_neighbours(crossmask: u8) -> Option<DualNeighbours> {
  let (lower, higher, groups): (
    &'static [usize],
    &'static [usize],
    &'static [&'static [usize]],
  ) = match crossmask {
    // Faces.
    0b000_001 => (&[0], &[], &[&[2, 3, 6, 7], &[0, 1, 4, 5]]),
    0b000_010 => (&[0], &[], &[&[4, 5, 6, 7], &[0, 1, 2, 3]]),
    0b000_100 => (&[0], &[], &[&[1, 2, 5, 6], &[0, 3, 4, 7]]),
    0b001_000 => (&[], &[3], &[&[0, 1, 4, 5], &[2, 3, 6, 7]]),
    0b010_000 => (&[], &[4], &[&[0, 1, 2, 3], &[4, 5, 6, 7]]),
    0b100_000 => (&[], &[1], &[&[0, 3, 4, 7], &[1, 2, 5, 6]]),
    // Corners.
    0b000_111 => (
      &[0, 1, 2, 3, 4, 5, 7],
      &[],
      &[&[6], &[0], &[1], &[2], &[3], &[4], &[5], &[7]],
    ),
    0b001_110 => (
      &[0, 1, 2, 3, 4, 7],
      &[6],
      &[&[5], &[0], &[1], &[2], &[3], &[4], &[6], &[7]],
    ),
    0b010_101 => (
      &[0, 1, 3, 4, 7],
      &[5, 6],
      &[&[2], &[0], &[1], &[3], &[4], &[5], &[6], &[7]],
    ),
    0b011_100 => (
      &[0, 3, 4, 7],
      &[2, 5, 6],
      &[&[1], &[0], &[2], &[3], &[4], &[5], &[6], &[7]],
    ),
    0b100_011 => (
      &[0, 3, 4],
      &[1, 2, 5, 6],
      &[&[7], &[0], &[1], &[2], &[3], &[4], &[5], &[6]],
    ),
    0b101_010 => (
      &[0, 3],
      &[1, 2, 5, 6, 7],
      &[&[4], &[0], &[1], &[2], &[3], &[5], &[6], &[7]],
    ),
    0b110_001 => (
      &[0],
      &[1, 2, 4, 5, 6, 7],
      &[&[3], &[0], &[1], &[2], &[4], &[5], &[6], &[7]],
    ),
    0b111_000 => (
      &[],
      &[1, 2, 3, 4, 5, 6, 7],
      &[&[0], &[1], &[2], &[3], &[4], &[5], &[6], &[7]],
    ),
    // Edges.
    0b000_011 => (&[0, 3, 4], &[], &[&[6, 7], &[0, 1], &[2, 3], &[4, 5]]),
    0b000_101 => (&[0, 1, 3], &[], &[&[2, 6], &[0, 4], &[3, 7], &[1, 5]]),
    0b000_110 => (&[0, 1, 4], &[], &[&[5, 6], &[0, 3], &[4, 7], &[1, 2]]),
    0b001_010 => (&[0, 3], &[7], &[&[4, 5], &[0, 1], &[2, 3], &[6, 7]]),
    0b001_100 => (&[0, 3], &[2], &[&[1, 5], &[0, 4], &[3, 7], &[2, 6]]),
    0b010_001 => (&[0], &[4, 7], &[&[2, 3], &[0, 1], &[4, 5], &[6, 7]]),
    0b010_100 => (&[0, 4], &[5], &[&[1, 2], &[0, 3], &[4, 7], &[5, 6]]),
    0b011_000 => (&[], &[3, 4, 7], &[&[0, 1], &[2, 3], &[4, 5], &[6, 7]]),
    0b100_001 => (&[0], &[1, 2], &[&[3, 7], &[0, 4], &[1, 5], &[2, 6]]),
    0b100_010 => (&[0], &[1, 5], &[&[4, 7], &[0, 3], &[1, 2], &[5, 6]]),
    0b101_000 => (&[], &[1, 2, 3], &[&[0, 4], &[3, 7], &[1, 5], &[2, 6]]),
    0b110_000 => (&[], &[1, 4, 5], &[&[0, 3], &[4, 7], &[1, 2], &[5, 6]]),
    _ => return None,
  };
  Some(DualNeighbours {
    lower,
    higher,
    groups,
  })
}

/// Voxel offset (sign vector) of dual corner `c` from a primal corner.
#[inline]
fn dual_offset(c: usize) -> IVec3 {
  IVec3::from_array(CORNER_OFFSETS[c]) * 2 - IVec3::ONE
}

/// Snap a voxel coordinate to the sample centre of its scale-voxel.
#[inline]
fn sample_centre(voxel: IVec3, scale: i32) -> Vec3 {
  let stride = 1 << scale;
  ((voxel >> scale) << scale).as_vec3() + Vec3::splat(stride as f32 / 2.0)
}

struct DualCell<D> {
  data: [D; 8],
  coords: [Vec3; 8],
}

/// Gather one dual cell around `primal`, resolving ownership at block
/// boundaries. Returns `None` when another block owns the cell or when any
/// contributing region is missing.
fn gather_dual<B: BlockStorage>(
  octree: &Octree<B>,
  block_id: BlockId,
  primal: IVec3,
) -> Option<DualCell<B::Data>> {
  let block = octree.block(block_id);
  let scale = block.current_scale();
  let rel = primal - block.coord();
  let crossmask = (((rel.x == BLOCK_SIZE) as u8) << 5)
    | (((rel.y == BLOCK_SIZE) as u8) << 4)
    | (((rel.z == BLOCK_SIZE) as u8) << 3)
    | (((rel.x == 0) as u8) << 2)
    | (((rel.y == 0) as u8) << 1)
    | ((rel.z == 0) as u8);

  let mut cell = DualCell {
    data: [B::Data::default(); 8],
    coords: [Vec3::ZERO; 8],
  };

  if crossmask == 0 {
    for c in 0..8 {
      let voxel = primal + dual_offset(c);
      cell.coords[c] = sample_centre(voxel, scale);
      cell.data[c] = block.data_at(cell.coords[c].as_ivec3());
    }
    return Some(cell);
  }

  let neighbours = dual_cell_neighbours(crossmask)?;

  // Ownership: a lower-priority neighbour takes the cell when it is at our
  // scale or finer; a higher-priority one only when strictly finer.
  for &c in neighbours.lower {
    let voxel = primal + dual_offset(c);
    if !octree.contains(voxel) {
      return None;
    }
    let other = octree.find_block(voxel)?;
    if octree.block(other).current_scale() <= scale && other != block_id {
      return None;
    }
  }
  for &c in neighbours.higher {
    let voxel = primal + dual_offset(c);
    if !octree.contains(voxel) {
      return None;
    }
    let other = octree.find_block(voxel)?;
    if octree.block(other).current_scale() < scale {
      return None;
    }
  }

  // Group 0 reads from this block; every other group from the block its
  // first member lands in.
  let mut groups: SmallVec<[(BlockId, &[usize]); 8]> = SmallVec::new();
  groups.push((block_id, neighbours.groups[0]));
  for group in &neighbours.groups[1..] {
    let voxel = primal + dual_offset(group[0]);
    let other = octree.find_block(voxel)?;
    groups.push((other, group));
  }

  for (owner, members) in groups {
    let owner_block = octree.block(owner);
    let owner_scale = owner_block.current_scale();
    for &c in members {
      let voxel = primal + dual_offset(c);
      cell.coords[c] = sample_centre(voxel, owner_scale);
      cell.data[c] = owner_block.data_at(cell.coords[c].as_ivec3());
    }
  }
  Some(cell)
}

/// Dual marching cubes over every leaf block at its current scale.
pub fn dual_marching_cubes<B: BlockStorage>(octree: &Octree<B>) -> SurfaceMesh {
  let boundary = B::Data::SURFACE_BOUNDARY;
  let size = octree.size();
  let blocks: Vec<BlockId> = octree.iter_blocks().filter_map(OctantRef::as_block).collect();

  blocks
    .par_iter()
    .map(|&id| {
      let mut triangles = SurfaceMesh::new();
      let block = octree.block(id);
      let scale = block.current_scale();
      let stride = 1 << scale;
      let start = block.coord();

      let mut rel_z = 0;
      while rel_z <= BLOCK_SIZE {
        let mut rel_y = 0;
        while rel_y <= BLOCK_SIZE {
          let mut rel_x = 0;
          while rel_x <= BLOCK_SIZE {
            let primal = start + IVec3::new(rel_x, rel_y, rel_z);
            if primal.cmpge(IVec3::splat(size)).any() || primal.cmple(IVec3::ZERO).any() {
              rel_x += stride;
              continue;
            }
            let Some(cell) = gather_dual(octree, id, primal) else {
              rel_x += stride;
              continue;
            };

            let mut config = 0u8;
            let mut all_valid = true;
            for (c, data) in cell.data.iter().enumerate() {
              if !data.is_valid() {
                all_valid = false;
                break;
              }
              if data.is_inside() {
                config |= 1 << c;
              }
            }
            if all_valid {
              emit_cell(
                &mut triangles,
                config,
                |edge| {
                  let [c0, c1] = EDGE_CORNERS[edge];
                  let (v0, v1) = (cell.data[c0].field(), cell.data[c1].field());
                  cell.coords[c0]
                    + (boundary - v0) * (cell.coords[c1] - cell.coords[c0]) / (v1 - v0)
                },
                scale as i8,
                size as f32,
              );
            }
            rel_x += stride;
          }
          rel_y += stride;
        }
        rel_z += stride;
      }
      triangles
    })
    .reduce(SurfaceMesh::new, |mut a, b| {
      a.extend(b);
      a
    })
}

// =============================================================================
// Structure export
// =============================================================================

/// One axis-aligned cube (12 triangles) per octant, for structure
/// inspection. `only_leaves` restricts the output to leaf octants.
pub fn octree_structure<B: BlockStorage>(octree: &Octree<B>, only_leaves: bool) -> SurfaceMesh {
  let mut triangles = SurfaceMesh::new();
  let octants: Vec<OctantRef> = if only_leaves {
    octree.iter_leaves().collect()
  } else {
    octree.iter().collect()
  };
  for octant in octants {
    let lo = octree.coord_of(octant).as_vec3();
    let size = octree.size_of(octant);
    let hi = lo + Vec3::splat(size as f32);
    let scale = crate::octree::octant::size_to_scale(size) as i8;
    let corner = |mask: usize| {
      Vec3::new(
        if mask & 4 != 0 { hi.x } else { lo.x },
        if mask & 2 != 0 { hi.y } else { lo.y },
        if mask & 1 != 0 { hi.z } else { lo.z },
      )
    };
    // Two triangles per face.
    const FACES: [[usize; 4]; 6] = [
      [0, 1, 3, 2],
      [4, 6, 7, 5],
      [0, 4, 5, 1],
      [2, 3, 7, 6],
      [0, 2, 6, 4],
      [1, 5, 7, 3],
    ];
    for face in FACES {
      triangles.push(Triangle {
        vertices: [corner(face[0]), corner(face[1]), corner(face[2])],
        scale,
      });
      triangles.push(Triangle {
        vertices: [corner(face[0]), corner(face[2]), corner(face[3])],
        scale,
      });
    }
  }
  triangles
}

// =============================================================================
// Map-level wrappers
// =============================================================================

impl<B: BlockStorage> VoxelMap<B> {
  /// Extract the isosurface in world coordinates: primal marching cubes at
  /// the finest scale.
  pub fn extract_mesh(&self) -> SurfaceMesh {
    self.to_world(marching_cubes(self.octree()))
  }

  /// Extract the isosurface in world coordinates with the dual variant,
  /// respecting each block's current scale.
  pub fn extract_mesh_dual(&self) -> SurfaceMesh {
    self.to_world(dual_marching_cubes(self.octree()))
  }

  /// Octant-structure cubes in world coordinates.
  pub fn extract_structure(&self, only_leaves: bool) -> SurfaceMesh {
    self.to_world(octree_structure(self.octree(), only_leaves))
  }

  fn to_world(&self, mut mesh: SurfaceMesh) -> SurfaceMesh {
    let origin = self.config().origin;
    let res = self.res();
    for triangle in &mut mesh {
      for vertex in &mut triangle.vertices {
        *vertex = origin + *vertex * res;
      }
    }
    mesh
  }
}

#[cfg(test)]
#[path = "mesher_test.rs"]
mod mesher_test;
