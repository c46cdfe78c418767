use glam::{IVec3, Vec3};

use super::*;
use crate::config::MapConfig;
use crate::data::OccupancyData;
use crate::map::{OccupancyMap, TsdfMap};

/// Fill a single-res TSDF map with a synthetic sphere SDF.
fn sphere_map(radius: f32) -> TsdfMap {
  let config = MapConfig::new(0.02, 128).with_origin(Vec3::splat(-1.28));
  let truncation = config.truncation_boundary();
  let mut map = TsdfMap::new(config).unwrap();
  let size = map.octree().size();

  // Allocate every block intersecting the truncation shell and write the
  // analytic field.
  for bx in (0..size).step_by(8) {
    for by in (0..size).step_by(8) {
      for bz in (0..size).step_by(8) {
        let corner = IVec3::new(bx, by, bz);
        let centre = map.octant_centre(corner, 8);
        let block_radius = 3.0f32.sqrt() / 2.0 * 8.0 * map.res();
        if (centre.length() - radius).abs() > truncation + block_radius {
          continue;
        }
        let (id, _) = map.octree_mut().allocate_block_at(corner).unwrap();
        let origin = map.config().origin;
        let res = map.res();
        let block = map.octree_mut().block_mut(id);
        for x in 0..8 {
          for y in 0..8 {
            for z in 0..8 {
              let voxel = corner + IVec3::new(x, y, z);
              let point = origin + (voxel.as_vec3() + 0.5) * res;
              let sdf = point.length() - radius;
              let data = block.data_mut(voxel);
              data.tsdf = (sdf / truncation).clamp(-1.0, 1.0);
              data.weight = 1;
            }
          }
        }
      }
    }
  }
  map
}

#[test]
fn test_sphere_mesh_lies_on_the_sphere() {
  let radius = 0.4;
  let map = sphere_map(radius);
  let mesh = map.extract_mesh();
  assert!(!mesh.is_empty(), "sphere surface must produce triangles");

  let res = map.res();
  for triangle in &mesh {
    let centroid =
      (triangle.vertices[0] + triangle.vertices[1] + triangle.vertices[2]) / 3.0;
    assert!(
      (centroid.length() - radius).abs() <= res,
      "centroid {} off the sphere of radius {radius}",
      centroid.length()
    );
  }
}

#[test]
fn test_sphere_triangle_count_scales_with_area() {
  let radius = 0.4;
  let map = sphere_map(radius);
  let mesh = map.extract_mesh();
  let res = map.res();
  // O(surface_area / res^2) with a generous constant.
  let cells = (4.0 * std::f32::consts::PI * radius * radius) / (res * res);
  assert!(
    (mesh.len() as f32) < 8.0 * cells,
    "{} triangles for ~{cells} surface cells",
    mesh.len()
  );
  assert!((mesh.len() as f32) > 0.5 * cells);
}

#[test]
fn test_unobserved_cells_emit_nothing() {
  let config = MapConfig::new(0.02, 64);
  let mut map = TsdfMap::new(config).unwrap();
  // One block with default (unobserved) voxels.
  map.octree_mut().allocate_block_at(IVec3::new(8, 8, 8)).unwrap();
  assert!(map.extract_mesh().is_empty());
}

// -----------------------------------------------------------------------------
// Dual marching cubes
// -----------------------------------------------------------------------------

fn occ_voxel(occupancy: f32) -> OccupancyData {
  OccupancyData {
    occupancy,
    weight: 5,
    observed: true,
    ..OccupancyData::default()
  }
}

/// Occupancy map with a z = `plane_z` (voxel units) horizontal surface:
/// occupied below, free above.
fn occupancy_plane_map(block_scales: &[(IVec3, i32)], plane_z: f32) -> OccupancyMap {
  let config = MapConfig::new(0.05, 64);
  let mut map = OccupancyMap::new(config).unwrap();
  for &(corner, scale) in block_scales {
    let (id, _) = map.octree_mut().allocate_block_at(corner).unwrap();
    let block = map.octree_mut().block_mut(id);
    block.allocate_down_to(scale);
    block.current_scale = scale;
    block.min_scale = scale;
    let stride = 1 << scale;
    let n = crate::octree::octant::size_at_scale(scale);
    for z in 0..n {
      for y in 0..n {
        for x in 0..n {
          let voxel = corner + IVec3::new(x, y, z) * stride;
          let centre_z = voxel.z as f32 + stride as f32 / 2.0;
          let idx = block.mean_idx(voxel, scale).unwrap();
          *block.voxel_mut(idx) = occ_voxel(if centre_z < plane_z { 2.0 } else { -2.0 });
        }
      }
    }
    crate::octree::propagator::occ_block_up(block);
  }
  map
}

#[test]
fn test_dual_mesh_of_uniform_plane() {
  // A 2x2x2 arrangement of scale-0 blocks with a plane at z = 8.
  let mut layout = Vec::new();
  for bx in 0..2 {
    for by in 0..2 {
      for bz in 0..2 {
        layout.push((IVec3::new(bx * 8, by * 8, bz * 8), 0));
      }
    }
  }
  let map = occupancy_plane_map(&layout, 8.0);
  let mesh = map.extract_mesh_dual();
  assert!(!mesh.is_empty());

  let origin_z = map.config().origin.z;
  let res = map.res();
  for triangle in &mesh {
    for vertex in triangle.vertices {
      let z_voxels = (vertex.z - origin_z) / res;
      assert!(
        (z_voxels - 8.0).abs() < 1.5,
        "dual vertex at z = {z_voxels} voxels, expected the plane at 8"
      );
    }
  }
}

#[test]
fn test_dual_mesh_handles_t_junctions() {
  // A coarse block next to a fine block across the plane: the seam cells
  // must be emitted exactly once and stay near the surface.
  let layout = [
    (IVec3::new(0, 0, 0), 0),
    (IVec3::new(8, 0, 0), 1),
    (IVec3::new(0, 8, 0), 0),
    (IVec3::new(8, 8, 0), 1),
    (IVec3::new(0, 0, 8), 0),
    (IVec3::new(8, 0, 8), 1),
    (IVec3::new(0, 8, 8), 0),
    (IVec3::new(8, 8, 8), 1),
  ];
  let map = occupancy_plane_map(&layout, 8.0);
  let mesh = map.extract_mesh_dual();
  assert!(!mesh.is_empty());

  let origin_z = map.config().origin.z;
  let res = map.res();
  for triangle in &mesh {
    assert!(triangle.scale == 0 || triangle.scale == 1);
    for vertex in triangle.vertices {
      let z_voxels = (vertex.z - origin_z) / res;
      assert!((z_voxels - 8.0).abs() < 2.5, "seam vertex at z = {z_voxels}");
    }
  }
}

#[test]
fn test_dual_mesh_scale_tags_follow_blocks() {
  let layout = [(IVec3::new(0, 0, 0), 1)];
  let map = occupancy_plane_map(&layout, 4.0);
  let mesh = map.extract_mesh_dual();
  assert!(!mesh.is_empty());
  assert!(mesh.iter().all(|t| t.scale == 1));
}

// -----------------------------------------------------------------------------
// Structure export
// -----------------------------------------------------------------------------

#[test]
fn test_structure_mesh_counts_octants() {
  let config = MapConfig::new(0.02, 64);
  let mut map = TsdfMap::new(config).unwrap();
  map.octree_mut().allocate_block_at(IVec3::ZERO).unwrap();

  let all = map.extract_structure(false);
  assert_eq!(all.len(), map.octree().octant_count() * 12);

  let leaves = map.extract_structure(true);
  let leaf_count = map.octree().iter_leaves().count();
  assert_eq!(leaves.len(), leaf_count * 12);
}

