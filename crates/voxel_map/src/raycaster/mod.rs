//! Surface queries by ray-casting.
//!
//! The occupancy caster skips free space over the coarse `max_data`
//! summaries before switching to a fine surface search; the TSDF caster
//! enumerates allocated blocks along the ray and steps adaptively inside
//! the truncation band. Both return `None` ("no hit") on every bail-out
//! path — a gap of unobserved voxels never produces a fake surface point.

pub mod block_ray_iter;

use glam::{Affine3A, Vec3};
use rayon::prelude::*;
use voxel_sensor::{Image, SensorModel};

use crate::data::{Rgba, VoxelData};
use crate::map::{OccupancyMap, TsdfMap, TsdfMultiMap, VoxelMap};
use crate::octree::block::BlockStorage;
use crate::octree::octant::BLOCK_SIZE;
use crate::sampling;
use block_ray_iter::{clip_to_cube, BlockRayIterator};

/// Sentinel for pixels without a usable surface normal.
pub const INVALID_NORMAL: Vec3 = Vec3::INFINITY;

/// Whether a normal is the invalid sentinel (or otherwise unusable).
#[inline]
pub fn is_invalid_normal(normal: Vec3) -> bool {
  !normal.is_finite() || normal == Vec3::ZERO
}

/// Occupancy value below which a summary counts as confidently free during
/// empty-space skipping.
const FREE_SKIP_THRESHOLD: f32 = -0.2;

/// Coarsest scale used for empty-space skipping.
const MAX_SKIP_SCALE: i32 = 7;

/// Finest scale the skipping loop refines to before handing over to the
/// fine surface search.
const MIN_SKIP_SCALE: i32 = 2;

// =============================================================================
// Occupancy ray-cast
// =============================================================================

/// Advance `t` until the ray reaches a region whose max summary is no
/// longer confidently free. Returns false when the ray exhausts the map.
fn advance_ray(
  map: &OccupancyMap,
  ray_origin_w: Vec3,
  ray_dir_w: Vec3,
  t: &mut f32,
  t_far: &mut f32,
  max_scale: i32,
) -> bool {
  let res = map.res();
  let octree = map.octree();
  let origin_vox = map.point_to_voxel_f(ray_origin_w);

  let v = *t / res;
  let mut v_far = *t_far / res;

  // Clip against the map cube.
  let (_, clip_max) = clip_to_cube(origin_vox, ray_dir_w, octree.size() as f32);
  v_far = v_far.min(clip_max);
  *t_far = v_far * res;

  let mut scale = max_scale;
  let mut v_add = 0.0f32;
  let mut ray_coord = origin_vox + ray_dir_w * v;

  let sample = |coord: Vec3, scale: i32| -> f32 {
    let voxel = coord.floor().as_ivec3();
    if !octree.contains(voxel) {
      return 0.0;
    }
    sampling::max_data_at(octree, voxel, scale).field()
  };

  let mut value = sample(ray_coord, scale);
  while value > FREE_SKIP_THRESHOLD && scale > MIN_SKIP_SCALE {
    scale -= 1;
    value = sample(ray_coord, scale);
  }

  while v + v_add < v_far {
    if scale <= MIN_SKIP_SCALE {
      // Hand over slightly behind the boundary so the fine search can see
      // the transition.
      *t = res * (v + v_add - 4.0).max(0.0);
      return true;
    }

    let node_size = (1 << scale) as f32;
    let curr_node = (ray_coord / node_size).floor() * node_size;
    let node_frac = (ray_coord - curr_node) / node_size;

    // Distance in voxels to the node's far face, per axis.
    let mut v_min = f32::INFINITY;
    for axis in 0..3 {
      let dir = ray_dir_w[axis];
      if dir.abs() < 1e-6 {
        continue;
      }
      let delta_v = node_size / dir.abs();
      let frac = if dir < 0.0 {
        node_frac[axis]
      } else {
        1.0 - node_frac[axis]
      };
      v_min = v_min.min(frac * delta_v);
    }
    if !v_min.is_finite() {
      break;
    }

    v_add += v_min + 0.01;
    ray_coord = origin_vox + ray_dir_w * (v + v_add);

    let mut v_sample = sample(ray_coord, scale);
    if v_sample > FREE_SKIP_THRESHOLD {
      while v_sample > FREE_SKIP_THRESHOLD && scale > MIN_SKIP_SCALE {
        scale -= 1;
        v_sample = sample(ray_coord, scale);
      }
    } else {
      // Re-coarsen while the surroundings stay free.
      for s in (scale + 1)..=max_scale {
        let coarse = sample(ray_coord, s);
        if coarse > FREE_SKIP_THRESHOLD {
          break;
        }
        scale = s;
      }
    }
  }

  false
}

/// Step until a point with valid, interpolatable data is found.
fn find_valid_point<B: BlockStorage>(
  map: &VoxelMap<B>,
  ray_origin_w: Vec3,
  ray_dir_w: Vec3,
  step: f32,
  t_far: f32,
  t: &mut f32,
) -> Option<(f32, Vec3)> {
  loop {
    let point = ray_origin_w + ray_dir_w * *t;
    if map.contains_point(point) && map.data(point).is_valid() {
      if let Some((value, _)) = map.field_interp(point) {
        return Some((value, point));
      }
    }
    *t += step;
    if *t > t_far {
      return None;
    }
  }
}

/// Locate the isosurface along a ray through an occupancy map.
///
/// Returns the world-space surface point and the scale the field was
/// interpolated at.
pub fn raycast_occupancy(
  map: &OccupancyMap,
  ray_origin_w: Vec3,
  ray_dir_w: Vec3,
  _t_near: f32,
  t_far: f32,
) -> Option<(Vec3, i32)> {
  use crate::data::OccupancyData;
  let surface_boundary = OccupancyData::SURFACE_BOUNDARY;

  // Clip against the map; a miss from outside is "no hit".
  let origin_vox = map.point_to_voxel_f(ray_origin_w);
  let (clip_min, clip_max) = clip_to_cube(origin_vox, ray_dir_w, map.octree().size() as f32);
  if clip_min > clip_max {
    return None;
  }
  let mut t = (clip_min * map.res()).max(0.0);
  let mut t_far = t_far;

  let max_scale = MAX_SKIP_SCALE.min(map.octree().max_scale() - 1);
  if !advance_ray(map, ray_origin_w, ray_dir_w, &mut t, &mut t_far, max_scale) {
    return None;
  }

  // Fine surface search.
  let step = map.res() / 2.0;
  let (mut value_t, mut point_t) =
    find_valid_point(map, ray_origin_w, ray_dir_w, step, t_far, &mut t)?;
  t += step;

  if value_t > surface_boundary {
    // Already inside the surface at the first valid sample.
    return None;
  }

  let mut crossing: Option<(f32, Vec3, i32)> = None;
  while t < t_far {
    let point = ray_origin_w + ray_dir_w * t;
    let data = map.data(point);
    if !data.is_valid() {
      t += step;
      let (v, p) = find_valid_point(map, ray_origin_w, ray_dir_w, step, t_far, &mut t)?;
      value_t = v;
      point_t = p;
      if value_t > surface_boundary {
        return None;
      }
      t += step;
      continue;
    }

    let mut value_tt = data.field();
    let point_tt = point;
    let mut scale_tt = 0;
    if value_tt > FREE_SKIP_THRESHOLD {
      match map.field_interp(point) {
        Some((v, s)) => {
          value_tt = v;
          scale_tt = s;
        }
        None => {
          t += step;
          let (v, p) = find_valid_point(map, ray_origin_w, ray_dir_w, step, t_far, &mut t)?;
          value_t = v;
          point_t = p;
          if value_t > surface_boundary {
            return None;
          }
          t += step;
          continue;
        }
      }
    }

    if value_tt > surface_boundary {
      if value_t < surface_boundary {
        // Positive crossing: pull t back to the zero point.
        let t_hit = t
          - (point_tt - point_t).length() * (value_tt - surface_boundary)
            / (value_tt - value_t);
        crossing = Some((t_hit, ray_origin_w + ray_dir_w * t_hit, scale_tt));
      }
      break;
    }
    value_t = value_tt;
    point_t = point_tt;
    t += step;
  }

  crossing.map(|(_, point, scale)| (point, scale))
}

// =============================================================================
// TSDF ray-cast
// =============================================================================

/// TSDF band inside which stepping switches from block strides to
/// interpolated fine steps.
const TSDF_FINE_BAND: (f32, f32) = (-0.5, 0.1);

/// Locate the zero crossing along a ray through a TSDF map.
pub fn raycast_tsdf<B>(
  map: &VoxelMap<B>,
  ray_origin_w: Vec3,
  ray_dir_w: Vec3,
  t_near: f32,
  t_far: f32,
) -> Option<(Vec3, i32)>
where
  B: BlockStorage,
{
  let res = map.res();
  let surface_boundary = B::Data::SURFACE_BOUNDARY;
  let truncation_boundary = map.config().truncation_boundary();

  // Enumerate blocks to find where surface data can start.
  let origin_vox = map.point_to_voxel_f(ray_origin_w);
  let mut block_ray = BlockRayIterator::new(
    map.octree(),
    origin_vox,
    ray_dir_w,
    t_near / res,
    t_far / res,
  );
  let (_, t_entry_vox, _) = block_ray.next()?;
  let t_min = t_entry_vox * res;
  if t_min <= 0.0 {
    return None;
  }

  let step = res;
  let large_step = BLOCK_SIZE as f32 * step;

  let mut t = t_min;
  let mut step_size = large_step;
  let mut f_t = map
    .field_interp(ray_origin_w + ray_dir_w * t)
    .map(|(v, _)| v)
    .unwrap_or(1.0);
  let mut hit: Option<(f32, i32)> = None;

  if f_t >= surface_boundary {
    while t < t_far {
      let point = ray_origin_w + ray_dir_w * t;
      let data = map.data(point);
      if !data.is_valid() {
        step_size = large_step;
        t += step_size;
        continue;
      }

      let mut f_tt = data.field();
      let mut scale_tt = 0;
      if (TSDF_FINE_BAND.0..=TSDF_FINE_BAND.1).contains(&f_tt) {
        if let Some((value, scale)) = map.field_interp(point) {
          f_tt = value;
          scale_tt = scale;
        }
      }
      if f_tt < surface_boundary {
        // Zero crossing: refine by linear interpolation between samples.
        let t_hit = t - step_size * (f_tt - surface_boundary) / (f_tt - f_t);
        hit = Some((t_hit, scale_tt));
        break;
      }
      step_size = (f_tt * truncation_boundary).max(step);
      f_t = f_tt;
      t += step_size;
    }
  }

  hit.map(|(t_hit, scale)| (ray_origin_w + ray_dir_w * t_hit, scale))
}

// =============================================================================
// Full-image ray-casting
// =============================================================================

/// Per-pixel surface images produced by [`raycast_volume`] wrappers.
pub struct SurfaceImages {
  pub points: Image<Vec3>,
  pub normals: Image<Vec3>,
  pub scales: Image<i8>,
  pub colours: Image<Rgba>,
}

fn raycast_volume_impl<B, S, F>(
  map: &VoxelMap<B>,
  sensor: &S,
  t_ws: Affine3A,
  raycast: F,
) -> SurfaceImages
where
  B: BlockStorage,
  S: SensorModel,
  F: Fn(Vec3, Vec3, f32, f32) -> Option<(Vec3, i32)> + Sync,
{
  let width = sensor.width();
  let height = sensor.height();
  let origin_w: Vec3 = t_ws.translation.into();

  let pixels: Vec<(Vec3, Vec3, i8, Rgba)> = (0..(width * height) as usize)
    .into_par_iter()
    .map(|idx| {
      let x = (idx as u32 % width) as f32;
      let y = (idx as u32 / width) as f32;
      let ray_dir_s = sensor.back_project(glam::Vec2::new(x, y));
      let ray_dir_w = t_ws.transform_vector3(ray_dir_s.normalize()).normalize();

      let Some((point, scale)) = raycast(
        origin_w,
        ray_dir_w,
        sensor.near_dist(ray_dir_s),
        sensor.far_dist(ray_dir_s),
      ) else {
        return (Vec3::ZERO, INVALID_NORMAL, -1, Rgba::default());
      };

      let normal = match map.field_grad(point) {
        Some(grad) if grad.length_squared() > 0.0 && grad.is_finite() => {
          if B::Data::NORMALS_ALONG_GRADIENT {
            grad.normalize()
          } else {
            -grad.normalize()
          }
        }
        _ => INVALID_NORMAL,
      };
      let colour = map.data(point).rgba();
      (point, normal, scale as i8, colour)
    })
    .collect();

  let mut points = Image::new(width, height, Vec3::ZERO);
  let mut normals = Image::new(width, height, INVALID_NORMAL);
  let mut scales = Image::new(width, height, -1i8);
  let mut colours = Image::new(width, height, Rgba::default());
  for (idx, (point, normal, scale, colour)) in pixels.into_iter().enumerate() {
    points.as_mut_slice()[idx] = point;
    normals.as_mut_slice()[idx] = normal;
    scales.as_mut_slice()[idx] = scale;
    colours.as_mut_slice()[idx] = colour;
  }
  SurfaceImages {
    points,
    normals,
    scales,
    colours,
  }
}

impl OccupancyMap {
  /// Ray-cast a single ray.
  pub fn raycast(
    &self,
    ray_origin_w: Vec3,
    ray_dir_w: Vec3,
    t_near: f32,
    t_far: f32,
  ) -> Option<(Vec3, i32)> {
    raycast_occupancy(self, ray_origin_w, ray_dir_w, t_near, t_far)
  }

  /// Ray-cast every pixel of a sensor pose into surface images.
  pub fn raycast_volume<S: SensorModel>(&self, sensor: &S, t_ws: Affine3A) -> SurfaceImages {
    raycast_volume_impl(self, sensor, t_ws, |origin, dir, t_near, t_far| {
      raycast_occupancy(self, origin, dir, t_near, t_far)
    })
  }
}

impl TsdfMap {
  pub fn raycast(
    &self,
    ray_origin_w: Vec3,
    ray_dir_w: Vec3,
    t_near: f32,
    t_far: f32,
  ) -> Option<(Vec3, i32)> {
    raycast_tsdf(self, ray_origin_w, ray_dir_w, t_near, t_far)
  }

  pub fn raycast_volume<S: SensorModel>(&self, sensor: &S, t_ws: Affine3A) -> SurfaceImages {
    raycast_volume_impl(self, sensor, t_ws, |origin, dir, t_near, t_far| {
      raycast_tsdf(self, origin, dir, t_near, t_far)
    })
  }
}

impl TsdfMultiMap {
  pub fn raycast(
    &self,
    ray_origin_w: Vec3,
    ray_dir_w: Vec3,
    t_near: f32,
    t_far: f32,
  ) -> Option<(Vec3, i32)> {
    raycast_tsdf(self, ray_origin_w, ray_dir_w, t_near, t_far)
  }

  pub fn raycast_volume<S: SensorModel>(&self, sensor: &S, t_ws: Affine3A) -> SurfaceImages {
    raycast_volume_impl(self, sensor, t_ws, |origin, dir, t_near, t_far| {
      raycast_tsdf(self, origin, dir, t_near, t_far)
    })
  }
}

// =============================================================================
// Diffuse shading
// =============================================================================

/// Shade the ray-cast surface with a single point light plus ambient.
/// Pixels with the invalid-normal sentinel stay at the default colour.
pub fn render_volume(
  surfaces: &SurfaceImages,
  light_w: Vec3,
  ambient: Rgba,
  base_colour: Rgba,
) -> Image<Rgba> {
  let mut render = Image::new(surfaces.points.width(), surfaces.points.height(), Rgba::default());
  for idx in 0..render.len() {
    let normal = surfaces.normals.as_slice()[idx];
    if is_invalid_normal(normal) {
      continue;
    }
    let point = surfaces.points.as_slice()[idx];
    let light_dir = (light_w - point).normalize_or_zero();
    let intensity = normal.dot(light_dir).max(0.0);
    let stored = surfaces.colours.as_slice()[idx];
    let albedo = if stored == Rgba::default() { base_colour } else { stored };
    let shade = |albedo: u8, ambient: u8| -> u8 {
      (albedo as f32 * intensity + ambient as f32).min(255.0) as u8
    };
    render.as_mut_slice()[idx] = Rgba::new(
      shade(albedo.r, ambient.r),
      shade(albedo.g, ambient.g),
      shade(albedo.b, ambient.b),
      255,
    );
  }
  render
}
