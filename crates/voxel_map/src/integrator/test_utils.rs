//! Shared fixtures for integrator, ray-caster and mesher tests: a small
//! synthetic camera looking down +z at a planar wall, plus a scripted
//! sensor whose integration-scale recommendation is test-controlled.

use glam::{Affine3A, Vec2, Vec3};
use voxel_sensor::{Image, PinholeCamera, ProjectionStatus, SensorModel};

use crate::config::MapConfig;
use crate::octree::octant::BLOCK_MAX_SCALE;

/// 64x48 camera with a wide (~90 degree) field of view.
pub fn test_camera() -> PinholeCamera {
  PinholeCamera::new(64, 48, 32.0, 32.0, 31.5, 23.5).with_near_far(0.1, 5.0)
}

/// Map config for the wall scene: 2 cm voxels, 256-voxel cube centred
/// laterally on the sensor with some headroom behind it.
pub fn wall_config() -> MapConfig {
  MapConfig::new(0.02, 256).with_origin(Vec3::new(-2.56, -2.56, -0.5))
}

/// Identity world-from-sensor pose: sensor at the origin looking down +z.
pub fn identity_pose() -> Affine3A {
  Affine3A::IDENTITY
}

/// Depth image with every pixel at `depth` metres.
pub fn constant_depth(camera: &PinholeCamera, depth: f32) -> Image<f32> {
  Image::new(camera.width, camera.height, depth)
}

/// Depth image valid only in a centred `valid` x `valid` pixel square.
pub fn cropped_depth(camera: &PinholeCamera, depth: f32, valid: u32) -> Image<f32> {
  let mut image = Image::new(camera.width, camera.height, 0.0);
  let x0 = (camera.width - valid) / 2;
  let y0 = (camera.height - valid) / 2;
  for y in y0..y0 + valid {
    for x in x0..x0 + valid {
      *image.get_mut(x, y) = depth;
    }
  }
  image
}

/// Sensor with a scripted integration-scale recommendation and a trivial
/// orthographic-style projection, for updater tests where the geometry is
/// irrelevant.
pub struct ScriptedSensor {
  pub width: u32,
  pub height: u32,
  pub near_plane: f32,
  pub far_plane: f32,
  /// Raw recommendation returned before the last-scale clamp.
  pub recommend_scale: i32,
  /// Metres per pixel of the flat projection.
  pub metres_per_pixel: f32,
}

impl Default for ScriptedSensor {
  fn default() -> Self {
    Self {
      width: 64,
      height: 64,
      near_plane: 0.1,
      far_plane: 20.0,
      recommend_scale: 0,
      metres_per_pixel: 0.1,
    }
  }
}

impl SensorModel for ScriptedSensor {
  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn near_plane(&self) -> f32 {
    self.near_plane
  }

  fn far_plane(&self) -> f32 {
    self.far_plane
  }

  fn project(&self, point_s: Vec3) -> (Vec2, ProjectionStatus) {
    if point_s.z <= 0.0 {
      return (Vec2::ZERO, ProjectionStatus::Behind);
    }
    let pixel = Vec2::new(
      self.width as f32 / 2.0 + point_s.x / self.metres_per_pixel,
      self.height as f32 / 2.0 + point_s.y / self.metres_per_pixel,
    );
    let status = if pixel.x < 0.0
      || pixel.y < 0.0
      || pixel.x > self.width as f32 - 1.0
      || pixel.y > self.height as f32 - 1.0
    {
      ProjectionStatus::OutsideImage
    } else {
      ProjectionStatus::Ok
    };
    (pixel, status)
  }

  fn back_project(&self, pixel: Vec2) -> Vec3 {
    Vec3::new(
      (pixel.x - self.width as f32 / 2.0) * self.metres_per_pixel,
      (pixel.y - self.height as f32 / 2.0) * self.metres_per_pixel,
      1.0,
    )
    .normalize()
  }

  fn measurement_from_point(&self, point_s: Vec3) -> f32 {
    point_s.z
  }

  fn near_dist(&self, _ray_dir_s: Vec3) -> f32 {
    self.near_plane
  }

  fn far_dist(&self, _ray_dir_s: Vec3) -> f32 {
    self.far_plane
  }

  fn compute_integration_scale(
    &self,
    _point_s: Vec3,
    _map_res: f32,
    last_scale: i32,
    min_scale: i32,
    max_scale: i32,
  ) -> i32 {
    if min_scale == -1 {
      self.recommend_scale.clamp(0, max_scale)
    } else {
      self
        .recommend_scale
        .clamp(last_scale - 1, last_scale + 1)
        .clamp(0, max_scale)
    }
  }

  fn sphere_in_frustum(&self, centre_s: Vec3, radius: f32) -> bool {
    centre_s.z + radius > 0.0
  }
}

/// Map config matched to the scripted sensor.
pub fn scripted_config() -> MapConfig {
  let mut config = MapConfig::new(0.1, 64).with_origin(Vec3::new(-3.2, -3.2, 0.0));
  config.occupancy.fs_integr_scale = BLOCK_MAX_SCALE;
  config
}
