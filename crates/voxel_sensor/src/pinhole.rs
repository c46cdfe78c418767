//! Perspective pinhole depth camera.

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::model::{ProjectionStatus, SensorModel};

/// Pinhole camera intrinsics plus near/far planes.
///
/// The camera looks down `+z` in the sensor frame; depth pixels store the
/// `z` coordinate of the measured point.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PinholeCamera {
  pub width: u32,
  pub height: u32,
  pub fx: f32,
  pub fy: f32,
  pub cx: f32,
  pub cy: f32,
  pub near_plane: f32,
  pub far_plane: f32,
}

impl PinholeCamera {
  pub fn new(width: u32, height: u32, fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
    Self {
      width,
      height,
      fx,
      fy,
      cx,
      cy,
      near_plane: 0.1,
      far_plane: 10.0,
    }
  }

  /// Camera with a given horizontal field of view, principal point centred.
  pub fn from_fov(width: u32, height: u32, hfov_rad: f32) -> Self {
    let fx = width as f32 / (2.0 * (hfov_rad / 2.0).tan());
    Self::new(
      width,
      height,
      fx,
      fx,
      width as f32 / 2.0 - 0.5,
      height as f32 / 2.0 - 0.5,
    )
  }

  pub fn with_near_far(mut self, near_plane: f32, far_plane: f32) -> Self {
    self.near_plane = near_plane;
    self.far_plane = far_plane;
    self
  }

  /// Outward normals of the four side planes of the view pyramid.
  fn frustum_normals(&self) -> [Vec3; 4] {
    let left = self.back_project(Vec2::new(0.0, self.cy));
    let right = self.back_project(Vec2::new(self.width as f32 - 1.0, self.cy));
    let top = self.back_project(Vec2::new(self.cx, 0.0));
    let bottom = self.back_project(Vec2::new(self.cx, self.height as f32 - 1.0));
    [
      left.cross(Vec3::Y).normalize(),
      Vec3::Y.cross(right).normalize(),
      Vec3::X.cross(top).normalize(),
      bottom.cross(Vec3::X).normalize(),
    ]
  }
}

impl SensorModel for PinholeCamera {
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
      self.fx * point_s.x / point_s.z + self.cx,
      self.fy * point_s.y / point_s.z + self.cy,
    );
    let status = if pixel.x < -0.5
      || pixel.y < -0.5
      || pixel.x > self.width as f32 - 0.5
      || pixel.y > self.height as f32 - 0.5
    {
      ProjectionStatus::OutsideImage
    } else {
      ProjectionStatus::Ok
    };
    (pixel, status)
  }

  fn back_project(&self, pixel: Vec2) -> Vec3 {
    Vec3::new(
      (pixel.x - self.cx) / self.fx,
      (pixel.y - self.cy) / self.fy,
      1.0,
    )
    .normalize()
  }

  fn measurement_from_point(&self, point_s: Vec3) -> f32 {
    point_s.z
  }

  fn near_dist(&self, ray_dir_s: Vec3) -> f32 {
    // Distance along the ray until its z coordinate reaches the near plane.
    if ray_dir_s.z <= 0.0 {
      return f32::INFINITY;
    }
    self.near_plane / ray_dir_s.z
  }

  fn far_dist(&self, ray_dir_s: Vec3) -> f32 {
    if ray_dir_s.z <= 0.0 {
      return 0.0;
    }
    self.far_plane / ray_dir_s.z
  }

  fn compute_integration_scale(
    &self,
    point_s: Vec3,
    map_res: f32,
    last_scale: i32,
    min_scale: i32,
    max_scale: i32,
  ) -> i32 {
    // A voxel of edge `map_res` at depth z spans ~ fx * map_res / z pixels.
    // Choose the scale whose voxel footprint stays near one pixel.
    let dist = point_s.z.max(self.near_plane);
    let pixel_voxel_ratio = dist / (self.fx * map_res);
    let ideal = if pixel_voxel_ratio <= 1.0 {
      0
    } else {
      pixel_voxel_ratio.log2().ceil() as i32
    };
    if min_scale == -1 {
      ideal.clamp(0, max_scale)
    } else {
      ideal
        .clamp(last_scale - 1, last_scale + 1)
        .clamp(0, max_scale)
    }
  }

  fn sphere_in_frustum(&self, centre_s: Vec3, radius: f32) -> bool {
    if centre_s.z + radius < self.near_plane || centre_s.z - radius > self.far_plane {
      return false;
    }
    self
      .frustum_normals()
      .iter()
      .all(|n| n.dot(centre_s) <= radius)
  }
}

#[cfg(test)]
#[path = "pinhole_test.rs"]
mod pinhole_test;
