//! Rotating (spinning) LiDAR producing a cylindrical range image.

use std::f32::consts::PI;

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::model::{ProjectionStatus, SensorModel};

/// Spinning LiDAR model.
///
/// Pixels are laid out azimuth-major: column `x` covers azimuth
/// `[-pi, pi)` scanning clockwise from `+x`, row `y` spans the elevation
/// band `[elevation_min, elevation_max]` top-down. Range pixels store the
/// Euclidean distance to the return.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RotatingLidar {
  pub width: u32,
  pub height: u32,
  /// Lowest beam elevation in radians (negative is below the horizon).
  pub elevation_min: f32,
  /// Highest beam elevation in radians.
  pub elevation_max: f32,
  pub near_plane: f32,
  pub far_plane: f32,
}

impl RotatingLidar {
  pub fn new(width: u32, height: u32, elevation_min: f32, elevation_max: f32) -> Self {
    Self {
      width,
      height,
      elevation_min,
      elevation_max,
      near_plane: 0.5,
      far_plane: 60.0,
    }
  }

  pub fn with_near_far(mut self, near_plane: f32, far_plane: f32) -> Self {
    self.near_plane = near_plane;
    self.far_plane = far_plane;
    self
  }

  #[inline]
  fn azimuth_resolution(&self) -> f32 {
    2.0 * PI / self.width as f32
  }

  #[inline]
  fn elevation_span(&self) -> f32 {
    self.elevation_max - self.elevation_min
  }
}

impl SensorModel for RotatingLidar {
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
    let range_xy = point_s.truncate().length();
    if range_xy == 0.0 && point_s.z == 0.0 {
      return (Vec2::ZERO, ProjectionStatus::Behind);
    }
    let azimuth = point_s.y.atan2(point_s.x);
    let elevation = point_s.z.atan2(range_xy);
    let px = (PI - azimuth) / (2.0 * PI) * self.width as f32;
    let py = (self.elevation_max - elevation) / self.elevation_span() * (self.height as f32 - 1.0);
    let pixel = Vec2::new(px.rem_euclid(self.width as f32), py);
    let status = if py < -0.5 || py > self.height as f32 - 0.5 {
      ProjectionStatus::OutsideImage
    } else {
      ProjectionStatus::Ok
    };
    (pixel, status)
  }

  fn back_project(&self, pixel: Vec2) -> Vec3 {
    let azimuth = PI - pixel.x / self.width as f32 * 2.0 * PI;
    let elevation =
      self.elevation_max - pixel.y / (self.height as f32 - 1.0) * self.elevation_span();
    Vec3::new(
      elevation.cos() * azimuth.cos(),
      elevation.cos() * azimuth.sin(),
      elevation.sin(),
    )
  }

  fn measurement_from_point(&self, point_s: Vec3) -> f32 {
    point_s.length()
  }

  fn near_dist(&self, _ray_dir_s: Vec3) -> f32 {
    self.near_plane
  }

  fn far_dist(&self, _ray_dir_s: Vec3) -> f32 {
    self.far_plane
  }

  fn compute_integration_scale(
    &self,
    point_s: Vec3,
    map_res: f32,
    last_scale: i32,
    min_scale: i32,
    max_scale: i32,
  ) -> i32 {
    // Beam spacing at range d is roughly d * azimuth resolution; match the
    // voxel edge at the chosen scale against it.
    let dist = point_s.length().max(self.near_plane);
    let beam_spacing = dist * self.azimuth_resolution();
    let ratio = beam_spacing / map_res;
    let ideal = if ratio <= 1.0 {
      0
    } else {
      ratio.log2().ceil() as i32
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
    let dist = centre_s.length();
    if dist - radius > self.far_plane || dist + radius < self.near_plane {
      return false;
    }
    if dist <= radius {
      // The sensor is inside the sphere.
      return true;
    }
    let elevation = centre_s.z.atan2(centre_s.truncate().length());
    let angular_radius = (radius / dist).asin();
    elevation - angular_radius <= self.elevation_max
      && elevation + angular_radius >= self.elevation_min
  }
}

#[cfg(test)]
#[path = "lidar_test.rs"]
mod lidar_test;
