//! The sensor contract consumed by the map integrators and ray-caster.

use glam::{Vec2, Vec3};

use crate::image::Image;

/// Outcome of projecting a sensor-frame point into the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProjectionStatus {
  /// Projection landed inside the image.
  Ok,
  /// The point is behind the sensor or otherwise unprojectable.
  Behind,
  /// Projection landed outside the image bounds.
  OutsideImage,
}

impl ProjectionStatus {
  #[inline]
  pub fn is_ok(self) -> bool {
    self == ProjectionStatus::Ok
  }
}

/// Projection, frustum and integration-scale contract offered to the core.
///
/// All points are in the sensor frame `S`. Implementations must be cheap to
/// call per voxel; the integrators invoke `project`/`measurement_from_point`
/// in their innermost loops.
pub trait SensorModel: Send + Sync {
  /// Image width in pixels.
  fn width(&self) -> u32;

  /// Image height in pixels.
  fn height(&self) -> u32;

  /// Closest range at which a measurement is valid, in metres.
  fn near_plane(&self) -> f32;

  /// Farthest range at which a measurement is valid, in metres.
  fn far_plane(&self) -> f32;

  /// Project a sensor-frame point to pixel coordinates.
  fn project(&self, point_s: Vec3) -> (Vec2, ProjectionStatus);

  /// Back-project a pixel to a unit ray direction in the sensor frame.
  fn back_project(&self, pixel: Vec2) -> Vec3;

  /// The scalar a depth pixel stores for this point: `z` for a pinhole
  /// camera, the Euclidean range for a LiDAR.
  fn measurement_from_point(&self, point_s: Vec3) -> f32;

  /// Distance to the near boundary along a ray direction.
  fn near_dist(&self, ray_dir_s: Vec3) -> f32;

  /// Distance to the far boundary along a ray direction.
  fn far_dist(&self, ray_dir_s: Vec3) -> f32;

  /// Recommended integration scale for a block centred at `point_s`.
  ///
  /// `last_scale` is the scale the block was last integrated at, or the raw
  /// recommendation is returned when `min_scale == -1` (first visit). The
  /// result is clamped to `[last_scale - 1, last_scale + 1]` on revisits and
  /// always to `[0, max_scale]`.
  fn compute_integration_scale(
    &self,
    point_s: Vec3,
    map_res: f32,
    last_scale: i32,
    min_scale: i32,
    max_scale: i32,
  ) -> i32;

  /// Whether a sphere is (at least partially) inside the sensing frustum.
  fn sphere_in_frustum(&self, centre_s: Vec3, radius: f32) -> bool;

  /// Project `point_s` and read the image value it lands on.
  ///
  /// Returns `None` when the projection fails or `valid` rejects the value.
  fn project_to_pixel_value<F>(
    &self,
    point_s: Vec3,
    image: &Image<f32>,
    valid: F,
  ) -> Option<f32>
  where
    F: Fn(f32) -> bool,
    Self: Sized,
  {
    let (pixel, status) = self.project(point_s);
    if !status.is_ok() {
      return None;
    }
    let value = *image.try_get(pixel.x.round() as i32, pixel.y.round() as i32)?;
    if valid(value) {
      Some(value)
    } else {
      None
    }
  }
}
