use glam::{Vec2, Vec3};

use super::*;

fn test_lidar() -> RotatingLidar {
  RotatingLidar::new(1024, 64, -0.3, 0.3).with_near_far(0.5, 60.0)
}

#[test]
fn test_measurement_is_range() {
  let lidar = test_lidar();
  let m = lidar.measurement_from_point(Vec3::new(3.0, 4.0, 0.0));
  assert!((m - 5.0).abs() < 1e-5);
}

#[test]
fn test_project_horizontal_ring() {
  let lidar = test_lidar();
  // A point on the horizon projects to the middle row.
  let (pixel, status) = lidar.project(Vec3::new(5.0, 0.0, 0.0));
  assert!(status.is_ok());
  assert!((pixel.y - (lidar.height as f32 - 1.0) / 2.0).abs() < 0.5);
}

#[test]
fn test_project_outside_elevation_band() {
  let lidar = test_lidar();
  let (_, status) = lidar.project(Vec3::new(1.0, 0.0, 5.0));
  assert_eq!(status, ProjectionStatus::OutsideImage);
}

#[test]
fn test_back_project_round_trip() {
  let lidar = test_lidar();
  for &(x, y) in &[(0.0, 10.0), (511.0, 31.5), (900.0, 60.0)] {
    let dir = lidar.back_project(Vec2::new(x, y));
    assert!((dir.length() - 1.0).abs() < 1e-5);
    let (pixel, status) = lidar.project(dir * 10.0);
    assert!(status.is_ok());
    let dx = (pixel.x - x).abs().min(lidar.width as f32 - (pixel.x - x).abs());
    assert!(dx < 1e-2, "azimuth wrap: {} vs {}", pixel.x, x);
    assert!((pixel.y - y).abs() < 1e-2, "elevation: {} vs {}", pixel.y, y);
  }
}

#[test]
fn test_azimuth_covers_full_turn() {
  let lidar = test_lidar();
  let (p_fwd, _) = lidar.project(Vec3::new(1.0, 0.0, 0.0));
  let (p_back, _) = lidar.project(Vec3::new(-1.0, 1e-4, 0.0));
  let half = lidar.width as f32 / 2.0;
  assert!((p_fwd.x - half).abs() < 1.0);
  assert!(p_back.x < 1.0 || p_back.x > lidar.width as f32 - 1.0);
}

#[test]
fn test_sphere_in_frustum_range_limits() {
  let lidar = test_lidar();
  assert!(lidar.sphere_in_frustum(Vec3::new(10.0, 0.0, 0.0), 0.5));
  assert!(!lidar.sphere_in_frustum(Vec3::new(100.0, 0.0, 0.0), 0.5));
  // Above the elevation band.
  assert!(!lidar.sphere_in_frustum(Vec3::new(1.0, 0.0, 10.0), 0.5));
}

#[test]
fn test_integration_scale_monotonic_in_range() {
  let lidar = test_lidar();
  let res = 0.05;
  let s_near = lidar.compute_integration_scale(Vec3::new(2.0, 0.0, 0.0), res, 0, -1, 3);
  let s_far = lidar.compute_integration_scale(Vec3::new(50.0, 0.0, 0.0), res, 0, -1, 3);
  assert!(s_near <= s_far);
  assert!((0..=3).contains(&s_far));
}
