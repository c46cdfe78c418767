use super::*;

#[test]
fn test_default_validates() {
  assert!(MapConfig::default().validate().is_ok());
}

#[test]
fn test_rejects_bad_res() {
  let mut config = MapConfig::default();
  config.res = 0.0;
  assert!(config.validate().is_err());
  config.res = f32::NAN;
  assert!(config.validate().is_err());
}

#[test]
fn test_rejects_bad_log_odds() {
  let mut config = MapConfig::default();
  config.occupancy.log_odd_min = 0.5;
  assert!(config.validate().is_err());
}

#[test]
fn test_rejects_bad_fs_scale() {
  let mut config = MapConfig::default();
  config.occupancy.fs_integr_scale = 7;
  assert!(config.validate().is_err());
}

#[test]
fn test_tau_clamps_to_voxel_multiples() {
  let config = MapConfig::new(0.1, 256);
  // Very close range clamps to the lower factor.
  assert!((config.tau(0.1) - 0.6).abs() < 1e-6);
  // Very far range clamps to the upper factor.
  assert!((config.tau(1000.0) - 1.6).abs() < 1e-6);
  // In between it grows linearly.
  let mid = config.tau(30.0);
  assert!(mid > 0.6 && mid < 1.6);
}

#[test]
fn test_three_sigma_positive_and_bounded() {
  let config = MapConfig::new(0.1, 256);
  let lo = config.three_sigma(0.1);
  let hi = config.three_sigma(1000.0);
  assert!(lo >= 3.0 * 0.1);
  assert!(hi <= 3.0 * 0.3 + 1e-6);
}

#[test]
fn test_min_occupancy_defaults_to_free_increment() {
  let config = MapConfig::default();
  let occ = config.occupancy;
  assert!((occ.min_occupancy - occ.log_odd_min).abs() < 1e-6);
}
