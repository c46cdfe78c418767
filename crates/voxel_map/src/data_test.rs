use super::*;

#[test]
fn test_tsdf_default_is_unobserved_free() {
  let data = TsdfData::default();
  assert_eq!(data.tsdf, 1.0);
  assert!(!data.is_valid());
  assert!(!data.is_inside());
}

#[test]
fn test_tsdf_update_normalises_and_clamps() {
  let mut data = TsdfData::default();
  assert!(data.update(0.05, 0.1, 100));
  assert!((data.tsdf - (1.0 + 0.5) / 2.0).abs() < 1e-6);
  assert_eq!(data.weight, 1);

  // A sample far in front clamps to +1.
  let mut far = TsdfData::default();
  far.update(10.0, 0.1, 100);
  assert_eq!(far.tsdf, 1.0);
}

#[test]
fn test_tsdf_rejects_beyond_negative_band() {
  let mut data = TsdfData::default();
  assert!(!data.update(-0.2, 0.1, 100));
  assert_eq!(data.weight, 0);
}

#[test]
fn test_tsdf_weight_saturates_and_stays_in_range() {
  // Law: repeated integration keeps weight monotone (saturating) and the
  // value inside [-1, 1].
  let mut data = TsdfData::default();
  let mut last_weight = 0;
  for _ in 0..200 {
    data.update(-0.05, 0.1, 100);
    assert!(data.weight >= last_weight);
    assert!((-1.0..=1.0).contains(&data.tsdf));
    last_weight = data.weight;
  }
  assert_eq!(data.weight, 100);
  assert!((data.tsdf - -0.5).abs() < 0.05);
}

#[test]
fn test_occupancy_update_reports_newly_observed_once() {
  let mut data = OccupancyData::default();
  assert!(data.update(-5.015, 20));
  assert!(!data.update(-5.015, 20));
  assert!(data.observed);
}

#[test]
fn test_occupancy_free_saturation() {
  // Law: repeated free updates converge the field to log_odd_min * max_weight.
  let log_odd_min = -5.015;
  let max_weight = 20;
  let mut data = OccupancyData::default();
  for _ in 0..100 {
    data.update(log_odd_min, max_weight);
  }
  assert_eq!(data.weight, max_weight);
  assert!((data.field() - log_odd_min * max_weight as f32).abs() < 1e-3);
  assert!(!data.is_inside());
}

#[test]
fn test_occupancy_field_scales_with_weight() {
  let mut data = OccupancyData::default();
  data.update(2.0, 20);
  assert!((data.field() - 2.0).abs() < 1e-6);
  data.update(2.0, 20);
  assert!((data.field() - 4.0).abs() < 1e-6);
}

#[test]
fn test_rgba_fuse_moves_toward_sample() {
  let old = Rgba::new(100, 100, 100, 255);
  let fused = old.fuse(Rgba::new(200, 0, 100, 255), 1);
  assert_eq!(fused.r, 150);
  assert_eq!(fused.g, 50);
  assert_eq!(fused.b, 100);
  assert_eq!(fused.a, 255);
}
