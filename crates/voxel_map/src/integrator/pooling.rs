//! Min/max pooling pyramid over a depth image.
//!
//! Volume carving classifies whole octants against the depth range inside
//! their projected footprint; the pyramid answers those rectangle min/max
//! queries in O(1) after an O(n log n) build. Invalid pixels (below the
//! sensor's near plane) contribute to neither bound; a footprint with no
//! valid pixel at all reports an empty range.

use voxel_sensor::Image;

/// One min/max value pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthRange {
  pub min: f32,
  pub max: f32,
}

impl DepthRange {
  const EMPTY: DepthRange = DepthRange {
    min: f32::INFINITY,
    max: f32::NEG_INFINITY,
  };

  #[inline]
  fn merge(self, other: DepthRange) -> DepthRange {
    DepthRange {
      min: self.min.min(other.min),
      max: self.max.max(other.max),
    }
  }

  /// Whether any valid pixel contributed.
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.min > self.max
  }
}

/// Mip pyramid of min/max depth over power-of-two tiles.
pub struct DepthPooling {
  levels: Vec<Image<DepthRange>>,
}

impl DepthPooling {
  /// Build the pyramid. Pixels failing `min_valid` are ignored.
  pub fn new(depth: &Image<f32>, min_valid: f32) -> Self {
    let base = Image::from_vec(
      depth.width(),
      depth.height(),
      depth
        .as_slice()
        .iter()
        .map(|&d| {
          if d >= min_valid && d.is_finite() {
            DepthRange { min: d, max: d }
          } else {
            DepthRange::EMPTY
          }
        })
        .collect(),
    )
    .expect("same dimensions as input");

    let mut levels = vec![base];
    loop {
      let prev = levels.last().expect("at least the base level");
      if prev.width() <= 1 && prev.height() <= 1 {
        break;
      }
      let w = prev.width().div_ceil(2);
      let h = prev.height().div_ceil(2);
      let mut next = Image::new(w, h, DepthRange::EMPTY);
      for y in 0..h {
        for x in 0..w {
          let mut range = DepthRange::EMPTY;
          for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            if let Some(r) = prev.try_get((2 * x + dx) as i32, (2 * y + dy) as i32) {
              range = range.merge(*r);
            }
          }
          *next.get_mut(x, y) = range;
        }
      }
      levels.push(next);
    }
    Self { levels }
  }

  /// Min/max depth over the pixel rectangle `[x0, x1] x [y0, y1]`
  /// (inclusive, clamped to the image).
  pub fn query(&self, x0: i32, y0: i32, x1: i32, y1: i32) -> DepthRange {
    let base = &self.levels[0];
    let x0 = x0.clamp(0, base.width() as i32 - 1);
    let x1 = x1.clamp(0, base.width() as i32 - 1);
    let y0 = y0.clamp(0, base.height() as i32 - 1);
    let y1 = y1.clamp(0, base.height() as i32 - 1);
    if x1 < x0 || y1 < y0 {
      return DepthRange::EMPTY;
    }

    // Pick the level whose tiles are no larger than the rectangle, then
    // merge the (at most 3x3) covering tiles.
    let span = ((x1 - x0 + 1).max(y1 - y0 + 1)) as u32;
    let level = (32 - span.leading_zeros()).saturating_sub(1).min(self.levels.len() as u32 - 1);
    let tile = 1i32 << level;
    let img = &self.levels[level as usize];

    let mut range = DepthRange::EMPTY;
    let mut ty = y0 / tile;
    while ty * tile <= y1 {
      let mut tx = x0 / tile;
      while tx * tile <= x1 {
        if let Some(r) = img.try_get(tx, ty) {
          range = range.merge(*r);
        }
        tx += 1;
      }
      ty += 1;
    }
    range
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn image_from_fn(w: u32, h: u32, f: impl Fn(u32, u32) -> f32) -> Image<f32> {
    let mut img = Image::new(w, h, 0.0);
    for y in 0..h {
      for x in 0..w {
        *img.get_mut(x, y) = f(x, y);
      }
    }
    img
  }

  #[test]
  fn test_query_whole_image() {
    let depth = image_from_fn(16, 8, |x, y| 1.0 + (x + y) as f32 * 0.1);
    let pooling = DepthPooling::new(&depth, 0.1);
    let range = pooling.query(0, 0, 15, 7);
    assert!((range.min - 1.0).abs() < 1e-6);
    assert!((range.max - 3.2).abs() < 1e-6);
  }

  #[test]
  fn test_query_small_rect_is_tight() {
    let depth = image_from_fn(16, 16, |x, _| x as f32);
    let pooling = DepthPooling::new(&depth, 0.0);
    let range = pooling.query(4, 4, 6, 6);
    // Conservative: the pooled answer may widen to tile boundaries but must
    // bound the true range.
    assert!(range.min <= 4.0);
    assert!(range.max >= 6.0);
  }

  #[test]
  fn test_invalid_pixels_are_ignored() {
    let mut depth = image_from_fn(8, 8, |_, _| 2.0);
    *depth.get_mut(3, 3) = 0.0;
    let pooling = DepthPooling::new(&depth, 0.5);
    let range = pooling.query(0, 0, 7, 7);
    assert_eq!(range.min, 2.0);
    assert_eq!(range.max, 2.0);
  }

  #[test]
  fn test_all_invalid_is_empty() {
    let depth = image_from_fn(4, 4, |_, _| 0.0);
    let pooling = DepthPooling::new(&depth, 0.5);
    assert!(pooling.query(0, 0, 3, 3).is_empty());
  }
}
