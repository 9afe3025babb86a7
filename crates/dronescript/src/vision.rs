//! Colour segmentation and target detection.
//!
//! The target is a solid coloured marker. A frame is thresholded in HSV space
//! and the largest 4-connected blob of matching pixels gives the bounding box.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::VisionConfig;
use crate::state::Frame;

/// Inclusive HSV range. Hue is in degrees, saturation and value in `[0, 1]`.
///
/// When `h_min > h_max` the hue range wraps through 0° (useful for reds).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HsvRange {
    /// Lowest accepted hue.
    pub h_min: f32,
    /// Highest accepted hue.
    pub h_max: f32,
    /// Lowest accepted saturation.
    pub s_min: f32,
    /// Lowest accepted value.
    pub v_min: f32,
}

impl Default for HsvRange {
    /// Orange.
    fn default() -> Self {
        Self {
            h_min: 8.0,
            h_max: 40.0,
            s_min: 0.55,
            v_min: 0.45,
        }
    }
}

impl HsvRange {
    /// Check that the bounds are within their domains.
    ///
    /// # Errors
    ///
    /// Returns a description of the first out-of-range bound.
    pub fn validate(&self) -> Result<(), String> {
        for (name, hue) in [("h_min", self.h_min), ("h_max", self.h_max)] {
            if !(0.0..=360.0).contains(&hue) {
                return Err(format!("{name} must be within 0..=360, got {hue}"));
            }
        }
        for (name, unit) in [("s_min", self.s_min), ("v_min", self.v_min)] {
            if !(0.0..=1.0).contains(&unit) {
                return Err(format!("{name} must be within 0..=1, got {unit}"));
            }
        }
        Ok(())
    }

    /// Whether an RGB pixel falls inside the range.
    #[must_use]
    pub fn contains(&self, rgb: [u8; 3]) -> bool {
        let (h, s, v) = rgb_to_hsv(rgb);
        if s < self.s_min || v < self.v_min {
            return false;
        }
        if self.h_min <= self.h_max {
            (self.h_min..=self.h_max).contains(&h)
        } else {
            h >= self.h_min || h <= self.h_max
        }
    }
}

/// Convert an RGB pixel to `(hue°, saturation, value)`.
#[must_use]
pub fn rgb_to_hsv([r, g, b]: [u8; 3]) -> (f32, f32, f32) {
    let r = f32::from(r) / 255.0;
    let g = f32::from(g) / 255.0;
    let b = f32::from(b) / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta <= f32::EPSILON {
        0.0
    } else if (max - r).abs() <= f32::EPSILON {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if (max - g).abs() <= f32::EPSILON {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let saturation = if max <= f32::EPSILON { 0.0 } else { delta / max };

    (hue, saturation, max)
}

/// Axis-aligned box in pixel coordinates. `x2`/`y2` are exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x1: u32,
    /// Top edge.
    pub y1: u32,
    /// One past the right edge.
    pub x2: u32,
    /// One past the bottom edge.
    pub y2: u32,
}

impl BoundingBox {
    /// Box width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    /// Box height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    /// Box area in square pixels.
    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    /// Centre of the box.
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (
            f64::from(self.x1 + self.x2) / 2.0,
            f64::from(self.y1 + self.y2) / 2.0,
        )
    }
}

/// Find the bounding box of the largest blob of pixels inside `range`.
///
/// Returns `None` when no pixel matches.
#[must_use]
pub fn segment(image: &RgbImage, range: &HsvRange) -> Option<BoundingBox> {
    let (width, height) = image.dimensions();
    let w = width as usize;
    let h = height as usize;
    if w == 0 || h == 0 {
        return None;
    }

    let mut mask: Vec<bool> = image.pixels().map(|p| range.contains(p.0)).collect();

    let mut best: Option<(usize, BoundingBox)> = None;
    let mut stack = Vec::new();

    for start in 0..mask.len() {
        if !mask[start] {
            continue;
        }
        mask[start] = false;
        stack.push(start);

        let mut count = 0usize;
        let (mut x1, mut y1, mut x2, mut y2) = (usize::MAX, usize::MAX, 0usize, 0usize);

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            count += 1;
            x1 = x1.min(x);
            y1 = y1.min(y);
            x2 = x2.max(x + 1);
            y2 = y2.max(y + 1);

            let mut visit = |n: usize| {
                if mask[n] {
                    mask[n] = false;
                    stack.push(n);
                }
            };
            if x > 0 {
                visit(idx - 1);
            }
            if x + 1 < w {
                visit(idx + 1);
            }
            if y > 0 {
                visit(idx - w);
            }
            if y + 1 < h {
                visit(idx + w);
            }
        }

        if best.as_ref().map_or(true, |(c, _)| count > *c) {
            best = Some((count, to_box(x1, y1, x2, y2)));
        }
    }

    best.map(|(count, bbox)| {
        trace!(pixels = count, area = bbox.area(), "Largest blob");
        bbox
    })
}

#[allow(clippy::cast_possible_truncation)]
fn to_box(x1: usize, y1: usize, x2: usize, y2: usize) -> BoundingBox {
    // Coordinates come from a u32-sized image
    BoundingBox {
        x1: x1 as u32,
        y1: y1 as u32,
        x2: x2 as u32,
        y2: y2 as u32,
    }
}

/// A target sighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    /// Frame the target was found in.
    pub frame_seq: u64,
    /// Bounding box of the target.
    pub bbox: BoundingBox,
}

/// Decides whether a frame shows the target close enough to count.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetDetector {
    range: HsvRange,
    area_threshold: u64,
}

impl TargetDetector {
    /// Create a detector for the given colour range and minimum box area.
    #[must_use]
    pub fn new(range: HsvRange, area_threshold: u32) -> Self {
        Self {
            range,
            area_threshold: u64::from(area_threshold),
        }
    }

    /// Create a detector from the vision configuration.
    #[must_use]
    pub fn from_config(config: &VisionConfig) -> Self {
        Self::new(config.hsv, config.area_threshold)
    }

    /// The largest matching blob in the frame, regardless of size.
    #[must_use]
    pub fn largest_blob(&self, frame: &Frame) -> Option<BoundingBox> {
        segment(&frame.image, &self.range)
    }

    /// Report a detection when the largest blob reaches the area threshold.
    #[must_use]
    pub fn detect(&self, frame: &Frame) -> Option<Detection> {
        let bbox = self.largest_blob(frame)?;
        (bbox.area() >= self.area_threshold).then_some(Detection {
            frame_seq: frame.seq,
            bbox,
        })
    }
}
