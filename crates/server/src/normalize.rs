//! Mapping of raw touch samples into the curve's coordinate domain.
//!
//! The client records positions in view points with the origin at the top
//! left of its drawing area; the curve lives in `[0, 10] × [0, 10]` with the
//! origin at the bottom left. Each axis is mapped independently by a fixed
//! affine transform:
//!
//! `norm = (raw − in_min) / (in_max − in_min) × (out_max − out_min) + out_min`
//!
//! - `x`: `[16, 380] → [0, 10]`
//! - `y`: `[320, 16] → [0, 10]` (inverted)
//!
//! No clamping is applied.

use contour_wire::{NormalizedSample, RawSample};

/// Raw horizontal extent of the client's drawing area.
pub const RAW_X_RANGE: (f64, f64) = (16.0, 380.0);

/// Raw vertical extent, bottom edge first.
pub const RAW_Y_RANGE: (f64, f64) = (320.0, 16.0);

/// Target extent on both axes.
pub const NORMALIZED_RANGE: (f64, f64) = (0.0, 10.0);

/// Affine map for one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisMap {
    pub in_min: f64,
    pub in_max: f64,
    pub out_min: f64,
    pub out_max: f64,
}

impl AxisMap {
    pub const fn new(input: (f64, f64), output: (f64, f64)) -> Self {
        Self {
            in_min: input.0,
            in_max: input.1,
            out_min: output.0,
            out_max: output.1,
        }
    }

    pub fn apply(&self, raw: f64) -> f64 {
        (raw - self.in_min) / (self.in_max - self.in_min) * (self.out_max - self.out_min)
            + self.out_min
    }
}

/// Normalization domain for both axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizeConfig {
    pub x: AxisMap,
    pub y: AxisMap,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            x: AxisMap::new(RAW_X_RANGE, NORMALIZED_RANGE),
            y: AxisMap::new(RAW_Y_RANGE, NORMALIZED_RANGE),
        }
    }
}

/// Normalize `samples` with the default domain.
pub fn normalize(samples: &[RawSample]) -> Vec<NormalizedSample> {
    normalize_with(&NormalizeConfig::default(), samples)
}

/// Normalize `samples` with an explicit domain.
///
/// Output has the same length and order as the input.
pub fn normalize_with(config: &NormalizeConfig, samples: &[RawSample]) -> Vec<NormalizedSample> {
    samples
        .iter()
        .map(|s| NormalizedSample {
            x: config.x.apply(s.raw_x),
            y: config.y.apply(s.raw_y),
        })
        .collect()
}
