// Centralized tolerances and helpers for robust geometry

use serde::{Deserialize, Serialize};

pub const EPS_POS: f32 = 1e-4;            // point coincidence threshold (world units)
pub const EPS_LEN: f32 = 1e-6;            // zero-length vector threshold
pub const EPS_DENOM: f32 = 1e-8;          // denominator guard for ratios
pub const EPS_DIST: f32 = 1e-3;           // distance-to-edge boundary threshold
pub const EPS_ANG: f32 = 1e-6;            // angle compare slack (radians)
pub const EPS_AREA: f32 = 1e-2;           // tiny polygon area threshold (units^2)

/// Tolerance record threaded through every classification in the kernel.
///
/// `position` bands signed areas and interpolation parameters, `distance` decides
/// boundary membership, `angle` decides polar-angle ties.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerance {
    pub position: f32,
    pub distance: f32,
    pub angle: f32,
}

impl Default for Tolerance {
    fn default() -> Self {
        Tolerance { position: EPS_POS, distance: EPS_DIST, angle: EPS_ANG }
    }
}

impl Tolerance {
    pub fn uniform(eps: f32) -> Self {
        Tolerance { position: eps, distance: eps, angle: eps }
    }
}

#[inline]
pub fn safe_div(num: f32, den: f32, fallback: f32) -> f32 {
    if den.abs() <= EPS_DENOM { fallback } else { num/den }
}

/// Quantize a coordinate onto a grid of pitch `step`; used for dedup keys.
#[inline]
pub fn quantize(x: f32, step: f32) -> i32 {
    if step <= EPS_LEN { return x.round() as i32; }
    (x / step).round() as i32
}
