// Bounds applied to every beacon, query and config value coming from the host.

/// Live beacons per field; adds of new ids past this are refused.
pub const MAX_BEACONS: usize = 200_000;

/// Rectangles spanning more cells than this per axis scan occupied cells instead.
pub const MAX_CELL_SPAN: i64 = 4_096;

pub const COORD_MIN: f32 = -10_000_000.0;
pub const COORD_MAX: f32 = 10_000_000.0;

// cell, region and radius sizes
pub const SIZE_MIN: f32 = 1e-3;
pub const SIZE_MAX: f32 = 1_000_000.0;

#[inline]
pub fn in_coord_bounds(v: f32) -> bool {
    v.is_finite() && (COORD_MIN..=COORD_MAX).contains(&v)
}

#[inline]
pub fn in_size_bounds(s: f32) -> bool {
    s.is_finite() && (SIZE_MIN..=SIZE_MAX).contains(&s)
}
