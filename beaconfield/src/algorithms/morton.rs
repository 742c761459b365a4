// Locality-preserving cell keys: 2D cell coordinates interleaved into one u64.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellKey(pub u64);

impl CellKey {
    pub fn from_coords(cx: i32, cy: i32) -> Self {
        CellKey(encode(cx, cy))
    }
    pub fn coords(self) -> (i32, i32) {
        decode(self.0)
    }
}

// Hex form is only for logs and debugging surfaces.
impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// Bias signed coordinates so that -1 and 0 stay adjacent in key space.
#[inline]
fn bias(v: i32) -> u32 { (v as u32) ^ 0x8000_0000 }
#[inline]
fn unbias(v: u32) -> i32 { (v ^ 0x8000_0000) as i32 }

#[inline]
fn spread(v: u32) -> u64 {
    let mut x = v as u64;
    x = (x | (x << 16)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x << 8)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x << 2)) & 0x3333_3333_3333_3333;
    x = (x | (x << 1)) & 0x5555_5555_5555_5555;
    x
}

#[inline]
fn compact(v: u64) -> u32 {
    let mut x = v & 0x5555_5555_5555_5555;
    x = (x | (x >> 1)) & 0x3333_3333_3333_3333;
    x = (x | (x >> 2)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x >> 4)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x >> 8)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x >> 16)) & 0x0000_0000_FFFF_FFFF;
    x as u32
}

pub fn encode(cx: i32, cy: i32) -> u64 {
    spread(bias(cx)) | (spread(bias(cy)) << 1)
}

pub fn decode(key: u64) -> (i32, i32) {
    (unbias(compact(key)), unbias(compact(key >> 1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_extremes() {
        for &(x, y) in &[(0, 0), (-1, 0), (i32::MIN, i32::MAX), (12345, -67890)] {
            assert_eq!(decode(encode(x, y)), (x, y));
        }
    }

    #[test]
    fn neighbors_share_high_bits() {
        // cells inside one aligned 2x2 block differ only in the lowest two key bits
        let base = encode(4, 6) >> 2;
        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            assert_eq!(encode(4 + dx, 6 + dy) >> 2, base);
        }
        assert_eq!(CellKey::from_coords(3, -2).coords(), (3, -2));
        assert_eq!(format!("{}", CellKey(255)), "00000000000000ff");
    }
}
