use std::ops::{Add, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

use super::tolerance::{safe_div, Tolerance, EPS_LEN};
use crate::model::Vec2;

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    #[inline] pub fn new(x: f32, y: f32) -> Self { Vec2 { x, y } }
    #[inline] pub fn dot(self, o: Vec2) -> f32 { self.x*o.x + self.y*o.y }
    /// z-component of the 3D cross product.
    #[inline] pub fn cross(self, o: Vec2) -> f32 { self.x*o.y - self.y*o.x }
    #[inline] pub fn length_sq(self) -> f32 { self.dot(self) }
    #[inline] pub fn length(self) -> f32 { self.length_sq().sqrt() }
    #[inline] pub fn scale(self, s: f32) -> Vec2 { Vec2 { x: self.x*s, y: self.y*s } }
    #[inline] pub fn distance(self, o: Vec2) -> f32 { (self - o).length() }
    #[inline] pub fn distance_sq(self, o: Vec2) -> f32 { (self - o).length_sq() }
    #[inline] pub fn is_finite(self) -> bool { self.x.is_finite() && self.y.is_finite() }

    /// Unit vector in the same direction; near-zero vectors map to zero.
    pub fn normalize(self) -> Vec2 {
        let len = self.length();
        if len > EPS_LEN { Vec2 { x: self.x/len, y: self.y/len } } else { Vec2::ZERO }
    }

    /// Counter-clockwise rotation about the origin.
    pub fn rotate(self, radians: f32) -> Vec2 {
        let (s, c) = radians.sin_cos();
        Vec2 { x: self.x*c - self.y*s, y: self.x*s + self.y*c }
    }

    /// Rotation about `pivot`.
    pub fn rotate_about(self, pivot: Vec2, radians: f32) -> Vec2 {
        (self - pivot).rotate(radians) + pivot
    }
}

impl Add for Vec2 { type Output = Vec2; #[inline] fn add(self, o: Vec2) -> Vec2 { Vec2 { x: self.x+o.x, y: self.y+o.y } } }
impl Sub for Vec2 { type Output = Vec2; #[inline] fn sub(self, o: Vec2) -> Vec2 { Vec2 { x: self.x-o.x, y: self.y-o.y } } }
impl Mul<f32> for Vec2 { type Output = Vec2; #[inline] fn mul(self, s: f32) -> Vec2 { self.scale(s) } }
impl Neg for Vec2 { type Output = Vec2; #[inline] fn neg(self) -> Vec2 { Vec2 { x: -self.x, y: -self.y } } }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Clockwise,
    CounterClockwise,
    Collinear,
}

/// Twice the signed area of the triangle (p1, p2, p3); positive for a left turn.
#[inline]
pub fn signed_area2(p1: Vec2, p2: Vec2, p3: Vec2) -> f32 {
    (p2 - p1).cross(p3 - p1)
}

/// Turn direction of p1 -> p2 -> p3. Every turn test in the crate goes through here.
pub fn orientation(p1: Vec2, p2: Vec2, p3: Vec2, tol: &Tolerance) -> Orientation {
    let a = signed_area2(p1, p2, p3);
    if a.abs() <= tol.position {
        Orientation::Collinear
    } else if a > 0.0 {
        Orientation::CounterClockwise
    } else {
        Orientation::Clockwise
    }
}

/// Squared distance from `p` to segment ab and the clamped projection parameter.
pub fn seg_distance_sq(p: Vec2, a: Vec2, b: Vec2) -> (f32, f32) {
    let v = b - a;
    let w = p - a;
    // (near) zero-length segment: plain point distance
    let t = safe_div(w.dot(v), v.length_sq(), 0.0).clamp(0.0, 1.0);
    let proj = a + v * t;
    (p.distance_sq(proj), t)
}

pub fn distance_to_segment(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    seg_distance_sq(p, a, b).0.sqrt()
}
