// Segment-segment intersection with tolerances.
// Parallel and collinear inputs are reported explicitly rather than as a point.

use serde::{Deserialize, Serialize};

use super::math::{orientation, Orientation};
use super::tolerance::{safe_div, Tolerance, EPS_DENOM};
use crate::model::Vec2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineIntersection {
    // Intersection point when the segments properly cross or touch
    pub point: Option<Vec2>,
    pub is_parallel: bool,
    pub is_collinear: bool,
    // Interpolation parameters along a and b (meaningful only when not parallel)
    pub t: f32,
    pub u: f32,
}

impl LineIntersection {
    fn none(is_parallel: bool, is_collinear: bool) -> Self {
        LineIntersection { point: None, is_parallel, is_collinear, t: 0.0, u: 0.0 }
    }
}

pub fn line_intersection(a1: Vec2, a2: Vec2, b1: Vec2, b2: Vec2, tol: &Tolerance) -> LineIntersection {
    let r = a2 - a1;
    let s = b2 - b1;
    let rxs = r.cross(s);

    if rxs.abs() <= EPS_DENOM {
        let collinear = orientation(a1, a2, b1, tol) == Orientation::Collinear
            && orientation(a1, a2, b2, tol) == Orientation::Collinear;
        return LineIntersection::none(true, collinear);
    }

    let qp = b1 - a1;
    let t = safe_div(qp.cross(s), rxs, f32::NAN);
    let u = safe_div(qp.cross(r), rxs, f32::NAN);
    let eps = tol.position;
    if t >= -eps && t <= 1.0 + eps && u >= -eps && u <= 1.0 + eps {
        LineIntersection { point: Some(a1 + r * t), is_parallel: false, is_collinear: false, t, u }
    } else {
        LineIntersection { point: None, is_parallel: false, is_collinear: false, t, u }
    }
}
