use serde::{Deserialize, Serialize};

use super::math::{orientation, seg_distance_sq, Orientation};
use super::tolerance::Tolerance;
use crate::model::Vec2;

/// Arithmetic mean of the vertices. Empty input gives the origin.
pub fn centroid(poly: &[Vec2]) -> Vec2 {
    if poly.is_empty() {
        return Vec2::ZERO;
    }
    let mut sx = 0.0f32;
    let mut sy = 0.0f32;
    for p in poly {
        sx += p.x;
        sy += p.y;
    }
    let n = poly.len() as f32;
    Vec2 { x: sx / n, y: sy / n }
}

fn shoelace(poly: &[Vec2]) -> f32 {
    let mut a = 0.0f32;
    for i in 0..poly.len() {
        let j = (i + 1) % poly.len();
        a += poly[i].x * poly[j].y - poly[j].x * poly[i].y;
    }
    0.5 * a
}

/// Unsigned area; fewer than 3 vertices is 0.
pub fn area(poly: &[Vec2]) -> f32 {
    if poly.len() < 3 {
        return 0.0;
    }
    shoelace(poly).abs()
}

/// Positive for counter-clockwise vertex order.
pub fn signed_area(poly: &[Vec2]) -> f32 {
    if poly.len() < 3 {
        return 0.0;
    }
    shoelace(poly)
}

/// All consecutive turns agree, collinear triples skipped. Fewer than 3 vertices
/// (or nothing but collinear triples) is not convex.
pub fn is_convex(poly: &[Vec2], tol: &Tolerance) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }
    let mut seen: Option<Orientation> = None;
    for i in 0..n {
        let o = orientation(poly[i], poly[(i + 1) % n], poly[(i + 2) % n], tol);
        if o == Orientation::Collinear {
            continue;
        }
        match seen {
            None => seen = Some(o),
            Some(s) if s != o => return false,
            _ => {}
        }
    }
    seen.is_some()
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointInPolygon {
    // true for interior and boundary points
    pub inside: bool,
    pub on_boundary: bool,
    pub nearest_edge_distance: f32,
}

/// Ray casting plus nearest-edge distance in a single pass over the edges.
pub fn point_in_polygon(p: Vec2, poly: &[Vec2], tol: &Tolerance) -> PointInPolygon {
    let n = poly.len();
    if n == 0 {
        return PointInPolygon { inside: false, on_boundary: false, nearest_edge_distance: f32::INFINITY };
    }
    let mut crossings = false;
    let mut best_d2 = f32::INFINITY;
    let mut j = n - 1;
    for i in 0..n {
        let (vi, vj) = (poly[i], poly[j]);
        let (d2, _) = seg_distance_sq(p, vj, vi);
        if d2 < best_d2 {
            best_d2 = d2;
        }
        if (vi.y > p.y) != (vj.y > p.y) {
            let x_at = (vj.x - vi.x) * (p.y - vi.y) / (vj.y - vi.y) + vi.x;
            if p.x < x_at {
                crossings = !crossings;
            }
        }
        j = i;
    }
    let dist = best_d2.sqrt();
    let on_boundary = dist <= tol.distance;
    PointInPolygon { inside: crossings || on_boundary, on_boundary, nearest_edge_distance: dist }
}

/// Vertices of the regular n-gon that has `a -> b` as its first edge, wound
/// counter-clockwise when `ccw` is set. Fewer than 3 sides gives just the edge.
pub fn regular_polygon_on_edge(a: Vec2, b: Vec2, sides: usize, ccw: bool) -> Vec<Vec2> {
    let mut out = Vec::with_capacity(sides.max(2));
    out.push(a);
    out.push(b);
    if sides < 3 {
        return out;
    }
    let exterior = std::f32::consts::TAU / sides as f32;
    let turn = if ccw { exterior } else { -exterior };
    let mut dir = b - a;
    let mut cur = b;
    for _ in 2..sides {
        dir = dir.rotate(turn);
        cur = cur + dir;
        out.push(cur);
    }
    out
}
