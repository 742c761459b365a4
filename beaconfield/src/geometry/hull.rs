use std::cmp::Ordering;

use super::math::{orientation, Orientation};
use super::tolerance::Tolerance;
use crate::model::Vec2;

/// Graham scan. Returns the hull counter-clockwise starting at the lowest
/// (then leftmost) point; collinear boundary points are dropped.
/// Inputs with 3 or fewer points are returned as given.
pub fn convex_hull(points: &[Vec2], tol: &Tolerance) -> Vec<Vec2> {
    if points.len() <= 3 {
        return points.to_vec();
    }

    let pivot_ix = points
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let pivot = points[pivot_ix];

    let mut rest: Vec<(f32, f32, Vec2)> = points
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != pivot_ix)
        .map(|(_, p)| {
            let d = *p - pivot;
            (d.y.atan2(d.x), d.length_sq(), *p)
        })
        .collect();
    rest.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)).then(cmp_point(&a.2, &b.2)));

    // Angles within tolerance of a run's first angle count as ties: order the run by distance.
    let mut start = 0;
    while start < rest.len() {
        let base = rest[start].0;
        let mut end = start + 1;
        while end < rest.len() && (rest[end].0 - base).abs() <= tol.angle {
            end += 1;
        }
        if end - start > 1 {
            rest[start..end].sort_by(|a, b| a.1.total_cmp(&b.1).then(cmp_point(&a.2, &b.2)));
        }
        start = end;
    }

    let mut hull: Vec<Vec2> = Vec::with_capacity(points.len());
    hull.push(pivot);
    for &(_, _, p) in &rest {
        while hull.len() >= 2
            && orientation(hull[hull.len() - 2], hull[hull.len() - 1], p, tol) != Orientation::CounterClockwise
        {
            hull.pop();
        }
        hull.push(p);
    }
    // A point that coincides with the pivot can survive at position 1 when nothing else turns.
    hull.dedup_by(|a, b| a == b);
    hull
}

fn cmp_point(a: &Vec2, b: &Vec2) -> Ordering {
    a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::polygon::{point_in_polygon, signed_area};

    #[test]
    fn small_inputs_pass_through() {
        let tol = Tolerance::default();
        let pts = vec![Vec2::new(1.0, 1.0), Vec2::new(0.0, 0.0), Vec2::new(2.0, 0.0)];
        assert_eq!(convex_hull(&pts, &tol), pts);
        assert!(convex_hull(&[], &tol).is_empty());
    }

    #[test]
    fn square_with_interior_and_edge_points() {
        let tol = Tolerance::default();
        let pts = vec![
            Vec2::new(1.0, 1.0), Vec2::new(0.0, 0.0), Vec2::new(2.0, 2.0), Vec2::new(2.0, 0.0),
            Vec2::new(0.0, 2.0), Vec2::new(1.0, 0.0), Vec2::new(0.5, 1.5),
        ];
        let hull = convex_hull(&pts, &tol);
        assert_eq!(
            hull,
            vec![Vec2::new(0.0, 0.0), Vec2::new(2.0, 0.0), Vec2::new(2.0, 2.0), Vec2::new(0.0, 2.0)]
        );
        assert!(signed_area(&hull) > 0.0);
        for p in &pts {
            assert!(point_in_polygon(*p, &hull, &tol).inside);
        }
    }

    #[test]
    fn duplicate_pivot_is_dropped() {
        let tol = Tolerance::default();
        let pts = vec![
            Vec2::new(0.0, 0.0), Vec2::new(0.0, 0.0), Vec2::new(3.0, 0.0), Vec2::new(0.0, 3.0),
        ];
        let hull = convex_hull(&pts, &tol);
        assert_eq!(hull.len(), 3);
    }
}
