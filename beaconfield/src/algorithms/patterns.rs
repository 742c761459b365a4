//! Regular-polygon detection over a beacon snapshot.
//!
//! Every beacon pair whose distance is a plausible edge length seeds one candidate
//! polygon per enabled kind and winding. Candidate vertices are matched against the
//! spatial hash; fully matched convex polygons become [`Pattern`]s and sufficiently
//! matched ones become [`IncompletePattern`]s with a suggestion per missing vertex.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::algorithms::spatial_hash::SpatialHash;
use crate::config::PatternConfig;
use crate::error::{AnalysisError, InputFault};
use crate::geometry::limits::{in_coord_bounds, MAX_BEACONS};
use crate::geometry::polygon::{area, centroid, is_convex, regular_polygon_on_edge, signed_area};
use crate::geometry::tolerance::{quantize, EPS_AREA};
use crate::model::{
    Beacon, BeaconId, Bounds, IncompletePattern, Pattern, PatternCompletionAnalysis, PatternId, PatternKind,
    PatternSuggestion, Vec2, Viewport,
};

#[cfg(feature = "analysis_prof")]
use std::time::Instant;

/// Stable id from the kind and the sorted member ids (FNV-1a).
pub fn pattern_id(kind: PatternKind, sorted_ids: &[BeaconId]) -> PatternId {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut feed = |b: u8| {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    };
    feed(kind.sides() as u8);
    for id in sorted_ids {
        for b in id.to_le_bytes() {
            feed(b);
        }
    }
    hash
}

// kind, sorted existing ids, quantized missing positions
type IncompleteKey = (PatternKind, Vec<BeaconId>, Vec<(i32, i32)>);

struct Candidate {
    kind: PatternKind,
    matched: Vec<Option<BeaconId>>,
    vertices: Vec<Vec2>,
}

#[derive(Clone, Debug)]
pub struct PatternAnalyzer {
    config: PatternConfig,
}

impl PatternAnalyzer {
    pub fn new(config: PatternConfig) -> Self {
        PatternAnalyzer { config }
    }

    pub fn config(&self) -> &PatternConfig {
        &self.config
    }

    /// Reject snapshots the detector cannot reason about. Errors carry request 0;
    /// the scheduler retags them.
    pub fn validate(&self, beacons: &[Beacon], viewport: Option<&Viewport>) -> Result<(), AnalysisError> {
        let fault = |reason| AnalysisError::InvalidInput { request: 0, reason };
        if beacons.len() > MAX_BEACONS {
            return Err(fault(InputFault::TooMany(beacons.len())));
        }
        if let Some(v) = viewport {
            if !v.bounds.is_finite() {
                return Err(fault(InputFault::BadViewport));
            }
        }
        let mut seen = HashSet::with_capacity(beacons.len());
        for b in beacons {
            if !in_coord_bounds(b.x) || !in_coord_bounds(b.y) {
                return Err(fault(InputFault::BadCoordinate(b.id)));
            }
            if !seen.insert(b.id) {
                return Err(fault(InputFault::DuplicateId(b.id)));
            }
        }
        Ok(())
    }

    /// Detect complete and incomplete patterns. `index` must already hold exactly
    /// `beacons`; ids it returns that are missing from the snapshot are ignored.
    pub fn analyze(
        &self,
        index: &mut SpatialHash,
        beacons: &[Beacon],
        viewport: Option<&Viewport>,
    ) -> Result<PatternCompletionAnalysis, AnalysisError> {
        self.validate(beacons, viewport)?;
        #[cfg(feature = "analysis_prof")]
        let t_all = Instant::now();

        let positions: HashMap<BeaconId, Vec2> = beacons.iter().map(|b| (b.id, b.pos())).collect();
        let mut seeds: Vec<&Beacon> = beacons
            .iter()
            .filter(|b| viewport.map_or(true, |v| v.bounds.contains(b.pos())))
            .collect();
        seeds.sort_by_key(|b| b.id);

        let mut complete: HashMap<PatternId, Pattern> = HashMap::new();
        let mut incomplete: HashMap<IncompleteKey, IncompletePattern> = HashMap::new();
        let mut seen_pairs: HashSet<(BeaconId, BeaconId)> = HashSet::new();
        let (lo, hi) = (self.config.min_edge_length, self.config.max_edge_length);

        for a in &seeds {
            let pa = a.pos();
            let near = index.query_bounds(&Bounds::around(pa, hi));
            for &bid in &near.entities {
                if bid == a.id {
                    continue;
                }
                let pair = (a.id.min(bid), a.id.max(bid));
                if !seen_pairs.insert(pair) {
                    continue;
                }
                let pb = match positions.get(&bid) {
                    Some(p) => *p,
                    None => continue,
                };
                let d = pa.distance(pb);
                if d < lo || d > hi {
                    continue;
                }
                for &kind in &self.config.kinds {
                    for ccw in [true, false] {
                        let cand = self.build_candidate(index, &positions, (a.id, pa), (bid, pb), kind, ccw)?;
                        self.classify(cand, &positions, &mut complete, &mut incomplete);
                    }
                }
            }
        }
        #[cfg(feature = "analysis_prof")]
        let detect_ms = t_all.elapsed().as_secs_f64() * 1000.0;

        let reference = match viewport {
            Some(v) => v.bounds.center(),
            None => {
                let pts: Vec<Vec2> = beacons.iter().map(|b| b.pos()).collect();
                centroid(&pts)
            }
        };
        let out = self.assemble(complete, incomplete, viewport, reference);
        #[cfg(feature = "analysis_prof")]
        debug!(
            detect_ms,
            total_ms = t_all.elapsed().as_secs_f64() * 1000.0,
            seeds = seeds.len(),
            "analysis timing"
        );
        debug!(
            complete = out.complete_patterns.len(),
            incomplete = out.incomplete_patterns.len(),
            suggestions = out.suggested_positions.len(),
            "analysis finished"
        );
        Ok(out)
    }

    fn build_candidate(
        &self,
        index: &mut SpatialHash,
        positions: &HashMap<BeaconId, Vec2>,
        a: (BeaconId, Vec2),
        b: (BeaconId, Vec2),
        kind: PatternKind,
        ccw: bool,
    ) -> Result<Candidate, AnalysisError> {
        let vertices = regular_polygon_on_edge(a.1, b.1, kind.sides(), ccw);
        if let Some(bad) = vertices.iter().find(|v| !v.is_finite()) {
            return Err(AnalysisError::Geometry {
                request: 0,
                detail: format!("non-finite vertex {:?} for {:?} on edge {}-{}", bad, kind, a.0, b.0),
            });
        }
        let mut matched = vec![Some(a.0), Some(b.0)];
        for v in &vertices[2..] {
            let hit = self.nearest_within(index, positions, *v, &matched);
            matched.push(hit);
        }
        Ok(Candidate { kind, matched, vertices })
    }

    // Nearest beacon to `v` within vertex tolerance, skipping ids already used.
    fn nearest_within(
        &self,
        index: &mut SpatialHash,
        positions: &HashMap<BeaconId, Vec2>,
        v: Vec2,
        taken: &[Option<BeaconId>],
    ) -> Option<BeaconId> {
        let tol = self.config.vertex_tolerance;
        let near = index.query_bounds(&Bounds::around(v, tol));
        let mut best: Option<(f32, BeaconId)> = None;
        for &id in &near.entities {
            if taken.contains(&Some(id)) {
                continue;
            }
            let Some(p) = positions.get(&id) else { continue };
            let d = p.distance(v);
            if d > tol {
                continue;
            }
            let better = match best {
                None => true,
                Some((bd, bid)) => d < bd || (d == bd && id < bid),
            };
            if better {
                best = Some((d, id));
            }
        }
        best.map(|(_, id)| id)
    }

    fn classify(
        &self,
        cand: Candidate,
        positions: &HashMap<BeaconId, Vec2>,
        complete: &mut HashMap<PatternId, Pattern>,
        incomplete: &mut HashMap<IncompleteKey, IncompletePattern>,
    ) {
        let n = cand.vertices.len();
        let hits: Vec<BeaconId> = cand.matched.iter().flatten().copied().collect();
        if hits.len() == n {
            let mut actual: Vec<Vec2> = hits.iter().filter_map(|id| positions.get(id).copied()).collect();
            if actual.len() != n || !is_convex(&actual, &self.config.tolerance) || area(&actual) <= EPS_AREA {
                return;
            }
            if signed_area(&actual) < 0.0 {
                actual.reverse();
            }
            let mut ids = hits;
            ids.sort_unstable();
            let id = pattern_id(cand.kind, &ids);
            complete.entry(id).or_insert_with(|| {
                trace!(id, kind = ?cand.kind, "complete pattern");
                Pattern {
                    id,
                    kind: cand.kind,
                    beacons: ids,
                    centroid: centroid(&actual),
                    area: area(&actual),
                    vertices: actual,
                }
            });
            return;
        }

        let completion = hits.len() as f32 / n as f32;
        if completion < self.config.min_completion {
            return;
        }
        let missing: Vec<Vec2> = cand
            .matched
            .iter()
            .zip(&cand.vertices)
            .filter(|(m, _)| m.is_none())
            .map(|(_, v)| *v)
            .collect();
        let mut ids = hits;
        ids.sort_unstable();
        let step = self.config.vertex_tolerance;
        let mut qmissing: Vec<(i32, i32)> = missing.iter().map(|p| (quantize(p.x, step), quantize(p.y, step))).collect();
        qmissing.sort_unstable();
        incomplete.entry((cand.kind, ids.clone(), qmissing)).or_insert(IncompletePattern {
            kind: cand.kind,
            existing: ids,
            missing,
            completion,
            potential_bonus: cand.kind.bonus(),
        });
    }

    fn priority(&self, kind: PatternKind, completion: f32, target: Vec2, reference: Vec2) -> f32 {
        let d = target.distance(reference);
        let proximity = 1.0 / (1.0 + d / self.config.max_edge_length.max(f32::EPSILON));
        0.5 * kind.bonus() / PatternKind::max_bonus() + 0.3 * completion + 0.2 * proximity
    }

    fn assemble(
        &self,
        complete: HashMap<PatternId, Pattern>,
        incomplete: HashMap<IncompleteKey, IncompletePattern>,
        viewport: Option<&Viewport>,
        reference: Vec2,
    ) -> PatternCompletionAnalysis {
        let placeable = |p: &Vec2| {
            in_coord_bounds(p.x) && in_coord_bounds(p.y) && viewport.map_or(true, |v| v.bounds.contains(*p))
        };
        let mut incomplete_patterns: Vec<IncompletePattern> = incomplete
            .into_values()
            .filter_map(|mut ip| {
                ip.missing.retain(|p| placeable(p));
                (!ip.missing.is_empty()).then_some(ip)
            })
            .collect();
        incomplete_patterns.sort_by(|a, b| {
            b.completion
                .total_cmp(&a.completion)
                .then(b.potential_bonus.total_cmp(&a.potential_bonus))
                .then(a.kind.cmp(&b.kind))
                .then_with(|| a.existing.cmp(&b.existing))
        });

        let step = self.config.vertex_tolerance;
        let mut merged: HashMap<(i32, i32), PatternSuggestion> = HashMap::new();
        for ip in &incomplete_patterns {
            for target in &ip.missing {
                let s = PatternSuggestion {
                    target: *target,
                    kind: ip.kind,
                    uses: ip.existing.clone(),
                    completion: ip.completion,
                    potential_bonus: ip.potential_bonus,
                    priority: self.priority(ip.kind, ip.completion, *target, reference),
                };
                let key = (quantize(target.x, step), quantize(target.y, step));
                let replace = merged.get(&key).map_or(true, |cur| suggestion_order(&s, cur) == Ordering::Less);
                if replace {
                    merged.insert(key, s);
                }
            }
        }
        let mut suggested_positions: Vec<PatternSuggestion> = merged.into_values().collect();
        suggested_positions.sort_by(suggestion_order);
        suggested_positions.truncate(self.config.max_suggestions);

        let mut complete_patterns: Vec<Pattern> = complete.into_values().collect();
        complete_patterns.sort_by_key(|p| p.id);

        let total_potential_bonus = incomplete_patterns.iter().map(|p| p.potential_bonus).sum();
        let average_completion_cost = if incomplete_patterns.is_empty() {
            0.0
        } else {
            incomplete_patterns.iter().map(|p| p.missing.len() as f32).sum::<f32>() / incomplete_patterns.len() as f32
        };
        PatternCompletionAnalysis {
            optimal_next_placement: suggested_positions.first().cloned(),
            incomplete_patterns,
            suggested_positions,
            total_potential_bonus,
            average_completion_cost,
            complete_patterns,
        }
    }
}

// Highest priority first; ties broken by position then kind so output is deterministic.
fn suggestion_order(a: &PatternSuggestion, b: &PatternSuggestion) -> Ordering {
    b.priority
        .total_cmp(&a.priority)
        .then(a.target.x.total_cmp(&b.target.x))
        .then(a.target.y.total_cmp(&b.target.y))
        .then(a.kind.cmp(&b.kind))
}
