pub mod clock;
pub mod config;
pub mod error;
pub mod model;
pub mod geometry {
    pub mod hull;
    pub mod intersect;
    pub mod limits;
    pub mod math;
    pub mod polygon;
    pub mod tolerance;
}
pub mod algorithms {
    pub mod morton;
    pub mod pattern_cache;
    pub mod patterns;
    pub mod scheduler;
    pub mod spatial_hash;
}

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::{debug, trace};

use algorithms::pattern_cache::{CacheStatistics, PatternCache, RegionKey};
use algorithms::patterns::PatternAnalyzer;
use algorithms::scheduler::{AnalysisScheduler, AnalysisTicket, DeliveryOutcome, SchedulerState};
use algorithms::spatial_hash::{IndexMetrics, SpatialHash};
use geometry::limits::{in_coord_bounds, MAX_BEACONS};
use geometry::polygon::point_in_polygon;
use geometry::tolerance::EPS_POS;

pub use clock::{Clock, IdleSignal, ManualClock, SystemClock};
pub use config::{FieldConfig, NeighborQueryConfig, PerformanceTier};
pub use error::{AnalysisError, ConfigError, InputFault};
pub use model::{
    Beacon, BeaconId, Bounds, NeighborQueryResult, Pattern, PatternCompletionAnalysis, PatternKind,
    SpatialQueryResult, Vec2, Viewport,
};

// A request handed to the scheduler together with what is needed to cache its result.
struct InFlight {
    ticket: AnalysisTicket,
    regions: Vec<RegionKey>,
    geom_ver: u64,
}

/// Live beacon set with its spatial index, pattern cache and analysis scheduler.
///
/// Every mutation goes through here so the index and the cache never drift from
/// the beacon map. Analyses run on a separate index rebuilt from the request's
/// snapshot, leaving the live one untouched.
pub struct Field {
    config: FieldConfig,
    beacons: HashMap<BeaconId, Beacon>,
    index: SpatialHash,
    analysis_index: SpatialHash,
    cache: PatternCache,
    scheduler: AnalysisScheduler,
    analyzer: PatternAnalyzer,
    in_flight: Option<InFlight>,
    last_analysis: Option<PatternCompletionAnalysis>,
    last_error: Option<AnalysisError>,
    geom_ver: u64,
}

impl Default for Field {
    fn default() -> Self {
        Field::with_default_config(Rc::new(SystemClock::new()))
    }
}

impl Field {
    pub fn new(config: FieldConfig) -> Result<Self, ConfigError> {
        Field::with_clock(config, Rc::new(SystemClock::new()))
    }

    pub fn with_clock(config: FieldConfig, clock: Rc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Field::build(config, clock))
    }

    /// Default configuration over an injected clock. The defaults always validate.
    pub fn with_default_config(clock: Rc<dyn Clock>) -> Self {
        Field::build(FieldConfig::default(), clock)
    }

    fn build(config: FieldConfig, clock: Rc<dyn Clock>) -> Self {
        Field {
            index: SpatialHash::new(config.hash.clone(), clock.clone()),
            analysis_index: SpatialHash::new(config.hash.clone(), clock.clone()),
            cache: PatternCache::new(config.cache.clone(), clock.clone()),
            scheduler: AnalysisScheduler::new(config.scheduler, clock),
            analyzer: PatternAnalyzer::new(config.patterns.clone()),
            beacons: HashMap::new(),
            in_flight: None,
            last_analysis: None,
            last_error: None,
            geom_ver: 1,
            config,
        }
    }

    pub fn config(&self) -> &FieldConfig {
        &self.config
    }
    pub fn geom_version(&self) -> u64 {
        self.geom_ver
    }

    fn bump(&mut self) {
        self.geom_ver = self.geom_ver.wrapping_add(1);
    }

    // A staged cell size is applied right away so the live grid stays uniform.
    fn apply_staged_cell_size(&mut self) {
        if self.index.needs_rebuild() {
            self.index.rebuild(self.beacons.values());
            debug!(cell_size = self.index.cell_size(), beacons = self.beacons.len(), "index rebuilt");
        }
    }

    /// Insert a beacon, or reposition it when the id is already known. Rejects
    /// out-of-range coordinates and new ids beyond the ingestion cap.
    pub fn add_beacon(&mut self, beacon: Beacon) -> bool {
        if !in_coord_bounds(beacon.x) || !in_coord_bounds(beacon.y) {
            return false;
        }
        let old = self.beacons.get(&beacon.id).map(|b| b.pos());
        if old.is_none() && self.beacons.len() >= MAX_BEACONS {
            return false;
        }
        self.beacons.insert(beacon.id, beacon);
        self.index.add_beacon(&beacon);
        self.cache.invalidate_by_beacon_change(beacon.pos(), old);
        self.apply_staged_cell_size();
        self.bump();
        true
    }

    pub fn move_beacon(&mut self, id: BeaconId, x: f32, y: f32) -> bool {
        if !in_coord_bounds(x) || !in_coord_bounds(y) {
            return false;
        }
        let b = match self.beacons.get_mut(&id) {
            Some(b) => b,
            None => return false,
        };
        let old = b.pos();
        if old.distance_sq(Vec2::new(x, y)) <= EPS_POS * EPS_POS {
            return true;
        }
        b.x = x;
        b.y = y;
        let moved = *b;
        self.index.add_beacon(&moved);
        self.cache.invalidate_by_beacon_change(moved.pos(), Some(old));
        self.apply_staged_cell_size();
        self.bump();
        true
    }

    pub fn remove_beacon(&mut self, id: BeaconId) -> bool {
        let b = match self.beacons.remove(&id) {
            Some(b) => b,
            None => return false,
        };
        self.index.remove_beacon(id);
        self.cache.invalidate_by_beacon_change(b.pos(), None);
        self.bump();
        true
    }

    pub fn beacon(&self, id: BeaconId) -> Option<&Beacon> {
        self.beacons.get(&id)
    }

    pub fn beacon_count(&self) -> usize {
        self.beacons.len()
    }

    /// Beacons sorted by id.
    pub fn beacons(&self) -> Vec<Beacon> {
        let mut v: Vec<Beacon> = self.beacons.values().copied().collect();
        v.sort_by_key(|b| b.id);
        v
    }

    pub fn clear(&mut self) {
        self.beacons.clear();
        self.index.clear();
        self.cache.clear();
        self.cancel_analysis();
        self.bump();
    }

    /// Beacons within `query.radius` of `pos` (defaults from the config when
    /// `None`), closest first when sorting is enabled.
    pub fn find_neighbors(&mut self, pos: Vec2, query: Option<&NeighborQueryConfig>) -> Vec<NeighborQueryResult> {
        let q = query.copied().unwrap_or(self.config.neighbors);
        // the broad phase must not cap; the cap applies after the exact filter
        let broad = self.index.find_neighbors(pos, &NeighborQueryConfig { max_results: 0, ..q });
        let mut out: Vec<NeighborQueryResult> = broad
            .entities
            .iter()
            .filter_map(|id| {
                let b = self.beacons.get(id)?;
                let delta = b.pos() - pos;
                let distance = delta.length();
                if distance > q.radius {
                    return None;
                }
                Some(NeighborQueryResult {
                    beacon: *b,
                    distance,
                    direction: delta.normalize(),
                    cell_id: self.index.cell_of(b.id)?,
                })
            })
            .collect();
        if q.sort_by_distance {
            out.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.beacon.id.cmp(&b.beacon.id)));
        }
        if q.max_results > 0 {
            out.truncate(q.max_results);
        }
        out
    }

    /// Beacons inside `rect`, with the broad-phase counters of the underlying query.
    pub fn query_bounds(&mut self, rect: &Bounds) -> SpatialQueryResult {
        let mut r = self.index.query_bounds(rect);
        let beacons = &self.beacons;
        r.entities.retain(|id| beacons.get(id).map_or(false, |b| rect.contains(b.pos())));
        r
    }

    /// Queue a completion analysis of the current beacons. The cooldown defaults to
    /// the scheduler config.
    pub fn request_analysis(&mut self, viewport: Option<Viewport>, cooldown_ms: Option<f64>) -> AnalysisTicket {
        let snapshot = self.beacons();
        let mut regions: Vec<RegionKey> = snapshot
            .iter()
            .filter(|b| viewport.map_or(true, |v| v.bounds.contains(b.pos())))
            .map(|b| self.cache.region_key(b.pos()))
            .collect();
        regions.sort_unstable();
        regions.dedup();
        let cooldown = cooldown_ms.unwrap_or(self.config.scheduler.cooldown_ms);
        let ticket = self.scheduler.analyze_async(snapshot, viewport, cooldown);
        self.in_flight = ticket.request().map(|_| InFlight { ticket: ticket.clone(), regions, geom_ver: self.geom_ver });
        ticket
    }

    /// One host frame. Runs cache maintenance and steps the scheduler; a completed
    /// analysis is recorded and its patterns cached when the beacons have not
    /// changed since the request.
    pub fn tick(&mut self, idle: &dyn IdleSignal) -> Option<DeliveryOutcome> {
        self.cache.maintain();
        let outcome = self.scheduler.poll(&mut self.analysis_index, &self.analyzer, idle)?;
        if outcome != DeliveryOutcome::Completed {
            return Some(outcome);
        }
        let done = self.scheduler.last_outcome().map(|(id, _)| id);
        let Some(flight) = self.in_flight.take() else { return Some(outcome) };
        if flight.ticket.request() != done {
            self.in_flight = Some(flight);
            return Some(outcome);
        }
        match flight.ticket.result() {
            Some(Ok(analysis)) => {
                if flight.geom_ver == self.geom_ver {
                    self.store_patterns(&analysis, &flight.regions);
                } else {
                    trace!(request = ?done, "beacons changed during analysis; result not cached");
                }
                self.last_analysis = Some(analysis);
                self.last_error = None;
            }
            Some(Err(e)) => self.last_error = Some(e),
            None => {}
        }
        Some(outcome)
    }

    fn store_patterns(&mut self, analysis: &PatternCompletionAnalysis, scanned: &[RegionKey]) {
        let mut by_region: HashMap<RegionKey, Vec<Pattern>> = scanned.iter().map(|k| (*k, Vec::new())).collect();
        for p in &analysis.complete_patterns {
            by_region.entry(self.cache.region_key(p.centroid)).or_default().push(p.clone());
        }
        for (key, patterns) in by_region {
            let bounds = self.cache.region_bounds(key);
            self.cache.set_region_patterns(key, patterns, bounds);
        }
    }

    pub fn cancel_analysis(&mut self) {
        self.scheduler.cancel_pending();
        self.in_flight = None;
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn last_analysis(&self) -> Option<&PatternCompletionAnalysis> {
        self.last_analysis.as_ref()
    }

    pub fn last_error(&self) -> Option<&AnalysisError> {
        self.last_error.as_ref()
    }

    /// Cached patterns of the region containing `p`, if that entry is valid.
    pub fn region_patterns(&mut self, p: Vec2) -> Option<Vec<Pattern>> {
        let key = self.cache.region_key(p);
        self.cache.get_region_patterns(key).map(|ps| ps.to_vec())
    }

    /// Cached patterns whose polygon contains `p` (boundary included). Patterns
    /// are filed under their centroid's region, so the surrounding block is searched.
    pub fn patterns_at(&mut self, p: Vec2) -> Vec<Pattern> {
        if !p.is_finite() {
            return Vec::new();
        }
        let tol = self.config.patterns.tolerance;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for key in self.cache.region_key(p).neighborhood() {
            if let Some(ps) = self.cache.get_region_patterns(key) {
                for pat in ps {
                    if seen.insert(pat.id) && point_in_polygon(p, &pat.vertices, &tol).inside {
                        out.push(pat.clone());
                    }
                }
            }
        }
        out.sort_by_key(|p| p.id);
        out
    }

    pub fn compact_cache(&mut self) -> usize {
        self.cache.compact()
    }

    pub fn index_metrics(&self) -> IndexMetrics {
        self.index.metrics()
    }

    pub fn cache_statistics(&self) -> CacheStatistics {
        self.cache.statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InvalidationStrategy;

    fn field() -> (Field, Rc<ManualClock>) {
        let clock = ManualClock::new(0.0);
        let mut cfg = FieldConfig::default();
        cfg.scheduler.frame_gaps = 0;
        (Field::with_clock(cfg, clock.clone()).unwrap(), clock)
    }

    fn add_triangle(f: &mut Field, id0: BeaconId, x: f32, y: f32) {
        let h = 50.0 * 3f32.sqrt() / 2.0;
        f.add_beacon(Beacon::new(id0, x, y));
        f.add_beacon(Beacon::new(id0 + 1, x + 50.0, y));
        f.add_beacon(Beacon::new(id0 + 2, x + 25.0, y + h));
    }

    fn run_analysis(f: &mut Field, clock: &ManualClock) {
        let t = f.request_analysis(None, Some(0.0));
        clock.advance(1.0);
        assert_eq!(f.tick(&true), Some(DeliveryOutcome::Completed));
        assert!(t.is_settled());
    }

    #[test]
    fn rejects_invalid_beacons() {
        let (mut f, _) = field();
        assert!(!f.add_beacon(Beacon::new(1, f32::NAN, 0.0)));
        assert!(!f.add_beacon(Beacon::new(1, 1e9, 0.0)));
        assert!(f.add_beacon(Beacon::new(1, 1.0, 1.0)));
        assert!(!f.move_beacon(1, f32::INFINITY, 0.0));
        assert!(!f.move_beacon(2, 0.0, 0.0));
        assert!(!f.remove_beacon(2));
        assert_eq!(f.beacon_count(), 1);
    }

    #[test]
    fn re_adding_an_id_moves_it() {
        let (mut f, _) = field();
        f.add_beacon(Beacon::new(1, 0.0, 0.0));
        f.add_beacon(Beacon::new(1, 500.0, 500.0));
        assert_eq!(f.beacon_count(), 1);
        assert_eq!(f.index_metrics().beacon_count, 1);
        let r = f.query_bounds(&Bounds::new(490.0, 490.0, 510.0, 510.0));
        assert_eq!(r.entities, vec![1]);
        assert!(f.query_bounds(&Bounds::new(-5.0, -5.0, 5.0, 5.0)).entities.is_empty());
    }

    #[test]
    fn neighbors_are_exact_and_sorted() {
        let (mut f, _) = field();
        f.add_beacon(Beacon::new(1, 0.0, 0.0));
        f.add_beacon(Beacon::new(2, 30.0, 0.0));
        f.add_beacon(Beacon::new(3, 0.0, 10.0));
        f.add_beacon(Beacon::new(4, 95.0, 0.0)); // same broad-phase block, outside radius
        let q = NeighborQueryConfig { radius: 40.0, max_results: 0, sort_by_distance: true };
        let n = f.find_neighbors(Vec2::new(0.0, 0.0), Some(&q));
        let ids: Vec<BeaconId> = n.iter().map(|r| r.beacon.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
        assert_eq!(n[0].distance, 0.0);
        assert_eq!(n[0].direction, Vec2::ZERO);
        assert_eq!(n[2].direction, Vec2::new(1.0, 0.0));
        let capped = f.find_neighbors(Vec2::new(0.0, 0.0), Some(&NeighborQueryConfig { max_results: 2, ..q }));
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn analysis_results_land_in_the_cache() {
        let (mut f, clock) = field();
        add_triangle(&mut f, 1, 0.0, 0.0);
        run_analysis(&mut f, &clock);
        let a = f.last_analysis().unwrap();
        assert_eq!(a.complete_patterns.len(), 1);
        let inside = f.patterns_at(Vec2::new(25.0, 10.0));
        assert_eq!(inside.len(), 1);
        assert_eq!(inside[0].kind, PatternKind::Triangle);
        assert!(f.patterns_at(Vec2::new(-30.0, -30.0)).is_empty());
        assert_eq!(f.region_patterns(Vec2::new(10.0, 10.0)).map(|p| p.len()), Some(1));
    }

    #[test]
    fn moving_a_member_invalidates_its_region() {
        let (mut f, clock) = field();
        assert_eq!(f.config().cache.strategy, InvalidationStrategy::Immediate);
        add_triangle(&mut f, 1, 0.0, 0.0);
        run_analysis(&mut f, &clock);
        assert!(f.region_patterns(Vec2::new(10.0, 10.0)).is_some());
        assert!(f.move_beacon(3, 25.0, 80.0));
        assert!(f.region_patterns(Vec2::new(10.0, 10.0)).is_none());
        assert!(f.cache_statistics().invalidations >= 1);
    }

    #[test]
    fn a_burst_of_placements_delivers_the_last_request() {
        let (mut f, clock) = field();
        add_triangle(&mut f, 1, 0.0, 0.0);
        let first = f.request_analysis(None, None);
        clock.advance(50.0);
        f.add_beacon(Beacon::new(9, 2_000.0, 2_000.0));
        let second = f.request_analysis(None, None);
        assert!(second.request().is_some());
        let mut completed = 0;
        for _ in 0..20 {
            clock.advance(100.0);
            if f.tick(&true) == Some(DeliveryOutcome::Completed) {
                completed += 1;
            }
        }
        assert_eq!(completed, 1);
        assert!(!first.is_settled());
        let a = second.result().unwrap().unwrap();
        assert_eq!(a.complete_patterns.len(), 1);
        assert_eq!(f.last_analysis(), Some(&a));
    }

    #[test]
    fn stale_results_are_not_cached() {
        let (mut f, clock) = field();
        add_triangle(&mut f, 1, 0.0, 0.0);
        let _t = f.request_analysis(None, Some(0.0));
        f.add_beacon(Beacon::new(50, 3_000.0, 3_000.0));
        clock.advance(1.0);
        assert_eq!(f.tick(&true), Some(DeliveryOutcome::Completed));
        assert!(f.last_analysis().is_some());
        assert!(f.region_patterns(Vec2::new(10.0, 10.0)).is_none());
    }

    #[test]
    fn rebalancing_keeps_every_beacon_findable() {
        let clock = ManualClock::new(0.0);
        let mut cfg = FieldConfig::default();
        cfg.hash.cell_size = 200.0;
        cfg.hash.presets.fine_below = 1_000;
        cfg.hash.rebalance_interval_ms = 0.0;
        let mut f = Field::with_clock(cfg, clock.clone()).unwrap();
        for i in 0..20u32 {
            clock.advance(1.0);
            f.add_beacon(Beacon::new(i, (i * 37 % 400) as f32, (i * 53 % 400) as f32));
        }
        assert!(!f.index.needs_rebuild());
        assert_eq!(f.index_metrics().cell_size, 50.0);
        let all = f.query_bounds(&Bounds::new(-1.0, -1.0, 401.0, 401.0));
        assert_eq!(all.entities.len(), 20);
    }

    #[test]
    fn results_near_the_coordinate_limit_store_cleanly() {
        let clock = ManualClock::new(0.0);
        let mut cfg = FieldConfig::default();
        cfg.hash.cell_size = 0.001;
        cfg.hash.enable_rebalancing = false;
        cfg.cache.region_size = 0.001;
        cfg.scheduler.frame_gaps = 0;
        let mut f = Field::with_clock(cfg, clock.clone()).unwrap();
        add_triangle(&mut f, 1, 9.0e6, 0.0);
        run_analysis(&mut f, &clock);
        let key = f.cache.region_key(Vec2::new(9.0e6, 0.0));
        assert_eq!(key.x, i32::MAX);
        assert!(f.cache.region_bounds(key).is_finite());
    }

    #[test]
    fn far_neighbors_are_found_with_huge_radii() {
        let (mut f, _) = field();
        f.add_beacon(Beacon::new(1, 150_000.0, 0.0));
        let q = NeighborQueryConfig { radius: 200_000.0, max_results: 0, sort_by_distance: true };
        let n = f.find_neighbors(Vec2::new(0.0, 0.0), Some(&q));
        assert_eq!(n.len(), 1);
        assert_eq!(n[0].distance, 150_000.0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut cfg = FieldConfig::default();
        cfg.patterns.min_completion = 1.5;
        assert!(Field::new(cfg).is_err());
    }
}
