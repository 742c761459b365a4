//! Uniform grid over beacon positions, keyed by Morton-coded cell coordinates.
//!
//! The index is a broad phase: queries return every beacon in the cells they
//! touch and leave exact distance filtering to the caller. Beacons are tracked
//! by id only; the caller owns positions.
//!
//! Cell-size changes chosen by [`SpatialHash::rebalance`] are *staged* and only
//! take effect at the next [`SpatialHash::rebuild`], so the grid never mixes
//! cells computed under two different sizes.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::algorithms::morton::CellKey;
use crate::clock::Clock;
use crate::config::{NeighborQueryConfig, SpatialHashConfig};
use crate::geometry::limits::MAX_CELL_SPAN;
use crate::model::{Beacon, BeaconId, Bounds, SpatialQueryResult, Vec2};

#[derive(Clone, Debug)]
pub struct Cell {
    pub members: HashSet<BeaconId>,
    pub last_modified_ms: f64,
    // 3x3 block around this cell, filled on first neighbor query
    neighbors: Option<Vec<CellKey>>,
}

impl Cell {
    fn new(now: f64) -> Self {
        Cell { members: HashSet::new(), last_modified_ms: now, neighbors: None }
    }
}

// Inclusive cell-coordinate rectangle a cached query depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CellRange {
    x0: i64,
    y0: i64,
    x1: i64,
    y1: i64,
}

impl CellRange {
    fn contains(&self, cx: i32, cy: i32) -> bool {
        let (cx, cy) = (cx as i64, cy as i64);
        cx >= self.x0 && cx <= self.x1 && cy >= self.y0 && cy <= self.y1
    }
    fn span(&self) -> (i64, i64) {
        (self.x1 - self.x0 + 1, self.y1 - self.y0 + 1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum QueryKey {
    Neighbors { x: u32, y: u32, radius: u32, max_results: usize },
    Bounds { min_x: u32, min_y: u32, max_x: u32, max_y: u32 },
}

#[derive(Clone, Debug)]
struct CachedQuery {
    result: SpatialQueryResult,
    range: CellRange,
    created_ms: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetrics {
    pub beacon_count: usize,
    pub cell_count: usize,
    pub cell_size: f32,
    pub staged_cell_size: Option<f32>,
    pub load_factor: f32,
    pub max_beacons_per_cell: usize,
    pub average_beacons_per_cell: f32,
    pub rebalance_count: u64,
    pub query_cache_hits: u64,
    pub query_cache_misses: u64,
    pub query_cache_entries: usize,
    pub last_query_time_ms: f64,
}

pub struct SpatialHash {
    config: SpatialHashConfig,
    cell_size: f32,
    staged_cell_size: Option<f32>,
    cells: HashMap<CellKey, Cell>,
    beacon_to_cell: HashMap<BeaconId, CellKey>,
    query_cache: HashMap<QueryKey, CachedQuery>,
    clock: Rc<dyn Clock>,
    last_rebalance_ms: f64,
    rebalance_count: u64,
    cache_hits: u64,
    cache_misses: u64,
    last_query_time_ms: f64,
}

impl SpatialHash {
    pub fn new(config: SpatialHashConfig, clock: Rc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        SpatialHash {
            cell_size: config.cell_size,
            staged_cell_size: None,
            cells: HashMap::with_capacity(config.capacity),
            beacon_to_cell: HashMap::new(),
            query_cache: HashMap::new(),
            clock,
            last_rebalance_ms: now,
            rebalance_count: 0,
            cache_hits: 0,
            cache_misses: 0,
            last_query_time_ms: 0.0,
            config,
        }
    }

    pub fn cell_size(&self) -> f32 { self.cell_size }
    pub fn staged_cell_size(&self) -> Option<f32> { self.staged_cell_size }
    /// True when a rebalance picked a new cell size that a rebuild has not applied yet.
    pub fn needs_rebuild(&self) -> bool { self.staged_cell_size.is_some() }
    pub fn len(&self) -> usize { self.beacon_to_cell.len() }
    pub fn is_empty(&self) -> bool { self.beacon_to_cell.is_empty() }
    pub fn cell_count(&self) -> usize { self.cells.len() }
    pub fn contains(&self, id: BeaconId) -> bool { self.beacon_to_cell.contains_key(&id) }
    pub fn cell_of(&self, id: BeaconId) -> Option<CellKey> { self.beacon_to_cell.get(&id).copied() }

    pub fn cells(&self) -> impl Iterator<Item = (CellKey, &HashSet<BeaconId>)> + '_ {
        self.cells.iter().map(|(k, c)| (*k, &c.members))
    }

    pub fn cell(&self, key: CellKey) -> Option<&Cell> {
        self.cells.get(&key)
    }

    #[inline]
    fn coord(&self, v: f32) -> i32 {
        // `as` saturates, so far-out coordinates pile into the edge cells instead of wrapping
        (v / self.cell_size).floor() as i32
    }

    pub fn key_for(&self, p: Vec2) -> CellKey {
        CellKey::from_coords(self.coord(p.x), self.coord(p.y))
    }

    /// Insert or move a beacon. Returns false (and leaves the index untouched) for
    /// non-finite positions.
    pub fn add_beacon(&mut self, beacon: &Beacon) -> bool {
        if !beacon.x.is_finite() || !beacon.y.is_finite() {
            return false;
        }
        let now = self.clock.now_ms();
        let key = self.key_for(beacon.pos());
        if let Some(old) = self.beacon_to_cell.get(&beacon.id).copied() {
            if old == key {
                if let Some(cell) = self.cells.get_mut(&key) {
                    cell.last_modified_ms = now;
                }
                return true;
            }
            self.remove_beacon(beacon.id);
        }
        let cell = self.cells.entry(key).or_insert_with(|| Cell::new(now));
        cell.members.insert(beacon.id);
        cell.last_modified_ms = now;
        let population = cell.members.len();
        self.beacon_to_cell.insert(beacon.id, key);
        self.invalidate_queries_touching(key);
        self.check_rebalance(population);
        true
    }

    pub fn remove_beacon(&mut self, id: BeaconId) -> bool {
        let Some(key) = self.beacon_to_cell.remove(&id) else {
            return false;
        };
        let now = self.clock.now_ms();
        let emptied = match self.cells.get_mut(&key) {
            Some(cell) => {
                cell.members.remove(&id);
                cell.last_modified_ms = now;
                cell.members.is_empty()
            }
            None => false,
        };
        if emptied {
            self.cells.remove(&key);
        }
        self.invalidate_queries_touching(key);
        true
    }

    /// Drop everything and reinsert `beacons`, applying any staged cell size first.
    pub fn rebuild<'a>(&mut self, beacons: impl IntoIterator<Item = &'a Beacon>) {
        if let Some(size) = self.staged_cell_size.take() {
            debug!(from = self.cell_size, to = size, "spatial hash applying staged cell size");
            self.cell_size = size;
        }
        self.cells.clear();
        self.beacon_to_cell.clear();
        self.query_cache.clear();
        let now = self.clock.now_ms();
        for b in beacons {
            if !b.x.is_finite() || !b.y.is_finite() {
                continue;
            }
            let key = self.key_for(b.pos());
            if let Some(old) = self.beacon_to_cell.insert(b.id, key) {
                // later duplicates of an id win, as with add_beacon
                if old != key {
                    let emptied = self.cells.get_mut(&old).map_or(false, |c| {
                        c.members.remove(&b.id);
                        c.members.is_empty()
                    });
                    if emptied {
                        self.cells.remove(&old);
                    }
                }
            }
            let cell = self.cells.entry(key).or_insert_with(|| Cell::new(now));
            cell.members.insert(b.id);
        }
        trace!(beacons = self.beacon_to_cell.len(), cells = self.cells.len(), "spatial hash rebuilt");
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.beacon_to_cell.clear();
        self.query_cache.clear();
    }

    fn check_rebalance(&mut self, touched_population: usize) {
        if !self.config.enable_rebalancing {
            return;
        }
        let load = self.load_factor();
        let dense = touched_population > self.config.max_beacons_per_cell;
        let due = self.clock.now_ms() - self.last_rebalance_ms >= self.config.rebalance_interval_ms;
        if load > self.config.max_load_factor || dense || due {
            trace!(load, dense, due, "spatial hash rebalance triggered");
            self.rebalance();
        }
    }

    /// Pick the preset cell size for the current population. A changed size is
    /// staged for the next rebuild and all cached query results are dropped.
    /// Returns the staged size, if any. Calling this repeatedly is harmless.
    pub fn rebalance(&mut self) -> Option<f32> {
        self.last_rebalance_ms = self.clock.now_ms();
        let target = self.config.presets.for_count(self.len());
        let effective = self.staged_cell_size.unwrap_or(self.cell_size);
        if (target - effective).abs() > f32::EPSILON {
            debug!(from = effective, to = target, beacons = self.len(), "spatial hash staging new cell size");
            self.staged_cell_size = Some(target);
            self.query_cache.clear();
            self.rebalance_count += 1;
        }
        self.staged_cell_size
    }

    fn load_factor(&self) -> f32 {
        self.cells.len() as f32 / self.config.capacity.max(1) as f32
    }

    fn invalidate_queries_touching(&mut self, key: CellKey) {
        if self.query_cache.is_empty() {
            return;
        }
        let (cx, cy) = key.coords();
        self.query_cache.retain(|_, q| !q.range.contains(cx, cy));
    }

    fn cached(&mut self, key: &QueryKey) -> Option<SpatialQueryResult> {
        let now = self.clock.now_ms();
        let ttl = self.config.query_cache_ttl_ms;
        match self.query_cache.get(key) {
            Some(q) if now - q.created_ms < ttl => {
                self.cache_hits += 1;
                Some(q.result.clone())
            }
            Some(_) => {
                self.query_cache.remove(key);
                self.cache_misses += 1;
                None
            }
            None => {
                self.cache_misses += 1;
                None
            }
        }
    }

    fn store(&mut self, key: QueryKey, result: &SpatialQueryResult, range: CellRange) {
        if self.config.query_cache_ttl_ms <= 0.0 || self.config.query_cache_capacity == 0 {
            return;
        }
        let now = self.clock.now_ms();
        if self.query_cache.len() >= self.config.query_cache_capacity {
            let ttl = self.config.query_cache_ttl_ms;
            self.query_cache.retain(|_, q| now - q.created_ms < ttl);
            if self.query_cache.len() >= self.config.query_cache_capacity {
                self.query_cache.clear();
            }
        }
        self.query_cache.insert(key, CachedQuery { result: result.clone(), range, created_ms: now });
    }

    fn neighbor_ring(&mut self, center: CellKey) -> Vec<CellKey> {
        if let Some(cell) = self.cells.get(&center) {
            if let Some(n) = &cell.neighbors {
                return n.clone();
            }
        }
        let (cx, cy) = center.coords();
        let mut keys = Vec::with_capacity(9);
        for dy in -1..=1i32 {
            for dx in -1..=1i32 {
                keys.push(CellKey::from_coords(cx.saturating_add(dx), cy.saturating_add(dy)));
            }
        }
        if let Some(cell) = self.cells.get_mut(&center) {
            cell.neighbors = Some(keys.clone());
        }
        keys
    }

    /// Candidate beacons in the cells within `ceil(radius / cell_size)` rings of
    /// `pos`, nearest rings first, capped at `max_results` (0 means no cap). Rings
    /// wider than the occupied grid scan the occupied cells instead.
    pub fn find_neighbors(&mut self, pos: Vec2, query: &NeighborQueryConfig) -> SpatialQueryResult {
        if !pos.is_finite() || !query.radius.is_finite() || query.radius < 0.0 {
            return SpatialQueryResult::default();
        }
        let key = QueryKey::Neighbors {
            x: pos.x.to_bits(),
            y: pos.y.to_bits(),
            radius: query.radius.to_bits(),
            max_results: query.max_results,
        };
        if let Some(hit) = self.cached(&key) {
            return hit;
        }
        let t0 = self.clock.now_ms();
        // cell coordinates are i32, so a wider ring already covers every cell
        let ring = ((query.radius / self.cell_size).ceil() as i64).clamp(0, u32::MAX as i64);
        let span = 2 * ring + 1;
        let center = self.key_for(pos);
        let (cx, cy) = center.coords();
        let limit = if query.max_results == 0 { usize::MAX } else { query.max_results };

        let mut out = SpatialQueryResult::default();
        let visit = |this: &Self, k: CellKey, out: &mut SpatialQueryResult| {
            out.cells_searched += 1;
            match this.cells.get(&k) {
                Some(cell) => {
                    out.hit_count += 1;
                    if out.entities.len() < limit {
                        let mut ids: Vec<BeaconId> = cell.members.iter().copied().collect();
                        ids.sort_unstable();
                        let room = limit - out.entities.len();
                        out.entities.extend(ids.into_iter().take(room));
                    }
                }
                None => out.miss_count += 1,
            }
        };

        if span > MAX_CELL_SPAN || (span * span) as usize > self.cells.len().saturating_mul(4).max(64) {
            let mut near: Vec<(i64, CellKey)> = self
                .cells
                .keys()
                .map(|k| {
                    let (x, y) = k.coords();
                    ((x as i64 - cx as i64).abs().max((y as i64 - cy as i64).abs()), *k)
                })
                .collect();
            near.sort_unstable();
            for (d, k) in near {
                if d <= ring {
                    visit(&*self, k, &mut out);
                } else {
                    out.cells_searched += 1;
                    out.miss_count += 1;
                }
            }
        } else if ring <= 1 {
            // center first, then the rest of the 3x3 block
            visit(&*self, center, &mut out);
            if ring == 1 {
                for k in self.neighbor_ring(center) {
                    if k != center {
                        visit(&*self, k, &mut out);
                    }
                }
            }
        } else {
            let ring = ring as i32;
            for r in 0..=ring {
                for dy in -r..=r {
                    for dx in -r..=r {
                        if dx.abs() != r && dy.abs() != r {
                            continue;
                        }
                        let k = CellKey::from_coords(cx.saturating_add(dx), cy.saturating_add(dy));
                        visit(&*self, k, &mut out);
                    }
                }
            }
        }

        out.query_time_ms = self.clock.now_ms() - t0;
        self.last_query_time_ms = out.query_time_ms;
        let range = CellRange {
            x0: cx as i64 - ring,
            y0: cy as i64 - ring,
            x1: cx as i64 + ring,
            y1: cy as i64 + ring,
        };
        self.store(key, &out, range);
        out
    }

    /// Every beacon in the cells overlapping `rect`, enumerated by coordinate range.
    /// Very large rectangles scan the occupied cells instead of the full range.
    pub fn query_bounds(&mut self, rect: &Bounds) -> SpatialQueryResult {
        if !rect.is_finite() {
            return SpatialQueryResult::default();
        }
        let key = QueryKey::Bounds {
            min_x: rect.min_x.to_bits(),
            min_y: rect.min_y.to_bits(),
            max_x: rect.max_x.to_bits(),
            max_y: rect.max_y.to_bits(),
        };
        if let Some(hit) = self.cached(&key) {
            return hit;
        }
        let t0 = self.clock.now_ms();
        let range = CellRange {
            x0: self.coord(rect.min_x) as i64,
            y0: self.coord(rect.min_y) as i64,
            x1: self.coord(rect.max_x) as i64,
            y1: self.coord(rect.max_y) as i64,
        };
        let mut out = SpatialQueryResult::default();
        let (w, h) = range.span();
        if w > MAX_CELL_SPAN || h > MAX_CELL_SPAN || (w * h) as usize > self.cells.len().saturating_mul(4).max(64) {
            for (k, cell) in &self.cells {
                let (cx, cy) = k.coords();
                out.cells_searched += 1;
                if range.contains(cx, cy) {
                    out.hit_count += 1;
                    out.entities.extend(cell.members.iter().copied());
                } else {
                    out.miss_count += 1;
                }
            }
        } else {
            for cy in range.y0..=range.y1 {
                for cx in range.x0..=range.x1 {
                    out.cells_searched += 1;
                    match self.cells.get(&CellKey::from_coords(cx as i32, cy as i32)) {
                        Some(cell) => {
                            out.hit_count += 1;
                            out.entities.extend(cell.members.iter().copied());
                        }
                        None => out.miss_count += 1,
                    }
                }
            }
        }
        out.entities.sort_unstable();
        out.query_time_ms = self.clock.now_ms() - t0;
        self.last_query_time_ms = out.query_time_ms;
        self.store(key, &out, range);
        out
    }

    pub fn metrics(&self) -> IndexMetrics {
        let max = self.cells.values().map(|c| c.members.len()).max().unwrap_or(0);
        let avg = if self.cells.is_empty() { 0.0 } else { self.len() as f32 / self.cells.len() as f32 };
        IndexMetrics {
            beacon_count: self.len(),
            cell_count: self.cells.len(),
            cell_size: self.cell_size,
            staged_cell_size: self.staged_cell_size,
            load_factor: self.load_factor(),
            max_beacons_per_cell: max,
            average_beacons_per_cell: avg,
            rebalance_count: self.rebalance_count,
            query_cache_hits: self.cache_hits,
            query_cache_misses: self.cache_misses,
            query_cache_entries: self.query_cache.len(),
            last_query_time_ms: self.last_query_time_ms,
        }
    }
}
