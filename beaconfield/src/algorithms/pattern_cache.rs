//! Region-partitioned cache of detected patterns.
//!
//! Regions are a coarser grid than the spatial hash. A beacon change dirties its
//! whole 3x3 region block, because a pattern can straddle region borders.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::config::{InvalidationStrategy, PatternCacheConfig};
use crate::model::{Bounds, Pattern, PatternId, Vec2};

// Rough per-item costs used by the memory estimate; not byte-exact.
pub const ENTRY_OVERHEAD_BYTES: usize = 256;
pub const PATTERN_OVERHEAD_BYTES: usize = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionKey {
    pub x: i32,
    pub y: i32,
}

impl RegionKey {
    pub fn new(x: i32, y: i32) -> Self {
        RegionKey { x, y }
    }

    /// The 3x3 block centred on this region.
    pub fn neighborhood(self) -> [RegionKey; 9] {
        let mut out = [self; 9];
        let mut i = 0;
        for dy in -1..=1i32 {
            for dx in -1..=1i32 {
                out[i] = RegionKey::new(self.x.saturating_add(dx), self.y.saturating_add(dy));
                i += 1;
            }
        }
        out
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

impl FromStr for RegionKey {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (a, b) = s.split_once(',').ok_or_else(|| format!("region key '{}' is not 'x,y'", s))?;
        let x = a.trim().parse::<i32>().map_err(|e| e.to_string())?;
        let y = b.trim().parse::<i32>().map_err(|e| e.to_string())?;
        Ok(RegionKey { x, y })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub patterns: Vec<Pattern>,
    pub bounds: Bounds,
    pub version: u64,
    pub last_accessed_ms: f64,
    pub last_updated_ms: f64,
    pub access_count: u64,
    pub dirty: bool,
}

impl CacheEntry {
    fn estimated_bytes(&self) -> usize {
        ENTRY_OVERHEAD_BYTES + self.patterns.len() * PATTERN_OVERHEAD_BYTES
    }
}

// ---------------------------------------------------------------------------
// Storage backends

#[derive(Debug)]
struct LruNode {
    key: RegionKey,
    entry: CacheEntry,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Bounded LRU over a slab of nodes linked most-recent-first; O(1) get/set.
#[derive(Debug)]
pub struct LruStore {
    capacity: usize,
    map: HashMap<RegionKey, usize>,
    slots: Vec<Option<LruNode>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl LruStore {
    fn new(capacity: usize) -> Self {
        LruStore {
            capacity: capacity.max(1),
            map: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    fn node(&self, ix: usize) -> Option<&LruNode> {
        self.slots.get(ix).and_then(|s| s.as_ref())
    }

    fn node_mut(&mut self, ix: usize) -> Option<&mut LruNode> {
        self.slots.get_mut(ix).and_then(|s| s.as_mut())
    }

    fn detach(&mut self, ix: usize) {
        let (prev, next) = match self.node(ix) {
            Some(n) => (n.prev, n.next),
            None => return,
        };
        match prev {
            Some(p) => { if let Some(n) = self.node_mut(p) { n.next = next; } }
            None => self.head = next,
        }
        match next {
            Some(nx) => { if let Some(n) = self.node_mut(nx) { n.prev = prev; } }
            None => self.tail = prev,
        }
        if let Some(n) = self.node_mut(ix) {
            n.prev = None;
            n.next = None;
        }
    }

    fn push_front(&mut self, ix: usize) {
        let old_head = self.head;
        if let Some(n) = self.node_mut(ix) {
            n.prev = None;
            n.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(n) = self.node_mut(h) { n.prev = Some(ix); }
        }
        self.head = Some(ix);
        if self.tail.is_none() {
            self.tail = Some(ix);
        }
    }

    fn touch(&mut self, key: &RegionKey) -> Option<&mut CacheEntry> {
        let ix = *self.map.get(key)?;
        if self.head != Some(ix) {
            self.detach(ix);
            self.push_front(ix);
        }
        self.node_mut(ix).map(|n| &mut n.entry)
    }

    fn insert(&mut self, key: RegionKey, entry: CacheEntry) -> Option<(RegionKey, CacheEntry)> {
        if let Some(&ix) = self.map.get(&key) {
            if let Some(n) = self.node_mut(ix) { n.entry = entry; }
            self.detach(ix);
            self.push_front(ix);
            return None;
        }
        let mut evicted = None;
        if self.map.len() >= self.capacity {
            if let Some(t) = self.tail {
                let k = self.node(t).map(|n| n.key);
                if let Some(k) = k {
                    evicted = self.remove(&k).map(|e| (k, e));
                }
            }
        }
        let node = LruNode { key, entry, prev: None, next: None };
        let ix = match self.free.pop() {
            Some(ix) => { self.slots[ix] = Some(node); ix }
            None => { self.slots.push(Some(node)); self.slots.len() - 1 }
        };
        self.map.insert(key, ix);
        self.push_front(ix);
        evicted
    }

    fn remove(&mut self, key: &RegionKey) -> Option<CacheEntry> {
        let ix = self.map.remove(key)?;
        self.detach(ix);
        let node = self.slots.get_mut(ix).and_then(|s| s.take())?;
        self.free.push(ix);
        Some(node.entry)
    }
}

/// Plain map without recency tracking; at capacity the oldest insertion goes first.
#[derive(Debug)]
pub struct UnboundedStore {
    capacity: usize,
    map: HashMap<RegionKey, (u64, CacheEntry)>,
    order: VecDeque<(u64, RegionKey)>,
    next_seq: u64,
}

impl UnboundedStore {
    fn new(capacity: usize) -> Self {
        UnboundedStore { capacity: capacity.max(1), map: HashMap::new(), order: VecDeque::new(), next_seq: 0 }
    }

    fn insert(&mut self, key: RegionKey, entry: CacheEntry) -> Option<(RegionKey, CacheEntry)> {
        let seq = self.next_seq;
        self.next_seq += 1;
        let replaced = self.map.insert(key, (seq, entry)).is_some();
        self.order.push_back((seq, key));
        let mut evicted = None;
        if !replaced && self.map.len() > self.capacity {
            while let Some((s, k)) = self.order.pop_front() {
                // queue entries outlived by a later insert or a removal are skipped
                if self.map.get(&k).map_or(false, |(cur, _)| *cur == s) {
                    evicted = self.map.remove(&k).map(|(_, e)| (k, e));
                    break;
                }
            }
        }
        if self.order.len() > 2 * self.capacity + 16 {
            let map = &self.map;
            self.order.retain(|(s, k)| map.get(k).map_or(false, |(cur, _)| cur == s));
        }
        evicted
    }
}

/// Backend chosen at construction from `PatternCacheConfig::use_lru`.
#[derive(Debug)]
pub enum CacheStore {
    Lru(LruStore),
    Unbounded(UnboundedStore),
}

impl CacheStore {
    pub fn new(use_lru: bool, capacity: usize) -> Self {
        if use_lru {
            CacheStore::Lru(LruStore::new(capacity))
        } else {
            CacheStore::Unbounded(UnboundedStore::new(capacity))
        }
    }

    fn len(&self) -> usize {
        match self {
            CacheStore::Lru(s) => s.map.len(),
            CacheStore::Unbounded(s) => s.map.len(),
        }
    }

    fn peek(&self, key: &RegionKey) -> Option<&CacheEntry> {
        match self {
            CacheStore::Lru(s) => s.map.get(key).and_then(|&ix| s.node(ix)).map(|n| &n.entry),
            CacheStore::Unbounded(s) => s.map.get(key).map(|(_, e)| e),
        }
    }

    fn peek_mut(&mut self, key: &RegionKey) -> Option<&mut CacheEntry> {
        match self {
            CacheStore::Lru(s) => {
                let ix = *s.map.get(key)?;
                s.node_mut(ix).map(|n| &mut n.entry)
            }
            CacheStore::Unbounded(s) => s.map.get_mut(key).map(|(_, e)| e),
        }
    }

    // Read access: refreshes recency on the LRU backend.
    fn touch(&mut self, key: &RegionKey) -> Option<&mut CacheEntry> {
        match self {
            CacheStore::Lru(s) => s.touch(key),
            CacheStore::Unbounded(s) => s.map.get_mut(key).map(|(_, e)| e),
        }
    }

    fn insert(&mut self, key: RegionKey, entry: CacheEntry) -> Option<(RegionKey, CacheEntry)> {
        match self {
            CacheStore::Lru(s) => s.insert(key, entry),
            CacheStore::Unbounded(s) => s.insert(key, entry),
        }
    }

    fn remove(&mut self, key: &RegionKey) -> Option<CacheEntry> {
        match self {
            CacheStore::Lru(s) => s.remove(key),
            CacheStore::Unbounded(s) => s.map.remove(key).map(|(_, e)| e),
        }
    }

    fn entries(&self) -> Vec<(RegionKey, &CacheEntry)> {
        match self {
            CacheStore::Lru(s) => s.map.iter().filter_map(|(k, &ix)| s.node(ix).map(|n| (*k, &n.entry))).collect(),
            CacheStore::Unbounded(s) => s.map.iter().map(|(k, (_, e))| (*k, e)).collect(),
        }
    }
}

// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatistics {
    pub entries: usize,
    pub dirty_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
    pub average_query_latency_ms: f64,
    pub estimated_memory_bytes: usize,
}

pub struct PatternCache {
    config: PatternCacheConfig,
    store: CacheStore,
    pattern_regions: HashMap<PatternId, HashSet<RegionKey>>,
    clock: Rc<dyn Clock>,
    version: u64,
    last_cleanup_ms: f64,
    lazy_sweep_due_ms: Option<f64>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    invalidations: u64,
    queries: u64,
    query_time_total_ms: f64,
}

impl PatternCache {
    pub fn new(config: PatternCacheConfig, clock: Rc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        PatternCache {
            store: CacheStore::new(config.use_lru, config.max_entries),
            pattern_regions: HashMap::new(),
            clock,
            version: 0,
            last_cleanup_ms: now,
            lazy_sweep_due_ms: None,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
            invalidations: 0,
            queries: 0,
            query_time_total_ms: 0.0,
            config,
        }
    }

    pub fn strategy(&self) -> InvalidationStrategy { self.config.strategy }
    pub fn len(&self) -> usize { self.store.len() }
    pub fn is_empty(&self) -> bool { self.store.len() == 0 }

    pub fn region_key(&self, p: Vec2) -> RegionKey {
        let s = self.config.region_size;
        RegionKey::new((p.x / s).floor() as i32, (p.y / s).floor() as i32)
    }

    pub fn region_bounds(&self, key: RegionKey) -> Bounds {
        // f64 so the far edge of a saturated key does not overflow
        let s = self.config.region_size as f64;
        let (x, y) = (key.x as f64, key.y as f64);
        Bounds::new((x * s) as f32, (y * s) as f32, ((x + 1.0) * s) as f32, ((y + 1.0) * s) as f32)
    }

    /// Look at an entry without touching recency, counters or validity.
    pub fn peek(&self, key: RegionKey) -> Option<&CacheEntry> {
        self.store.peek(&key)
    }

    /// Regions currently holding pattern `id`.
    pub fn regions_for_pattern(&self, id: PatternId) -> Option<&HashSet<RegionKey>> {
        self.pattern_regions.get(&id)
    }

    fn is_valid(&self, e: &CacheEntry, now: f64) -> bool {
        now - e.last_updated_ms < self.config.max_age_ms
            && !(e.dirty && self.config.strategy == InvalidationStrategy::OnDemand)
    }

    /// Patterns for a region when the entry is still authoritative. Expired entries
    /// are removed on the way.
    pub fn get_region_patterns(&mut self, key: RegionKey) -> Option<&[Pattern]> {
        self.maintain();
        let t0 = self.clock.now_ms();
        let now = t0;
        let max_age = self.config.max_age_ms;
        let on_demand = self.config.strategy == InvalidationStrategy::OnDemand;
        let state = self.store.touch(&key).map(|e| {
            if now - e.last_updated_ms >= max_age {
                Lookup::Expired
            } else if e.dirty && on_demand {
                Lookup::Dirty
            } else {
                e.access_count += 1;
                e.last_accessed_ms = now;
                Lookup::Hit
            }
        });
        let hit = match state {
            Some(Lookup::Hit) => true,
            Some(Lookup::Expired) => {
                self.remove_entry(key);
                self.expirations += 1;
                false
            }
            Some(Lookup::Dirty) | None => false,
        };
        if hit { self.hits += 1; } else { self.misses += 1; }
        self.queries += 1;
        self.query_time_total_ms += self.clock.now_ms() - t0;
        if hit {
            self.store.peek(&key).map(|e| e.patterns.as_slice())
        } else {
            None
        }
    }

    /// Replace a region's pattern list wholesale.
    pub fn set_region_patterns(&mut self, key: RegionKey, patterns: Vec<Pattern>, bounds: Bounds) {
        self.maintain();
        let now = self.clock.now_ms();
        self.version += 1;
        if let Some(old) = self.store.peek(&key) {
            let ids: Vec<PatternId> = old.patterns.iter().map(|p| p.id).collect();
            self.unindex(key, &ids);
        }
        for p in &patterns {
            self.pattern_regions.entry(p.id).or_default().insert(key);
        }
        let entry = CacheEntry {
            patterns,
            bounds,
            version: self.version,
            last_accessed_ms: now,
            last_updated_ms: now,
            access_count: 0,
            dirty: false,
        };
        if let Some((k, e)) = self.store.insert(key, entry) {
            let ids: Vec<PatternId> = e.patterns.iter().map(|p| p.id).collect();
            self.unindex(k, &ids);
            self.evictions += 1;
            trace!(region = %k, "pattern cache evicted region");
        }
    }

    /// Apply the configured strategy to one region. Returns whether an entry was affected.
    pub fn invalidate_region(&mut self, key: RegionKey) -> bool {
        let now = self.clock.now_ms();
        let affected = match self.config.strategy {
            InvalidationStrategy::Immediate => self.remove_entry(key).is_some(),
            InvalidationStrategy::Lazy => {
                let marked = self.mark_dirty(key);
                if marked {
                    let due = now + self.config.lazy_sweep_delay_ms;
                    self.lazy_sweep_due_ms = Some(self.lazy_sweep_due_ms.map_or(due, |d| d.min(due)));
                }
                marked
            }
            InvalidationStrategy::Periodic => {
                let marked = self.mark_dirty(key);
                if marked && now - self.last_cleanup_ms > self.config.cleanup_interval_ms {
                    self.cleanup();
                }
                marked
            }
            InvalidationStrategy::OnDemand => self.mark_dirty(key),
        };
        if affected {
            self.invalidations += 1;
        }
        affected
    }

    /// Invalidate the 3x3 blocks around the beacon's new position and, when known,
    /// its old one. Returns the number of entries affected.
    pub fn invalidate_by_beacon_change(&mut self, pos: Vec2, old_pos: Option<Vec2>) -> usize {
        self.maintain();
        let mut keys: Vec<RegionKey> = Vec::with_capacity(18);
        if pos.is_finite() {
            keys.extend(self.region_key(pos).neighborhood());
        }
        if let Some(old) = old_pos.filter(|p| p.is_finite()) {
            keys.extend(self.region_key(old).neighborhood());
        }
        keys.sort_unstable();
        keys.dedup();
        keys.into_iter().filter(|k| self.invalidate_region(*k)).count()
    }

    pub fn invalidate_patterns(&mut self, ids: &[PatternId]) -> usize {
        self.maintain();
        let mut keys: Vec<RegionKey> = ids
            .iter()
            .filter_map(|id| self.pattern_regions.get(id))
            .flat_map(|set| set.iter().copied())
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys.into_iter().filter(|k| self.invalidate_region(*k)).count()
    }

    /// Run the lazy sweep if its deadline has passed.
    pub fn maintain(&mut self) {
        if let Some(due) = self.lazy_sweep_due_ms {
            if self.clock.now_ms() >= due {
                self.lazy_sweep_due_ms = None;
                let dirty: Vec<RegionKey> =
                    self.store.entries().into_iter().filter(|(_, e)| e.dirty).map(|(k, _)| k).collect();
                for k in &dirty {
                    self.remove_entry(*k);
                }
                debug!(removed = dirty.len(), "pattern cache lazy sweep");
            }
        }
    }

    /// Periodic sweep: expired entries always go; dirty ones go while over budget.
    pub fn cleanup(&mut self) -> usize {
        let now = self.clock.now_ms();
        self.last_cleanup_ms = now;
        let mut removed = self.drop_expired(now);
        if self.estimated_memory_bytes() > self.config.max_memory_bytes {
            let dirty: Vec<RegionKey> =
                self.store.entries().into_iter().filter(|(_, e)| e.dirty).map(|(k, _)| k).collect();
            for k in dirty {
                if self.estimated_memory_bytes() <= self.config.max_memory_bytes {
                    break;
                }
                self.remove_entry(k);
                removed += 1;
            }
        }
        debug!(removed, entries = self.len(), "pattern cache cleanup");
        removed
    }

    /// Drop expired entries, then the least-accessed ones while over the memory budget.
    pub fn compact(&mut self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = self.drop_expired(now);
        if self.estimated_memory_bytes() > self.config.max_memory_bytes {
            let mut by_access: Vec<(u64, f64, RegionKey)> = self
                .store
                .entries()
                .into_iter()
                .map(|(k, e)| (e.access_count, e.last_accessed_ms, k))
                .collect();
            by_access.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)).then(a.2.cmp(&b.2)));
            for (_, _, k) in by_access {
                if self.estimated_memory_bytes() <= self.config.max_memory_bytes {
                    break;
                }
                self.remove_entry(k);
                self.evictions += 1;
                removed += 1;
            }
        }
        debug!(removed, entries = self.len(), "pattern cache compacted");
        removed
    }

    pub fn clear(&mut self) {
        self.store = CacheStore::new(self.config.use_lru, self.config.max_entries);
        self.pattern_regions.clear();
        self.lazy_sweep_due_ms = None;
    }

    pub fn estimated_memory_bytes(&self) -> usize {
        self.store.entries().iter().map(|(_, e)| e.estimated_bytes()).sum()
    }

    pub fn statistics(&self) -> CacheStatistics {
        let total = (self.hits + self.misses) as f64;
        let entries = self.store.entries();
        CacheStatistics {
            entries: entries.len(),
            dirty_entries: entries.iter().filter(|(_, e)| e.dirty).count(),
            hits: self.hits,
            misses: self.misses,
            hit_rate: if total > 0.0 { self.hits as f64 / total } else { 0.0 },
            miss_rate: if total > 0.0 { self.misses as f64 / total } else { 0.0 },
            evictions: self.evictions,
            expirations: self.expirations,
            invalidations: self.invalidations,
            average_query_latency_ms: if self.queries > 0 { self.query_time_total_ms / self.queries as f64 } else { 0.0 },
            estimated_memory_bytes: entries.iter().map(|(_, e)| e.estimated_bytes()).sum(),
        }
    }

    fn drop_expired(&mut self, now: f64) -> usize {
        let expired: Vec<RegionKey> = self
            .store
            .entries()
            .into_iter()
            .filter(|(_, e)| now - e.last_updated_ms >= self.config.max_age_ms)
            .map(|(k, _)| k)
            .collect();
        for k in &expired {
            self.remove_entry(*k);
        }
        self.expirations += expired.len() as u64;
        expired.len()
    }

    fn mark_dirty(&mut self, key: RegionKey) -> bool {
        match self.store.peek_mut(&key) {
            Some(e) => {
                e.dirty = true;
                true
            }
            None => false,
        }
    }

    fn remove_entry(&mut self, key: RegionKey) -> Option<CacheEntry> {
        let e = self.store.remove(&key)?;
        let ids: Vec<PatternId> = e.patterns.iter().map(|p| p.id).collect();
        self.unindex(key, &ids);
        Some(e)
    }

    fn unindex(&mut self, key: RegionKey, ids: &[PatternId]) {
        for id in ids {
            if let Some(set) = self.pattern_regions.get_mut(id) {
                set.remove(&key);
                if set.is_empty() {
                    self.pattern_regions.remove(id);
                }
            }
        }
    }
}

enum Lookup {
    Hit,
    Expired,
    Dirty,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::PatternKind;

    fn pattern(id: PatternId) -> Pattern {
        Pattern {
            id,
            kind: PatternKind::Triangle,
            beacons: vec![1, 2, 3],
            vertices: vec![Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)],
            centroid: Vec2::new(0.3, 0.3),
            area: 0.5,
        }
    }

    fn cache(strategy: InvalidationStrategy, use_lru: bool, max_entries: usize) -> (PatternCache, Rc<ManualClock>) {
        let clock = ManualClock::new(0.0);
        let cfg = PatternCacheConfig {
            region_size: 100.0,
            max_age_ms: 1_000.0,
            strategy,
            use_lru,
            max_entries,
            ..Default::default()
        };
        (PatternCache::new(cfg, clock.clone()), clock)
    }

    fn b() -> Bounds {
        Bounds::new(0.0, 0.0, 100.0, 100.0)
    }

    #[test]
    fn region_keys_parse_and_print() {
        let k: RegionKey = "0,0".parse().unwrap();
        assert_eq!(k, RegionKey::new(0, 0));
        assert_eq!("-3, 7".parse::<RegionKey>().unwrap().to_string(), "-3,7");
        assert!("nope".parse::<RegionKey>().is_err());
    }

    #[test]
    fn saturated_region_keys_have_finite_bounds() {
        let (c, _) = cache(InvalidationStrategy::Immediate, true, 8);
        let key = RegionKey::new(i32::MAX, i32::MIN);
        let r = c.region_bounds(key);
        assert!(r.is_finite());
        assert!(r.max_x > r.min_x && r.max_y > r.min_y);
        assert_eq!(c.region_bounds(RegionKey::new(-1, 2)), Bounds::new(-100.0, 200.0, 0.0, 300.0));
    }

    #[test]
    fn expired_entry_is_removed_on_touch() {
        let (mut c, clock) = cache(InvalidationStrategy::Immediate, true, 8);
        let key: RegionKey = "0,0".parse().unwrap();
        c.set_region_patterns(key, vec![pattern(1)], b());
        assert_eq!(c.get_region_patterns(key).map(|p| p.len()), Some(1));
        clock.advance(1_001.0);
        assert!(c.get_region_patterns(key).is_none());
        assert!(c.peek(key).is_none());
        assert!(c.regions_for_pattern(1).is_none());
        assert_eq!(c.statistics().expirations, 1);
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let (mut c, _) = cache(InvalidationStrategy::Immediate, true, 2);
        let (a, bk, d) = (RegionKey::new(0, 0), RegionKey::new(1, 0), RegionKey::new(2, 0));
        c.set_region_patterns(a, vec![pattern(1)], b());
        c.set_region_patterns(bk, vec![pattern(2)], b());
        assert!(c.get_region_patterns(a).is_some()); // a is now most recent
        c.set_region_patterns(d, vec![pattern(3)], b());
        assert!(c.peek(bk).is_none());
        assert!(c.peek(a).is_some() && c.peek(d).is_some());
        assert!(c.regions_for_pattern(2).is_none());
        assert_eq!(c.statistics().evictions, 1);
    }

    #[test]
    fn unbounded_store_trims_oldest_insert() {
        let (mut c, _) = cache(InvalidationStrategy::Immediate, false, 2);
        let (a, bk, d) = (RegionKey::new(0, 0), RegionKey::new(1, 0), RegionKey::new(2, 0));
        c.set_region_patterns(a, vec![pattern(1)], b());
        c.set_region_patterns(bk, vec![pattern(2)], b());
        assert!(c.get_region_patterns(a).is_some()); // reads do not matter here
        c.set_region_patterns(d, vec![pattern(3)], b());
        assert!(c.peek(a).is_none());
        assert!(c.peek(bk).is_some() && c.peek(d).is_some());
    }

    #[test]
    fn strategies_treat_dirty_entries_differently() {
        let key = RegionKey::new(0, 0);
        let p = Vec2::new(50.0, 50.0);

        let (mut imm, _) = cache(InvalidationStrategy::Immediate, true, 8);
        imm.set_region_patterns(key, vec![pattern(1)], b());
        assert_eq!(imm.invalidate_by_beacon_change(p, None), 1);
        assert!(imm.peek(key).is_none());

        let (mut od, _) = cache(InvalidationStrategy::OnDemand, true, 8);
        od.set_region_patterns(key, vec![pattern(1)], b());
        od.invalidate_by_beacon_change(p, None);
        assert!(od.get_region_patterns(key).is_none(), "dirty is a miss");
        assert!(od.peek(key).is_some(), "but it is not removed");

        let (mut lazy, clock) = cache(InvalidationStrategy::Lazy, true, 8);
        lazy.set_region_patterns(key, vec![pattern(1)], b());
        lazy.invalidate_by_beacon_change(p, None);
        assert!(lazy.get_region_patterns(key).is_some(), "stale hit until the sweep");
        clock.advance(999.0);
        lazy.maintain();
        assert!(lazy.peek(key).is_some(), "sweep not due yet");
        clock.advance(1.0);
        lazy.maintain();
        assert!(lazy.peek(key).is_none());
    }

    #[test]
    fn periodic_cleanup_runs_after_interval() {
        let clock = ManualClock::new(0.0);
        let cfg = PatternCacheConfig {
            region_size: 100.0,
            max_age_ms: 1_000.0,
            strategy: InvalidationStrategy::Periodic,
            cleanup_interval_ms: 500.0,
            ..Default::default()
        };
        let mut c = PatternCache::new(cfg, clock.clone());
        c.set_region_patterns(RegionKey::new(5, 5), vec![pattern(9)], b());
        clock.advance(600.0);
        c.set_region_patterns(RegionKey::new(0, 0), vec![pattern(1)], b());
        clock.advance(500.0);
        // (5,5) is expired by now; the invalidation of (0,0) triggers the sweep
        assert!(c.invalidate_region(RegionKey::new(0, 0)));
        assert!(c.peek(RegionKey::new(5, 5)).is_none());
        let e = c.peek(RegionKey::new(0, 0)).unwrap();
        assert!(e.dirty);
        assert!(c.get_region_patterns(RegionKey::new(0, 0)).is_some());
    }

    #[test]
    fn invalidate_patterns_uses_secondary_index() {
        let (mut c, _) = cache(InvalidationStrategy::Immediate, true, 8);
        c.set_region_patterns(RegionKey::new(0, 0), vec![pattern(1), pattern(2)], b());
        c.set_region_patterns(RegionKey::new(9, 9), vec![pattern(2)], b());
        c.set_region_patterns(RegionKey::new(4, 4), vec![pattern(3)], b());
        assert_eq!(c.invalidate_patterns(&[2]), 2);
        assert!(c.peek(RegionKey::new(4, 4)).is_some());
        assert!(c.regions_for_pattern(1).is_none());
    }

    #[test]
    fn compact_drops_low_access_entries_over_budget() {
        let clock = ManualClock::new(0.0);
        let cfg = PatternCacheConfig {
            region_size: 100.0,
            max_memory_bytes: 2 * (ENTRY_OVERHEAD_BYTES + PATTERN_OVERHEAD_BYTES),
            ..Default::default()
        };
        let mut c = PatternCache::new(cfg, clock.clone());
        for i in 0..4 {
            c.set_region_patterns(RegionKey::new(i, 0), vec![pattern(i as u64)], b());
        }
        for _ in 0..3 {
            c.get_region_patterns(RegionKey::new(2, 0));
            c.get_region_patterns(RegionKey::new(3, 0));
        }
        assert_eq!(c.compact(), 2);
        assert!(c.peek(RegionKey::new(2, 0)).is_some());
        assert!(c.peek(RegionKey::new(3, 0)).is_some());
        let s = c.statistics();
        assert_eq!(s.entries, 2);
        assert!(s.hit_rate > 0.99);
    }
}
