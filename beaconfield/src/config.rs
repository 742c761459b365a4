//! Tuning knobs for every component, grouped under [`FieldConfig`].
//!
//! All structs deserialize with `#[serde(default)]`, so a host can send a partial
//! JSON document and inherit the rest from the defaults (or from a
//! [`PerformanceTier`] preset).

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::geometry::limits::in_size_bounds;
use crate::geometry::tolerance::Tolerance;
use crate::model::PatternKind;

/// Cell sizes the index may switch between when rebalancing, chosen by beacon count.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellSizePresets {
    pub fine: f32,
    pub medium: f32,
    pub coarse: f32,
    pub fine_below: usize,
    pub medium_below: usize,
}

impl Default for CellSizePresets {
    fn default() -> Self {
        CellSizePresets { fine: 50.0, medium: 100.0, coarse: 200.0, fine_below: 100, medium_below: 1_000 }
    }
}

impl CellSizePresets {
    pub fn for_count(&self, beacons: usize) -> f32 {
        if beacons < self.fine_below {
            self.fine
        } else if beacons < self.medium_below {
            self.medium
        } else {
            self.coarse
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialHashConfig {
    pub cell_size: f32,
    // expected number of occupied cells; load factor = cells / capacity
    pub capacity: usize,
    pub max_load_factor: f32,
    pub max_beacons_per_cell: usize,
    pub rebalance_interval_ms: f64,
    pub enable_rebalancing: bool,
    pub presets: CellSizePresets,
    pub query_cache_ttl_ms: f64,
    pub query_cache_capacity: usize,
}

impl Default for SpatialHashConfig {
    fn default() -> Self {
        SpatialHashConfig {
            cell_size: 100.0,
            capacity: 1_024,
            max_load_factor: 0.75,
            max_beacons_per_cell: 32,
            rebalance_interval_ms: 5_000.0,
            enable_rebalancing: true,
            presets: CellSizePresets::default(),
            query_cache_ttl_ms: 100.0,
            query_cache_capacity: 256,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeighborQueryConfig {
    pub radius: f32,
    pub max_results: usize,
    pub sort_by_distance: bool,
}

impl Default for NeighborQueryConfig {
    fn default() -> Self {
        NeighborQueryConfig { radius: 150.0, max_results: 64, sort_by_distance: true }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidationStrategy {
    Immediate,
    Lazy,
    Periodic,
    OnDemand,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternCacheConfig {
    pub region_size: f32,
    pub max_entries: usize,
    pub max_age_ms: f64,
    pub strategy: InvalidationStrategy,
    pub use_lru: bool,
    pub cleanup_interval_ms: f64,
    pub lazy_sweep_delay_ms: f64,
    pub max_memory_bytes: usize,
}

impl Default for PatternCacheConfig {
    fn default() -> Self {
        PatternCacheConfig {
            region_size: 400.0,
            max_entries: 256,
            max_age_ms: 30_000.0,
            strategy: InvalidationStrategy::Immediate,
            use_lru: true,
            cleanup_interval_ms: 5_000.0,
            lazy_sweep_delay_ms: 1_000.0,
            max_memory_bytes: 1 << 20,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub min_beacons: usize,
    pub cooldown_ms: f64,
    // idle frames to wait after the first idle signal before running
    pub frame_gaps: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig { min_beacons: 3, cooldown_ms: 300.0, frame_gaps: 2 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub min_edge_length: f32,
    pub max_edge_length: f32,
    // how far a beacon may sit from an ideal vertex and still count
    pub vertex_tolerance: f32,
    pub min_completion: f32,
    pub max_suggestions: usize,
    pub kinds: Vec<PatternKind>,
    pub tolerance: Tolerance,
}

impl Default for PatternConfig {
    fn default() -> Self {
        PatternConfig {
            min_edge_length: 20.0,
            max_edge_length: 200.0,
            vertex_tolerance: 8.0,
            min_completion: 0.5,
            max_suggestions: 16,
            kinds: PatternKind::ALL.to_vec(),
            tolerance: Tolerance::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    pub hash: SpatialHashConfig,
    pub cache: PatternCacheConfig,
    pub neighbors: NeighborQueryConfig,
    pub scheduler: SchedulerConfig,
    pub patterns: PatternConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceTier {
    High,
    Balanced,
    Low,
}

impl PerformanceTier {
    pub fn config(self) -> FieldConfig {
        let mut c = FieldConfig::default();
        match self {
            PerformanceTier::High => {
                c.patterns.max_suggestions = 32;
                c.scheduler.cooldown_ms = 150.0;
                c.scheduler.frame_gaps = 1;
                c.hash.query_cache_ttl_ms = 50.0;
            }
            PerformanceTier::Balanced => {}
            PerformanceTier::Low => {
                c.patterns.kinds = vec![PatternKind::Triangle, PatternKind::Square];
                c.patterns.max_suggestions = 6;
                c.scheduler.cooldown_ms = 750.0;
                c.scheduler.frame_gaps = 3;
                c.hash.query_cache_ttl_ms = 250.0;
                c.cache.max_entries = 64;
            }
        }
        c
    }
}

impl FieldConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: FieldConfig = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("hash.cell_size", self.hash.cell_size),
            ("hash.presets.fine", self.hash.presets.fine),
            ("hash.presets.medium", self.hash.presets.medium),
            ("hash.presets.coarse", self.hash.presets.coarse),
            ("cache.region_size", self.cache.region_size),
            ("patterns.max_edge_length", self.patterns.max_edge_length),
        ];
        for (name, v) in sizes {
            if !in_size_bounds(v) {
                return Err(ConfigError::OutOfRange { field: name, value: v as f64 });
            }
        }
        let mut largest_cell = self.hash.cell_size;
        if self.hash.enable_rebalancing {
            let p = &self.hash.presets;
            largest_cell = largest_cell.max(p.fine).max(p.medium).max(p.coarse);
        }
        if self.cache.region_size < largest_cell {
            return Err(ConfigError::RegionSmallerThanCell {
                region_size: self.cache.region_size,
                cell_size: largest_cell,
            });
        }
        if self.hash.capacity == 0 || !(self.hash.max_load_factor > 0.0) {
            return Err(ConfigError::OutOfRange { field: "hash.max_load_factor", value: self.hash.max_load_factor as f64 });
        }
        if !(0.0..=1.0).contains(&self.patterns.min_completion) {
            return Err(ConfigError::OutOfRange {
                field: "patterns.min_completion",
                value: self.patterns.min_completion as f64,
            });
        }
        if !(self.patterns.min_edge_length >= 0.0) || self.patterns.min_edge_length > self.patterns.max_edge_length {
            return Err(ConfigError::OutOfRange {
                field: "patterns.min_edge_length",
                value: self.patterns.min_edge_length as f64,
            });
        }
        if !(self.patterns.vertex_tolerance > 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "patterns.vertex_tolerance",
                value: self.patterns.vertex_tolerance as f64,
            });
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::OutOfRange { field: "cache.max_entries", value: 0.0 });
        }
        Ok(())
    }
}
