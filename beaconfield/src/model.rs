use serde::{Deserialize, Serialize};

use crate::algorithms::morton::CellKey;

pub type BeaconId = u32;
pub type PatternId = u64;
pub type RequestId = u64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

/// A point entity. `z` is carried for the host but ignored by all 2D math.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Beacon {
    pub id: BeaconId,
    pub x: f32,
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f32>,
}

impl Beacon {
    pub fn new(id: BeaconId, x: f32, y: f32) -> Self {
        Beacon { id, x, y, z: None }
    }
    pub fn pos(&self) -> Vec2 {
        Vec2 { x: self.x, y: self.y }
    }
}

/// Axis-aligned rectangle, inclusive on every side.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Bounds {
    pub fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Bounds {
            min_x: min_x.min(max_x),
            min_y: min_y.min(max_y),
            max_x: min_x.max(max_x),
            max_y: min_y.max(max_y),
        }
    }

    pub fn around(center: Vec2, half_extent: f32) -> Self {
        Bounds::new(
            center.x - half_extent,
            center.y - half_extent,
            center.x + half_extent,
            center.y + half_extent,
        )
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }

    pub fn center(&self) -> Vec2 {
        Vec2 { x: 0.5 * (self.min_x + self.max_x), y: 0.5 * (self.min_y + self.max_y) }
    }

    pub fn is_finite(&self) -> bool {
        self.min_x.is_finite() && self.min_y.is_finite() && self.max_x.is_finite() && self.max_y.is_finite()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub bounds: Bounds,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    Triangle,
    Square,
    Pentagon,
    Hexagon,
}

impl PatternKind {
    pub const ALL: [PatternKind; 4] =
        [PatternKind::Triangle, PatternKind::Square, PatternKind::Pentagon, PatternKind::Hexagon];

    pub fn sides(self) -> usize {
        match self {
            PatternKind::Triangle => 3,
            PatternKind::Square => 4,
            PatternKind::Pentagon => 5,
            PatternKind::Hexagon => 6,
        }
    }

    /// Bonus awarded when the pattern is completed.
    pub fn bonus(self) -> f32 {
        match self {
            PatternKind::Triangle => 10.0,
            PatternKind::Square => 25.0,
            PatternKind::Pentagon => 50.0,
            PatternKind::Hexagon => 100.0,
        }
    }

    pub fn max_bonus() -> f32 {
        PatternKind::Hexagon.bonus()
    }
}

/// A fully formed regular polygon over existing beacons.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,
    pub kind: PatternKind,
    pub beacons: Vec<BeaconId>, // sorted
    pub vertices: Vec<Vec2>,    // counter-clockwise
    pub centroid: Vec2,
    pub area: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternSuggestion {
    pub target: Vec2,
    pub kind: PatternKind,
    pub uses: Vec<BeaconId>,
    pub completion: f32,
    pub potential_bonus: f32,
    pub priority: f32,
}

/// A partially formed regular polygon and the vertices it still needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncompletePattern {
    pub kind: PatternKind,
    pub existing: Vec<BeaconId>,
    pub missing: Vec<Vec2>,
    pub completion: f32,
    pub potential_bonus: f32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternCompletionAnalysis {
    pub incomplete_patterns: Vec<IncompletePattern>,
    pub suggested_positions: Vec<PatternSuggestion>,
    pub optimal_next_placement: Option<PatternSuggestion>,
    pub total_potential_bonus: f32,
    pub average_completion_cost: f32,
    pub complete_patterns: Vec<Pattern>,
}

impl PatternCompletionAnalysis {
    pub fn is_empty(&self) -> bool {
        self.incomplete_patterns.is_empty() && self.complete_patterns.is_empty()
    }
}

/// Broad-phase result with its cell counters.
///
/// `cells_searched` is normally the number of cell coordinates enumerated, with
/// `hit_count` occupied and `miss_count` empty. Queries too wide to enumerate
/// scan the occupied cells instead; there `cells_searched` counts occupied cells,
/// `hit_count` those inside the query and `miss_count` those outside it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpatialQueryResult {
    pub entities: Vec<BeaconId>,
    pub cells_searched: u32,
    pub query_time_ms: f64,
    pub hit_count: u32,
    pub miss_count: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeighborQueryResult {
    pub beacon: Beacon,
    pub distance: f32,
    pub direction: Vec2,
    pub cell_id: CellKey,
}
