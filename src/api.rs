use crate::Field;
use beaconfield::geometry::limits::{in_coord_bounds, COORD_MAX, COORD_MIN, MAX_BEACONS};
use beaconfield::{Beacon, Bounds, ConfigError, FieldConfig, NeighborQueryConfig, Vec2, Viewport};
use wasm_bindgen::prelude::*;
type JsValue = wasm_bindgen::JsValue;
use crate::error;
use crate::interop::{arr_f32, arr_u32, new_obj, set_kv, to_js};

#[wasm_bindgen]
pub fn set_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

fn check_coord(param: &str, v: f32) -> Result<(), JsValue> {
    if !v.is_finite() {
        return Err(error::non_finite(param));
    }
    if !in_coord_bounds(v) {
        return Err(error::out_of_range(param, COORD_MIN, COORD_MAX, v));
    }
    Ok(())
}

// null/undefined means "no viewport"
fn viewport_from(v: &JsValue) -> Result<Option<Viewport>, JsValue> {
    if v.is_null() || v.is_undefined() {
        return Ok(None);
    }
    let bounds: Bounds = serde_wasm_bindgen::from_value(v.clone())
        .map_err(|e| error::invalid_argument("viewport", e))?;
    if !bounds.is_finite() {
        return Err(error::non_finite("viewport"));
    }
    Ok(Some(Viewport { bounds: Bounds::new(bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y) }))
}

#[wasm_bindgen]
impl Field {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Field {
        crate::Field::rs_new()
    }
    pub fn with_config_json(json: &str) -> Result<Field, JsValue> {
        let config = FieldConfig::from_json_str(json).map_err(|e| error::invalid_config(&e))?;
        crate::Field::rs_with_config(config).map_err(|e| error::invalid_config(&e))
    }
    /// Same as `with_config_json`, from a plain JS object.
    pub fn with_config(v: JsValue) -> Result<Field, JsValue> {
        let value = serde_wasm_bindgen::from_value::<serde_json::Value>(v)
            .map_err(|e| error::invalid_argument("config", e))?;
        let config: FieldConfig = serde_json::from_value(value)
            .map_err(|e| error::invalid_config(&ConfigError::from(e)))?;
        crate::Field::rs_with_config(config).map_err(|e| error::invalid_config(&e))
    }
    pub fn config_json(&self) -> String {
        self.inner.config().to_json_string()
    }
    pub fn geom_version(&self) -> u64 {
        self.rs_geom_version()
    }

    // Beacons
    pub fn add_beacon(&mut self, id: u32, x: f32, y: f32) -> bool {
        self.inner.add_beacon(Beacon::new(id, x, y))
    }
    pub fn add_beacon_res(&mut self, id: u32, x: f32, y: f32) -> JsValue {
        if let Err(e) = check_coord("x", x).and_then(|_| check_coord("y", y)) {
            return e;
        }
        if self.inner.beacon(id).is_none() && self.inner.beacon_count() >= MAX_BEACONS {
            return error::capacity(MAX_BEACONS);
        }
        error::ok(JsValue::from_bool(self.inner.add_beacon(Beacon::new(id, x, y))))
    }
    pub fn move_beacon(&mut self, id: u32, x: f32, y: f32) -> bool {
        self.inner.move_beacon(id, x, y)
    }
    pub fn move_beacon_res(&mut self, id: u32, x: f32, y: f32) -> JsValue {
        if let Err(e) = check_coord("x", x).and_then(|_| check_coord("y", y)) {
            return e;
        }
        if self.inner.beacon(id).is_none() {
            return error::invalid_id("beacon", id);
        }
        error::ok(JsValue::from_bool(self.inner.move_beacon(id, x, y)))
    }
    pub fn remove_beacon(&mut self, id: u32) -> bool {
        self.inner.remove_beacon(id)
    }
    pub fn remove_beacon_res(&mut self, id: u32) -> JsValue {
        if self.inner.beacon(id).is_none() {
            return error::invalid_id("beacon", id);
        }
        error::ok(JsValue::from_bool(self.inner.remove_beacon(id)))
    }
    pub fn get_beacon(&self, id: u32) -> JsValue {
        match self.inner.beacon(id) {
            Some(b) => to_js(&vec![b.x, b.y]),
            None => JsValue::NULL,
        }
    }
    pub fn beacon_count(&self) -> u32 {
        self.inner.beacon_count() as u32
    }
    pub fn clear(&mut self) {
        self.inner.clear();
        self.ticket = None;
    }

    // Typed arrays getter, ids ascending
    pub fn get_beacon_data(&self) -> JsValue {
        let beacons = self.inner.beacons();
        let ids: Vec<u32> = beacons.iter().map(|b| b.id).collect();
        let pos: Vec<f32> = beacons.iter().flat_map(|b| [b.x, b.y]).collect();
        let obj = new_obj();
        set_kv(&obj, "ids", &arr_u32(&ids).into());
        set_kv(&obj, "positions", &arr_f32(&pos).into());
        obj.into()
    }

    // Queries
    pub fn query_bounds(&mut self, min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> JsValue {
        to_js(&self.inner.query_bounds(&Bounds::new(min_x, min_y, max_x, max_y)))
    }
    pub fn query_bounds_res(&mut self, min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> JsValue {
        for (param, v) in [("min_x", min_x), ("min_y", min_y), ("max_x", max_x), ("max_y", max_y)] {
            if !v.is_finite() {
                return error::non_finite(param);
            }
        }
        error::ok(self.query_bounds(min_x, min_y, max_x, max_y))
    }
    /// `radius`/`max_results` fall back to the configured defaults when omitted.
    pub fn find_neighbors(&mut self, x: f32, y: f32, radius: Option<f32>, max_results: Option<u32>) -> JsValue {
        let d = self.inner.config().neighbors;
        let q = NeighborQueryConfig {
            radius: radius.unwrap_or(d.radius),
            max_results: max_results.map_or(d.max_results, |m| m as usize),
            sort_by_distance: d.sort_by_distance,
        };
        to_js(&self.inner.find_neighbors(Vec2::new(x, y), Some(&q)))
    }
    pub fn find_neighbors_res(&mut self, x: f32, y: f32, radius: Option<f32>, max_results: Option<u32>) -> JsValue {
        if !x.is_finite() {
            return error::non_finite("x");
        }
        if !y.is_finite() {
            return error::non_finite("y");
        }
        if let Some(r) = radius {
            if !r.is_finite() {
                return error::non_finite("radius");
            }
            if r < 0.0 {
                return error::out_of_range("radius", 0.0, f32::INFINITY, r);
            }
        }
        error::ok(self.find_neighbors(x, y, radius, max_results))
    }

    // Analysis
    /// Queues an analysis of the current beacons. Returns the request id, or
    /// `undefined` when the request resolved at once (too few beacons, or cooling down).
    pub fn request_analysis(&mut self, viewport: JsValue, cooldown_ms: Option<f64>) -> Result<Option<f64>, JsValue> {
        let viewport = viewport_from(&viewport)?;
        if let Some(c) = cooldown_ms {
            if !c.is_finite() || c < 0.0 {
                return Err(error::out_of_range("cooldown_ms", 0.0, f32::INFINITY, c as f32));
            }
        }
        let ticket = self.inner.request_analysis(viewport, cooldown_ms);
        let id = ticket.request().map(|r| r as f64);
        self.ticket = Some(ticket);
        Ok(id)
    }
    /// One host frame; `idle` says whether the host has spare time this frame.
    /// Returns "completed", "superseded" or null.
    pub fn tick(&mut self, idle: bool) -> JsValue {
        match self.inner.tick(&idle) {
            Some(outcome) => to_js(&outcome),
            None => JsValue::NULL,
        }
    }
    /// Drains the latest request: `{ok:true, value:null}` while it is pending.
    pub fn take_analysis(&mut self) -> JsValue {
        let Some(ticket) = self.ticket.as_ref() else { return error::ok(JsValue::NULL) };
        match ticket.try_take() {
            None => error::ok(JsValue::NULL),
            Some(result) => {
                self.ticket = None;
                match result {
                    Ok(analysis) => error::ok(to_js(&analysis)),
                    Err(e) => error::analysis_failed(&e),
                }
            }
        }
    }
    pub fn cancel_analysis(&mut self) {
        self.inner.cancel_analysis();
        self.ticket = None;
    }
    pub fn scheduler_state(&self) -> JsValue {
        to_js(&self.inner.scheduler_state())
    }
    pub fn last_analysis(&self) -> JsValue {
        match self.inner.last_analysis() {
            Some(a) => to_js(a),
            None => JsValue::NULL,
        }
    }
    pub fn last_error(&self) -> JsValue {
        match self.inner.last_error() {
            Some(e) => error::analysis_failed(e),
            None => JsValue::NULL,
        }
    }

    // Pattern cache
    pub fn patterns_at(&mut self, x: f32, y: f32) -> JsValue {
        to_js(&self.inner.patterns_at(Vec2::new(x, y)))
    }
    pub fn region_patterns(&mut self, x: f32, y: f32) -> JsValue {
        if !x.is_finite() || !y.is_finite() {
            return JsValue::NULL;
        }
        match self.inner.region_patterns(Vec2::new(x, y)) {
            Some(ps) => to_js(&ps),
            None => JsValue::NULL,
        }
    }
    pub fn compact_cache(&mut self) -> u32 {
        self.inner.compact_cache() as u32
    }

    // Diagnostics
    pub fn index_metrics(&self) -> JsValue {
        to_js(&self.inner.index_metrics())
    }
    pub fn cache_statistics(&self) -> JsValue {
        to_js(&self.inner.cache_statistics())
    }
}

impl Default for Field {
    fn default() -> Self {
        Field::new()
    }
}
