use beaconfield::{AnalysisError, ConfigError, InputFault};
use wasm_bindgen::prelude::*;

use crate::interop::{new_obj, set_kv};

pub fn ok(v: JsValue) -> JsValue {
    let o = new_obj();
    set_kv(&o, "ok", &JsValue::from_bool(true));
    set_kv(&o, "value", &v);
    o.into()
}

pub fn err(code: &'static str, message: impl Into<String>, data: Option<JsValue>) -> JsValue {
    let message = message.into();
    web_sys::console::warn_1(&JsValue::from_str(&format!("beaconfield: {}: {}", code, message)));
    let root = new_obj();
    set_kv(&root, "ok", &JsValue::from_bool(false));
    let e = new_obj();
    set_kv(&e, "code", &JsValue::from_str(code));
    set_kv(&e, "message", &JsValue::from_str(&message));
    if let Some(d) = data { set_kv(&e, "data", &d); }
    set_kv(&root, "error", &e.into());
    root.into()
}

#[inline]
pub fn non_finite(param: &str) -> JsValue {
    let d = new_obj(); set_kv(&d, "param", &JsValue::from_str(param));
    err("non_finite", format!("parameter '{}' must be finite", param), Some(d.into()))
}

#[inline]
pub fn out_of_range(param: &str, min: f32, max: f32, got: f32) -> JsValue {
    let d = new_obj();
    set_kv(&d, "param", &JsValue::from_str(param));
    set_kv(&d, "min", &JsValue::from_f64(min as f64));
    set_kv(&d, "max", &JsValue::from_f64(max as f64));
    set_kv(&d, "got", &JsValue::from_f64(got as f64));
    err("out_of_range", format!("parameter '{}' out of range", param), Some(d.into()))
}

#[inline]
pub fn invalid_id(kind: &str, id: u32) -> JsValue {
    let d = new_obj();
    set_kv(&d, "kind", &JsValue::from_str(kind));
    set_kv(&d, "id", &JsValue::from_f64(id as f64));
    err("invalid_id", format!("invalid {} id", kind), Some(d.into()))
}

pub fn invalid_argument(param: &str, detail: impl std::fmt::Display) -> JsValue {
    let d = new_obj(); set_kv(&d, "param", &JsValue::from_str(param));
    err("invalid_argument", format!("parameter '{}': {}", param, detail), Some(d.into()))
}

pub fn capacity(limit: usize) -> JsValue {
    let d = new_obj(); set_kv(&d, "limit", &JsValue::from_f64(limit as f64));
    err("capacity", "beacon limit reached", Some(d.into()))
}

pub fn invalid_config(e: &ConfigError) -> JsValue {
    let d = new_obj();
    match e {
        ConfigError::Json(_) => set_kv(&d, "kind", &JsValue::from_str("json")),
        ConfigError::OutOfRange { field, value } => {
            set_kv(&d, "kind", &JsValue::from_str("out_of_range"));
            set_kv(&d, "field", &JsValue::from_str(field));
            set_kv(&d, "got", &JsValue::from_f64(*value));
        }
        ConfigError::RegionSmallerThanCell { region_size, cell_size } => {
            set_kv(&d, "kind", &JsValue::from_str("region_size"));
            set_kv(&d, "region_size", &JsValue::from_f64(*region_size as f64));
            set_kv(&d, "cell_size", &JsValue::from_f64(*cell_size as f64));
        }
    }
    err("invalid_config", e.to_string(), Some(d.into()))
}

pub fn analysis_failed(e: &AnalysisError) -> JsValue {
    let d = new_obj();
    set_kv(&d, "request", &JsValue::from_f64(e.request() as f64));
    let kind = match e {
        AnalysisError::InvalidInput { reason, .. } => match reason {
            InputFault::BadCoordinate(_) => "bad_coordinate",
            InputFault::DuplicateId(_) => "duplicate_id",
            InputFault::BadViewport => "bad_viewport",
            InputFault::TooMany(_) => "too_many",
        },
        AnalysisError::Geometry { .. } => "geometry",
    };
    set_kv(&d, "kind", &JsValue::from_str(kind));
    let code = if e.is_input_error() { "invalid_input" } else { "analysis_failed" };
    err(code, e.to_string(), Some(d.into()))
}
