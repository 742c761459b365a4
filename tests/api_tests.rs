#![cfg(target_arch = "wasm32")]

use beaconfield_wasm::Field;
use js_sys::{Float32Array, Reflect, Uint32Array};
use wasm_bindgen::JsValue;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

fn get(v: &JsValue, k: &str) -> JsValue {
    Reflect::get(v, &JsValue::from_str(k)).unwrap_or(JsValue::UNDEFINED)
}
fn is_ok(v: &JsValue) -> bool { get(v, "ok").as_bool().unwrap_or(false) }
fn is_err(v: &JsValue, code: &str) -> bool {
    if is_ok(v) { return false; }
    get(&get(v, "error"), "code").as_string().map_or(false, |s| s == code)
}

fn triangle(f: &mut Field) {
    f.add_beacon(1, 0.0, 0.0);
    f.add_beacon(2, 50.0, 0.0);
    f.add_beacon(3, 25.0, 43.3);
}

#[wasm_bindgen_test]
fn invalid_input_returns_typed_errors() {
    let mut f = Field::new();
    let ver = f.geom_version();
    assert!(is_err(&f.add_beacon_res(1, f32::NAN, 0.0), "non_finite"));
    assert!(is_err(&f.add_beacon_res(1, 1e9, 0.0), "out_of_range"));
    assert!(is_err(&f.move_beacon_res(7, 0.0, 0.0), "invalid_id"));
    assert!(is_err(&f.remove_beacon_res(7), "invalid_id"));
    assert!(is_err(&f.find_neighbors_res(0.0, 0.0, Some(-1.0), None), "out_of_range"));
    assert!(is_err(&f.query_bounds_res(f32::INFINITY, 0.0, 1.0, 1.0), "non_finite"));
    assert_eq!(f.geom_version(), ver, "state mutated on error");
    assert!(is_ok(&f.add_beacon_res(1, 3.0, 4.0)));
    assert!(f.geom_version() > ver);
}

#[wasm_bindgen_test]
fn bad_configs_are_rejected() {
    assert!(Field::with_config_json("{}").is_ok());
    let e = Field::with_config_json(r#"{"hash":{"cell_size":-1.0}}"#).err().unwrap();
    assert!(is_err(&e, "invalid_config"));
    assert!(Field::with_config_json("nope").is_err());
}

#[wasm_bindgen_test]
fn beacon_arrays_are_sorted_by_id() {
    let mut f = Field::new();
    f.add_beacon(9, 1.0, 2.0);
    f.add_beacon(4, 3.0, 4.0);
    let data = f.get_beacon_data();
    let ids: Uint32Array = get(&data, "ids").into();
    let pos: Float32Array = get(&data, "positions").into();
    assert_eq!(ids.to_vec(), vec![4, 9]);
    assert_eq!(pos.to_vec(), vec![3.0, 4.0, 1.0, 2.0]);
    assert!(f.get_beacon(5).is_null());
}

#[wasm_bindgen_test]
fn analysis_round_trip_through_tick() {
    let mut f = Field::with_config_json(r#"{"scheduler":{"cooldown_ms":0.0,"frame_gaps":0}}"#).unwrap();
    triangle(&mut f);
    let id = f.request_analysis(JsValue::NULL, Some(0.0)).unwrap();
    assert!(id.is_some());
    assert!(get(&f.take_analysis(), "value").is_null(), "pending request drained early");
    let mut outcome = JsValue::NULL;
    for _ in 0..5 {
        outcome = f.tick(true);
        if !outcome.is_null() { break; }
    }
    assert_eq!(outcome.as_string().as_deref(), Some("completed"));
    let r = f.take_analysis();
    assert!(is_ok(&r));
    let complete = get(&get(&r, "value"), "completePatterns");
    assert_eq!(Reflect::get(&complete, &JsValue::from_str("length")).unwrap().as_f64(), Some(1.0));
    let hits = f.patterns_at(25.0, 10.0);
    assert_eq!(Reflect::get(&hits, &JsValue::from_str("length")).unwrap().as_f64(), Some(1.0));
}

#[wasm_bindgen_test]
fn too_few_beacons_resolve_at_once() {
    let mut f = Field::new();
    f.add_beacon(1, 0.0, 0.0);
    assert_eq!(f.request_analysis(JsValue::UNDEFINED, None).unwrap(), None);
    let r = f.take_analysis();
    assert!(is_ok(&r));
    assert!(!get(&r, "value").is_null());
    let bad = f.request_analysis(JsValue::from_str("everywhere"), None);
    assert!(is_err(&bad.err().unwrap(), "invalid_argument"));
}

#[wasm_bindgen_test]
fn fuzz_strict_methods_no_abort() {
    let mut f = Field::new();
    let mut seed: u64 = 0x1234_5678_ABCD_EF01;
    let mut rnd = || { seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1); (seed >> 16) as u32 };
    for _ in 0..500u32 {
        let x = (rnd() % 1000) as f32 - 500.0;
        let y = if rnd() % 17 == 0 { f32::NAN } else { (rnd() % 1000) as f32 - 500.0 };
        let id = rnd() % 64;
        let ver_before = f.geom_version();
        let r = match rnd() % 5 {
            0 => f.add_beacon_res(id, x, y),
            1 => f.move_beacon_res(id, x, y),
            2 => f.remove_beacon_res(id),
            3 => f.find_neighbors_res(x, y, Some((rnd() % 200) as f32), None),
            _ => f.query_bounds_res(x, y, x + 100.0, y + 100.0),
        };
        if !is_ok(&r) {
            assert_eq!(f.geom_version(), ver_before, "failed call mutated state");
        }
        let _ = f.tick(rnd() % 2 == 0);
    }
}
