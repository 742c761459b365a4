use std::rc::Rc;

use beaconfield::algorithms::scheduler::AnalysisTicket;
use beaconfield::{Clock, FieldConfig};
use wasm_bindgen::prelude::*;

mod api;
mod error;
mod interop;

/// Host time from `Date.now()`; `Instant` is unavailable on wasm32-unknown-unknown.
struct JsClock;

impl Clock for JsClock {
    fn now_ms(&self) -> f64 {
        js_sys::Date::now()
    }
}

#[wasm_bindgen]
pub struct Field {
    pub(crate) inner: beaconfield::Field,
    // last accepted ticket, drained by take_analysis
    pub(crate) ticket: Option<AnalysisTicket>,
}

impl Field {
    pub fn rs_new() -> Field {
        Field { inner: beaconfield::Field::with_default_config(Rc::new(JsClock)), ticket: None }
    }

    pub fn rs_with_config(config: FieldConfig) -> Result<Field, beaconfield::ConfigError> {
        let inner = beaconfield::Field::with_clock(config, Rc::new(JsClock))?;
        Ok(Field { inner, ticket: None })
    }

    pub fn rs_geom_version(&self) -> u64 {
        self.inner.geom_version()
    }
}
