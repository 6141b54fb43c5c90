//! ==============================================================================
//! state.rs - shared plant state
//! ==============================================================================
//!
//! purpose:
//!     one PlantState per coordinator process, written by the environment
//!     sampler, the actuator dispatcher and the day-cycle scheduler, read by
//!     the display dispatcher, the touch menu and the status api.
//!
//!     every access goes through a read-write lock. writers update single
//!     fields (last writer wins), readers that need several fields at once
//!     take one guard so they see a consistent record.
//!
//! ==============================================================================

use crate::domain::{PlantSnapshot, PlantState};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct SharedPlantState {
    inner: Arc<RwLock<PlantState>>,
}

impl SharedPlantState {
    pub fn new(initial: PlantState) -> Self {
        Self { inner: Arc::new(RwLock::new(initial)) }
    }

    /// copy of the whole record
    pub fn get(&self) -> PlantState {
        self.inner.read().clone()
    }

    pub fn name(&self) -> String {
        self.inner.read().name.clone()
    }

    pub fn planted_date(&self) -> String {
        self.inner.read().planted_date.clone()
    }

    pub fn temperature_tenths(&self) -> i32 {
        self.inner.read().temperature_tenths
    }

    pub fn humidity_tenths(&self) -> i32 {
        self.inner.read().humidity_tenths
    }

    pub fn led_on(&self) -> bool {
        self.inner.read().led_on
    }

    pub fn water_low(&self) -> bool {
        self.inner.read().water_low
    }

    pub fn snapshot(&self) -> PlantSnapshot {
        self.inner.read().snapshot()
    }

    pub fn set_environment(&self, temperature_tenths: i32, humidity_tenths: i32) {
        let mut state = self.inner.write();
        state.temperature_tenths = temperature_tenths;
        state.humidity_tenths = humidity_tenths;
    }

    pub fn set_led_on(&self, on: bool) {
        self.inner.write().led_on = on;
    }

    pub fn set_water_low(&self, low: bool) {
        self.inner.write().water_low = low;
    }

    pub fn confirm_growth(&self) {
        self.inner.write().growth_confirmed = true;
    }
}
