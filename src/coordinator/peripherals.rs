//! ==============================================================================
//! peripherals.rs - coordinator-local hardware loops
//! ==============================================================================
//!
//! purpose:
//!     - environment sampler: one DHT reading every sample interval, stored
//!       into PlantState as tenths
//!     - touch menu: each touch advances the lcd to the next page
//!     - pin setup/teardown for the probe, the touch pad and the lcd
//!
//! both loops are started after the startup barrier and never exit on a
//! driver fault; failed readings are logged and the loop keeps polling.
//!
//! ==============================================================================

use crate::config::CoordinatorPins;
use crate::domain::PlantState;
use crate::hal::{setup_pin, Direction, HardwareDriver, Level};
use crate::lcd::Lcd;
use crate::sensor::{to_tenths, EnvironmentSensor};
use crate::state::SharedPlantState;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const TOUCH_POLL: Duration = Duration::from_millis(10);
const TOUCH_HOLD: Duration = Duration::from_millis(500);

/// the four pages of the touch menu, in display order
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MenuPage {
    #[default]
    Menu,
    Water,
    Environment,
    Led,
}

impl MenuPage {
    pub fn next(self) -> Self {
        match self {
            MenuPage::Menu => MenuPage::Water,
            MenuPage::Water => MenuPage::Environment,
            MenuPage::Environment => MenuPage::Led,
            MenuPage::Led => MenuPage::Menu,
        }
    }

    pub fn lines(self, state: &PlantState) -> (String, String) {
        match self {
            MenuPage::Menu => ("1 : WaterConsume".into(), "2 : ENV  3 : LED".into()),
            MenuPage::Water if state.water_low => ("Fill in the".into(), "WATER TANK".into()),
            MenuPage::Water => ("Water Is Full".into(), "It's OK".into()),
            MenuPage::Environment => (
                format!("Temp: {:.1}C", state.temperature_tenths as f32 / 10.0),
                format!("Humid: {:.1}%", state.humidity_tenths as f32 / 10.0),
            ),
            MenuPage::Led => {
                let status = if state.led_on { "ON" } else { "OFF" };
                ("LED STATE".into(), status.into())
            }
        }
    }
}

/// export the probe and touch pins and bring up the lcd; failures are logged
pub fn setup_hardware(hal: &dyn HardwareDriver, pins: &CoordinatorPins, lcd: &Lcd) {
    let steps = [
        ("trigger", setup_pin(hal, pins.trig, Direction::Out)),
        ("echo", setup_pin(hal, pins.echo, Direction::In)),
        ("touch", setup_pin(hal, pins.touch, Direction::In)),
    ];
    for (name, result) in steps {
        if let Err(e) = result {
            error!(pin = name, error = %e, "[HW] pin setup failed");
        }
    }
    if let Err(e) = hal.write_pin(pins.trig, Level::Low) {
        warn!(error = %e, "[HW] could not idle trigger pin");
    }
    if let Err(e) = lcd.init() {
        error!(error = %e, "[HW] lcd init failed");
    }
}

pub fn teardown_hardware(hal: &dyn HardwareDriver, pins: &CoordinatorPins) {
    for pin in [pins.trig, pins.echo, pins.touch] {
        if let Err(e) = hal.unexport_pin(pin) {
            debug!(pin, error = %e, "[HW] unexport skipped");
        }
    }
    info!("[HW] coordinator pins released");
}

pub async fn run_environment_sampler(
    sensor: Arc<dyn EnvironmentSensor>,
    state: SharedPlantState,
    interval: Duration,
) {
    info!(interval_ms = interval.as_millis() as u64, "[SENSOR] environment sampler started");
    loop {
        let sensor = sensor.clone();
        match tokio::task::spawn_blocking(move || sensor.sample()).await {
            Ok(Ok((temp, humidity))) => {
                let (t, h) = (to_tenths(temp), to_tenths(humidity));
                state.set_environment(t, h);
                debug!(temperature_tenths = t, humidity_tenths = h, "[SENSOR] sample stored");
            }
            Ok(Err(e)) => warn!(error = %e, "[SENSOR] sample failed"),
            Err(e) => warn!(error = %e, "[SENSOR] sampler task failed"),
        }
        tokio::time::sleep(interval).await;
    }
}

pub async fn run_touch_menu(hal: Arc<dyn HardwareDriver>, touch_pin: u8, lcd: Lcd, state: SharedPlantState) {
    let mut page = MenuPage::default();
    render(&lcd, page, &state).await;
    info!(pin = touch_pin, "[TOUCH] menu loop started");

    loop {
        match hal.read_pin(touch_pin) {
            Ok(Level::High) => {
                page = page.next();
                debug!(?page, "[TOUCH] page changed");
                render(&lcd, page, &state).await;
                tokio::time::sleep(TOUCH_HOLD).await;
            }
            Ok(Level::Low) => tokio::time::sleep(TOUCH_POLL).await,
            Err(e) => {
                error!(error = %e, "[TOUCH] touch pin unreadable, menu stopped");
                return;
            }
        }
    }
}

async fn render(lcd: &Lcd, page: MenuPage, state: &SharedPlantState) {
    let (line1, line2) = page.lines(&state.get());
    let lcd = lcd.clone();
    let result = tokio::task::spawn_blocking(move || {
        lcd.clear()?;
        lcd.show(&line1, &line2)
    })
    .await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "[LCD] write failed"),
        Err(e) => warn!(error = %e, "[LCD] render task failed"),
    }
}
