//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     one interface for digital pins, pulse-generator channels and the i2c bus.
//!     abstracts away the difference between running on a real Raspberry Pi
//!     (using `rppal`) and a development machine or test (in-memory mock).
//!
//! semantics:
//!     - a pin must be exported before direction/read/write, like sysfs gpio.
//!     - unexport releases the handle; the last written level is kept.
//!     - a pulse channel must be exported before it is configured.
//!     - every call is fallible. callers log and continue for non-critical
//!       writes and give up the control loop when setup fails.
//!
//! relationships:
//!     - used by: coordinator (ultrasonic probe, touch pin, lcd),
//!       display node (button, status leds, lcd), actuator node (control loops)
//!     - uses: rppal (on feature="hardware")
//!
//! ==============================================================================

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Level {
    #[default]
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HalError {
    #[error("pin {0} is not exported")]
    NotExported(u8),
    #[error("pin {0} is not configured for this direction")]
    WrongDirection(u8),
    #[error("pin {0} could not be exported")]
    ExportRefused(u8),
    #[error("pulse channel {0} is not exported")]
    PulseNotExported(u8),
    #[error("hardware backend error: {0}")]
    Backend(String),
}

pub type HalResult<T> = Result<T, HalError>;

pub trait HardwareDriver: Send + Sync {
    fn export_pin(&self, pin: u8) -> HalResult<()>;
    fn unexport_pin(&self, pin: u8) -> HalResult<()>;
    fn set_direction(&self, pin: u8, direction: Direction) -> HalResult<()>;
    fn read_pin(&self, pin: u8) -> HalResult<Level>;
    fn write_pin(&self, pin: u8, level: Level) -> HalResult<()>;

    fn export_pulse(&self, channel: u8) -> HalResult<()>;
    fn unexport_pulse(&self, channel: u8) -> HalResult<()>;
    fn configure_pulse(&self, channel: u8, period_ns: u32, duty_ns: u32) -> HalResult<()>;
    fn enable_pulse(&self, channel: u8) -> HalResult<()>;
    fn disable_pulse(&self, channel: u8) -> HalResult<()>;

    fn i2c_write(&self, addr: u16, data: &[u8]) -> HalResult<()>;
}

/// export a pin and set its direction in one step
pub fn setup_pin(hal: &dyn HardwareDriver, pin: u8, direction: Direction) -> HalResult<()> {
    hal.export_pin(pin)?;
    hal.set_direction(pin, direction)
}

/// the driver for this build: rppal with `--features hardware`, otherwise the mock
pub fn default_driver() -> anyhow::Result<Arc<dyn HardwareDriver>> {
    #[cfg(feature = "hardware")]
    {
        Ok(Arc::new(RpiHal::new()?))
    }
    #[cfg(not(feature = "hardware"))]
    {
        Ok(Arc::new(MockHal::new()))
    }
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For dev machines and tests)
// ==============================================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PulseState {
    pub period_ns: u32,
    pub duty_ns: u32,
    pub enabled: bool,
}

#[derive(Default)]
struct MockPins {
    exported: HashSet<u8>,
    directions: HashMap<u8, Direction>,
    levels: HashMap<u8, Level>,
    refuse_export: HashSet<u8>,
    pulses: HashMap<u8, PulseState>,
    pulse_history: Vec<(u8, PulseState)>,
    i2c_log: Vec<(u16, Vec<u8>)>,
}

/// in-memory pins. tests drive inputs with `set_input` and inspect outputs.
#[derive(Default)]
pub struct MockHal {
    pins: Mutex<MockPins>,
}

impl MockHal {
    pub fn new() -> Self {
        tracing::info!("Using MOCK HAL (No hardware access)");
        Self::default()
    }

    /// simulate an external signal on an input pin
    pub fn set_input(&self, pin: u8, level: Level) {
        self.pins.lock().levels.insert(pin, level);
    }

    pub fn level(&self, pin: u8) -> Level {
        self.pins.lock().levels.get(&pin).copied().unwrap_or_default()
    }

    pub fn is_exported(&self, pin: u8) -> bool {
        self.pins.lock().exported.contains(&pin)
    }

    pub fn direction(&self, pin: u8) -> Option<Direction> {
        self.pins.lock().directions.get(&pin).copied()
    }

    /// make every later export of `pin` fail
    pub fn refuse_export(&self, pin: u8) {
        self.pins.lock().refuse_export.insert(pin);
    }

    pub fn pulse(&self, channel: u8) -> Option<PulseState> {
        self.pins.lock().pulses.get(&channel).copied()
    }

    /// every configure/enable/disable applied to a channel, oldest first
    pub fn pulse_history(&self, channel: u8) -> Vec<PulseState> {
        self.pins
            .lock()
            .pulse_history
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, s)| *s)
            .collect()
    }

    pub fn i2c_log(&self) -> Vec<(u16, Vec<u8>)> {
        self.pins.lock().i2c_log.clone()
    }

    fn with_pulse(&self, channel: u8, f: impl FnOnce(&mut PulseState)) -> HalResult<()> {
        let mut pins = self.pins.lock();
        let state = pins.pulses.get_mut(&channel).ok_or(HalError::PulseNotExported(channel))?;
        f(state);
        let snapshot = *state;
        pins.pulse_history.push((channel, snapshot));
        Ok(())
    }
}

impl HardwareDriver for MockHal {
    fn export_pin(&self, pin: u8) -> HalResult<()> {
        let mut pins = self.pins.lock();
        if pins.refuse_export.contains(&pin) {
            return Err(HalError::ExportRefused(pin));
        }
        pins.exported.insert(pin);
        tracing::trace!("[MOCK GPIO] Pin {} exported", pin);
        Ok(())
    }

    fn unexport_pin(&self, pin: u8) -> HalResult<()> {
        let mut pins = self.pins.lock();
        if !pins.exported.remove(&pin) {
            return Err(HalError::NotExported(pin));
        }
        pins.directions.remove(&pin);
        tracing::trace!("[MOCK GPIO] Pin {} unexported", pin);
        Ok(())
    }

    fn set_direction(&self, pin: u8, direction: Direction) -> HalResult<()> {
        let mut pins = self.pins.lock();
        if !pins.exported.contains(&pin) {
            return Err(HalError::NotExported(pin));
        }
        pins.directions.insert(pin, direction);
        Ok(())
    }

    fn read_pin(&self, pin: u8) -> HalResult<Level> {
        let pins = self.pins.lock();
        if !pins.exported.contains(&pin) {
            return Err(HalError::NotExported(pin));
        }
        Ok(pins.levels.get(&pin).copied().unwrap_or_default())
    }

    fn write_pin(&self, pin: u8, level: Level) -> HalResult<()> {
        let mut pins = self.pins.lock();
        if !pins.exported.contains(&pin) {
            return Err(HalError::NotExported(pin));
        }
        if pins.directions.get(&pin) != Some(&Direction::Out) {
            return Err(HalError::WrongDirection(pin));
        }
        pins.levels.insert(pin, level);
        tracing::trace!("[MOCK GPIO] Pin {} write {:?}", pin, level);
        Ok(())
    }

    fn export_pulse(&self, channel: u8) -> HalResult<()> {
        self.pins.lock().pulses.entry(channel).or_default();
        Ok(())
    }

    fn unexport_pulse(&self, channel: u8) -> HalResult<()> {
        self.pins
            .lock()
            .pulses
            .remove(&channel)
            .map(|_| ())
            .ok_or(HalError::PulseNotExported(channel))
    }

    fn configure_pulse(&self, channel: u8, period_ns: u32, duty_ns: u32) -> HalResult<()> {
        self.with_pulse(channel, |p| {
            p.period_ns = period_ns;
            p.duty_ns = duty_ns;
        })
    }

    fn enable_pulse(&self, channel: u8) -> HalResult<()> {
        self.with_pulse(channel, |p| p.enabled = true)
    }

    fn disable_pulse(&self, channel: u8) -> HalResult<()> {
        self.with_pulse(channel, |p| p.enabled = false)
    }

    fn i2c_write(&self, addr: u16, data: &[u8]) -> HalResult<()> {
        self.pins.lock().i2c_log.push((addr, data.to_vec()));
        Ok(())
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================

#[cfg(feature = "hardware")]
pub use rpi::RpiHal;

#[cfg(feature = "hardware")]
mod rpi {
    use super::*;
    use rppal::gpio::{Gpio, InputPin, OutputPin, Pin};
    use rppal::i2c::I2c;
    use rppal::pwm::{Channel, Pwm};
    use std::time::Duration;

    enum PinSlot {
        Idle(Pin),
        Input(InputPin),
        Output(OutputPin),
    }

    pub struct RpiHal {
        gpio: Gpio,
        pins: Mutex<HashMap<u8, PinSlot>>,
        pwm: Mutex<HashMap<u8, Pwm>>,
        i2c: Mutex<Option<I2c>>,
    }

    fn backend(e: impl std::fmt::Display) -> HalError {
        HalError::Backend(e.to_string())
    }

    fn pwm_channel(channel: u8) -> HalResult<Channel> {
        match channel {
            0 => Ok(Channel::Pwm0),
            1 => Ok(Channel::Pwm1),
            other => Err(HalError::Backend(format!("no pwm channel {}", other))),
        }
    }

    impl RpiHal {
        pub fn new() -> anyhow::Result<Self> {
            tracing::info!("Using REAL HARDWARE HAL (rppal)");
            Ok(Self {
                gpio: Gpio::new()?,
                pins: Mutex::new(HashMap::new()),
                pwm: Mutex::new(HashMap::new()),
                i2c: Mutex::new(None),
            })
        }
    }

    impl HardwareDriver for RpiHal {
        fn export_pin(&self, pin: u8) -> HalResult<()> {
            let mut pins = self.pins.lock();
            if !pins.contains_key(&pin) {
                let p = self.gpio.get(pin).map_err(|_| HalError::ExportRefused(pin))?;
                pins.insert(pin, PinSlot::Idle(p));
            }
            Ok(())
        }

        fn unexport_pin(&self, pin: u8) -> HalResult<()> {
            self.pins
                .lock()
                .remove(&pin)
                .map(|_| ())
                .ok_or(HalError::NotExported(pin))
        }

        fn set_direction(&self, pin: u8, direction: Direction) -> HalResult<()> {
            let mut pins = self.pins.lock();
            // the old handle must be dropped before the pin can be taken again
            pins.remove(&pin).ok_or(HalError::NotExported(pin))?;
            let p = self.gpio.get(pin).map_err(backend)?;
            let slot = match direction {
                Direction::In => PinSlot::Input(p.into_input()),
                Direction::Out => {
                    let mut out = p.into_output();
                    // keep the level when the handle is released
                    out.set_reset_on_drop(false);
                    PinSlot::Output(out)
                }
            };
            pins.insert(pin, slot);
            Ok(())
        }

        fn read_pin(&self, pin: u8) -> HalResult<Level> {
            let pins = self.pins.lock();
            match pins.get(&pin) {
                Some(PinSlot::Input(p)) => Ok(Level::from(p.is_high())),
                Some(PinSlot::Output(p)) => Ok(Level::from(p.is_set_high())),
                Some(PinSlot::Idle(p)) => Ok(Level::from(p.read() == rppal::gpio::Level::High)),
                None => Err(HalError::NotExported(pin)),
            }
        }

        fn write_pin(&self, pin: u8, level: Level) -> HalResult<()> {
            let mut pins = self.pins.lock();
            match pins.get_mut(&pin) {
                Some(PinSlot::Output(p)) => {
                    if level.is_high() { p.set_high() } else { p.set_low() }
                    Ok(())
                }
                Some(_) => Err(HalError::WrongDirection(pin)),
                None => Err(HalError::NotExported(pin)),
            }
        }

        fn export_pulse(&self, channel: u8) -> HalResult<()> {
            let mut pwm = self.pwm.lock();
            if !pwm.contains_key(&channel) {
                let p = Pwm::new(pwm_channel(channel)?).map_err(backend)?;
                pwm.insert(channel, p);
            }
            Ok(())
        }

        fn unexport_pulse(&self, channel: u8) -> HalResult<()> {
            self.pwm
                .lock()
                .remove(&channel)
                .map(|_| ())
                .ok_or(HalError::PulseNotExported(channel))
        }

        fn configure_pulse(&self, channel: u8, period_ns: u32, duty_ns: u32) -> HalResult<()> {
            let pwm = self.pwm.lock();
            let p = pwm.get(&channel).ok_or(HalError::PulseNotExported(channel))?;
            p.set_period(Duration::from_nanos(period_ns as u64)).map_err(backend)?;
            p.set_pulse_width(Duration::from_nanos(duty_ns as u64)).map_err(backend)
        }

        fn enable_pulse(&self, channel: u8) -> HalResult<()> {
            let pwm = self.pwm.lock();
            let p = pwm.get(&channel).ok_or(HalError::PulseNotExported(channel))?;
            p.enable().map_err(backend)
        }

        fn disable_pulse(&self, channel: u8) -> HalResult<()> {
            let pwm = self.pwm.lock();
            let p = pwm.get(&channel).ok_or(HalError::PulseNotExported(channel))?;
            p.disable().map_err(backend)
        }

        fn i2c_write(&self, addr: u16, data: &[u8]) -> HalResult<()> {
            let mut guard = self.i2c.lock();
            if guard.is_none() {
                *guard = Some(I2c::new().map_err(backend)?);
            }
            let bus = guard.as_mut().ok_or_else(|| HalError::Backend("i2c unavailable".into()))?;
            bus.set_slave_address(addr).map_err(backend)?;
            bus.write(data).map_err(backend)?;
            Ok(())
        }
    }
}
