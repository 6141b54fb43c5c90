//! ==============================================================================
//! sensor.rs - environment sampling and growth probe
//! ==============================================================================
//!
//! purpose:
//!     two measurement sources the coordinator polls:
//!     - temperature/humidity from a DHT11 via a one-shot python subprocess
//!     - plant height proxy from an ultrasonic range finder (trigger/echo pins)
//!
//! why subprocess to python?:
//!     dht sensors require precise bit-banging timing (~microseconds).
//!     userspace rust without real-time guarantees is unreliable here.
//!     Adafruit_DHT handles this with retries and timing compensation.
//!
//! relationships:
//!     - used by: coordinator::peripherals (environment sampler),
//!       coordinator::scheduler (growth probe)
//!     - uses: hal.rs (trigger/echo pins)
//!
//! ==============================================================================

use crate::hal::{HardwareDriver, Level};
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// speed of sound in cm/s, halved for the round trip in `measure`
const SOUND_CM_PER_SEC: f32 = 34_300.0;

pub trait EnvironmentSensor: Send + Sync {
    /// one reading as (temperature °C, relative humidity %)
    fn sample(&self) -> Result<(f32, f32)>;
}

pub trait GrowthProbe: Send {
    /// distance from the sensor to the top of the plant in cm
    fn distance_cm(&mut self) -> Result<f32>;
}

/// runs the DHT reader through python and parses its `t,h` line
pub struct ScriptSampler {
    python: String,
    model: String,
    pin: u8,
}

impl ScriptSampler {
    pub fn new(python: impl Into<String>, model: impl Into<String>, pin: u8) -> Self {
        Self { python: python.into(), model: model.into(), pin }
    }

    fn script(&self) -> String {
        format!(
            r#"
import Adafruit_DHT
humidity, temperature = Adafruit_DHT.read_retry(Adafruit_DHT.{}, {})
if humidity is not None and temperature is not None:
    print(f"{{temperature:.1f}},{{humidity:.1f}}")
else:
    print("Failed to retrieve data from humidity sensor")
"#,
            self.model, self.pin
        )
    }
}

impl EnvironmentSensor for ScriptSampler {
    fn sample(&self) -> Result<(f32, f32)> {
        use std::process::Command;

        let output = Command::new(&self.python)
            .arg("-c")
            .arg(self.script())
            .output()
            .with_context(|| format!("failed to run {}", self.python))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Python error: {}", stderr.trim()));
        }

        parse_reading(&String::from_utf8_lossy(&output.stdout))
    }
}

/// parse `"<temp>,<humidity>"` as printed by the reader script
pub fn parse_reading(line: &str) -> Result<(f32, f32)> {
    let line = line.trim();
    let (t, h) = line
        .split_once(',')
        .ok_or_else(|| anyhow!("unexpected sensor output: {:?}", line))?;
    let temp: f32 = t.trim().parse().with_context(|| format!("bad temperature {:?}", t))?;
    let humidity: f32 = h.trim().parse().with_context(|| format!("bad humidity {:?}", h))?;
    Ok((temp, humidity))
}

/// readings scaled to tenths, truncated toward zero
pub fn to_tenths(value: f32) -> i32 {
    (value * 10.0) as i32
}

/// fixed reading for dev machines without a sensor
pub struct MockEnvironment {
    pub reading: (f32, f32),
}

impl Default for MockEnvironment {
    fn default() -> Self {
        Self { reading: (25.0, 50.0) }
    }
}

impl EnvironmentSensor for MockEnvironment {
    fn sample(&self) -> Result<(f32, f32)> {
        Ok(self.reading)
    }
}

/// fixed distance for dev machines without the range finder
pub struct MockProbe {
    pub distance_cm: f32,
}

impl Default for MockProbe {
    fn default() -> Self {
        Self { distance_cm: 30.0 }
    }
}

impl GrowthProbe for MockProbe {
    fn distance_cm(&mut self) -> Result<f32> {
        Ok(self.distance_cm)
    }
}

pub struct UltrasonicProbe {
    hal: Arc<dyn HardwareDriver>,
    trig: u8,
    echo: u8,
    timeout: Duration,
}

impl UltrasonicProbe {
    pub fn new(hal: Arc<dyn HardwareDriver>, trig: u8, echo: u8) -> Self {
        Self { hal, trig, echo, timeout: Duration::from_millis(100) }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn wait_for(&self, level: Level, deadline: Instant) -> Result<Instant> {
        loop {
            if self.hal.read_pin(self.echo)? == level {
                return Ok(Instant::now());
            }
            if Instant::now() >= deadline {
                return Err(anyhow!("echo pin {} never went {:?}", self.echo, level));
            }
            std::hint::spin_loop();
        }
    }

    /// blocking: busy-waits on the echo pin for up to the timeout
    pub fn measure(&self) -> Result<f32> {
        self.hal.write_pin(self.trig, Level::High)?;
        std::thread::sleep(Duration::from_micros(10));
        self.hal.write_pin(self.trig, Level::Low)?;

        let deadline = Instant::now() + self.timeout;
        let start = self.wait_for(Level::High, deadline)?;
        let end = self.wait_for(Level::Low, deadline)?;

        let travel = end.duration_since(start).as_secs_f32();
        Ok(travel * SOUND_CM_PER_SEC / 2.0)
    }
}

impl GrowthProbe for UltrasonicProbe {
    fn distance_cm(&mut self) -> Result<f32> {
        self.measure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{setup_pin, Direction, MockHal};

    #[test]
    fn parses_script_output() {
        assert_eq!(parse_reading("23.0,41.5\n").unwrap(), (23.0, 41.5));
        assert_eq!(parse_reading(" -2.5 , 90.0 ").unwrap(), (-2.5, 90.0));
    }

    #[test]
    fn rejects_failure_line() {
        assert!(parse_reading("Failed to retrieve data from humidity sensor").is_err());
        assert!(parse_reading("abc,12").is_err());
        assert!(parse_reading("").is_err());
    }

    #[test]
    fn tenths_truncate() {
        assert_eq!(to_tenths(23.45), 234);
        assert_eq!(to_tenths(41.0), 410);
        assert_eq!(to_tenths(-1.25), -12);
    }

    #[test]
    fn script_names_model_and_pin() {
        let s = ScriptSampler::new("python3", "DHT11", 27).script();
        assert!(s.contains("Adafruit_DHT.DHT11, 27"));
        assert!(s.contains("{temperature:.1f},{humidity:.1f}"));
    }

    #[test]
    fn mock_sources_report_fixed_values() {
        assert_eq!(MockEnvironment::default().sample().unwrap(), (25.0, 50.0));
        let mut probe = MockProbe::default();
        assert_eq!(probe.distance_cm().unwrap(), 30.0);
        assert_eq!(probe.distance_cm().unwrap(), 30.0);
    }

    #[test]
    fn probe_times_out_without_echo() {
        let hal = Arc::new(MockHal::new());
        setup_pin(hal.as_ref(), 24, Direction::Out).unwrap();
        setup_pin(hal.as_ref(), 23, Direction::In).unwrap();
        let mut probe = UltrasonicProbe::new(hal.clone(), 24, 23).with_timeout(Duration::from_millis(5));
        assert!(probe.distance_cm().is_err());
        // trigger is left low after the pulse
        assert_eq!(hal.level(24), Level::Low);
    }
}
