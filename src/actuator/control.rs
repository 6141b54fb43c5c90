//! ==============================================================================
//! control.rs - actuator control loops
//! ==============================================================================
//!
//! two loops, each started on demand by a coordinator command:
//!
//!     light loop  polls the light sensor; darkness turns the grow led on,
//!                 daylight turns it off. every change is reported upstream.
//!
//!     water loop  runs the servo pump for a number of strokes derived from
//!                 the current temperature and humidity, then watches the
//!                 tank level until it reads ok.
//!
//! every loop owns a `Quiesce` guard (lifecycle.rs) built before its pins are
//! touched, so a setup failure also releases whatever was already exported.
//!
//! ==============================================================================

use crate::config::ActuatorPins;
use crate::hal::{setup_pin, Direction, HardwareDriver, Level};
use crate::lifecycle::{pause, Quiesce};
use crate::protocol::Command;
use crate::uplink::UplinkSender;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const SERVO_PERIOD_NS: u32 = 20_000_000;
pub const STROKE_PAUSE: Duration = Duration::from_millis(200);
pub const LEVEL_POLL: Duration = Duration::from_secs(1);
pub const LIGHT_POLL: Duration = Duration::from_millis(200);
const NOTE_GAP: Duration = Duration::from_millis(100);

/// note lengths in ms for the low-water alarm
pub const MELODY_MS: [u64; 7] = [262, 294, 330, 294, 262, 262, 262];

/// pulse width for a servo angle: 1 ms at 0°, 2 ms at 180°
pub fn servo_duty_ns(angle: u32) -> u32 {
    angle * 1_000_000 / 180 + 1_000_000
}

/// Pump strokes for whole-unit readings; hotter and more humid means less
/// water. Negative volumes give zero strokes.
pub fn water_strokes(temperature: i32, humidity: i32) -> u32 {
    let volume = (10.0 - temperature as f32 / 10.0) + (10.0 - humidity as f32 / 10.0);
    volume.max(0.0) as u32
}

pub async fn light_loop(
    hal: Arc<dyn HardwareDriver>,
    pins: ActuatorPins,
    uplink: UplinkSender,
    cancel: CancellationToken,
) -> Result<()> {
    let _guard = Quiesce::new(hal.clone(), vec![pins.grow_led], vec![pins.light_sensor], None);
    setup_pin(hal.as_ref(), pins.light_sensor, Direction::In).context("light sensor setup")?;
    setup_pin(hal.as_ref(), pins.grow_led, Direction::Out).context("grow led setup")?;

    // inverted so the first poll always reports
    let mut previous = !hal.read_pin(pins.light_sensor)?.is_high();

    while !cancel.is_cancelled() {
        let bright = hal.read_pin(pins.light_sensor)?.is_high();
        if bright != previous {
            let (level, report) = if bright {
                (Level::Low, Command::LedOff)
            } else {
                (Level::High, Command::LedOn)
            };
            if let Err(e) = hal.write_pin(pins.grow_led, level) {
                warn!(error = %e, "[LIGHT] grow led write failed");
            }
            uplink.report(report).await;
        }
        previous = bright;

        if !pause(&cancel, LIGHT_POLL).await {
            break;
        }
    }
    Ok(())
}

pub async fn water_loop(
    hal: Arc<dyn HardwareDriver>,
    pins: ActuatorPins,
    uplink: UplinkSender,
    reading: (i32, i32),
    cancel: CancellationToken,
) -> Result<()> {
    let channel = pins.servo_channel;
    let _guard = Quiesce::new(
        hal.clone(),
        vec![pins.water_led, pins.buzzer],
        vec![pins.water_supply, pins.water_level],
        Some(channel),
    );
    setup_pin(hal.as_ref(), pins.water_supply, Direction::In).context("water supply setup")?;
    setup_pin(hal.as_ref(), pins.water_level, Direction::In).context("water level setup")?;
    setup_pin(hal.as_ref(), pins.water_led, Direction::Out).context("water led setup")?;
    setup_pin(hal.as_ref(), pins.buzzer, Direction::Out).context("buzzer setup")?;
    hal.export_pulse(channel).context("servo channel setup")?;

    let strokes = water_strokes(reading.0, reading.1);
    info!(temperature = reading.0, humidity = reading.1, strokes, "[WATER] pumping");

    for _ in 0..strokes {
        set_servo_angle(hal.as_ref(), channel, 90);
        if !pause(&cancel, STROKE_PAUSE).await {
            return Ok(());
        }
        set_servo_angle(hal.as_ref(), channel, 0);
        if !pause(&cancel, STROKE_PAUSE).await {
            return Ok(());
        }
    }
    if let Err(e) = hal.disable_pulse(channel) {
        warn!(error = %e, "[WATER] servo disable failed");
    }

    let mut alerted = false;
    loop {
        match hal.read_pin(pins.water_level)? {
            Level::Low => {
                if !alerted {
                    alerted = true;
                    uplink.report(Command::WaterLow).await;
                    if let Err(e) = hal.write_pin(pins.water_led, Level::High) {
                        warn!(error = %e, "[WATER] alert led write failed");
                    }
                    if !play_alarm(hal.as_ref(), pins.buzzer, &cancel).await {
                        return Ok(());
                    }
                }
            }
            Level::High => {
                uplink.report(Command::WaterOk).await;
                for pin in [pins.water_led, pins.buzzer] {
                    if let Err(e) = hal.write_pin(pin, Level::Low) {
                        warn!(pin, error = %e, "[WATER] output reset failed");
                    }
                }
                return Ok(());
            }
        }
        if !pause(&cancel, LEVEL_POLL).await {
            return Ok(());
        }
    }
}

fn set_servo_angle(hal: &dyn HardwareDriver, channel: u8, angle: u32) {
    let result = hal
        .configure_pulse(channel, SERVO_PERIOD_NS, servo_duty_ns(angle))
        .and_then(|()| hal.enable_pulse(channel));
    if let Err(e) = result {
        warn!(angle, error = %e, "[WATER] servo move failed");
    }
}

async fn play_alarm(hal: &dyn HardwareDriver, buzzer: u8, cancel: &CancellationToken) -> bool {
    for note in MELODY_MS {
        if let Err(e) = hal.write_pin(buzzer, Level::High) {
            warn!(error = %e, "[WATER] buzzer write failed");
        }
        let keep_going = pause(cancel, Duration::from_millis(note)).await;
        if let Err(e) = hal.write_pin(buzzer, Level::Low) {
            warn!(error = %e, "[WATER] buzzer write failed");
        }
        if !keep_going || !pause(cancel, NOTE_GAP).await {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockHal;
    use crate::lifecycle::ControlTask;
    use crate::protocol::{Framing, Message, WireReader};
    use tokio::io::{duplex, DuplexStream};

    fn uplink() -> (UplinkSender, WireReader<DuplexStream>) {
        let (ours, theirs) = duplex(64 * 1024);
        (UplinkSender::new(Box::new(ours), Framing::LengthPrefixed), WireReader::new(theirs, Framing::LengthPrefixed))
    }

    async fn next(rx: &mut WireReader<DuplexStream>) -> Message {
        tokio::time::timeout(Duration::from_secs(30), rx.read_message()).await.unwrap().unwrap()
    }

    #[test]
    fn servo_pulse_widths() {
        assert_eq!(servo_duty_ns(0), 1_000_000);
        assert_eq!(servo_duty_ns(90), 1_500_000);
        assert_eq!(servo_duty_ns(180), 2_000_000);
    }

    #[test]
    fn strokes_follow_whole_unit_readings() {
        // 25°C, 50% -> 7.5 + 5.0
        assert_eq!(water_strokes(25, 50), 12);
        assert_eq!(water_strokes(0, 0), 20);
        assert_eq!(water_strokes(40, 95), 6);
        assert_eq!(water_strokes(120, 100), 0);
        assert_eq!(water_strokes(-5, 100), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn light_loop_reports_first_reading_then_changes() {
        let hal = Arc::new(MockHal::new());
        let pins = ActuatorPins::default();
        let (tx, mut rx) = uplink();
        hal.set_input(pins.light_sensor, Level::Low);

        let task = ControlTask::spawn("light", |cancel| light_loop(hal.clone(), pins.clone(), tx, cancel));

        assert_eq!(next(&mut rx).await, Message::Command(Command::LedOn));
        assert_eq!(hal.level(pins.grow_led), Level::High);

        hal.set_input(pins.light_sensor, Level::High);
        assert_eq!(next(&mut rx).await, Message::Command(Command::LedOff));
        assert_eq!(hal.level(pins.grow_led), Level::Low);

        hal.set_input(pins.light_sensor, Level::Low);
        assert_eq!(next(&mut rx).await, Message::Command(Command::LedOn));

        task.stop().await;
        assert_eq!(hal.level(pins.grow_led), Level::Low);
        assert!(!hal.is_exported(pins.grow_led));
        assert!(!hal.is_exported(pins.light_sensor));
    }

    #[tokio::test(start_paused = true)]
    async fn light_loop_setup_failure_releases_pins() {
        let hal = Arc::new(MockHal::new());
        let pins = ActuatorPins::default();
        hal.refuse_export(pins.grow_led);
        let (tx, _rx) = uplink();

        let result = light_loop(hal.clone(), pins.clone(), tx, CancellationToken::new()).await;
        assert!(result.is_err());
        assert!(!hal.is_exported(pins.light_sensor));
    }

    #[tokio::test(start_paused = true)]
    async fn water_loop_pumps_then_reports_ok() {
        let hal = Arc::new(MockHal::new());
        let pins = ActuatorPins::default();
        let (tx, mut rx) = uplink();
        hal.set_input(pins.water_level, Level::High);

        water_loop(hal.clone(), pins.clone(), tx, (40, 80), CancellationToken::new()).await.unwrap();

        // (10 - 4.0) + (10 - 8.0) = 8 strokes, two moves each
        let mut moves: Vec<_> = hal
            .pulse_history(pins.servo_channel)
            .into_iter()
            .map(|p| p.duty_ns)
            .collect();
        moves.dedup();
        assert_eq!(moves.len(), 16);
        assert_eq!(moves[0], 1_500_000);
        assert_eq!(moves[1], 1_000_000);

        assert_eq!(next(&mut rx).await, Message::Command(Command::WaterOk));
        assert_eq!(hal.pulse(pins.servo_channel), None);
        assert_eq!(hal.level(pins.water_led), Level::Low);
        assert!(!hal.is_exported(pins.buzzer));
    }

    #[tokio::test(start_paused = true)]
    async fn water_loop_alerts_once_while_tank_is_low() {
        let hal = Arc::new(MockHal::new());
        let pins = ActuatorPins::default();
        let (tx, mut rx) = uplink();
        hal.set_input(pins.water_level, Level::Low);

        let task = ControlTask::spawn("water", |cancel| water_loop(hal.clone(), pins.clone(), tx, (90, 90), cancel));

        assert_eq!(next(&mut rx).await, Message::Command(Command::WaterLow));
        assert_eq!(hal.level(pins.water_led), Level::High);

        // several polls later the tank is still low: no second alert
        tokio::time::sleep(Duration::from_secs(5)).await;
        hal.set_input(pins.water_level, Level::High);
        assert_eq!(next(&mut rx).await, Message::Command(Command::WaterOk));
        assert_eq!(hal.level(pins.water_led), Level::Low);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!task.is_running());
        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_water_loop_goes_quiet() {
        let hal = Arc::new(MockHal::new());
        let pins = ActuatorPins::default();
        let (tx, mut rx) = uplink();
        hal.set_input(pins.water_level, Level::Low);

        let task = ControlTask::spawn("water", |cancel| water_loop(hal.clone(), pins.clone(), tx, (90, 90), cancel));
        assert_eq!(next(&mut rx).await, Message::Command(Command::WaterLow));
        task.stop().await;

        assert_eq!(hal.level(pins.water_led), Level::Low);
        assert_eq!(hal.level(pins.buzzer), Level::Low);
        assert!(!hal.is_exported(pins.water_level));
        assert_eq!(hal.pulse(pins.servo_channel), None);
    }
}
