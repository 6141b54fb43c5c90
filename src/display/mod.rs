//! ==============================================================================
//! display - the button and lcd node
//! ==============================================================================
//!
//! purpose:
//!     on connect, asks the coordinator for the plant name and planting date.
//!     then two loops run side by side:
//!
//!     button loop   a press (HIGH -> LOW) sends `PLANT UPDATE`, waits 1s for
//!                   the snapshot, and shows identity then readings on the
//!                   lcd, 2s each.
//!
//!     inbound loop  WATER LOW / WATER OK switch the water led,
//!                   Grow OK lights the grow led,
//!                   PLANT DATA is followed by the snapshot record.
//!
//! relationships:
//!     - uses: uplink.rs, lifecycle.rs, lcd.rs, hal.rs
//!     - peer of: coordinator::display_dispatch
//!
//! ==============================================================================

use crate::config::{DisplayPins, NodeConfig};
use crate::domain::PlantSnapshot;
use crate::hal::{setup_pin, Direction, HardwareDriver, Level};
use crate::lcd::Lcd;
use crate::lifecycle::{pause, ControlTask, Quiesce};
use crate::protocol::{Command, Message, WireError};
use crate::uplink::{self, Inbound, UplinkSender};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const BUTTON_POLL: Duration = Duration::from_millis(50);
const SNAPSHOT_WAIT: Duration = Duration::from_secs(1);
const PAGE_HOLD: Duration = Duration::from_secs(2);

/// what the display knows, filled from replies and pushed snapshots
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisplayCache {
    pub name: String,
    pub planted_date: String,
    pub snapshot: PlantSnapshot,
}

impl DisplayCache {
    pub fn reading_lines(&self) -> (String, String) {
        let s = &self.snapshot;
        let line1 = format!(
            "T:{:.1}C H:{:.1}%",
            s.temperature_tenths as f32 / 10.0,
            s.humidity_tenths as f32 / 10.0
        );
        let line2 = if s.led_on { "LED ON" } else { "LED OFF" };
        (line1, line2.to_string())
    }
}

pub type SharedCache = Arc<Mutex<DisplayCache>>;

pub struct DisplayNode {
    hal: Arc<dyn HardwareDriver>,
    pins: DisplayPins,
    lcd: Lcd,
    inbound: Inbound,
    uplink: UplinkSender,
    cache: SharedCache,
}

impl DisplayNode {
    pub fn new(
        hal: Arc<dyn HardwareDriver>,
        pins: DisplayPins,
        lcd: Lcd,
        inbound: Inbound,
        uplink: UplinkSender,
    ) -> Self {
        Self { hal, pins, lcd, inbound, uplink, cache: SharedCache::default() }
    }

    pub async fn connect(config: &NodeConfig, hal: Arc<dyn HardwareDriver>) -> Result<Self> {
        let (inbound, uplink) = uplink::connect(&config.network.coordinator_addr, config.network.framing).await?;
        let lcd = Lcd::new(hal.clone(), config.lcd.i2c_addr);
        Ok(Self::new(hal, config.pins.display.clone(), lcd, inbound, uplink))
    }

    pub fn cache(&self) -> SharedCache {
        self.cache.clone()
    }

    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let name = self.inbound.request(&self.uplink, Command::PlantName).await.context("plant name request")?;
        let date = self.inbound.request(&self.uplink, Command::PlantDate).await.context("plant date request")?;
        info!(%name, %date, "[DISPLAY] plant identity received");
        {
            let mut cache = self.cache.lock();
            cache.name = name;
            cache.planted_date = date;
        }

        let button = {
            let (hal, pins, lcd) = (self.hal.clone(), self.pins.clone(), self.lcd.clone());
            let (uplink, cache) = (self.uplink.clone(), self.cache.clone());
            ControlTask::spawn("button", move |cancel| button_loop(hal, pins, lcd, uplink, cache, cancel))
        };
        let _leds = Quiesce::new(self.hal.clone(), vec![self.pins.water_led, self.pins.grow_led], vec![], None);

        loop {
            let msg = tokio::select! {
                msg = self.inbound.next() => msg,
                _ = shutdown.cancelled() => break,
            };
            match msg {
                Ok(msg) => {
                    if let Err(e) = self.handle(msg).await {
                        warn!(error = %e, "[DISPLAY] snapshot receive failed");
                        break;
                    }
                }
                Err(WireError::Closed) => {
                    info!("[DISPLAY] coordinator closed the connection");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "[DISPLAY] receive failed");
                    break;
                }
            }
        }

        button.stop().await;
        Ok(())
    }

    async fn handle(&mut self, msg: Message) -> Result<(), WireError> {
        match msg {
            Message::Command(Command::WaterLow) => {
                info!("[DISPLAY] water low");
                self.set_led(self.pins.water_led, Level::High);
            }
            Message::Command(Command::WaterOk) => {
                info!("[DISPLAY] water ok");
                self.set_led(self.pins.water_led, Level::Low);
                if let Err(e) = self.hal.unexport_pin(self.pins.water_led) {
                    debug!(error = %e, "[DISPLAY] water led was not exported");
                }
            }
            Message::Command(Command::GrowOk) => {
                info!("[DISPLAY] growth confirmed");
                self.set_led(self.pins.grow_led, Level::High);
            }
            Message::Command(Command::PlantData) => {
                let snapshot = self.inbound.read_snapshot().await?;
                debug!(?snapshot, "[DISPLAY] snapshot received");
                self.cache.lock().snapshot = snapshot;
            }
            other => warn!(message = %other.as_text(), "[DISPLAY] unexpected message"),
        }
        Ok(())
    }

    fn set_led(&self, pin: u8, level: Level) {
        let result = match level {
            Level::High => setup_pin(self.hal.as_ref(), pin, Direction::Out).and_then(|()| self.hal.write_pin(pin, level)),
            Level::Low => self.hal.write_pin(pin, level),
        };
        if let Err(e) = result {
            warn!(pin, error = %e, "[DISPLAY] led write failed");
        }
    }
}

async fn button_loop(
    hal: Arc<dyn HardwareDriver>,
    pins: DisplayPins,
    lcd: Lcd,
    uplink: UplinkSender,
    cache: SharedCache,
    cancel: CancellationToken,
) -> Result<()> {
    let _guard = Quiesce::new(hal.clone(), vec![pins.button_power], vec![pins.button], None);
    setup_pin(hal.as_ref(), pins.button_power, Direction::Out).context("button power setup")?;
    setup_pin(hal.as_ref(), pins.button, Direction::In).context("button setup")?;
    hal.write_pin(pins.button_power, Level::High).context("button power on")?;

    let mut previous = hal.read_pin(pins.button)?;
    loop {
        let current = hal.read_pin(pins.button)?;
        if previous == Level::High && current == Level::Low {
            info!("[BUTTON] pressed");
            if !show_plant_info(&lcd, &uplink, &cache, &cancel).await {
                break;
            }
        }
        previous = current;
        if !pause(&cancel, BUTTON_POLL).await {
            break;
        }
    }
    Ok(())
}

/// request fresh data and show both pages; false if cancelled midway
async fn show_plant_info(lcd: &Lcd, uplink: &UplinkSender, cache: &SharedCache, cancel: &CancellationToken) -> bool {
    uplink.report(Command::PlantUpdate).await;
    if !pause(cancel, SNAPSHOT_WAIT).await {
        return false;
    }

    let snapshot = cache.lock().clone();
    lcd_page(lcd, true, snapshot.name.clone(), snapshot.planted_date.clone()).await;
    if !pause(cancel, PAGE_HOLD).await {
        return false;
    }

    let (line1, line2) = snapshot.reading_lines();
    lcd_clear(lcd).await;
    lcd_page(lcd, false, line1, line2).await;
    let shown = pause(cancel, PAGE_HOLD).await;
    lcd_clear(lcd).await;
    shown
}

async fn lcd_page(lcd: &Lcd, init: bool, line1: String, line2: String) {
    let lcd = lcd.clone();
    let result = tokio::task::spawn_blocking(move || {
        if init {
            lcd.init()?;
        }
        lcd.show(&line1, &line2)
    })
    .await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "[LCD] write failed"),
        Err(e) => warn!(error = %e, "[LCD] task failed"),
    }
}

async fn lcd_clear(lcd: &Lcd) {
    let lcd = lcd.clone();
    match tokio::task::spawn_blocking(move || lcd.clear()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "[LCD] clear failed"),
        Err(e) => warn!(error = %e, "[LCD] task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockHal;
    use crate::lcd::DEFAULT_ADDR;
    use crate::protocol::{BoxedReader, Framing, WireReader, WireWriter};
    use tokio::io::{duplex, DuplexStream};

    struct Coordinator {
        rx: WireReader<DuplexStream>,
        tx: WireWriter<DuplexStream>,
    }

    fn node(hal: Arc<MockHal>) -> (DisplayNode, Coordinator) {
        let (node_out, coord_in) = duplex(64 * 1024);
        let (coord_out, node_in) = duplex(64 * 1024);
        let framing = Framing::LengthPrefixed;
        let node = DisplayNode::new(
            hal.clone(),
            DisplayPins::default(),
            Lcd::new(hal, DEFAULT_ADDR).with_settle(Duration::ZERO),
            Inbound::new(WireReader::new(Box::new(node_in) as BoxedReader, framing)),
            UplinkSender::new(Box::new(node_out), framing),
        );
        (node, Coordinator { rx: WireReader::new(coord_in, framing), tx: WireWriter::new(coord_out, framing) })
    }

    async fn next(rx: &mut WireReader<DuplexStream>) -> Message {
        tokio::time::timeout(Duration::from_secs(30), rx.read_message()).await.unwrap().unwrap()
    }

    /// answer the two identity requests sent at startup
    async fn greet(coord: &mut Coordinator) {
        assert_eq!(next(&mut coord.rx).await, Message::Command(Command::PlantName));
        coord.tx.write_text("Tomato").await.unwrap();
        assert_eq!(next(&mut coord.rx).await, Message::Command(Command::PlantDate));
        coord.tx.write_text("2024-06-01").await.unwrap();
    }

    #[test]
    fn reading_page_text() {
        let cache = DisplayCache {
            snapshot: PlantSnapshot { temperature_tenths: 254, humidity_tenths: 613, led_on: true },
            ..Default::default()
        };
        assert_eq!(cache.reading_lines(), ("T:25.4C H:61.3%".to_string(), "LED ON".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn status_leds_follow_pushed_commands() {
        let hal = Arc::new(MockHal::new());
        let pins = DisplayPins::default();
        let (node, mut coord) = node(hal.clone());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(node.run(shutdown.clone()));
        greet(&mut coord).await;

        coord.tx.write_command(Command::WaterLow).await.unwrap();
        coord.tx.write_command(Command::GrowOk).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hal.level(pins.water_led), Level::High);
        assert_eq!(hal.level(pins.grow_led), Level::High);

        coord.tx.write_command(Command::WaterOk).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hal.level(pins.water_led), Level::Low);
        assert!(!hal.is_exported(pins.water_led));

        shutdown.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(hal.level(pins.grow_led), Level::Low);
        assert!(!hal.is_exported(pins.button));
    }

    #[tokio::test(start_paused = true)]
    async fn button_press_pulls_a_snapshot() {
        let hal = Arc::new(MockHal::new());
        let pins = DisplayPins::default();
        hal.set_input(pins.button, Level::High);
        let (node, mut coord) = node(hal.clone());
        let cache = node.cache();
        let task = tokio::spawn(node.run(CancellationToken::new()));
        greet(&mut coord).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hal.level(pins.button_power), Level::High);
        hal.set_input(pins.button, Level::Low);

        assert_eq!(next(&mut coord.rx).await, Message::Command(Command::PlantUpdate));
        let snapshot = PlantSnapshot { temperature_tenths: 231, humidity_tenths: 480, led_on: false };
        coord.tx.write_command(Command::PlantData).await.unwrap();
        coord.tx.write_snapshot(&snapshot).await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        let seen = cache.lock().clone();
        assert_eq!(seen.snapshot, snapshot);
        assert_eq!(seen.name, "Tomato");
        assert!(!hal.i2c_log().is_empty());

        // holding the button down does not trigger again
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(tokio::time::timeout(Duration::from_millis(500), coord.rx.read_message()).await.is_err());

        drop(coord);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn lost_coordinator_during_greeting_is_an_error() {
        let hal = Arc::new(MockHal::new());
        let (node, coord) = node(hal);
        drop(coord);
        assert!(node.run(CancellationToken::new()).await.is_err());
    }
}
