//! ==============================================================================
//! actuator - the irrigation and lighting node
//! ==============================================================================
//!
//! purpose:
//!     connects to the coordinator and reacts to its schedule commands:
//!
//!         WATER        restart the water loop with fresh TEMP / HUMID readings
//!         LIGHT_START  start the light loop unless it is already running
//!         LIGHT_END    stop the light loop
//!
//!     anything else is logged and ignored. the control loops report
//!     `LED ON|OFF` and `WATER LOW|OK` upstream on their own.
//!
//! relationships:
//!     - uses: uplink.rs (connection), control.rs (loops), lifecycle.rs, hal.rs
//!     - peer of: coordinator::actuator_dispatch
//!
//! ==============================================================================

pub mod control;

use crate::config::{ActuatorPins, NodeConfig};
use crate::hal::HardwareDriver;
use crate::lifecycle::ControlTask;
use crate::protocol::{Command, Message, WireError};
use crate::uplink::{self, Inbound, UplinkSender};
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct ActuatorNode {
    hal: Arc<dyn HardwareDriver>,
    pins: ActuatorPins,
    inbound: Inbound,
    uplink: UplinkSender,
    water: Option<ControlTask>,
    light: Option<ControlTask>,
}

impl ActuatorNode {
    pub fn new(
        hal: Arc<dyn HardwareDriver>,
        pins: ActuatorPins,
        inbound: Inbound,
        uplink: UplinkSender,
    ) -> Self {
        Self { hal, pins, inbound, uplink, water: None, light: None }
    }

    pub async fn connect(config: &NodeConfig, hal: Arc<dyn HardwareDriver>) -> Result<Self> {
        let (inbound, uplink) = uplink::connect(&config.network.coordinator_addr, config.network.framing).await?;
        Ok(Self::new(hal, config.pins.actuator.clone(), inbound, uplink))
    }

    /// Process commands until the coordinator goes away or `shutdown` fires;
    /// both control loops are stopped and quiesced before returning.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        info!("[ACTUATOR] waiting for schedule commands");
        loop {
            let msg = tokio::select! {
                msg = self.inbound.next() => msg,
                _ = shutdown.cancelled() => break,
            };
            match msg {
                Ok(msg) => self.handle(msg, &shutdown).await,
                Err(WireError::Closed) => {
                    info!("[ACTUATOR] coordinator closed the connection");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "[ACTUATOR] receive failed");
                    break;
                }
            }
        }
        self.stop_all().await;
        Ok(())
    }

    async fn handle(&mut self, msg: Message, shutdown: &CancellationToken) {
        match msg {
            Message::Command(Command::Water) => {
                if let Some(task) = self.water.take() {
                    task.stop().await;
                }
                let reading = tokio::select! {
                    reading = self.read_environment() => reading,
                    _ = shutdown.cancelled() => {
                        info!("[ACTUATOR] shutdown while waiting for readings, not watering");
                        return;
                    }
                };
                let reading = match reading {
                    Ok(reading) => reading,
                    Err(e) => {
                        warn!(error = %e, "[ACTUATOR] could not fetch readings, skipping watering");
                        return;
                    }
                };
                let (hal, pins, uplink) = (self.hal.clone(), self.pins.clone(), self.uplink.clone());
                self.water = Some(ControlTask::spawn("water", move |cancel| {
                    control::water_loop(hal, pins, uplink, reading, cancel)
                }));
            }
            Message::Command(Command::LightStart) => {
                if self.light.as_ref().is_some_and(ControlTask::is_running) {
                    info!("[ACTUATOR] light loop already running");
                    return;
                }
                let (hal, pins, uplink) = (self.hal.clone(), self.pins.clone(), self.uplink.clone());
                self.light = Some(ControlTask::spawn("light", move |cancel| {
                    control::light_loop(hal, pins, uplink, cancel)
                }));
            }
            Message::Command(Command::LightEnd) => {
                if let Some(task) = self.light.take() {
                    task.stop().await;
                }
            }
            other => warn!(command = %other.as_text(), "[ACTUATOR] invalid command"),
        }
    }

    /// temperature and humidity in whole units (tenths / 10)
    async fn read_environment(&mut self) -> Result<(i32, i32), WireError> {
        let temperature = self.request_reading(Command::Temp).await? / 10;
        let humidity = self.request_reading(Command::Humid).await? / 10;
        Ok((temperature, humidity))
    }

    async fn request_reading(&mut self, cmd: Command) -> Result<i32, WireError> {
        let reply = self.inbound.request(&self.uplink, cmd).await?;
        Ok(reply.trim().parse().unwrap_or_else(|_| {
            warn!(request = %cmd, %reply, "[ACTUATOR] reply is not a number, using 0");
            0
        }))
    }

    async fn stop_all(&mut self) {
        if let Some(task) = self.water.take() {
            task.stop().await;
        }
        if let Some(task) = self.light.take() {
            task.stop().await;
        }
    }
}
