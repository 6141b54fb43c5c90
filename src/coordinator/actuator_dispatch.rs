//! Dispatch loop for the Actuator peer: status reports in, sensor readings
//! out, water alerts relayed to the Display peer.

use super::peer::{PeerConnection, PeerSender};
use crate::domain::WaterLevel;
use crate::protocol::{Command, Message, WireError, UNKNOWN_REQUEST};
use crate::state::SharedPlantState;
use tracing::{debug, info, warn};

/// Latched edge detector for water alerts. Remembers the last level that
/// actually reached the Display, so repeated reports are relayed once.
#[derive(Debug, Clone, Copy)]
pub struct WaterForwarder {
    last_forwarded: WaterLevel,
}

impl Default for WaterForwarder {
    fn default() -> Self {
        Self { last_forwarded: WaterLevel::Ok }
    }
}

impl WaterForwarder {
    pub fn needs_forward(&self, level: WaterLevel) -> bool {
        self.last_forwarded != level
    }

    pub fn mark_forwarded(&mut self, level: WaterLevel) {
        self.last_forwarded = level;
    }
}

pub struct ActuatorDispatcher {
    state: SharedPlantState,
    reply: PeerSender,
    display: PeerSender,
    water: WaterForwarder,
}

impl ActuatorDispatcher {
    pub fn new(state: SharedPlantState, reply: PeerSender, display: PeerSender) -> Self {
        Self { state, reply, display, water: WaterForwarder::default() }
    }

    /// Errors are reply failures on the actuator link only; a dead display
    /// link is logged and does not stop the loop.
    pub async fn handle(&mut self, msg: &Message) -> Result<(), WireError> {
        match msg {
            Message::Command(Command::LedOn) => {
                self.state.set_led_on(true);
                Ok(())
            }
            Message::Command(Command::LedOff) => {
                self.state.set_led_on(false);
                Ok(())
            }
            Message::Command(Command::WaterLow) => {
                self.water_report(WaterLevel::Low).await;
                Ok(())
            }
            Message::Command(Command::WaterOk) => {
                self.water_report(WaterLevel::Ok).await;
                Ok(())
            }
            Message::Command(Command::Temp) => {
                let reading = self.state.temperature_tenths().to_string();
                self.reply.send_text(&reading).await
            }
            Message::Command(Command::Humid) => {
                let reading = self.state.humidity_tenths().to_string();
                self.reply.send_text(&reading).await
            }
            other => {
                warn!(peer = "actuator", request = %other.as_text(), "unknown request");
                self.reply.send_text(UNKNOWN_REQUEST).await
            }
        }
    }

    async fn water_report(&mut self, level: WaterLevel) {
        self.state.set_water_low(level == WaterLevel::Low);
        if !self.water.needs_forward(level) {
            debug!(?level, "water level unchanged, not relayed");
            return;
        }

        let cmd = match level {
            WaterLevel::Low => Command::WaterLow,
            WaterLevel::Ok => Command::WaterOk,
        };
        match self.display.send(cmd).await {
            Ok(()) => {
                self.water.mark_forwarded(level);
                info!(?level, "water level relayed to display");
            }
            Err(e) => warn!(error = %e, ?level, "could not relay water level to display"),
        }
    }
}

pub async fn run(conn: PeerConnection, display: PeerSender, state: SharedPlantState) {
    let PeerConnection { mut reader, sender, .. } = conn;
    let mut dispatcher = ActuatorDispatcher::new(state, sender.clone(), display);
    info!("[ACTUATOR] dispatch loop started");

    loop {
        let msg = match reader.read_message().await {
            Ok(msg) => msg,
            Err(WireError::Closed) => {
                info!("[ACTUATOR] peer disconnected");
                break;
            }
            Err(e) => {
                warn!(error = %e, "[ACTUATOR] receive failed");
                break;
            }
        };
        debug!(request = %msg.as_text(), "[ACTUATOR] request");

        if let Err(e) = dispatcher.handle(&msg).await {
            warn!(error = %e, "[ACTUATOR] reply failed");
            break;
        }
    }

    sender.close().await;
}
