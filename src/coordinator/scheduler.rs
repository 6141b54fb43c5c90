//! ==============================================================================
//! scheduler.rs - simulated day cycle
//! ==============================================================================
//!
//! one tick is one simulated hour. on every tick:
//!     1. hour += 1
//!     2. the growth probe is sampled; the first reading under the threshold
//!        sends `Grow OK` to the display (once per process)
//!     3. hour 6  -> LIGHT_START to the actuator
//!        hour 12 -> WATER
//!        hour 24 -> LIGHT_END, led_on forced false, hour back to 0
//!
//! `DayCycle` is the pure state machine; `Scheduler` drives it on a timer and
//! turns its directives into peer sends. sends to a disconnected peer are
//! logged and skipped. the loop is free-running until the process exits.
//!
//! ==============================================================================

use super::barrier::Peers;
use crate::protocol::Command;
use crate::sensor::GrowthProbe;
use crate::state::SharedPlantState;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const LIGHT_START_HOUR: u8 = 6;
pub const WATER_HOUR: u8 = 12;
pub const DAY_HOURS: u8 = 24;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Directive {
    AnnounceGrowth,
    Actuator(Command),
}

#[derive(Debug, Clone)]
pub struct DayCycle {
    hour: u8,
    growth_announced: bool,
    threshold_cm: f32,
}

impl DayCycle {
    pub fn new(threshold_cm: f32) -> Self {
        Self { hour: 0, growth_announced: false, threshold_cm }
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    #[cfg(test)]
    pub fn growth_announced(&self) -> bool {
        self.growth_announced
    }

    /// advance one hour; `distance_cm` is `None` when the probe failed
    pub fn tick(&mut self, distance_cm: Option<f32>) -> Vec<Directive> {
        let mut out = Vec::new();
        self.hour += 1;

        if let Some(d) = distance_cm {
            if d < self.threshold_cm && !self.growth_announced {
                self.growth_announced = true;
                out.push(Directive::AnnounceGrowth);
            }
        }

        match self.hour {
            LIGHT_START_HOUR => out.push(Directive::Actuator(Command::LightStart)),
            WATER_HOUR => out.push(Directive::Actuator(Command::Water)),
            DAY_HOURS => {
                out.push(Directive::Actuator(Command::LightEnd));
                self.hour = 0;
            }
            _ => {}
        }
        out
    }
}

pub struct Scheduler {
    cycle: DayCycle,
    probe: Option<Box<dyn GrowthProbe>>,
    interval: Duration,
    state: SharedPlantState,
    peers: Peers,
}

impl Scheduler {
    pub fn new(
        cycle: DayCycle,
        probe: Box<dyn GrowthProbe>,
        interval: Duration,
        state: SharedPlantState,
        peers: Peers,
    ) -> Self {
        Self { cycle, probe: Some(probe), interval, state, peers }
    }

    pub async fn run(mut self) {
        info!(interval_ms = self.interval.as_millis() as u64, "[SCHEDULER] day cycle started");
        loop {
            tokio::time::sleep(self.interval).await;
            self.tick().await;
        }
    }

    pub async fn tick(&mut self) {
        let distance = self.sample_probe().await;
        let directives = self.cycle.tick(distance);
        debug!(hour = self.cycle.hour(), ?distance, "[SCHEDULER] tick");

        for directive in directives {
            match directive {
                Directive::AnnounceGrowth => {
                    self.state.confirm_growth();
                    info!(?distance, "[SCHEDULER] growth confirmed");
                    if let Err(e) = self.peers.display.send(Command::GrowOk).await {
                        warn!(error = %e, "[SCHEDULER] could not notify display of growth");
                    }
                }
                Directive::Actuator(cmd) => {
                    if cmd == Command::LightEnd {
                        self.state.set_led_on(false);
                    }
                    info!(command = %cmd, "[SCHEDULER] phase change");
                    if let Err(e) = self.peers.actuator.send(cmd).await {
                        warn!(error = %e, command = %cmd, "[SCHEDULER] could not reach actuator");
                    }
                }
            }
        }
    }

    /// The probe busy-waits, so it runs on the blocking pool. A panicking
    /// read is caught there and the probe is handed back for the next tick.
    async fn sample_probe(&mut self) -> Option<f32> {
        let mut probe = self.probe.take()?;
        let (probe, reading) = match tokio::task::spawn_blocking(move || {
            let reading = panic::catch_unwind(AssertUnwindSafe(|| probe.distance_cm()));
            (probe, reading)
        })
        .await
        {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "[SCHEDULER] growth probe task lost, growth checks stop");
                return None;
            }
        };
        self.probe = Some(probe);

        match reading {
            Ok(Ok(cm)) => Some(cm),
            Ok(Err(e)) => {
                warn!(error = %e, "[SCHEDULER] growth probe read failed");
                None
            }
            Err(_) => {
                warn!("[SCHEDULER] growth probe panicked, skipping this tick");
                None
            }
        }
    }
}
