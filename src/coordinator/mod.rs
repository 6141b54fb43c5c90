//! ==============================================================================
//! coordinator - the central node
//! ==============================================================================
//!
//! purpose:
//!     listens on one port, accepts the display peer and then the actuator
//!     peer (accept order decides the role), and runs:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                     COORDINATOR PROCESS                     │
//!     │                                                             │
//!     │  display dispatch ◄── PlantName / PlantDate / PLANT UPDATE   │
//!     │  actuator dispatch ◄── LED / WATER / TEMP / HUMID            │
//!     │        │ WATER LOW|OK relayed to display                     │
//!     │  ── startup barrier (both peers connected) ──────────────── │
//!     │  day-cycle scheduler ──► LIGHT_START / WATER / LIGHT_END     │
//!     │  environment sampler, touch menu (local hardware)            │
//!     └─────────────────────────────────────────────────────────────┘
//!
//! a failed bind or accept ends `serve` with an error; the process exits.
//! peers that disconnect are not re-accepted.
//!
//! ==============================================================================

pub mod actuator_dispatch;
pub mod barrier;
pub mod display_dispatch;
pub mod peer;
pub mod peripherals;
pub mod scheduler;
pub mod status;

use crate::config::NodeConfig;
use crate::domain::{PeerRole, PlantState};
use crate::hal::HardwareDriver;
use crate::lcd::Lcd;
use crate::protocol::Framing;
use crate::sensor::{EnvironmentSensor, GrowthProbe};
use crate::state::SharedPlantState;
use anyhow::{Context, Result};
use barrier::StartupBarrier;
use peer::PeerConnection;
use scheduler::{DayCycle, Scheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct Coordinator {
    config: NodeConfig,
    hal: Arc<dyn HardwareDriver>,
    environment: Arc<dyn EnvironmentSensor>,
    probe: Box<dyn GrowthProbe>,
    state: SharedPlantState,
    barrier: Arc<StartupBarrier>,
}

impl Coordinator {
    pub fn new(
        config: NodeConfig,
        hal: Arc<dyn HardwareDriver>,
        environment: Arc<dyn EnvironmentSensor>,
        probe: Box<dyn GrowthProbe>,
    ) -> Self {
        let state = SharedPlantState::new(PlantState::new(&config.plant.name, &config.plant.planted_date));
        Self { config, hal, environment, probe, state, barrier: Arc::new(StartupBarrier::new()) }
    }

    pub fn state(&self) -> SharedPlantState {
        self.state.clone()
    }

    pub fn barrier(&self) -> Arc<StartupBarrier> {
        self.barrier.clone()
    }

    /// listen on every interface at the configured port
    pub async fn bind(&self) -> Result<TcpListener> {
        let port = self.config.network.listen_port;
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("could not listen on port {}", port))?;
        info!(port, "[NET] listening for peers");
        Ok(listener)
    }

    /// Accept both peers, start every loop, then run until `shutdown` fires.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let Coordinator { config, hal, environment, probe, state, barrier } = self;
        let pins = config.pins.coordinator.clone();
        let lcd = Lcd::new(hal.clone(), config.lcd.i2c_addr);
        let mut tasks = JoinSet::new();

        peripherals::setup_hardware(hal.as_ref(), &pins, &lcd);

        if config.status_api.enabled {
            let (bind, state, barrier) = (config.status_api.bind.clone(), state.clone(), barrier.clone());
            tasks.spawn(async move {
                if let Err(e) = status::run_status_api(&bind, state, barrier).await {
                    error!(error = %e, "[STATUS] api stopped");
                }
            });
        }

        tasks.spawn(start_after_barrier(
            barrier.clone(),
            DependentLoops {
                config: config.clone(),
                hal: hal.clone(),
                environment,
                probe,
                lcd,
                state: state.clone(),
            },
        ));

        let framing = config.network.framing;
        let accepted = tokio::select! {
            res = accept_peers(&listener, framing, &barrier, &state, &mut tasks) => res,
            _ = shutdown.cancelled() => Ok(()),
        };
        if let Err(e) = accepted {
            peripherals::teardown_hardware(hal.as_ref(), &pins);
            return Err(e);
        }

        shutdown.cancelled().await;
        info!("[SHUTDOWN] stopping coordinator loops");
        tasks.shutdown().await;
        peripherals::teardown_hardware(hal.as_ref(), &pins);
        Ok(())
    }
}

async fn accept_one(listener: &TcpListener, role: PeerRole, framing: Framing) -> Result<PeerConnection> {
    let (stream, addr) = listener
        .accept()
        .await
        .with_context(|| format!("accept failed while waiting for the {} peer", role))?;
    info!(peer = %role, %addr, "[NET] peer connected");
    Ok(PeerConnection::from_tcp(role, stream, framing))
}

/// Display first, then Actuator. Each dispatch loop starts as soon as its
/// peer is in; the actuator loop needs the display sender for relays.
async fn accept_peers(
    listener: &TcpListener,
    framing: Framing,
    barrier: &StartupBarrier,
    state: &SharedPlantState,
    tasks: &mut JoinSet<()>,
) -> Result<()> {
    let display = accept_one(listener, PeerRole::Display, framing).await?;
    let display_sender = display.sender.clone();
    barrier.arrive(display.sender.clone());
    tasks.spawn(display_dispatch::run(display, state.clone()));

    let actuator = accept_one(listener, PeerRole::Actuator, framing).await?;
    barrier.arrive(actuator.sender.clone());
    tasks.spawn(actuator_dispatch::run(actuator, display_sender, state.clone()));
    Ok(())
}

struct DependentLoops {
    config: NodeConfig,
    hal: Arc<dyn HardwareDriver>,
    environment: Arc<dyn EnvironmentSensor>,
    probe: Box<dyn GrowthProbe>,
    lcd: Lcd,
    state: SharedPlantState,
}

/// scheduler and local hardware loops; nothing here runs before both peers are in
async fn start_after_barrier(barrier: Arc<StartupBarrier>, loops: DependentLoops) {
    let peers = barrier.wait().await;
    info!("[STARTUP] both peers connected, starting day cycle and local loops");

    let DependentLoops { config, hal, environment, probe, lcd, state } = loops;
    let mut running = JoinSet::new();

    let scheduler = Scheduler::new(
        DayCycle::new(config.schedule.growth_threshold_cm),
        probe,
        config.schedule.tick_interval(),
        state.clone(),
        peers,
    );
    running.spawn(scheduler.run());
    running.spawn(peripherals::run_environment_sampler(
        environment,
        state.clone(),
        Duration::from_millis(config.sensors.sample_interval_ms),
    ));
    running.spawn(peripherals::run_touch_menu(hal, config.pins.coordinator.touch, lcd, state));

    // dropping the set aborts the loops when this task is cancelled
    while running.join_next().await.is_some() {}
}
