//! ==============================================================================
//! main.rs - growbox node entry point
//! ==============================================================================
//!
//! purpose:
//!     loads `growbox.toml`, sets up logging and the hardware driver, and
//!     runs whichever node the config names:
//!
//!     ┌──────────────┐   display link   ┌──────────────────┐   actuator link   ┌──────────────┐
//!     │   display    │ ◄──────────────► │   coordinator    │ ◄───────────────► │   actuator   │
//!     │ button, lcd, │                  │ plant state, day │                   │ light loop,  │
//!     │ status leds  │                  │ cycle, touch lcd │                   │ water loop   │
//!     └──────────────┘                  └──────────────────┘                   └──────────────┘
//!
//! startup failures (bind, accept, connect) exit non-zero.
//! ctrl-c stops the node's loops and releases its pins.
//!
//! ==============================================================================

use anyhow::Result;
use growbox::actuator::ActuatorNode;
use growbox::config::{NodeConfig, Role};
use growbox::coordinator::Coordinator;
use growbox::display::DisplayNode;
use growbox::hal;
use growbox::sensor::{EnvironmentSensor, GrowthProbe};
#[cfg(not(feature = "hardware"))]
use growbox::sensor::{MockEnvironment, MockProbe};
#[cfg(feature = "hardware")]
use growbox::sensor::{ScriptSampler, UltrasonicProbe};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  growbox - plant enclosure control node");
    println!("===========================================================");

    // step 1: load configuration
    let config = NodeConfig::load_or_default();
    config.print_summary();

    // step 2: logging (RUST_LOG wins over the config level)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    // step 3: hardware driver
    let hal = match hal::default_driver() {
        Ok(hal) => hal,
        Err(e) => {
            eprintln!("[ERROR] Fatal: hardware driver unavailable: {}", e);
            return Err(e);
        }
    };

    // step 4: ctrl-c cancels the running node
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\n[SHUTDOWN] Ctrl-C received");
                shutdown.cancel();
            }
        });
    }

    // step 5: run the configured role
    let result = match config.node.role {
        Role::Coordinator => run_coordinator(config, hal, shutdown).await,
        Role::Display => match DisplayNode::connect(&config, hal).await {
            Ok(node) => node.run(shutdown).await,
            Err(e) => Err(e),
        },
        Role::Actuator => match ActuatorNode::connect(&config, hal).await {
            Ok(node) => node.run(shutdown).await,
            Err(e) => Err(e),
        },
    };

    if let Err(e) = &result {
        eprintln!("[ERROR] Fatal: {:#}", e);
    }
    result
}

async fn run_coordinator(config: NodeConfig, hal: Arc<dyn hal::HardwareDriver>, shutdown: CancellationToken) -> Result<()> {
    let (environment, probe) = measurement_sources(&config, &hal);
    let coordinator = Coordinator::new(config, hal, environment, probe);
    let listener = coordinator.bind().await?;
    coordinator.serve(listener, shutdown).await
}

/// DHT subprocess and ultrasonic probe on the device
#[cfg(feature = "hardware")]
fn measurement_sources(
    config: &NodeConfig,
    hal: &Arc<dyn hal::HardwareDriver>,
) -> (Arc<dyn EnvironmentSensor>, Box<dyn GrowthProbe>) {
    let sensors = &config.sensors;
    let pins = &config.pins.coordinator;
    (
        Arc::new(ScriptSampler::new(&sensors.python, &sensors.dht_model, sensors.dht_pin)),
        Box::new(UltrasonicProbe::new(hal.clone(), pins.trig, pins.echo)),
    )
}

/// fixed readings when running on the mock HAL
#[cfg(not(feature = "hardware"))]
fn measurement_sources(
    _config: &NodeConfig,
    _hal: &Arc<dyn hal::HardwareDriver>,
) -> (Arc<dyn EnvironmentSensor>, Box<dyn GrowthProbe>) {
    println!("[SENSOR] Mock HAL active - using fixed environment and growth readings");
    (Arc::new(MockEnvironment::default()), Box::new(MockProbe::default()))
}
