//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `growbox.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - NodeSection: which process this is (coordinator, display, actuator).
//!     - NetworkConfig: listening port, coordinator address, framing.
//!     - PlantConfig: identity the coordinator serves to the display.
//!     - ScheduleConfig: day-cycle tick length and growth threshold.
//!     - SensorsConfig: DHT reader subprocess and sampling period.
//!     - PinsConfig: GPIO numbers per role.
//!     - StatusApiConfig: optional read-only HTTP endpoint.
//!
//! every section has defaults, so a file only needs the keys it changes.
//!
//! ==============================================================================

use crate::protocol::Framing;
use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "GROWBOX_CONFIG";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub network: NetworkConfig,
    pub plant: PlantConfig,
    pub schedule: ScheduleConfig,
    pub sensors: SensorsConfig,
    pub pins: PinsConfig,
    pub lcd: LcdConfig,
    pub logging: LoggingConfig,
    pub status_api: StatusApiConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Coordinator,
    Display,
    Actuator,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct NodeSection {
    pub role: Role,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    /// port the coordinator listens on
    pub listen_port: u16,
    /// where display and actuator nodes connect to
    pub coordinator_addr: String,
    pub framing: Framing,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: 2586,
            coordinator_addr: "192.168.91.9:2586".to_string(),
            framing: Framing::Raw,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PlantConfig {
    pub name: String,
    pub planted_date: String,
}

impl Default for PlantConfig {
    fn default() -> Self {
        Self { name: "Tomato".to_string(), planted_date: "2024-06-01".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    /// real time per simulated hour
    pub tick_interval_ms: u64,
    /// plant counts as grown once the probe reads closer than this
    pub growth_threshold_cm: f32,
}

impl ScheduleConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { tick_interval_ms: 10_000, growth_threshold_cm: 15.0 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SensorsConfig {
    pub python: String,
    pub dht_model: String,
    pub dht_pin: u8,
    pub sample_interval_ms: u64,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            dht_model: "DHT11".to_string(),
            dht_pin: 27,
            sample_interval_ms: 200,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PinsConfig {
    pub coordinator: CoordinatorPins,
    pub display: DisplayPins,
    pub actuator: ActuatorPins,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CoordinatorPins {
    pub trig: u8,
    pub echo: u8,
    pub touch: u8,
}

impl Default for CoordinatorPins {
    fn default() -> Self {
        Self { trig: 24, echo: 23, touch: 9 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DisplayPins {
    pub button: u8,
    pub button_power: u8,
    pub grow_led: u8,
    pub water_led: u8,
}

impl Default for DisplayPins {
    fn default() -> Self {
        Self { button: 20, button_power: 21, grow_led: 26, water_led: 6 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ActuatorPins {
    pub servo_channel: u8,
    pub water_supply: u8,
    pub water_level: u8,
    pub water_led: u8,
    pub buzzer: u8,
    pub light_sensor: u8,
    pub grow_led: u8,
}

impl Default for ActuatorPins {
    fn default() -> Self {
        Self {
            servo_channel: 0,
            water_supply: 12,
            water_level: 25,
            water_led: 23,
            buzzer: 16,
            light_sensor: 17,
            grow_led: 27,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LcdConfig {
    pub i2c_addr: u16,
}

impl Default for LcdConfig {
    fn default() -> Self {
        Self { i2c_addr: crate::lcd::DEFAULT_ADDR }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StatusApiConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for StatusApiConfig {
    fn default() -> Self {
        Self { enabled: false, bind: "0.0.0.0:3000".to_string() }
    }
}

impl NodeConfig {
    /// Parse one TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config in {}", path.display()))
    }

    /// Candidate files in priority order: `$GROWBOX_CONFIG` when set, then
    /// `config/growbox.toml` relative to the working directory or its parent.
    pub fn search_paths(explicit: Option<PathBuf>) -> Vec<PathBuf> {
        explicit
            .into_iter()
            .chain(["config", "../config"].into_iter().map(|dir| Path::new(dir).join("growbox.toml")))
            .collect()
    }

    /// First candidate that exists and parses; broken files are reported and skipped.
    fn first_loadable(candidates: &[PathBuf]) -> Option<(Self, &Path)> {
        candidates.iter().filter(|path| path.is_file()).find_map(|path| match Self::load(path) {
            Ok(config) => Some((config, path.as_path())),
            Err(e) => {
                println!("[CONFIG] Skipping {}: {:#}", path.display(), e);
                None
            }
        })
    }

    /// Load the first usable file from [`Self::search_paths`], or built-in defaults.
    pub fn load_or_default() -> Self {
        let candidates = Self::search_paths(std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        match Self::first_loadable(&candidates) {
            Some((config, path)) => {
                println!("[CONFIG] Using {}", path.display());
                config
            }
            None => {
                println!("[CONFIG] No usable growbox.toml - running on built-in defaults");
                Self::default()
            }
        }
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│          GROWBOX CONFIGURATION          │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Role: {:?}", self.node.role);
        match self.node.role {
            Role::Coordinator => println!("│ Listen Port: {}", self.network.listen_port),
            _ => println!("│ Coordinator: {}", self.network.coordinator_addr),
        }
        println!("│ Framing: {:?}", self.network.framing);
        println!("│ Plant: {} ({})", self.plant.name, self.plant.planted_date);
        println!("│ Hour Tick: {}ms", self.schedule.tick_interval_ms);
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}
