use serde::{Deserialize, Serialize};
use std::fmt;

/// size in bytes of an encoded [`PlantSnapshot`] (three i32 fields)
pub const SNAPSHOT_LEN: usize = 12;

/// everything the coordinator knows about the plant and its actuators
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlantState {
    /// plant identity, e.g. "Tomato"
    pub name: String,
    /// planting date as free text, e.g. "2024-06-01"
    pub planted_date: String,
    /// temperature in tenths of a degree celsius
    pub temperature_tenths: i32,
    /// relative humidity in tenths of a percent
    pub humidity_tenths: i32,
    /// grow light currently on (reported by the actuator)
    pub led_on: bool,
    /// growth threshold has been crossed at least once
    pub growth_confirmed: bool,
    /// actuator reported a low water tank
    pub water_low: bool,
}

impl PlantState {
    pub fn new(name: impl Into<String>, planted_date: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            planted_date: planted_date.into(),
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> PlantSnapshot {
        PlantSnapshot {
            temperature_tenths: self.temperature_tenths,
            humidity_tenths: self.humidity_tenths,
            led_on: self.led_on,
        }
    }
}

/// fixed-size status record sent to the display after `PLANT DATA`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlantSnapshot {
    pub temperature_tenths: i32,
    pub humidity_tenths: i32,
    pub led_on: bool,
}

impl PlantSnapshot {
    /// three native-endian i32s: temperature, humidity, led flag
    pub fn to_bytes(&self) -> [u8; SNAPSHOT_LEN] {
        let mut out = [0u8; SNAPSHOT_LEN];
        out[0..4].copy_from_slice(&self.temperature_tenths.to_ne_bytes());
        out[4..8].copy_from_slice(&self.humidity_tenths.to_ne_bytes());
        out[8..12].copy_from_slice(&i32::from(self.led_on).to_ne_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; SNAPSHOT_LEN]) -> Self {
        let field = |i: usize| i32::from_ne_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self {
            temperature_tenths: field(0),
            humidity_tenths: field(4),
            // any non-zero flag counts as on
            led_on: field(8) != 0,
        }
    }
}

/// which side of the coordinator a connection belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerRole {
    Display,
    Actuator,
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerRole::Display => write!(f, "display"),
            PeerRole::Actuator => write!(f, "actuator"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaterLevel {
    Ok,
    Low,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_state_fields() {
        let mut state = PlantState::new("Basil", "2024-05-01");
        state.temperature_tenths = 231;
        state.humidity_tenths = 478;
        state.led_on = true;
        state.water_low = true;

        let snap = state.snapshot();
        assert_eq!(snap.temperature_tenths, 231);
        assert_eq!(snap.humidity_tenths, 478);
        assert!(snap.led_on);
    }

    #[test]
    fn snapshot_layout_is_native_endian_i32() {
        let snap = PlantSnapshot { temperature_tenths: -15, humidity_tenths: 600, led_on: true };
        let bytes = snap.to_bytes();
        assert_eq!(&bytes[0..4], &(-15i32).to_ne_bytes());
        assert_eq!(&bytes[4..8], &600i32.to_ne_bytes());
        assert_eq!(&bytes[8..12], &1i32.to_ne_bytes());
        assert_eq!(PlantSnapshot::from_bytes(&bytes), snap);
    }

    #[test]
    fn nonzero_led_flag_decodes_as_on() {
        let mut bytes = [0u8; SNAPSHOT_LEN];
        bytes[8..12].copy_from_slice(&7i32.to_ne_bytes());
        assert!(PlantSnapshot::from_bytes(&bytes).led_on);
    }
}
