//! Textual command vocabulary shared by all three nodes.

use std::fmt;

/// reply sent for any verb outside the receiving role's vocabulary
pub const UNKNOWN_REQUEST: &str = "unknown request";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    // display -> coordinator
    PlantName,
    PlantDate,
    PlantUpdate,
    // coordinator -> display
    PlantData,
    GrowOk,
    // actuator -> coordinator
    LedOn,
    LedOff,
    WaterLow,
    WaterOk,
    Temp,
    Humid,
    // coordinator -> actuator
    LightStart,
    Water,
    LightEnd,
}

/// the one parse/encode table; matching is exact and case-sensitive
const TABLE: [(Command, &str); 14] = [
    (Command::PlantName, "PlantName"),
    (Command::PlantDate, "PlantDate"),
    (Command::PlantUpdate, "PLANT UPDATE"),
    (Command::PlantData, "PLANT DATA"),
    (Command::GrowOk, "Grow OK"),
    (Command::LedOn, "LED ON"),
    (Command::LedOff, "LED OFF"),
    (Command::WaterLow, "WATER LOW"),
    (Command::WaterOk, "WATER OK"),
    (Command::Temp, "TEMP"),
    (Command::Humid, "HUMID"),
    (Command::LightStart, "LIGHT_START"),
    (Command::Water, "WATER"),
    (Command::LightEnd, "LIGHT_END"),
];

impl Command {
    pub fn as_str(self) -> &'static str {
        TABLE
            .iter()
            .find(|(cmd, _)| *cmd == self)
            .map(|(_, text)| *text)
            .unwrap_or_default()
    }

    pub fn parse(text: &str) -> Option<Command> {
        TABLE.iter().find(|(_, t)| *t == text).map(|(cmd, _)| *cmd)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
