//! growbox: a three-node control network for an automated plant enclosure.
//!
//! One binary, three roles chosen by configuration:
//! - [`coordinator`] holds the plant state, serves both peers and runs the
//!   simulated day cycle
//! - [`display`] shows plant information on demand and status leds
//! - [`actuator`] drives the grow light and the water pump

pub mod actuator;
pub mod config;
pub mod coordinator;
pub mod display;
pub mod domain;
pub mod hal;
pub mod lcd;
pub mod lifecycle;
pub mod protocol;
pub mod sensor;
pub mod state;
pub mod uplink;
