//! Control a Tuya based robot vacuum over the local network.
//!
//! [`RoboVac`] wraps a Tuya local client, keeps the device's data points and
//! turns them into typed events, getters and commands.

pub mod config;
pub mod error;
pub mod robovac;
pub mod tuya;

pub use error::{Result, RoboVacError};
pub use robovac::{Command, RoboVac, RoboVacEvent};
pub use tuya::{DeviceLink, LinkEvent, TuyaLink};
