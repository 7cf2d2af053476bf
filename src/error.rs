use thiserror::Error;

use crate::robovac::Command;

pub type Result<T, E = RoboVacError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum RoboVacError {
    #[error("RoboVac is disconnected")]
    Disconnected,
    #[error("no data points available yet")]
    NoData,
    #[error("RoboVac does not support this command: {0}")]
    Unsupported(Command),
    #[error("RoboVac is already home")]
    AlreadyHome,
    #[error("RoboVac is on the charging base")]
    OnChargingBase,
    #[error("expecting value between 0 to 100, got {0}")]
    VolumeOutOfRange(i64),
    #[error("unexpected value for {command}: {value}")]
    UnexpectedValue {
        command: Command,
        value: serde_json::Value,
    },
    #[error("failed to decode {command}: {reason}")]
    Decode { command: Command, reason: String },
    #[error("link error: {0}")]
    Link(String),
}
