use serde_json::Value;

use crate::tuya::Dps;

use super::{Command, ConsumableAlert};

#[derive(Debug, Clone, PartialEq)]
pub enum RoboVacEvent {
    Connected,
    Disconnected,
    LinkError(String),
    /// Raw DPs from a status or query response.
    Data(Dps),
    /// Raw DPs from a refresh push.
    DpRefresh(Dps),
    /// A known register changed. Encoded registers carry their decoded JSON.
    Update { command: Command, value: Value },
    /// The error register changed; carries its description.
    Fault(String),
    Alert(ConsumableAlert),
}
