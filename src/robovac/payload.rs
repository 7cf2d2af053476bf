use std::fmt;

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{Result, RoboVacError};

use super::Command;

/// Standard alphabet, padded on encode, padding optional on decode.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode a base64-wrapped JSON register value.
pub fn decode(command: Command, raw: &Value) -> Result<Value> {
    let Some(encoded) = raw.as_str() else {
        return Err(RoboVacError::UnexpectedValue {
            command,
            value: raw.clone(),
        });
    };
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| RoboVacError::Decode {
            command,
            reason: e.to_string(),
        })?;
    serde_json::from_slice(&bytes).map_err(|e| RoboVacError::Decode {
        command,
        reason: e.to_string(),
    })
}

/// Build the rooms register value asking the vacuum to clean the given rooms once.
pub fn select_rooms_clean(rooms: &[u32], timestamp_ms: u64) -> String {
    let room_ids: Vec<u32> = if rooms.is_empty() {
        vec![1]
    } else {
        rooms.to_vec()
    };
    let request = json!({
        "method": "selectRoomsClean",
        "data": {
            "roomIds": room_ids,
            "cleanTimes": 1,
        },
        "timestamp": timestamp_ms,
    });
    BASE64.encode(request.to_string())
}

#[derive(Debug, Default, Deserialize)]
pub struct Consumables {
    #[serde(default)]
    pub consumable: ConsumableState,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConsumableState {
    #[serde(default)]
    pub duration: Durations,
}

/// Wear counters in hours, plus the battery health flag. Counters may be fractional.
#[derive(Debug, Default, Deserialize)]
pub struct Durations {
    #[serde(rename = "SB")]
    pub side_brush: Option<f64>,
    #[serde(rename = "RB")]
    pub rolling_brush: Option<f64>,
    #[serde(rename = "FM")]
    pub filter: Option<f64>,
    #[serde(rename = "SS")]
    pub sensors: Option<f64>,
    #[serde(rename = "BatteryStatus")]
    pub battery_status: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumable {
    SideBrush,
    RollingBrush,
    Filter,
    Sensors,
    Battery,
}

impl Consumable {
    pub const ALL: [Consumable; 5] = [
        Consumable::SideBrush,
        Consumable::RollingBrush,
        Consumable::Filter,
        Consumable::Sensors,
        Consumable::Battery,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Consumable::SideBrush => "side_brush",
            Consumable::RollingBrush => "rolling_brush",
            Consumable::Filter => "filter",
            Consumable::Sensors => "sensors",
            Consumable::Battery => "battery",
        }
    }
}

impl fmt::Display for Consumable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsumableAlert {
    pub consumable: Consumable,
    /// Hours of use, or the battery status code for [`Consumable::Battery`].
    pub duration: f64,
}

impl Consumables {
    pub fn from_value(value: &Value) -> Result<Self> {
        Consumables::deserialize(value).map_err(|e| RoboVacError::Decode {
            command: Command::Consumables,
            reason: e.to_string(),
        })
    }

    /// Parts that are due for replacement.
    pub fn alerts(&self) -> Vec<ConsumableAlert> {
        let d = &self.consumable.duration;
        let worn = [
            (Consumable::SideBrush, d.side_brush, 250.0),
            (Consumable::RollingBrush, d.rolling_brush, 450.0),
            (Consumable::Filter, d.filter, 200.0),
            (Consumable::Sensors, d.sensors, 35.0),
        ];

        let mut alerts: Vec<ConsumableAlert> = worn
            .into_iter()
            .filter_map(|(consumable, hours, limit)| {
                hours
                    .filter(|h| *h >= limit)
                    .map(|duration| ConsumableAlert {
                        consumable,
                        duration,
                    })
            })
            .collect();

        if let Some(status) = d.battery_status.filter(|s| *s != 1.0) {
            alerts.push(ConsumableAlert {
                consumable: Consumable::Battery,
                duration: status,
            });
        }
        alerts
    }
}
