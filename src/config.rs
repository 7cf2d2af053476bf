use serde::Deserialize;
use std::env;
use std::net::IpAddr;

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub tuya: TuyaConfig,
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub client_id: String,
}

#[derive(Debug, Clone)]
pub struct TuyaConfig {
    pub poll_interval_secs: u64,
    pub reconnect_max_secs: u64,
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub id: String,
    pub key: String,
    pub ip: IpAddr,
    pub name: String,
    /// Sanitized name for use in MQTT topics (lowercase, spaces to underscores)
    pub topic_name: String,
}

// Serde struct for parsing tinytuya device listing JSON
#[derive(Deserialize)]
struct RawDevice {
    id: String,
    key: String,
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

fn env_required(key: &str) -> Result<String, String> {
    env::var(key).map_err(|_| format!("{key} environment variable is required"))
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let devices_file = env_or_default("DEVICES_FILE", "devices.json".to_string());
        let devices = load_devices(&devices_file)?;

        let config = Self {
            mqtt: MqttConfig {
                broker_host: env_required("MQTT_BROKER_HOST")?,
                broker_port: env_or_default("MQTT_BROKER_PORT", 1883),
                username: env_optional("MQTT_USERNAME"),
                password: env_optional("MQTT_PASSWORD"),
                topic_prefix: env_or_default("MQTT_TOPIC_PREFIX", "robovac".to_string()),
                client_id: env_or_default("MQTT_CLIENT_ID", "robovac-to-mqtt".to_string()),
            },
            tuya: TuyaConfig {
                poll_interval_secs: env_or_default("ROBOVAC_POLL_INTERVAL_SECS", 60),
                reconnect_max_secs: env_or_default("ROBOVAC_RECONNECT_MAX_SECS", 60),
            },
            devices,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.mqtt.broker_host.is_empty() {
            return Err("MQTT_BROKER_HOST must not be empty".into());
        }
        if self.devices.is_empty() {
            return Err("No devices found in devices file".into());
        }
        if self.tuya.poll_interval_secs == 0 {
            return Err("ROBOVAC_POLL_INTERVAL_SECS must be > 0".into());
        }
        if self.tuya.reconnect_max_secs == 0 {
            return Err("ROBOVAC_RECONNECT_MAX_SECS must be > 0".into());
        }
        Ok(())
    }

    pub fn device_topic(&self, topic_name: &str, suffix: &str) -> String {
        format!("{}/{}/{}", self.mqtt.topic_prefix, topic_name, suffix)
    }

    pub fn device_status_topic(&self, topic_name: &str) -> String {
        self.device_topic(topic_name, "bridge_status")
    }

    /// Retained online/offline topic, shared by the connect message and the LWT.
    /// A single vacuum uses its own status topic; several share a bridge-wide one,
    /// since MQTT allows one last will per connection.
    pub fn availability_topic(&self) -> String {
        match self.devices.as_slice() {
            [device] => self.device_status_topic(&device.topic_name),
            _ => format!("{}/bridge_status", self.mqtt.topic_prefix),
        }
    }

    pub fn device_command_topic(&self, topic_name: &str) -> String {
        self.device_topic(topic_name, "command/#")
    }
}

fn load_devices(path: &str) -> Result<Vec<DeviceConfig>, String> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read {path}: {e}"))?;
    parse_devices(&content).map_err(|e| format!("Failed to parse {path}: {e}"))
}

fn parse_devices(content: &str) -> Result<Vec<DeviceConfig>, String> {
    let raw_devices: Vec<RawDevice> = serde_json::from_str(content).map_err(|e| e.to_string())?;

    raw_devices
        .into_iter()
        .map(|raw| {
            let ip: IpAddr = raw
                .ip
                .as_deref()
                .ok_or_else(|| format!("Device {} missing 'ip' field", raw.id))?
                .parse()
                .map_err(|e| format!("Device {} invalid IP: {e}", raw.id))?;

            let name = raw.name.unwrap_or_else(|| raw.id.clone());
            let topic_name = sanitize_topic_name(&name);

            Ok(DeviceConfig {
                name,
                id: raw.id,
                key: raw.key,
                ip,
                topic_name,
            })
        })
        .collect()
}

/// Convert a device name into a safe MQTT topic segment.
/// "Living Room RoboVac" → "living_room_robovac"
fn sanitize_topic_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}
