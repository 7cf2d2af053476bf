use std::time::Duration;

use robovac::config::{DeviceConfig, TuyaConfig};
use robovac::error::{Result, RoboVacError};
use robovac::robovac::{Command, Consumable, Consumables, RoboVac, RoboVacEvent};
use robovac::tuya::DeviceLink;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// A value to publish under `{prefix}/{topic_name}/{suffix}`.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub topic_name: String,
    pub suffix: String,
    pub payload: String,
    pub retain: bool,
}

impl StateUpdate {
    fn new(topic_name: &str, suffix: String, payload: String, retain: bool) -> Self {
        Self {
            topic_name: topic_name.to_string(),
            suffix,
            payload,
            retain,
        }
    }

    /// Topics to publish for an event. A consumables update sets every
    /// `alert/{consumable}` topic, clearing the retained alert of parts that
    /// are no longer worn, so standalone alert events publish nothing.
    pub fn from_event(topic_name: &str, event: &RoboVacEvent) -> Vec<Self> {
        match event {
            RoboVacEvent::Connected => vec![Self::new(
                topic_name,
                "connection".to_string(),
                "connected".to_string(),
                true,
            )],
            RoboVacEvent::Disconnected => vec![Self::new(
                topic_name,
                "connection".to_string(),
                "disconnected".to_string(),
                true,
            )],
            RoboVacEvent::LinkError(e) => vec![Self::new(
                topic_name,
                "link_error".to_string(),
                e.clone(),
                false,
            )],
            RoboVacEvent::Data(_) | RoboVacEvent::DpRefresh(_) | RoboVacEvent::Alert(_) => {
                Vec::new()
            }
            RoboVacEvent::Update { command, value } => {
                let mut updates = vec![Self::new(
                    topic_name,
                    format!("state/{}", command.name()),
                    render(value),
                    !matches!(
                        command,
                        Command::CleaningRuntime | Command::CleaningCoverage
                    ),
                )];
                if *command == Command::Consumables {
                    updates.extend(alert_updates(topic_name, value));
                }
                updates
            }
            RoboVacEvent::Fault(description) => vec![Self::new(
                topic_name,
                "fault".to_string(),
                description.clone(),
                true,
            )],
        }
    }
}

/// One retained update per consumable: the worn duration, or an empty payload
/// which removes a previously retained alert.
fn alert_updates(topic_name: &str, consumables: &Value) -> Vec<StateUpdate> {
    let alerts = match Consumables::from_value(consumables) {
        Ok(c) => c.alerts(),
        Err(e) => {
            warn!("Unreadable consumables payload: {}", e);
            return Vec::new();
        }
    };
    Consumable::ALL
        .into_iter()
        .map(|consumable| {
            let payload = alerts
                .iter()
                .find(|a| a.consumable == consumable)
                .map(|a| a.duration.to_string())
                .unwrap_or_default();
            StateUpdate::new(topic_name, format!("alert/{consumable}"), payload, true)
        })
        .collect()
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A command received on `{prefix}/{topic_name}/command/{action}`.
#[derive(Debug, Clone, PartialEq)]
pub enum VacCommand {
    Clean,
    CleanRooms(Vec<u32>),
    Pause,
    Resume,
    GoHome(bool),
    Locate(bool),
    AutoReturn(bool),
    Volume(i64),
    Refresh,
}

fn parse_flag(payload: &str) -> Option<bool> {
    match payload.trim() {
        "" | "true" | "1" | "on" => Some(true),
        "false" | "0" | "off" => Some(false),
        _ => None,
    }
}

impl VacCommand {
    pub fn parse(action: &str, payload: &str) -> Option<Self> {
        let command = match action {
            "clean" => VacCommand::Clean,
            "clean_rooms" => {
                let payload = payload.trim();
                if payload.is_empty() {
                    VacCommand::CleanRooms(Vec::new())
                } else {
                    VacCommand::CleanRooms(serde_json::from_str(payload).ok()?)
                }
            }
            "pause" => VacCommand::Pause,
            "resume" => VacCommand::Resume,
            "go_home" => VacCommand::GoHome(parse_flag(payload)?),
            "locate" => VacCommand::Locate(parse_flag(payload)?),
            "auto_return" => VacCommand::AutoReturn(parse_flag(payload)?),
            "volume" => {
                let payload = payload.trim();
                let n: i64 = payload
                    .parse()
                    .or_else(|_| payload.parse::<f64>().map(|f| f as i64))
                    .ok()?;
                VacCommand::Volume(n)
            }
            "refresh" => VacCommand::Refresh,
            _ => return None,
        };
        Some(command)
    }

    pub async fn apply<L: DeviceLink>(self, vac: &mut RoboVac<L>) -> Result<()> {
        match self {
            VacCommand::Clean => vac.clean().await,
            VacCommand::CleanRooms(rooms) => vac.clean_rooms(&rooms).await,
            VacCommand::Pause => vac.pause().await,
            VacCommand::Resume => vac.resume().await,
            VacCommand::GoHome(flag) => vac.go_home(flag).await,
            VacCommand::Locate(flag) => vac.locate(flag).await,
            VacCommand::AutoReturn(flag) => vac.set_auto_return(flag).await,
            VacCommand::Volume(value) => vac.set_volume(value).await,
            VacCommand::Refresh => vac.refresh().await,
        }
    }
}

enum Next {
    Event(Option<RoboVacEvent>),
    Command(Option<VacCommand>),
    Poll,
}

/// Exponential reconnect delay, back to the minimum after a successful connect.
struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(max: Duration) -> Self {
        let min = Duration::from_secs(5).min(max);
        Self {
            min,
            max,
            current: min,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Device loop. Connects, publishes events, applies commands, reconnects on failure.
/// Returns once the command channel is closed.
pub async fn run(
    device: DeviceConfig,
    settings: TuyaConfig,
    updates: mpsc::Sender<StateUpdate>,
    mut commands: mpsc::Receiver<VacCommand>,
) {
    let poll_interval = Duration::from_secs(settings.poll_interval_secs);
    let mut backoff = Backoff::new(Duration::from_secs(settings.reconnect_max_secs));

    loop {
        let mut vac = RoboVac::new(device.clone());

        let result = match vac.connect().await {
            Ok(()) => {
                backoff.reset();
                run_session(&device, &mut vac, &updates, &mut commands, poll_interval).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!("Device {} session ended cleanly", device.name);
                return;
            }
            Err(e) => {
                let delay = backoff.next_delay();
                error!(
                    "Device {} session error: {}. Reconnecting in {:?}",
                    device.name, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Drive a connected vacuum until it disconnects (`Err`) or the command
/// channel closes (`Ok`).
async fn run_session<L: DeviceLink>(
    device: &DeviceConfig,
    vac: &mut RoboVac<L>,
    updates: &mpsc::Sender<StateUpdate>,
    commands: &mut mpsc::Receiver<VacCommand>,
    poll_interval: Duration,
) -> Result<()> {
    let mut poll_timer = tokio::time::interval(poll_interval);
    // Skip first tick (the link queries on connect)
    poll_timer.tick().await;

    loop {
        let next = tokio::select! {
            event = vac.next_event() => Next::Event(event),
            command = commands.recv() => Next::Command(command),
            _ = poll_timer.tick() => Next::Poll,
        };

        match next {
            Next::Event(Some(event)) => {
                for update in StateUpdate::from_event(&device.topic_name, &event) {
                    if updates.send(update).await.is_err() {
                        warn!("State update channel closed");
                    }
                }
                if event == RoboVacEvent::Disconnected {
                    return Err(RoboVacError::Disconnected);
                }
            }
            Next::Event(None) => return Err(RoboVacError::Disconnected),
            Next::Command(Some(command)) => {
                info!("Applying {:?} to {}", command, device.name);
                if let Err(e) = command.apply(vac).await {
                    warn!("Command for {} rejected: {}", device.name, e);
                }
            }
            Next::Command(None) => {
                vac.disconnect().await?;
                return Ok(());
            }
            Next::Poll => vac.refresh().await?,
        }
    }
}
