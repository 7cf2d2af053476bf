use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::error::{Result, RoboVacError};
use crate::tuya::{DeviceLink, Dps, LinkEvent, TuyaLink};

mod command;
mod event;
pub mod fault;
pub mod payload;

pub use command::Command;
pub use event::RoboVacEvent;
pub use payload::{Consumable, ConsumableAlert, Consumables};

const DOCKED_ACTIVITIES: [&str; 3] = ["Sleeping", "Charging", "completed"];

/// Control facade for a Tuya based robot vacuum.
///
/// DPs reported by the device are merged into a local map that backs the
/// getters. Events are pulled with [`RoboVac::next_event`].
pub struct RoboVac<L = TuyaLink> {
    link: L,
    dps: Dps,
    connected: bool,
    link_events: Option<mpsc::Receiver<LinkEvent>>,
    pending: VecDeque<RoboVacEvent>,
}

impl RoboVac<TuyaLink> {
    pub fn new(config: DeviceConfig) -> Self {
        Self::with_link(TuyaLink::new(config))
    }
}

impl<L: DeviceLink> RoboVac<L> {
    pub fn with_link(link: L) -> Self {
        Self {
            link,
            dps: Dps::new(),
            connected: false,
            link_events: None,
            pending: VecDeque::new(),
        }
    }

    pub async fn connect(&mut self) -> Result<()> {
        let events = self.link.connect().await?;
        self.link_events = Some(events);
        self.connected = true;
        self.pending.push_back(RoboVacEvent::Connected);
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.link_events = None;
        let result = self.link.disconnect().await;
        self.mark_disconnected();
        result
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Every DP received so far.
    pub fn dps(&self) -> &Dps {
        &self.dps
    }

    /// Wait for the next event. Returns `None` once the link is gone and
    /// every queued event has been handed out.
    pub async fn next_event(&mut self) -> Option<RoboVacEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            match self.link_events.as_mut()?.recv().await {
                Some(event) => self.handle_link_event(event),
                None => {
                    self.link_events = None;
                    self.mark_disconnected();
                }
            }
        }
    }

    fn mark_disconnected(&mut self) {
        if self.connected {
            self.connected = false;
            self.pending.push_back(RoboVacEvent::Disconnected);
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Disconnected => self.mark_disconnected(),
            LinkEvent::Error(error) => self.pending.push_back(RoboVacEvent::LinkError(error)),
            LinkEvent::Data(dps) => {
                self.merge(&dps);
                self.pending.push_back(RoboVacEvent::Data(dps.clone()));
                self.translate(&dps);
            }
            LinkEvent::DpRefresh(dps) => {
                self.merge(&dps);
                self.pending.push_back(RoboVacEvent::DpRefresh(dps.clone()));
                self.translate(&dps);
            }
        }
    }

    fn merge(&mut self, dps: &Dps) {
        for (dp_id, value) in dps {
            self.dps.insert(dp_id.clone(), value.clone());
        }
    }

    fn translate(&mut self, dps: &Dps) {
        for (dp_id, value) in dps {
            let Some(command) = Command::from_dp_id(dp_id) else {
                debug!("Unmapped DP {} = {}", dp_id, value);
                continue;
            };

            if command == Command::Error {
                self.pending
                    .push_back(RoboVacEvent::Fault(fault::describe(value)));
                continue;
            }

            if !command.is_encoded() {
                self.pending.push_back(RoboVacEvent::Update {
                    command,
                    value: value.clone(),
                });
                continue;
            }

            let decoded = match payload::decode(command, value) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!("Skipping {} update: {}", command, e);
                    continue;
                }
            };

            let alerts = if command == Command::Consumables {
                Consumables::from_value(&decoded)
                    .map(|c| c.alerts())
                    .unwrap_or_else(|e| {
                        warn!("Unreadable consumables payload: {}", e);
                        Vec::new()
                    })
            } else {
                Vec::new()
            };

            self.pending.push_back(RoboVacEvent::Update {
                command,
                value: decoded,
            });
            self.pending
                .extend(alerts.into_iter().map(RoboVacEvent::Alert));
        }
    }

    // Raw access

    /// Ask the device to report all of its DPs.
    pub async fn refresh(&mut self) -> Result<()> {
        if !self.connected {
            return Err(RoboVacError::Disconnected);
        }
        self.link.refresh().await
    }

    pub async fn set(&mut self, dps: Dps) -> Result<()> {
        if !self.connected {
            return Err(RoboVacError::Disconnected);
        }
        self.link.set_dps(dps).await
    }

    async fn write(&mut self, command: Command, value: Value) -> Result<()> {
        info!("Setting {} to {}", command, value);
        let mut dps = Dps::new();
        dps.insert(command.dp_id().to_string(), value);
        self.set(dps).await
    }

    fn ensure_data(&self) -> Result<()> {
        if self.dps.is_empty() {
            return Err(RoboVacError::NoData);
        }
        Ok(())
    }

    fn register(&self, command: Command) -> Result<&Value> {
        self.ensure_data()?;
        self.dps
            .get(command.dp_id())
            .ok_or(RoboVacError::Unsupported(command))
    }

    fn unexpected(command: Command, value: &Value) -> RoboVacError {
        RoboVacError::UnexpectedValue {
            command,
            value: value.clone(),
        }
    }

    fn string_register(&self, command: Command) -> Result<String> {
        let value = self.register(command)?;
        value
            .as_str()
            .map(String::from)
            .ok_or_else(|| Self::unexpected(command, value))
    }

    fn bool_register(&self, command: Command) -> Result<bool> {
        let value = self.register(command)?;
        value.as_bool().ok_or_else(|| Self::unexpected(command, value))
    }

    fn int_register(&self, command: Command) -> Result<i64> {
        let value = self.register(command)?;
        value.as_i64().ok_or_else(|| Self::unexpected(command, value))
    }

    fn decoded_register(&self, command: Command) -> Result<Value> {
        payload::decode(command, self.register(command)?)
    }

    // Getters

    pub fn work_mode(&self) -> Result<String> {
        self.string_register(Command::WorkMode)
    }

    pub fn activity(&self) -> Result<String> {
        self.string_register(Command::Activity)
    }

    pub fn battery_level(&self) -> Result<i64> {
        self.int_register(Command::Battery)
    }

    /// Description of the current error register, "no error" when absent.
    pub fn error(&self) -> Result<String> {
        self.ensure_data()?;
        Ok(self
            .dps
            .get(Command::Error.dp_id())
            .map(fault::describe)
            .unwrap_or_else(|| fault::NO_ERROR.to_string()))
    }

    /// Cleaning runtime of the current or last run.
    pub fn runtime(&self) -> Result<i64> {
        self.int_register(Command::CleaningRuntime)
    }

    pub fn coverage(&self) -> Result<i64> {
        self.int_register(Command::CleaningCoverage)
    }

    pub fn volume(&self) -> Result<i64> {
        self.int_register(Command::Volume)
    }

    pub fn going_home(&self) -> Result<bool> {
        self.bool_register(Command::GoHome)
    }

    pub fn auto_return(&self) -> Result<bool> {
        self.bool_register(Command::AutoReturn)
    }

    pub fn consumables(&self) -> Result<Value> {
        self.decoded_register(Command::Consumables)
    }

    pub fn status(&self) -> Result<Value> {
        self.decoded_register(Command::Status)
    }

    pub fn multimaps(&self) -> Result<Value> {
        self.decoded_register(Command::Multimaps)
    }

    pub fn rooms(&self) -> Result<Value> {
        self.decoded_register(Command::Rooms)
    }

    pub fn voice(&self) -> Result<Value> {
        self.decoded_register(Command::Voice)
    }

    pub fn hello(&self) -> Result<Value> {
        self.decoded_register(Command::Hello)
    }

    pub fn docked(&self) -> Result<bool> {
        let activity = self.activity()?;
        Ok(DOCKED_ACTIVITIES.contains(&activity.as_str()))
    }

    // Commands

    pub async fn clean(&mut self) -> Result<()> {
        self.ensure_data()?;
        self.write(Command::WorkMode, json!("auto")).await
    }

    /// Clean the given rooms once. An empty list cleans room 1.
    pub async fn clean_rooms(&mut self, rooms: &[u32]) -> Result<()> {
        self.ensure_data()?;
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let value = payload::select_rooms_clean(rooms, timestamp_ms);
        self.write(Command::Rooms, Value::String(value)).await
    }

    pub async fn resume(&mut self) -> Result<()> {
        self.ensure_data()?;
        self.write(Command::PlayPause, json!(true)).await
    }

    pub async fn pause(&mut self) -> Result<()> {
        self.ensure_data()?;
        self.write(Command::PlayPause, json!(false)).await
    }

    /// Toggle the locate beeper. Refused while on the charging base.
    pub async fn locate(&mut self, flag: bool) -> Result<()> {
        let current = self.register(Command::FindMyRobot)?.clone();
        if self.docked()? {
            return Err(RoboVacError::OnChargingBase);
        }
        if current == Value::Bool(flag) {
            debug!("locate already {}", flag);
            return Ok(());
        }
        self.write(Command::FindMyRobot, json!(flag)).await
    }

    pub async fn go_home(&mut self, flag: bool) -> Result<()> {
        self.ensure_data()?;
        if self.docked()? {
            return Err(RoboVacError::AlreadyHome);
        }
        let current = self.register(Command::GoHome)?;
        if *current == Value::Bool(flag) {
            debug!("go_home already {}", flag);
            return Ok(());
        }
        self.write(Command::GoHome, json!(flag)).await
    }

    pub async fn set_volume(&mut self, value: i64) -> Result<()> {
        self.register(Command::Volume)?;
        if !(0..=100).contains(&value) {
            return Err(RoboVacError::VolumeOutOfRange(value));
        }
        self.write(Command::Volume, json!(value)).await
    }

    pub async fn set_auto_return(&mut self, flag: bool) -> Result<()> {
        self.register(Command::AutoReturn)?;
        self.write(Command::AutoReturn, json!(flag)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};

    use super::*;

    #[derive(Clone, Default)]
    struct MockLink {
        sent: Arc<Mutex<Vec<Dps>>>,
        refreshes: Arc<Mutex<usize>>,
        feed: Arc<Mutex<Option<mpsc::Sender<LinkEvent>>>>,
    }

    impl MockLink {
        fn sent(&self) -> Vec<Dps> {
            self.sent.lock().unwrap().clone()
        }

        async fn push(&self, event: LinkEvent) {
            let feed = self.feed.lock().unwrap().clone().unwrap();
            feed.send(event).await.unwrap();
        }

        fn close(&self) {
            self.feed.lock().unwrap().take();
        }
    }

    impl DeviceLink for MockLink {
        async fn connect(&mut self) -> Result<mpsc::Receiver<LinkEvent>> {
            let (tx, rx) = mpsc::channel(16);
            *self.feed.lock().unwrap() = Some(tx);
            Ok(rx)
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.close();
            Ok(())
        }

        async fn refresh(&mut self) -> Result<()> {
            *self.refreshes.lock().unwrap() += 1;
            Ok(())
        }

        async fn set_dps(&mut self, dps: Dps) -> Result<()> {
            self.sent.lock().unwrap().push(dps);
            Ok(())
        }
    }

    fn dps(value: Value) -> Dps {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn encoded(value: Value) -> Value {
        Value::String(BASE64_STANDARD.encode(value.to_string()))
    }

    /// A connected vacuum that has already received `state`, with the queue drained.
    async fn vacuum(state: Value) -> (RoboVac<MockLink>, MockLink) {
        let link = MockLink::default();
        let mut vac = RoboVac::with_link(link.clone());
        vac.connect().await.unwrap();
        vac.handle_link_event(LinkEvent::Data(dps(state)));
        vac.pending.clear();
        (vac, link)
    }

    fn drain(vac: &mut RoboVac<MockLink>) -> Vec<RoboVacEvent> {
        vac.pending.drain(..).collect()
    }

    #[tokio::test]
    async fn connect_and_disconnect_lifecycle() {
        let link = MockLink::default();
        let mut vac = RoboVac::with_link(link.clone());
        assert!(!vac.is_connected());

        vac.connect().await.unwrap();
        assert!(vac.is_connected());
        assert_eq!(vac.next_event().await, Some(RoboVacEvent::Connected));

        vac.disconnect().await.unwrap();
        assert!(!vac.is_connected());
        assert_eq!(vac.next_event().await, Some(RoboVacEvent::Disconnected));
        assert_eq!(vac.next_event().await, None);
    }

    #[tokio::test]
    async fn events_flow_from_the_link() {
        let link = MockLink::default();
        let mut vac = RoboVac::with_link(link.clone());
        vac.connect().await.unwrap();
        assert_eq!(vac.next_event().await, Some(RoboVacEvent::Connected));

        link.push(LinkEvent::DpRefresh(dps(json!({"104": 55}))))
            .await;
        assert!(matches!(
            vac.next_event().await,
            Some(RoboVacEvent::DpRefresh(_))
        ));
        assert_eq!(
            vac.next_event().await,
            Some(RoboVacEvent::Update {
                command: Command::Battery,
                value: json!(55)
            })
        );
        assert_eq!(vac.battery_level().unwrap(), 55);

        link.push(LinkEvent::Error("timeout".into())).await;
        assert_eq!(
            vac.next_event().await,
            Some(RoboVacEvent::LinkError("timeout".into()))
        );

        link.close();
        assert_eq!(vac.next_event().await, Some(RoboVacEvent::Disconnected));
        assert_eq!(vac.next_event().await, None);
        assert!(!vac.is_connected());
    }

    #[tokio::test]
    async fn translates_registers_into_events() {
        let (mut vac, _link) = vacuum(json!({"15": "Charging"})).await;
        vac.handle_link_event(LinkEvent::Data(dps(json!({
            "2": true,
            "5": "auto",
            "106": 2,
            "126": encoded(json!({"hello": "world"})),
            "999": 1,
        }))));

        let events = drain(&mut vac);
        assert!(matches!(events[0], RoboVacEvent::Data(_)));
        assert!(events.contains(&RoboVacEvent::Update {
            command: Command::PlayPause,
            value: json!(true)
        }));
        assert!(events.contains(&RoboVacEvent::Update {
            command: Command::WorkMode,
            value: json!("auto")
        }));
        assert!(events.contains(&RoboVacEvent::Fault("wheel stuck".into())));
        assert!(events.contains(&RoboVacEvent::Update {
            command: Command::Hello,
            value: json!({"hello": "world"})
        }));
        assert_eq!(events.len(), 5);
    }

    #[tokio::test]
    async fn consumables_update_raises_alerts() {
        let (mut vac, _link) = vacuum(json!({"15": "Charging"})).await;
        let consumables = json!({"consumable": {"duration": {
            "SB": 10, "RB": 500, "FM": 20, "SS": 40, "BatteryStatus": 0
        }}});
        vac.handle_link_event(LinkEvent::DpRefresh(dps(
            json!({"116": encoded(consumables.clone())}),
        )));

        let events = drain(&mut vac);
        assert_eq!(
            events[1],
            RoboVacEvent::Update {
                command: Command::Consumables,
                value: consumables.clone()
            }
        );
        let alerts: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                RoboVacEvent::Alert(alert) => Some(alert.consumable),
                _ => None,
            })
            .collect();
        assert_eq!(
            alerts,
            [Consumable::RollingBrush, Consumable::Sensors, Consumable::Battery]
        );
        assert_eq!(vac.consumables().unwrap(), consumables);
    }

    #[tokio::test]
    async fn undecodable_register_is_skipped() {
        let (mut vac, _link) = vacuum(json!({"15": "Charging"})).await;
        vac.handle_link_event(LinkEvent::Data(dps(json!({"142": "%%%"}))));
        let events = drain(&mut vac);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            vac.status(),
            Err(RoboVacError::Decode { command: Command::Status, .. })
        ));
    }

    #[tokio::test]
    async fn getters_require_data_and_register() {
        let link = MockLink::default();
        let vac = RoboVac::with_link(link);
        assert!(matches!(vac.battery_level(), Err(RoboVacError::NoData)));
        assert!(matches!(vac.error(), Err(RoboVacError::NoData)));

        let (vac, _link) = vacuum(json!({"104": 80, "15": "Sleeping", "111": "loud"})).await;
        assert_eq!(vac.battery_level().unwrap(), 80);
        assert_eq!(vac.activity().unwrap(), "Sleeping");
        assert!(vac.docked().unwrap());
        assert_eq!(vac.error().unwrap(), "no error");
        assert!(matches!(
            vac.runtime(),
            Err(RoboVacError::Unsupported(Command::CleaningRuntime))
        ));
        assert!(matches!(
            vac.volume(),
            Err(RoboVacError::UnexpectedValue { command: Command::Volume, .. })
        ));
    }

    #[tokio::test]
    async fn decoded_getters() {
        let rooms = json!({"data": {"rooms": [{"id": 1, "name": "Kitchen"}]}});
        let (vac, _link) = vacuum(json!({
            "124": encoded(rooms.clone()),
            "106": "S_brush_stuck",
            "109": 42,
            "110": 17,
            "135": true,
        }))
        .await;
        assert_eq!(vac.rooms().unwrap(), rooms);
        assert!(matches!(
            vac.multimaps(),
            Err(RoboVacError::Unsupported(Command::Multimaps))
        ));
        assert_eq!(vac.error().unwrap(), "side brush stuck");
        assert_eq!(vac.runtime().unwrap(), 42);
        assert_eq!(vac.coverage().unwrap(), 17);
        assert!(vac.auto_return().unwrap());
        assert!(matches!(
            vac.voice(),
            Err(RoboVacError::Unsupported(Command::Voice))
        ));
    }

    #[tokio::test]
    async fn basic_commands_write_registers() {
        let (mut vac, link) = vacuum(json!({"15": "Running"})).await;
        vac.clean().await.unwrap();
        vac.pause().await.unwrap();
        vac.resume().await.unwrap();
        assert_eq!(
            link.sent(),
            vec![
                dps(json!({"5": "auto"})),
                dps(json!({"2": false})),
                dps(json!({"2": true})),
            ]
        );
    }

    #[tokio::test]
    async fn commands_refuse_without_data_or_connection() {
        let link = MockLink::default();
        let mut vac = RoboVac::with_link(link.clone());
        vac.connect().await.unwrap();
        assert!(matches!(vac.clean().await, Err(RoboVacError::NoData)));

        let (mut vac, link) = vacuum(json!({"15": "Running"})).await;
        vac.disconnect().await.unwrap();
        assert!(matches!(vac.clean().await, Err(RoboVacError::Disconnected)));
        assert!(matches!(vac.refresh().await, Err(RoboVacError::Disconnected)));
        assert!(link.sent().is_empty());
    }

    #[tokio::test]
    async fn refresh_goes_to_the_link() {
        let (mut vac, link) = vacuum(json!({"15": "Running"})).await;
        vac.refresh().await.unwrap();
        assert_eq!(*link.refreshes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn clean_rooms_sends_encoded_request() {
        let (mut vac, link) = vacuum(json!({"15": "Running"})).await;
        vac.clean_rooms(&[2, 5]).await.unwrap();
        let sent = link.sent();
        let request = payload::decode(Command::Rooms, &sent[0]["124"]).unwrap();
        assert_eq!(request["method"], "selectRoomsClean");
        assert_eq!(request["data"]["roomIds"], json!([2, 5]));
    }

    #[tokio::test]
    async fn locate_rules() {
        let (mut vac, link) = vacuum(json!({"15": "Charging", "103": false})).await;
        assert!(matches!(
            vac.locate(true).await,
            Err(RoboVacError::OnChargingBase)
        ));

        let (mut vac, link2) = vacuum(json!({"15": "Running", "103": false})).await;
        vac.locate(false).await.unwrap();
        assert!(link2.sent().is_empty());
        vac.locate(true).await.unwrap();
        assert_eq!(link2.sent(), vec![dps(json!({"103": true}))]);

        let (mut vac, _) = vacuum(json!({"15": "Running"})).await;
        assert!(matches!(
            vac.locate(true).await,
            Err(RoboVacError::Unsupported(Command::FindMyRobot))
        ));
        assert!(link.sent().is_empty());
    }

    #[tokio::test]
    async fn go_home_rules() {
        let (mut vac, _) = vacuum(json!({"15": "completed", "101": false})).await;
        assert!(matches!(
            vac.go_home(true).await,
            Err(RoboVacError::AlreadyHome)
        ));

        let (mut vac, link) = vacuum(json!({"15": "Running", "101": false})).await;
        assert!(!vac.going_home().unwrap());
        vac.go_home(true).await.unwrap();
        assert_eq!(link.sent(), vec![dps(json!({"101": true}))]);

        let (mut vac, link) = vacuum(json!({"15": "Running", "101": true})).await;
        vac.go_home(true).await.unwrap();
        assert!(link.sent().is_empty());
    }

    #[tokio::test]
    async fn multimaps_are_decoded() {
        let maps = json!({"maps": [{"id": 7, "name": "Ground floor"}], "current": 7});
        let (vac, _link) = vacuum(json!({"117": encoded(maps.clone())})).await;
        assert_eq!(vac.multimaps().unwrap(), maps);
    }

    #[tokio::test]
    async fn go_home_needs_its_register() {
        let (mut vac, link) = vacuum(json!({"15": "Running"})).await;
        assert!(matches!(
            vac.go_home(true).await,
            Err(RoboVacError::Unsupported(Command::GoHome))
        ));
        assert!(matches!(
            vac.going_home(),
            Err(RoboVacError::Unsupported(Command::GoHome))
        ));
        assert!(link.sent().is_empty());
    }

    #[tokio::test]
    async fn volume_bounds() {
        let (mut vac, link) = vacuum(json!({"111": 30})).await;
        assert_eq!(vac.volume().unwrap(), 30);
        assert!(matches!(
            vac.set_volume(101).await,
            Err(RoboVacError::VolumeOutOfRange(101))
        ));
        assert!(matches!(
            vac.set_volume(-1).await,
            Err(RoboVacError::VolumeOutOfRange(-1))
        ));
        vac.set_volume(100).await.unwrap();
        assert_eq!(link.sent(), vec![dps(json!({"111": 100}))]);

        let (mut vac, _) = vacuum(json!({"15": "Running"})).await;
        assert!(matches!(
            vac.set_volume(10).await,
            Err(RoboVacError::Unsupported(Command::Volume))
        ));
    }

    #[tokio::test]
    async fn auto_return_toggle() {
        let (mut vac, link) = vacuum(json!({"135": true})).await;
        vac.set_auto_return(false).await.unwrap();
        assert_eq!(link.sent(), vec![dps(json!({"135": false}))]);

        let (mut vac, link) = vacuum(json!({"15": "Running"})).await;
        assert!(matches!(
            vac.set_auto_return(true).await,
            Err(RoboVacError::Unsupported(Command::AutoReturn))
        ));
        assert!(link.sent().is_empty());
    }
}
