use std::time::Duration;

use rust_async_tuyapi::mesparse::{CommandType, Message};
use rust_async_tuyapi::tuyadevice::TuyaDevice;
use rust_async_tuyapi::{Payload, PayloadStruct};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::error::{Result, RoboVacError};

use super::{DeviceLink, Dps, LinkEvent};

const PROTOCOL_VERSION: &str = "3.3";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

enum LinkRequest {
    Refresh(oneshot::Sender<Result<()>>),
    Set(Dps, oneshot::Sender<Result<()>>),
    Disconnect,
}

/// [`DeviceLink`] backed by `rust-async-tuyapi`.
///
/// Each connection runs in its own task that owns the `TuyaDevice`, keeps it
/// alive with heartbeats and forwards every DP report as a [`LinkEvent`].
pub struct TuyaLink {
    config: DeviceConfig,
    requests: Option<mpsc::Sender<LinkRequest>>,
}

impl TuyaLink {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            requests: None,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> LinkRequest,
    ) -> Result<T> {
        let requests = self.requests.as_ref().ok_or(RoboVacError::Disconnected)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        requests
            .send(build(reply_tx))
            .await
            .map_err(|_| RoboVacError::Disconnected)?;
        reply_rx.await.map_err(|_| RoboVacError::Disconnected)?
    }
}

impl DeviceLink for TuyaLink {
    async fn connect(&mut self) -> Result<mpsc::Receiver<LinkEvent>> {
        if let Some(previous) = self.requests.take() {
            let _ = previous.send(LinkRequest::Disconnect).await;
        }

        info!(
            "Connecting to device {} ({}) at {}",
            self.config.name, self.config.id, self.config.ip
        );

        let mut device = TuyaDevice::new(
            PROTOCOL_VERSION,
            &self.config.id,
            Some(&self.config.key),
            self.config.ip,
        )
        .map_err(|e| RoboVacError::Link(format!("Failed to create device: {e:?}")))?;

        let mut receiver = device
            .connect()
            .await
            .map_err(|e| RoboVacError::Link(format!("Failed to connect: {e:?}")))?;

        info!("Connected to device {}", self.config.name);

        let (event_tx, event_rx) = mpsc::channel(64);
        let (request_tx, mut request_rx) = mpsc::channel(16);
        self.requests = Some(request_tx);

        let session = Session {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            events: event_tx,
        };

        tokio::spawn(async move {
            // Initial DP query so the facade has state to work with.
            if let Err(e) = session.query_all_dps(&mut device).await {
                session.report(e.to_string()).await;
            }

            let mut heartbeat_interval = tokio::time::interval(HEARTBEAT_INTERVAL);

            loop {
                tokio::select! {
                    _ = heartbeat_interval.tick() => {
                        if let Err(e) = device.heartbeat().await {
                            session.report(format!("Heartbeat failed: {e:?}")).await;
                            break;
                        }
                    }
                    msg = receiver.recv() => {
                        match msg {
                            Some(Ok(messages)) => {
                                for m in messages {
                                    if m.command == Some(CommandType::HeartBeat) {
                                        continue;
                                    }
                                    session.forward(&m).await;
                                }
                            }
                            Some(Err(e)) => {
                                session.report(format!("Device error: {e:?}")).await;
                                break;
                            }
                            None => {
                                session.report("Device channel closed".into()).await;
                                break;
                            }
                        }
                    }
                    request = request_rx.recv() => {
                        match request {
                            Some(LinkRequest::Refresh(reply)) => {
                                let _ = reply.send(session.query_all_dps(&mut device).await);
                            }
                            Some(LinkRequest::Set(dps, reply)) => {
                                info!("Sending command to {}: {:?}", session.name, dps);
                                let result = device
                                    .set_values(serde_json::Value::Object(dps))
                                    .await
                                    .map(|_| ())
                                    .map_err(|e| RoboVacError::Link(format!("Failed to set values: {e:?}")));
                                let _ = reply.send(result);
                            }
                            Some(LinkRequest::Disconnect) | None => {
                                info!("Disconnecting from device {}", session.name);
                                break;
                            }
                        }
                    }
                }
            }

            let _ = session.events.send(LinkEvent::Disconnected).await;
        });

        Ok(event_rx)
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(requests) = self.requests.take() {
            let _ = requests.send(LinkRequest::Disconnect).await;
        }
        Ok(())
    }

    async fn refresh(&mut self) -> Result<()> {
        self.request(LinkRequest::Refresh).await
    }

    async fn set_dps(&mut self, dps: Dps) -> Result<()> {
        self.request(|reply| LinkRequest::Set(dps, reply)).await
    }
}

struct Session {
    id: String,
    name: String,
    events: mpsc::Sender<LinkEvent>,
}

impl Session {
    async fn query_all_dps(&self, device: &mut TuyaDevice) -> Result<()> {
        let payload = Payload::Struct(PayloadStruct {
            dev_id: self.id.clone(),
            gw_id: Some(self.id.clone()),
            uid: None,
            t: None,
            dp_id: None,
            dps: Some(json!({})),
        });

        device
            .get(payload)
            .await
            .map_err(|e| RoboVacError::Link(format!("DP query failed: {e:?}")))
    }

    async fn report(&self, error: String) {
        warn!("Device {} link error: {}", self.name, error);
        let _ = self.events.send(LinkEvent::Error(error)).await;
    }

    async fn forward(&self, msg: &Message) {
        let Some(dps) = extract_dps(&msg.payload) else {
            debug!("No dps in message from {}, skipping", self.name);
            return;
        };

        debug!("Device {} reported {} DPs", self.name, dps.len());

        let event = if msg.command == Some(CommandType::DpRefresh) {
            LinkEvent::DpRefresh(dps)
        } else {
            LinkEvent::Data(dps)
        };
        if self.events.send(event).await.is_err() {
            debug!("Event receiver for {} dropped", self.name);
        }
    }
}

/// Pull the `dps` object out of whichever payload variant the library returns.
/// DP query responses sometimes arrive as `Payload::String` holding
/// `{"dps":{...}}` instead of `Payload::Struct`.
fn extract_dps(payload: &Payload) -> Option<Dps> {
    let dps_value: Option<serde_json::Value> = match payload {
        Payload::Struct(ps) => ps.dps.clone(),
        Payload::String(s) => serde_json::from_str::<serde_json::Value>(s)
            .ok()
            .and_then(|v| v.get("dps").cloned()),
        Payload::Raw(b) => {
            debug!("Payload::Raw ({} bytes), skipping", b.len());
            None
        }
        _ => None,
    };

    match dps_value? {
        serde_json::Value::Object(map) => Some(map),
        other => {
            debug!("dps is not a JSON object: {}", other);
            None
        }
    }
}
