use std::future::Future;

use tokio::sync::mpsc;

use crate::error::Result;

pub mod client;

pub use client::TuyaLink;

/// A device's data point map (dp_id → JSON value).
pub type Dps = serde_json::Map<String, serde_json::Value>;

/// What the underlying Tuya client reports after a connection is established.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Disconnected,
    Error(String),
    /// DPs carried by a status or query response.
    Data(Dps),
    /// DPs carried by a refresh push.
    DpRefresh(Dps),
}

/// The high-level surface of a Tuya local client.
pub trait DeviceLink: Send {
    fn connect(&mut self) -> impl Future<Output = Result<mpsc::Receiver<LinkEvent>>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Ask the device to report all of its DPs.
    fn refresh(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn set_dps(&mut self, dps: Dps) -> impl Future<Output = Result<()>> + Send;
}
