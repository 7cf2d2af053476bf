mod bridge;
mod mqtt;

use std::collections::HashMap;

use robovac::config;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting robovac-to-mqtt bridge (mqtt={}:{}, vacuums={})",
        config.mqtt.broker_host,
        config.mqtt.broker_port,
        config.devices.len(),
    );

    for device in &config.devices {
        info!("  Vacuum: {} ({}) at {}", device.name, device.id, device.ip);
    }

    // Channels
    let (mqtt_cmd_tx, mut mqtt_cmd_rx) = mpsc::channel::<mqtt::client::MqttMessage>(100);
    let (update_tx, update_rx) = mpsc::channel::<bridge::StateUpdate>(200);

    let mqtt_client = mqtt::client::MqttClient::new(&config);
    let mqtt_handle = tokio::spawn(async move {
        mqtt_client.run(mqtt_cmd_tx, update_rx).await;
    });

    // Per-device command channels, keyed by topic_name
    let mut device_cmd_txs: HashMap<String, mpsc::Sender<bridge::VacCommand>> = HashMap::new();
    let mut device_handles = Vec::new();

    for device_config in &config.devices {
        let (cmd_tx, cmd_rx) = mpsc::channel::<bridge::VacCommand>(50);
        device_cmd_txs.insert(device_config.topic_name.clone(), cmd_tx);

        let handle = tokio::spawn(bridge::run(
            device_config.clone(),
            config.tuya.clone(),
            update_tx.clone(),
            cmd_rx,
        ));
        device_handles.push(handle);
    }

    // Drop the original sender so the channel closes when all device tasks finish
    drop(update_tx);

    let topic_prefix = config.mqtt.topic_prefix.clone();

    // Main loop: route MQTT commands to vacuums + handle shutdown
    loop {
        tokio::select! {
            Some(msg) = mqtt_cmd_rx.recv() => {
                // Parse topic: {prefix}/{topic_name}/command/{action}
                let Some((topic_name, action)) = parse_command_topic(&msg.topic, &topic_prefix) else {
                    continue;
                };
                let Some(cmd_tx) = device_cmd_txs.get(topic_name) else {
                    warn!("Unknown vacuum in command topic: {}", topic_name);
                    continue;
                };
                match bridge::VacCommand::parse(action, &msg.payload) {
                    Some(cmd) => {
                        if cmd_tx.send(cmd).await.is_err() {
                            warn!("Command channel closed for vacuum {}", topic_name);
                        }
                    }
                    None => warn!("Could not build command: action={}, payload={}", action, msg.payload),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = async {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!("Failed to register SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            } => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    // Closing the command channels lets each vacuum disconnect cleanly
    drop(device_cmd_txs);
    for handle in device_handles {
        if tokio::time::timeout(std::time::Duration::from_secs(2), handle).await.is_err() {
            warn!("Vacuum task did not stop in time");
        }
    }
    mqtt_handle.abort();
    info!("robovac-to-mqtt bridge stopped");
}

/// Parse a command topic into (topic_name, action).
/// Expected format: {prefix}/{topic_name}/command/{action}
fn parse_command_topic<'a>(topic: &'a str, prefix: &str) -> Option<(&'a str, &'a str)> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let (topic_name, rest) = rest.split_once('/')?;
    let action = rest.strip_prefix("command/")?;
    if topic_name.is_empty() || action.is_empty() {
        return None;
    }
    Some((topic_name, action))
}
