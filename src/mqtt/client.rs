use std::collections::HashMap;

use robovac::config::Config;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::bridge::StateUpdate;

pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
    config: Config,
}

impl MqttClient {
    pub fn new(config: &Config) -> Self {
        let mut mqttopts = MqttOptions::new(
            &config.mqtt.client_id,
            &config.mqtt.broker_host,
            config.mqtt.broker_port,
        );
        mqttopts.set_keep_alive(std::time::Duration::from_secs(30));

        if let (Some(user), Some(pass)) = (&config.mqtt.username, &config.mqtt.password) {
            mqttopts.set_credentials(user, pass);
        }

        // LWT: publish "offline" on disconnect, on the same topic "online" goes to.
        let lwt = rumqttc::LastWill::new(
            config.availability_topic(),
            "offline".as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
        );
        mqttopts.set_last_will(lwt);

        let (client, eventloop) = AsyncClient::new(mqttopts, 100);

        Self {
            client,
            eventloop,
            config: config.clone(),
        }
    }

    /// Run the MQTT event loop. Subscribes to command topics on connect,
    /// forwards incoming publish messages through command_tx, and publishes
    /// vacuum state updates received from update_rx.
    pub async fn run(
        mut self,
        command_tx: mpsc::Sender<MqttMessage>,
        mut update_rx: mpsc::Receiver<StateUpdate>,
    ) {
        let subscribe_topics: Vec<String> = self
            .config
            .devices
            .iter()
            .map(|d| self.config.device_command_topic(&d.topic_name))
            .collect();

        let mut last_values: HashMap<String, String> = HashMap::new();

        loop {
            tokio::select! {
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            info!("Connected to MQTT broker");
                            on_connect(&self.client, &self.config, &subscribe_topics).await;
                        }
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            forward(&command_tx, &publish).await;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("MQTT connection error: {}. Reconnecting...", e);
                            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        }
                    }
                }
                Some(update) = update_rx.recv() => {
                    let topic = self.config.device_topic(&update.topic_name, &update.suffix);
                    if last_values.get(&topic) == Some(&update.payload) {
                        continue;
                    }
                    last_values.insert(topic.clone(), update.payload.clone());

                    info!("Publishing {}: {}", topic, update.payload);
                    if let Err(e) = self
                        .client
                        .publish(&topic, QoS::AtMostOnce, update.retain, update.payload.as_bytes())
                        .await
                    {
                        warn!("Failed to publish {}: {}", topic, e);
                        continue;
                    }
                    // Drive the event loop to immediately flush this publish to the socket
                    match self.eventloop.poll().await {
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            forward(&command_tx, &publish).await;
                        }
                        Err(e) => {
                            error!("MQTT error after publish flush: {}", e);
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

async fn on_connect(client: &AsyncClient, config: &Config, subscribe_topics: &[String]) {
    let topic = config.availability_topic();
    if let Err(e) = client
        .publish(&topic, QoS::AtLeastOnce, true, "online")
        .await
    {
        error!("Failed to publish online status: {}", e);
    }

    for topic in subscribe_topics {
        if let Err(e) = client.subscribe(topic, QoS::AtLeastOnce).await {
            error!("Failed to subscribe to {}: {}", topic, e);
        }
    }
}

async fn forward(command_tx: &mpsc::Sender<MqttMessage>, publish: &rumqttc::Publish) {
    let msg = MqttMessage {
        topic: publish.topic.clone(),
        payload: String::from_utf8_lossy(&publish.payload).to_string(),
    };
    if command_tx.send(msg).await.is_err() {
        warn!("Command channel closed");
    }
}
