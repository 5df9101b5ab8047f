//! MQTT publisher for egress events
//!
//! Publishes engine output to MQTT topics for downstream consumers:
//! - route-guard/status - Caregiver status changes (QoS 1)
//! - route-guard/guidance - Return guidance (QoS 0)
//! - route-guard/cues - Haptic cues (QoS 0)
//! - route-guard/metrics - Periodic metrics snapshots (QoS 0)
//!
//! Every message is also appended to the event log when one is attached.

use crate::infra::config::Config;
use crate::io::egress::EventLog;
use crate::io::egress_channel::EgressMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// MQTT publisher actor
///
/// Receives messages from the egress channel and publishes to MQTT topics.
pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<EgressMessage>,
    event_log: Option<EventLog>,
    status_topic: String,
    guidance_topic: String,
    cues_topic: String,
    metrics_topic: String,
}

impl MqttPublisher {
    /// Create a new MQTT publisher
    ///
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let client_id = format!("route-guard-egress-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_egress_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            rx,
            event_log: None,
            status_topic: config.mqtt_egress_status_topic().to_string(),
            guidance_topic: config.mqtt_egress_guidance_topic().to_string(),
            cues_topic: config.mqtt_egress_cues_topic().to_string(),
            metrics_topic: config.mqtt_egress_metrics_topic().to_string(),
        }
    }

    /// Also append every message to `log`
    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.event_log = Some(log);
        self
    }

    /// Run the publisher loop
    ///
    /// Processes messages from the channel and publishes to MQTT.
    /// Runs until shutdown signal is received.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            status = %self.status_topic,
            guidance = %self.guidance_topic,
            cues = %self.cues_topic,
            metrics = %self.metrics_topic,
            "mqtt_egress_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_egress_shutdown");
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish_message(msg).await;
                        }
                        return;
                    }
                }
                Some(msg) = self.rx.recv() => {
                    self.publish_message(msg).await;
                }
            }
        }
    }

    fn route(&self, msg: &EgressMessage) -> (&str, QoS) {
        match msg {
            // Caregiver alerts get at-least-once delivery
            EgressMessage::Status(_) => (&self.status_topic, QoS::AtLeastOnce),
            EgressMessage::Guidance(_) => (&self.guidance_topic, QoS::AtMostOnce),
            EgressMessage::Cue(_) => (&self.cues_topic, QoS::AtMostOnce),
            EgressMessage::Metrics(_) => (&self.metrics_topic, QoS::AtMostOnce),
        }
    }

    async fn publish_message(&self, msg: EgressMessage) {
        if let Some(ref log) = self.event_log {
            log.write_message(&msg);
        }

        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                error!(kind = %msg.kind(), error = %e, "mqtt_egress_serialize_failed");
                return;
            }
        };
        let (topic, qos) = self.route(&msg);
        if let Err(e) = self.client.publish(topic, qos, false, json.into_bytes()).await {
            match msg {
                EgressMessage::Status(_) => error!(error = %e, "mqtt_egress_status_failed"),
                _ => debug!(kind = %msg.kind(), error = %e, "mqtt_egress_publish_failed"),
            }
        }
    }
}
