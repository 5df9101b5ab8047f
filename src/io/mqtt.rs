//! MQTT client for receiving walker device data
//!
//! Topics are `{prefix}/{person}/{kind}` where kind is one of `location`,
//! `route`, `routes`, `registration` or `dismiss`.

use crate::domain::event::EngineEvent;
use crate::domain::route::{RoutePath, RoutePoint};
use crate::domain::types::{LocationSample, PersonId, RouteId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use anyhow::{bail, Context};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
struct RoutePayload {
    #[serde(default)]
    route_id: Option<String>,
    points: Vec<RoutePoint>,
    #[serde(default)]
    radius_meters: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RoutesPayload {
    route_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RegistrationPayload {
    active: bool,
}

/// Parse one message into an engine event
pub fn parse_message(prefix: &str, topic: &str, payload: &[u8]) -> anyhow::Result<EngineEvent> {
    let rest = topic
        .strip_prefix(prefix)
        .and_then(|r| r.strip_prefix('/'))
        .with_context(|| format!("topic outside prefix {prefix}"))?;
    let Some((person, kind)) = rest.split_once('/') else {
        bail!("topic has no message kind");
    };
    if person.is_empty() || kind.contains('/') {
        bail!("malformed topic");
    }
    let person = PersonId::from(person);

    let event = match kind {
        "location" => {
            let sample: LocationSample =
                serde_json::from_slice(payload).context("invalid location payload")?;
            EngineEvent::Location { person, sample }
        }
        "route" => {
            let route: RoutePayload =
                serde_json::from_slice(payload).context("invalid route payload")?;
            let route_id = match route.route_id {
                Some(id) if !id.is_empty() => RouteId(id),
                _ => RouteId::generate(),
            };
            let mut path = RoutePath::new(route.points);
            path.radius_meters = route.radius_meters;
            EngineEvent::RouteRegistered { person, route_id, path }
        }
        "routes" => {
            let routes: RoutesPayload =
                serde_json::from_slice(payload).context("invalid routes payload")?;
            EngineEvent::RoutesAssigned {
                person,
                route_ids: routes.route_ids.into_iter().map(RouteId).collect(),
            }
        }
        "registration" => {
            let reg: RegistrationPayload =
                serde_json::from_slice(payload).context("invalid registration payload")?;
            EngineEvent::Registration { person, active: reg.active }
        }
        "dismiss" => EngineEvent::DismissAlarm { person },
        other => bail!("unknown message kind {other}"),
    };
    Ok(event)
}

/// Start the MQTT client and send parsed events to the channel
///
/// Events are sent via try_send to avoid blocking the MQTT eventloop.
/// Dropped and unparseable messages are counted in metrics and logged
/// (drop warnings rate-limited).
pub async fn start_mqtt_client(
    config: &Config,
    event_tx: mpsc::Sender<EngineEvent>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let client_id = format!("route-guard-{}", config.site_id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let prefix = config.mqtt_topic_prefix().trim_end_matches('/').to_string();
    let filter = format!("{prefix}/+/+");

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client
        .subscribe(filter.as_str(), QoS::AtLeastOnce)
        .await
        .context("mqtt subscribe")?;

    info!(topic = %filter, host = %config.mqtt_host(), port = %config.mqtt_port(), "mqtt_subscribed");

    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let event = match parse_message(&prefix, &publish.topic, &publish.payload) {
                            Ok(event) => event,
                            Err(e) => {
                                metrics.record_ingress_dropped();
                                debug!(topic = %publish.topic, error = %e, "mqtt_message_rejected");
                                continue;
                            }
                        };
                        debug!(person = %event.person(), kind = %event.kind(), "mqtt_event");
                        if let Err(e) = event_tx.try_send(event) {
                            match e {
                                TrySendError::Full(_) => {
                                    metrics.record_ingress_dropped();
                                    if last_drop_warn.elapsed() > Duration::from_secs(1) {
                                        warn!("mqtt_event_dropped: channel full");
                                        last_drop_warn = Instant::now();
                                    }
                                }
                                TrySendError::Closed(_) => {
                                    warn!("event_channel_closed");
                                    return Ok(());
                                }
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_location() {
        let json = br#"{"latitude": 37.5, "longitude": 127.0, "heading": 90.0, "timestamp": 1700000000000}"#;
        let event = parse_message("walkers", "walkers/p1/location", json).unwrap();
        match event {
            EngineEvent::Location { person, sample } => {
                assert_eq!(person, PersonId::from("p1"));
                assert_eq!(sample.heading, 90.0);
                assert_eq!(sample.timestamp, 1_700_000_000_000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_location_without_heading() {
        let json = br#"{"latitude": 37.5, "longitude": 127.0, "timestamp": 5}"#;
        let event = parse_message("walkers", "walkers/p1/location", json).unwrap();
        assert!(matches!(event, EngineEvent::Location { sample, .. } if sample.heading == 0.0));
    }

    #[test]
    fn test_parse_route_with_and_without_id() {
        let json = br#"{"route_id": "r9", "points": [
            {"latitude": 0.0, "longitude": 0.0, "timestamp": 0},
            {"latitude": 0.0, "longitude": 0.001, "timestamp": 1000}
        ], "radius_meters": 12.0}"#;
        match parse_message("walkers", "walkers/p1/route", json).unwrap() {
            EngineEvent::RouteRegistered { route_id, path, .. } => {
                assert_eq!(route_id, RouteId::from("r9"));
                assert_eq!(path.points.len(), 2);
                assert_eq!(path.radius_meters, Some(12.0));
            }
            other => panic!("unexpected {other:?}"),
        }

        let json = br#"{"points": []}"#;
        match parse_message("walkers", "walkers/p1/route", json).unwrap() {
            EngineEvent::RouteRegistered { route_id, path, .. } => {
                assert!(!route_id.0.is_empty());
                assert_eq!(path.radius_meters, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_control_messages() {
        let routes = parse_message("walkers", "walkers/p1/routes", br#"{"route_ids": ["a", "b"]}"#)
            .unwrap();
        assert_eq!(
            routes,
            EngineEvent::RoutesAssigned {
                person: PersonId::from("p1"),
                route_ids: vec![RouteId::from("a"), RouteId::from("b")],
            }
        );

        let reg = parse_message("walkers", "walkers/p1/registration", br#"{"active": true}"#)
            .unwrap();
        assert_eq!(reg, EngineEvent::Registration { person: PersonId::from("p1"), active: true });

        let dismiss = parse_message("walkers", "walkers/p1/dismiss", b"").unwrap();
        assert_eq!(dismiss, EngineEvent::DismissAlarm { person: PersonId::from("p1") });
    }

    #[test]
    fn test_rejects_bad_topics_and_payloads() {
        assert!(parse_message("walkers", "other/p1/location", b"{}").is_err());
        assert!(parse_message("walkers", "walkers/p1", b"{}").is_err());
        assert!(parse_message("walkers", "walkers//location", b"{}").is_err());
        assert!(parse_message("walkers", "walkers/p1/teleport", b"{}").is_err());
        assert!(parse_message("walkers", "walkers/p1/location", b"not json").is_err());
        assert!(parse_message("walkers", "walkers/p1/registration", b"{}").is_err());
    }
}
