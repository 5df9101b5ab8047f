//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `mqtt` - MQTT client for receiving walker device messages
//! - `mqtt_egress` - MQTT publisher for egress events
//! - `egress_channel` - Typed channel for egress messages
//! - `egress` - Event log output to file (JSONL format)
//! - `buffer_store` - Persistence of computed buffer polygons
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod buffer_store;
pub mod egress;
pub mod egress_channel;
pub mod mqtt;
pub mod mqtt_egress;
pub mod prometheus;

// Re-export commonly used types
pub use buffer_store::{BufferStore, FileBufferStore, MemoryBufferStore};
pub use egress::{run_event_log, EventLog};
pub use egress_channel::{create_egress_channel, EgressMessage, EgressSender};
pub use mqtt_egress::MqttPublisher;
