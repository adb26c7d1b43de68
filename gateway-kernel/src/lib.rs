//! IoT gateway kernel.
//!
//! Bridges constrained devices speaking MQTT or CoAP to a local policy engine,
//! optional persistence and an optional cloud broker. `GatewayRouter` is the
//! entry point; everything else is a collaborator it wires together.

pub mod cloud;
pub mod coap;
pub mod codec;
pub mod config;
pub mod listener;
pub mod metrics;
pub mod models;
pub mod mqtt;
pub mod persistence;
pub mod policy;
pub mod resource;
pub mod router;
pub mod status;

pub use config::{load_config, load_config_from, GatewayConfig};
pub use listener::{dispatch_inbound, ActuatorDataListener, DataMessageListener};
pub use models::{ActuatorCommand, CommandCode, DataMessage, MetricsSnapshot, SensorReading};
pub use mqtt::{MqttTransport, PubSubClient, TransportError};
pub use resource::ResourceName;
pub use router::{Collaborators, GatewayRouter};
