//! Capability traits connecting the transports to the gateway router.

use crate::codec;
use crate::models::{ActuatorCommand, DataMessage, MetricsSnapshot, SensorReading};
use crate::resource::{PayloadKind, ResourceName};
use tracing::{debug, warn};

/// Receives every decoded inbound message, whichever transport it came from.
///
/// Each method returns `true` when the message was accepted.
pub trait DataMessageListener: Send + Sync {
    fn on_sensor_reading(&self, resource: ResourceName, reading: SensorReading) -> bool;

    fn on_actuator_ack(&self, resource: ResourceName, command: ActuatorCommand) -> bool;

    fn on_metrics_snapshot(&self, resource: ResourceName, snapshot: MetricsSnapshot) -> bool;

    /// Anything that is not one of the three wire entities.
    fn on_generic_message(&self, topic: &str, message: &str) -> bool;
}

/// Local actuator endpoint notified of every command the router issues.
pub trait ActuatorDataListener: Send + Sync {
    fn on_actuator_update(&self, command: &ActuatorCommand) -> bool;
}

/// Decode an inbound payload by the resource its topic names and hand it to
/// `listener`. Undecodable payloads are logged and dropped.
pub fn dispatch_inbound(listener: &dyn DataMessageListener, topic: &str, payload: &[u8]) -> bool {
    let Some(resource) = ResourceName::from_topic(topic) else {
        return dispatch_text(listener, topic, payload);
    };

    let kind = resource.payload_kind();
    if kind == PayloadKind::Text {
        return dispatch_text(listener, topic, payload);
    }

    match codec::decode_payload(kind, payload) {
        Ok(DataMessage::Sensor(reading)) => listener.on_sensor_reading(resource, reading),
        Ok(DataMessage::Actuator(command)) => listener.on_actuator_ack(resource, command),
        Ok(DataMessage::Metrics(snapshot)) => listener.on_metrics_snapshot(resource, snapshot),
        Err(e) => {
            warn!(%topic, bytes = payload.len(), "dropping undecodable message: {e}");
            false
        }
    }
}

fn dispatch_text(listener: &dyn DataMessageListener, topic: &str, payload: &[u8]) -> bool {
    match std::str::from_utf8(payload) {
        Ok(text) => listener.on_generic_message(topic, text),
        Err(e) => {
            debug!(%topic, "dropping non UTF-8 message: {e}");
            false
        }
    }
}
