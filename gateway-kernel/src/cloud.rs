//! Upstream forwarding to a cloud MQTT broker.

use crate::codec;
use crate::config::CloudConf;
use crate::models::{DataMessage, SensorReading};
use crate::mqtt::{MqttTransport, PubSubClient};
use crate::resource::{normalize_prefix, topic_name, ResourceName};
use std::sync::Arc;
use tracing::{debug, warn};

/// Cloud forwarding collaborator. Fire-and-forget: failures are reported as
/// `false` and logged by the caller.
pub trait CloudClient: Send + Sync {
    fn connect(&self) -> bool;

    fn disconnect(&self) -> bool;

    fn send(&self, resource: ResourceName, message: &DataMessage) -> bool;
}

pub struct CloudClientConnector {
    client: Arc<dyn PubSubClient>,
    topic_prefix: String,
    qos: i32,
}

impl CloudClientConnector {
    /// Connector over its own broker connection built from `conf.broker`.
    pub fn new(conf: &CloudConf) -> Self {
        Self::with_client(conf, Arc::new(MqttTransport::new(conf.broker.clone())))
    }

    pub fn with_client(conf: &CloudConf, client: Arc<dyn PubSubClient>) -> Self {
        Self {
            client,
            topic_prefix: normalize_prefix(&conf.topic_prefix),
            qos: i32::from(conf.qos),
        }
    }

    /// `prefix + device/type[-item]`, lower-cased.
    pub fn topic_for(&self, resource: ResourceName, item: Option<&str>) -> String {
        topic_name(&self.topic_prefix, resource.device_name(), resource.resource_type(), item)
    }

    pub fn subscribe_to_cloud_events(&self, resource: ResourceName) -> bool {
        let topic = self.topic_for(resource, None);
        if !self.client.is_connected() {
            warn!(%topic, "no cloud connection, ignoring subscribe");
            return false;
        }
        match self.client.subscribe(&topic, self.qos, None) {
            Ok(()) => true,
            Err(e) => {
                warn!(%topic, "cloud subscribe failed: {e}");
                false
            }
        }
    }

    pub fn unsubscribe_from_cloud_events(&self, resource: ResourceName) -> bool {
        let topic = self.topic_for(resource, None);
        match self.client.unsubscribe(&topic) {
            Ok(()) => true,
            Err(e) => {
                warn!(%topic, "cloud unsubscribe failed: {e}");
                false
            }
        }
    }

    fn publish(&self, topic: &str, payload: &str) -> bool {
        match self.client.publish(topic, payload.as_bytes(), self.qos) {
            Ok(()) => {
                debug!(%topic, "forwarded to cloud");
                true
            }
            Err(e) => {
                warn!(%topic, "failed to publish to cloud: {e}");
                false
            }
        }
    }

    fn send_reading(&self, resource: ResourceName, reading: &SensorReading) -> bool {
        match codec::sensor_reading_to_json(reading) {
            Ok(json) => self.publish(&self.topic_for(resource, Some(&reading.name)), &json),
            Err(e) => {
                warn!(name = %reading.name, "cannot encode reading for cloud: {e}");
                false
            }
        }
    }
}

impl CloudClient for CloudClientConnector {
    fn connect(&self) -> bool {
        match self.client.connect() {
            Ok(()) => true,
            Err(e) => {
                warn!("cloud connect failed: {e}");
                false
            }
        }
    }

    fn disconnect(&self) -> bool {
        if !self.client.is_connected() {
            return false;
        }
        self.client.disconnect().is_ok()
    }

    fn send(&self, resource: ResourceName, message: &DataMessage) -> bool {
        match message {
            DataMessage::Sensor(reading) => self.send_reading(resource, reading),
            DataMessage::Metrics(snapshot) => {
                // Upstream consumes CPU and memory as separate readings.
                let [cpu, mem] = snapshot.to_readings();
                let cpu_sent = self.send_reading(resource, &cpu);
                let mem_sent = self.send_reading(resource, &mem);
                cpu_sent && mem_sent
            }
            DataMessage::Actuator(command) => match codec::actuator_command_to_json(command) {
                Ok(json) => self.publish(&self.topic_for(resource, Some(&command.name)), &json),
                Err(e) => {
                    warn!(name = %command.name, "cannot encode command for cloud: {e}");
                    false
                }
            },
        }
    }
}
