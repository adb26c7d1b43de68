/*!
Test harness for the gateway router

Wires a `GatewayRouter` to the in-memory pub/sub client and the recording
collaborators so a test can drive it through the same topics a constrained
device would use and assert on what comes out.
*/

use crate::fixtures::{
    CommandBuilder, RecordingActuatorListener, RecordingCloudClient, RecordingPersistence,
};
use crate::mqtt_stub::MockPubSubClient;
use gateway_kernel::codec;
use gateway_kernel::config::GatewayConfig;
use gateway_kernel::models::{ActuatorCommand, CommandCode, SensorReading};
use gateway_kernel::resource::ResourceName;
use gateway_kernel::router::{Collaborators, GatewayRouter};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;

pub struct TestHarness {
    pub mqtt_client: Arc<MockPubSubClient>,
    pub persistence: Arc<RecordingPersistence>,
    pub cloud: Arc<RecordingCloudClient>,
    pub actuator: Arc<RecordingActuatorListener>,
    pub router: Arc<GatewayRouter>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(Self::default_config())
    }

    /// MQTT only, no background tasks, 10 s debounce.
    pub fn default_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.features.enable_mqtt_client = true;
        config.features.enable_coap_server = false;
        config.features.enable_status_publisher = false;
        config.features.enable_system_perf = false;
        config.policy.debounce_secs = 10;
        config.validated()
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        env_logger::try_init().ok();

        let mqtt_client = Arc::new(MockPubSubClient::new());
        let persistence = Arc::new(RecordingPersistence::new());
        let cloud = Arc::new(RecordingCloudClient::new());
        let actuator = Arc::new(RecordingActuatorListener::new());

        let collaborators = Collaborators {
            pubsub: Some(mqtt_client.clone()),
            persistence: Some(persistence.clone()),
            cloud: Some(cloud.clone()),
        };
        let router = GatewayRouter::new(config, collaborators);
        router.add_actuator_data_listener(actuator.clone());

        Self {
            mqtt_client,
            persistence,
            cloud,
            actuator,
            router,
        }
    }

    pub async fn start(&self) -> Result<()> {
        self.router.start_manager().await?;
        log::info!("test harness started");
        Ok(())
    }

    pub async fn stop(&self) {
        self.router.stop_manager().await;
    }

    /// Publish a reading on the sensor topic as a constrained device would.
    pub fn send_reading(&self, reading: &SensorReading) -> Result<bool> {
        let payload = codec::sensor_reading_to_json(reading)?;
        Ok(self.send_raw(&ResourceName::CdaSensorMsg.resource_name(), payload.as_bytes()))
    }

    pub fn send_actuator_response(&self, command: CommandCode) -> bool {
        let payload = CommandBuilder::humidifier_response_json(command);
        self.send_raw(&ResourceName::CdaActuatorResponse.resource_name(), &payload)
    }

    pub fn send_raw(&self, topic: &str, payload: &[u8]) -> bool {
        self.mqtt_client.simulate_incoming(topic, payload)
    }

    /// Commands the router published on the actuator command topic, in order.
    pub fn published_commands(&self) -> Result<Vec<ActuatorCommand>> {
        self.mqtt_client
            .find_messages_by_topic(&ResourceName::CdaActuatorCmd.resource_name())
            .iter()
            .map(|msg| codec::json_to_actuator_command(&msg.payload).map_err(anyhow::Error::from))
            .collect()
    }

    /// Poll until something is published on `topic`.
    pub async fn wait_for_message(&self, topic: &str, timeout_ms: u64) -> Result<Option<Value>> {
        let start = std::time::Instant::now();

        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if let Some(msg) = self.mqtt_client.get_last_json_message::<Value>(topic)? {
                return Ok(Some(msg));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        log::warn!("timeout waiting for message on {}", topic);
        Ok(None)
    }

    /// Compare a dotted field of the last message on `topic`.
    pub fn assert_field_equals(
        &self,
        topic: &str,
        field_path: &str,
        expected: &Value,
    ) -> Result<()> {
        if let Some(msg) = self.mqtt_client.get_last_json_message::<Value>(topic)? {
            if let Some(actual) = get_nested_field(&msg, field_path) {
                if actual == expected {
                    return Ok(());
                }
                anyhow::bail!(
                    "Field '{}' mismatch: expected {:?}, got {:?}",
                    field_path,
                    expected,
                    actual
                );
            }
        }

        anyhow::bail!("Field '{}' not found for comparison in {}", field_path, topic);
    }

    pub fn get_stats(&self) -> TestStats {
        let messages = self.mqtt_client.get_published_messages();
        let mut topic_counts = HashMap::new();

        for msg in &messages {
            *topic_counts.entry(msg.topic.clone()).or_insert(0) += 1;
        }

        TestStats {
            total_messages: messages.len(),
            topic_counts,
            subscriptions: self.mqtt_client.get_subscriptions(),
            stored: self.persistence.total(),
            forwarded: self.cloud.sent().len(),
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn get_nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        match current {
            Value::Object(obj) => current = obj.get(part)?,
            _ => return None,
        }
    }
    Some(current)
}

#[derive(Debug)]
pub struct TestStats {
    pub total_messages: usize,
    pub topic_counts: HashMap<String, usize>,
    pub subscriptions: Vec<String>,
    pub stored: usize,
    pub forwarded: usize,
}
