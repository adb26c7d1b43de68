/*!
Recording collaborators and entity builders

Stand-ins for the router's persistence, cloud and actuator collaborators that
keep everything they are handed, plus builders for wire entities whose
timestamps are placed explicitly on a test timeline.
*/

use chrono::{DateTime, Duration, TimeZone, Utc};
use gateway_kernel::cloud::CloudClient;
use gateway_kernel::codec;
use gateway_kernel::listener::ActuatorDataListener;
use gateway_kernel::models::{
    ActuatorCommand, CommandCode, DataMessage, SensorReading, HUMIDIFIER_ACTUATOR_NAME,
    HUMIDIFIER_ACTUATOR_TYPE, HUMIDITY_SENSOR_TYPE,
};
use gateway_kernel::persistence::{PersistenceClient, PersistenceError};
use gateway_kernel::resource::ResourceName;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Sensor readings on a fixed timeline starting at `origin`.
pub struct ReadingBuilder {
    origin: DateTime<Utc>,
    name: String,
    type_id: i32,
    location_id: String,
}

impl ReadingBuilder {
    /// Humidity readings starting at 2024-03-01T10:00:00Z.
    pub fn humidity() -> Self {
        Self {
            origin: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).single().unwrap_or_else(Utc::now),
            name: "HumiditySensor".into(),
            type_id: HUMIDITY_SENSOR_TYPE,
            location_id: "constraineddevice001".into(),
        }
    }

    pub fn sensor(name: &str, type_id: i32) -> Self {
        Self {
            name: name.into(),
            type_id,
            ..Self::humidity()
        }
    }

    /// Timeline anchored at the current time.
    pub fn starting_now(mut self) -> Self {
        self.origin = Utc::now();
        self
    }

    pub fn at(&self, offset_secs: i64, value: f32) -> SensorReading {
        let ts = self.origin + Duration::seconds(offset_secs);
        SensorReading::new(self.name.clone(), self.type_id, value)
            .with_location(self.location_id.clone())
            .with_timestamp(ts.to_rfc3339())
    }

    /// JSON payload as a constrained device would publish it.
    pub fn json_at(&self, offset_secs: i64, value: f32) -> Vec<u8> {
        codec::sensor_reading_to_json(&self.at(offset_secs, value))
            .map(String::into_bytes)
            .unwrap_or_default()
    }
}

/// Actuator responses as the constrained device sends them back.
pub struct CommandBuilder;

impl CommandBuilder {
    pub fn humidifier_response(command: CommandCode) -> ActuatorCommand {
        let mut response =
            ActuatorCommand::new(HUMIDIFIER_ACTUATOR_NAME, HUMIDIFIER_ACTUATOR_TYPE, command, 40.0);
        response.is_response = true;
        response.time_stamp = Utc::now().to_rfc3339();
        response
    }

    pub fn humidifier_response_json(command: CommandCode) -> Vec<u8> {
        codec::actuator_command_to_json(&Self::humidifier_response(command))
            .map(String::into_bytes)
            .unwrap_or_default()
    }
}

/// Persistence double keyed by topic.
#[derive(Default)]
pub struct RecordingPersistence {
    stored: Mutex<HashMap<String, Vec<DataMessage>>>,
    failing: AtomicBool,
}

impl RecordingPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `store` reports failure while set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn stored(&self, topic: &str) -> Vec<DataMessage> {
        self.stored.lock().unwrap().get(topic).cloned().unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.stored.lock().unwrap().values().map(Vec::len).sum()
    }
}

impl PersistenceClient for RecordingPersistence {
    fn store(&self, topic: &str, _qos: i32, messages: &[DataMessage]) -> bool {
        if self.failing.load(Ordering::SeqCst) || messages.is_empty() {
            return false;
        }
        self.stored
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .extend_from_slice(messages);
        true
    }

    fn fetch(&self, topic: &str) -> Result<Vec<DataMessage>, PersistenceError> {
        Ok(self.stored(topic))
    }
}

/// Cloud double that records what the router forwards.
#[derive(Default)]
pub struct RecordingCloudClient {
    sent: Mutex<Vec<(ResourceName, DataMessage)>>,
    connected: AtomicBool,
}

impl RecordingCloudClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(ResourceName, DataMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl CloudClient for RecordingCloudClient {
    fn connect(&self) -> bool {
        self.connected.store(true, Ordering::SeqCst);
        true
    }

    fn disconnect(&self) -> bool {
        self.connected.swap(false, Ordering::SeqCst)
    }

    fn send(&self, resource: ResourceName, message: &DataMessage) -> bool {
        self.sent.lock().unwrap().push((resource, message.clone()));
        true
    }
}

/// Actuator endpoint double.
#[derive(Default)]
pub struct RecordingActuatorListener {
    updates: Mutex<Vec<ActuatorCommand>>,
}

impl RecordingActuatorListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<ActuatorCommand> {
        self.updates.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<CommandCode> {
        self.updates().iter().map(|c| c.command).collect()
    }
}

impl ActuatorDataListener for RecordingActuatorListener {
    fn on_actuator_update(&self, command: &ActuatorCommand) -> bool {
        self.updates.lock().unwrap().push(command.clone());
        true
    }
}
