//! Message codec for the three wire entities.
//!
//! Payloads are UTF-8 JSON documents using the camelCase field names the
//! constrained devices emit (`locationID`, `typeID`, `timeStamp`, ...).
//! Every decode returns a `Result`; callers branch on it and never unwind.

use crate::models::{ActuatorCommand, DataMessage, MetricsSnapshot, SensorReading};
use crate::resource::PayloadKind;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("empty payload")]
    Empty,
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload kind {0:?} has no entity decoder")]
    Unsupported(PayloadKind),
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(CodecError::Empty);
    }
    let text = std::str::from_utf8(payload)?;
    Ok(serde_json::from_str(text)?)
}

fn encode<T: Serialize>(value: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(value)?)
}

pub fn sensor_reading_to_json(reading: &SensorReading) -> Result<String, CodecError> {
    encode(reading)
}

pub fn json_to_sensor_reading(payload: &[u8]) -> Result<SensorReading, CodecError> {
    decode(payload)
}

pub fn actuator_command_to_json(command: &ActuatorCommand) -> Result<String, CodecError> {
    encode(command)
}

pub fn json_to_actuator_command(payload: &[u8]) -> Result<ActuatorCommand, CodecError> {
    decode(payload)
}

pub fn metrics_snapshot_to_json(snapshot: &MetricsSnapshot) -> Result<String, CodecError> {
    encode(snapshot)
}

pub fn json_to_metrics_snapshot(payload: &[u8]) -> Result<MetricsSnapshot, CodecError> {
    decode(payload)
}

/// Encode whichever entity the message holds, without the enum envelope.
pub fn data_message_to_json(message: &DataMessage) -> Result<String, CodecError> {
    match message {
        DataMessage::Sensor(r) => sensor_reading_to_json(r),
        DataMessage::Actuator(c) => actuator_command_to_json(c),
        DataMessage::Metrics(m) => metrics_snapshot_to_json(m),
    }
}

/// Decode a payload according to the kind of resource it arrived on.
pub fn decode_payload(kind: PayloadKind, payload: &[u8]) -> Result<DataMessage, CodecError> {
    match kind {
        PayloadKind::Sensor => json_to_sensor_reading(payload).map(DataMessage::Sensor),
        PayloadKind::Actuator => json_to_actuator_command(payload).map(DataMessage::Actuator),
        PayloadKind::Metrics => json_to_metrics_snapshot(payload).map(DataMessage::Metrics),
        PayloadKind::Text => Err(CodecError::Unsupported(kind)),
    }
}
