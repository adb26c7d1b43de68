use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const DEFAULT_LOCATION_ID: &str = "constraineddevice001";
pub const DEFAULT_STATUS_CODE: i32 = 0;

pub const DEFAULT_TYPE_ID: i32 = 0;
pub const HVAC_ACTUATOR_TYPE: i32 = 1001;
pub const HUMIDIFIER_ACTUATOR_TYPE: i32 = 1002;
pub const HUMIDITY_SENSOR_TYPE: i32 = 1010;
pub const PRESSURE_SENSOR_TYPE: i32 = 1012;
pub const TEMP_SENSOR_TYPE: i32 = 1013;
pub const SYSTEM_PERF_TYPE: i32 = 9001;
pub const CPU_UTIL_TYPE: i32 = 9002;
pub const MEM_UTIL_TYPE: i32 = 9004;

pub const HUMIDIFIER_ACTUATOR_NAME: &str = "HumidifierActuator";
pub const CPU_UTIL_NAME: &str = "DeviceCpuUtil";
pub const MEM_UTIL_NAME: &str = "DeviceMemUtil";
pub const GATEWAY_SYSTEM_PERF_NAME: &str = "GatewaySystemPerf";

/// Current UTC time as an ISO-8601 string, the format every wire entity carries.
pub fn now_timestamp() -> String {
    format_timestamp(OffsetDateTime::now_utc())
}

pub fn format_timestamp(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_default()
}

pub fn parse_timestamp(ts: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(ts, &Rfc3339).ok()
}

/// One observation reported by a constrained device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub name: String,
    #[serde(rename = "locationID")]
    pub location_id: String,
    #[serde(rename = "typeID")]
    pub type_id: i32,
    #[serde(default)]
    pub status_code: i32,
    pub value: f32,
    pub time_stamp: String,
    #[serde(default)]
    pub has_error: bool,
}

impl SensorReading {
    pub fn new(name: impl Into<String>, type_id: i32, value: f32) -> Self {
        Self {
            name: name.into(),
            location_id: DEFAULT_LOCATION_ID.to_string(),
            type_id,
            status_code: DEFAULT_STATUS_CODE,
            value,
            time_stamp: now_timestamp(),
            has_error: false,
        }
    }

    pub fn with_location(mut self, location_id: impl Into<String>) -> Self {
        self.location_id = location_id.into();
        self
    }

    pub fn with_timestamp(mut self, time_stamp: impl Into<String>) -> Self {
        self.time_stamp = time_stamp.into();
        self
    }

    pub fn parsed_timestamp(&self) -> Option<OffsetDateTime> {
        parse_timestamp(&self.time_stamp)
    }
}

/// Actuator command code. Unknown integers survive a decode/encode cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum CommandCode {
    Off,
    On,
    Other(i32),
}

impl From<i32> for CommandCode {
    fn from(code: i32) -> Self {
        match code {
            0 => CommandCode::Off,
            1 => CommandCode::On,
            other => CommandCode::Other(other),
        }
    }
}

impl From<CommandCode> for i32 {
    fn from(code: CommandCode) -> Self {
        match code {
            CommandCode::Off => 0,
            CommandCode::On => 1,
            CommandCode::Other(other) => other,
        }
    }
}

impl std::fmt::Display for CommandCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandCode::Off => write!(f, "OFF"),
            CommandCode::On => write!(f, "ON"),
            CommandCode::Other(code) => write!(f, "CMD({code})"),
        }
    }
}

/// Command sent to (or acknowledged by) an actuator.
///
/// Values are replaced in their owning slot as the command moves from issued
/// to acknowledged; nothing holds a shared mutable instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActuatorCommand {
    pub name: String,
    #[serde(rename = "locationID")]
    pub location_id: String,
    #[serde(rename = "typeID")]
    pub type_id: i32,
    #[serde(default)]
    pub status_code: i32,
    pub command: CommandCode,
    pub value: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_data: Option<String>,
    #[serde(default)]
    pub is_response: bool,
    #[serde(default)]
    pub has_error: bool,
    pub time_stamp: String,
}

impl ActuatorCommand {
    pub fn new(name: impl Into<String>, type_id: i32, command: CommandCode, value: f32) -> Self {
        Self {
            name: name.into(),
            location_id: DEFAULT_LOCATION_ID.to_string(),
            type_id,
            status_code: DEFAULT_STATUS_CODE,
            command,
            value,
            state_data: None,
            is_response: false,
            has_error: false,
            time_stamp: now_timestamp(),
        }
    }

    /// Same command with a different code, stamped now.
    pub fn with_command(&self, command: CommandCode) -> Self {
        Self {
            command,
            time_stamp: now_timestamp(),
            ..self.clone()
        }
    }
}

/// CPU / memory utilization sample. Only ever read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub name: String,
    #[serde(rename = "locationID")]
    pub location_id: String,
    #[serde(rename = "typeID", default = "system_perf_type")]
    pub type_id: i32,
    #[serde(default)]
    pub status_code: i32,
    pub cpu_util: f32,
    pub mem_util: f32,
    #[serde(default)]
    pub disk_util: f32,
    pub time_stamp: String,
    #[serde(default)]
    pub has_error: bool,
}

fn system_perf_type() -> i32 {
    SYSTEM_PERF_TYPE
}

impl MetricsSnapshot {
    pub fn new(name: impl Into<String>, cpu_util: f32, mem_util: f32) -> Self {
        Self {
            name: name.into(),
            location_id: DEFAULT_LOCATION_ID.to_string(),
            type_id: SYSTEM_PERF_TYPE,
            status_code: DEFAULT_STATUS_CODE,
            cpu_util,
            mem_util,
            disk_util: 0.0,
            time_stamp: now_timestamp(),
            has_error: false,
        }
    }

    /// CPU and memory utilization as two readings, the shape upstream services consume.
    pub fn to_readings(&self) -> [SensorReading; 2] {
        let base = |name: &str, type_id: i32, value: f32| SensorReading {
            name: name.to_string(),
            location_id: self.location_id.clone(),
            type_id,
            status_code: self.status_code,
            value,
            time_stamp: self.time_stamp.clone(),
            has_error: self.has_error,
        };
        [
            base(CPU_UTIL_NAME, CPU_UTIL_TYPE, self.cpu_util),
            base(MEM_UTIL_NAME, MEM_UTIL_TYPE, self.mem_util),
        ]
    }
}

/// Any of the three wire entities, used where collaborators take "an entity".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum DataMessage {
    Sensor(SensorReading),
    Actuator(ActuatorCommand),
    Metrics(MetricsSnapshot),
}

impl DataMessage {
    pub fn name(&self) -> &str {
        match self {
            DataMessage::Sensor(r) => &r.name,
            DataMessage::Actuator(c) => &c.name,
            DataMessage::Metrics(m) => &m.name,
        }
    }

    pub fn has_error(&self) -> bool {
        match self {
            DataMessage::Sensor(r) => r.has_error,
            DataMessage::Actuator(c) => c.has_error,
            DataMessage::Metrics(m) => m.has_error,
        }
    }
}
