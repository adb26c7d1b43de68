//! Gateway configuration.
//!
//! Loaded once at startup from a YAML file (path in `GATEWAY_CONFIG`, default
//! `gateway.yaml`) and handed to each component by value or `Arc`. Nothing in
//! the core looks configuration up globally.

use crate::models::{
    DEFAULT_LOCATION_ID, HUMIDIFIER_ACTUATOR_NAME, HUMIDIFIER_ACTUATOR_TYPE, HUMIDITY_SENSOR_TYPE,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, warn};

pub const DEFAULT_CONFIG_PATH: &str = "gateway.yaml";
pub const CONFIG_PATH_ENV: &str = "GATEWAY_CONFIG";

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_MQTT_SECURE_PORT: u16 = 8883;
pub const DEFAULT_COAP_PORT: u16 = 5683;
pub const DEFAULT_KEEP_ALIVE: u64 = 60;
pub const DEFAULT_QOS: u8 = 0;

pub const MIN_DEBOUNCE_SECS: u64 = 10;
pub const MAX_DEBOUNCE_SECS: u64 = 7200;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub device: DeviceConf,
    pub features: FeatureFlags,
    pub mqtt: BrokerConf,
    pub cloud: CloudConf,
    pub coap: CoapConf,
    pub persistence: PersistenceConf,
    pub policy: PolicyConf,
    pub status: StatusConf,
    pub system_perf: SystemPerfConf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConf {
    pub location_id: String,
}

impl Default for DeviceConf {
    fn default() -> Self {
        Self {
            location_id: "gatewaydevice001".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub enable_mqtt_client: bool,
    pub enable_coap_server: bool,
    pub enable_cloud_client: bool,
    pub enable_persistence_client: bool,
    pub enable_system_perf: bool,
    pub enable_status_publisher: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_mqtt_client: true,
            enable_coap_server: false,
            enable_cloud_client: false,
            enable_persistence_client: false,
            enable_system_perf: false,
            enable_status_publisher: true,
        }
    }
}

/// One broker connection (local gateway broker or cloud broker).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConf {
    pub host: String,
    pub port: u16,
    pub secure_port: u16,
    pub keep_alive_secs: u64,
    /// `true` drives the connection from a tokio task, `false` from an OS thread.
    pub use_async_client: bool,
    pub default_qos: u8,
    /// CA bundle; when present on disk the connection switches to TLS.
    pub cert_file: Option<PathBuf>,
    pub client_id: Option<String>,
    pub clean_session: bool,
    /// Delay before the driver polls again after a connection error.
    pub reconnect_delay_secs: u64,
    pub channel_capacity: usize,
}

impl Default for BrokerConf {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_MQTT_PORT,
            secure_port: DEFAULT_MQTT_SECURE_PORT,
            keep_alive_secs: DEFAULT_KEEP_ALIVE,
            use_async_client: true,
            default_qos: DEFAULT_QOS,
            cert_file: None,
            client_id: None,
            clean_session: false,
            reconnect_delay_secs: 2,
            channel_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConf {
    pub broker: BrokerConf,
    pub topic_prefix: String,
    pub qos: u8,
}

impl Default for CloudConf {
    fn default() -> Self {
        Self {
            broker: BrokerConf {
                client_id: Some("gateway-cloud-forwarder".into()),
                ..BrokerConf::default()
            },
            topic_prefix: "/".into(),
            qos: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoapConf {
    pub host: String,
    pub port: u16,
}

impl Default for CoapConf {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: DEFAULT_COAP_PORT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConf {
    pub data_dir: PathBuf,
}

impl Default for PersistenceConf {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// Thresholds for one monitored quantity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConf {
    pub sensor_type: i32,
    pub actuator_name: String,
    pub actuator_type: i32,
    pub nominal: f32,
    pub low: f32,
    pub high: f32,
    pub debounce_secs: u64,
}

impl Default for PolicyConf {
    fn default() -> Self {
        Self {
            sensor_type: HUMIDITY_SENSOR_TYPE,
            actuator_name: HUMIDIFIER_ACTUATOR_NAME.into(),
            actuator_type: HUMIDIFIER_ACTUATOR_TYPE,
            nominal: 40.0,
            low: 30.0,
            high: 50.0,
            debounce_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConf {
    pub interval_secs: u64,
}

impl Default for StatusConf {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemPerfConf {
    pub poll_secs: u64,
}

impl Default for SystemPerfConf {
    fn default() -> Self {
        Self { poll_secs: 30 }
    }
}

impl GatewayConfig {
    /// Bring out-of-range values back to safe ones. Never fails.
    pub fn validated(mut self) -> Self {
        self.policy.debounce_secs = clamp_debounce(self.policy.debounce_secs);
        for broker in [&mut self.mqtt, &mut self.cloud.broker] {
            if broker.default_qos > 2 {
                warn!(qos = broker.default_qos, "default QoS out of range, using {}", DEFAULT_QOS);
                broker.default_qos = DEFAULT_QOS;
            }
            if broker.keep_alive_secs == 0 {
                broker.keep_alive_secs = DEFAULT_KEEP_ALIVE;
            }
            broker.channel_capacity = broker.channel_capacity.max(1);
        }
        if self.cloud.qos > 2 {
            self.cloud.qos = 1;
        }
        if self.device.location_id.trim().is_empty() {
            self.device.location_id = DEFAULT_LOCATION_ID.into();
        }
        self.status.interval_secs = self.status.interval_secs.max(1);
        self.system_perf.poll_secs = self.system_perf.poll_secs.max(1);
        self
    }
}

/// Debounce windows outside [10, 7200] seconds fall back to the 10 s minimum.
pub fn clamp_debounce(secs: u64) -> u64 {
    if (MIN_DEBOUNCE_SECS..=MAX_DEBOUNCE_SECS).contains(&secs) {
        secs
    } else {
        warn!(requested = secs, "debounce window out of bounds, using {}s", MIN_DEBOUNCE_SECS);
        MIN_DEBOUNCE_SECS
    }
}

/// Read and validate a config file. An empty file yields the defaults.
pub async fn load_config_from(path: impl AsRef<Path>) -> Result<GatewayConfig, ConfigError> {
    let path = path.as_ref();
    let txt = fs::read_to_string(path).await.map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if txt.trim().is_empty() {
        return Ok(GatewayConfig::default().validated());
    }
    let cfg: GatewayConfig = serde_yaml::from_str(&txt).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(cfg.validated())
}

/// Load from `GATEWAY_CONFIG` or `gateway.yaml`, falling back to defaults.
pub async fn load_config() -> GatewayConfig {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    if !Path::new(&path).exists() {
        warn!(%path, "no config file, using defaults");
        return GatewayConfig::default().validated();
    }
    load_config_from(&path).await.unwrap_or_else(|e| {
        error!("{e}");
        GatewayConfig::default().validated()
    })
}
