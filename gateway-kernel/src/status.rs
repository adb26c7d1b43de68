use crate::models::now_timestamp;
use crate::mqtt::PubSubClient;
use crate::resource::ResourceName;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Periodic gateway health report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayStatus {
    pub uptime_seconds: u64,
    pub mqtt_connected: bool,
    pub mqtt_reconnects: u32,
    pub pending_commands: usize,
    pub location_id: String,
    #[serde(rename = "timeStamp")]
    pub time_stamp: String,
}

/// Uptime clock plus the counters a status report needs.
#[derive(Clone)]
pub struct StatusTracker {
    started: Instant,
    location_id: String,
}

impl StatusTracker {
    pub fn new(location_id: impl Into<String>) -> Self {
        Self {
            started: Instant::now(),
            location_id: location_id.into(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(
        &self,
        client: Option<&dyn PubSubClient>,
        pending_commands: usize,
    ) -> GatewayStatus {
        GatewayStatus {
            uptime_seconds: self.uptime().as_secs(),
            mqtt_connected: client.is_some_and(|c| c.is_connected()),
            mqtt_reconnects: client.map_or(0, |c| c.reconnect_count()),
            pending_commands,
            location_id: self.location_id.clone(),
            time_stamp: now_timestamp(),
        }
    }
}

/// Publish whatever `report` returns every `every`, until it returns `None`.
pub fn spawn_status_publisher<F>(
    client: Arc<dyn PubSubClient>,
    every: Duration,
    qos: i32,
    report: F,
) -> JoinHandle<()>
where
    F: Fn() -> Option<GatewayStatus> + Send + 'static,
{
    let topic = ResourceName::GdaMgmtStatusMsg.resource_name();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let Some(status) = report() else { break };
            let payload = match serde_json::to_string(&status) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("failed to encode gateway status: {e}");
                    continue;
                }
            };
            match client.publish(&topic, payload.as_bytes(), qos) {
                Ok(()) => debug!(
                    uptime = status.uptime_seconds,
                    pending = status.pending_commands,
                    "published gateway status"
                ),
                // Expected while the broker is unreachable.
                Err(e) => debug!("gateway status not published: {e}"),
            }
        }
        debug!("status publisher stopped");
    })
}
