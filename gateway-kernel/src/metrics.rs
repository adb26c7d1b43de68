//! Gateway system performance sampling.

use crate::listener::DataMessageListener;
use crate::models::{MetricsSnapshot, GATEWAY_SYSTEM_PERF_NAME};
use crate::resource::ResourceName;
use std::sync::Weak;
use std::time::Duration;
use sysinfo::{Disks, System};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct SystemPerfSampler {
    sys: System,
    disks: Disks,
    location_id: String,
}

impl SystemPerfSampler {
    pub fn new(location_id: impl Into<String>) -> Self {
        let mut sys = System::new();
        // First CPU reading is only meaningful relative to this one.
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        Self {
            sys,
            disks: Disks::new_with_refreshed_list(),
            location_id: location_id.into(),
        }
    }

    pub fn sample(&mut self) -> MetricsSnapshot {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.disks.refresh();

        let cpu_util = self.sys.global_cpu_info().cpu_usage();
        let mem_util = percent(self.sys.used_memory(), self.sys.total_memory());
        let (used, total) = self.disks.list().iter().fold((0u64, 0u64), |(used, total), disk| {
            (
                used + disk.total_space().saturating_sub(disk.available_space()),
                total + disk.total_space(),
            )
        });

        let mut snapshot = MetricsSnapshot::new(GATEWAY_SYSTEM_PERF_NAME, cpu_util, mem_util);
        snapshot.disk_util = percent(used, total);
        snapshot.location_id = self.location_id.clone();
        snapshot
    }
}

fn percent(part: u64, whole: u64) -> f32 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64 * 100.0) as f32
    }
}

/// Feed a snapshot to `listener` every `poll`, until the listener is dropped.
pub fn spawn_system_perf_sampler(
    listener: Weak<dyn DataMessageListener>,
    location_id: String,
    poll: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sampler = SystemPerfSampler::new(location_id);
        let mut interval = tokio::time::interval(poll);
        // The immediate first tick would report a zero CPU delta.
        interval.tick().await;
        info!(poll_secs = poll.as_secs(), "system performance sampler started");

        loop {
            interval.tick().await;
            let snapshot = sampler.sample();
            let Some(listener) = listener.upgrade() else { break };
            debug!(
                cpu = snapshot.cpu_util,
                mem = snapshot.mem_util,
                disk = snapshot.disk_util,
                "sampled gateway system performance"
            );
            listener.on_metrics_snapshot(ResourceName::GdaSystemPerfMsg, snapshot);
        }
        debug!("system performance sampler stopped");
    })
}
