//! Gateway router.
//!
//! The router is the single `DataMessageListener` behind both transports. It
//! persists and forwards inbound entities, runs sensor readings through the
//! policy for their type code and issues the resulting actuator commands to
//! the local actuator listeners and the actuator command topic.

use crate::cloud::{CloudClient, CloudClientConnector};
use crate::coap::{
    ActuatorCommandResource, ResourceHandler, ResourceServer, TelemetryUpdateResource,
};
use crate::codec;
use crate::config::GatewayConfig;
use crate::listener::{ActuatorDataListener, DataMessageListener};
use crate::metrics::spawn_system_perf_sampler;
use crate::models::{ActuatorCommand, CommandCode, DataMessage, MetricsSnapshot, SensorReading};
use crate::mqtt::{MqttTransport, PubSubClient};
use crate::persistence::{JsonFilePersistence, PersistenceClient};
use crate::policy::{Actuation, ThresholdPolicy, ThresholdPolicyConfig};
use crate::resource::ResourceName;
use crate::status::{spawn_status_publisher, GatewayStatus, StatusTracker};
use anyhow::Context;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// External collaborators. `None` disables the concern.
#[derive(Default, Clone)]
pub struct Collaborators {
    pub pubsub: Option<Arc<dyn PubSubClient>>,
    pub persistence: Option<Arc<dyn PersistenceClient>>,
    pub cloud: Option<Arc<dyn CloudClient>>,
}

impl Collaborators {
    /// Production collaborators for the enabled features.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let features = &config.features;
        let pubsub = features
            .enable_mqtt_client
            .then(|| Arc::new(MqttTransport::new(config.mqtt.clone())) as Arc<dyn PubSubClient>);

        let persistence = if features.enable_persistence_client {
            match JsonFilePersistence::new(&config.persistence.data_dir) {
                Ok(store) => Some(Arc::new(store) as Arc<dyn PersistenceClient>),
                Err(e) => {
                    warn!(
                        dir = %config.persistence.data_dir.display(),
                        "persistence disabled: {e}"
                    );
                    None
                }
            }
        } else {
            None
        };

        let cloud = features
            .enable_cloud_client
            .then(|| Arc::new(CloudClientConnector::new(&config.cloud)) as Arc<dyn CloudClient>);

        Self {
            pubsub,
            persistence,
            cloud,
        }
    }
}

/// Policy engine and the command it issued that is still unacknowledged.
struct PolicySlot {
    policy: ThresholdPolicy,
    pending: Option<ActuatorCommand>,
}

struct CoapEndpoint {
    server: ResourceServer,
    telemetry: Vec<Arc<TelemetryUpdateResource>>,
}

pub struct GatewayRouter {
    config: GatewayConfig,
    pubsub: Option<Arc<dyn PubSubClient>>,
    persistence: Option<Arc<dyn PersistenceClient>>,
    cloud: Option<Arc<dyn CloudClient>>,
    coap: Option<CoapEndpoint>,
    actuator_listeners: RwLock<Vec<Arc<dyn ActuatorDataListener>>>,
    policies: HashMap<i32, Mutex<PolicySlot>>,
    latest_response: Mutex<Option<ActuatorCommand>>,
    tracker: StatusTracker,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl GatewayRouter {
    /// Router with the configured policy.
    pub fn new(config: GatewayConfig, collaborators: Collaborators) -> Arc<Self> {
        let policy = ThresholdPolicyConfig::from(&config.policy);
        Self::with_policies(config, collaborators, vec![policy])
    }

    /// Router with one policy per monitored sensor type.
    pub fn with_policies(
        config: GatewayConfig,
        collaborators: Collaborators,
        policies: Vec<ThresholdPolicyConfig>,
    ) -> Arc<Self> {
        let mut actuator_listeners: Vec<Arc<dyn ActuatorDataListener>> = Vec::new();

        let coap = config.features.enable_coap_server.then(|| {
            let server = ResourceServer::new(config.coap.clone());
            let initial = ActuatorCommand::new(
                config.policy.actuator_name.clone(),
                config.policy.actuator_type,
                CommandCode::Off,
                config.policy.nominal,
            );
            let actuator = Arc::new(ActuatorCommandResource::new(initial));
            server.add_resource(
                &ResourceName::CdaActuatorCmd.path(),
                ResourceHandler::Observable(actuator.clone()),
            );
            actuator_listeners.push(actuator);

            let telemetry = vec![
                Arc::new(TelemetryUpdateResource::sensor_msg()),
                Arc::new(TelemetryUpdateResource::system_perf_msg()),
            ];
            for resource in &telemetry {
                server.add_resource(
                    &resource.resource().path(),
                    ResourceHandler::Put(resource.clone()),
                );
            }
            CoapEndpoint { server, telemetry }
        });

        let policies = policies
            .into_iter()
            .map(|conf| {
                let slot = PolicySlot {
                    policy: ThresholdPolicy::new(conf.clone()),
                    pending: None,
                };
                (conf.sensor_type, Mutex::new(slot))
            })
            .collect();

        Arc::new(Self {
            tracker: StatusTracker::new(config.device.location_id.clone()),
            config,
            pubsub: collaborators.pubsub,
            persistence: collaborators.persistence,
            cloud: collaborators.cloud,
            coap,
            actuator_listeners: RwLock::new(actuator_listeners),
            policies,
            latest_response: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Co-located actuator endpoint notified of every issued command.
    pub fn add_actuator_data_listener(&self, listener: Arc<dyn ActuatorDataListener>) {
        self.actuator_listeners.write().push(listener);
    }

    pub fn resource_server(&self) -> Option<&ResourceServer> {
        self.coap.as_ref().map(|c| &c.server)
    }

    pub fn coap_local_addr(&self) -> Option<SocketAddr> {
        self.resource_server().and_then(ResourceServer::local_addr)
    }

    /// Unacknowledged command issued for `sensor_type`, if any.
    pub fn pending_command(&self, sensor_type: i32) -> Option<ActuatorCommand> {
        self.policies
            .get(&sensor_type)
            .and_then(|slot| slot.lock().pending.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.policies
            .values()
            .filter(|slot| slot.lock().pending.is_some())
            .count()
    }

    pub fn latest_response(&self) -> Option<ActuatorCommand> {
        self.latest_response.lock().clone()
    }

    pub fn status(&self) -> GatewayStatus {
        self.tracker.snapshot(self.pubsub.as_deref(), self.pending_count())
    }

    fn default_qos(&self) -> i32 {
        i32::from(self.config.mqtt.default_qos)
    }

    /// Connect the transports, subscribe the inbound topics, start the
    /// resource server and the auxiliary tasks.
    pub async fn start_manager(self: &Arc<Self>) -> anyhow::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("gateway router already running");
            return Ok(());
        }
        info!(location = %self.config.device.location_id, "starting gateway router");

        if let Some(pubsub) = &self.pubsub {
            let listener: Arc<dyn DataMessageListener> = self.clone();
            pubsub.set_data_message_listener(listener);
            pubsub.connect().context("failed to connect MQTT client")?;
            for resource in ResourceName::INBOUND {
                let topic = resource.resource_name();
                if let Err(e) = pubsub.subscribe(&topic, self.default_qos(), None) {
                    warn!(topic = %resource, "subscribe failed: {e}");
                }
            }
        }

        if let Some(cloud) = &self.cloud {
            if !cloud.connect() {
                warn!("cloud client not connected, upstream forwarding will fail until it is");
            }
        }

        if let Some(coap) = &self.coap {
            let router: Weak<GatewayRouter> = Arc::downgrade(self);
            let listener: Weak<dyn DataMessageListener> = router;
            for resource in &coap.telemetry {
                resource.set_data_message_listener(listener.clone());
            }
            coap.server.start().await.context("failed to start CoAP server")?;
        }

        let mut tasks = Vec::new();
        if let (true, Some(pubsub)) = (self.config.features.enable_status_publisher, &self.pubsub) {
            let router = Arc::downgrade(self);
            tasks.push(spawn_status_publisher(
                pubsub.clone(),
                Duration::from_secs(self.config.status.interval_secs),
                self.default_qos(),
                move || router.upgrade().map(|r| r.status()),
            ));
        }
        if self.config.features.enable_system_perf {
            let router: Weak<GatewayRouter> = Arc::downgrade(self);
            let listener: Weak<dyn DataMessageListener> = router;
            tasks.push(spawn_system_perf_sampler(
                listener,
                self.config.device.location_id.clone(),
                Duration::from_secs(self.config.system_perf.poll_secs),
            ));
        }
        self.tasks.lock().extend(tasks);

        info!("gateway router started");
        Ok(())
    }

    /// Unsubscribe, disconnect, then stop the resource server. Once this
    /// returns no transport callback reaches the router.
    pub async fn stop_manager(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("gateway router not running");
            return;
        }
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("background task ended abnormally: {e}");
                }
            }
        }

        if let Some(pubsub) = &self.pubsub {
            for resource in ResourceName::INBOUND {
                if let Err(e) = pubsub.unsubscribe(&resource.resource_name()) {
                    debug!(topic = %resource, "unsubscribe failed: {e}");
                }
            }
            if let Err(e) = pubsub.disconnect() {
                warn!("MQTT disconnect failed: {e}");
            }
            pubsub.clear_data_message_listener();
        }

        if let Some(cloud) = &self.cloud {
            cloud.disconnect();
        }

        if let Some(coap) = &self.coap {
            for resource in &coap.telemetry {
                resource.clear_data_message_listener();
            }
            coap.server.stop().await;
        }
        info!("gateway router stopped");
    }

    fn store(&self, resource: ResourceName, message: DataMessage) {
        if let Some(persistence) = &self.persistence {
            if !persistence.store(&resource.resource_name(), self.default_qos(), &[message]) {
                warn!(%resource, "failed to persist message");
            }
        }
    }

    fn forward(&self, resource: ResourceName, message: &DataMessage) {
        if let Some(cloud) = &self.cloud {
            if !cloud.send(resource, message) {
                warn!(%resource, name = message.name(), "failed to forward message upstream");
            }
        }
    }

    fn issue_command(&self, command: &ActuatorCommand) {
        for listener in self.actuator_listeners.read().iter() {
            if !listener.on_actuator_update(command) {
                debug!(actuator = %command.name, "actuator listener declined update");
            }
        }

        let Some(pubsub) = &self.pubsub else { return };
        let topic = ResourceName::CdaActuatorCmd.resource_name();
        match codec::actuator_command_to_json(command) {
            Ok(json) => {
                if let Err(e) = pubsub.publish(&topic, json.as_bytes(), self.default_qos()) {
                    warn!(
                        %topic,
                        command = %command.command,
                        "failed to publish actuator command: {e}"
                    );
                }
            }
            Err(e) => warn!("cannot encode actuator command: {e}"),
        }
    }
}

impl DataMessageListener for GatewayRouter {
    fn on_sensor_reading(&self, resource: ResourceName, reading: SensorReading) -> bool {
        if reading.has_error {
            warn!(
                name = %reading.name,
                location = %reading.location_id,
                "sensor reading flagged with error"
            );
        }
        debug!(%resource, name = %reading.name, value = reading.value, "sensor reading received");
        self.store(resource, DataMessage::Sensor(reading.clone()));

        if let Some(slot) = self.policies.get(&reading.type_id) {
            let mut slot = slot.lock();
            if let Some(actuation) = slot.policy.evaluate(&reading, OffsetDateTime::now_utc()) {
                // Issued under the slot lock so commands leave in decision order.
                match actuation {
                    Actuation::Triggered(command) => {
                        debug!(
                            actuator = %command.name,
                            command = %command.command,
                            "policy triggered"
                        );
                        self.issue_command(&command);
                        slot.pending = Some(command);
                    }
                    Actuation::Restored(command) => {
                        debug!(
                            actuator = %command.name,
                            command = %command.command,
                            "policy restored nominal"
                        );
                        self.issue_command(&command);
                        slot.pending = None;
                    }
                }
            }
        }

        self.forward(resource, &DataMessage::Sensor(reading));
        true
    }

    fn on_actuator_ack(&self, resource: ResourceName, command: ActuatorCommand) -> bool {
        if command.has_error {
            warn!(actuator = %command.name, "actuator response flagged with error");
        }
        debug!(
            %resource,
            actuator = %command.name,
            command = %command.command,
            "actuator response received"
        );
        self.store(resource, DataMessage::Actuator(command.clone()));

        for slot in self.policies.values() {
            let mut slot = slot.lock();
            let acknowledged = slot
                .pending
                .as_ref()
                .is_some_and(|p| p.name == command.name && p.command == command.command);
            if acknowledged {
                slot.pending = None;
            }
        }
        *self.latest_response.lock() = Some(command.clone());

        self.forward(resource, &DataMessage::Actuator(command));
        true
    }

    fn on_metrics_snapshot(&self, resource: ResourceName, snapshot: MetricsSnapshot) -> bool {
        if snapshot.has_error {
            warn!(name = %snapshot.name, "metrics snapshot flagged with error");
        }
        debug!(
            %resource,
            cpu = snapshot.cpu_util,
            mem = snapshot.mem_util,
            "metrics snapshot received"
        );
        let message = DataMessage::Metrics(snapshot);
        self.store(resource, message.clone());
        self.forward(resource, &message);
        true
    }

    fn on_generic_message(&self, topic: &str, message: &str) -> bool {
        if message.trim().is_empty() {
            warn!(%topic, "ignoring empty message");
            return false;
        }
        if ResourceName::from_topic(topic) == Some(ResourceName::GdaMgmtStatusCmd) {
            info!(command = %message, "management command received");
        } else {
            info!(%topic, %message, "generic message received");
        }
        true
    }
}
