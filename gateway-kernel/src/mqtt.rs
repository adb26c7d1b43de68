//! MQTT transport.
//!
//! `MqttTransport` owns one broker connection. The rumqttc event loop is driven
//! either by a tokio task (`AsyncClient`) or by a dedicated OS thread (sync
//! `Client`), chosen by `BrokerConf::use_async_client`. Every request is issued
//! with the non-blocking `try_*` calls, so publishing from inside a message
//! callback never waits on the event loop that is running the callback.

use crate::config::BrokerConf;
use crate::listener::{dispatch_inbound, DataMessageListener};
use parking_lot::{Mutex, RwLock};
use rumqttc::{
    AsyncClient, Client, ClientError, ConnectReturnCode, Connection, Event, EventLoop, Incoming,
    MqttOptions, Outgoing, QoS, Transport,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Per-topic callback; takes precedence over the data message listener.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not connected to broker")]
    NotConnected,
    #[error("already connected")]
    AlreadyConnected,
    #[error("invalid topic {0:?}")]
    InvalidTopic(String),
    #[error("refusing to publish an empty payload")]
    EmptyPayload,
    #[error("async client requires a tokio runtime")]
    NoRuntime,
    #[error("broker request rejected: {0}")]
    Client(#[from] ClientError),
    #[error("failed to start driver thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Publish/subscribe client used by the router and the cloud forwarder.
pub trait PubSubClient: Send + Sync {
    fn connect(&self) -> Result<(), TransportError>;

    fn disconnect(&self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Fails fast with `NotConnected` while the broker link is down.
    fn publish(&self, topic: &str, payload: &[u8], qos: i32) -> Result<(), TransportError>;

    /// Remembered and re-issued after every reconnect.
    fn subscribe(
        &self,
        topic: &str,
        qos: i32,
        handler: Option<MessageHandler>,
    ) -> Result<(), TransportError>;

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    fn set_data_message_listener(&self, listener: Arc<dyn DataMessageListener>);

    /// Blocks until any in-flight dispatch has returned.
    fn clear_data_message_listener(&self);

    fn reconnect_count(&self) -> u32 {
        0
    }
}

/// Request side of a broker connection.
pub trait BrokerHandle: Send + Sync {
    fn request_publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), ClientError>;
    fn request_subscribe(&self, topic: &str, qos: QoS) -> Result<(), ClientError>;
    fn request_unsubscribe(&self, topic: &str) -> Result<(), ClientError>;
    fn request_disconnect(&self) -> Result<(), ClientError>;
}

impl BrokerHandle for AsyncClient {
    fn request_publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), ClientError> {
        self.try_publish(topic, qos, false, payload)
    }

    fn request_subscribe(&self, topic: &str, qos: QoS) -> Result<(), ClientError> {
        self.try_subscribe(topic, qos)
    }

    fn request_unsubscribe(&self, topic: &str) -> Result<(), ClientError> {
        self.try_unsubscribe(topic)
    }

    fn request_disconnect(&self) -> Result<(), ClientError> {
        self.try_disconnect()
    }
}

impl BrokerHandle for Client {
    fn request_publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), ClientError> {
        self.try_publish(topic, qos, false, payload)
    }

    fn request_subscribe(&self, topic: &str, qos: QoS) -> Result<(), ClientError> {
        self.try_subscribe(topic, qos)
    }

    fn request_unsubscribe(&self, topic: &str) -> Result<(), ClientError> {
        self.try_unsubscribe(topic)
    }

    fn request_disconnect(&self) -> Result<(), ClientError> {
        self.try_disconnect()
    }
}

/// Map an integer QoS onto the protocol levels; anything else uses `default`.
pub fn normalize_qos(qos: i32, default: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => match default {
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtMostOnce,
        },
    }
}

/// Where and how to reach the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    /// CA bundle bytes when TLS is enabled.
    pub ca: Option<Vec<u8>>,
}

impl BrokerEndpoint {
    /// Use TLS on the secure port when the configured CA file can be read;
    /// otherwise fall back to plain TCP with a warning.
    pub fn resolve(conf: &BrokerConf) -> Self {
        let ca = conf.cert_file.as_ref().and_then(|path| match std::fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    "failed to load broker CA, falling back to insecure connection: {e}"
                );
                None
            }
        });
        let port = if ca.is_some() { conf.secure_port } else { conf.port };
        Self {
            host: conf.host.clone(),
            port,
            ca,
        }
    }

    pub fn is_secure(&self) -> bool {
        self.ca.is_some()
    }

    pub fn protocol(&self) -> &'static str {
        if self.is_secure() {
            "ssl"
        } else {
            "tcp"
        }
    }

    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol(), self.host, self.port)
    }
}

struct Subscription {
    qos: QoS,
    handler: Option<MessageHandler>,
}

/// State shared between the transport and its event-loop driver.
struct TransportShared {
    handle: RwLock<Option<Arc<dyn BrokerHandle>>>,
    subscriptions: Mutex<BTreeMap<String, Subscription>>,
    listener: RwLock<Option<Arc<dyn DataMessageListener>>>,
    connected: AtomicBool,
    ever_connected: AtomicBool,
    stopping: AtomicBool,
    reconnects: AtomicU32,
}

impl TransportShared {
    fn new() -> Self {
        Self {
            handle: RwLock::new(None),
            subscriptions: Mutex::new(BTreeMap::new()),
            listener: RwLock::new(None),
            connected: AtomicBool::new(false),
            ever_connected: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            reconnects: AtomicU32::new(0),
        }
    }

    fn current_handle(&self) -> Option<Arc<dyn BrokerHandle>> {
        self.handle.read().clone()
    }

    /// Returns `false` once the driver should stop polling.
    fn handle_event(&self, event: Event) -> bool {
        match event {
            Event::Incoming(Incoming::ConnAck(ack)) => {
                if ack.code != ConnectReturnCode::Success {
                    warn!(code = ?ack.code, "broker refused connection");
                    return true;
                }
                let reconnect = self.ever_connected.swap(true, Ordering::SeqCst);
                if reconnect {
                    self.reconnects.fetch_add(1, Ordering::Relaxed);
                }
                self.connected.store(true, Ordering::SeqCst);
                info!(reconnect, session_present = ack.session_present, "MQTT connected");
                self.resubscribe();
            }
            Event::Incoming(Incoming::Publish(p)) => {
                self.dispatch(&p.topic, &p.payload);
            }
            Event::Incoming(Incoming::Disconnect) => {
                self.connected.store(false, Ordering::SeqCst);
                warn!("broker closed the session");
            }
            Event::Outgoing(Outgoing::Disconnect) => {
                self.connected.store(false, Ordering::SeqCst);
                debug!("disconnect sent");
                return !self.stopping.load(Ordering::SeqCst);
            }
            _ => {}
        }
        true
    }

    fn on_connection_error(&self, error: &dyn std::fmt::Display) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if was_connected {
            warn!("MQTT connection lost: {error}");
        } else {
            debug!("MQTT connection attempt failed: {error}");
        }
    }

    fn resubscribe(&self) {
        let Some(handle) = self.current_handle() else { return };
        let topics: Vec<(String, QoS)> = self
            .subscriptions
            .lock()
            .iter()
            .map(|(topic, sub)| (topic.clone(), sub.qos))
            .collect();
        for (topic, qos) in topics {
            match handle.request_subscribe(&topic, qos) {
                Ok(()) => debug!(%topic, ?qos, "subscribed"),
                Err(e) => warn!(%topic, "resubscribe failed: {e}"),
            }
        }
    }

    fn dispatch(&self, topic: &str, payload: &[u8]) {
        if self.stopping.load(Ordering::SeqCst) {
            return;
        }
        let handler = self
            .subscriptions
            .lock()
            .iter()
            .find(|(filter, sub)| sub.handler.is_some() && rumqttc::matches(topic, filter))
            .and_then(|(_, sub)| sub.handler.clone());
        if let Some(handler) = handler {
            handler(topic, payload);
            return;
        }

        // The read guard stays held for the whole callback so that clearing
        // the listener waits for it.
        let guard = self.listener.read();
        match guard.as_ref() {
            Some(listener) => {
                dispatch_inbound(listener.as_ref(), topic, payload);
            }
            None => debug!(%topic, "no listener registered, dropping message"),
        }
    }
}

enum Driver {
    Task {
        task: tokio::task::JoinHandle<()>,
        shutdown: watch::Sender<bool>,
    },
    Thread(JoinHandle<()>),
}

impl Driver {
    fn force_stop(self) {
        match self {
            Driver::Task { task, shutdown } => {
                let _ = shutdown.send(true);
                task.abort();
            }
            // Exits on its next event once `stopping` is set.
            Driver::Thread(_) => {}
        }
    }
}

pub struct MqttTransport {
    conf: BrokerConf,
    client_id: String,
    endpoint: BrokerEndpoint,
    shared: Arc<TransportShared>,
    driver: Mutex<Option<Driver>>,
}

impl MqttTransport {
    pub fn new(conf: BrokerConf) -> Self {
        let client_id = conf
            .client_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("gateway-{}", uuid::Uuid::new_v4().simple()));
        let endpoint = BrokerEndpoint::resolve(&conf);
        Self {
            conf,
            client_id,
            endpoint,
            shared: Arc::new(TransportShared::new()),
            driver: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    /// Topics that will be re-issued on the next (re)connect.
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.shared.subscriptions.lock().keys().cloned().collect()
    }

    fn mqtt_options(&self) -> MqttOptions {
        let mut opts = MqttOptions::new(
            self.client_id.clone(),
            self.endpoint.host.clone(),
            self.endpoint.port,
        );
        opts.set_keep_alive(Duration::from_secs(self.conf.keep_alive_secs.max(1)));
        opts.set_clean_session(self.conf.clean_session);
        if let Some(ca) = &self.endpoint.ca {
            opts.set_transport(Transport::tls(ca.clone(), None, None));
        }
        opts
    }

    fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.conf.reconnect_delay_secs)
    }

    #[cfg(test)]
    fn attach(&self, handle: Arc<dyn BrokerHandle>) {
        *self.shared.handle.write() = Some(handle);
    }
}

impl PubSubClient for MqttTransport {
    fn connect(&self) -> Result<(), TransportError> {
        let mut driver = self.driver.lock();
        if driver.is_some() {
            warn!("MQTT client already connected");
            return Err(TransportError::AlreadyConnected);
        }

        let options = self.mqtt_options();
        let capacity = self.conf.channel_capacity.max(1);
        self.shared.stopping.store(false, Ordering::SeqCst);

        if self.conf.use_async_client {
            let runtime =
                tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
            let (client, eventloop) = AsyncClient::new(options, capacity);
            *self.shared.handle.write() = Some(Arc::new(client));
            let (shutdown, shutdown_rx) = watch::channel(false);
            let task = runtime.spawn(drive_async(
                self.shared.clone(),
                eventloop,
                shutdown_rx,
                self.reconnect_delay(),
            ));
            *driver = Some(Driver::Task { task, shutdown });
        } else {
            let (client, connection) = Client::new(options, capacity);
            *self.shared.handle.write() = Some(Arc::new(client));
            let shared = self.shared.clone();
            let delay = self.reconnect_delay();
            let thread = std::thread::Builder::new()
                .name(format!("mqtt-{}", self.client_id))
                .spawn(move || drive_sync(shared, connection, delay))?;
            *driver = Some(Driver::Thread(thread));
        }

        info!(url = %self.endpoint.url(), client_id = %self.client_id, "MQTT client connecting");
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        let Some(driver) = self.driver.lock().take() else {
            warn!("MQTT client not connected");
            return Err(TransportError::NotConnected);
        };

        self.shared.stopping.store(true, Ordering::SeqCst);
        let handle = self.shared.handle.write().take();
        let requested = handle.map(|h| h.request_disconnect());
        if !matches!(requested, Some(Ok(()))) {
            driver.force_stop();
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        info!(url = %self.endpoint.url(), "MQTT client disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: i32) -> Result<(), TransportError> {
        if topic.trim().is_empty() {
            return Err(TransportError::InvalidTopic(topic.to_string()));
        }
        if payload.is_empty() {
            return Err(TransportError::EmptyPayload);
        }
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let handle = self.shared.current_handle().ok_or(TransportError::NotConnected)?;
        let qos = normalize_qos(qos, self.conf.default_qos);
        handle.request_publish(topic, qos, payload.to_vec())?;
        debug!(%topic, ?qos, bytes = payload.len(), "published");
        Ok(())
    }

    fn subscribe(
        &self,
        topic: &str,
        qos: i32,
        handler: Option<MessageHandler>,
    ) -> Result<(), TransportError> {
        if topic.trim().is_empty() {
            return Err(TransportError::InvalidTopic(topic.to_string()));
        }
        let qos = normalize_qos(qos, self.conf.default_qos);
        self.shared
            .subscriptions
            .lock()
            .insert(topic.to_string(), Subscription { qos, handler });

        // Otherwise issued from the ConnAck handler.
        if self.is_connected() {
            if let Some(handle) = self.shared.current_handle() {
                handle.request_subscribe(topic, qos)?;
                debug!(%topic, ?qos, "subscribed");
            }
        }
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.shared.subscriptions.lock().remove(topic);
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let handle = self.shared.current_handle().ok_or(TransportError::NotConnected)?;
        handle.request_unsubscribe(topic)?;
        debug!(%topic, "unsubscribed");
        Ok(())
    }

    fn set_data_message_listener(&self, listener: Arc<dyn DataMessageListener>) {
        *self.shared.listener.write() = Some(listener);
    }

    fn clear_data_message_listener(&self) {
        self.shared.listener.write().take();
    }

    fn reconnect_count(&self) -> u32 {
        self.shared.reconnects.load(Ordering::Relaxed)
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            self.shared.stopping.store(true, Ordering::SeqCst);
            driver.force_stop();
        }
    }
}

async fn drive_async(
    shared: Arc<TransportShared>,
    mut eventloop: EventLoop,
    mut shutdown: watch::Receiver<bool>,
    delay: Duration,
) {
    // A dropped sender means a graceful disconnect is draining.
    let mut watching = true;
    loop {
        tokio::select! {
            changed = shutdown.changed(), if watching => match changed {
                Ok(()) if *shutdown.borrow() => break,
                Ok(()) => {}
                Err(_) => watching = false,
            },
            event = eventloop.poll() => match event {
                Ok(event) => {
                    if !shared.handle_event(event) {
                        break;
                    }
                }
                Err(e) => {
                    if shared.stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    shared.on_connection_error(&e);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    shared.connected.store(false, Ordering::SeqCst);
    debug!("MQTT driver task stopped");
}

fn drive_sync(shared: Arc<TransportShared>, mut connection: Connection, delay: Duration) {
    for event in connection.iter() {
        if shared.stopping.load(Ordering::SeqCst) && event.is_err() {
            break;
        }
        match event {
            Ok(event) => {
                if !shared.handle_event(event) {
                    break;
                }
            }
            Err(e) => {
                shared.on_connection_error(&e);
                std::thread::sleep(delay);
            }
        }
    }
    shared.connected.store(false, Ordering::SeqCst);
    debug!("MQTT driver thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::tests::RecordingListener;
    use rumqttc::{ConnAck, Publish};

    #[derive(Default)]
    struct RecordingHandle {
        requests: Mutex<Vec<String>>,
    }

    impl RecordingHandle {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.requests.lock())
        }
    }

    impl BrokerHandle for RecordingHandle {
        fn request_publish(
            &self,
            topic: &str,
            qos: QoS,
            payload: Vec<u8>,
        ) -> Result<(), ClientError> {
            self.requests
                .lock()
                .push(format!("pub {topic} {} {}", qos as u8, String::from_utf8_lossy(&payload)));
            Ok(())
        }

        fn request_subscribe(&self, topic: &str, qos: QoS) -> Result<(), ClientError> {
            self.requests.lock().push(format!("sub {topic} {}", qos as u8));
            Ok(())
        }

        fn request_unsubscribe(&self, topic: &str) -> Result<(), ClientError> {
            self.requests.lock().push(format!("unsub {topic}"));
            Ok(())
        }

        fn request_disconnect(&self) -> Result<(), ClientError> {
            self.requests.lock().push("disconnect".into());
            Ok(())
        }
    }

    fn connack() -> Event {
        Event::Incoming(Incoming::ConnAck(ConnAck::new(ConnectReturnCode::Success, false)))
    }

    fn transport() -> (MqttTransport, Arc<RecordingHandle>) {
        let transport = MqttTransport::new(BrokerConf {
            client_id: Some("gateway-test".into()),
            default_qos: 1,
            ..BrokerConf::default()
        });
        let handle = Arc::new(RecordingHandle::default());
        transport.attach(handle.clone());
        (transport, handle)
    }

    #[test]
    fn test_normalize_qos() {
        assert_eq!(normalize_qos(0, 1), QoS::AtMostOnce);
        assert_eq!(normalize_qos(2, 0), QoS::ExactlyOnce);
        assert_eq!(normalize_qos(-1, 1), QoS::AtLeastOnce);
        assert_eq!(normalize_qos(7, 0), QoS::AtMostOnce);
    }

    #[test]
    fn test_endpoint_falls_back_without_ca() {
        let conf = BrokerConf {
            cert_file: Some("/no/such/ca.pem".into()),
            ..BrokerConf::default()
        };
        let endpoint = BrokerEndpoint::resolve(&conf);
        assert!(!endpoint.is_secure());
        assert_eq!(endpoint.url(), "tcp://localhost:1883");
    }

    #[test]
    fn test_endpoint_uses_tls_with_ca() {
        let ca = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(ca.path(), b"-----BEGIN CERTIFICATE-----").unwrap();
        let conf = BrokerConf {
            cert_file: Some(ca.path().to_path_buf()),
            ..BrokerConf::default()
        };
        let endpoint = BrokerEndpoint::resolve(&conf);
        assert!(endpoint.is_secure());
        assert_eq!(endpoint.url(), "ssl://localhost:8883");
    }

    #[test]
    fn test_generated_client_id_is_stable() {
        let transport = MqttTransport::new(BrokerConf::default());
        assert!(transport.client_id().starts_with("gateway-"));
        assert_eq!(transport.client_id(), transport.client_id());
    }

    #[test]
    fn test_publish_fails_fast_when_disconnected() {
        let (transport, handle) = transport();
        let err = transport.publish("a/b", b"x", 1).unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));

        transport.shared.handle_event(connack());
        transport.publish("a/b", b"x", 9).unwrap();
        assert_eq!(handle.take(), vec!["pub a/b 1 x"]);

        transport.shared.on_connection_error(&"connection reset");
        assert!(!transport.is_connected());
        assert!(matches!(transport.publish("a/b", b"x", 0), Err(TransportError::NotConnected)));
    }

    #[test]
    fn test_publish_rejects_empty_input() {
        let (transport, _) = transport();
        transport.shared.handle_event(connack());
        assert!(matches!(transport.publish("", b"x", 0), Err(TransportError::InvalidTopic(_))));
        assert!(matches!(transport.publish("a", b"", 0), Err(TransportError::EmptyPayload)));
    }

    #[test]
    fn test_resubscribe_after_reconnect() {
        let (transport, handle) = transport();
        transport.subscribe("PIOT/ConstrainedDevice/SensorMsg", 1, None).unwrap();
        transport.subscribe("PIOT/GatewayDevice/MgmtStatusCmd", 0, None).unwrap();
        assert!(handle.take().is_empty(), "deferred until connected");

        transport.shared.handle_event(connack());
        assert_eq!(
            handle.take(),
            vec!["sub PIOT/ConstrainedDevice/SensorMsg 1", "sub PIOT/GatewayDevice/MgmtStatusCmd 0"]
        );
        assert_eq!(transport.reconnect_count(), 0);

        transport.shared.on_connection_error(&"broker went away");
        transport.shared.handle_event(connack());
        assert_eq!(handle.take().len(), 2);
        assert_eq!(transport.reconnect_count(), 1);
        assert!(transport.is_connected());
    }

    #[test]
    fn test_unsubscribe_forgets_topic() {
        let (transport, handle) = transport();
        transport.shared.handle_event(connack());
        transport.subscribe("a/b", 0, None).unwrap();
        transport.unsubscribe("a/b").unwrap();
        assert!(transport.subscribed_topics().is_empty());
        assert_eq!(handle.take(), vec!["sub a/b 0", "unsub a/b"]);
    }

    #[test]
    fn test_incoming_publish_reaches_listener_until_cleared() {
        let (transport, _) = transport();
        let listener = Arc::new(RecordingListener::default());
        transport.set_data_message_listener(listener.clone());

        let publish = |payload: &str| {
            Event::Incoming(Incoming::Publish(Publish::new(
                "PIOT/GatewayDevice/MgmtStatusCmd",
                QoS::AtLeastOnce,
                payload.as_bytes().to_vec(),
            )))
        };
        transport.shared.handle_event(publish("first"));
        transport.clear_data_message_listener();
        transport.shared.handle_event(publish("second"));

        assert_eq!(
            *listener.events.lock(),
            vec!["text:PIOT/GatewayDevice/MgmtStatusCmd:first".to_string()]
        );
    }

    #[test]
    fn test_topic_handler_takes_precedence() {
        let (transport, _) = transport();
        let listener = Arc::new(RecordingListener::default());
        transport.set_data_message_listener(listener.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: MessageHandler = Arc::new(move |topic: &str, payload: &[u8]| {
            sink.lock().push(format!("{topic}={}", String::from_utf8_lossy(payload)));
        });
        transport.subscribe("cmd/+", 0, Some(handler)).unwrap();

        let event = Event::Incoming(Incoming::Publish(Publish::new(
            "cmd/reset",
            QoS::AtMostOnce,
            b"now".to_vec(),
        )));
        transport.shared.handle_event(event);

        assert_eq!(*seen.lock(), vec!["cmd/reset=now".to_string()]);
        assert!(listener.events.lock().is_empty());
    }

    #[test]
    fn test_handler_filters_follow_topic_levels() {
        let (transport, _) = transport();
        let listener = Arc::new(RecordingListener::default());
        transport.set_data_message_listener(listener.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: MessageHandler = Arc::new(move |topic: &str, _: &[u8]| {
            sink.lock().push(topic.to_string());
        });
        transport.subscribe("PIOT/+/SensorMsg", 0, Some(handler.clone())).unwrap();
        transport.subscribe("cmd/#", 0, Some(handler)).unwrap();

        let publish = |topic: &str| {
            Event::Incoming(Incoming::Publish(Publish::new(topic, QoS::AtMostOnce, b"x".to_vec())))
        };
        transport.shared.handle_event(publish("PIOT/ConstrainedDevice/SensorMsg"));
        transport.shared.handle_event(publish("cmd/reset/now"));
        // Last level differs from the `+` filter: falls through to the listener.
        transport.shared.handle_event(publish("PIOT/GatewayDevice/MgmtStatusCmd"));

        assert_eq!(
            *seen.lock(),
            vec![
                "PIOT/ConstrainedDevice/SensorMsg".to_string(),
                "cmd/reset/now".to_string(),
            ]
        );
        assert_eq!(
            *listener.events.lock(),
            vec!["text:PIOT/GatewayDevice/MgmtStatusCmd:x".to_string()]
        );
    }

    #[test]
    fn test_disconnect_without_connect_is_error() {
        let (transport, _) = transport();
        assert!(matches!(transport.disconnect(), Err(TransportError::NotConnected)));
    }

    #[test]
    fn test_outgoing_disconnect_stops_driver_only_when_stopping() {
        let (transport, _) = transport();
        assert!(transport.shared.handle_event(Event::Outgoing(Outgoing::Disconnect)));
        transport.shared.stopping.store(true, Ordering::SeqCst);
        assert!(!transport.shared.handle_event(Event::Outgoing(Outgoing::Disconnect)));
    }
}
