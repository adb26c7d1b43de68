/*!
In-memory pub/sub client for gateway tests

Implements the kernel's `PubSubClient` without a broker: publishes and
subscriptions are recorded, inbound traffic is injected with
`simulate_incoming` and dispatched exactly as the real transport would.
*/

use gateway_kernel::listener::{dispatch_inbound, DataMessageListener};
use gateway_kernel::mqtt::{normalize_qos, MessageHandler, PubSubClient, TransportError};
use rumqttc::QoS;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

struct MockSubscription {
    topic: String,
    qos: QoS,
    handler: Option<MessageHandler>,
}

/// Broker-less `PubSubClient`
pub struct MockPubSubClient {
    published_messages: Mutex<Vec<MockMessage>>,
    subscriptions: Mutex<Vec<MockSubscription>>,
    listener: RwLock<Option<Arc<dyn DataMessageListener>>>,
    connected: AtomicBool,
    reconnects: AtomicU32,
    refuse_connect: AtomicBool,
}

impl MockPubSubClient {
    pub fn new() -> Self {
        Self {
            published_messages: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            listener: RwLock::new(None),
            connected: AtomicBool::new(false),
            reconnects: AtomicU32::new(0),
            refuse_connect: AtomicBool::new(false),
        }
    }

    /// Make the next `connect` calls fail as if the broker were unreachable.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Simulate a broker-side drop: publishes fail until `simulate_reconnect`.
    pub fn simulate_connection_loss(&self) {
        self.connected.store(false, Ordering::SeqCst);
        log::info!("[MOCK] connection lost");
    }

    pub fn simulate_reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        log::info!("[MOCK] reconnected");
    }

    /// Deliver a message as if it arrived from the broker. Only subscribed
    /// topics are delivered; a topic handler wins over the listener.
    pub fn simulate_incoming<S, V>(&self, topic: S, payload: V) -> bool
    where
        S: AsRef<str>,
        V: AsRef<[u8]>,
    {
        let topic = topic.as_ref();
        let payload = payload.as_ref();
        log::info!("[MOCK] simulated incoming: {} ({} bytes)", topic, payload.len());

        let handler = {
            let subscriptions = self.subscriptions.lock().unwrap();
            let matching = subscriptions.iter().find(|s| rumqttc::matches(topic, &s.topic));
            let Some(sub) = matching else {
                log::warn!("[MOCK] no subscription for {}", topic);
                return false;
            };
            sub.handler.clone()
        };

        if let Some(handler) = handler {
            handler(topic, payload);
            return true;
        }

        let listener = self.listener.read().unwrap();
        match listener.as_ref() {
            Some(listener) => dispatch_inbound(listener.as_ref(), topic, payload),
            None => false,
        }
    }

    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().unwrap().clone()
    }

    pub fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().iter().map(|s| s.topic.clone()).collect()
    }

    pub fn subscription_qos(&self, topic: &str) -> Option<QoS> {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.topic == topic)
            .map(|s| s.qos)
    }

    pub fn has_listener(&self) -> bool {
        self.listener.read().unwrap().is_some()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parse the last message published on `topic`.
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let messages = self.find_messages_by_topic(topic);
        if let Some(last_msg) = messages.last() {
            let parsed: T = serde_json::from_slice(&last_msg.payload)?;
            Ok(Some(parsed))
        } else {
            Ok(None)
        }
    }

    pub fn clear(&self) {
        self.published_messages.lock().unwrap().clear();
    }
}

impl Default for MockPubSubClient {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSubClient for MockPubSubClient {
    fn connect(&self) -> Result<(), TransportError> {
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyConnected);
        }
        log::info!("[MOCK] connected");
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        log::info!("[MOCK] disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: i32) -> Result<(), TransportError> {
        if topic.is_empty() {
            return Err(TransportError::InvalidTopic(topic.to_string()));
        }
        if payload.is_empty() {
            return Err(TransportError::EmptyPayload);
        }
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.published_messages.lock().unwrap().push(MockMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos: normalize_qos(qos, 0),
        });
        log::info!("[MOCK] published to {}: {} bytes", topic, payload.len());
        Ok(())
    }

    fn subscribe(
        &self,
        topic: &str,
        qos: i32,
        handler: Option<MessageHandler>,
    ) -> Result<(), TransportError> {
        if topic.is_empty() {
            return Err(TransportError::InvalidTopic(topic.to_string()));
        }
        let mut subscriptions = self.subscriptions.lock().unwrap();
        subscriptions.retain(|s| s.topic != topic);
        subscriptions.push(MockSubscription {
            topic: topic.to_string(),
            qos: normalize_qos(qos, 0),
            handler,
        });
        log::info!("[MOCK] subscribed to {}", topic);
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.topic != topic);
        if subscriptions.len() == before {
            return Err(TransportError::InvalidTopic(topic.to_string()));
        }
        Ok(())
    }

    fn set_data_message_listener(&self, listener: Arc<dyn DataMessageListener>) {
        *self.listener.write().unwrap() = Some(listener);
    }

    fn clear_data_message_listener(&self) {
        *self.listener.write().unwrap() = None;
    }

    fn reconnect_count(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }
}
