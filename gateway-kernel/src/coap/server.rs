use super::message::{
    self, ContentFormat, MessageClass, MessageType, Packet, RequestType, ResponseType,
};
use super::tree::{Notification, Outcome, ResourceHandler, ResourceTree};
use super::CoapError;
use crate::config::CoapConf;
use crate::resource::ResourcePath;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const MAX_DATAGRAM: usize = 1152;

struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
    notifier: JoinHandle<()>,
}

/// UDP request/response server dispatching through a `ResourceTree`.
pub struct ResourceServer {
    conf: CoapConf,
    tree: Arc<ResourceTree>,
    next_mid: Arc<AtomicU16>,
    notify_tx: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
    running: Mutex<Option<Running>>,
}

impl ResourceServer {
    pub fn new(conf: CoapConf) -> Self {
        Self {
            conf,
            tree: Arc::new(ResourceTree::new()),
            next_mid: Arc::new(AtomicU16::new(seed_message_id())),
            notify_tx: Mutex::new(None),
            running: Mutex::new(None),
        }
    }

    pub fn tree(&self) -> &ResourceTree {
        &self.tree
    }

    pub fn add_resource(&self, path: &ResourcePath, handler: ResourceHandler) -> bool {
        if let ResourceHandler::Observable(h) = &handler {
            if let Some(tx) = self.notify_tx.lock().as_ref() {
                h.observers().attach(tx.clone());
            }
        }
        self.tree.add_resource(path, handler)
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }

    /// Bind the socket and spawn the worker and notifier tasks.
    pub async fn start(&self) -> Result<SocketAddr, CoapError> {
        if self.is_running() {
            return Err(CoapError::AlreadyRunning);
        }
        let socket = Arc::new(UdpSocket::bind((self.conf.host.as_str(), self.conf.port)).await?);
        let local_addr = socket.local_addr()?;

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        for observable in self.tree.observables() {
            observable.observers().attach(notify_tx.clone());
        }
        *self.notify_tx.lock() = Some(notify_tx);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(serve(
            socket.clone(),
            self.tree.clone(),
            self.next_mid.clone(),
            shutdown_rx.clone(),
        ));
        let notifier = tokio::spawn(push_notifications(
            socket,
            notify_rx,
            self.next_mid.clone(),
            shutdown_rx,
        ));

        let mut running = self.running.lock();
        if running.is_some() {
            let _ = shutdown.send(true);
            return Err(CoapError::AlreadyRunning);
        }
        *running = Some(Running {
            local_addr,
            shutdown,
            worker,
            notifier,
        });
        info!(%local_addr, resources = self.tree.resource_paths().len(), "CoAP server started");
        Ok(local_addr)
    }

    /// Signal shutdown and wait for both tasks. No-op when not running.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        for observable in self.tree.observables() {
            observable.observers().detach();
        }
        self.notify_tx.lock().take();

        let _ = running.shutdown.send(true);
        if let Err(e) = running.worker.await {
            warn!("CoAP worker ended abnormally: {e}");
        }
        if let Err(e) = running.notifier.await {
            warn!("CoAP notifier ended abnormally: {e}");
        }
        info!(local_addr = %running.local_addr, "CoAP server stopped");
    }

    /// Handle one datagram and return the reply, if any.
    pub fn handle_datagram(&self, bytes: &[u8], peer: SocketAddr) -> Option<Vec<u8>> {
        handle_datagram(&self.tree, &self.next_mid, bytes, peer)
    }
}

fn seed_message_id() -> u16 {
    let uuid = uuid::Uuid::new_v4();
    let b = uuid.as_bytes();
    u16::from_be_bytes([b[0], b[1]])
}

fn handle_datagram(
    tree: &ResourceTree,
    next_mid: &AtomicU16,
    bytes: &[u8],
    peer: SocketAddr,
) -> Option<Vec<u8>> {
    let request = match message::decode(bytes) {
        Ok(packet) => packet,
        Err(e) => {
            debug!(%peer, "dropping malformed datagram: {e}");
            return None;
        }
    };

    let Some(method) = message::method(&request) else {
        // CoAP ping: empty CON answered with RST.
        if request.header.code == MessageClass::Empty
            && request.header.get_type() == MessageType::Confirmable
        {
            let reset = message::empty(MessageType::Reset, request.header.message_id);
            return message::encode(&reset).ok();
        }
        return None;
    };

    let path = message::uri_path(&request);
    let (outcome, observe) = handle_request(tree, &request, method, &path, peer);
    debug!(%peer, %path, ?method, code = ?outcome.code, "request handled");

    let mid = next_mid.fetch_add(1, Ordering::Relaxed);
    let mut reply = message::response_to(&request, outcome.code, mid);
    if let Some(sequence) = observe {
        message::set_observe(&mut reply, sequence);
    }
    if !outcome.payload.is_empty() {
        if message::is_success(outcome.code) {
            reply.set_content_format(ContentFormat::ApplicationJSON);
        }
        reply.payload = outcome.payload;
    }
    match message::encode(&reply) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(%peer, "failed to encode reply: {e}");
            None
        }
    }
}

/// Returns the outcome and, for a new observation, the sequence to echo.
fn handle_request(
    tree: &ResourceTree,
    request: &Packet,
    method: RequestType,
    path: &ResourcePath,
    peer: SocketAddr,
) -> (Outcome, Option<u32>) {
    let Some(handler) = tree.lookup(path) else {
        return (Outcome::new(ResponseType::NotFound), None);
    };
    let token = request.get_token();

    match (handler, method) {
        (ResourceHandler::Get(h), RequestType::Get) => (h.get(), None),
        (ResourceHandler::Put(h), RequestType::Put) => (h.put(&request.payload), None),
        (ResourceHandler::Observable(h), RequestType::Get) => {
            let observe = match message::observe(request) {
                Some(0) => Some(h.observers().register(peer, token)),
                Some(1) => {
                    h.observers().deregister(peer, token);
                    None
                }
                _ => None,
            };
            let outcome = h.get();
            if !message::is_success(outcome.code) {
                h.observers().deregister(peer, token);
                return (outcome, None);
            }
            (outcome, observe)
        }
        _ => (Outcome::new(ResponseType::MethodNotAllowed), None),
    }
}

async fn serve(
    socket: Arc<UdpSocket>,
    tree: Arc<ResourceTree>,
    next_mid: Arc<AtomicU16>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, peer)) => {
                    if let Some(reply) = handle_datagram(&tree, &next_mid, &buf[..len], peer) {
                        if let Err(e) = socket.send_to(&reply, peer).await {
                            warn!(%peer, "failed to send reply: {e}");
                        }
                    }
                }
                Err(e) => warn!("CoAP receive failed: {e}"),
            }
        }
    }
    debug!("CoAP worker stopped");
}

async fn push_notifications(
    socket: Arc<UdpSocket>,
    mut notifications: mpsc::UnboundedReceiver<Notification>,
    next_mid: Arc<AtomicU16>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            note = notifications.recv() => {
                let Some(note) = note else { break };
                let mid = next_mid.fetch_add(1, Ordering::Relaxed);
                let packet = message::notification(&note.token, note.sequence, note.payload, mid);
                match message::encode(&packet) {
                    Ok(bytes) => {
                        if let Err(e) = socket.send_to(&bytes, note.peer).await {
                            warn!(peer = %note.peer, "failed to push notification: {e}");
                        }
                    }
                    Err(e) => warn!("failed to encode notification: {e}"),
                }
            }
        }
    }
    debug!("CoAP notifier stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap::handlers::{ActuatorCommandResource, TelemetryUpdateResource};
    use crate::coap::tree::ObservableHandler;
    use crate::listener::ActuatorDataListener;
    use crate::models::{
        ActuatorCommand, CommandCode, HUMIDIFIER_ACTUATOR_NAME, HUMIDIFIER_ACTUATOR_TYPE,
    };
    use crate::resource::ResourceName;

    const READING: &str = concat!(
        r#"{"name":"Humidity","locationID":"cda","typeID":1010,"#,
        r#""value":20.0,"timeStamp":"2024-03-01T10:00:00Z"}"#,
    );

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn server() -> (ResourceServer, Arc<ActuatorCommandResource>) {
        let server = ResourceServer::new(CoapConf {
            host: "127.0.0.1".into(),
            port: 0,
        });
        let actuator = Arc::new(ActuatorCommandResource::new(ActuatorCommand::new(
            HUMIDIFIER_ACTUATOR_NAME,
            HUMIDIFIER_ACTUATOR_TYPE,
            CommandCode::Off,
            40.0,
        )));
        server.add_resource(
            &ResourceName::CdaActuatorCmd.path(),
            ResourceHandler::Observable(actuator.clone()),
        );
        server.add_resource(
            &ResourceName::CdaSensorMsg.path(),
            ResourceHandler::Put(Arc::new(TelemetryUpdateResource::sensor_msg())),
        );
        (server, actuator)
    }

    fn con(method: RequestType, mid: u16, token: &[u8], resource: ResourceName) -> Packet {
        message::request(MessageType::Confirmable, method, mid, token, &resource.path())
    }

    fn exchange(server: &ResourceServer, request: Packet) -> Packet {
        let bytes = message::encode(&request).unwrap();
        let reply = server.handle_datagram(&bytes, peer()).unwrap();
        message::decode(&reply).unwrap()
    }

    #[test]
    fn test_unknown_path_is_not_found() {
        let (server, _) = server();
        let path = ResourcePath::from("PIOT/Nope");
        let req = message::request(MessageType::Confirmable, RequestType::Get, 1, b"t", &path);
        let reply = exchange(&server, req);
        assert_eq!(message::status(&reply), Some(ResponseType::NotFound));
        assert_eq!(reply.header.get_type(), MessageType::Acknowledgement);
        assert_eq!(reply.header.message_id, 1);
    }

    #[test]
    fn test_wrong_method_is_rejected() {
        let (server, _) = server();
        let req = message::request(
            MessageType::NonConfirmable,
            RequestType::Delete,
            2,
            b"t",
            &ResourceName::CdaSensorMsg.path(),
        );
        let reply = exchange(&server, req);
        assert_eq!(message::status(&reply), Some(ResponseType::MethodNotAllowed));
        assert_eq!(reply.header.get_type(), MessageType::NonConfirmable);
    }

    #[test]
    fn test_put_without_listener_continues() {
        let (server, _) = server();
        let mut req = con(RequestType::Put, 3, b"t", ResourceName::CdaSensorMsg);
        req.payload = READING.as_bytes().to_vec();
        let reply = exchange(&server, req);
        assert_eq!(message::status(&reply), Some(ResponseType::Continue));
    }

    #[test]
    fn test_observe_registration_and_notification() {
        let (server, actuator) = server();
        let (tx, mut rx) = mpsc::unbounded_channel();
        actuator.observers().attach(tx);

        let mut req = con(RequestType::Get, 4, b"ob", ResourceName::CdaActuatorCmd);
        message::set_observe(&mut req, 0);
        let reply = exchange(&server, req);
        assert_eq!(message::status(&reply), Some(ResponseType::Content));
        assert_eq!(message::observe(&reply), Some(0));
        assert_eq!(reply.get_content_format(), Some(ContentFormat::ApplicationJSON));
        assert_eq!(actuator.observers().count(), 1);

        let on = actuator.current().with_command(CommandCode::On);
        assert!(actuator.on_actuator_update(&on));
        let note = rx.try_recv().unwrap();
        assert_eq!(note.token, b"ob");
        assert_eq!(note.sequence, 1);

        let mut cancel = con(RequestType::Get, 5, b"ob", ResourceName::CdaActuatorCmd);
        message::set_observe(&mut cancel, 1);
        let reply = exchange(&server, cancel);
        assert_eq!(message::observe(&reply), None);
        assert_eq!(actuator.observers().count(), 0);
    }

    #[test]
    fn test_ping_gets_reset() {
        let (server, _) = server();
        let ping = message::empty(MessageType::Confirmable, 77);
        let reply = exchange(&server, ping);
        assert_eq!(reply.header.get_type(), MessageType::Reset);
        assert_eq!(reply.header.message_id, 77);
    }

    #[test]
    fn test_garbage_is_ignored() {
        let (server, _) = server();
        assert!(server.handle_datagram(&[0xff, 0x00], peer()).is_none());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (server, _) = server();
        let addr = server.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(server.is_running());
        assert!(matches!(server.start().await, Err(CoapError::AlreadyRunning)));
        server.stop().await;
        assert!(!server.is_running());
        server.stop().await;
    }
}
