use gateway_devkit::{ReadingBuilder, RecordingActuatorListener, RecordingPersistence};
use gateway_kernel::coap::message::{self, MessageType, Packet, RequestType, ResponseType};
use gateway_kernel::codec;
use gateway_kernel::config::GatewayConfig;
use gateway_kernel::models::CommandCode;
use gateway_kernel::resource::{ResourceName, ResourcePath};
use gateway_kernel::router::{Collaborators, GatewayRouter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

struct Device {
    socket: UdpSocket,
    gateway: SocketAddr,
    next_mid: u16,
}

impl Device {
    async fn connect(gateway: SocketAddr) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Self {
            socket,
            gateway,
            next_mid: 100,
        }
    }

    async fn send(&mut self, mut packet: Packet) -> u16 {
        self.next_mid += 1;
        packet.header.message_id = self.next_mid;
        let bytes = message::encode(&packet).unwrap();
        self.socket.send_to(&bytes, self.gateway).await.unwrap();
        self.next_mid
    }

    async fn recv(&self) -> Option<Packet> {
        let mut buf = [0u8; 1500];
        let received = timeout(Duration::from_secs(2), self.socket.recv_from(&mut buf)).await;
        let (len, _) = received.ok()?.ok()?;
        message::decode(&buf[..len]).ok()
    }

    async fn put(&mut self, resource: ResourceName, payload: Vec<u8>) -> Packet {
        let mut packet = request(RequestType::Put, b"put", &resource.path());
        packet.payload = payload;
        let mid = self.send(packet).await;
        let reply = self.recv().await.expect("PUT reply");
        assert_eq!(reply.header.get_type(), MessageType::Acknowledgement);
        assert_eq!(reply.header.message_id, mid);
        reply
    }
}

fn request(method: RequestType, token: &[u8], path: &ResourcePath) -> Packet {
    message::request(MessageType::Confirmable, method, 0, token, path)
}

async fn gateway() -> (
    Arc<GatewayRouter>,
    Arc<RecordingPersistence>,
    Arc<RecordingActuatorListener>,
) {
    let mut config = GatewayConfig::default();
    config.features.enable_mqtt_client = false;
    config.features.enable_coap_server = true;
    config.features.enable_status_publisher = false;
    config.coap.host = "127.0.0.1".into();
    config.coap.port = 0;
    config.policy.debounce_secs = 10;

    let persistence = Arc::new(RecordingPersistence::new());
    let actuator = Arc::new(RecordingActuatorListener::new());
    let collaborators = Collaborators {
        persistence: Some(persistence.clone()),
        ..Collaborators::default()
    };
    let router = GatewayRouter::new(config.validated(), collaborators);
    router.add_actuator_data_listener(actuator.clone());
    router.start_manager().await.unwrap();
    (router, persistence, actuator)
}

#[tokio::test]
async fn test_put_sensor_reading_over_udp() {
    let (router, persistence, _) = gateway().await;
    let mut device = Device::connect(router.coap_local_addr().unwrap()).await;

    let reading = ReadingBuilder::humidity().json_at(0, 35.0);
    let reply = device.put(ResourceName::CdaSensorMsg, reading).await;
    assert_eq!(message::status(&reply), Some(ResponseType::Changed));
    assert_eq!(reply.get_token(), b"put");
    assert_eq!(persistence.stored("PIOT/ConstrainedDevice/SensorMsg").len(), 1);

    let reply = device.put(ResourceName::CdaSensorMsg, b"{oops".to_vec()).await;
    assert_eq!(message::status(&reply), Some(ResponseType::BadRequest));
    assert_eq!(persistence.total(), 1);

    router.stop_manager().await;
    assert!(router.coap_local_addr().is_none());
}

#[tokio::test]
async fn test_unknown_resource_and_wrong_method() {
    let (router, _, _) = gateway().await;
    let mut device = Device::connect(router.coap_local_addr().unwrap()).await;

    device.send(request(RequestType::Get, b"x", &"PIOT/Nope".into())).await;
    let reply = device.recv().await.unwrap();
    assert_eq!(message::status(&reply), Some(ResponseType::NotFound));

    let get_put_only = request(RequestType::Get, b"y", &ResourceName::CdaSensorMsg.path());
    device.send(get_put_only).await;
    let reply = device.recv().await.unwrap();
    assert_eq!(message::status(&reply), Some(ResponseType::MethodNotAllowed));

    router.stop_manager().await;
}

#[tokio::test]
async fn test_observer_is_notified_of_issued_commands() {
    let (router, _, actuator) = gateway().await;
    let mut device = Device::connect(router.coap_local_addr().unwrap()).await;

    let mut observe = request(RequestType::Get, b"obs", &ResourceName::CdaActuatorCmd.path());
    message::set_observe(&mut observe, 0);
    device.send(observe).await;
    let registered = device.recv().await.unwrap();
    assert_eq!(message::status(&registered), Some(ResponseType::Content));
    let registered_seq = message::observe(&registered).expect("observe sequence");
    let current = codec::json_to_actuator_command(&registered.payload).unwrap();
    assert_eq!(current.command, CommandCode::Off);

    let timeline = ReadingBuilder::humidity();
    device.put(ResourceName::CdaSensorMsg, timeline.json_at(0, 20.0)).await;

    // The triggering PUT yields an ACK and a notification, in either order.
    let mut put = request(RequestType::Put, b"put", &ResourceName::CdaSensorMsg.path());
    put.payload = timeline.json_at(10, 20.0);
    device.send(put).await;

    let first = device.recv().await.unwrap();
    let second = device.recv().await.unwrap();
    let notification = [first, second]
        .into_iter()
        .find(|p| p.header.get_type() == MessageType::NonConfirmable)
        .expect("observe notification");
    assert_eq!(notification.get_token(), b"obs");
    assert!(message::observe(&notification).unwrap() > registered_seq);
    let pushed = codec::json_to_actuator_command(&notification.payload).unwrap();
    assert_eq!(pushed.command, CommandCode::On);
    assert_eq!(actuator.commands(), vec![CommandCode::On]);

    router.stop_manager().await;
}

#[tokio::test]
async fn test_put_after_stop_is_not_answered() {
    let (router, _, _) = gateway().await;
    let addr = router.coap_local_addr().unwrap();
    router.stop_manager().await;

    let mut device = Device::connect(addr).await;
    let mut put = request(RequestType::Put, b"late", &ResourceName::CdaSensorMsg.path());
    put.payload = ReadingBuilder::humidity().json_at(0, 35.0);
    device.send(put).await;
    assert!(device.recv().await.is_none());
}
