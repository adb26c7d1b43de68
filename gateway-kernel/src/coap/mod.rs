//! Constrained-protocol (CoAP) resource server.

pub mod handlers;
pub mod message;
pub mod server;
pub mod tree;

pub use handlers::{ActuatorCommandResource, TelemetryUpdateResource};
pub use message::{MessageType, Packet, RequestType, ResponseType};
pub use server::ResourceServer;
pub use tree::{
    GetHandler, ObservableHandler, Observers, Outcome, PutHandler, ResourceHandler, ResourceTree,
};

#[derive(Debug, thiserror::Error)]
pub enum CoapError {
    #[error("malformed message: {0}")]
    Packet(#[from] coap_lite::error::MessageError),
    #[error("server already running")]
    AlreadyRunning,
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}
