//! Wire helpers over `coap_lite::Packet`.
//!
//! The packet codec itself comes from `coap-lite`; this module only shapes
//! packets the way the gateway exchanges them: Uri-Path segments mapped to a
//! `ResourcePath`, piggy-backed replies, and observe notifications.

use super::CoapError;
use crate::resource::ResourcePath;

pub use coap_lite::{
    CoapOption, ContentFormat, MessageClass, MessageType, Packet, RequestType, ResponseType,
};

/// Observe sequence numbers are 24 bits on the wire.
pub const OBSERVE_MASK: u32 = 0x00FF_FFFF;

pub fn decode(bytes: &[u8]) -> Result<Packet, CoapError> {
    Ok(Packet::from_bytes(bytes)?)
}

pub fn encode(packet: &Packet) -> Result<Vec<u8>, CoapError> {
    Ok(packet.to_bytes()?)
}

/// Empty message, used for pings and resets.
pub fn empty(mtype: MessageType, message_id: u16) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(mtype);
    packet.header.code = MessageClass::Empty;
    packet.header.message_id = message_id;
    packet
}

/// Request for `path`, one Uri-Path option per segment.
pub fn request(
    mtype: MessageType,
    method: RequestType,
    message_id: u16,
    token: &[u8],
    path: &ResourcePath,
) -> Packet {
    let mut packet = empty(mtype, message_id);
    packet.header.code = MessageClass::Request(method);
    packet.set_token(token.to_vec());
    for segment in path.segments() {
        packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
    }
    packet
}

/// Reply to `request`: a piggy-backed ACK for CON, a NON otherwise.
pub fn response_to(request: &Packet, status: ResponseType, message_id: u16) -> Packet {
    let (mtype, mid) = match request.header.get_type() {
        MessageType::Confirmable => (MessageType::Acknowledgement, request.header.message_id),
        _ => (MessageType::NonConfirmable, message_id),
    };
    let mut packet = empty(mtype, mid);
    packet.header.code = MessageClass::Response(status);
    packet.set_token(request.get_token().to_vec());
    packet
}

/// Unsolicited 2.05 pushed to one watcher of an observable resource.
pub fn notification(token: &[u8], sequence: u32, payload: Vec<u8>, message_id: u16) -> Packet {
    let mut packet = empty(MessageType::NonConfirmable, message_id);
    packet.header.code = MessageClass::Response(ResponseType::Content);
    packet.set_token(token.to_vec());
    set_observe(&mut packet, sequence);
    packet.set_content_format(ContentFormat::ApplicationJSON);
    packet.payload = payload;
    packet
}

pub fn method(packet: &Packet) -> Option<RequestType> {
    match packet.header.code {
        MessageClass::Request(method) => Some(method),
        _ => None,
    }
}

pub fn status(packet: &Packet) -> Option<ResponseType> {
    match packet.header.code {
        MessageClass::Response(status) => Some(status),
        _ => None,
    }
}

pub fn uri_path(packet: &Packet) -> ResourcePath {
    let segments = packet
        .get_option(CoapOption::UriPath)
        .map(|values| {
            values
                .iter()
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    ResourcePath::new(segments)
}

pub fn observe(packet: &Packet) -> Option<u32> {
    packet.get_observe_value().and_then(Result::ok)
}

pub fn set_observe(packet: &mut Packet, sequence: u32) {
    packet.set_observe_value(sequence & OBSERVE_MASK);
}

/// 2.xx codes. Continue counts: the request was well formed, nobody took it.
pub fn is_success(status: ResponseType) -> bool {
    matches!(
        status,
        ResponseType::Created
            | ResponseType::Deleted
            | ResponseType::Valid
            | ResponseType::Changed
            | ResponseType::Content
            | ResponseType::Continue
    )
}
