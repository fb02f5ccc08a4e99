//! Typed NatNet messages.
//!
//! Each sub-module owns one message kind: its Rust representation, a
//! `decode(cursor, version)` constructor and, for kinds that are ever sent or
//! re-encoded, an `encode(writer, version)` method.  The 4-byte packet header
//! is handled by [`crate::protocol::codec`], never by the messages themselves.

use serde::{Deserialize, Serialize};

pub mod connect;
pub mod echo;
pub mod frame_of_data;
pub mod model_definitions;
pub mod server_info;

pub use connect::{ConnectMessage, DiscoveryMessage};
pub use echo::{EchoRequestMessage, EchoResponseMessage};
pub use frame_of_data::{
    DeviceData, FrameOfDataMessage, FrameParams, LabelledMarker, MarkerParams, MarkerSet,
    RigidBody, RigidBodyMarkers, RigidBodyParams, Skeleton, TimingInfo,
};
pub use model_definitions::{
    MarkerOffset, MarkerSetDescription, ModelDefinitionsMessage, ModelDescription, ModelType,
    RigidBodyDescription, SkeletonDescription,
};
pub use server_info::{ConnectionInfo, ServerInfoMessage};

// ── Message identifiers ───────────────────────────────────────────────────────

/// Message identifiers as carried in the first two bytes of every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum MessageId {
    Connect = 0,
    ServerInfo = 1,
    Request = 2,
    Response = 3,
    RequestModelDef = 4,
    ModelDef = 5,
    RequestFrameOfData = 6,
    FrameOfData = 7,
    MessageString = 8,
    Disconnect = 9,
    KeepAlive = 10,
    DisconnectByTimeout = 11,
    EchoRequest = 12,
    EchoResponse = 13,
    Discovery = 14,
    UnrecognizedRequest = 100,
}

impl TryFrom<u16> for MessageId {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, ()> {
        match value {
            0 => Ok(MessageId::Connect),
            1 => Ok(MessageId::ServerInfo),
            2 => Ok(MessageId::Request),
            3 => Ok(MessageId::Response),
            4 => Ok(MessageId::RequestModelDef),
            5 => Ok(MessageId::ModelDef),
            6 => Ok(MessageId::RequestFrameOfData),
            7 => Ok(MessageId::FrameOfData),
            8 => Ok(MessageId::MessageString),
            9 => Ok(MessageId::Disconnect),
            10 => Ok(MessageId::KeepAlive),
            11 => Ok(MessageId::DisconnectByTimeout),
            12 => Ok(MessageId::EchoRequest),
            13 => Ok(MessageId::EchoResponse),
            14 => Ok(MessageId::Discovery),
            100 => Ok(MessageId::UnrecognizedRequest),
            _ => Err(()),
        }
    }
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// Every message kind this crate can decode or encode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NatNetMessage {
    Connect(ConnectMessage),
    Discovery(DiscoveryMessage),
    ServerInfo(ServerInfoMessage),
    EchoRequest(EchoRequestMessage),
    EchoResponse(EchoResponseMessage),
    RequestModelDefinitions,
    ModelDefinitions(ModelDefinitionsMessage),
    FrameOfData(Box<FrameOfDataMessage>),
}

impl NatNetMessage {
    /// Returns the wire identifier for this message.
    pub fn message_id(&self) -> MessageId {
        match self {
            NatNetMessage::Connect(_) => MessageId::Connect,
            NatNetMessage::Discovery(_) => MessageId::Discovery,
            NatNetMessage::ServerInfo(_) => MessageId::ServerInfo,
            NatNetMessage::EchoRequest(_) => MessageId::EchoRequest,
            NatNetMessage::EchoResponse(_) => MessageId::EchoResponse,
            NatNetMessage::RequestModelDefinitions => MessageId::RequestModelDef,
            NatNetMessage::ModelDefinitions(_) => MessageId::ModelDef,
            NatNetMessage::FrameOfData(_) => MessageId::FrameOfData,
        }
    }
}
