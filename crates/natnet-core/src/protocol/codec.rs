//! Packet framing and the message registry.
//!
//! Wire format:
//! ```text
//! [message_id:2][payload_len:2][payload:payload_len]
//! ```
//! Header size: 4 bytes. All multi-byte integers are little-endian.
//!
//! # Decoding in two steps (for beginners)
//!
//! A receive loop usually wants to look at the message id before paying for
//! a full decode: a frame may be ignored when nobody is listening, and an id
//! this crate has no codec for should be reported, not parsed.  So decoding
//! is split:
//!
//! 1. [`split_header`] reads the id and returns a cursor over the payload.
//! 2. [`decode_payload`] looks the id up in a static registry and runs the
//!    matching decoder.
//!
//! [`decode_message`] does both at once.
//!
//! # Strict mode
//!
//! With `strict = true` the declared payload length must equal the bytes
//! actually present, and the decoder must consume every payload byte.  With
//! `strict = false` the declared length is ignored and trailing bytes are
//! tolerated, which is what a client talking to unfamiliar server versions
//! usually wants.

use thiserror::Error;

use crate::protocol::cursor::{PacketWriter, ParseCursor};
use crate::protocol::messages::{
    ConnectMessage, EchoRequestMessage, EchoResponseMessage, FrameOfDataMessage, MessageId,
    ModelDefinitionsMessage, ModelType, NatNetMessage, ServerInfoMessage,
};
use crate::protocol::version::Version;

/// Size of the `[message_id][payload_len]` header.
pub const HEADER_SIZE: usize = 4;

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// A field extends past the end of the buffer.
    #[error("truncated at byte {offset}: need {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Strict decoding left bytes unconsumed.
    #[error("{remaining} trailing bytes after {id:?} payload")]
    TrailingData { id: MessageId, remaining: usize },

    /// No codec is registered for this message id.
    #[error("unknown message id {0}")]
    UnknownMessage(u16),

    /// The header's payload length disagrees with the datagram size.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    LengthMismatch { declared: usize, available: usize },

    /// A value cannot be represented on the wire.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A model description kind whose layout is not decoded.
    #[error("unsupported model description: {0:?}")]
    UnsupportedModel(ModelType),
}

// ── Registry ──────────────────────────────────────────────────────────────────

type DecodeFn = fn(&mut ParseCursor<'_>, Version) -> Result<NatNetMessage, ProtocolError>;

struct CodecEntry {
    id: MessageId,
    decode: DecodeFn,
}

static REGISTRY: &[CodecEntry] = &[
    CodecEntry {
        id: MessageId::Connect,
        decode: decode_connect,
    },
    CodecEntry {
        id: MessageId::ServerInfo,
        decode: decode_server_info,
    },
    CodecEntry {
        id: MessageId::RequestModelDef,
        decode: decode_request_model_definitions,
    },
    CodecEntry {
        id: MessageId::ModelDef,
        decode: decode_model_definitions,
    },
    CodecEntry {
        id: MessageId::FrameOfData,
        decode: decode_frame_of_data,
    },
    CodecEntry {
        id: MessageId::EchoRequest,
        decode: decode_echo_request,
    },
    CodecEntry {
        id: MessageId::EchoResponse,
        decode: decode_echo_response,
    },
    CodecEntry {
        id: MessageId::Discovery,
        decode: decode_discovery,
    },
];

fn decode_connect(c: &mut ParseCursor<'_>, v: Version) -> Result<NatNetMessage, ProtocolError> {
    ConnectMessage::decode(c, v).map(NatNetMessage::Connect)
}

fn decode_discovery(c: &mut ParseCursor<'_>, v: Version) -> Result<NatNetMessage, ProtocolError> {
    ConnectMessage::decode(c, v).map(NatNetMessage::Discovery)
}

fn decode_server_info(c: &mut ParseCursor<'_>, v: Version) -> Result<NatNetMessage, ProtocolError> {
    ServerInfoMessage::decode(c, v).map(NatNetMessage::ServerInfo)
}

fn decode_request_model_definitions(
    _c: &mut ParseCursor<'_>,
    _v: Version,
) -> Result<NatNetMessage, ProtocolError> {
    Ok(NatNetMessage::RequestModelDefinitions)
}

fn decode_model_definitions(
    c: &mut ParseCursor<'_>,
    v: Version,
) -> Result<NatNetMessage, ProtocolError> {
    ModelDefinitionsMessage::decode(c, v).map(NatNetMessage::ModelDefinitions)
}

fn decode_frame_of_data(c: &mut ParseCursor<'_>, v: Version) -> Result<NatNetMessage, ProtocolError> {
    FrameOfDataMessage::decode(c, v).map(|frame| NatNetMessage::FrameOfData(Box::new(frame)))
}

fn decode_echo_request(c: &mut ParseCursor<'_>, v: Version) -> Result<NatNetMessage, ProtocolError> {
    EchoRequestMessage::decode(c, v).map(NatNetMessage::EchoRequest)
}

fn decode_echo_response(c: &mut ParseCursor<'_>, v: Version) -> Result<NatNetMessage, ProtocolError> {
    EchoResponseMessage::decode(c, v).map(NatNetMessage::EchoResponse)
}

/// `true` if [`decode_payload`] can decode messages with this id.
pub fn is_registered(id: MessageId) -> bool {
    REGISTRY.iter().any(|entry| entry.id == id)
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Reads the packet header and returns the message id plus a cursor over the payload.
///
/// # Errors
///
/// - [`ProtocolError::Truncated`] if the packet is shorter than the header.
/// - [`ProtocolError::UnknownMessage`] if the id is not a known [`MessageId`].
/// - [`ProtocolError::LengthMismatch`] in strict mode when the declared
///   length differs from the payload actually present.
pub fn split_header(
    packet: &[u8],
    strict: bool,
) -> Result<(MessageId, ParseCursor<'_>), ProtocolError> {
    let mut cursor = ParseCursor::new(packet);
    let raw_id = cursor.read_u16()?;
    let declared = usize::from(cursor.read_u16()?);

    let id = MessageId::try_from(raw_id).map_err(|_| ProtocolError::UnknownMessage(raw_id))?;

    let payload = &packet[HEADER_SIZE..];
    if strict && declared != payload.len() {
        return Err(ProtocolError::LengthMismatch {
            declared,
            available: payload.len(),
        });
    }
    Ok((id, ParseCursor::new(payload)))
}

/// Decodes the payload of a message whose id was read by [`split_header`].
///
/// # Errors
///
/// - [`ProtocolError::UnknownMessage`] if no codec is registered for `id`.
/// - Any decoding error from the message's codec.
/// - [`ProtocolError::TrailingData`] in strict mode when bytes remain.
pub fn decode_payload(
    id: MessageId,
    cursor: &mut ParseCursor<'_>,
    version: Version,
    strict: bool,
) -> Result<NatNetMessage, ProtocolError> {
    let entry = REGISTRY
        .iter()
        .find(|entry| entry.id == id)
        .ok_or(ProtocolError::UnknownMessage(id as u16))?;

    let message = (entry.decode)(cursor, version)?;
    tracing::trace!(?id, %version, consumed = cursor.offset(), "decoded payload");

    if strict && cursor.remaining() > 0 {
        return Err(ProtocolError::TrailingData {
            id,
            remaining: cursor.remaining(),
        });
    }
    Ok(message)
}

/// Decodes a complete packet (header and payload).
///
/// # Examples
///
/// ```rust
/// use natnet_core::protocol::{decode_message, encode_message, NatNetMessage, Version};
/// use natnet_core::protocol::messages::EchoRequestMessage;
///
/// let msg = NatNetMessage::EchoRequest(EchoRequestMessage { timestamp: 42 });
/// let bytes = encode_message(&msg, Version::release(3, 0)).unwrap();
/// assert_eq!(bytes.len(), 4 + 8);
/// assert_eq!(decode_message(&bytes, Version::release(3, 0), true).unwrap(), msg);
/// ```
pub fn decode_message(
    packet: &[u8],
    version: Version,
    strict: bool,
) -> Result<NatNetMessage, ProtocolError> {
    let (id, mut cursor) = split_header(packet, strict)?;
    decode_payload(id, &mut cursor, version, strict)
}

/// Encodes a message, including its 4-byte header, for protocol `version`.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if the message holds values the
/// version cannot express or the payload exceeds 65535 bytes.
pub fn encode_message(msg: &NatNetMessage, version: Version) -> Result<Vec<u8>, ProtocolError> {
    let mut writer = PacketWriter::with_capacity(256);
    // Header placeholder; the payload length is patched in afterwards.
    writer.write_u16(msg.message_id() as u16);
    writer.write_u16(0);

    encode_payload(msg, &mut writer, version)?;

    let mut bytes = writer.into_bytes();
    let payload_len = bytes.len() - HEADER_SIZE;
    let declared = u16::try_from(payload_len).map_err(|_| {
        ProtocolError::Malformed(format!("payload of {payload_len} bytes exceeds 65535"))
    })?;
    bytes[2..HEADER_SIZE].copy_from_slice(&declared.to_le_bytes());
    Ok(bytes)
}

fn encode_payload(
    msg: &NatNetMessage,
    writer: &mut PacketWriter,
    version: Version,
) -> Result<(), ProtocolError> {
    match msg {
        NatNetMessage::Connect(m) | NatNetMessage::Discovery(m) => m.encode(writer, version),
        NatNetMessage::ServerInfo(m) => m.encode(writer, version),
        NatNetMessage::EchoRequest(m) => m.encode(writer, version),
        NatNetMessage::EchoResponse(m) => m.encode(writer, version),
        NatNetMessage::RequestModelDefinitions => Ok(()),
        NatNetMessage::ModelDefinitions(m) => m.encode(writer, version),
        NatNetMessage::FrameOfData(m) => m.encode(writer, version),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
