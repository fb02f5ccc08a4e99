//! Protocol module: wire cursor, versions, message types and the codec registry.

pub mod codec;
pub mod cursor;
pub mod messages;
pub mod version;

pub use codec::{
    decode_message, decode_payload, encode_message, split_header, ProtocolError, HEADER_SIZE,
};
pub use cursor::{PacketWriter, ParseCursor};
pub use messages::{MessageId, NatNetMessage};
pub use version::Version;
