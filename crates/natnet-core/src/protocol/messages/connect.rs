//! Connect and Discovery requests.
//!
//! Both carry the same payload: a 256-byte NUL-padded application name and
//! two version fields.  The meaning of the second version is undocumented, so
//! both are kept as opaque values and written back unchanged.

use serde::{Deserialize, Serialize};

use crate::protocol::codec::ProtocolError;
use crate::protocol::cursor::{PacketWriter, ParseCursor};
use crate::protocol::version::Version;

/// Width of the application name field.
pub const APP_NAME_WIDTH: usize = 256;

/// Name the client announces itself with.
pub const CLIENT_APP_NAME: &str = "NatNetLib";

/// Protocol version the client announces and uses for handshake decoding.
pub const CLIENT_VERSION: Version = Version::release(3, 0);

/// Payload shared by [`ConnectMessage`] and [`DiscoveryMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectMessage {
    pub payload: String,
    pub version1: Version,
    pub version2: Version,
}

/// Broadcast form of [`ConnectMessage`], used to locate a server.
pub type DiscoveryMessage = ConnectMessage;

impl Default for ConnectMessage {
    fn default() -> Self {
        Self {
            payload: CLIENT_APP_NAME.to_string(),
            version1: CLIENT_VERSION,
            version2: CLIENT_VERSION,
        }
    }
}

impl ConnectMessage {
    pub fn decode(cursor: &mut ParseCursor<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(Self {
            payload: cursor.read_cstr(Some(APP_NAME_WIDTH))?,
            version1: Version::read(cursor)?,
            version2: Version::read(cursor)?,
        })
    }

    pub fn encode(&self, writer: &mut PacketWriter, _version: Version) -> Result<(), ProtocolError> {
        writer.write_fixed_str(&self.payload, APP_NAME_WIDTH)?;
        self.version1.write(writer);
        self.version2.write(writer);
        Ok(())
    }
}
