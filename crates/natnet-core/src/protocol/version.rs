//! NatNet protocol versions and the optional fields each version carries.
//!
//! Most record types in the protocol grew fields over time.  Whether a field
//! is on the wire is a pure function of the negotiated [`Version`]; the
//! predicates in [`fields`] are the single definition of those rules, and
//! both the encoders and the decoders call them.
//!
//! # The development-build sentinel
//!
//! Servers built from development branches may report major version `0`.
//! Such servers use the newest wire layout, so [`Version::at_least`] and
//! [`Version::newer_than`] treat major `0` as newer than every real release.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::codec::ProtocolError;
use crate::protocol::cursor::{PacketWriter, ParseCursor};

/// A `major.minor.build.revision` version, ordered lexicographically.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub build: u8,
    pub revision: u8,
}

impl Version {
    pub const fn new(major: u8, minor: u8, build: u8, revision: u8) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Shorthand for `major.minor.0.0`.
    pub const fn release(major: u8, minor: u8) -> Self {
        Self::new(major, minor, 0, 0)
    }

    /// `true` for the major-`0` development-build sentinel.
    pub const fn is_development_build(self) -> bool {
        self.major == 0
    }

    /// `self >= min`, with development builds satisfying every minimum.
    pub fn at_least(self, min: Version) -> bool {
        self.is_development_build() || self >= min
    }

    /// `self > other`, with development builds newer than everything.
    pub fn newer_than(self, other: Version) -> bool {
        self.is_development_build() || self > other
    }

    pub fn read(cursor: &mut ParseCursor<'_>) -> Result<Self, ProtocolError> {
        let [major, minor, build, revision] = cursor.read_fixed()?;
        Ok(Self::new(major, minor, build, revision))
    }

    pub fn write(self, writer: &mut PacketWriter) {
        writer.write_bytes(&[self.major, self.minor, self.build, self.revision]);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// Field presence rules, one predicate per optional field.
pub mod fields {
    use super::Version;

    const V2_0: Version = Version::release(2, 0);
    const V2_3: Version = Version::release(2, 3);
    const V2_6: Version = Version::release(2, 6);
    const V2_7: Version = Version::release(2, 7);
    const V2_9: Version = Version::release(2, 9);
    const V2_11: Version = Version::release(2, 11);
    const V3_0: Version = Version::release(3, 0);

    /// ServerInfo clock frequency and ConnectionInfo.
    pub fn server_clock_and_connection(v: Version) -> bool {
        v.at_least(V3_0)
    }

    /// Marker block embedded in each frame rigid body (positions, then padding).
    pub fn rigid_body_inline_markers(v: Version) -> bool {
        !v.at_least(V3_0)
    }

    /// Marker ids and sizes inside the inline marker block.
    pub fn rigid_body_marker_ids_and_sizes(v: Version) -> bool {
        v.at_least(V2_0)
    }

    pub fn rigid_body_mean_error(v: Version) -> bool {
        v.at_least(V2_0)
    }

    pub fn rigid_body_params(v: Version) -> bool {
        v.at_least(V2_6)
    }

    pub fn skeletons(v: Version) -> bool {
        v.newer_than(V2_0)
    }

    pub fn labelled_markers(v: Version) -> bool {
        v.at_least(V2_3)
    }

    pub fn labelled_marker_params(v: Version) -> bool {
        v.at_least(V2_6)
    }

    pub fn labelled_marker_residual(v: Version) -> bool {
        v.at_least(V3_0)
    }

    pub fn force_plates(v: Version) -> bool {
        v.at_least(V2_9)
    }

    pub fn devices(v: Version) -> bool {
        v.at_least(V2_11)
    }

    /// Software timestamp is `f64` from 2.7, `f32` before.
    pub fn double_precision_timestamp(v: Version) -> bool {
        v.at_least(V2_7)
    }

    /// Camera mid-exposure, data-received and transmit tick counts.
    pub fn hardware_timestamps(v: Version) -> bool {
        v.at_least(V3_0)
    }

    pub fn rigid_body_description_name(v: Version) -> bool {
        v.at_least(V2_0)
    }

    /// Marker offsets and labels in a rigid body description.
    pub fn rigid_body_description_markers(v: Version) -> bool {
        v.at_least(V3_0)
    }
}
