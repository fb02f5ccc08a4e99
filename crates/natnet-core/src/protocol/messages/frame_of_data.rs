//! FrameOfData: one frame of motion-capture data.
//!
//! This is the message a client receives hundreds of times per second, and
//! the one whose layout depends most on the protocol version.  Sections
//! appear on the wire in this order:
//!
//! ```text
//! frame_number
//! marker sets         name + positions
//! unlabelled markers  positions
//! rigid bodies        id, position, orientation, [inline markers < 3.0],
//!                     [mean error >= 2.0], [params >= 2.6]
//! skeletons           > 2.0
//! labelled markers    >= 2.3, with [params >= 2.6] and [residual >= 3.0]
//! force plates        >= 2.9
//! devices             >= 2.11
//! timing info         timestamp is f64 from 2.7, hardware ticks from 3.0
//! frame params
//! trailing u32        undocumented, kept verbatim
//! ```
//!
//! Positions are metres in the server's coordinate frame and orientations
//! are `(x, y, z, w)` quaternions.
//!
//! # Params bitfields
//!
//! Rigid bodies, labelled markers and the frame itself carry small flag
//! words.  They are stored raw ([`RigidBodyParams`], [`MarkerParams`],
//! [`FrameParams`]) and exposed through accessor methods, so the decoded
//! booleans can never drift from the bits that were received.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::protocol::codec::ProtocolError;
use crate::protocol::cursor::{PacketWriter, ParseCursor};
use crate::protocol::version::{fields, Version};

// ── Flag words ────────────────────────────────────────────────────────────────

/// Rigid body params bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RigidBodyParams(pub u16);

impl RigidBodyParams {
    pub const TRACKING_VALID: u16 = 1 << 0;

    pub fn tracking_valid(&self) -> bool {
        self.0 & Self::TRACKING_VALID != 0
    }
}

/// Labelled marker params bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MarkerParams(pub u16);

impl MarkerParams {
    pub const OCCLUDED: u16 = 1 << 0;
    /// Position computed directly from camera rays.
    pub const POINT_CLOUD_SOLVED: u16 = 1 << 1;
    /// Position computed from the owning model's solve.
    pub const MODEL_SOLVED: u16 = 1 << 2;
    pub const HAS_MODEL: u16 = 1 << 3;
    pub const UNLABELLED: u16 = 1 << 4;
    pub const ACTIVE: u16 = 1 << 5;

    pub fn occluded(&self) -> bool {
        self.0 & Self::OCCLUDED != 0
    }

    pub fn point_cloud_solved(&self) -> bool {
        self.0 & Self::POINT_CLOUD_SOLVED != 0
    }

    pub fn model_solved(&self) -> bool {
        self.0 & Self::MODEL_SOLVED != 0
    }

    pub fn has_model(&self) -> bool {
        self.0 & Self::HAS_MODEL != 0
    }

    pub fn unlabelled(&self) -> bool {
        self.0 & Self::UNLABELLED != 0
    }

    pub fn active(&self) -> bool {
        self.0 & Self::ACTIVE != 0
    }
}

/// Frame-level params bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameParams(pub u16);

impl FrameParams {
    pub const IS_RECORDING: u16 = 1 << 0;
    pub const TRACKED_MODELS_CHANGED: u16 = 1 << 1;

    pub fn is_recording(&self) -> bool {
        self.0 & Self::IS_RECORDING != 0
    }

    pub fn tracked_models_changed(&self) -> bool {
        self.0 & Self::TRACKED_MODELS_CHANGED != 0
    }
}

// ── Records ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerSet {
    pub name: String,
    pub markers: Vec<Vec3>,
}

/// Per-body marker block sent by servers older than protocol 3.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigidBodyMarkers {
    pub positions: Vec<Vec3>,
    /// Protocol 2.0+, one per position.
    pub ids: Option<Vec<u32>>,
    /// Protocol 2.0+, one per position.
    pub sizes: Option<Vec<f32>>,
    pub padding: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigidBody {
    pub id: u32,
    pub position: Vec3,
    pub orientation: Quat,
    /// Protocol < 3.0 only.
    pub markers: Option<RigidBodyMarkers>,
    /// Mean marker error in metres, protocol 2.0+.
    pub mean_error: Option<f32>,
    /// Protocol 2.6+.
    pub params: Option<RigidBodyParams>,
}

impl RigidBody {
    /// `None` when the protocol version carries no params for rigid bodies.
    pub fn tracking_valid(&self) -> Option<bool> {
        self.params.map(|p| p.tracking_valid())
    }
}

/// A skeleton is a list of rigid bodies (its bones).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skeleton {
    pub id: u32,
    pub rigid_bodies: Vec<RigidBody>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelledMarker {
    /// Owning rigid body, or `0` for markers outside any model.
    pub model_id: u16,
    pub marker_id: u16,
    pub position: Vec3,
    /// Estimated diameter in metres.
    pub size: f32,
    /// Protocol 2.6+.
    pub params: Option<MarkerParams>,
    /// Ray residual, protocol 3.0+.
    pub residual: Option<f32>,
}

impl LabelledMarker {
    pub fn occluded(&self) -> Option<bool> {
        self.params.map(|p| p.occluded())
    }

    pub fn point_cloud_solved(&self) -> Option<bool> {
        self.params.map(|p| p.point_cloud_solved())
    }

    pub fn model_solved(&self) -> Option<bool> {
        self.params.map(|p| p.model_solved())
    }

    pub fn has_model(&self) -> Option<bool> {
        self.params.map(|p| p.has_model())
    }

    pub fn unlabelled(&self) -> Option<bool> {
        self.params.map(|p| p.unlabelled())
    }

    pub fn active(&self) -> Option<bool> {
        self.params.map(|p| p.active())
    }
}

/// Force plate or peripheral device samples, one array per channel.
///
/// Samples are kept as raw 32-bit words; their interpretation depends on the
/// device description, which this crate does not decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceData {
    pub id: u32,
    pub channels: Vec<Vec<u32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingInfo {
    pub timecode: u32,
    pub timecode_subframe: u32,
    /// Seconds since server software start (sent as `f32` before 2.7).
    pub timestamp: f64,
    /// Server clock ticks, protocol 3.0+.
    pub camera_mid_exposure_timestamp: Option<u64>,
    pub camera_data_received_timestamp: Option<u64>,
    pub transmit_timestamp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameOfDataMessage {
    pub frame_number: u32,
    pub marker_sets: Vec<MarkerSet>,
    pub unlabelled_markers: Vec<Vec3>,
    pub rigid_bodies: Vec<RigidBody>,
    /// Empty unless protocol > 2.0.
    pub skeletons: Vec<Skeleton>,
    /// Empty unless protocol 2.3+.
    pub labelled_markers: Vec<LabelledMarker>,
    /// Empty unless protocol 2.9+.
    pub force_plates: Vec<DeviceData>,
    /// Empty unless protocol 2.11+.
    pub devices: Vec<DeviceData>,
    pub timing_info: TimingInfo,
    pub params: FrameParams,
    /// Final 32-bit word of the payload; meaning unknown.
    pub trailer: u32,
}

impl FrameOfDataMessage {
    pub fn is_recording(&self) -> bool {
        self.params.is_recording()
    }

    pub fn tracked_models_changed(&self) -> bool {
        self.params.tracked_models_changed()
    }

    pub fn decode(cursor: &mut ParseCursor<'_>, version: Version) -> Result<Self, ProtocolError> {
        let frame_number = cursor.read_u32()?;
        let marker_sets = cursor.read_list(5, MarkerSet::decode)?;
        let unlabelled_markers = cursor.read_list(12, |c| c.read_vec3())?;
        let rigid_bodies = cursor.read_list(32, |c| RigidBody::decode(c, version))?;

        let skeletons = if fields::skeletons(version) {
            cursor.read_list(8, |c| Skeleton::decode(c, version))?
        } else {
            Vec::new()
        };
        let labelled_markers = if fields::labelled_markers(version) {
            cursor.read_list(20, |c| LabelledMarker::decode(c, version))?
        } else {
            Vec::new()
        };
        let force_plates = if fields::force_plates(version) {
            cursor.read_list(8, DeviceData::decode)?
        } else {
            Vec::new()
        };
        let devices = if fields::devices(version) {
            cursor.read_list(8, DeviceData::decode)?
        } else {
            Vec::new()
        };

        let timing_info = TimingInfo::decode(cursor, version)?;
        let params = FrameParams(cursor.read_u16()?);
        let trailer = cursor.read_u32()?;

        Ok(Self {
            frame_number,
            marker_sets,
            unlabelled_markers,
            rigid_bodies,
            skeletons,
            labelled_markers,
            force_plates,
            devices,
            timing_info,
            params,
            trailer,
        })
    }

    pub fn encode(&self, writer: &mut PacketWriter, version: Version) -> Result<(), ProtocolError> {
        writer.write_u32(self.frame_number);

        writer.write_count(self.marker_sets.len())?;
        for set in &self.marker_sets {
            set.encode(writer)?;
        }
        writer.write_count(self.unlabelled_markers.len())?;
        for &marker in &self.unlabelled_markers {
            writer.write_vec3(marker);
        }
        writer.write_count(self.rigid_bodies.len())?;
        for body in &self.rigid_bodies {
            body.encode(writer, version)?;
        }

        if gated_list(fields::skeletons(version), &self.skeletons, "skeletons", writer)? {
            for skeleton in &self.skeletons {
                skeleton.encode(writer, version)?;
            }
        }
        if gated_list(
            fields::labelled_markers(version),
            &self.labelled_markers,
            "labelled markers",
            writer,
        )? {
            for marker in &self.labelled_markers {
                marker.encode(writer, version)?;
            }
        }
        if gated_list(
            fields::force_plates(version),
            &self.force_plates,
            "force plates",
            writer,
        )? {
            for plate in &self.force_plates {
                plate.encode(writer)?;
            }
        }
        if gated_list(fields::devices(version), &self.devices, "devices", writer)? {
            for device in &self.devices {
                device.encode(writer)?;
            }
        }

        self.timing_info.encode(writer, version)?;
        writer.write_u16(self.params.0);
        writer.write_u32(self.trailer);
        Ok(())
    }
}

/// Writes the count prefix of a version-gated list and reports whether the
/// items should follow.  A non-empty list the version cannot carry is an error.
fn gated_list<T>(
    present: bool,
    items: &[T],
    what: &str,
    writer: &mut PacketWriter,
) -> Result<bool, ProtocolError> {
    if present {
        writer.write_count(items.len())?;
        Ok(true)
    } else if items.is_empty() {
        Ok(false)
    } else {
        Err(ProtocolError::Malformed(format!(
            "{what} are not part of this protocol version"
        )))
    }
}

/// Checks that an optional field is set exactly when the version carries it.
fn gated_field<T: Copy>(present: bool, value: Option<T>, what: &str) -> Result<Option<T>, ProtocolError> {
    match (present, value) {
        (true, Some(v)) => Ok(Some(v)),
        (false, None) => Ok(None),
        (true, None) => Err(ProtocolError::Malformed(format!("{what} is required"))),
        (false, Some(_)) => Err(ProtocolError::Malformed(format!(
            "{what} is not part of this protocol version"
        ))),
    }
}

impl MarkerSet {
    fn decode(cursor: &mut ParseCursor<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            name: cursor.read_cstr(None)?,
            markers: cursor.read_list(12, |c| c.read_vec3())?,
        })
    }

    fn encode(&self, writer: &mut PacketWriter) -> Result<(), ProtocolError> {
        writer.write_cstr(&self.name)?;
        writer.write_count(self.markers.len())?;
        for &marker in &self.markers {
            writer.write_vec3(marker);
        }
        Ok(())
    }
}

impl RigidBodyMarkers {
    fn decode(cursor: &mut ParseCursor<'_>, version: Version) -> Result<Self, ProtocolError> {
        let positions = cursor.read_list(12, |c| c.read_vec3())?;
        let (ids, sizes) = if fields::rigid_body_marker_ids_and_sizes(version) {
            let ids = (0..positions.len())
                .map(|_| cursor.read_u32())
                .collect::<Result<Vec<_>, _>>()?;
            let sizes = (0..positions.len())
                .map(|_| cursor.read_f32())
                .collect::<Result<Vec<_>, _>>()?;
            (Some(ids), Some(sizes))
        } else {
            (None, None)
        };
        Ok(Self {
            positions,
            ids,
            sizes,
            padding: cursor.read_u32()?,
        })
    }

    fn encode(&self, writer: &mut PacketWriter, version: Version) -> Result<(), ProtocolError> {
        let count = self.positions.len();
        writer.write_count(count)?;
        for &position in &self.positions {
            writer.write_vec3(position);
        }
        let with_ids = fields::rigid_body_marker_ids_and_sizes(version);
        match (with_ids, &self.ids, &self.sizes) {
            (true, Some(ids), Some(sizes)) if ids.len() == count && sizes.len() == count => {
                for &id in ids {
                    writer.write_u32(id);
                }
                for &size in sizes {
                    writer.write_f32(size);
                }
            }
            (false, None, None) => {}
            _ => {
                return Err(ProtocolError::Malformed(
                    "rigid body marker ids/sizes do not match positions or protocol version"
                        .into(),
                ))
            }
        }
        writer.write_u32(self.padding);
        Ok(())
    }
}

impl RigidBody {
    fn decode(cursor: &mut ParseCursor<'_>, version: Version) -> Result<Self, ProtocolError> {
        let id = cursor.read_u32()?;
        let position = cursor.read_vec3()?;
        let orientation = cursor.read_quat()?;
        let markers = if fields::rigid_body_inline_markers(version) {
            Some(RigidBodyMarkers::decode(cursor, version)?)
        } else {
            None
        };
        let mean_error = if fields::rigid_body_mean_error(version) {
            Some(cursor.read_f32()?)
        } else {
            None
        };
        let params = if fields::rigid_body_params(version) {
            Some(RigidBodyParams(cursor.read_u16()?))
        } else {
            None
        };
        Ok(Self {
            id,
            position,
            orientation,
            markers,
            mean_error,
            params,
        })
    }

    fn encode(&self, writer: &mut PacketWriter, version: Version) -> Result<(), ProtocolError> {
        writer.write_u32(self.id);
        writer.write_vec3(self.position);
        writer.write_quat(self.orientation);

        match (fields::rigid_body_inline_markers(version), &self.markers) {
            (true, Some(markers)) => markers.encode(writer, version)?,
            (false, None) => {}
            (true, None) => {
                return Err(ProtocolError::Malformed(format!(
                    "rigid body {} needs an inline marker block",
                    self.id
                )))
            }
            (false, Some(_)) => {
                return Err(ProtocolError::Malformed(format!(
                    "rigid body {} inline markers are not part of this protocol version",
                    self.id
                )))
            }
        }
        if let Some(mean_error) =
            gated_field(fields::rigid_body_mean_error(version), self.mean_error, "mean error")?
        {
            writer.write_f32(mean_error);
        }
        if let Some(params) =
            gated_field(fields::rigid_body_params(version), self.params, "rigid body params")?
        {
            writer.write_u16(params.0);
        }
        Ok(())
    }
}

impl Skeleton {
    fn decode(cursor: &mut ParseCursor<'_>, version: Version) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: cursor.read_u32()?,
            rigid_bodies: cursor.read_list(32, |c| RigidBody::decode(c, version))?,
        })
    }

    fn encode(&self, writer: &mut PacketWriter, version: Version) -> Result<(), ProtocolError> {
        writer.write_u32(self.id);
        writer.write_count(self.rigid_bodies.len())?;
        for body in &self.rigid_bodies {
            body.encode(writer, version)?;
        }
        Ok(())
    }
}

impl LabelledMarker {
    fn decode(cursor: &mut ParseCursor<'_>, version: Version) -> Result<Self, ProtocolError> {
        // Marker id precedes model id on the wire.
        let marker_id = cursor.read_u16()?;
        let model_id = cursor.read_u16()?;
        let position = cursor.read_vec3()?;
        let size = cursor.read_f32()?;
        let params = if fields::labelled_marker_params(version) {
            Some(MarkerParams(cursor.read_u16()?))
        } else {
            None
        };
        let residual = if fields::labelled_marker_residual(version) {
            Some(cursor.read_f32()?)
        } else {
            None
        };
        Ok(Self {
            model_id,
            marker_id,
            position,
            size,
            params,
            residual,
        })
    }

    fn encode(&self, writer: &mut PacketWriter, version: Version) -> Result<(), ProtocolError> {
        writer.write_u16(self.marker_id);
        writer.write_u16(self.model_id);
        writer.write_vec3(self.position);
        writer.write_f32(self.size);
        if let Some(params) = gated_field(
            fields::labelled_marker_params(version),
            self.params,
            "marker params",
        )? {
            writer.write_u16(params.0);
        }
        if let Some(residual) = gated_field(
            fields::labelled_marker_residual(version),
            self.residual,
            "marker residual",
        )? {
            writer.write_f32(residual);
        }
        Ok(())
    }
}

impl DeviceData {
    fn decode(cursor: &mut ParseCursor<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: cursor.read_u32()?,
            channels: cursor.read_list(4, |c| c.read_list(4, |c| c.read_u32()))?,
        })
    }

    fn encode(&self, writer: &mut PacketWriter) -> Result<(), ProtocolError> {
        writer.write_u32(self.id);
        writer.write_count(self.channels.len())?;
        for channel in &self.channels {
            writer.write_count(channel.len())?;
            for &sample in channel {
                writer.write_u32(sample);
            }
        }
        Ok(())
    }
}

impl TimingInfo {
    fn decode(cursor: &mut ParseCursor<'_>, version: Version) -> Result<Self, ProtocolError> {
        let timecode = cursor.read_u32()?;
        let timecode_subframe = cursor.read_u32()?;
        let timestamp = if fields::double_precision_timestamp(version) {
            cursor.read_f64()?
        } else {
            f64::from(cursor.read_f32()?)
        };
        let (exposure, received, transmit) = if fields::hardware_timestamps(version) {
            (
                Some(cursor.read_u64()?),
                Some(cursor.read_u64()?),
                Some(cursor.read_u64()?),
            )
        } else {
            (None, None, None)
        };
        Ok(Self {
            timecode,
            timecode_subframe,
            timestamp,
            camera_mid_exposure_timestamp: exposure,
            camera_data_received_timestamp: received,
            transmit_timestamp: transmit,
        })
    }

    fn encode(&self, writer: &mut PacketWriter, version: Version) -> Result<(), ProtocolError> {
        writer.write_u32(self.timecode);
        writer.write_u32(self.timecode_subframe);
        if fields::double_precision_timestamp(version) {
            writer.write_f64(self.timestamp);
        } else {
            writer.write_f32(self.timestamp as f32);
        }
        let hardware = fields::hardware_timestamps(version);
        for (value, what) in [
            (self.camera_mid_exposure_timestamp, "camera mid-exposure timestamp"),
            (self.camera_data_received_timestamp, "camera data received timestamp"),
            (self.transmit_timestamp, "transmit timestamp"),
        ] {
            if let Some(ticks) = gated_field(hardware, value, what)? {
                writer.write_u64(ticks);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(id: u32, version: Version) -> RigidBody {
        let markers = fields::rigid_body_inline_markers(version).then(|| RigidBodyMarkers {
            positions: vec![Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.5, 1.0, 0.0)],
            ids: fields::rigid_body_marker_ids_and_sizes(version).then(|| vec![1, 2]),
            sizes: fields::rigid_body_marker_ids_and_sizes(version).then(|| vec![0.014, 0.014]),
            padding: 0,
        });
        RigidBody {
            id,
            position: Vec3::new(0.25, 1.5, -0.75),
            orientation: Quat::from_xyzw(0.0, 0.0, 0.0, 1.0),
            markers,
            mean_error: fields::rigid_body_mean_error(version).then_some(0.0005),
            params: fields::rigid_body_params(version).then_some(RigidBodyParams(1)),
        }
    }

    fn frame(version: Version) -> FrameOfDataMessage {
        let hardware = fields::hardware_timestamps(version);
        FrameOfDataMessage {
            frame_number: 42,
            marker_sets: vec![MarkerSet {
                name: "all".into(),
                markers: vec![Vec3::new(0.0, 1.0, 0.0)],
            }],
            unlabelled_markers: vec![Vec3::new(2.0, 0.0, 1.0)],
            rigid_bodies: vec![body(3, version)],
            skeletons: if fields::skeletons(version) {
                vec![Skeleton {
                    id: 1,
                    rigid_bodies: vec![body(65537, version)],
                }]
            } else {
                Vec::new()
            },
            labelled_markers: if fields::labelled_markers(version) {
                vec![LabelledMarker {
                    model_id: 3,
                    marker_id: 1,
                    position: Vec3::new(0.0, 1.0, 0.0),
                    size: 0.014,
                    params: fields::labelled_marker_params(version).then_some(MarkerParams(10)),
                    residual: fields::labelled_marker_residual(version).then_some(0.0002),
                }]
            } else {
                Vec::new()
            },
            force_plates: if fields::force_plates(version) {
                vec![DeviceData {
                    id: 9,
                    channels: vec![vec![1, 2, 3], vec![]],
                }]
            } else {
                Vec::new()
            },
            devices: Vec::new(),
            timing_info: TimingInfo {
                timecode: 0,
                timecode_subframe: 0,
                timestamp: 12.5,
                camera_mid_exposure_timestamp: hardware.then_some(1000),
                camera_data_received_timestamp: hardware.then_some(1100),
                transmit_timestamp: hardware.then_some(1200),
            },
            params: FrameParams(FrameParams::TRACKED_MODELS_CHANGED),
            trailer: 0,
        }
    }

    fn encode(msg: &FrameOfDataMessage, version: Version) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        msg.encode(&mut writer, version).unwrap();
        writer.into_bytes()
    }

    #[test]
    fn test_frame_layout_survives_each_version_boundary() {
        // One representative version on each side of every gate.
        let versions = [
            Version::release(1, 5),
            Version::release(2, 0),
            Version::release(2, 3),
            Version::release(2, 6),
            Version::release(2, 7),
            Version::release(2, 9),
            Version::release(2, 11),
            Version::release(3, 0),
            Version::new(0, 0, 0, 0),
        ];
        for version in versions {
            let original = frame(version);
            let bytes = encode(&original, version);
            let mut cursor = ParseCursor::new(&bytes);

            let decoded = FrameOfDataMessage::decode(&mut cursor, version).unwrap();

            assert_eq!(decoded, original, "protocol {version}");
            assert_eq!(cursor.remaining(), 0, "protocol {version}");
        }
    }

    #[test]
    fn test_timestamp_widens_to_double_at_2_7() {
        let v2_6 = Version::release(2, 6);
        let v2_7 = Version::release(2, 7);

        let narrow = encode(&frame(v2_6), v2_6);
        let wide = encode(&frame(v2_7), v2_7);

        assert_eq!(wide.len(), narrow.len() + 4);
        let decoded = FrameOfDataMessage::decode(&mut ParseCursor::new(&narrow), v2_6).unwrap();
        assert_eq!(decoded.timing_info.timestamp, 12.5);
    }

    #[test]
    fn test_params_accessors_mask_raw_bits() {
        let marker = LabelledMarker {
            model_id: 0,
            marker_id: 50007,
            position: Vec3::ZERO,
            size: 0.02,
            params: Some(MarkerParams(0b01_0010)),
            residual: None,
        };

        assert_eq!(marker.occluded(), Some(false));
        assert_eq!(marker.point_cloud_solved(), Some(true));
        assert_eq!(marker.model_solved(), Some(false));
        assert_eq!(marker.unlabelled(), Some(true));
        assert_eq!(marker.active(), Some(false));
    }

    #[test]
    fn test_params_accessors_are_none_without_params() {
        let v = Version::release(2, 5);
        let body = body(1, v);

        assert_eq!(body.tracking_valid(), None);
    }

    #[test]
    fn test_frame_params_flags() {
        let params = FrameParams(FrameParams::IS_RECORDING | FrameParams::TRACKED_MODELS_CHANGED);

        assert!(params.is_recording());
        assert!(params.tracked_models_changed());
        assert!(!FrameParams(0).tracked_models_changed());
    }

    #[test]
    fn test_encode_rejects_list_the_version_cannot_carry() {
        // Protocol 2.0 has no skeleton section.
        let v = Version::release(2, 0);
        let mut msg = frame(v);
        msg.skeletons.push(Skeleton {
            id: 1,
            rigid_bodies: Vec::new(),
        });

        let result = msg.encode(&mut PacketWriter::new(), v);

        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_encode_rejects_missing_required_field() {
        let v = Version::release(3, 0);
        let mut msg = frame(v);
        msg.rigid_bodies[0].mean_error = None;

        let result = msg.encode(&mut PacketWriter::new(), v);

        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }
}
