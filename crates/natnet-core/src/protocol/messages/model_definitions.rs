//! ModelDefinitions: the server's description of everything it can stream.
//!
//! The client requests this once after connecting and again whenever a frame
//! reports that the tracked models changed.  Its main use is mapping rigid
//! body streaming ids to the names users gave them.
//!
//! Force plate and device descriptions have their own type tags, but their
//! layouts are not decoded; encountering one fails the whole message with
//! [`ProtocolError::UnsupportedModel`].

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::protocol::codec::ProtocolError;
use crate::protocol::cursor::{PacketWriter, ParseCursor};
use crate::protocol::version::{fields, Version};

/// Discriminant preceding each description on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum ModelType {
    MarkerSet = 0,
    RigidBody = 1,
    Skeleton = 2,
    ForcePlate = 3,
    Device = 4,
}

impl TryFrom<u32> for ModelType {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, ()> {
        match value {
            0 => Ok(ModelType::MarkerSet),
            1 => Ok(ModelType::RigidBody),
            2 => Ok(ModelType::Skeleton),
            3 => Ok(ModelType::ForcePlate),
            4 => Ok(ModelType::Device),
            _ => Err(()),
        }
    }
}

// ── Descriptions ──────────────────────────────────────────────────────────────

/// A named group of markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerSetDescription {
    pub name: String,
    pub marker_names: Vec<String>,
}

/// One marker of a rigid body, relative to the body's origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerOffset {
    pub position: Vec3,
    pub required_active_label: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigidBodyDescription {
    /// Protocol 2+.
    pub name: Option<String>,
    pub id: u32,
    /// `-1` for a root body.
    pub parent_id: i32,
    pub offset_from_parent: Vec3,
    /// Protocol 3+, and never for bodies nested in a skeleton.
    pub markers: Vec<MarkerOffset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletonDescription {
    pub name: String,
    pub id: i32,
    pub rigid_bodies: Vec<RigidBodyDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelDescription {
    MarkerSet(MarkerSetDescription),
    RigidBody(RigidBodyDescription),
    Skeleton(SkeletonDescription),
}

impl ModelDescription {
    pub fn model_type(&self) -> ModelType {
        match self {
            ModelDescription::MarkerSet(_) => ModelType::MarkerSet,
            ModelDescription::RigidBody(_) => ModelType::RigidBody,
            ModelDescription::Skeleton(_) => ModelType::Skeleton,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelDefinitionsMessage {
    pub models: Vec<ModelDescription>,
}

impl ModelDefinitionsMessage {
    pub fn decode(cursor: &mut ParseCursor<'_>, version: Version) -> Result<Self, ProtocolError> {
        let models = cursor.read_list(4, |cursor| {
            let raw = cursor.read_u32()?;
            let model_type = ModelType::try_from(raw)
                .map_err(|_| ProtocolError::Malformed(format!("unknown model type {raw}")))?;
            match model_type {
                ModelType::MarkerSet => {
                    MarkerSetDescription::decode(cursor).map(ModelDescription::MarkerSet)
                }
                ModelType::RigidBody => {
                    let skip_markers = !fields::rigid_body_description_markers(version);
                    RigidBodyDescription::decode(cursor, version, skip_markers)
                        .map(ModelDescription::RigidBody)
                }
                ModelType::Skeleton => {
                    SkeletonDescription::decode(cursor, version).map(ModelDescription::Skeleton)
                }
                ModelType::ForcePlate | ModelType::Device => {
                    Err(ProtocolError::UnsupportedModel(model_type))
                }
            }
        })?;
        Ok(Self { models })
    }

    pub fn encode(&self, writer: &mut PacketWriter, version: Version) -> Result<(), ProtocolError> {
        writer.write_count(self.models.len())?;
        for model in &self.models {
            writer.write_u32(model.model_type() as u32);
            match model {
                ModelDescription::MarkerSet(set) => set.encode(writer)?,
                ModelDescription::RigidBody(body) => {
                    let skip_markers = !fields::rigid_body_description_markers(version);
                    body.encode(writer, version, skip_markers)?
                }
                ModelDescription::Skeleton(skeleton) => skeleton.encode(writer, version)?,
            }
        }
        Ok(())
    }

    pub fn rigid_bodies(&self) -> impl Iterator<Item = &RigidBodyDescription> {
        self.models.iter().filter_map(|m| match m {
            ModelDescription::RigidBody(body) => Some(body),
            _ => None,
        })
    }

    pub fn skeletons(&self) -> impl Iterator<Item = &SkeletonDescription> {
        self.models.iter().filter_map(|m| match m {
            ModelDescription::Skeleton(skeleton) => Some(skeleton),
            _ => None,
        })
    }

    pub fn marker_sets(&self) -> impl Iterator<Item = &MarkerSetDescription> {
        self.models.iter().filter_map(|m| match m {
            ModelDescription::MarkerSet(set) => Some(set),
            _ => None,
        })
    }
}

impl MarkerSetDescription {
    fn decode(cursor: &mut ParseCursor<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            name: cursor.read_cstr(None)?,
            marker_names: cursor.read_list(1, |c| c.read_cstr(None))?,
        })
    }

    fn encode(&self, writer: &mut PacketWriter) -> Result<(), ProtocolError> {
        writer.write_cstr(&self.name)?;
        writer.write_count(self.marker_names.len())?;
        for name in &self.marker_names {
            writer.write_cstr(name)?;
        }
        Ok(())
    }
}

impl RigidBodyDescription {
    fn decode(
        cursor: &mut ParseCursor<'_>,
        version: Version,
        skip_markers: bool,
    ) -> Result<Self, ProtocolError> {
        let name = if fields::rigid_body_description_name(version) {
            Some(cursor.read_cstr(None)?)
        } else {
            None
        };
        let id = cursor.read_u32()?;
        let parent_id = cursor.read_i32()?;
        let offset_from_parent = cursor.read_vec3()?;

        let mut markers = Vec::new();
        if !skip_markers {
            // Positions for every marker come first, then every label.
            let positions = cursor.read_list(12, |c| c.read_vec3())?;
            for position in positions {
                markers.push(MarkerOffset {
                    position,
                    required_active_label: 0,
                });
            }
            for marker in &mut markers {
                marker.required_active_label = cursor.read_u32()?;
            }
        }

        Ok(Self {
            name,
            id,
            parent_id,
            offset_from_parent,
            markers,
        })
    }

    fn encode(
        &self,
        writer: &mut PacketWriter,
        version: Version,
        skip_markers: bool,
    ) -> Result<(), ProtocolError> {
        match (&self.name, fields::rigid_body_description_name(version)) {
            (Some(name), true) => writer.write_cstr(name)?,
            (None, false) => {}
            _ => {
                return Err(ProtocolError::Malformed(format!(
                    "rigid body {} name presence does not match protocol {version}",
                    self.id
                )))
            }
        }
        writer.write_u32(self.id);
        writer.write_i32(self.parent_id);
        writer.write_vec3(self.offset_from_parent);

        if skip_markers {
            if !self.markers.is_empty() {
                return Err(ProtocolError::Malformed(format!(
                    "rigid body {} carries markers the protocol cannot express here",
                    self.id
                )));
            }
            return Ok(());
        }
        writer.write_count(self.markers.len())?;
        for marker in &self.markers {
            writer.write_vec3(marker.position);
        }
        for marker in &self.markers {
            writer.write_u32(marker.required_active_label);
        }
        Ok(())
    }
}

impl SkeletonDescription {
    fn decode(cursor: &mut ParseCursor<'_>, version: Version) -> Result<Self, ProtocolError> {
        let name = cursor.read_cstr(None)?;
        let id = cursor.read_i32()?;
        let count = cursor.read_i32()?;
        let count = usize::try_from(count).map_err(|_| {
            ProtocolError::Malformed(format!("skeleton {name:?} has {count} rigid bodies"))
        })?;
        if count > cursor.remaining() {
            return Err(ProtocolError::Truncated {
                offset: cursor.offset(),
                needed: count,
                available: cursor.remaining(),
            });
        }
        let mut rigid_bodies = Vec::with_capacity(count);
        for _ in 0..count {
            rigid_bodies.push(RigidBodyDescription::decode(cursor, version, true)?);
        }
        Ok(Self {
            name,
            id,
            rigid_bodies,
        })
    }

    fn encode(&self, writer: &mut PacketWriter, version: Version) -> Result<(), ProtocolError> {
        writer.write_cstr(&self.name)?;
        writer.write_i32(self.id);
        let count = i32::try_from(self.rigid_bodies.len()).map_err(|_| {
            ProtocolError::Malformed(format!("skeleton {:?} has too many bodies", self.name))
        })?;
        writer.write_i32(count);
        for body in &self.rigid_bodies {
            body.encode(writer, version, true)?;
        }
        Ok(())
    }
}
