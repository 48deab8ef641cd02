//! Editable description of a bundle
//!
//! A [`Manifest`] together with the extracted packet files is all that is needed to rebuild a
//! bundle byte for byte. A [`PacketInfo`] plays the same role for a single packet and its
//! resources.

use serde::{Deserialize, Serialize};

use crate::bundle::description::Description;
use crate::compression::CompressionFlags;

/// Where an atlas resource sits in the bundle atlas table and its size
#[derive(Serialize, Deserialize, Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct AtlasInfo {
    /// Index local to the packet
    pub id: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

/// Fields of the bundle atlas table that are not stored in the packet
#[derive(Serialize, Deserialize, Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct AtlasProperties {
    /// Pixel format
    pub format: u32,
    /// Bytes per row
    pub pitch: u32,
    /// Only stored by tables with a stride of at least 0x14
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha_size: Option<u32>,
    /// Only stored by tables with a stride of 0x18
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha_format: Option<u32>,
}

/// A resource stored in a packet
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    /// Path inside the packet
    pub path: String,
    /// Set for resources in the atlas section
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atlas: Option<AtlasInfo>,
    /// Set for `.PTX` atlas resources of composite groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atlas_properties: Option<AtlasProperties>,
}

impl ResourceInfo {
    /// A resource of the plain section
    pub fn plain(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// A resource of the atlas section
    pub fn atlas(path: impl Into<String>, atlas: AtlasInfo) -> Self {
        Self {
            path: path.into(),
            atlas: Some(atlas),
            atlas_properties: None,
        }
    }
}

/// Metadata of a packet
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct PacketInfo {
    /// Packet format version, 3 or 4
    pub version: u32,
    /// Which sections are compressed
    pub compression_flags: CompressionFlags,
    /// Resources, in the order they were listed
    pub resources: Vec<ResourceInfo>,
}

/// One packet of a group
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SubgroupInfo {
    /// Packet name, also the name of its file
    pub packet_name: String,
    /// Resolution and locale
    pub category: [String; 2],
    /// Packet metadata
    pub packet: PacketInfo,
}

/// A composite group
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    /// Group name without the `_CompositeShell` suffix
    pub name: String,
    /// Whether the stored name lacked the `_CompositeShell` suffix
    pub is_composite: bool,
    /// Packets of the group
    pub subgroups: Vec<SubgroupInfo>,
}

/// Everything needed to rebuild a bundle apart from the packet files
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Bundle format version, 3 or 4
    pub version: u32,
    /// Stride of the atlas table, 0x10, 0x14 or 0x18
    pub atlas_record_stride: u32,
    /// Groups in table order
    pub groups: Vec<GroupInfo>,
    /// Description section, version 3 only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Description>,
}

impl Manifest {
    /// Iterate over every packet of every group
    pub fn subgroups(&self) -> impl Iterator<Item = &SubgroupInfo> {
        self.groups.iter().flat_map(|group| group.subgroups.iter())
    }
}
