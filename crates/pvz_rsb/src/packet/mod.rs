//! RSG packets
//!
//! A packet is a header, a path list describing every resource, and up to two data sections:
//! one for plain resources and one for atlas (texture) resources. Each section may be
//! compressed independently, see [`crate::CompressionFlags`].

use std::collections::HashMap;
use std::io::{self, Cursor};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};
use crate::manifest::AtlasInfo;
use crate::path_list::{self, PathRecord};

pub mod read;
pub mod write;

pub use read::{PacketArchive, PacketFile};
pub use write::PacketWriter;

/// Size of the owner record of a plain entry
const PLAIN_ENTRY_LEN: usize = 12;
/// Size of the owner record of an atlas entry
const ATLAS_ENTRY_LEN: usize = 32;

/// A resource listed in a packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketEntry {
    /// Stored in the plain section
    Plain {
        /// Path of the resource
        path: String,
        /// Offset inside the decompressed plain section
        offset: u32,
        /// Size of the resource
        size: u32,
    },
    /// Stored in the atlas section
    Atlas {
        /// Path of the resource
        path: String,
        /// Offset inside the decompressed atlas section
        offset: u32,
        /// Size of the resource
        size: u32,
        /// Atlas id and dimensions
        atlas: AtlasInfo,
    },
}

impl PacketEntry {
    /// Path of the resource
    pub fn path(&self) -> &str {
        match self {
            PacketEntry::Plain { path, .. } | PacketEntry::Atlas { path, .. } => path,
        }
    }

    /// Offset inside its section
    pub fn offset(&self) -> u32 {
        match self {
            PacketEntry::Plain { offset, .. } | PacketEntry::Atlas { offset, .. } => *offset,
        }
    }

    /// Size of the resource
    pub fn size(&self) -> u32 {
        match self {
            PacketEntry::Plain { size, .. } | PacketEntry::Atlas { size, .. } => *size,
        }
    }

    /// Atlas data, for atlas resources
    pub fn atlas(&self) -> Option<AtlasInfo> {
        match self {
            PacketEntry::Plain { .. } => None,
            PacketEntry::Atlas { atlas, .. } => Some(*atlas),
        }
    }

    /// Whether the resource lives in the atlas section
    pub fn is_atlas(&self) -> bool {
        matches!(self, PacketEntry::Atlas { .. })
    }

    fn with_path(self, path: String) -> Self {
        match self {
            PacketEntry::Plain { offset, size, .. } => PacketEntry::Plain { path, offset, size },
            PacketEntry::Atlas {
                offset, size, atlas, ..
            } => PacketEntry::Atlas {
                path,
                offset,
                size,
                atlas,
            },
        }
    }
}

impl PathRecord for PacketEntry {
    fn path(&self) -> &str {
        PacketEntry::path(self)
    }

    fn value_len(&self) -> usize {
        match self {
            PacketEntry::Plain { .. } => PLAIN_ENTRY_LEN,
            PacketEntry::Atlas { .. } => ATLAS_ENTRY_LEN,
        }
    }

    fn write_value(&self, out: &mut Vec<u8>) -> Result<()> {
        let words = match self {
            PacketEntry::Plain { offset, size, .. } => vec![0, *offset, *size],
            PacketEntry::Atlas {
                offset, size, atlas, ..
            } => vec![1, *offset, *size, atlas.id, 0, 0, atlas.width, atlas.height],
        };
        for word in words {
            out.extend_from_slice(&word.to_le_bytes());
        }
        Ok(())
    }
}

/// Read the owner record of a packet path list, the path is filled in afterwards
fn read_entry(cursor: &mut Cursor<&[u8]>) -> io::Result<PacketEntry> {
    let kind = cursor.read_u32::<LittleEndian>()?;
    let offset = cursor.read_u32::<LittleEndian>()?;
    let size = cursor.read_u32::<LittleEndian>()?;

    if kind != 1 {
        return Ok(PacketEntry::Plain {
            path: String::new(),
            offset,
            size,
        });
    }

    let id = cursor.read_u32::<LittleEndian>()?;
    path_list::skip(cursor, 8)?;
    let width = cursor.read_u32::<LittleEndian>()?;
    let height = cursor.read_u32::<LittleEndian>()?;

    Ok(PacketEntry::Atlas {
        path: String::new(),
        offset,
        size,
        atlas: AtlasInfo { id, width, height },
    })
}

/// Provides the bytes of each resource when building a packet
pub trait ResourceSource {
    /// Read the resource stored at `path`
    fn read_resource(&mut self, path: &str) -> Result<Vec<u8>>;
}

impl ResourceSource for HashMap<String, Vec<u8>> {
    fn read_resource(&mut self, path: &str) -> Result<Vec<u8>> {
        self.get(path)
            .or_else(|| {
                self.iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(path))
                    .map(|(_, data)| data)
            })
            .cloned()
            .ok_or_else(|| Error::CustomError(format!("resource {path} is missing")))
    }
}
