//! Base types for the structure of RSB bundles and RSG packets.

use std::fmt;
use std::io::{Read, Write};

use binrw::{BinRead, BinWrite};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

/// Size of the fixed packet header, the packet file list starts right after it
pub const PACKET_HEADER_SIZE: u32 = 0x5C;
/// Stride of [`PacketRecord`]
pub const PACKET_RECORD_STRIDE: u32 = 204;
/// Stride of [`CompositeRecord`]
pub const COMPOSITE_RECORD_STRIDE: u32 = 1156;
/// Stride of [`AutoPoolRecord`]
pub const AUTO_POOL_RECORD_STRIDE: u32 = 152;
/// Atlas record strides in use, each one adds an optional alpha field
pub const ATLAS_RECORD_STRIDES: [u32; 3] = [0x10, 0x14, 0x18];
/// Number of packet slots in a [`CompositeRecord`]
pub const COMPOSITE_SLOTS: usize = 64;
/// Size of the packet header copy kept in every [`PacketRecord`]
pub const PACKET_HEADER_COPY: usize = 56;

/// Suffix of composite names for groups that are not composite
pub const COMPOSITE_SHELL_SUFFIX: &str = "_CompositeShell";
/// Suffix of auto-pool record names
pub const AUTO_POOL_SUFFIX: &str = "_AutoPool";

/// Start of the file list for a bundle of the given version
pub fn bundle_header_size(version: u32) -> u32 {
    if version >= 4 {
        0x70
    } else {
        0x6C
    }
}

/// Narrow an offset or size to the 32 bits the formats store
pub(crate) fn to_u32<T: TryInto<u32>>(value: T, owner: &str) -> Result<u32> {
    value
        .try_into()
        .map_err(|_| Error::encoding(owner, "offsets and sizes are limited to 32 bits"))
}

/// RSB bundle header
///
/// Always starts with "1bsr", all data is stored in little endian format.
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq, Default)]
#[brw(magic = b"1bsr", little)]
pub struct BundleHeader {
    /// Format version, 3 or 4
    pub version: u32,

    /// Where the concatenated packets start
    #[brw(pad_before = 4)]
    pub packet_bank_offset: u32,

    /// Byte length of the file path list
    pub file_list_length: u32,
    /// Start of the file path list
    pub file_list_offset: u32,

    /// Byte length of the packet path list
    #[brw(pad_before = 8)]
    pub packet_list_length: u32,
    /// Start of the packet path list
    pub packet_list_offset: u32,

    /// Number of [`PacketRecord`]s
    pub packet_count: u32,
    /// Start of the packet table
    pub packet_table_offset: u32,
    /// Size of one [`PacketRecord`]
    pub packet_table_stride: u32,

    /// Number of [`CompositeRecord`]s
    pub composite_count: u32,
    /// Start of the composite table
    pub composite_table_offset: u32,
    /// Size of one [`CompositeRecord`]
    pub composite_table_stride: u32,

    /// Byte length of the composite path list
    pub composite_list_length: u32,
    /// Start of the composite path list
    pub composite_list_offset: u32,

    /// Number of [`AutoPoolRecord`]s
    pub auto_pool_count: u32,
    /// Start of the auto-pool table
    pub auto_pool_table_offset: u32,
    /// Size of one [`AutoPoolRecord`]
    pub auto_pool_table_stride: u32,

    /// Number of [`AtlasRecord`]s
    pub atlas_count: u32,
    /// Start of the atlas table
    pub atlas_table_offset: u32,
    /// Size of one [`AtlasRecord`]
    pub atlas_table_stride: u32,

    /// Group records of the description section
    pub description_groups_offset: u32,
    /// Resource records of the description section
    pub description_resources_offset: u32,
    /// String pool of the description section
    pub description_strings_offset: u32,

    /// Version 4 repeats the packet bank offset
    #[br(if(version >= 4))]
    pub packet_bank_offset_repeat: Option<u32>,
}

impl BundleHeader {
    /// Whether any description offset is set
    pub fn has_description(&self) -> bool {
        self.description_groups_offset != 0
            || self.description_resources_offset != 0
            || self.description_strings_offset != 0
    }
}

/// Offset and sizes of a data section inside a packet
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct SectionDescriptor {
    /// Offset from the start of the packet
    pub offset: u32,
    /// Bytes occupied in the packet, padding included
    pub stored_size: u32,
    /// Size once decompressed
    pub raw_size: u32,
}

/// RSG packet header
///
/// Always starts with "pgsr", all data is stored in little endian format.
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[brw(magic = b"pgsr", little)]
pub struct PacketHeader {
    /// Format version, 3 or 4
    pub version: u32,

    /// Raw `compressionFlags`, see [`crate::CompressionFlags`]
    #[brw(pad_before = 8)]
    pub compression_flags: u32,

    /// End of the file list padding, where the first section starts
    pub data_offset: u32,

    /// Section holding plain resources
    pub plain: SectionDescriptor,

    /// Section holding atlas resources
    #[brw(pad_before = 4)]
    pub atlas: SectionDescriptor,

    /// Byte length of the file path list
    #[brw(pad_before = 20)]
    pub file_list_length: u32,

    /// Start of the file path list
    #[brw(pad_after = 12)]
    pub file_list_offset: u32,
}

/// A name stored in a fixed 128 byte, NUL padded field
#[derive(BinRead, BinWrite, Clone, PartialEq, Eq)]
pub struct FixedName(pub [u8; 128]);

impl FixedName {
    /// Store `name`, which has to be ASCII and leave room for its terminator
    pub fn new(name: &str) -> Result<Self> {
        if !name.is_ascii() {
            return Err(Error::encoding(name, "names have to be ASCII"));
        }
        if name.len() >= 128 {
            return Err(Error::encoding(name, "names are limited to 127 bytes"));
        }

        let mut raw = [0u8; 128];
        raw[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self(raw))
    }

    /// The text up to the first NUL
    pub fn as_string(&self) -> String {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(self.0.len());
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }
}

impl Default for FixedName {
    fn default() -> Self {
        Self([0; 128])
    }
}

impl fmt::Debug for FixedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedName({:?})", self.as_string())
    }
}

/// Entry of the packet table, one per embedded packet
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct PacketRecord {
    /// Packet name
    pub name: FixedName,
    /// Offset of the packet from the start of the bundle
    pub offset: u32,
    /// Length of the packet
    pub length: u32,
    /// Index linking the packet to its path list entry and composite slots
    pub pool_index: u32,
    /// Copy of packet header bytes `0x10..0x48`
    pub header_copy: [u8; PACKET_HEADER_COPY],
    /// Atlas resources inside this packet
    pub atlas_count: u32,
    /// Atlas resources inside all previous packets
    pub atlas_before: u32,
}

impl PacketRecord {
    /// Read a little endian word of the header copy, `packet_offset` being the packet header position
    pub fn header_word(&self, packet_offset: usize) -> u32 {
        let at = packet_offset - 0x10;
        u32::from_le_bytes([
            self.header_copy[at],
            self.header_copy[at + 1],
            self.header_copy[at + 2],
            self.header_copy[at + 3],
        ])
    }
}

/// One packet referenced by a [`CompositeRecord`]
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct CompositeSlot {
    /// Pool index of the packet
    pub packet_index: u32,
    /// First category, a texture resolution
    pub resolution: u32,
    /// Second category, a four letter locale or NULs
    #[brw(pad_after = 4)]
    pub locale: [u8; 4],
}

/// Entry of the composite table, one per group
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct CompositeRecord {
    /// Group name, suffixed with `_CompositeShell` when not composite
    pub name: FixedName,
    /// Referenced packets, only the first `packet_count` are meaningful
    pub slots: [CompositeSlot; COMPOSITE_SLOTS],
    /// Number of used slots
    pub packet_count: u32,
}

/// Entry of the auto-pool table, one per packet
#[derive(BinRead, BinWrite, Debug, Default, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct AutoPoolRecord {
    /// `<packet name>_AutoPool`
    pub name: FixedName,
    /// Memory needed for the plain section
    pub part0_size: u32,
    /// Memory needed for the atlas section
    pub part1_size: u32,
    /// Always 1
    #[brw(pad_after = 12)]
    pub flags: u32,
}

/// Entry of the atlas table
///
/// The stored fields depend on the table stride, so this type is read and written by hand.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct AtlasRecord {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bytes per row
    pub pitch: u32,
    /// Pixel format
    pub format: u32,
    /// Present from stride 0x14
    pub alpha_size: Option<u32>,
    /// Present at stride 0x18, derived at stride 0x14
    pub alpha_format: Option<u32>,
}

impl AtlasRecord {
    /// Read one record of the given stride
    pub fn read_with_stride(reader: &mut impl Read, stride: u32) -> std::io::Result<Self> {
        let width = reader.read_u32::<LittleEndian>()?;
        let height = reader.read_u32::<LittleEndian>()?;
        let pitch = reader.read_u32::<LittleEndian>()?;
        let format = reader.read_u32::<LittleEndian>()?;

        let (alpha_size, alpha_format) = match stride {
            0x18 => (
                Some(reader.read_u32::<LittleEndian>()?),
                Some(reader.read_u32::<LittleEndian>()?),
            ),
            0x14 => {
                let alpha_size = reader.read_u32::<LittleEndian>()?;
                (Some(alpha_size), Some(if alpha_size == 0 { 0 } else { 0x64 }))
            }
            _ => (None, None),
        };

        Ok(Self {
            width,
            height,
            pitch,
            format,
            alpha_size,
            alpha_format,
        })
    }

    /// Write one record of the given stride, missing alpha fields are written as zero
    pub fn write_with_stride(&self, writer: &mut impl Write, stride: u32) -> std::io::Result<()> {
        writer.write_u32::<LittleEndian>(self.width)?;
        writer.write_u32::<LittleEndian>(self.height)?;
        writer.write_u32::<LittleEndian>(self.pitch)?;
        writer.write_u32::<LittleEndian>(self.format)?;
        if stride >= 0x14 {
            writer.write_u32::<LittleEndian>(self.alpha_size.unwrap_or(0))?;
        }
        if stride == 0x18 {
            writer.write_u32::<LittleEndian>(self.alpha_format.unwrap_or(0))?;
        }
        Ok(())
    }
}
