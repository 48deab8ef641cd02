//! This library handles reading from and creating **RSB** bundles and **RSG** packets used by
//! *PopCap* titles such as *Plants vs. Zombies 2*.
//!
//! # RSB / RSG Format Documentation
//!
//! An RSG packet stores game resources in up to two data sections. An RSB bundle stores many
//! packets one after the other in a packet bank, plus the tables the game needs to find them:
//! which packets form a composite group, which resolution and locale each packet is for, and the
//! dimensions of every atlas image. All multi-byte integers are little-endian.
//!
//! ## Path lists
//!
//! Both containers list paths with the same prefix-sharing encoding. Every record holds a chain
//! of characters. Each character is a 4-byte word: the ASCII code in the low byte and, in the
//! upper 24 bits, the position (in words, from the start of the list) where a sibling branch
//! continues with the current prefix. A NUL character ends a path and is followed by a
//! per-entry payload. See [`path_list`].
//!
//! ## Packet Structure
//!
//! | Offset (bytes) | Field                  | Description                                                |
//! |----------------|------------------------|------------------------------------------------------------|
//! | 0x0000         | Magic number           | 4 bytes: "pgsr"                                            |
//! | 0x0004         | Version                | 4 bytes: 3 or 4                                            |
//! | 0x0008         | Reserved               | 8 bytes                                                    |
//! | 0x0010         | Compression flags      | 4 bytes: bit 0 plain section, bit 1 atlas section          |
//! | 0x0014         | Data offset            | 4 bytes: offset of the first data section                  |
//! | 0x0018         | Plain section          | 12 bytes: offset, stored size, raw size                    |
//! | 0x0024         | Reserved               | 4 bytes                                                    |
//! | 0x0028         | Atlas section          | 12 bytes: offset, stored size, raw size                    |
//! | 0x0034         | Reserved               | 20 bytes                                                   |
//! | 0x0048         | File list length       | 4 bytes                                                    |
//! | 0x004C         | File list offset       | 4 bytes: always 0x5C                                       |
//! | 0x0050         | Reserved               | 12 bytes                                                   |
//!
//! The file list payload is a type word (0 plain, 1 atlas), an offset and a size within the
//! section. Atlas entries carry 20 more bytes: atlas id, 8 reserved bytes, width and height.
//! A section whose flag bit is set is a zlib stream.
//!
//! ## Bundle Structure
//!
//! | Offset (bytes) | Field                  | Description                                                |
//! |----------------|------------------------|------------------------------------------------------------|
//! | 0x0000         | Magic number           | 4 bytes: "1bsr"                                            |
//! | 0x0004         | Version                | 4 bytes: 3 or 4                                            |
//! | 0x000C         | Packet bank offset     | 4 bytes                                                    |
//! | 0x0010         | File list              | 8 bytes: length, offset                                    |
//! | 0x0020         | Packet list            | 8 bytes: length, offset                                    |
//! | 0x0028         | Packet table           | 12 bytes: count, offset, stride (204)                      |
//! | 0x0034         | Composite table        | 12 bytes: count, offset, stride (1156)                     |
//! | 0x0040         | Composite list         | 8 bytes: length, offset                                    |
//! | 0x0048         | Auto-pool table        | 12 bytes: count, offset, stride (152)                      |
//! | 0x0054         | Atlas table            | 12 bytes: count, offset, stride (16, 20 or 24)             |
//! | 0x0060         | Description            | 12 bytes: groups, resources and strings offsets            |
//! | 0x006C         | Packet bank offset     | 4 bytes: version 4 only                                    |
//!
//! ### Packet table
//!
//! Each 204-byte record holds the packet name (128 bytes), its offset and length in the bank,
//! its pool index, a 56-byte copy of the packet header from offset 0x10, the number of atlas
//! images in the packet and the number of atlas images in the packets before it.
//!
//! ### Composite table
//!
//! Each record holds the group name (128 bytes), 64 slots of packet index, resolution and
//! locale, and the number of used slots. A name ending with `_CompositeShell` marks a group that
//! is not composite.
//!
//! ### Description
//!
//! Version 3 bundles carry a description of every group, subgroup and resource. See
//! [`bundle::description`].
//!
//! ## Recovery
//!
//! Shipped bundles often have their packet names, lengths and packet headers erased, see
//! [`obfuscate`]. [`recover`] finds the packets anyway and rebuilds their headers.
//!

pub mod bundle;
pub mod compression;
pub mod error;
pub mod fs;
pub mod manifest;
pub mod packet;
mod patch;
pub mod path_list;
pub mod recovery;
pub mod types;

pub use bundle::{BundleArchive, BundleWriter, Description, PacketSource};
pub use compression::{CompressionFlags, CompressionMethod};
pub use manifest::{Manifest, PacketInfo};
pub use packet::{PacketArchive, PacketWriter, ResourceSource};
pub use recovery::{obfuscate, recover, RecoveryOptions};
