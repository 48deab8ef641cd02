//! Reading bundles whose packet headers were stripped
//!
//! Shipped bundles are sometimes [obfuscated](obfuscate): packet names, packet lengths and the
//! first bytes of every packet are erased. [`recover`] reads such bundles without trusting the
//! packet table. It looks for a packet where each record points, rebuilds the packet header from
//! the copy kept in the packet table and leaves a hole for records that point nowhere useful.

use std::io::Cursor;

use binrw::BinRead;
use bon::Builder;
use tracing::{debug, instrument, warn};

use crate::bundle::read::{
    atlas_properties, atlas_record, category, check_strides, check_version, find_listed,
    read_atlas_table, read_description, read_header, read_table, split_composite_name, used_slots,
};
use crate::compression::{has_zlib_magic, CompressionFlags, CompressionMethod};
use crate::error::{Error, Result};
use crate::manifest::{AtlasProperties, GroupInfo, Manifest, PacketInfo, ResourceInfo, SubgroupInfo};
use crate::packet::PacketArchive;
use crate::path_list;
use crate::types::{
    CompositeRecord, PacketHeader, PacketRecord, AUTO_POOL_RECORD_STRIDE, COMPOSITE_RECORD_STRIDE,
    PACKET_HEADER_COPY, PACKET_HEADER_SIZE, PACKET_RECORD_STRIDE,
};

/// Values of the packet file list offset that identify a packet
const PACKET_SENTINELS: [u32; 2] = [0x5C, 0x1000];
/// Where the sentinel sits inside a packet
const SENTINEL_OFFSET: usize = 0x4C;
/// Recovered packets at most this long are assumed to be 4096 bytes
const MIN_PACKET_LENGTH: u64 = 1024;
/// Bytes erased at the start of every packet by [`obfuscate`]
const ERASED_PACKET_PREFIX: usize = 64;

/// Options for [`recover`]
#[derive(Debug, Clone, Copy, Builder)]
pub struct RecoveryOptions {
    /// Bundle version to assume, the stored one is not trusted
    #[builder(default = 4)]
    pub version: u32,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A packet found by [`recover`], with its header repaired
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredPacket {
    /// Name from the packet path list
    pub name: String,
    /// Index of the packet in the pool
    pub pool_index: u32,
    /// Offset of the packet in the bundle
    pub offset: u32,
    /// Packet bytes
    pub data: Vec<u8>,
}

/// What [`recover`] found for one packet table record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketSlot {
    /// A packet was found and repaired
    Present(RecoveredPacket),
    /// The record does not point at a packet
    Absent {
        /// Index of the packet in the pool
        pool_index: u32,
        /// Offset stored in the record
        offset: u32,
    },
}

/// Result of [`recover`]
#[derive(Debug, Clone)]
pub struct RecoveredBundle {
    /// Manifest of every packet that could be found
    pub manifest: Manifest,
    /// One slot per packet table record, in table order
    pub slots: Vec<PacketSlot>,
}

impl RecoveredBundle {
    /// Iterate over the packets that were found
    pub fn packets(&self) -> impl Iterator<Item = &RecoveredPacket> {
        self.slots.iter().filter_map(|slot| match slot {
            PacketSlot::Present(packet) => Some(packet),
            PacketSlot::Absent { .. } => None,
        })
    }
}

/// Pixel format of an atlas resource, guessed from its size
///
/// `fileLength / (width * height)` bytes per pixel map to format 0 (4), 147 (1) and 30 (0).
pub fn infer_atlas_format(file_length: u32, width: u32, height: u32) -> Option<u32> {
    let square = width as u64 * height as u64;
    if square == 0 {
        return None;
    }

    let ratio = ((file_length as u64 / square) as f64 + 0.4).ceil() as u64;
    match ratio {
        5 => Some(0),
        2 => Some(147),
        1 => Some(30),
        _ => None,
    }
}

fn read_u32_at(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Whether the bytes at `offset` look like a packet
fn has_packet_at(data: &[u8], offset: u32) -> bool {
    read_u32_at(data, offset as usize + SENTINEL_OFFSET)
        .is_some_and(|value| PACKET_SENTINELS.contains(&value))
}

/// Length of a packet computed from the header copy of its record
fn recovered_length(record: &PacketRecord) -> u64 {
    let length = record.header_word(0x18) as u64
        + record.header_word(0x1C) as u64
        + record.header_word(0x2C) as u64;
    if length <= MIN_PACKET_LENGTH {
        4096
    } else {
        length
    }
}

/// Restore the header of a packet from the copy kept in its record
///
/// A header with the right magic and version whose flags agree with the copy is kept. Otherwise
/// bytes `0x00..0x48` are rebuilt; flags outside the valid range are then guessed from the zlib
/// headers at the start of each section.
pub(crate) fn repair_packet(
    data: &mut [u8],
    version: u32,
    header_copy: &[u8; PACKET_HEADER_COPY],
) -> Result<()> {
    if data.len() < PACKET_HEADER_SIZE as usize {
        return Err(Error::format(
            "packet header",
            0,
            format!("{} bytes cannot hold a packet header", data.len()),
        ));
    }

    let copied_flags = u32::from_le_bytes([header_copy[0], header_copy[1], header_copy[2], header_copy[3]]);
    let stored_flags = read_u32_at(data, 0x10);
    let intact = &data[..4] == b"pgsr"
        && read_u32_at(data, 4) == Some(version)
        && stored_flags.is_some_and(|flags| flags <= 3 && flags == copied_flags);
    if intact {
        return Ok(());
    }

    data[..4].copy_from_slice(b"pgsr");
    data[4..8].copy_from_slice(&version.to_le_bytes());
    data[8..0x10].fill(0);
    data[0x10..0x10 + PACKET_HEADER_COPY].copy_from_slice(header_copy);
    data[0x24..0x28].fill(0);

    if CompressionFlags::try_from(copied_flags).is_err() {
        let header = PacketHeader::read(&mut Cursor::new(&*data))
            .map_err(|e| Error::from(e).in_table("packet header", 0))?;
        let method = |offset: u32, stored_size: u32| {
            let start = data.get(offset as usize..).unwrap_or(&[]);
            if stored_size > 0 && has_zlib_magic(start) {
                CompressionMethod::Zlib
            } else {
                CompressionMethod::None
            }
        };
        let flags = CompressionFlags::from_sections(
            method(header.plain.offset, header.plain.stored_size),
            method(header.atlas.offset, header.atlas.stored_size),
        );
        warn!(copied_flags, %flags, "compression flags out of range, guessed from the sections");
        data[0x10..0x14].copy_from_slice(&u32::from(flags).to_le_bytes());
    }

    debug!(version, "rebuilt packet header");
    Ok(())
}

/// Read a bundle without trusting its packet table
#[instrument(skip(data), err)]
pub fn recover(data: &[u8], options: RecoveryOptions) -> Result<RecoveredBundle> {
    let version = options.version;
    check_version(version)?;

    let header = read_header(data)?;
    check_strides(&header)?;

    let packet_list = path_list::decode_pool_list(
        data,
        header.packet_list_offset as u64,
        header.packet_list_length as u64,
        "packet list",
    )?;
    let composites: Vec<CompositeRecord> = read_table(
        data,
        header.composite_table_offset,
        header.composite_count,
        COMPOSITE_RECORD_STRIDE,
        "composite table",
    )?;
    let packets: Vec<PacketRecord> = read_table(
        data,
        header.packet_table_offset,
        header.packet_count,
        PACKET_RECORD_STRIDE,
        "packet table",
    )?;
    let atlas = read_atlas_table(data, &header)?;
    let description = read_description(data, &header, version)?;

    let mut slots = Vec::with_capacity(packets.len());
    for record in &packets {
        if !has_packet_at(data, record.offset) {
            warn!(
                pool_index = record.pool_index,
                offset = record.offset,
                "no packet at the recorded offset, leaving a hole"
            );
            slots.push(PacketSlot::Absent {
                pool_index: record.pool_index,
                offset: record.offset,
            });
            continue;
        }

        let name = find_listed(
            &packet_list,
            record.pool_index,
            "packet list",
            &format!("packet at {:#x}", record.offset),
        )?
        .path
        .clone();

        let start = record.offset as usize;
        let end = (record.offset as u64 + recovered_length(record)).min(data.len() as u64) as usize;
        let mut bytes = data[start..end].to_vec();
        repair_packet(&mut bytes, version, &record.header_copy).map_err(|e| e.in_packet(&name))?;

        debug!(packet = %name, size = bytes.len(), "recovered packet");
        slots.push(PacketSlot::Present(RecoveredPacket {
            name,
            pool_index: record.pool_index,
            offset: record.offset,
            data: bytes,
        }));
    }

    let mut groups = Vec::with_capacity(composites.len());
    for (index, composite) in composites.iter().enumerate() {
        let (name, is_composite) = split_composite_name(&composite.name.as_string());

        let mut subgroups = Vec::new();
        for slot in used_slots(composite, &header, index)? {
            let Some(position) = packets
                .iter()
                .position(|record| record.pool_index == slot.packet_index)
            else {
                return Err(Error::consistency(
                    &name,
                    "packet pool index",
                    format!("{} in the packet table", slot.packet_index),
                    "no such packet",
                ));
            };
            let PacketSlot::Present(packet) = &slots[position] else {
                continue;
            };

            let archive = PacketArchive::new(&packet.data).map_err(|e| e.in_packet(&packet.name))?;
            let mut resources = Vec::with_capacity(archive.len());
            for entry in archive.entries() {
                let Some(info) = entry.atlas() else {
                    resources.push(ResourceInfo::plain(entry.path()));
                    continue;
                };

                let properties = match atlas_record(&atlas, &packets[position], info.id) {
                    Some(record) => atlas_properties(record),
                    None => {
                        let format = infer_atlas_format(entry.size(), info.width, info.height)
                            .ok_or_else(|| {
                                Error::format(
                                    "atlas section",
                                    entry.offset() as u64,
                                    format!(
                                        "{}: cannot infer the pixel format of {} bytes for {}x{}",
                                        entry.path(),
                                        entry.size(),
                                        info.width,
                                        info.height
                                    ),
                                )
                            })
                            .map_err(|e| e.in_packet(&packet.name))?;
                        AtlasProperties {
                            format,
                            pitch: info.width.wrapping_mul(4),
                            alpha_size: None,
                            alpha_format: None,
                        }
                    }
                };

                resources.push(ResourceInfo {
                    path: entry.path().to_string(),
                    atlas: Some(info),
                    atlas_properties: Some(properties),
                });
            }

            subgroups.push(SubgroupInfo {
                packet_name: packet.name.clone(),
                category: category(slot),
                packet: PacketInfo {
                    version: archive.version(),
                    compression_flags: archive.compression_flags(),
                    resources,
                },
            });
        }

        groups.push(GroupInfo {
            name,
            is_composite,
            subgroups,
        });
    }

    let absent = slots
        .iter()
        .filter(|slot| matches!(slot, PacketSlot::Absent { .. }))
        .count();
    debug!(packets = slots.len(), absent, "recovered bundle");

    Ok(RecoveredBundle {
        manifest: Manifest {
            version,
            atlas_record_stride: header.atlas_table_stride,
            groups,
            description,
        },
        slots,
    })
}

fn erase(data: &mut [u8], at: usize, len: usize, table: &'static str) -> Result<()> {
    let region = data.get_mut(at..at + len).ok_or_else(|| {
        Error::format(table, at as u64, format!("{len} bytes do not fit in the bundle"))
    })?;
    region.fill(0);
    Ok(())
}

/// Strip the information [`recover`] can do without
///
/// For every packet this erases its name in the packet and auto-pool tables, its recorded
/// length and the first 64 bytes of the packet itself.
#[instrument(skip_all, err)]
pub fn obfuscate(data: &mut [u8]) -> Result<()> {
    let header = read_header(data)?;
    check_strides(&header)?;
    let packets: Vec<PacketRecord> = read_table(
        data,
        header.packet_table_offset,
        header.packet_count,
        PACKET_RECORD_STRIDE,
        "packet table",
    )?;

    for (index, record) in packets.iter().enumerate() {
        let record_at = header.packet_table_offset as usize + index * PACKET_RECORD_STRIDE as usize;
        let pool_at = header.auto_pool_table_offset as usize + index * AUTO_POOL_RECORD_STRIDE as usize;

        erase(data, record_at, 128, "packet table")?;
        erase(data, pool_at, 128, "auto-pool table")?;
        erase(data, record_at + 132, 4, "packet table")?;
        erase(data, record.offset as usize, ERASED_PACKET_PREFIX, "packet table")?;
    }

    debug!(packets = packets.len(), "obfuscated bundle");
    Ok(())
}
