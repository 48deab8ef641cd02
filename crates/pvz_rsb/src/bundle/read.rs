//! Types for reading RSB bundles
//!

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::io::Cursor;

use binrw::BinRead;
use tracing::{debug, instrument, warn};

use crate::bundle::description::{self, Description};
use crate::error::{Error, Result};
use crate::manifest::{
    AtlasInfo, AtlasProperties, GroupInfo, Manifest, PacketInfo, ResourceInfo, SubgroupInfo,
};
use crate::packet::PacketArchive;
use crate::path_list::{self, PathListEntry};
use crate::types::{
    bundle_header_size, AtlasRecord, AutoPoolRecord, BundleHeader, CompositeRecord, CompositeSlot,
    PacketRecord, ATLAS_RECORD_STRIDES, AUTO_POOL_RECORD_STRIDE, AUTO_POOL_SUFFIX,
    COMPOSITE_RECORD_STRIDE, COMPOSITE_SHELL_SUFFIX, COMPOSITE_SLOTS, PACKET_RECORD_STRIDE,
};

/// A packet embedded in a bundle
pub struct BundlePacket<'a> {
    record: &'a PacketRecord,
    name: String,
    data: &'a [u8],
}

impl Debug for BundlePacket<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BundlePacket({:#?})", self.record)
    }
}

impl<'a> BundlePacket<'a> {
    /// Name of the packet as stored in the packet table
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index used by composite groups and path lists to refer to this packet
    pub fn pool_index(&self) -> u32 {
        self.record.pool_index
    }

    /// The packet table entry
    pub fn record(&self) -> &'a PacketRecord {
        self.record
    }

    /// Bytes of the packet
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Size of the packet in bytes
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Decode the packet
    pub fn archive(&self) -> Result<PacketArchive> {
        PacketArchive::new(self.data).map_err(|e| e.in_packet(&self.name))
    }
}

/// RSB bundle reader
///
/// Decoding checks every table against the others: names stored twice have to agree and the
/// dimensions of atlas resources have to match the bundle atlas table.
///
/// ```no_run
/// fn list_bundle_contents(data: &[u8]) -> pvz_rsb::error::Result<()> {
///     let bundle = pvz_rsb::BundleArchive::new(data)?;
///
///     for group in &bundle.manifest().groups {
///         for subgroup in &group.subgroups {
///             println!("{}/{}", group.name, subgroup.packet_name);
///         }
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct BundleArchive<'a> {
    data: &'a [u8],
    header: BundleHeader,
    manifest: Manifest,
    packets: Vec<PacketRecord>,
    auto_pool: Vec<AutoPoolRecord>,
    atlas: Vec<AtlasRecord>,
}

impl<'a> BundleArchive<'a> {
    /// Read a bundle and rebuild its manifest
    #[instrument(skip_all, err)]
    pub fn new(data: &'a [u8]) -> Result<BundleArchive<'a>> {
        let header = read_header(data)?;
        check_version(header.version)?;

        let list_start = bundle_header_size(header.version);
        if header.file_list_offset != list_start {
            return Err(Error::format(
                "bundle header",
                0x14,
                format!(
                    "file list should start at {list_start:#x}, found {:#x}",
                    header.file_list_offset
                ),
            ));
        }
        check_strides(&header)?;
        check_stride("auto-pool table", 0x50, header.auto_pool_table_stride, AUTO_POOL_RECORD_STRIDE)?;

        let file_list = path_list::decode_pool_list(
            data,
            header.file_list_offset as u64,
            header.file_list_length as u64,
            "file list",
        )?;
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
        let composite_list = path_list::decode_pool_list(
            data,
            header.composite_list_offset as u64,
            header.composite_list_length as u64,
            "composite list",
        )?;
        let packets: Vec<PacketRecord> = read_table(
            data,
            header.packet_table_offset,
            header.packet_count,
            PACKET_RECORD_STRIDE,
            "packet table",
        )?;
        let auto_pool: Vec<AutoPoolRecord> = read_table(
            data,
            header.auto_pool_table_offset,
            header.auto_pool_count,
            AUTO_POOL_RECORD_STRIDE,
            "auto-pool table",
        )?;
        let atlas_records = read_atlas_table(data, &header)?;
        let description = read_description(data, &header, header.version)?;

        for (record, pool) in packets.iter().zip(&auto_pool) {
            let expected = format!("{}{AUTO_POOL_SUFFIX}", record.name.as_string());
            let actual = pool.name.as_string();
            if !actual.eq_ignore_ascii_case(&expected) {
                warn!(%expected, %actual, "auto-pool name does not match its packet");
            }
        }

        let mut files: HashMap<u32, Vec<&str>> = HashMap::new();
        for entry in &file_list {
            files.entry(entry.value).or_default().push(&entry.path);
        }

        let mut groups = Vec::with_capacity(composites.len());
        for (index, composite) in composites.iter().enumerate() {
            let (name, is_composite) = split_composite_name(&composite.name.as_string());
            let listed = find_listed(&composite_list, index as u32, "composite list", &name)?;
            let listed_name = match listed.path.strip_suffix("_COMPOSITESHELL") {
                Some(stripped) => stripped,
                None => listed.path.as_str(),
            };
            if !listed_name.eq_ignore_ascii_case(&name) {
                return Err(Error::consistency(
                    &name,
                    "composite name",
                    &listed.path,
                    &name,
                ));
            }

            let mut subgroups = Vec::new();
            for slot in used_slots(composite, &header, index)? {
                let record = find_record(&packets, slot.packet_index, &name)?;
                let packet_name = record.name.as_string();
                let listed = find_listed(&packet_list, slot.packet_index, "packet list", &packet_name)?;
                if !listed.path.eq_ignore_ascii_case(&packet_name) {
                    return Err(Error::consistency(
                        format!("pool index {}", slot.packet_index),
                        "packet name",
                        &listed.path,
                        &packet_name,
                    ));
                }

                let packet = packet_bytes(data, record.offset, record.length, &packet_name)?;
                let info = PacketArchive::read_info(packet).map_err(|e| e.in_packet(&packet_name))?;

                let listed_files = files.get(&slot.packet_index).map(Vec::as_slice).unwrap_or(&[]);
                let mut resources = Vec::with_capacity(listed_files.len());
                for &path in listed_files {
                    let Some(stored) = info
                        .resources
                        .iter()
                        .find(|resource| resource.path.eq_ignore_ascii_case(path))
                    else {
                        return Err(Error::consistency(
                            path,
                            "packet resource",
                            format!("listed in {packet_name}"),
                            "missing from the packet",
                        ));
                    };

                    let resource = match stored.atlas {
                        Some(atlas) if is_composite && path.ends_with(".PTX") => {
                            checked_atlas_resource(path, atlas, record, &atlas_records)?
                        }
                        _ => ResourceInfo::plain(path),
                    };
                    resources.push(resource);
                }

                debug!(packet = %packet_name, resources = resources.len(), "read packet entry");
                subgroups.push(SubgroupInfo {
                    packet_name,
                    category: category(slot),
                    packet: PacketInfo {
                        version: info.version,
                        compression_flags: info.compression_flags,
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

        debug!(
            version = header.version,
            groups = groups.len(),
            packets = packets.len(),
            atlas = atlas_records.len(),
            "read bundle"
        );

        let manifest = Manifest {
            version: header.version,
            atlas_record_stride: header.atlas_table_stride,
            groups,
            description,
        };

        Ok(BundleArchive {
            data,
            header,
            manifest,
            packets,
            auto_pool,
            atlas: atlas_records,
        })
    }

    /// The bundle header
    pub fn header(&self) -> &BundleHeader {
        &self.header
    }

    /// The rebuilt manifest
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Take the manifest, dropping everything else
    pub fn into_manifest(self) -> Manifest {
        self.manifest
    }

    /// Number of packets in the packet table
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Whether the bundle contains no packets
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns an iterator over all packet names, in packet table order
    pub fn packet_names(&self) -> impl Iterator<Item = String> + '_ {
        self.packets.iter().map(|record| record.name.as_string())
    }

    /// Get the index of a packet by name, ignoring case
    pub fn index_for_name(&self, name: &str) -> Option<usize> {
        self.packets
            .iter()
            .position(|record| record.name.as_string().eq_ignore_ascii_case(name))
    }

    /// Search for a packet by name, ignoring case
    pub fn by_name(&self, name: &str) -> Result<BundlePacket<'_>> {
        let Some(index) = self.index_for_name(name) else {
            return Err(Error::CustomError(format!("bundle has no packet {name}")));
        };
        self.by_index(index)
    }

    /// Get a packet by its position in the packet table
    pub fn by_index(&self, index: usize) -> Result<BundlePacket<'_>> {
        let record = self.packets.get(index).ok_or_else(|| {
            Error::CustomError(format!(
                "packet index {index} is out of range ({} packets)",
                self.len()
            ))
        })?;
        let name = record.name.as_string();
        let data = packet_bytes(self.data, record.offset, record.length, &name)?;

        Ok(BundlePacket { record, name, data })
    }

    /// The bundle atlas table
    pub fn atlas_records(&self) -> &[AtlasRecord] {
        &self.atlas
    }

    /// The auto-pool table, one record per packet
    pub fn auto_pool_records(&self) -> &[AutoPoolRecord] {
        &self.auto_pool
    }
}

/// Read the header without checking its version
pub(crate) fn read_header(data: &[u8]) -> Result<BundleHeader> {
    BundleHeader::read(&mut Cursor::new(data)).map_err(|e| Error::from(e).in_table("bundle header", 0))
}

pub(crate) fn check_version(version: u32) -> Result<()> {
    if !(3..=4).contains(&version) {
        return Err(Error::format(
            "bundle header",
            4,
            format!("unsupported version {version}"),
        ));
    }
    Ok(())
}

fn check_stride(table: &'static str, field: u64, actual: u32, expected: u32) -> Result<()> {
    if actual != expected {
        return Err(Error::format(
            table,
            field,
            format!("stride should be {expected:#x}, found {actual:#x}"),
        ));
    }
    Ok(())
}

/// Check the strides of the tables every reader needs
pub(crate) fn check_strides(header: &BundleHeader) -> Result<()> {
    check_stride("packet table", 0x30, header.packet_table_stride, PACKET_RECORD_STRIDE)?;
    check_stride("composite table", 0x3C, header.composite_table_stride, COMPOSITE_RECORD_STRIDE)?;
    if !ATLAS_RECORD_STRIDES.contains(&header.atlas_table_stride) {
        return Err(Error::format(
            "atlas table",
            0x5C,
            format!(
                "stride should be one of 0x10, 0x14 or 0x18, found {:#x}",
                header.atlas_table_stride
            ),
        ));
    }
    Ok(())
}

fn check_table_end(position: u64, offset: u32, count: u32, stride: u32, table: &'static str) -> Result<()> {
    let end = offset as u64 + count as u64 * stride as u64;
    if position != end {
        return Err(Error::format(
            table,
            position,
            format!("table should end at {end:#x}"),
        ));
    }
    Ok(())
}

/// Read `count` fixed stride records starting at `offset`
pub(crate) fn read_table<T>(
    data: &[u8],
    offset: u32,
    count: u32,
    stride: u32,
    table: &'static str,
) -> Result<Vec<T>>
where
    T: for<'b> BinRead<Args<'b> = ()>,
{
    let mut cursor = Cursor::new(data);
    cursor.set_position(offset as u64);

    let mut records = Vec::new();
    for _ in 0..count {
        let at = cursor.position();
        records.push(T::read_le(&mut cursor).map_err(|e| Error::from(e).in_table(table, at))?);
    }
    check_table_end(cursor.position(), offset, count, stride, table)?;

    debug!(table, count, "read table");
    Ok(records)
}

pub(crate) fn read_atlas_table(data: &[u8], header: &BundleHeader) -> Result<Vec<AtlasRecord>> {
    let stride = header.atlas_table_stride;
    let mut cursor = Cursor::new(data);
    cursor.set_position(header.atlas_table_offset as u64);

    let mut records = Vec::new();
    for _ in 0..header.atlas_count {
        let at = cursor.position();
        records.push(
            AtlasRecord::read_with_stride(&mut cursor, stride)
                .map_err(|e| Error::from(e).in_table("atlas table", at))?,
        );
    }
    check_table_end(
        cursor.position(),
        header.atlas_table_offset,
        header.atlas_count,
        stride,
        "atlas table",
    )?;

    debug!(count = records.len(), stride, "read atlas table");
    Ok(records)
}

/// The description section of version 3 bundles
pub(crate) fn read_description(
    data: &[u8],
    header: &BundleHeader,
    version: u32,
) -> Result<Option<Description>> {
    if version != 3 {
        return Ok(None);
    }
    if !header.has_description() {
        return Err(Error::format(
            "bundle header",
            0x60,
            "version 3 bundles need a description section",
        ));
    }
    description::read(data, header).map(Some)
}

/// Group name without the shell suffix, and whether the group is composite
pub(crate) fn split_composite_name(stored: &str) -> (String, bool) {
    match stored.strip_suffix(COMPOSITE_SHELL_SUFFIX) {
        Some(name) => (name.to_string(), false),
        None => (stored.to_string(), true),
    }
}

/// The meaningful slots of a composite record
pub(crate) fn used_slots<'c>(
    composite: &'c CompositeRecord,
    header: &BundleHeader,
    index: usize,
) -> Result<&'c [CompositeSlot]> {
    let count = composite.packet_count as usize;
    if count > COMPOSITE_SLOTS {
        let at = header.composite_table_offset as u64
            + index as u64 * COMPOSITE_RECORD_STRIDE as u64
            + COMPOSITE_RECORD_STRIDE as u64
            - 4;
        return Err(Error::format(
            "composite table",
            at,
            format!("{count} packets do not fit in {COMPOSITE_SLOTS} slots"),
        ));
    }
    Ok(&composite.slots[..count])
}

pub(crate) fn find_record<'p>(
    packets: &'p [PacketRecord],
    pool_index: u32,
    owner: &str,
) -> Result<&'p PacketRecord> {
    packets
        .iter()
        .find(|record| record.pool_index == pool_index)
        .ok_or_else(|| {
            Error::consistency(
                owner,
                "packet pool index",
                format!("{pool_index} in the packet table"),
                "no such packet",
            )
        })
}

pub(crate) fn find_listed<'l>(
    list: &'l [PathListEntry<u32>],
    pool_index: u32,
    table: &str,
    owner: &str,
) -> Result<&'l PathListEntry<u32>> {
    list.iter()
        .find(|entry| entry.value == pool_index)
        .ok_or_else(|| {
            Error::consistency(
                owner,
                "pool index",
                format!("{pool_index} in the {table}"),
                "no such entry",
            )
        })
}

/// Slice a packet out of the bundle
pub(crate) fn packet_bytes<'d>(data: &'d [u8], offset: u32, length: u32, name: &str) -> Result<&'d [u8]> {
    let start = offset as usize;
    let end = start + length as usize;
    data.get(start..end).ok_or_else(|| {
        Error::format(
            "packet table",
            offset as u64,
            format!(
                "packet {name} ({length} bytes) does not fit in the bundle ({:#x} bytes)",
                data.len()
            ),
        )
    })
}

/// Resolution and locale of a composite slot
pub(crate) fn category(slot: &CompositeSlot) -> [String; 2] {
    [
        slot.resolution.to_string(),
        String::from_utf8_lossy(&slot.locale).replace('\0', ""),
    ]
}

/// The bundle atlas record of atlas resource `id` of a packet
pub(crate) fn atlas_record<'t>(
    table: &'t [AtlasRecord],
    record: &PacketRecord,
    id: u32,
) -> Option<&'t AtlasRecord> {
    table.get(record.atlas_before as usize + id as usize)
}

pub(crate) fn atlas_properties(record: &AtlasRecord) -> AtlasProperties {
    AtlasProperties {
        format: record.format,
        pitch: record.pitch,
        alpha_size: record.alpha_size,
        alpha_format: record.alpha_format,
    }
}

/// An atlas resource whose dimensions agree with the bundle atlas table
fn checked_atlas_resource(
    path: &str,
    atlas: AtlasInfo,
    record: &PacketRecord,
    table: &[AtlasRecord],
) -> Result<ResourceInfo> {
    let index = record.atlas_before as usize + atlas.id as usize;
    let stored = atlas_record(table, record, atlas.id).ok_or_else(|| {
        Error::consistency(
            path,
            "atlas index",
            format!("below {}", table.len()),
            index,
        )
    })?;

    if stored.width != atlas.width {
        return Err(Error::consistency(path, "atlas width", stored.width, atlas.width));
    }
    if stored.height != atlas.height {
        return Err(Error::consistency(path, "atlas height", stored.height, atlas.height));
    }

    Ok(ResourceInfo {
        path: path.to_string(),
        atlas: Some(atlas),
        atlas_properties: Some(atlas_properties(stored)),
    })
}
