//! Types for writing RSB bundles
//!

use std::io::Cursor;

use binrw::BinWrite;
use tracing::{debug, instrument, warn};

use crate::bundle::description::{self, Description};
use crate::bundle::PacketSource;
use crate::compression::block_padding;
use crate::error::{Error, Result};
use crate::manifest::{Manifest, PacketInfo, SubgroupInfo};
use crate::packet::read::read_listing;
use crate::patch::DeferredWrites;
use crate::path_list::{self, PoolPath};
use crate::types::{
    bundle_header_size, to_u32, AtlasRecord, AutoPoolRecord, BundleHeader, CompositeRecord,
    CompositeSlot, FixedName, PacketHeader, PacketRecord, ATLAS_RECORD_STRIDES,
    AUTO_POOL_RECORD_STRIDE, AUTO_POOL_SUFFIX, COMPOSITE_RECORD_STRIDE, COMPOSITE_SHELL_SUFFIX,
    COMPOSITE_SLOTS, PACKET_HEADER_COPY, PACKET_RECORD_STRIDE,
};

/// Offset of the packet offset field inside a [`PacketRecord`]
const RECORD_OFFSET_FIELD: usize = 128;

/// A packet accepted by [`BundleWriter::add_packet`]
#[derive(Debug)]
struct PendingPacket {
    header: PacketHeader,
    data: Vec<u8>,
}

/// Positions fixed once everything before the packet bank is written
struct Layout {
    packet_bank_offset: u32,
}

/// RSB bundle generator
///
/// Packets are added in manifest order, each one is checked against its manifest entry before
/// being accepted.
///
/// ```no_run
/// # fn doit(manifest: &pvz_rsb::Manifest, packets: Vec<Vec<u8>>) -> pvz_rsb::error::Result<()>
/// # {
/// use pvz_rsb::BundleWriter;
///
/// let mut bundle = BundleWriter::new(manifest);
/// for packet in packets {
///     bundle.add_packet(packet)?;
/// }
/// let bytes = bundle.finish()?;
/// assert_eq!(&bytes[..4], b"1bsr");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct BundleWriter<'m> {
    manifest: &'m Manifest,
    packets: Vec<PendingPacket>,
}

impl<'m> BundleWriter<'m> {
    /// Start a bundle described by `manifest`
    pub fn new(manifest: &'m Manifest) -> BundleWriter<'m> {
        BundleWriter {
            manifest,
            packets: Vec::new(),
        }
    }

    /// Build a bundle, reading every packet from `source`
    #[instrument(skip_all, err)]
    pub fn encode(manifest: &Manifest, source: &mut impl PacketSource) -> Result<Vec<u8>> {
        let mut writer = BundleWriter::new(manifest);
        for subgroup in manifest.subgroups() {
            writer.add_packet(source.read_packet(&subgroup.packet_name)?)?;
        }
        writer.finish()
    }

    /// The manifest entry the next packet has to match
    pub fn next_subgroup(&self) -> Option<&'m SubgroupInfo> {
        self.manifest.subgroups().nth(self.packets.len())
    }

    /// Add the next packet, in manifest order
    #[instrument(skip_all, err, fields(size = data.len()))]
    pub fn add_packet(&mut self, data: Vec<u8>) -> Result<()> {
        let Some(subgroup) = self.next_subgroup() else {
            return Err(Error::encoding(
                "bundle",
                "more packets than the manifest lists",
            ));
        };

        let (header, stored) = read_listing(&data).map_err(|e| e.in_packet(&subgroup.packet_name))?;
        verify_packet(&subgroup.packet_name, &subgroup.packet, &stored)?;
        debug!(packet = %subgroup.packet_name, "accepted packet");

        self.packets.push(PendingPacket { header, data });
        Ok(())
    }

    /// Lay out the tables and return the bundle bytes
    #[instrument(skip(self), err)]
    pub fn finish(self) -> Result<Vec<u8>> {
        let manifest = self.manifest;
        let version = manifest.version;
        if !(3..=4).contains(&version) {
            return Err(Error::encoding(
                "bundle",
                format!("unsupported version {version}"),
            ));
        }
        let atlas_stride = manifest.atlas_record_stride;
        if !ATLAS_RECORD_STRIDES.contains(&atlas_stride) {
            return Err(Error::encoding(
                "bundle",
                format!("unsupported atlas record stride {atlas_stride:#x}"),
            ));
        }
        let expected = manifest.subgroups().count();
        if self.packets.len() != expected {
            return Err(Error::encoding(
                "bundle",
                format!(
                    "the manifest lists {expected} packets but {} were added",
                    self.packets.len()
                ),
            ));
        }

        let mut files = Vec::new();
        let mut packet_names = Vec::new();
        let mut composite_names = Vec::new();
        let mut composites = Vec::with_capacity(manifest.groups.len());
        let mut records = Vec::with_capacity(self.packets.len());
        let mut auto_pool = Vec::with_capacity(self.packets.len());
        let mut atlas = Vec::new();
        let mut bank = Vec::new();

        let mut pending = self.packets.into_iter();
        let mut pool_index = 0u32;
        let mut atlas_before = 0u32;
        for (group_index, group) in manifest.groups.iter().enumerate() {
            let stored_name = if group.is_composite {
                group.name.clone()
            } else {
                format!("{}{COMPOSITE_SHELL_SUFFIX}", group.name)
            };
            if group.subgroups.len() > COMPOSITE_SLOTS {
                return Err(Error::encoding(
                    &group.name,
                    format!("groups hold at most {COMPOSITE_SLOTS} packets"),
                ));
            }

            let mut composite = CompositeRecord {
                name: FixedName::new(&stored_name)?,
                slots: [CompositeSlot::default(); COMPOSITE_SLOTS],
                packet_count: to_u32(group.subgroups.len(), &group.name)?,
            };

            for (slot, subgroup) in composite.slots.iter_mut().zip(&group.subgroups) {
                let Some(packet) = pending.next() else {
                    return Err(Error::encoding("bundle", "missing packet"));
                };
                let name = &subgroup.packet_name;

                *slot = composite_slot(pool_index, &subgroup.category, name)?;

                let resources = &subgroup.packet.resources;
                let first_atlas = atlas.len();
                let mut atlas_count = 0u32;
                for resource in resources {
                    files.push(PoolPath::new(&resource.path, pool_index));
                    if let Some(info) = resource.atlas {
                        atlas_count += 1;
                        let Some(properties) = resource.atlas_properties else {
                            return Err(Error::encoding(
                                &resource.path,
                                "atlas resources need atlas properties",
                            ));
                        };
                        atlas.push((
                            resource.path.as_str(),
                            info.id,
                            atlas_before,
                            AtlasRecord {
                                width: info.width,
                                height: info.height,
                                pitch: properties.pitch,
                                format: properties.format,
                                alpha_size: properties.alpha_size,
                                alpha_format: properties.alpha_format,
                            },
                        ));
                    }
                }
                for (path, id, _, _) in &atlas[first_atlas..] {
                    if *id >= atlas_count {
                        return Err(Error::encoding(
                            *path,
                            format!("atlas id {id} is not below the {atlas_count} atlas resources of {name}"),
                        ));
                    }
                }

                let mut header_copy = [0u8; PACKET_HEADER_COPY];
                header_copy.copy_from_slice(&packet.data[0x10..0x10 + PACKET_HEADER_COPY]);
                header_copy[0x14..0x18].copy_from_slice(&packet.header.plain.raw_size.to_le_bytes());

                records.push(PacketRecord {
                    name: FixedName::new(name)?,
                    offset: to_u32(bank.len(), name)?,
                    length: to_u32(packet.data.len(), name)?,
                    pool_index,
                    header_copy,
                    atlas_count,
                    atlas_before,
                });

                let (part0_size, part1_size) = if atlas_count > 0 {
                    (packet.header.plain.offset, packet.header.atlas.raw_size)
                } else {
                    (
                        packet.header.plain.offset.wrapping_add(packet.header.plain.raw_size),
                        0,
                    )
                };
                auto_pool.push(AutoPoolRecord {
                    name: FixedName::new(&format!("{name}{AUTO_POOL_SUFFIX}"))?,
                    part0_size,
                    part1_size,
                    flags: 1,
                });

                packet_names.push(PoolPath::new(name, pool_index));
                bank.extend_from_slice(&packet.data);
                atlas_before += atlas_count;
                pool_index += 1;
            }

            composite_names.push(PoolPath::new(&stored_name, to_u32(group_index, &group.name)?));
            composites.push(composite);
        }

        let mut out = vec![0u8; bundle_header_size(version) as usize];
        let mut header = BundleHeader {
            version,
            packet_count: pool_index,
            packet_table_stride: PACKET_RECORD_STRIDE,
            composite_count: to_u32(composites.len(), "bundle")?,
            composite_table_stride: COMPOSITE_RECORD_STRIDE,
            auto_pool_count: pool_index,
            auto_pool_table_stride: AUTO_POOL_RECORD_STRIDE,
            atlas_count: atlas_before,
            atlas_table_stride: atlas_stride,
            ..Default::default()
        };

        (header.file_list_offset, header.file_list_length) =
            append(&mut out, &path_list::encode(&files)?)?;
        (header.packet_list_offset, header.packet_list_length) =
            append(&mut out, &path_list::encode(&packet_names)?)?;

        header.composite_table_offset = to_u32(out.len(), "bundle")?;
        for composite in &composites {
            write_record(&mut out, composite)?;
        }

        (header.composite_list_offset, header.composite_list_length) =
            append(&mut out, &path_list::encode(&composite_names)?)?;

        let mut deferred = DeferredWrites::new();
        header.packet_table_offset = to_u32(out.len(), "bundle")?;
        for record in &records {
            let relative = record.offset;
            deferred.defer(out.len() + RECORD_OFFSET_FIELD, move |layout: &Layout| {
                layout.packet_bank_offset.checked_add(relative).ok_or_else(|| {
                    Error::encoding("bundle", "offsets and sizes are limited to 32 bits")
                })
            });
            write_record(&mut out, record)?;
        }

        header.auto_pool_table_offset = to_u32(out.len(), "bundle")?;
        for record in &auto_pool {
            write_record(&mut out, record)?;
        }

        header.atlas_table_offset = to_u32(out.len(), "bundle")?;
        let table_start = out.len();
        out.resize(table_start + atlas_before as usize * atlas_stride as usize, 0);
        for (_, id, before, record) in &atlas {
            let at = table_start + (before + id) as usize * atlas_stride as usize;
            record.write_with_stride(&mut &mut out[at..at + atlas_stride as usize], atlas_stride)?;
        }

        if version == 3 {
            let fallback = Description::default();
            let parts = description::write(manifest.description.as_ref().unwrap_or(&fallback))?;
            (header.description_groups_offset, _) = append(&mut out, &parts.groups)?;
            (header.description_resources_offset, _) = append(&mut out, &parts.resources)?;
            (header.description_strings_offset, _) = append(&mut out, &parts.strings)?;
        } else if manifest.description.is_some() {
            warn!(version, "only version 3 bundles store a description, ignoring it");
        }

        out.resize(out.len() + block_padding(out.len()), 0);

        let layout = Layout {
            packet_bank_offset: to_u32(out.len(), "bundle")?,
        };
        header.packet_bank_offset = layout.packet_bank_offset;
        if version >= 4 {
            header.packet_bank_offset_repeat = Some(layout.packet_bank_offset);
        }
        out.extend_from_slice(&bank);

        debug!(fields = deferred.len(), "resolving packet offsets");
        deferred.apply(&mut out, &layout)?;

        let header_size = bundle_header_size(version) as usize;
        header.write(&mut Cursor::new(&mut out[..header_size]))?;
        debug!(
            size = out.len(),
            packets = header.packet_count,
            atlas = header.atlas_count,
            "wrote bundle"
        );

        Ok(out)
    }
}

/// Append a region, returning its offset and length
fn append(out: &mut Vec<u8>, region: &[u8]) -> Result<(u32, u32)> {
    let offset = to_u32(out.len(), "bundle")?;
    out.extend_from_slice(region);
    Ok((offset, to_u32(region.len(), "bundle")?))
}

fn write_record<T>(out: &mut Vec<u8>, record: &T) -> Result<()>
where
    T: for<'b> BinWrite<Args<'b> = ()>,
{
    let end = out.len() as u64;
    let mut cursor = Cursor::new(out);
    cursor.set_position(end);
    record.write_le(&mut cursor)?;
    Ok(())
}

/// Composite slot of a packet: a decimal resolution and an empty or four letter locale
fn composite_slot(packet_index: u32, category: &[String; 2], owner: &str) -> Result<CompositeSlot> {
    let resolution = category[0].parse::<u32>().map_err(|_| {
        Error::encoding(
            owner,
            format!("resolution {:?} is not a number", category[0]),
        )
    })?;

    let locale = match category[1].as_bytes() {
        [] => [0; 4],
        &[a, b, c, d] if category[1].is_ascii() => [a, b, c, d],
        _ => {
            return Err(Error::encoding(
                owner,
                format!("locale {:?} has to be empty or 4 ASCII letters", category[1]),
            ))
        }
    };

    Ok(CompositeSlot {
        packet_index,
        resolution,
        locale,
    })
}

/// Check a packet against what the manifest claims about it
fn verify_packet(name: &str, expected: &PacketInfo, actual: &PacketInfo) -> Result<()> {
    if expected.version != actual.version {
        return Err(Error::consistency(name, "version", expected.version, actual.version));
    }
    if expected.compression_flags != actual.compression_flags {
        return Err(Error::consistency(
            name,
            "compression flags",
            expected.compression_flags,
            actual.compression_flags,
        ));
    }
    if expected.resources.len() != actual.resources.len() {
        return Err(Error::consistency(
            name,
            "resource count",
            expected.resources.len(),
            actual.resources.len(),
        ));
    }

    let mut listed = expected.resources.iter().collect::<Vec<_>>();
    let mut stored = actual.resources.iter().collect::<Vec<_>>();
    listed.sort_by_cached_key(|resource| resource.path.to_ascii_uppercase());
    stored.sort_by_cached_key(|resource| resource.path.to_ascii_uppercase());

    for (listed, stored) in listed.into_iter().zip(stored) {
        if !listed.path.eq_ignore_ascii_case(&stored.path) {
            return Err(Error::consistency(name, "resource path", &listed.path, &stored.path));
        }
        if listed.atlas.is_some() && stored.atlas.is_none() {
            return Err(Error::consistency(&listed.path, "section", "atlas", "plain"));
        }
        if let (Some(listed_atlas), Some(stored_atlas)) = (listed.atlas, stored.atlas) {
            for (field, expected, actual) in [
                ("atlas id", listed_atlas.id, stored_atlas.id),
                ("atlas width", listed_atlas.width, stored_atlas.width),
                ("atlas height", listed_atlas.height, stored_atlas.height),
            ] {
                if expected != actual {
                    return Err(Error::consistency(&listed.path, field, expected, actual));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::bundle::write::{composite_slot, verify_packet};
    use crate::compression::CompressionFlags;
    use crate::error::{ErrorKind, Result};
    use crate::manifest::{AtlasInfo, PacketInfo, ResourceInfo};

    #[test]
    fn composite_slot_categories() -> Result<()> {
        let slot = composite_slot(2, &["1536".into(), String::new()], "P")?;
        assert_eq!(slot.resolution, 1536);
        assert_eq!(slot.locale, [0; 4]);

        let slot = composite_slot(2, &["0".into(), "ENUS".into()], "P")?;
        assert_eq!(&slot.locale, b"ENUS");

        for category in [["x".to_string(), String::new()], ["0".into(), "EN".into()]] {
            let error = composite_slot(0, &category, "P").unwrap_err();
            assert_eq!(error.kind(), ErrorKind::EncodingConstraintViolation);
        }

        Ok(())
    }

    #[test]
    fn packet_must_match_the_manifest() -> Result<()> {
        let atlas = AtlasInfo {
            id: 0,
            width: 64,
            height: 64,
        };
        let stored = PacketInfo {
            version: 4,
            compression_flags: CompressionFlags::Both,
            resources: vec![
                ResourceInfo::plain("A.RTON"),
                ResourceInfo::atlas("B.PTX", atlas),
            ],
        };

        let mut listed = stored.clone();
        listed.resources.reverse();
        listed.resources[1].path = "a.rton".into();
        verify_packet("P", &listed, &stored)?;

        listed.resources[0].atlas = Some(AtlasInfo { width: 32, ..atlas });
        let error = verify_packet("P", &listed, &stored).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ConsistencyViolation);
        assert_eq!(
            error.to_string(),
            "B.PTX: atlas width mismatch, expected 32, found 64"
        );

        let listed = PacketInfo {
            compression_flags: CompressionFlags::PlainOnly,
            ..stored.clone()
        };
        let error = verify_packet("P", &listed, &stored).unwrap_err();
        assert_eq!(error.to_string(), "P: compression flags mismatch, expected 2, found 3");

        Ok(())
    }
}
