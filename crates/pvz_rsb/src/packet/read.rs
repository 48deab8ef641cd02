//! Types for reading RSG packets
//!

use std::fmt::{self, Debug};
use std::io::{Cursor, Read};

use binrw::BinRead;
use indexmap::IndexMap;
use tracing::{debug, instrument};

use crate::compression::{has_zlib_magic, CompressionFlags, CompressionMethod, SectionReader};
use crate::error::{Error, Result};
use crate::manifest::{AtlasInfo, PacketInfo, ResourceInfo};
use crate::packet::{read_entry, PacketEntry};
use crate::path_list;
use crate::types::{PacketHeader, SectionDescriptor};

/// A resource extracted from a packet
pub struct PacketFile<'a> {
    entry: &'a PacketEntry,
    data: &'a [u8],
    reader: &'a [u8],
}

impl Debug for PacketFile<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PacketFile({:#?})", self.entry)
    }
}

impl<'a> PacketFile<'a> {
    /// Get the path of the resource
    ///
    /// # Warnings
    ///
    /// The path comes straight from the packet and uses `\` separators. It may be absolute or
    /// contain `..` components, see [`crate::fs::resource_path`] before writing it to disk.
    pub fn name(&self) -> &'a str {
        self.entry.path()
    }

    /// The whole content of the resource
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Size of the resource in bytes
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Atlas id and dimensions, for atlas resources
    pub fn atlas(&self) -> Option<AtlasInfo> {
        self.entry.atlas()
    }

    /// The listing of this resource
    pub fn entry(&self) -> &'a PacketEntry {
        self.entry
    }
}

impl Read for PacketFile<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

/// Entries of one decode call, split by section
#[derive(Debug, Default)]
struct EntryLists {
    plain: Vec<PacketEntry>,
    atlas: Vec<PacketEntry>,
}

impl EntryLists {
    fn push(&mut self, entry: PacketEntry) {
        if entry.is_atlas() {
            self.atlas.push(entry);
        } else {
            self.plain.push(entry);
        }
    }

    /// Plain entries first, keyed by upper-cased path
    fn into_map(self) -> Result<IndexMap<String, PacketEntry>> {
        let mut entries = IndexMap::with_capacity(self.plain.len() + self.atlas.len());
        for entry in self.plain.into_iter().chain(self.atlas) {
            let key = entry.path().to_ascii_uppercase();
            if let Some(existing) = entries.get(&key) {
                return Err(Error::consistency(
                    entry.path(),
                    "resource path",
                    format!("a single entry ignoring case, already listed as {}", PacketEntry::path(existing)),
                    "a second one",
                ));
            }
            entries.insert(key, entry);
        }
        Ok(entries)
    }
}

/// RSG packet reader
///
/// ```no_run
/// fn list_packet_contents(data: &[u8]) -> pvz_rsb::error::Result<()> {
///     let packet = pvz_rsb::PacketArchive::new(data)?;
///
///     for i in 0..packet.len() {
///         let file = packet.by_index(i)?;
///         println!("{}: {} bytes", file.name(), file.size());
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct PacketArchive {
    header: PacketHeader,
    flags: CompressionFlags,
    entries: IndexMap<String, PacketEntry>,
    plain: Vec<u8>,
    atlas: Vec<u8>,
}

impl PacketArchive {
    /// Read a packet, decompressing its sections
    #[instrument(skip_all, err)]
    pub fn new(data: &[u8]) -> Result<PacketArchive> {
        let (header, flags) = read_header(data)?;
        let entries = read_entries(data, &header)?;

        let plain = if entries.values().any(|entry| !entry.is_atlas()) {
            load_section(data, &header.plain, flags.plain(), "plain section")?
        } else {
            Vec::new()
        };
        let atlas = if entries.values().any(PacketEntry::is_atlas) {
            load_section(data, &header.atlas, flags.atlas(), "atlas section")?
        } else {
            Vec::new()
        };

        for entry in entries.values() {
            let (section, table, descriptor) = if entry.is_atlas() {
                (&atlas, "atlas section", &header.atlas)
            } else {
                (&plain, "plain section", &header.plain)
            };
            let end = entry.offset() as u64 + entry.size() as u64;
            if end > section.len() as u64 {
                return Err(Error::format(
                    table,
                    descriptor.offset as u64,
                    format!(
                        "{} ends at {end:#x} past the section ({:#x} bytes)",
                        entry.path(),
                        section.len()
                    ),
                ));
            }
        }

        debug!(
            version = header.version,
            flags = %flags,
            resources = entries.len(),
            "read packet"
        );

        Ok(PacketArchive {
            header,
            flags,
            entries,
            plain,
            atlas,
        })
    }

    /// Read the header and resource listing of a packet without touching its sections
    #[instrument(skip_all, err)]
    pub fn read_info(data: &[u8]) -> Result<PacketInfo> {
        Ok(read_listing(data)?.1)
    }

    /// The packet header
    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    /// Packet format version
    pub fn version(&self) -> u32 {
        self.header.version
    }

    /// Which sections were compressed
    pub fn compression_flags(&self) -> CompressionFlags {
        self.flags
    }

    /// Number of resources in this packet
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether this packet contains no resources
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns an iterator over all resource paths, plain resources first
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(PacketEntry::path)
    }

    /// Returns an iterator over the listing of every resource
    pub fn entries(&self) -> impl Iterator<Item = &PacketEntry> {
        self.entries.values()
    }

    /// Get the index of a resource by path, ignoring case
    pub fn index_for_name(&self, name: &str) -> Option<usize> {
        self.entries.get_index_of(&name.to_ascii_uppercase())
    }

    /// Search for a resource by path, ignoring case
    pub fn by_name(&self, name: &str) -> Result<PacketFile<'_>> {
        let Some(index) = self.index_for_name(name) else {
            return Err(Error::CustomError(format!("packet has no resource {name}")));
        };
        self.by_index(index)
    }

    /// Get a resource by index
    pub fn by_index(&self, index: usize) -> Result<PacketFile<'_>> {
        let (_, entry) = self.entries.get_index(index).ok_or_else(|| {
            Error::CustomError(format!(
                "resource index {index} is out of range ({} resources)",
                self.len()
            ))
        })?;

        let section = if entry.is_atlas() {
            &self.atlas
        } else {
            &self.plain
        };
        let start = entry.offset() as usize;
        let data = &section[start..start + entry.size() as usize];

        Ok(PacketFile {
            entry,
            data,
            reader: data,
        })
    }

    /// Metadata of this packet
    pub fn info(&self) -> PacketInfo {
        info_from(self.header.version, self.flags, self.entries.values())
    }
}

fn info_from<'a>(
    version: u32,
    flags: CompressionFlags,
    entries: impl Iterator<Item = &'a PacketEntry>,
) -> PacketInfo {
    PacketInfo {
        version,
        compression_flags: flags,
        resources: entries
            .map(|entry| ResourceInfo {
                path: entry.path().to_string(),
                atlas: entry.atlas(),
                atlas_properties: None,
            })
            .collect(),
    }
}

/// Read and check the fixed header
pub(crate) fn read_header(data: &[u8]) -> Result<(PacketHeader, CompressionFlags)> {
    let header = PacketHeader::read(&mut Cursor::new(data))
        .map_err(|e| Error::from(e).in_table("packet header", 0))?;

    if !(3..=4).contains(&header.version) {
        return Err(Error::format(
            "packet header",
            4,
            format!("unsupported version {}", header.version),
        ));
    }

    let flags = CompressionFlags::try_from(header.compression_flags).map_err(|_| {
        Error::format(
            "packet header",
            0x10,
            format!("compression flags {} out of range", header.compression_flags),
        )
    })?;

    Ok((header, flags))
}

/// Read the header and the resource listing
pub(crate) fn read_listing(data: &[u8]) -> Result<(PacketHeader, PacketInfo)> {
    let (header, flags) = read_header(data)?;
    let entries = read_entries(data, &header)?;
    let info = info_from(header.version, flags, entries.values());
    Ok((header, info))
}

fn read_entries(data: &[u8], header: &PacketHeader) -> Result<IndexMap<String, PacketEntry>> {
    let mut lists = EntryLists::default();
    for listed in path_list::decode(
        data,
        header.file_list_offset as u64,
        header.file_list_length as u64,
        "packet file list",
        read_entry,
    )? {
        lists.push(listed.value.with_path(listed.path));
    }
    lists.into_map()
}

/// Get the decompressed bytes of a section.
///
/// A section flagged as compressed whose first bytes are not a zlib header is read as stored.
fn load_section(
    data: &[u8],
    section: &SectionDescriptor,
    compression: CompressionMethod,
    table: &'static str,
) -> Result<Vec<u8>> {
    let start = section.offset as usize;
    let head = data.get(start..).unwrap_or(&[]);

    let compression = match compression {
        CompressionMethod::Zlib if has_zlib_magic(head) => CompressionMethod::Zlib,
        _ => CompressionMethod::None,
    };
    let len = match compression {
        CompressionMethod::Zlib => section.stored_size,
        CompressionMethod::None => section.raw_size,
    } as usize;

    let stored = data.get(start..start + len).ok_or_else(|| {
        Error::format(
            table,
            start as u64,
            format!("{len} bytes do not fit in the packet ({} bytes)", data.len()),
        )
    })?;

    let bytes = SectionReader::new(stored, compression)
        .into_bytes(section.raw_size as usize)
        .map_err(|e| Error::format(table, start as u64, e.to_string()))?;
    debug!(table, ?compression, size = bytes.len(), "loaded section");

    Ok(bytes)
}
