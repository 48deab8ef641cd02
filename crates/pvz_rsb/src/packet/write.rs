//! Types for writing RSG packets
//!

use std::io::{self, Cursor, Write};

use binrw::BinWrite;
use tracing::{debug, instrument, Level};

use crate::compression::{
    align_padding, block_padding, CompressionFlags, CompressionMethod, SectionWriter,
    EMPTY_SECTION_STREAM, SECTION_ALIGNMENT,
};
use crate::error::{Error, Result};
use crate::manifest::{AtlasInfo, PacketInfo};
use crate::packet::{PacketEntry, ResourceSource};
use crate::path_list;
use crate::types::{to_u32, PacketHeader, SectionDescriptor, PACKET_HEADER_SIZE};

#[derive(Debug)]
struct PendingFile {
    path: String,
    atlas: Option<AtlasInfo>,
    data: Vec<u8>,
}

/// RSG packet generator
///
/// Resources are buffered until [`PacketWriter::finish`] since the path list, which comes
/// first, orders them by path.
///
/// ```
/// # fn doit() -> pvz_rsb::error::Result<()>
/// # {
/// use std::io::Write;
/// use pvz_rsb::{CompressionFlags, PacketWriter};
///
/// let mut packet = PacketWriter::new(4, CompressionFlags::PlainOnly);
///
/// packet.start_file("PROPERTIES\\HELLO.TXT", None)?;
/// packet.write_all(b"Hello, World!")?;
///
/// let bytes = packet.finish()?;
/// assert_eq!(&bytes[..4], b"pgsr");
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
#[derive(Debug)]
pub struct PacketWriter {
    version: u32,
    flags: CompressionFlags,
    files: Vec<PendingFile>,
    writing_to_file: bool,
}

impl PacketWriter {
    /// Initializes the packet.
    ///
    /// Before writing to this object, the [`PacketWriter::start_file`] function should be called.
    pub fn new(version: u32, flags: CompressionFlags) -> PacketWriter {
        PacketWriter {
            version,
            flags,
            files: Vec::new(),
            writing_to_file: false,
        }
    }

    /// Build a packet from its metadata, reading every resource from `source`
    #[instrument(skip_all, err, fields(resources = info.resources.len()))]
    pub fn encode(info: &PacketInfo, source: &mut impl ResourceSource) -> Result<Vec<u8>> {
        let mut writer = PacketWriter::new(info.version, info.compression_flags);
        for resource in &info.resources {
            let data = source.read_resource(&resource.path)?;
            writer.add_file(&resource.path, resource.atlas, &data)?;
        }
        writer.finish()
    }

    /// Returns true if a file is currently open for writing.
    pub const fn is_writing_file(&self) -> bool {
        self.writing_to_file
    }

    /// Start a new resource, stored in the atlas section when `atlas` is set
    #[instrument(skip(self, path), err)]
    pub fn start_file(&mut self, path: impl ToString, atlas: Option<AtlasInfo>) -> Result<()> {
        self.files.push(PendingFile {
            path: path.to_string(),
            atlas,
            data: Vec::new(),
        });
        self.writing_to_file = true;
        Ok(())
    }

    /// Add a whole resource at once
    pub fn add_file(
        &mut self,
        path: impl ToString,
        atlas: Option<AtlasInfo>,
        data: &[u8],
    ) -> Result<()> {
        self.start_file(path, atlas)?;
        self.write_all(data)?;
        Ok(())
    }

    /// Lay out the sections and return the packet bytes
    #[instrument(skip(self), err)]
    pub fn finish(self) -> Result<Vec<u8>> {
        if !(3..=4).contains(&self.version) {
            return Err(Error::encoding(
                "packet",
                format!("unsupported version {}", self.version),
            ));
        }

        let mut files = self.files;
        files.sort_by_cached_key(|file| file.path.to_ascii_uppercase());

        let level = self.flags.level();
        let mut plain = SectionWriter::new(self.flags.plain(), level);
        let mut atlas = SectionWriter::new(self.flags.atlas(), level);

        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            let section = if file.atlas.is_some() {
                &mut atlas
            } else {
                &mut plain
            };
            let offset = to_u32(section.total_in(), &file.path)?;
            let size = to_u32(file.data.len(), &file.path)?;
            section.write_all(&file.data)?;
            section.write_all(&vec![0; align_padding(file.data.len())])?;

            entries.push(match file.atlas {
                Some(atlas) => PacketEntry::Atlas {
                    path: file.path,
                    offset,
                    size,
                    atlas,
                },
                None => PacketEntry::Plain {
                    path: file.path,
                    offset,
                    size,
                },
            });
        }

        let file_list = path_list::encode(&entries)?;

        let plain_raw = plain.total_in() as usize;
        let atlas_raw = atlas.total_in() as usize;
        let plain = plain.finalize()?;
        let atlas = atlas.finalize()?;

        let mut out = vec![0u8; PACKET_HEADER_SIZE as usize];
        out.extend_from_slice(&file_list);
        out.resize(out.len() + block_padding(out.len()), 0);

        let mut header = PacketHeader {
            version: self.version,
            compression_flags: self.flags.into(),
            data_offset: to_u32(out.len(), "packet")?,
            file_list_length: to_u32(file_list.len(), "packet")?,
            file_list_offset: PACKET_HEADER_SIZE,
            ..Default::default()
        };

        if plain_raw > 0 {
            header.plain = write_section(&mut out, plain, plain_raw, self.flags.plain())?;
        }
        if atlas_raw > 0 {
            if plain_raw == 0 {
                header.plain = write_placeholder(&mut out, self.flags.plain())?;
            }
            header.atlas = write_section(&mut out, atlas, atlas_raw, self.flags.atlas())?;
        } else {
            header.atlas = SectionDescriptor {
                offset: to_u32(out.len(), "packet")?,
                ..Default::default()
            };
        }

        header.write(&mut Cursor::new(&mut out[..PACKET_HEADER_SIZE as usize]))?;
        debug!(size = out.len(), plain = ?header.plain, atlas = ?header.atlas, "wrote packet");

        Ok(out)
    }
}

fn write_section(
    out: &mut Vec<u8>,
    stored: Vec<u8>,
    raw_size: usize,
    compression: CompressionMethod,
) -> Result<SectionDescriptor> {
    let offset = to_u32(out.len(), "packet")?;
    let stored_size = match compression {
        CompressionMethod::None => stored.len(),
        CompressionMethod::Zlib => stored.len() + block_padding(stored.len()),
    };
    out.extend_from_slice(&stored);
    out.resize(offset as usize + stored_size, 0);

    Ok(SectionDescriptor {
        offset,
        stored_size: to_u32(stored_size, "packet")?,
        raw_size: to_u32(raw_size, "packet")?,
    })
}

/// Plain section slot of a packet that only holds atlas resources
fn write_placeholder(out: &mut Vec<u8>, compression: CompressionMethod) -> Result<SectionDescriptor> {
    let offset = to_u32(out.len(), "packet")?;
    match compression {
        CompressionMethod::None => Ok(SectionDescriptor {
            offset,
            stored_size: 0,
            raw_size: 0,
        }),
        CompressionMethod::Zlib => {
            out.extend_from_slice(&EMPTY_SECTION_STREAM);
            out.resize(offset as usize + SECTION_ALIGNMENT, 0);
            Ok(SectionDescriptor {
                offset,
                stored_size: SECTION_ALIGNMENT as u32,
                raw_size: 0,
            })
        }
    }
}

impl Write for PacketWriter {
    #[instrument(skip_all, err, ret(level = Level::TRACE), fields(size = buf.len()))]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.files.last_mut() {
            Some(file) if self.writing_to_file => {
                file.data.extend_from_slice(buf);
                Ok(buf.len())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Other,
                "No file has been started",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::io::{Cursor, Write};

    use binrw::BinRead;
    use pretty_assertions::{assert_eq, assert_str_eq};
    use tracing_test::traced_test;

    use crate::compression::{has_zlib_magic, CompressionFlags, CompressionMethod};
    use crate::error::{ErrorKind, Result};
    use crate::manifest::AtlasInfo;
    use crate::packet::{PacketArchive, PacketWriter};
    use crate::types::{PacketHeader, SectionDescriptor};

    const ATLAS: AtlasInfo = AtlasInfo {
        id: 0,
        width: 8,
        height: 8,
    };

    #[traced_test]
    #[test]
    fn single_plain_resource_layout() -> Result<()> {
        let mut writer = PacketWriter::new(3, CompressionFlags::None);
        writer.add_file("a", None, b"hi")?;
        let data = writer.finish()?;

        #[rustfmt::skip]
        let file_list = vec![
            0x41, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x02, 0x00, 0x00, 0x00,
        ];
        assert_str_eq!(
            format!("{:02X?}", &data[0x5C..0x5C + file_list.len()]),
            format!("{:02X?}", file_list)
        );

        let header = PacketHeader::read(&mut Cursor::new(&data))?;
        assert_eq!(
            header,
            PacketHeader {
                version: 3,
                compression_flags: 0,
                data_offset: 0x1000,
                plain: SectionDescriptor {
                    offset: 0x1000,
                    stored_size: 0x1000,
                    raw_size: 0x1000,
                },
                atlas: SectionDescriptor {
                    offset: 0x2000,
                    stored_size: 0,
                    raw_size: 0,
                },
                file_list_length: 20,
                file_list_offset: 0x5C,
            }
        );
        assert_eq!(data.len(), 0x2000);
        assert_eq!(&data[0x1000..0x1002], b"hi");

        Ok(())
    }

    #[traced_test]
    #[test]
    fn compression_flag_matrix() -> Result<()> {
        let config = b"{\"key\": \"value\"}".repeat(40);
        let texture = vec![0x7Fu8; 8 * 8 * 4];

        for flags in [
            CompressionFlags::None,
            CompressionFlags::AtlasOnly,
            CompressionFlags::PlainOnly,
            CompressionFlags::Both,
        ] {
            let mut writer = PacketWriter::new(4, flags);
            writer.add_file("PROPERTIES\\CONFIG.JSON", None, &config)?;
            writer.add_file("IMAGES\\ATLAS.PTX", Some(ATLAS), &texture)?;
            let data = writer.finish()?;

            let header = PacketHeader::read(&mut Cursor::new(&data))?;
            let plain_at = &data[header.plain.offset as usize..];
            let atlas_at = &data[header.atlas.offset as usize..];
            assert_eq!(
                has_zlib_magic(plain_at),
                flags.plain() == CompressionMethod::Zlib
            );
            assert_eq!(
                has_zlib_magic(atlas_at),
                flags.atlas() == CompressionMethod::Zlib
            );

            let packet = PacketArchive::new(&data)?;
            assert_eq!(packet.compression_flags(), flags);
            assert_eq!(packet.by_name("PROPERTIES\\CONFIG.JSON")?.data(), &config[..]);
            assert_eq!(packet.by_name("IMAGES\\ATLAS.PTX")?.data(), &texture[..]);
            assert_eq!(packet.by_name("IMAGES\\ATLAS.PTX")?.atlas(), Some(ATLAS));
        }

        Ok(())
    }

    #[traced_test]
    #[test]
    fn atlas_only_packet_gets_plain_placeholder() -> Result<()> {
        let mut writer = PacketWriter::new(4, CompressionFlags::Both);
        writer.add_file("IMAGES\\ATLAS.PTX", Some(ATLAS), &[1; 256])?;
        let data = writer.finish()?;

        let header = PacketHeader::read(&mut Cursor::new(&data))?;
        assert_eq!(
            header.plain,
            SectionDescriptor {
                offset: header.data_offset,
                stored_size: 0x1000,
                raw_size: 0,
            }
        );
        let placeholder = header.plain.offset as usize;
        assert_str_eq!(
            format!("{:02X?}", &data[placeholder..placeholder + 8]),
            "[78, DA, 03, 00, 00, 00, 00, 01]"
        );
        assert_eq!(header.atlas.offset, header.data_offset + 0x1000);

        let mut writer = PacketWriter::new(4, CompressionFlags::AtlasOnly);
        writer.add_file("IMAGES\\ATLAS.PTX", Some(ATLAS), &[1; 256])?;
        let data = writer.finish()?;

        let header = PacketHeader::read(&mut Cursor::new(&data))?;
        assert_eq!(
            header.plain,
            SectionDescriptor {
                offset: header.data_offset,
                stored_size: 0,
                raw_size: 0,
            }
        );
        assert_eq!(header.atlas.offset, header.data_offset);
        assert_eq!(PacketArchive::new(&data)?.by_index(0)?.data(), &[1; 256]);

        Ok(())
    }

    #[traced_test]
    #[test]
    fn encode_decode_encode_is_stable() -> Result<()> {
        let mut writer = PacketWriter::new(4, CompressionFlags::Both);
        writer.add_file("B.RTON", None, b"second")?;
        writer.add_file("A.RTON", None, b"first")?;
        writer.add_file("IMAGES\\A.PTX", Some(ATLAS), &[9; 300])?;
        let data = writer.finish()?;

        let packet = PacketArchive::new(&data)?;
        let mut source = HashMap::new();
        for file in (0..packet.len()).map(|i| packet.by_index(i)) {
            let file = file?;
            source.insert(file.name().to_string(), file.data().to_vec());
        }

        let rebuilt = PacketWriter::encode(&packet.info(), &mut source)?;
        assert_eq!(rebuilt, data);

        Ok(())
    }

    #[traced_test]
    #[test]
    fn case_only_duplicates_are_rejected() -> Result<()> {
        let mut writer = PacketWriter::new(4, CompressionFlags::None);
        writer.add_file("a.txt", None, b"1")?;
        writer.add_file("A.TXT", None, b"2")?;

        let error = writer.finish().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::EncodingConstraintViolation);

        Ok(())
    }

    #[test]
    fn write_without_file_fails() {
        let mut writer = PacketWriter::new(4, CompressionFlags::None);
        assert!(!writer.is_writing_file());
        assert!(writer.write_all(b"data").is_err());
    }
}
