//! Section compression and decompression handling.

use std::fmt;
use std::io::{self, Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::{Error, Result};

/// Alignment of every data section and of the packet bank
pub const SECTION_ALIGNMENT: usize = 4096;

/// Header bytes a zlib stream may start with
pub const ZLIB_MAGICS: [[u8; 2]; 4] = [[0x78, 0x01], [0x78, 0x5E], [0x78, 0x9C], [0x78, 0xDA]];

/// Start of the placeholder plain section: an empty zlib stream
pub(crate) const EMPTY_SECTION_STREAM: [u8; 8] = [0x78, 0xDA, 0x03, 0x00, 0x00, 0x00, 0x00, 0x01];

/// Identifies how a single data section inside an RSG packet is stored
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Stores the data as it is
    None,

    /// Compress the data using Zlib
    #[default]
    Zlib,
}

/// The `compressionFlags` field of a packet header
///
/// Selects independently whether the plain section and the atlas section are compressed.
///
/// | value | plain | atlas |
/// |-------|-------|-------|
/// | 0     | no    | no    |
/// | 1     | no    | yes   |
/// | 2     | yes   | no    |
/// | 3     | yes   | yes   |
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
#[serde(try_from = "u32", into = "u32")]
pub enum CompressionFlags {
    /// Neither section is compressed
    None = 0,
    /// Only the atlas section is compressed
    AtlasOnly = 1,
    /// Only the plain section is compressed
    PlainOnly = 2,
    /// Both sections are compressed
    #[default]
    Both = 3,
}

impl CompressionFlags {
    /// Build the flags from the method of each section
    pub fn from_sections(plain: CompressionMethod, atlas: CompressionMethod) -> Self {
        match (plain, atlas) {
            (CompressionMethod::None, CompressionMethod::None) => CompressionFlags::None,
            (CompressionMethod::None, CompressionMethod::Zlib) => CompressionFlags::AtlasOnly,
            (CompressionMethod::Zlib, CompressionMethod::None) => CompressionFlags::PlainOnly,
            (CompressionMethod::Zlib, CompressionMethod::Zlib) => CompressionFlags::Both,
        }
    }

    /// How the plain section is stored
    pub fn plain(self) -> CompressionMethod {
        match self {
            CompressionFlags::PlainOnly | CompressionFlags::Both => CompressionMethod::Zlib,
            _ => CompressionMethod::None,
        }
    }

    /// How the atlas section is stored
    pub fn atlas(self) -> CompressionMethod {
        match self {
            CompressionFlags::AtlasOnly | CompressionFlags::Both => CompressionMethod::Zlib,
            _ => CompressionMethod::None,
        }
    }

    /// The zlib level used when writing sections with these flags
    pub fn level(self) -> Compression {
        match self {
            CompressionFlags::Both => Compression::best(),
            _ => Compression::default(),
        }
    }
}

impl TryFrom<u32> for CompressionFlags {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(CompressionFlags::None),
            1 => Ok(CompressionFlags::AtlasOnly),
            2 => Ok(CompressionFlags::PlainOnly),
            3 => Ok(CompressionFlags::Both),
            other => Err(Error::CustomError(format!(
                "compression flags must be between 0 and 3, got {other}"
            ))),
        }
    }
}

impl From<CompressionFlags> for u32 {
    fn from(value: CompressionFlags) -> Self {
        value as u32
    }
}

impl fmt::Display for CompressionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u32::from(*self))
    }
}

/// Whether `data` starts with one of the [`ZLIB_MAGICS`]
pub fn has_zlib_magic(data: &[u8]) -> bool {
    data.len() >= 2 && ZLIB_MAGICS.iter().any(|magic| data[..2] == magic[..])
}

/// Zero bytes written after a region so the next one starts on the following 4096 boundary.
///
/// A region that already ends on a boundary is still followed by a whole block.
pub(crate) fn block_padding(len: usize) -> usize {
    SECTION_ALIGNMENT - len % SECTION_ALIGNMENT
}

/// Zero bytes needed to round `len` up to a multiple of 4096
pub(crate) fn align_padding(len: usize) -> usize {
    (SECTION_ALIGNMENT - len % SECTION_ALIGNMENT) % SECTION_ALIGNMENT
}

pub(crate) enum SectionReader<'a> {
    Raw(&'a [u8]),
    Compressed(Box<ZlibDecoder<&'a [u8]>>),
}

impl<'a> SectionReader<'a> {
    pub fn new(stored: &'a [u8], compression: CompressionMethod) -> Self {
        match compression {
            CompressionMethod::None => SectionReader::Raw(stored),
            CompressionMethod::Zlib => SectionReader::Compressed(Box::new(ZlibDecoder::new(stored))),
        }
    }

    /// Read the whole section
    #[instrument(skip(self), err)]
    pub fn into_bytes(mut self, size_hint: usize) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(size_hint);
        self.read_to_end(&mut buffer)?;
        Ok(buffer)
    }
}

impl Read for SectionReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SectionReader::Raw(r) => r.read(buf),
            SectionReader::Compressed(r) => r.read(buf),
        }
    }

    fn read_to_end(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        match self {
            SectionReader::Raw(r) => r.read_to_end(buf),
            SectionReader::Compressed(r) => r.read_to_end(buf),
        }
    }
}

pub(crate) enum SectionWriter {
    Raw(Vec<u8>),
    Compressed(Box<ZlibEncoder<Vec<u8>>>),
}

impl SectionWriter {
    pub fn new(compression: CompressionMethod, level: Compression) -> Self {
        match compression {
            CompressionMethod::None => SectionWriter::Raw(Vec::new()),
            CompressionMethod::Zlib => {
                SectionWriter::Compressed(Box::new(ZlibEncoder::new(Vec::new(), level)))
            }
        }
    }

    #[instrument(skip(self), err)]
    pub fn finalize(self) -> io::Result<Vec<u8>> {
        match self {
            SectionWriter::Raw(r) => Ok(r),
            SectionWriter::Compressed(r) => r.finish(),
        }
    }

    pub fn total_in(&self) -> u64 {
        match self {
            SectionWriter::Raw(r) => r.len() as u64,
            SectionWriter::Compressed(r) => r.total_in(),
        }
    }
}

impl Write for SectionWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            SectionWriter::Raw(r) => r.write(buf),
            SectionWriter::Compressed(r) => r.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            SectionWriter::Raw(r) => r.flush(),
            SectionWriter::Compressed(r) => r.flush(),
        }
    }
}
