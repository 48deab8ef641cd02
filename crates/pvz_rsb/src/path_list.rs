//! Shared-prefix path lists
//!
//! Bundles store three path lists (files, packets, composites) and every packet stores one for
//! its resources. A list is the depth-first serialization of a trie of upper-cased paths. Each
//! character is a 4 byte record: the character itself followed by a 24-bit little endian link.
//! A non-zero link points, in 4 byte units from the start of the region, at the place where a
//! sibling branch continues after the prefix that was current when the link was read. A `0x00`
//! character ends a path and is followed by a record describing the path's owner.
//!
//! | Offset | Size | Field                                        |
//! |--------|------|----------------------------------------------|
//! | 0x00   | 1    | Character, `0x00` ends the path              |
//! | 0x01   | 3    | Link to the next sibling, in 4 byte units    |
//! | 0x04   | n    | After a `0x00`: owner record (pool index...) |

use std::io::{self, Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{instrument, trace};

use crate::error::{Error, Result};

/// Largest link that fits the 24-bit field
const MAX_LINK: usize = 0xFF_FFFF;

/// One decoded path and the record following its terminator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathListEntry<T> {
    /// Upper-cased path
    pub path: String,
    /// Owner record
    pub value: T,
}

/// Decode the path list stored at `offset..offset + length` in `data`.
///
/// `read_value` reads the record following each terminator. Entries are returned in stream order.
#[instrument(skip(data, read_value), err)]
pub fn decode<T, F>(
    data: &[u8],
    offset: u64,
    length: u64,
    table: &'static str,
    mut read_value: F,
) -> Result<Vec<PathListEntry<T>>>
where
    F: FnMut(&mut Cursor<&[u8]>) -> io::Result<T>,
{
    let end = offset + length;
    if end > data.len() as u64 {
        return Err(Error::format(
            table,
            offset,
            format!("region ends at {end:#x} past the end of the data ({:#x})", data.len()),
        ));
    }

    let mut cursor = Cursor::new(&data[..end as usize]);
    cursor.set_position(offset);

    let mut prefix = String::new();
    let mut pending: Vec<(String, u64)> = Vec::new();
    let mut entries = Vec::new();

    while cursor.position() < end {
        let at = cursor.position();
        let character = cursor.read_u8().map_err(|e| Error::from(e).in_table(table, at))?;
        let link = cursor
            .read_u24::<LittleEndian>()
            .map_err(|e| Error::from(e).in_table(table, at))? as u64
            * 4;

        if character == 0 {
            if link != 0 {
                pending.push((prefix.clone(), link));
            }

            let value = read_value(&mut cursor).map_err(|e| Error::from(e).in_table(table, at))?;
            trace!(path = %prefix, "path list entry");
            entries.push(PathListEntry {
                path: prefix.clone(),
                value,
            });

            let here = cursor.position();
            if let Some(index) = pending.iter().position(|(_, link)| offset + link == here) {
                prefix = pending.remove(index).0;
            }
        } else {
            if link != 0 {
                pending.push((prefix.clone(), link));
            }
            prefix.push(char::from(character));
        }
    }

    if cursor.position() != end {
        return Err(Error::format(
            table,
            cursor.position(),
            format!("region should end at {end:#x}"),
        ));
    }

    Ok(entries)
}

/// Decode a list whose owner record is a pool index, ordered by pool index
pub fn decode_pool_list(
    data: &[u8],
    offset: u64,
    length: u64,
    table: &'static str,
) -> Result<Vec<PathListEntry<u32>>> {
    let mut entries = decode(data, offset, length, table, |cursor| {
        cursor.read_u32::<LittleEndian>()
    })?;
    entries.sort_by_key(|entry| entry.value);
    Ok(entries)
}

/// Something that can be stored in a path list
pub trait PathRecord {
    /// Path of the record, stored upper-cased
    fn path(&self) -> &str;

    /// Bytes written by [`PathRecord::write_value`], a multiple of 4
    fn value_len(&self) -> usize;

    /// Write the owner record following the path terminator
    fn write_value(&self, out: &mut Vec<u8>) -> Result<()>;
}

/// A path with a pool index as its owner record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolPath {
    /// Path of the entry
    pub path: String,
    /// Pool index written after it
    pub pool_index: u32,
}

impl PoolPath {
    /// Create a new entry
    pub fn new(path: impl Into<String>, pool_index: u32) -> Self {
        Self {
            path: path.into(),
            pool_index,
        }
    }
}

impl PathRecord for PoolPath {
    fn path(&self) -> &str {
        &self.path
    }

    fn value_len(&self) -> usize {
        4
    }

    fn write_value(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.pool_index.to_le_bytes());
        Ok(())
    }
}

struct Backlink {
    /// Byte position the link points at
    target: usize,
    /// Character of the suffix carrying the link
    index: usize,
}

struct Suffix<'a, R> {
    path: &'a str,
    depth: usize,
    owner: &'a R,
    backlinks: Vec<Backlink>,
}

fn shared_prefix(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(a, b)| a == b).count()
}

/// Sort records the way [`encode`] stores them
pub fn sort_records<R: PathRecord>(records: &mut [R]) {
    records.sort_by_cached_key(|record| record.path().to_ascii_uppercase());
}

/// Encode `records` into a path list.
///
/// Paths are upper-cased and sorted. Non-ASCII, empty and duplicate paths are rejected, two paths
/// differing only by case count as duplicates.
#[instrument(skip_all, err)]
pub fn encode<R: PathRecord>(records: &[R]) -> Result<Vec<u8>> {
    let mut sorted = records
        .iter()
        .map(|record| {
            let path = record.path();
            if path.is_empty() {
                return Err(Error::encoding("path list", "empty paths cannot be stored"));
            }
            if !path.is_ascii() {
                return Err(Error::encoding(path, "paths have to be ASCII"));
            }
            Ok((path.to_ascii_uppercase(), record))
        })
        .collect::<Result<Vec<_>>>()?;
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut suffixes: Vec<Suffix<R>> = Vec::with_capacity(sorted.len());
    let mut previous = "";
    let mut position = 0usize;
    for (path, owner) in &sorted {
        if path == previous {
            return Err(Error::encoding(
                owner.path(),
                "duplicate path, paths are compared ignoring case",
            ));
        }

        let depth = shared_prefix(previous, path);
        if let Some(parent) = suffixes.iter_mut().rev().find(|s| s.depth <= depth) {
            parent.backlinks.push(Backlink {
                target: position,
                index: depth - parent.depth,
            });
        }

        position += (path.len() - depth + 1) * 4 + owner.value_len();
        suffixes.push(Suffix {
            path: path.as_str(),
            depth,
            owner: *owner,
            backlinks: Vec::new(),
        });
        previous = path.as_str();
    }

    let mut out = Vec::with_capacity(position);
    for suffix in &suffixes {
        let begin = out.len();
        for &character in &suffix.path.as_bytes()[suffix.depth..] {
            out.extend_from_slice(&[character, 0, 0, 0]);
        }
        out.extend_from_slice(&[0; 4]);

        for link in &suffix.backlinks {
            let units = link.target / 4;
            if units > MAX_LINK {
                return Err(Error::encoding(
                    suffix.path,
                    "path list is too large for its 24-bit links",
                ));
            }
            let at = begin + link.index * 4 + 1;
            out[at..at + 3].copy_from_slice(&(units as u32).to_le_bytes()[..3]);
        }

        suffix.owner.write_value(&mut out)?;
    }

    Ok(out)
}

/// Reads `len` bytes, used by owner records with reserved fields
pub(crate) fn skip(cursor: &mut Cursor<&[u8]>, len: usize) -> io::Result<()> {
    let mut reserved = vec![0u8; len];
    cursor.read_exact(&mut reserved)
}
