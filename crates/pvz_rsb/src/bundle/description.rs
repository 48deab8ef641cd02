//! Description section of version 3 bundles
//!
//! Three consecutive parts: group records, resource records and a pool of NUL terminated
//! strings referenced by offset from the other two.
//!
//! Group record:
//!
//! | Size | Field                                   |
//! |------|-----------------------------------------|
//! | 4    | Group id (string offset)                |
//! | 4    | Subgroup count                          |
//! | 4    | Always 0x10                             |
//! | n    | Subgroups                               |
//!
//! Subgroup: resolution, 4 byte language, id (string offset), resource count, then one offset
//! into the resource part per resource.
//!
//! Resource record:
//!
//! | Size | Field                                   |
//! |------|-----------------------------------------|
//! | 4    | Always 0                                |
//! | 2    | Type                                    |
//! | 2    | Always 0x1C, the size of this header    |
//! | 4    | End of the atlas block                  |
//! | 4    | Start of the atlas block                |
//! | 4    | Resource id (string offset)             |
//! | 4    | Path (string offset)                    |
//! | 4    | Property count                          |
//! | 24   | Atlas block, type 0 only                |
//! | 12n  | Properties: key, 0, value               |

use std::collections::HashMap;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::types::{to_u32, BundleHeader, COMPOSITE_SHELL_SUFFIX};

const GROUP_MARKER: u32 = 0x10;
const RESOURCE_HEADER_LEN: u16 = 0x1C;

/// Groups keyed by id
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct Description {
    /// Groups in stored order
    pub groups: IndexMap<String, DescriptionGroup>,
}

/// Subgroups of a group, keyed by id
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct DescriptionGroup {
    /// Whether the id lacks the `_CompositeShell` suffix, ignored when writing
    pub composite: bool,
    /// Subgroups in stored order
    pub subgroups: IndexMap<String, DescriptionSubgroup>,
}

/// Resources of a subgroup, keyed by id
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct DescriptionSubgroup {
    /// Texture resolution
    pub resolution: u32,
    /// Locale, empty for none
    pub language: String,
    /// Resources in stored order
    pub resources: IndexMap<String, DescriptionResource>,
}

/// A described resource
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct DescriptionResource {
    /// Resource type, 0 for images
    #[serde(rename = "type")]
    pub kind: u16,
    /// Path of the resource
    pub path: String,
    /// Placement of an image inside its atlas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atlas: Option<DescriptionAtlas>,
    /// Free form properties
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

/// Placement of an image inside its atlas
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DescriptionAtlas {
    pub image_type: u16,
    pub flags: u16,
    pub x: u16,
    pub y: u16,
    pub ax: u16,
    pub ay: u16,
    pub aw: u16,
    pub ah: u16,
    pub rows: u16,
    pub cols: u16,
    /// Id of the atlas image
    pub parent: String,
}

impl Default for DescriptionAtlas {
    fn default() -> Self {
        Self {
            image_type: 0,
            flags: 0,
            x: 0,
            y: 0,
            ax: 0,
            ay: 0,
            aw: 0,
            ah: 0,
            rows: 1,
            cols: 1,
            parent: String::new(),
        }
    }
}

struct Reader<'a> {
    cursor: Cursor<&'a [u8]>,
    table: &'static str,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], position: u64, table: &'static str) -> Self {
        let mut cursor = Cursor::new(data);
        cursor.set_position(position);
        Self { cursor, table }
    }

    fn position(&self) -> u64 {
        self.cursor.position()
    }

    fn u16(&mut self) -> Result<u16> {
        let at = self.position();
        self.cursor
            .read_u16::<LittleEndian>()
            .map_err(|e| Error::from(e).in_table(self.table, at))
    }

    fn u32(&mut self) -> Result<u32> {
        let at = self.position();
        self.cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::from(e).in_table(self.table, at))
    }

    fn expect_u32(&mut self, expected: u32, what: &str) -> Result<()> {
        let at = self.position();
        let actual = self.u32()?;
        if actual != expected {
            return Err(Error::format(
                self.table,
                at,
                format!("{what} should be {expected:#x}, found {actual:#x}"),
            ));
        }
        Ok(())
    }
}

struct Strings<'a> {
    data: &'a [u8],
    base: u64,
}

impl Strings<'_> {
    fn get(&self, offset: u32) -> Result<String> {
        let start = self.base + offset as u64;
        let tail = self
            .data
            .get(start as usize..)
            .ok_or_else(|| Error::format("description strings", start, "offset past the end"))?;
        let end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::format("description strings", start, "unterminated string"))?;
        Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
    }
}

/// Read the description section pointed to by `header`
#[instrument(skip_all, err)]
pub fn read(data: &[u8], header: &BundleHeader) -> Result<Description> {
    let resources_at = header.description_resources_offset as u64;
    let strings = Strings {
        data,
        base: header.description_strings_offset as u64,
    };

    let mut reader = Reader::new(data, header.description_groups_offset as u64, "description groups");
    let mut groups = IndexMap::new();
    while reader.position() < resources_at {
        let id = strings.get(reader.u32()?)?;
        let subgroup_count = reader.u32()?;
        reader.expect_u32(GROUP_MARKER, "group marker")?;

        let mut subgroups = IndexMap::new();
        for _ in 0..subgroup_count {
            let resolution = reader.u32()?;
            let language = reader.u32()?.to_le_bytes();
            let language = String::from_utf8_lossy(&language).replace('\0', "");
            let subgroup_id = strings.get(reader.u32()?)?;

            let resource_count = reader.u32()?;
            let mut resources = IndexMap::new();
            for _ in 0..resource_count {
                let offset = reader.u32()?;
                let (resource_id, resource) = read_resource(data, resources_at + offset as u64, &strings)?;
                resources.insert(resource_id, resource);
            }

            subgroups.insert(
                subgroup_id,
                DescriptionSubgroup {
                    resolution,
                    language,
                    resources,
                },
            );
        }

        groups.insert(
            id.clone(),
            DescriptionGroup {
                composite: !id.ends_with(COMPOSITE_SHELL_SUFFIX),
                subgroups,
            },
        );
    }

    if reader.position() != resources_at {
        return Err(Error::format(
            "description groups",
            reader.position(),
            format!("region should end at {resources_at:#x}"),
        ));
    }

    debug!(groups = groups.len(), "read description");
    Ok(Description { groups })
}

fn read_resource(data: &[u8], at: u64, strings: &Strings) -> Result<(String, DescriptionResource)> {
    let mut reader = Reader::new(data, at, "description resources");
    reader.expect_u32(0, "resource record start")?;
    let kind = reader.u16()?;
    let header_at = reader.position();
    let header_len = reader.u16()?;
    if header_len != RESOURCE_HEADER_LEN {
        return Err(Error::format(
            "description resources",
            header_at,
            format!("resource header length should be 0x1c, found {header_len:#x}"),
        ));
    }

    let atlas_end = reader.u32()?;
    let atlas_begin = reader.u32()?;
    let id = strings.get(reader.u32()?)?;
    let path = strings.get(reader.u32()?)?;
    let property_count = reader.u32()?;

    let atlas = if atlas_end != 0 && atlas_begin != 0 {
        Some(DescriptionAtlas {
            image_type: reader.u16()?,
            flags: reader.u16()?,
            x: reader.u16()?,
            y: reader.u16()?,
            ax: reader.u16()?,
            ay: reader.u16()?,
            aw: reader.u16()?,
            ah: reader.u16()?,
            rows: reader.u16()?,
            cols: reader.u16()?,
            parent: strings.get(reader.u32()?)?,
        })
    } else {
        None
    };

    let mut properties = IndexMap::new();
    for _ in 0..property_count {
        let key = strings.get(reader.u32()?)?;
        reader.expect_u32(0, "property separator")?;
        let value = strings.get(reader.u32()?)?;
        properties.insert(key, value);
    }

    Ok((
        id,
        DescriptionResource {
            kind,
            path,
            atlas,
            properties,
        },
    ))
}

/// Content addressed string storage, the empty string lives at offset 0
struct StringPool {
    data: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl StringPool {
    fn new() -> Self {
        Self {
            data: vec![0],
            offsets: HashMap::from([(String::new(), 0)]),
        }
    }

    fn intern(&mut self, value: &str) -> Result<u32> {
        if let Some(&offset) = self.offsets.get(value) {
            return Ok(offset);
        }
        if value.contains('\0') {
            return Err(Error::encoding(value, "description strings cannot contain NUL"));
        }

        let offset = to_u32(self.data.len(), value)?;
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        self.offsets.insert(value.to_string(), offset);
        Ok(offset)
    }
}

/// The three parts of an encoded description section
#[derive(Debug, Default)]
pub(crate) struct DescriptionParts {
    pub groups: Vec<u8>,
    pub resources: Vec<u8>,
    pub strings: Vec<u8>,
}

fn language_tag(language: &str) -> Result<[u8; 4]> {
    if language.is_empty() {
        return Ok([0; 4]);
    }
    if !language.is_ascii() {
        return Err(Error::encoding(language, "languages have to be ASCII"));
    }

    let mut tag = [b' '; 4];
    for (slot, byte) in tag.iter_mut().zip(language.bytes()) {
        *slot = byte;
    }
    Ok(tag)
}

/// Encode a description section
#[instrument(skip_all, err)]
pub(crate) fn write(description: &Description) -> Result<DescriptionParts> {
    let mut pool = StringPool::new();
    let mut groups = Vec::new();
    let mut resources = Vec::new();

    for (group_id, group) in &description.groups {
        groups.write_u32::<LittleEndian>(pool.intern(group_id)?)?;
        groups.write_u32::<LittleEndian>(to_u32(group.subgroups.len(), group_id)?)?;
        groups.write_u32::<LittleEndian>(GROUP_MARKER)?;

        for (subgroup_id, subgroup) in &group.subgroups {
            groups.write_u32::<LittleEndian>(subgroup.resolution)?;
            groups.extend_from_slice(&language_tag(&subgroup.language)?);
            groups.write_u32::<LittleEndian>(pool.intern(subgroup_id)?)?;
            groups.write_u32::<LittleEndian>(to_u32(subgroup.resources.len(), subgroup_id)?)?;

            for (resource_id, resource) in &subgroup.resources {
                groups.write_u32::<LittleEndian>(to_u32(resources.len(), resource_id)?)?;
                write_resource(&mut resources, &mut pool, resource_id, resource)?;
            }
        }
    }

    Ok(DescriptionParts {
        groups,
        resources,
        strings: pool.data,
    })
}

fn write_resource(
    out: &mut Vec<u8>,
    pool: &mut StringPool,
    id: &str,
    resource: &DescriptionResource,
) -> Result<()> {
    out.write_u32::<LittleEndian>(0)?;
    out.write_u16::<LittleEndian>(resource.kind)?;
    out.write_u16::<LittleEndian>(RESOURCE_HEADER_LEN)?;
    let atlas_bounds_at = out.len();
    out.extend_from_slice(&[0; 8]);
    out.write_u32::<LittleEndian>(pool.intern(id)?)?;
    out.write_u32::<LittleEndian>(pool.intern(&resource.path)?)?;
    out.write_u32::<LittleEndian>(to_u32(resource.properties.len(), id)?)?;

    if resource.kind == 0 {
        let begin = to_u32(out.len(), id)?;
        let atlas = resource.atlas.clone().unwrap_or_default();
        for value in [
            atlas.image_type,
            atlas.flags,
            atlas.x,
            atlas.y,
            atlas.ax,
            atlas.ay,
            atlas.aw,
            atlas.ah,
            atlas.rows,
            atlas.cols,
        ] {
            out.write_u16::<LittleEndian>(value)?;
        }
        out.write_u32::<LittleEndian>(pool.intern(&atlas.parent)?)?;

        let end = to_u32(out.len(), id)?;
        out[atlas_bounds_at..atlas_bounds_at + 4].copy_from_slice(&end.to_le_bytes());
        out[atlas_bounds_at + 4..atlas_bounds_at + 8].copy_from_slice(&begin.to_le_bytes());
    }

    for (key, value) in &resource.properties {
        out.write_u32::<LittleEndian>(pool.intern(key)?)?;
        out.write_u32::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(pool.intern(value)?)?;
    }

    Ok(())
}
