#![allow(dead_code)]

use std::collections::HashMap;

use indexmap::IndexMap;
use pvz_rsb::bundle::description::{
    Description, DescriptionAtlas, DescriptionGroup, DescriptionResource, DescriptionSubgroup,
};
use pvz_rsb::error::Result;
use pvz_rsb::manifest::{
    AtlasInfo, AtlasProperties, GroupInfo, Manifest, PacketInfo, ResourceInfo, SubgroupInfo,
};
use pvz_rsb::{BundleWriter, CompressionFlags, PacketWriter};

/// Offset of the packet offset field inside a packet table record
pub const RECORD_OFFSET_FIELD: usize = 128;
/// Stride of the packet table
pub const PACKET_RECORD_STRIDE: usize = 204;

/// Deterministic content for a resource, atlas images get 4 bytes per pixel
pub fn resource_data(resource: &ResourceInfo) -> Vec<u8> {
    let size = match resource.atlas {
        Some(atlas) => (atlas.width * atlas.height * 4) as usize,
        None => 100 + resource.path.len() * 7,
    };
    resource.path.bytes().cycle().take(size).collect()
}

pub fn plain(path: &str) -> ResourceInfo {
    ResourceInfo::plain(path)
}

pub fn atlas(path: &str, id: u32, width: u32, height: u32, stride: u32) -> ResourceInfo {
    ResourceInfo {
        path: path.to_string(),
        atlas: Some(AtlasInfo { id, width, height }),
        atlas_properties: Some(AtlasProperties {
            format: 0,
            pitch: width * 4,
            alpha_size: (stride >= 0x14).then_some(0),
            alpha_format: (stride == 0x18).then_some(0),
        }),
    }
}

fn subgroup(
    name: &str,
    category: [&str; 2],
    version: u32,
    compression_flags: CompressionFlags,
    resources: Vec<ResourceInfo>,
) -> SubgroupInfo {
    SubgroupInfo {
        packet_name: name.to_string(),
        category: category.map(String::from),
        packet: PacketInfo {
            version,
            compression_flags,
            resources,
        },
    }
}

/// Two groups, four packets, every compression flag value once
pub fn manifest(version: u32, stride: u32) -> Manifest {
    Manifest {
        version,
        atlas_record_stride: stride,
        groups: vec![
            GroupInfo {
                name: "WORLDMAP".into(),
                is_composite: true,
                subgroups: vec![
                    subgroup(
                        "WORLDMAP_1536",
                        ["1536", ""],
                        version,
                        CompressionFlags::Both,
                        vec![
                            atlas("IMAGES\\1536\\WORLDMAP.PTX", 0, 64, 32, stride),
                            plain("IMAGES\\1536\\WORLDMAP.RTON"),
                            atlas("IMAGES\\1536\\WORLDMAP_ICONS.PTX", 1, 16, 16, stride),
                        ],
                    ),
                    subgroup(
                        "WORLDMAP_768",
                        ["768", ""],
                        version,
                        CompressionFlags::PlainOnly,
                        vec![atlas("IMAGES\\768\\WORLDMAP.PTX", 0, 32, 16, stride)],
                    ),
                ],
            },
            GroupInfo {
                name: "GLOBAL".into(),
                is_composite: false,
                subgroups: vec![
                    subgroup(
                        "GLOBAL_COMMON",
                        ["0", ""],
                        version,
                        CompressionFlags::None,
                        vec![
                            plain("PROPERTIES\\RESOURCES.RTON"),
                            plain("SOUNDS\\CLICK.WEM"),
                        ],
                    ),
                    subgroup(
                        "GLOBAL_ENUS",
                        ["0", "ENUS"],
                        version,
                        CompressionFlags::AtlasOnly,
                        vec![plain("STRINGS\\EN.RTON")],
                    ),
                ],
            },
        ],
        description: None,
    }
}

pub fn description() -> Description {
    let image = DescriptionResource {
        kind: 0,
        path: "IMAGES\\1536\\WORLDMAP.PTX".into(),
        atlas: Some(DescriptionAtlas {
            aw: 64,
            ah: 32,
            parent: "ATLAS_WORLDMAP".into(),
            ..Default::default()
        }),
        properties: IndexMap::new(),
    };
    let sound = DescriptionResource {
        kind: 1,
        path: "SOUNDS\\CLICK.WEM".into(),
        atlas: None,
        properties: IndexMap::from([("looping".to_string(), "false".to_string())]),
    };

    Description {
        groups: IndexMap::from([
            (
                "WORLDMAP".to_string(),
                DescriptionGroup {
                    composite: true,
                    subgroups: IndexMap::from([(
                        "WORLDMAP_1536".to_string(),
                        DescriptionSubgroup {
                            resolution: 1536,
                            language: String::new(),
                            resources: IndexMap::from([("IMAGE_WORLDMAP".to_string(), image)]),
                        },
                    )]),
                },
            ),
            (
                "GLOBAL".to_string(),
                DescriptionGroup {
                    composite: false,
                    subgroups: IndexMap::from([(
                        "GLOBAL_COMMON".to_string(),
                        DescriptionSubgroup {
                            resolution: 0,
                            language: String::new(),
                            resources: IndexMap::from([("SOUND_CLICK".to_string(), sound)]),
                        },
                    )]),
                },
            ),
        ]),
    }
}

pub fn encode_packet(info: &PacketInfo) -> Result<Vec<u8>> {
    let mut writer = PacketWriter::new(info.version, info.compression_flags);
    for resource in &info.resources {
        writer.add_file(&resource.path, resource.atlas, &resource_data(resource))?;
    }
    writer.finish()
}

pub fn packets(manifest: &Manifest) -> Result<HashMap<String, Vec<u8>>> {
    manifest
        .subgroups()
        .map(|subgroup| Ok((subgroup.packet_name.clone(), encode_packet(&subgroup.packet)?)))
        .collect()
}

pub fn bundle(manifest: &Manifest) -> Result<Vec<u8>> {
    BundleWriter::encode(manifest, &mut packets(manifest)?)
}

/// Sort the resources of every packet by path
pub fn sorted(mut manifest: Manifest) -> Manifest {
    for group in &mut manifest.groups {
        for subgroup in &mut group.subgroups {
            subgroup
                .packet
                .resources
                .sort_by(|a, b| a.path.cmp(&b.path));
        }
    }
    manifest
}

pub fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

pub fn write_u32(data: &mut [u8], at: usize, value: u32) {
    data[at..at + 4].copy_from_slice(&value.to_le_bytes());
}
