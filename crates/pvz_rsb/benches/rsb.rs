use divan::AllocProfiler;

#[global_allocator]
static ALLOC: AllocProfiler = AllocProfiler::system();

fn main() {
    divan::main();
}

mod fixture {
    use std::collections::HashMap;

    use pvz_rsb::manifest::{
        AtlasInfo, AtlasProperties, GroupInfo, Manifest, PacketInfo, ResourceInfo, SubgroupInfo,
    };
    use pvz_rsb::{BundleWriter, CompressionFlags, PacketWriter};

    const PACKETS: usize = 16;
    const RESOURCES: usize = 32;

    pub fn manifest() -> Manifest {
        let subgroups = (0..PACKETS)
            .map(|packet| {
                let resources = (0..RESOURCES)
                    .map(|resource| {
                        let path = format!("IMAGES\\PACKET_{packet:02}\\RESOURCE_{resource:02}");
                        if resource % 4 == 0 {
                            ResourceInfo {
                                path: format!("{path}.PTX"),
                                atlas: Some(AtlasInfo {
                                    id: (resource / 4) as u32,
                                    width: 64,
                                    height: 64,
                                }),
                                atlas_properties: Some(AtlasProperties {
                                    format: 0,
                                    pitch: 256,
                                    alpha_size: None,
                                    alpha_format: None,
                                }),
                            }
                        } else {
                            ResourceInfo::plain(format!("{path}.RTON"))
                        }
                    })
                    .collect();

                SubgroupInfo {
                    packet_name: format!("PACKET_{packet:02}"),
                    category: ["1536".into(), String::new()],
                    packet: PacketInfo {
                        version: 4,
                        compression_flags: CompressionFlags::Both,
                        resources,
                    },
                }
            })
            .collect();

        Manifest {
            version: 4,
            atlas_record_stride: 0x10,
            groups: vec![GroupInfo {
                name: "BENCH".into(),
                is_composite: true,
                subgroups,
            }],
            description: None,
        }
    }

    pub fn packet(info: &PacketInfo) -> Vec<u8> {
        let mut writer = PacketWriter::new(info.version, info.compression_flags);
        for resource in &info.resources {
            let size = match resource.atlas {
                Some(atlas) => (atlas.width * atlas.height * 4) as usize,
                None => 2048,
            };
            let data = resource.path.bytes().cycle().take(size).collect::<Vec<_>>();
            writer.add_file(&resource.path, resource.atlas, &data).unwrap();
        }
        writer.finish().unwrap()
    }

    pub fn packets(manifest: &Manifest) -> HashMap<String, Vec<u8>> {
        manifest
            .subgroups()
            .map(|subgroup| (subgroup.packet_name.clone(), packet(&subgroup.packet)))
            .collect()
    }

    pub fn bundle() -> Vec<u8> {
        let manifest = manifest();
        BundleWriter::encode(&manifest, &mut packets(&manifest)).unwrap()
    }
}

pub mod packet {
    use divan::Bencher;
    use pvz_rsb::PacketArchive;

    use crate::fixture;

    #[divan::bench]
    fn open(bencher: Bencher) {
        bencher
            .with_inputs(|| fixture::packet(&fixture::manifest().groups[0].subgroups[0].packet))
            .bench_refs(|data| {
                divan::black_box(PacketArchive::new(data).unwrap());
            });
    }

    #[divan::bench]
    fn read_info(bencher: Bencher) {
        bencher
            .with_inputs(|| fixture::packet(&fixture::manifest().groups[0].subgroups[0].packet))
            .bench_refs(|data| {
                divan::black_box(PacketArchive::read_info(data).unwrap());
            });
    }
}

pub mod bundle {
    use divan::Bencher;
    use pvz_rsb::{BundleArchive, BundleWriter};

    use crate::fixture;

    #[divan::bench]
    fn open(bencher: Bencher) {
        bencher.with_inputs(fixture::bundle).bench_refs(|data| {
            divan::black_box(BundleArchive::new(data).unwrap());
        });
    }

    #[divan::bench(sample_count = 10)]
    fn encode(bencher: Bencher) {
        let manifest = fixture::manifest();
        let packets = fixture::packets(&manifest);

        bencher
            .with_inputs(|| packets.clone())
            .bench_local_refs(|packets| {
                divan::black_box(BundleWriter::encode(&manifest, packets).unwrap());
            });
    }
}
