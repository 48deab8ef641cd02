use std::collections::HashMap;

use miette::Result;
use pretty_assertions::assert_eq;
use pvz_rsb::error::{Error, ErrorKind};
use pvz_rsb::recovery::PacketSlot;
use pvz_rsb::{obfuscate, recover, BundleArchive, BundleWriter, PacketWriter, RecoveryOptions};
use tracing::info;
use tracing_test::traced_test;

mod common;

use common::{
    bundle, description, manifest, packets, read_u32, sorted, write_u32, PACKET_RECORD_STRIDE,
    RECORD_OFFSET_FIELD,
};

/// Decode `data`, re-encode it from the decoded manifest and packets
fn rebuild(data: &[u8]) -> Result<Vec<u8>> {
    let bundle = BundleArchive::new(data)?;

    let mut packets = HashMap::new();
    for name in bundle.packet_names() {
        let packet = bundle.by_name(&name)?;
        packets.insert(name, packet.data().to_vec());
    }

    Ok(BundleWriter::encode(bundle.manifest(), &mut packets)?)
}

#[traced_test]
#[test]
fn version_4_bundle_is_rebuilt_byte_for_byte() -> Result<()> {
    let expected = manifest(4, 0x18);
    let data = bundle(&expected)?;

    let decoded = BundleArchive::new(&data)?;
    assert_eq!(decoded.len(), 4);
    assert_eq!(decoded.atlas_records().len(), 3);
    assert_eq!(decoded.manifest(), &expected);

    assert_eq!(rebuild(&data)?, data);
    Ok(())
}

#[traced_test]
#[test]
fn version_3_bundle_keeps_its_description() -> Result<()> {
    let mut expected = manifest(3, 0x10);
    expected.description = Some(description());
    let data = bundle(&expected)?;

    let decoded = BundleArchive::new(&data)?;
    assert_eq!(decoded.header().packet_bank_offset_repeat, None);
    assert_eq!(decoded.manifest(), &expected);

    assert_eq!(rebuild(&data)?, data);
    Ok(())
}

#[traced_test]
#[test]
fn packets_are_stored_verbatim() -> Result<()> {
    let expected = manifest(4, 0x14);
    let packets = packets(&expected)?;
    let data = BundleWriter::encode(&expected, &mut packets.clone())?;

    let decoded = BundleArchive::new(&data)?;
    for (name, packet) in &packets {
        let stored = decoded.by_name(name)?;
        assert_eq!(stored.data(), packet.as_slice());
        assert_eq!(stored.data().len() % 4096, 0);
        assert_eq!(stored.archive()?.len(), packet_len(packet)?);
    }

    Ok(())
}

fn packet_len(packet: &[u8]) -> Result<usize> {
    Ok(pvz_rsb::PacketArchive::new(packet)?.len())
}

#[traced_test]
#[test]
fn mismatched_atlas_width_is_reported() -> Result<()> {
    let mut data = bundle(&manifest(4, 0x18))?;
    let atlas_table = BundleArchive::new(&data)?.header().atlas_table_offset as usize;
    write_u32(&mut data, atlas_table, 65);

    let error = BundleArchive::new(&data).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::ConsistencyViolation);
    assert_eq!(
        error.to_string(),
        "IMAGES\\1536\\WORLDMAP.PTX: atlas width mismatch, expected 65, found 64"
    );

    Ok(())
}

#[traced_test]
#[test]
fn list_lengths_off_by_one_name_the_list() -> Result<()> {
    let data = bundle(&manifest(4, 0x18))?;

    for (field, table) in [
        (0x10, "file list"),
        (0x20, "packet list"),
        (0x40, "composite list"),
    ] {
        for delta in [1i64, -1] {
            let mut damaged = data.clone();
            let length = read_u32(&damaged, field) as i64 + delta;
            write_u32(&mut damaged, field, length as u32);

            let error = BundleArchive::new(&damaged).unwrap_err();
            info!(%error, "damaged {table}");
            match error {
                Error::Format { table: actual, .. } => assert_eq!(actual, table),
                other => panic!("unexpected error {other:?}"),
            }
        }
    }

    Ok(())
}

#[traced_test]
#[test]
fn unknown_strides_are_format_violations() -> Result<()> {
    let data = bundle(&manifest(4, 0x18))?;

    for (field, stride, table) in [
        (0x30, 205, "packet table"),
        (0x3C, 1157, "composite table"),
        (0x5C, 0x11, "atlas table"),
    ] {
        let mut damaged = data.clone();
        write_u32(&mut damaged, field, stride);

        let error = BundleArchive::new(&damaged).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::FormatViolation);
        match error {
            Error::Format { table: actual, .. } => assert_eq!(actual, table),
            other => panic!("unexpected error {other:?}"),
        }
    }

    Ok(())
}

#[test]
fn unsupported_version_is_refused() -> Result<()> {
    let mut data = bundle(&manifest(4, 0x18))?;
    write_u32(&mut data, 4, 5);

    let error = BundleArchive::new(&data).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::FormatViolation);
    Ok(())
}

#[traced_test]
#[test]
fn recovery_leaves_a_hole_for_a_bad_pointer() -> Result<()> {
    let expected = manifest(4, 0x18);
    let packets = packets(&expected)?;
    let mut data = bundle(&expected)?;

    let table = BundleArchive::new(&data)?.header().packet_table_offset as usize;
    let bad_offset = data.len() as u32 + 0x1000;
    write_u32(
        &mut data,
        table + PACKET_RECORD_STRIDE + RECORD_OFFSET_FIELD,
        bad_offset,
    );

    let recovered = recover(&data, RecoveryOptions::default())?;
    assert_eq!(recovered.slots.len(), 4);
    assert_eq!(
        recovered.slots[1],
        PacketSlot::Absent {
            pool_index: 1,
            offset: bad_offset,
        }
    );

    let found = recovered
        .packets()
        .map(|packet| packet.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(found, ["WORLDMAP_1536", "GLOBAL_COMMON", "GLOBAL_ENUS"]);
    for packet in recovered.packets() {
        assert_eq!(&packet.data, &packets[&packet.name]);
    }

    let worldmap = &recovered.manifest.groups[0];
    assert_eq!(worldmap.subgroups.len(), 1);
    assert_eq!(worldmap.subgroups[0].packet_name, "WORLDMAP_1536");

    Ok(())
}

#[traced_test]
#[test]
fn obfuscated_bundle_is_recovered() -> Result<()> {
    let expected = manifest(4, 0x18);
    let packets = packets(&expected)?;
    let mut data = bundle(&expected)?;

    obfuscate(&mut data)?;
    assert!(BundleArchive::new(&data).is_err());

    let recovered = recover(&data, RecoveryOptions::default())?;
    assert_eq!(recovered.packets().count(), 4);
    for packet in recovered.packets() {
        assert_eq!(&packet.data, &packets[&packet.name]);
    }
    assert_eq!(sorted(recovered.manifest), sorted(expected));

    Ok(())
}

#[traced_test]
#[test]
fn recovery_rebuilds_a_bundle() -> Result<()> {
    let expected = manifest(4, 0x18);
    let original = bundle(&expected)?;
    let mut data = original.clone();
    obfuscate(&mut data)?;

    let recovered = recover(&data, RecoveryOptions::default())?;
    let mut packets = recovered
        .packets()
        .map(|packet| (packet.name.clone(), packet.data.clone()))
        .collect::<HashMap<_, _>>();

    let rebuilt = BundleWriter::encode(&recovered.manifest, &mut packets)?;
    assert_eq!(
        BundleArchive::new(&rebuilt)?.manifest(),
        BundleArchive::new(&original)?.manifest()
    );

    Ok(())
}

#[test]
fn paths_differing_by_case_are_refused() -> Result<()> {
    let mut writer = PacketWriter::new(4, pvz_rsb::CompressionFlags::None);
    writer.add_file("SOUNDS\\CLICK.WEM", None, b"one")?;
    writer.add_file("sounds\\click.wem", None, b"two")?;

    let error = writer.finish().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::EncodingConstraintViolation);
    Ok(())
}

#[traced_test]
#[test]
fn packet_names_match_ignoring_case() -> Result<()> {
    let mut expected = manifest(4, 0x18);
    expected.groups[1].subgroups[0].packet_name = "Global_Common".into();
    let data = bundle(&expected)?;

    let decoded = BundleArchive::new(&data)?;
    assert_eq!(
        decoded.manifest().groups[1].subgroups[0].packet_name,
        "Global_Common"
    );
    assert!(decoded.by_name("GLOBAL_COMMON").is_ok());

    Ok(())
}

#[test]
fn packets_are_checked_against_the_manifest() -> Result<()> {
    let expected = manifest(4, 0x18);
    let mut packets = packets(&expected)?;
    let mut other = expected.clone();
    other.groups[0].subgroups[1].packet.resources[0].atlas = None;
    other.groups[0].subgroups[1].packet.resources[0].atlas_properties = None;
    packets.insert(
        "WORLDMAP_768".into(),
        common::encode_packet(&other.groups[0].subgroups[1].packet)?,
    );

    let error = BundleWriter::encode(&expected, &mut packets).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::ConsistencyViolation);
    Ok(())
}
