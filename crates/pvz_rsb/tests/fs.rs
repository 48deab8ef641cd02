use std::path::Path;

use miette::{IntoDiagnostic, Result};
use pretty_assertions::assert_eq;
use pvz_rsb::error::ErrorKind;
use pvz_rsb::fs::{
    pack_bundle, pack_packet, read_json, recover_bundle, unpack_bundle, unpack_packet,
    UnpackOptions, MANIFEST_FILE, PACKET_INFO_FILE,
};
use pvz_rsb::manifest::{Manifest, PacketInfo};
use pvz_rsb::{obfuscate, RecoveryOptions};
use tracing_test::traced_test;
use walkdir::WalkDir;

mod common;

use common::{bundle, encode_packet, manifest, resource_data};

/// Every file below `root`, relative and with `/` separators
fn files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.into_diagnostic()?;
        if entry.file_type().is_file() {
            let relative = entry.path().strip_prefix(root).into_diagnostic()?;
            files.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(files)
}

#[traced_test]
#[test]
fn bundle_directory_round_trip() -> Result<()> {
    let dir = tempfile::tempdir().into_diagnostic()?;
    let input = dir.path().join("main.rsb");
    let unpacked = dir.path().join("main");
    let output = dir.path().join("rebuilt.rsb");

    let expected = manifest(4, 0x18);
    let data = bundle(&expected)?;
    std::fs::write(&input, &data).into_diagnostic()?;

    let written = unpack_bundle(&input, &unpacked, UnpackOptions::default())?;
    assert_eq!(written, expected);
    assert_eq!(
        files(&unpacked)?,
        [
            "manifest.json",
            "packet/GLOBAL_COMMON.rsg",
            "packet/GLOBAL_ENUS.rsg",
            "packet/WORLDMAP_1536.rsg",
            "packet/WORLDMAP_768.rsg",
        ]
    );
    assert_eq!(read_json::<Manifest>(&unpacked.join(MANIFEST_FILE))?, expected);

    pack_bundle(&unpacked, &output)?;
    assert_eq!(std::fs::read(&output).into_diagnostic()?, data);

    Ok(())
}

#[traced_test]
#[test]
fn existing_files_are_kept_unless_overwriting() -> Result<()> {
    let dir = tempfile::tempdir().into_diagnostic()?;
    let input = dir.path().join("main.rsb");
    let unpacked = dir.path().join("main");
    std::fs::write(&input, bundle(&manifest(4, 0x18))?).into_diagnostic()?;

    unpack_bundle(&input, &unpacked, UnpackOptions::default())?;

    let error = unpack_bundle(&input, &unpacked, UnpackOptions::default()).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Io);

    unpack_bundle(&input, &unpacked, UnpackOptions::builder().overwrite(true).build())?;
    Ok(())
}

#[traced_test]
#[test]
fn packet_directory_round_trip() -> Result<()> {
    let dir = tempfile::tempdir().into_diagnostic()?;
    let input = dir.path().join("WORLDMAP_1536.rsg");
    let unpacked = dir.path().join("WORLDMAP_1536");
    let output = dir.path().join("rebuilt.rsg");

    let expected = manifest(4, 0x18).groups[0].subgroups[0].packet.clone();
    let data = encode_packet(&expected)?;
    std::fs::write(&input, &data).into_diagnostic()?;

    unpack_packet(&input, &unpacked, UnpackOptions::default())?;
    assert_eq!(
        files(&unpacked)?,
        [
            "packet.json",
            "res/IMAGES/1536/WORLDMAP.PTX",
            "res/IMAGES/1536/WORLDMAP.RTON",
            "res/IMAGES/1536/WORLDMAP_ICONS.PTX",
        ]
    );
    for resource in &expected.resources {
        let path = unpacked.join("res").join(resource.path.replace('\\', "/"));
        assert_eq!(std::fs::read(path).into_diagnostic()?, resource_data(resource));
    }

    let info: PacketInfo = read_json(&unpacked.join(PACKET_INFO_FILE))?;
    assert_eq!(info.resources.len(), expected.resources.len());
    assert_eq!(info.compression_flags, expected.compression_flags);

    pack_packet(&unpacked, &output)?;
    assert_eq!(std::fs::read(&output).into_diagnostic()?, data);

    Ok(())
}

#[traced_test]
#[test]
fn recovered_bundle_is_extracted() -> Result<()> {
    let dir = tempfile::tempdir().into_diagnostic()?;
    let input = dir.path().join("main.rsb");
    let output = dir.path().join("recovered");

    let mut data = bundle(&manifest(4, 0x18))?;
    obfuscate(&mut data)?;
    std::fs::write(&input, &data).into_diagnostic()?;

    let recovered = recover_bundle(
        &input,
        &output,
        RecoveryOptions::default(),
        UnpackOptions::default(),
    )?;
    assert_eq!(recovered.packets().count(), 4);

    let files = files(&output)?;
    assert!(files.contains(&"manifest.json".to_string()));
    assert!(files.contains(&"packet/WORLDMAP_768.rsg".to_string()));
    assert!(files.contains(&"unpack/SOUNDS/CLICK.WEM".to_string()));
    assert!(files.contains(&"unpack/IMAGES/1536/WORLDMAP_ICONS.PTX".to_string()));

    Ok(())
}
