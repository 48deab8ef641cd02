//! Unpacking to and packing from directories
//!
//! A bundle unpacks to `manifest.json` plus one `packet/<name>.rsg` file per packet. A packet
//! unpacks to `packet.json` plus its resources under `res/`. Recovery writes the manifest, the
//! repaired packets under `packet/` and every resource they hold under `unpack/`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use bon::Builder;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, instrument};

use crate::bundle::{BundleArchive, BundleWriter, PacketSource};
use crate::error::{Error, Result};
use crate::manifest::{Manifest, PacketInfo};
use crate::packet::{PacketArchive, PacketWriter, ResourceSource};
use crate::recovery::{recover, RecoveredBundle, RecoveryOptions};

/// Manifest of an unpacked bundle
pub const MANIFEST_FILE: &str = "manifest.json";
/// Metadata of an unpacked packet
pub const PACKET_INFO_FILE: &str = "packet.json";
/// Packets of an unpacked bundle
pub const PACKET_DIR: &str = "packet";
/// Resources of an unpacked packet
pub const RESOURCE_DIR: &str = "res";
/// Resources of a recovered bundle
pub const RECOVERED_RESOURCE_DIR: &str = "unpack";
/// Extension of packet files
pub const PACKET_EXTENSION: &str = "rsg";

/// Options for writing unpacked files
#[derive(Debug, Clone, Copy, Default, Builder)]
pub struct UnpackOptions {
    /// Replace files that already exist
    #[builder(default)]
    pub overwrite: bool,
}

/// Where resource `path` of a packet goes below `root`
///
/// Both `\` and `/` separate components. Absolute paths, drive prefixes and `..` components are
/// refused.
pub fn resource_path(root: &Path, path: &str) -> Result<PathBuf> {
    let unsafe_path = || Error::UnsafePath(path.to_string());

    if path.starts_with(['\\', '/']) {
        return Err(unsafe_path());
    }

    let mut joined = root.to_path_buf();
    for part in path.split(['\\', '/']).filter(|part| !part.is_empty()) {
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(normal)), None) if !part.contains(':') => joined.push(normal),
            (Some(Component::CurDir), None) => {}
            _ => return Err(unsafe_path()),
        }
    }

    if joined == root {
        return Err(unsafe_path());
    }
    Ok(joined)
}

/// Path of packet `name` inside the packet directory `dir`
pub fn packet_path(dir: &Path, name: &str) -> Result<PathBuf> {
    resource_path(dir, &format!("{name}.{PACKET_EXTENSION}"))
}

fn write_file(path: &Path, data: &[u8], options: UnpackOptions) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    info!("writing {}", path.display());
    let mut out = if options.overwrite {
        File::create(path)?
    } else {
        File::create_new(path)?
    };
    out.write_all(data)?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T, options: UnpackOptions) -> Result<()> {
    let mut data = serde_json::to_vec_pretty(value)?;
    data.push(b'\n');
    write_file(path, &data, options)
}

/// Read a manifest or packet info document
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Resources stored below a directory
#[derive(Debug, Clone)]
pub struct ResourceDirectory {
    root: PathBuf,
}

impl ResourceDirectory {
    /// Resources below `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ResourceSource for ResourceDirectory {
    fn read_resource(&mut self, path: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(resource_path(&self.root, path)?)?)
    }
}

/// Packet files stored in a directory
#[derive(Debug, Clone)]
pub struct PacketDirectory {
    root: PathBuf,
}

impl PacketDirectory {
    /// Packets in `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PacketSource for PacketDirectory {
    fn read_packet(&mut self, name: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(packet_path(&self.root, name)?)?)
    }
}

fn write_resources(packet: &PacketArchive, root: &Path, options: UnpackOptions) -> Result<()> {
    for index in 0..packet.len() {
        let file = packet.by_index(index)?;
        write_file(&resource_path(root, file.name())?, file.data(), options)?;
    }
    Ok(())
}

/// Unpack the bundle `input` into the directory `output`
#[instrument(err)]
pub fn unpack_bundle(input: &Path, output: &Path, options: UnpackOptions) -> Result<Manifest> {
    let data = std::fs::read(input)?;
    let bundle = BundleArchive::new(&data)?;

    let packets = output.join(PACKET_DIR);
    for subgroup in bundle.manifest().subgroups() {
        let packet = bundle.by_name(&subgroup.packet_name)?;
        write_file(&packet_path(&packets, packet.name())?, packet.data(), options)?;
    }

    let manifest = bundle.into_manifest();
    write_json(&output.join(MANIFEST_FILE), &manifest, options)?;
    Ok(manifest)
}

/// Build the bundle `output` from the unpacked directory `input`
#[instrument(err)]
pub fn pack_bundle(input: &Path, output: &Path) -> Result<()> {
    let manifest: Manifest = read_json(&input.join(MANIFEST_FILE))?;
    let data = BundleWriter::encode(&manifest, &mut PacketDirectory::new(input.join(PACKET_DIR)))?;
    write_output(output, &data)
}

/// Unpack the packet `input` into the directory `output`
#[instrument(err)]
pub fn unpack_packet(input: &Path, output: &Path, options: UnpackOptions) -> Result<PacketInfo> {
    let data = std::fs::read(input)?;
    let packet = PacketArchive::new(&data)?;

    write_resources(&packet, &output.join(RESOURCE_DIR), options)?;

    let info = packet.info();
    write_json(&output.join(PACKET_INFO_FILE), &info, options)?;
    Ok(info)
}

/// Build the packet `output` from the unpacked directory `input`
#[instrument(err)]
pub fn pack_packet(input: &Path, output: &Path) -> Result<()> {
    let info: PacketInfo = read_json(&input.join(PACKET_INFO_FILE))?;
    let data = PacketWriter::encode(&info, &mut ResourceDirectory::new(input.join(RESOURCE_DIR)))?;
    write_output(output, &data)
}

/// Recover the bundle `input` into the directory `output`, see [`recover`]
#[instrument(err)]
pub fn recover_bundle(
    input: &Path,
    output: &Path,
    recovery: RecoveryOptions,
    options: UnpackOptions,
) -> Result<RecoveredBundle> {
    let data = std::fs::read(input)?;
    let recovered = recover(&data, recovery)?;

    let packets = output.join(PACKET_DIR);
    let resources = output.join(RECOVERED_RESOURCE_DIR);
    for packet in recovered.packets() {
        write_file(&packet_path(&packets, &packet.name)?, &packet.data, options)?;
        let archive = PacketArchive::new(&packet.data).map_err(|e| e.in_packet(&packet.name))?;
        write_resources(&archive, &resources, options)?;
    }

    write_json(&output.join(MANIFEST_FILE), &recovered.manifest, options)?;
    Ok(recovered)
}

fn write_output(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    info!("writing {}", path.display());
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(data)?;
    out.flush()?;
    Ok(())
}
