use std::collections::HashSet;
use std::path::PathBuf;

use clap::Args;
use miette::{Context, IntoDiagnostic, Result};
use pvz_rsb::fs::{pack_packet, read_json, PACKET_INFO_FILE, RESOURCE_DIR};
use pvz_rsb::PacketInfo;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::commands::check_target;

#[derive(Args)]
pub struct PackArgs {
    /// An unpacked packet directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// A target RSG file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl PackArgs {
    /// Warn about resources on disk that the packet info does not list
    fn warn_unlisted(&self, info: &PacketInfo) -> Result<()> {
        let listed = info
            .resources
            .iter()
            .map(|resource| resource.path.replace('/', "\\").to_ascii_uppercase())
            .collect::<HashSet<_>>();

        let root = self.directory.join(RESOURCE_DIR);
        for entry in WalkDir::new(&root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.path().strip_prefix(&root).into_diagnostic()?;
            let key = name
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("\\")
                .to_ascii_uppercase();
            if !listed.contains(&key) {
                warn!("{} is not listed in {PACKET_INFO_FILE}, skipping it", name.display());
            }
        }
        Ok(())
    }

    pub fn handle(&self) -> Result<()> {
        check_target(&self.file, self.overwrite)?;

        let info: PacketInfo = read_json(&self.directory.join(PACKET_INFO_FILE))
            .context(format!("reading {}", self.directory.join(PACKET_INFO_FILE).display()))?;
        self.warn_unlisted(&info)?;

        info!("creating {}", self.file.display());
        pack_packet(&self.directory, &self.file)
            .context(format!("packing {}", self.directory.display()))?;
        Ok(())
    }
}
