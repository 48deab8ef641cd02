use std::path::PathBuf;

use clap::Args;
use miette::{Context, Result};
use pvz_rsb::fs::{recover_bundle, UnpackOptions};
use pvz_rsb::recovery::PacketSlot;
use pvz_rsb::RecoveryOptions;
use tracing::{info, warn};

#[derive(Args)]
pub struct RecoverArgs {
    /// An input RSB file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// A target directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// Bundle version to assume, the stored one is ignored
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u32).range(3..=4))]
    version: u32,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl RecoverArgs {
    pub fn handle(&self) -> Result<()> {
        let recovered = recover_bundle(
            &self.file,
            &self.directory,
            RecoveryOptions::builder().version(self.version).build(),
            UnpackOptions::builder().overwrite(self.overwrite).build(),
        )
        .context(format!("recovering {}", self.file.display()))?;

        for slot in &recovered.slots {
            if let PacketSlot::Absent { pool_index, offset } = slot {
                warn!("packet {pool_index} at {offset:#x} could not be recovered");
            }
        }
        info!(
            packets = recovered.packets().count(),
            "recovered {}",
            self.file.display()
        );
        Ok(())
    }
}
