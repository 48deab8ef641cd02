use std::path::PathBuf;

use clap::Args;
use miette::{Context, Result};
use pvz_rsb::fs::{unpack_packet, UnpackOptions};
use tracing::info;

#[derive(Args)]
pub struct UnpackArgs {
    /// An input RSG file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// A target directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl UnpackArgs {
    pub fn handle(&self) -> Result<()> {
        let info = unpack_packet(
            &self.file,
            &self.directory,
            UnpackOptions::builder().overwrite(self.overwrite).build(),
        )
        .context(format!("unpacking {}", self.file.display()))?;

        info!(
            resources = info.resources.len(),
            "unpacked {}",
            self.file.display()
        );
        Ok(())
    }
}
