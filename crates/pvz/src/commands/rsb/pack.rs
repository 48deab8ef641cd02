use std::path::PathBuf;

use clap::Args;
use miette::{Context, Result};
use pvz_rsb::fs::pack_bundle;

use crate::commands::check_target;

#[derive(Args)]
pub struct PackArgs {
    /// An unpacked bundle directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// A target RSB file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl PackArgs {
    pub fn handle(&self) -> Result<()> {
        check_target(&self.file, self.overwrite)?;

        pack_bundle(&self.directory, &self.file)
            .context(format!("packing {}", self.directory.display()))?;
        Ok(())
    }
}
