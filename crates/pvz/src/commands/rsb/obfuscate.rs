use std::path::PathBuf;

use clap::Args;
use miette::{Context, IntoDiagnostic, Result};
use pvz_rsb::obfuscate;
use tracing::info;

use crate::commands::check_target;

#[derive(Args)]
pub struct ObfuscateArgs {
    /// An input RSB file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// A target RSB file
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl ObfuscateArgs {
    pub fn handle(&self) -> Result<()> {
        check_target(&self.output, self.overwrite)?;

        let mut data = std::fs::read(&self.file)
            .into_diagnostic()
            .context(format!("path: {}", self.file.display()))?;
        obfuscate(&mut data).context(format!("obfuscating {}", self.file.display()))?;

        info!("writing {}", self.output.display());
        std::fs::write(&self.output, &data)
            .into_diagnostic()
            .context(format!("creating {}", self.output.display()))?;
        Ok(())
    }
}
