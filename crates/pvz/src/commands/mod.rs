use std::path::Path;

use miette::{miette, Result};

pub mod rsb;
pub mod rsg;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Handle RSB bundles
    Rsb {
        #[command(subcommand)]
        command: rsb::RsbCommands,
    },
    /// Handle RSG packets
    Rsg {
        #[command(subcommand)]
        command: rsg::RsgCommands,
    },
}

impl Commands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            Commands::Rsb { command } => command.handle(),
            Commands::Rsg { command } => command.handle(),
        }
    }
}

/// Refuse to replace an existing output unless asked to
pub(crate) fn check_target(path: &Path, overwrite: bool) -> Result<()> {
    if !overwrite && path.exists() {
        return Err(miette!(
            "{} already exists, pass --overwrite to replace it",
            path.display()
        ));
    }
    Ok(())
}
