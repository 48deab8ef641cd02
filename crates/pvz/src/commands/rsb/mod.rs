pub mod diff;
pub mod obfuscate;
pub mod pack;
pub mod recover;
pub mod unpack;

#[derive(clap::Subcommand)]
pub enum RsbCommands {
    /// Compare two RSB bundles
    Diff(diff::DiffArgs),
    /// Erase the packet names and headers of an RSB bundle
    Obfuscate(obfuscate::ObfuscateArgs),
    /// Build an RSB bundle from an unpacked directory
    Pack(pack::PackArgs),
    /// Extract the packets of an RSB bundle whose headers were erased
    Recover(recover::RecoverArgs),
    /// Extract the packets of an RSB bundle into a directory
    Unpack(unpack::UnpackArgs),
}

impl RsbCommands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            RsbCommands::Diff(diff) => diff.handle(),
            RsbCommands::Obfuscate(obfuscate) => obfuscate.handle(),
            RsbCommands::Pack(pack) => pack.handle(),
            RsbCommands::Recover(recover) => recover.handle(),
            RsbCommands::Unpack(unpack) => unpack.handle(),
        }
    }
}
