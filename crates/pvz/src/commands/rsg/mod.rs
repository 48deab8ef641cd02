pub mod pack;
pub mod unpack;

#[derive(clap::Subcommand)]
pub enum RsgCommands {
    /// Build an RSG packet from an unpacked directory
    Pack(pack::PackArgs),
    /// Extract the resources of an RSG packet into a directory
    Unpack(unpack::UnpackArgs),
}

impl RsgCommands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            RsgCommands::Pack(pack) => pack.handle(),
            RsgCommands::Unpack(unpack) => unpack.handle(),
        }
    }
}
