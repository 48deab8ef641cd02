//! RSB bundles
//!
//! A bundle groups packets into composite groups. Besides the packets themselves it stores three
//! path lists (resources, packets, composites), four fixed stride tables and, for version 3, a
//! description section. See the crate documentation for the layout.

use std::collections::HashMap;

use crate::error::{Error, Result};

pub mod description;
pub mod read;
pub mod write;

pub use description::Description;
pub use read::{BundleArchive, BundlePacket};
pub use write::BundleWriter;

/// Provides the bytes of each packet when building a bundle
pub trait PacketSource {
    /// Read the packet called `name`
    fn read_packet(&mut self, name: &str) -> Result<Vec<u8>>;
}

impl PacketSource for HashMap<String, Vec<u8>> {
    fn read_packet(&mut self, name: &str) -> Result<Vec<u8>> {
        self.get(name)
            .or_else(|| {
                self.iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, data)| data)
            })
            .cloned()
            .ok_or_else(|| Error::CustomError(format!("packet {name} is missing")))
    }
}
