//! Error types that can be emitted from this library

use std::fmt::Display;

use miette::Diagnostic;
use thiserror::Error;

/// Broad classification of an [`Error`]
///
/// Lets callers tell a malformed container apart from one whose tables disagree with each
/// other, or from a manifest that cannot be encoded.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The underlying file system failed
    Io,
    /// Bad magic, unsupported version, a table that does not end where it should, truncated data
    FormatViolation,
    /// Two independently stored copies of the same value disagree
    ConsistencyViolation,
    /// The input cannot be represented in the binary format
    EncodingConstraintViolation,
    /// The manifest document could not be parsed or written
    Manifest,
    /// Anything else
    Other,
}

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent warpper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent warpper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// Transparent warpper for [`serde_json::Error`]
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    /// The bytes of a table or region do not follow the format
    #[error("invalid {table} at offset {offset:#x}: {reason}")]
    #[diagnostic(code(pvz_rsb::format))]
    Format {
        /// Table or region being read
        table: &'static str,
        /// Absolute offset of the failure
        offset: u64,
        /// What was wrong
        reason: String,
    },

    /// Two copies of the same value disagree
    #[error("{owner}: {field} mismatch, expected {expected}, found {actual}")]
    #[diagnostic(
        code(pvz_rsb::consistency),
        help("both copies have to be edited together")
    )]
    Consistency {
        /// Packet, group or resource owning the value
        owner: String,
        /// Which value
        field: &'static str,
        /// Value from the authoritative side (bundle table or manifest)
        expected: String,
        /// Value found on the other side
        actual: String,
    },

    /// The value cannot be written in this format
    #[error("unable to encode {owner}: {reason}")]
    #[diagnostic(code(pvz_rsb::encode))]
    EncodingConstraint {
        /// Value being encoded
        owner: String,
        /// Which constraint was broken
        reason: String,
    },

    /// A failure inside an embedded packet
    #[error("in packet {name}")]
    Packet {
        /// Name of the packet
        name: String,
        /// What went wrong
        #[source]
        source: Box<Error>,
    },

    /// A resource path would escape the output directory
    #[error("refusing to use unsafe path {0:?}")]
    UnsafePath(String),

    /// {0}
    #[error("{0}")]
    CustomError(String),
}

impl Error {
    pub(crate) fn format(table: &'static str, offset: u64, reason: impl Into<String>) -> Self {
        Error::Format {
            table,
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn consistency(
        owner: impl Into<String>,
        field: &'static str,
        expected: impl Display,
        actual: impl Display,
    ) -> Self {
        Error::Consistency {
            owner: owner.into(),
            field,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub(crate) fn encoding(owner: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::EncodingConstraint {
            owner: owner.into(),
            reason: reason.into(),
        }
    }

    /// Name the packet an error comes from
    pub(crate) fn in_packet(self, name: impl Into<String>) -> Self {
        Error::Packet {
            name: name.into(),
            source: Box::new(self),
        }
    }

    /// Attach a table name to a low level read failure
    pub(crate) fn in_table(self, table: &'static str, offset: u64) -> Self {
        match self {
            Error::IOError(e) => Error::format(table, offset, e.to_string()),
            Error::BinRWError(e) => {
                let offset = binrw_position(&e).unwrap_or(offset);
                Error::format(table, offset, binrw_reason(&e))
            }
            other => other,
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::IOError(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                ErrorKind::FormatViolation
            }
            Error::IOError(_) => ErrorKind::Io,
            Error::BinRWError(binrw::Error::Io(e)) => match e.kind() {
                std::io::ErrorKind::UnexpectedEof => ErrorKind::FormatViolation,
                _ => ErrorKind::Io,
            },
            Error::BinRWError(_) | Error::Format { .. } => ErrorKind::FormatViolation,
            Error::JsonError(_) => ErrorKind::Manifest,
            Error::Packet { source, .. } => source.kind(),
            Error::Consistency { .. } => ErrorKind::ConsistencyViolation,
            Error::EncodingConstraint { .. } | Error::UnsafePath(_) => {
                ErrorKind::EncodingConstraintViolation
            }
            Error::CustomError(_) => ErrorKind::Other,
        }
    }
}

fn binrw_position(error: &binrw::Error) -> Option<u64> {
    match error {
        binrw::Error::BadMagic { pos, .. }
        | binrw::Error::AssertFail { pos, .. }
        | binrw::Error::NoVariantMatch { pos }
        | binrw::Error::Custom { pos, .. } => Some(*pos),
        _ => None,
    }
}

fn binrw_reason(error: &binrw::Error) -> String {
    match error {
        binrw::Error::BadMagic { .. } => "bad magic".into(),
        binrw::Error::Io(e) => e.to_string(),
        other => other.to_string(),
    }
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::error::{Error, ErrorKind};

    #[test]
    fn truncated_input_is_a_format_violation() {
        let error = Error::from(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert_eq!(error.kind(), ErrorKind::FormatViolation);

        let error = Error::from(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(error.kind(), ErrorKind::Io);
    }

    #[test]
    fn consistency_message_names_both_values() {
        let error = Error::consistency("IMAGES\\A.PTX", "atlas width", 64, 128);
        assert_eq!(error.kind(), ErrorKind::ConsistencyViolation);
        assert_eq!(
            error.to_string(),
            "IMAGES\\A.PTX: atlas width mismatch, expected 64, found 128"
        );
    }

    #[test]
    fn packet_errors_keep_their_kind() {
        let error = Error::encoding("A.PTX", "paths have to be ASCII").in_packet("WORLDMAP_1536");
        assert_eq!(error.kind(), ErrorKind::EncodingConstraintViolation);
        assert_eq!(error.to_string(), "in packet WORLDMAP_1536");
    }

    #[test]
    fn read_failures_are_tagged_with_table() {
        let error = Error::from(std::io::Error::from(std::io::ErrorKind::UnexpectedEof))
            .in_table("packet table", 0x40);
        match error {
            Error::Format { table, offset, .. } => {
                assert_eq!(table, "packet table");
                assert_eq!(offset, 0x40);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
