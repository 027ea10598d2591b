//! Error types for PE parsing, metadata reading and the CLI.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for minbuild operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading or analyzing inputs.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error while reading an input file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The metadata file (or the file a pointer file names) does not exist.
    #[error("metadata file not found: {}", .0.display())]
    MetadataNotFound(PathBuf),

    /// The binary to analyze does not exist.
    #[error("binary file not found: {}", .0.display())]
    BinaryNotFound(PathBuf),

    /// Invalid DOS signature (expected "MZ").
    #[error("invalid DOS signature (expected 'MZ')")]
    InvalidDosSignature,

    /// Invalid PE signature (expected "PE\0\0").
    #[error("invalid PE signature (expected 'PE\\0\\0')")]
    InvalidPeSignature,

    /// Invalid optional header magic.
    #[error("invalid optional header magic: {0:#06x}")]
    InvalidOptionalHeaderMagic(u16),

    /// Structural problem in the PE headers.
    #[error("malformed PE image: {0}")]
    MalformedPe(String),

    /// Structural problem in the managed metadata image.
    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),

    /// A built-in pattern failed to compile.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Offset out of bounds.
    #[error("offset {offset:#x} out of bounds (size: {size})")]
    OffsetOutOfBounds { offset: usize, size: usize },
}

impl Error {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::MetadataNotFound(_) => 3,
            Error::BinaryNotFound(_) => 4,
            Error::InvalidDosSignature
            | Error::InvalidPeSignature
            | Error::InvalidOptionalHeaderMagic(_)
            | Error::MalformedPe(_) => 5,
            Error::MalformedMetadata(_) => 6,
            Error::Io(_) | Error::Pattern(_) | Error::OffsetOutOfBounds { .. } => 1,
        }
    }

    /// Whether this error means the binary is not a well-formed PE image.
    pub fn is_malformed_pe(&self) -> bool {
        self.exit_code() == 5
    }

    pub(crate) fn out_of_bounds(offset: usize, size: usize) -> Self {
        Error::OffsetOutOfBounds { offset, size }
    }
}

/// Exit code for an error that reached the top of the CLI.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<Error>())
        .map(Error::exit_code)
        .unwrap_or(1)
}
