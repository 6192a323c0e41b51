//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent wrapper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent wrapper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// The archive is structurally invalid
    #[error(transparent)]
    #[diagnostic(transparent)]
    Format(#[from] FormatError),

    /// unable to find requested file
    #[error("unable to find requested file")]
    FileNotFound(#[from] FileNotFoundError),

    /// A name handed to the writer cannot be stored in the manifest
    #[error("invalid entry name {name:?}: {reason}")]
    InvalidName {
        /// The offending name
        name: String,
        /// Why the name was refused
        reason: &'static str,
    },

    /// Two names handed to the writer resolve to the same entry
    #[error("duplicate entry name {0:?}")]
    DuplicateName(String),

    /// A writer option is out of range
    #[error("{0}")]
    InvalidOption(String),

    /// A size or offset does not fit the 40-bit fields of the table of contents
    #[error("value {0} exceeds the 40-bit range of the archive format")]
    ArchiveTooLarge(u64),
}

/// Structural problems found while decoding an archive
#[derive(Error, Diagnostic, Debug)]
pub enum FormatError {
    #[error("invalid magic {:?}, expected \"PSAR\"", String::from_utf8_lossy(.0))]
    BadMagic([u8; 4]),

    #[error("unsupported archive version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("unsupported block compression {:?}", String::from_utf8_lossy(.0))]
    #[diagnostic(help("only zlib compressed archives are supported"))]
    UnsupportedCompression([u8; 4]),

    #[error("unsupported table of contents entry size {0}, expected 30")]
    UnsupportedTocEntrySize(u32),

    #[error("invalid block size {0}")]
    InvalidBlockSize(u32),

    #[error("table of contents length {toc_length} does not fit {file_count} entries and a whole number of block sizes")]
    InconsistentTocLength { toc_length: u32, file_count: u32 },

    #[error("header needs 32 bytes, only {available} available")]
    TruncatedHeader { available: u64 },

    #[error("table of contents needs {needed} bytes at offset {offset}, only {available} available")]
    TruncatedToc {
        offset: u64,
        needed: u64,
        available: u64,
    },

    #[error("block data needs {needed} bytes at offset {offset}, only {available} available")]
    TruncatedData {
        offset: u64,
        needed: u64,
        available: u64,
    },

    #[error("expected exactly one manifest entry at position 0, found {found} entries with an empty name hash")]
    MissingOrDuplicateManifest { found: usize },

    #[error("manifest lists {names} names but the archive holds {entries} files")]
    ManifestEntryCountMismatch { names: usize, entries: usize },

    #[error("manifest lists {0:?} more than once")]
    DuplicateName(String),

    #[error("entry {entry} needs {blocks} blocks from zsize index {index}, table only has {table_len}")]
    ZSizeIndexOutOfRange {
        entry: usize,
        index: u64,
        blocks: u64,
        table_len: usize,
    },

    #[error("block index {index} is outside the block size table of {table_len} entries")]
    BlockIndexOutOfRange { index: u64, table_len: usize },

    #[error("block at offset {offset} inflated to {actual} bytes, expected {expected}")]
    BlockSizeMismatch {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    #[error("unable to inflate block at offset {offset}")]
    DecompressionFailure {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("entries {first} and {second} claim overlapping block data")]
    OverlappingEntries { first: usize, second: usize },
}

/// Error type to provide further information when a file has not been found
#[derive(Error, Diagnostic, Debug)]
#[error("unable to find requested file")]
pub enum FileNotFoundError {
    /// at index {0}
    #[error("at index {0}")]
    Index(usize),

    /// by name {0}
    #[error("by name {0}")]
    Name(String),

    /// by name hash {0}
    #[error("by name hash {0}")]
    Hash(String),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
