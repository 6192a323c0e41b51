//! Base types for structure of PSARC file.

use std::io::Cursor;

use binrw::{BinRead, BinWrite};
use bitflags::bitflags;
use tracing::{instrument, warn};

use crate::compression::CompressionMethod;
use crate::cursor::{ByteCursor, Region};
use crate::error::{Error, FormatError, Result};

/// Size of the fixed header at the start of every archive
pub const HEADER_SIZE: u32 = 32;

/// Width of one table of contents entry
pub const TOC_ENTRY_SIZE: u32 = 30;

/// Block size used by common producers
pub const DEFAULT_BLOCK_SIZE: u32 = 65536;

/// The only supported major version
pub const MAJOR_VERSION: u16 = 1;

/// The minor version written by this crate
pub const MINOR_VERSION: u16 = 4;

/// Magic bytes at offset 0
pub const MAGIC: [u8; 4] = *b"PSAR";

/// 16 byte digest identifying an entry, see [`crate::hash::name_hash`]
pub type NameHash = [u8; 16];

/// The name hash reserved for the manifest entry
pub const MANIFEST_HASH: NameHash = [0; 16];

bitflags! {
    /// Archive wide flags stored in the header
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
    pub struct ArchiveFlags: u32 {
        /// Names are matched case-insensitively
        const IGNORE_CASE = 1 << 0;
        /// Names are stored as absolute paths
        const ABSOLUTE_PATHS = 1 << 1;
    }
}

impl ArchiveFlags {
    pub fn ignore_case(&self) -> bool {
        self.contains(ArchiveFlags::IGNORE_CASE)
    }

    pub fn absolute_paths(&self) -> bool {
        self.contains(ArchiveFlags::ABSOLUTE_PATHS)
    }
}

/// Non fatal findings made while opening an archive
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Warning {
    /// The minor version differs from the one this crate writes
    MinorVersionMismatch { found: u16, expected: u16 },
}

/// PSARC file header
///
/// Defines the header of the PSARC file which always starts with "PSAR".
/// All data is stored in big endian format
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq, Eq)]
#[brw(magic = b"PSAR", big)]
pub struct PsarcHeader {
    /// Major format version, always 1
    pub major_version: u16,

    /// Minor format version
    pub minor_version: u16,

    /// Tag naming the block codec, see [`CompressionMethod`]
    pub compression: [u8; 4],

    /// Combined length of the header, table of contents and block size table
    pub toc_length: u32,

    /// Width of each table of contents entry
    pub toc_entry_size: u32,

    /// Number of entries, the manifest included
    pub file_count: u32,

    /// Uncompressed size of every block except the last one of each file
    pub block_size: u32,

    /// Archive wide flags
    #[br(map = ArchiveFlags::from_bits_retain)]
    #[bw(map = |flags: &ArchiveFlags| flags.bits())]
    pub flags: ArchiveFlags,
}

impl Default for PsarcHeader {
    fn default() -> Self {
        Self {
            major_version: MAJOR_VERSION,
            minor_version: MINOR_VERSION,
            compression: CompressionMethod::Zlib.tag(),
            toc_length: HEADER_SIZE,
            toc_entry_size: TOC_ENTRY_SIZE,
            file_count: Default::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            flags: ArchiveFlags::IGNORE_CASE,
        }
    }
}

impl PsarcHeader {
    /// Decode and validate the header at the start of `data`
    ///
    /// A minor version mismatch is accepted and reported as a [`Warning`].
    #[instrument(skip(data), err)]
    pub fn decode(data: &[u8]) -> Result<(PsarcHeader, Option<Warning>)> {
        let raw = ByteCursor::new(data, Region::Header).take(HEADER_SIZE as u64)?;

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&raw[..4]);
        if magic != MAGIC {
            return Err(FormatError::BadMagic(magic).into());
        }

        let header = PsarcHeader::read(&mut Cursor::new(raw))?;
        let warning = header.validate()?;
        Ok((header, warning))
    }

    /// Check the fields that select the archive variant
    pub fn validate(&self) -> Result<Option<Warning>> {
        if self.major_version != MAJOR_VERSION {
            return Err(FormatError::UnsupportedVersion {
                major: self.major_version,
                minor: self.minor_version,
            }
            .into());
        }

        self.compression_method()?;

        if self.toc_entry_size != TOC_ENTRY_SIZE {
            return Err(FormatError::UnsupportedTocEntrySize(self.toc_entry_size).into());
        }

        if self.block_size == 0 {
            return Err(FormatError::InvalidBlockSize(self.block_size).into());
        }

        if self.minor_version != MINOR_VERSION {
            warn!(
                found = self.minor_version,
                expected = MINOR_VERSION,
                "archive minor version differs, reading anyway"
            );
            return Ok(Some(Warning::MinorVersionMismatch {
                found: self.minor_version,
                expected: MINOR_VERSION,
            }));
        }

        Ok(None)
    }

    /// The block codec named by the compression tag
    pub fn compression_method(&self) -> Result<CompressionMethod> {
        CompressionMethod::from_tag(self.compression)
            .ok_or_else(|| FormatError::UnsupportedCompression(self.compression).into())
    }
}

/// Unsigned 40-bit integer stored as one high byte followed by a big endian `u32`
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[brw(big)]
pub struct U40 {
    high: u8,
    low: u32,
}

impl U40 {
    /// Largest representable value
    pub const MAX: u64 = (1 << 40) - 1;

    /// Pack `value`, failing if it needs more than 40 bits
    pub fn new(value: u64) -> Result<Self> {
        if value > Self::MAX {
            return Err(Error::ArchiveTooLarge(value));
        }

        Ok(Self {
            high: (value >> 32) as u8,
            low: value as u32,
        })
    }

    /// Combined value, `high << 32 | low`
    pub const fn get(self) -> u64 {
        ((self.high as u64) << 32) | self.low as u64
    }
}

impl From<U40> for u64 {
    fn from(value: U40) -> Self {
        value.get()
    }
}

/// PSARC table of contents record as stored on disk
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[brw(big)]
pub struct TocRecord {
    /// Digest of the entry's name, all zero for the manifest
    pub name_hash: NameHash,

    /// Index of the first block size of this entry in the block size table
    pub zsize_index: u32,

    /// Size of the entry once all blocks are inflated
    pub uncompressed_size: U40,

    /// Absolute offset of the first block of this entry
    pub data_offset: U40,
}

/// Decoded table of contents entry
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct TocEntry {
    /// Digest of the entry's name, all zero for the manifest
    pub name_hash: NameHash,

    /// Index of the first block size of this entry in the block size table
    pub zsize_index: u32,

    /// Size of the entry once all blocks are inflated
    pub uncompressed_size: u64,

    /// Absolute offset of the first block of this entry
    pub data_offset: u64,
}

impl TocEntry {
    /// Whether this entry carries the reserved manifest hash
    pub fn is_manifest(&self) -> bool {
        self.name_hash == MANIFEST_HASH
    }

    /// Number of blocks the entry's data is split into
    pub fn block_count(&self, block_size: u32) -> u64 {
        self.uncompressed_size.div_ceil(block_size.max(1) as u64)
    }
}

impl From<TocRecord> for TocEntry {
    fn from(record: TocRecord) -> Self {
        Self {
            name_hash: record.name_hash,
            zsize_index: record.zsize_index,
            uncompressed_size: record.uncompressed_size.get(),
            data_offset: record.data_offset.get(),
        }
    }
}

impl TryFrom<&TocEntry> for TocRecord {
    type Error = Error;

    fn try_from(entry: &TocEntry) -> Result<Self> {
        Ok(Self {
            name_hash: entry.name_hash,
            zsize_index: entry.zsize_index,
            uncompressed_size: U40::new(entry.uncompressed_size)?,
            data_offset: U40::new(entry.data_offset)?,
        })
    }
}
