//! Table of contents and block size table decoding.

use std::io::Cursor;

use binrw::BinRead;
use tracing::{debug, instrument};

use crate::cursor::{ByteCursor, Region};
use crate::error::{FormatError, Result};
use crate::types::{PsarcHeader, TocEntry, TocRecord, HEADER_SIZE, TOC_ENTRY_SIZE};

/// Decode the `file_count` entries that follow the header, in archive order
#[instrument(skip(data), err)]
pub fn decode_entries(data: &[u8], header: &PsarcHeader) -> Result<Vec<TocEntry>> {
    let len = header.file_count as u64 * header.toc_entry_size as u64;
    let raw = ByteCursor::at(data, HEADER_SIZE as u64, Region::Toc).take(len)?;

    let mut reader = Cursor::new(raw);
    (0..header.file_count)
        .map(|_| Ok(TocRecord::read(&mut reader)?.into()))
        .collect()
}

/// Archive wide list of stored block sizes
///
/// A value of `0` marks a block stored raw at its full expected length, any other value is
/// the number of bytes the block occupies in the archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZSizeTable(Vec<u16>);

impl ZSizeTable {
    /// Number of block sizes implied by the header's lengths
    pub fn entry_count(header: &PsarcHeader) -> Result<usize> {
        let inconsistent = || FormatError::InconsistentTocLength {
            toc_length: header.toc_length,
            file_count: header.file_count,
        };

        let entries = header.file_count as u64 * TOC_ENTRY_SIZE as u64;
        let bytes = (header.toc_length as u64)
            .checked_sub(HEADER_SIZE as u64 + entries)
            .ok_or_else(inconsistent)?;

        if bytes % 2 != 0 {
            return Err(inconsistent().into());
        }

        Ok((bytes / 2) as usize)
    }

    /// Decode the table that directly follows the table of contents
    #[instrument(skip(data), err)]
    pub fn decode(data: &[u8], header: &PsarcHeader) -> Result<Self> {
        let count = Self::entry_count(header)?;
        let start = HEADER_SIZE as u64 + header.file_count as u64 * TOC_ENTRY_SIZE as u64;

        // Bounds are checked before allocating for a count taken from the header
        let raw = ByteCursor::at(data, start, Region::Toc).take(count as u64 * 2)?;
        let mut cursor = ByteCursor::new(raw, Region::Toc);
        let sizes = (0..count)
            .map(|_| cursor.read_u16())
            .collect::<Result<Vec<_>>>()?;
        debug!(blocks = sizes.len(), "decoded block size table");

        Ok(Self(sizes))
    }

    /// Number of blocks in the archive
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the archive holds no blocks at all
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stored size of the block at `index`
    pub fn get(&self, index: usize) -> Option<u16> {
        self.0.get(index).copied()
    }

    /// All stored sizes in archive order
    pub fn as_slice(&self) -> &[u16] {
        &self.0
    }
}

impl From<Vec<u16>> for ZSizeTable {
    fn from(sizes: Vec<u16>) -> Self {
        Self(sizes)
    }
}

/// Check that every entry's block run lies inside the block size table
pub fn check_block_runs(entries: &[TocEntry], zsizes: &ZSizeTable, block_size: u32) -> Result<()> {
    for (index, entry) in entries.iter().enumerate() {
        let blocks = entry.block_count(block_size);
        let end = entry.zsize_index as u64 + blocks;
        if end > zsizes.len() as u64 {
            return Err(FormatError::ZSizeIndexOutOfRange {
                entry: index,
                index: entry.zsize_index as u64,
                blocks,
                table_len: zsizes.len(),
            }
            .into());
        }
    }

    Ok(())
}
