//! Reconstruction of an entry's data from its run of blocks.
//!
//! Block boundaries are not stored in the data section. They follow from the entry's
//! `data_offset` and `zsize_index` and from walking the block size table one block at a
//! time, so the offset and the table index always advance together.

use std::borrow::Cow;

use tracing::{instrument, trace};

use crate::compression::CompressionMethod;
use crate::cursor::{ByteCursor, Region};
use crate::error::{FormatError, Result};
use crate::toc::ZSizeTable;
use crate::types::TocEntry;

/// Largest buffer reserved up front for an entry, larger entries grow as they decode
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// Location of one block of an entry
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockSpan {
    /// Absolute offset of the block in the archive
    pub offset: u64,
    /// Value from the block size table, `0` for a full raw block
    pub zsize: u16,
    /// Number of bytes the block contributes to the entry
    pub expected: usize,
}

impl BlockSpan {
    /// Number of bytes the block occupies in the archive
    pub fn stored_len(&self) -> u64 {
        match self.zsize {
            0 => self.expected as u64,
            zsize => zsize as u64,
        }
    }
}

/// Iterator over the [`BlockSpan`]s of one entry
#[derive(Debug, Clone)]
pub struct BlockSpans<'a> {
    zsizes: &'a ZSizeTable,
    block_size: u64,
    cursor: u64,
    zidx: u64,
    remaining: u64,
}

impl<'a> BlockSpans<'a> {
    pub fn new(entry: &TocEntry, zsizes: &'a ZSizeTable, block_size: u32) -> Self {
        Self {
            zsizes,
            block_size: block_size as u64,
            cursor: entry.data_offset,
            zidx: entry.zsize_index as u64,
            remaining: entry.uncompressed_size,
        }
    }
}

impl Iterator for BlockSpans<'_> {
    type Item = Result<BlockSpan>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let expected = self.remaining.min(self.block_size);
        let Some(zsize) = usize::try_from(self.zidx)
            .ok()
            .and_then(|index| self.zsizes.get(index))
        else {
            self.remaining = 0;
            return Some(Err(FormatError::BlockIndexOutOfRange {
                index: self.zidx,
                table_len: self.zsizes.len(),
            }
            .into()));
        };

        let span = BlockSpan {
            offset: self.cursor,
            zsize,
            // Never larger than `block_size`, which is a `u32`
            expected: expected as usize,
        };

        self.cursor += span.stored_len();
        self.zidx += 1;
        self.remaining -= expected;

        Some(Ok(span))
    }
}

/// One entry's blocks as they appear in the archive
///
/// The block size table values only make sense together with the block size they were
/// written for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlocks<'a> {
    pub block_size: u32,
    /// Uncompressed size of the entry
    pub size: u64,
    pub zsizes: Vec<u16>,
    pub blocks: Vec<&'a [u8]>,
}

impl StoredBlocks<'_> {
    /// Number of bytes the blocks occupy
    pub fn stored_len(&self) -> u64 {
        self.blocks.iter().map(|block| block.len() as u64).sum()
    }
}

/// Reads entries out of an archive's data section
#[derive(Debug, Clone, Copy)]
pub struct BlockStream<'a> {
    source: &'a [u8],
    zsizes: &'a ZSizeTable,
    block_size: u32,
    compression: CompressionMethod,
}

impl<'a> BlockStream<'a> {
    pub fn new(
        source: &'a [u8],
        zsizes: &'a ZSizeTable,
        block_size: u32,
        compression: CompressionMethod,
    ) -> Self {
        Self {
            source,
            zsizes,
            block_size,
            compression,
        }
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// The block layout of `entry`
    pub fn spans(&self, entry: &TocEntry) -> BlockSpans<'a> {
        BlockSpans::new(entry, self.zsizes, self.block_size)
    }

    /// The bytes a block occupies in the archive
    pub fn stored_block(&self, span: &BlockSpan) -> Result<&'a [u8]> {
        ByteCursor::at(self.source, span.offset, Region::Data).take(span.stored_len())
    }

    /// The blocks of `entry` exactly as they are stored, without decoding them
    #[instrument(skip(self), err)]
    pub fn stored(&self, entry: &TocEntry) -> Result<StoredBlocks<'a>> {
        let mut stored = StoredBlocks {
            block_size: self.block_size,
            size: entry.uncompressed_size,
            zsizes: Vec::new(),
            blocks: Vec::new(),
        };
        for span in self.spans(entry) {
            let span = span?;
            stored.zsizes.push(span.zsize);
            stored.blocks.push(self.stored_block(&span)?);
        }

        Ok(stored)
    }

    /// Decode a single block
    ///
    /// Raw blocks are borrowed straight from the source.
    pub fn decode_block(&self, span: &BlockSpan) -> Result<Cow<'a, [u8]>> {
        let stored = self.stored_block(span)?;

        if span.zsize == 0 {
            return Ok(Cow::Borrowed(stored));
        }

        // Some producers store a short raw block with its own length as zsize
        if span.zsize as usize == span.expected && !self.compression.is_stream_header(stored) {
            trace!(offset = span.offset, "block stored raw with explicit size");
            return Ok(Cow::Borrowed(stored));
        }

        self.compression
            .decompress(stored, span.expected, span.offset)
            .map(Cow::Owned)
    }

    /// Reconstruct the full data of `entry`
    ///
    /// Either every byte of the entry is returned or an error, never partial data.
    #[instrument(skip(self), err)]
    pub fn read(&self, entry: &TocEntry) -> Result<Vec<u8>> {
        let spans = self.spans(entry).collect::<Result<Vec<_>>>()?;
        let blocks = self.decode_blocks(&spans)?;

        let mut out = Vec::with_capacity(entry.uncompressed_size.min(MAX_PREALLOCATION) as usize);
        blocks.iter().for_each(|block| out.extend_from_slice(block));
        Ok(out)
    }

    #[cfg(feature = "parallel")]
    fn decode_blocks(&self, spans: &[BlockSpan]) -> Result<Vec<Cow<'a, [u8]>>> {
        use rayon::prelude::*;

        spans
            .par_iter()
            .map(|span| self.decode_block(span))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn decode_blocks(&self, spans: &[BlockSpan]) -> Result<Vec<Cow<'a, [u8]>>> {
        spans.iter().map(|span| self.decode_block(span)).collect()
    }
}
