//! Bounds checked big-endian reads over an immutable byte source.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{FormatError, Result};

/// The part of the archive a read belongs to, used to pick the truncation error
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Region {
    /// The fixed 32 byte header
    Header,
    /// The table of contents and the block size table
    Toc,
    /// Block data
    Data,
}

impl Region {
    fn truncated(self, offset: u64, needed: u64, available: u64) -> FormatError {
        match self {
            Region::Header => FormatError::TruncatedHeader { available },
            Region::Toc => FormatError::TruncatedToc {
                offset,
                needed,
                available,
            },
            Region::Data => FormatError::TruncatedData {
                offset,
                needed,
                available,
            },
        }
    }
}

/// A read position over a borrowed byte slice
///
/// Every read checks that enough bytes remain and reports a truncation error for the
/// cursor's [`Region`] otherwise. Reads never panic and never return short data.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: u64,
    region: Region,
}

impl<'a> ByteCursor<'a> {
    /// Create a cursor at the start of `data`
    pub fn new(data: &'a [u8], region: Region) -> Self {
        Self::at(data, 0, region)
    }

    /// Create a cursor at an absolute position in `data`
    pub fn at(data: &'a [u8], pos: u64, region: Region) -> Self {
        Self { data, pos, region }
    }

    /// Current absolute position
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Number of bytes left after the current position
    pub fn remaining(&self) -> u64 {
        (self.data.len() as u64).saturating_sub(self.pos)
    }

    /// Borrow the next `len` bytes and advance past them
    pub fn take(&mut self, len: u64) -> Result<&'a [u8]> {
        let available = self.remaining();
        if len > available {
            return Err(self.region.truncated(self.pos, len, available).into());
        }

        if len == 0 {
            return Ok(&[]);
        }

        // Both values are bounded by `data.len()` at this point.
        let start = self.pos as usize;
        let end = start + len as usize;
        self.pos += len;
        Ok(&self.data[start..end])
    }

    /// Read a big-endian `u16`
    pub fn read_u16(&mut self) -> Result<u16> {
        self.take(2).map(BigEndian::read_u16)
    }
}
