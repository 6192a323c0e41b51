//! Block compression and decompression handling.

use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use tracing::instrument;

use crate::error::{FormatError, Result};

/// Identifies the codec used for compressed blocks inside the PSARC file
///
/// The codec is archive wide and is named by a four byte tag in the header.
/// Blocks can still be stored raw regardless of the codec, see [`crate::block`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Blocks are zlib streams, tag `zlib`
    #[default]
    Zlib,
}

impl CompressionMethod {
    /// Parse a header compression tag
    pub fn from_tag(tag: [u8; 4]) -> Option<Self> {
        match &tag {
            b"zlib" => Some(CompressionMethod::Zlib),
            _ => None,
        }
    }

    /// The header tag for this codec
    pub const fn tag(self) -> [u8; 4] {
        match self {
            CompressionMethod::Zlib => *b"zlib",
        }
    }

    /// Whether `data` starts with a header this codec would produce
    pub fn is_stream_header(self, data: &[u8]) -> bool {
        match self {
            CompressionMethod::Zlib => match data {
                [cmf, flg, ..] => {
                    cmf & 0x0F == 8 && cmf >> 4 <= 7 && (u16::from_be_bytes([*cmf, *flg]) % 31) == 0
                }
                _ => false,
            },
        }
    }

    /// Compress a single block
    #[instrument(skip(data), fields(size = data.len()), err)]
    pub fn compress(self, data: &[u8], level: Compression) -> Result<Vec<u8>> {
        match self {
            CompressionMethod::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len()), level);
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
        }
    }

    /// Inflate a single block which must produce exactly `expected` bytes
    ///
    /// `offset` is the block's position in the archive and is only used for reporting.
    #[instrument(skip(data), fields(size = data.len()), err)]
    pub fn decompress(self, data: &[u8], expected: usize, offset: u64) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(expected);
        match self {
            CompressionMethod::Zlib => {
                // One extra byte is enough to notice a block that inflates too far
                ZlibDecoder::new(data)
                    .take(expected as u64 + 1)
                    .read_to_end(&mut out)
                    .map_err(|source| FormatError::DecompressionFailure { offset, source })?;
            }
        }

        if out.len() != expected {
            return Err(FormatError::BlockSizeMismatch {
                offset,
                expected,
                actual: out.len(),
            }
            .into());
        }

        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use flate2::Compression;
    use pretty_assertions::assert_eq;

    use crate::compression::CompressionMethod;
    use crate::error::{Error, FormatError, Result};

    #[rustfmt::skip]
    const HELLO_WORLD_ZLIB: [u8; 19] = [
        0x78, 0x9C,
        0xF3, 0x48, 0xCD, 0xC9, 0xC9, 0x57, 0x08, 0xCF, 0x2F, 0xCA, 0x49, 0x01, 0x00,
        0x18, 0x0B, 0x04, 0x1D,
    ];

    #[test]
    fn tags() {
        assert_eq!(
            CompressionMethod::from_tag(*b"zlib"),
            Some(CompressionMethod::Zlib)
        );
        assert_eq!(CompressionMethod::from_tag(*b"lzma"), None);
        assert_eq!(CompressionMethod::Zlib.tag(), *b"zlib");
    }

    #[test]
    fn decompress_block() -> Result<()> {
        let actual = CompressionMethod::Zlib.decompress(&HELLO_WORLD_ZLIB, 11, 0)?;
        assert_eq!(actual, b"Hello World".to_vec());

        Ok(())
    }

    #[test]
    fn decompress_wrong_length() {
        assert!(matches!(
            CompressionMethod::Zlib.decompress(&HELLO_WORLD_ZLIB, 12, 40),
            Err(Error::Format(FormatError::BlockSizeMismatch {
                offset: 40,
                expected: 12,
                actual: 11
            }))
        ));

        assert!(matches!(
            CompressionMethod::Zlib.decompress(&HELLO_WORLD_ZLIB, 5, 40),
            Err(Error::Format(FormatError::BlockSizeMismatch {
                expected: 5,
                actual: 6,
                ..
            }))
        ));
    }

    #[test]
    fn decompress_garbage() {
        let input = [0x78, 0x9C, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

        assert!(matches!(
            CompressionMethod::Zlib.decompress(&input, 11, 7),
            Err(Error::Format(FormatError::DecompressionFailure { offset: 7, .. }))
        ));
    }

    #[test]
    fn compress_block() -> Result<()> {
        let data = b"the quick brown fox jumps over the lazy dog ".repeat(32);

        let compressed = CompressionMethod::Zlib.compress(&data, Compression::default())?;
        assert!(compressed.len() < data.len());
        assert!(CompressionMethod::Zlib.is_stream_header(&compressed));

        let actual = CompressionMethod::Zlib.decompress(&compressed, data.len(), 0)?;
        assert_eq!(actual, data);

        Ok(())
    }

    #[test]
    fn stream_header() {
        let zlib = CompressionMethod::Zlib;
        assert!(zlib.is_stream_header(&[0x78, 0x9C]));
        assert!(zlib.is_stream_header(&[0x78, 0xDA]));
        assert!(zlib.is_stream_header(&[0x78, 0x01]));
        assert!(!zlib.is_stream_header(b"Hello"));
        assert!(!zlib.is_stream_header(&[0x78]));
    }
}
