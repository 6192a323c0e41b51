//! This library handles reading from and creating **PSARC** archives.
//!
//! # PSARC Archive Format Documentation
//!
//! A PSARC file packs many files into one container. Each file is cut into fixed size blocks and
//! every block is compressed on its own, or stored raw when compression would not save space.
//! PSARC files are typically identified with the `.psarc` extension.
//!
//! ## File Structure
//!
//! A PSARC file consists of a header, the table of contents, the block size table and the data
//! blocks, in that order. The header, table of contents and block size table together span
//! `toc_length` bytes, the data section starts right after them.
//!
//! | Offset (bytes) | Field                  | Description                                                |
//! |----------------|------------------------|------------------------------------------------------------|
//! | 0x0000         | Magic number           | 4 bytes: 0x50534152 ("PSAR")                               |
//! | 0x0004         | Major version          | 2 bytes: Fixed value 1                                     |
//! | 0x0006         | Minor version          | 2 bytes: 4 for archives written by this crate              |
//! | 0x0008         | Compression            | 4 bytes: Block codec tag, "zlib"                           |
//! | 0x000C         | TOC Length             | 4 bytes: Length of header, TOC and block size table        |
//! | 0x0010         | TOC Entry Size         | 4 bytes: Width of one TOC entry, always 30                 |
//! | 0x0014         | File Count             | 4 bytes: Number of TOC entries, the manifest included      |
//! | 0x0018         | Block Size             | 4 bytes: Uncompressed size of a full block, e.g. 65536     |
//! | 0x001C         | Flags                  | 4 bytes: Bit 0 ignore case, bit 1 absolute paths           |
//!
//! ### Header
//!
//! - **Magic Number**: A 4-byte identifier set to `0x50534152`, the ASCII code for "PSAR".
//! - **Version**: The major version must be 1. Other minor versions are read anyway and reported as a
//!   [`types::Warning`].
//! - **Compression**: Only `zlib` is understood. Archives naming another codec are refused.
//! - **Flags**: When bit 0 is set names are looked up case-insensitively.
//!
//! ### Table of Contents
//!
//! `file_count` entries of 30 bytes each follow the header:
//!
//! | Offset (bytes) | Field                  | Description                                             |
//! |----------------|------------------------|---------------------------------------------------------|
//! | 0x0000         | Name Hash              | 16 bytes: MD5 of the upper-cased name, zero for entry 0 |
//! | 0x0010         | ZSize Index            | 4 bytes: Index of the entry's first block size          |
//! | 0x0014         | Uncompressed Size      | 5 bytes: 40-bit size of the entry's data                |
//! | 0x0019         | Data Offset            | 5 bytes: 40-bit absolute offset of the first block      |
//!
//! The 40-bit fields are one high byte followed by a 32-bit low word, see [`types::U40`].
//!
//! ### Block Size Table
//!
//! The remaining `(toc_length - 32 - file_count * 30) / 2` bytes hold one 16-bit value per block
//! of the archive. `0` marks a block stored raw at its full length, any other value is the number
//! of bytes the block occupies. Block boundaries are not recorded anywhere else, a reader walks
//! this table from the entry's zsize index while advancing through the data section.
//!
//! ### Manifest
//!
//! Entry 0 always carries an all-zero name hash. Its data is a newline separated list naming entries
//! `1..N` in table order, and it is the only source of names in the archive.
//!
//! ## Additional Information
//!
//! - **File Extension**: `.psarc`
//! - **Endianness**: Big-endian for all multi-byte integers
//! - **Compression Methods**:
//!   - `zlib`: every block is an independent zlib stream
//!

pub mod block;
pub mod compression;
pub mod cursor;
pub mod error;
pub mod hash;
pub mod manifest;
pub mod read;
pub mod toc;
pub mod types;
pub mod write;

pub use compression::CompressionMethod;
pub use manifest::Entry;
pub use read::{EntryInfo, EntrySource, PsarcArchive};
pub use write::{build, PsarcWriter};
