//! Types for writing PSARC archives
//!

use binrw::BinWrite;
use bon::Builder;
use byteorder::{BigEndian, WriteBytesExt};
use flate2::Compression;
use indexmap::IndexMap;
use std::borrow::Cow;
use std::fmt::Debug;
use std::io::{self, Cursor, Seek, Write};
use tracing::{debug, instrument, Level};

use crate::block::StoredBlocks;
use crate::compression::CompressionMethod;
use crate::error::{Error, Result};
use crate::hash::name_hash;
use crate::manifest::NameResolver;
use crate::read::PsarcFile;
use crate::types::{
    ArchiveFlags, NameHash, PsarcHeader, TocEntry, TocRecord, DEFAULT_BLOCK_SIZE, HEADER_SIZE,
    MANIFEST_HASH, TOC_ENTRY_SIZE,
};

/// Order in which files are laid out in the archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EntryOrder {
    /// The order files were added in
    #[default]
    Insertion,
    /// Ascending name hash, files with equal hashes keep their insertion order
    NameHash,
}

/// Options for how the PSARC file should be written
#[derive(Debug, Clone, Copy, Builder)]
pub struct PsarcWriterOptions {
    /// Uncompressed size of every block except the last one of each file
    #[builder(default = DEFAULT_BLOCK_SIZE)]
    pub block_size: u32,

    /// zlib level from 0 to 9
    #[builder(default = 6)]
    pub compression_level: u32,

    /// Whether readers should match names case-insensitively
    #[builder(default = true)]
    pub ignore_case: bool,

    /// Whether names are absolute paths
    #[builder(default)]
    pub absolute_paths: bool,

    /// Layout order of the files
    #[builder(default)]
    pub order: EntryOrder,
}

impl Default for PsarcWriterOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PsarcWriterOptions {
    /// Check every option is in range
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::InvalidOption("block size must not be zero".into()));
        }

        if self.compression_level > 9 {
            return Err(Error::InvalidOption(format!(
                "compression level {} is outside 0..=9",
                self.compression_level
            )));
        }

        Ok(())
    }

    /// Header flags matching these options
    pub fn flags(&self) -> ArchiveFlags {
        let mut flags = ArchiveFlags::empty();
        flags.set(ArchiveFlags::IGNORE_CASE, self.ignore_case);
        flags.set(ArchiveFlags::ABSOLUTE_PATHS, self.absolute_paths);
        flags
    }
}

#[derive(Debug, Clone)]
struct PendingFile {
    name: Box<str>,
    data: Vec<u8>,
}

#[derive(Debug, Clone)]
struct QueuedFile {
    name: Box<str>,
    payload: Payload,
}

#[derive(Debug, Clone)]
enum Payload {
    /// Uncompressed data, encoded when the archive is finished
    Plain(Vec<u8>),
    /// Blocks taken over from another archive as they were stored
    Stored(EncodedEntry<'static>),
}

impl Payload {
    fn encode(&self, block_size: u32, level: Compression) -> Result<EncodedEntry<'_>> {
        match self {
            Payload::Plain(data) => encode(data, block_size, level),
            Payload::Stored(entry) => Ok(entry.reborrow()),
        }
    }
}

/// One payload split into blocks, each either compressed or borrowed raw from the payload
#[derive(Debug, Clone)]
struct EncodedEntry<'a> {
    size: u64,
    zsizes: Vec<u16>,
    blocks: Vec<Cow<'a, [u8]>>,
}

impl EncodedEntry<'_> {
    fn stored_len(&self) -> u64 {
        self.blocks.iter().map(|block| block.len() as u64).sum()
    }

    fn reborrow(&self) -> EncodedEntry<'_> {
        EncodedEntry {
            size: self.size,
            zsizes: self.zsizes.clone(),
            blocks: self.blocks.iter().map(|block| Cow::Borrowed(&**block)).collect(),
        }
    }
}

impl From<StoredBlocks<'_>> for EncodedEntry<'static> {
    fn from(stored: StoredBlocks<'_>) -> Self {
        EncodedEntry {
            size: stored.size,
            zsizes: stored.zsizes,
            blocks: stored
                .blocks
                .into_iter()
                .map(|block| Cow::Owned(block.to_vec()))
                .collect(),
        }
    }
}

/// PSARC archive generator
///
/// Files are buffered until [`PsarcWriter::finish`], the table of contents can only be laid
/// out once every file's block sizes are known.
///
/// ```
/// # fn doit() -> psarc::error::Result<()>
/// # {
/// # use psarc::PsarcWriter;
/// use std::io::Write;
/// use psarc::write::PsarcWriterOptions;
///
/// let mut psarc = PsarcWriter::new(std::io::Cursor::new(Vec::new()), PsarcWriterOptions::builder()
///            .block_size(65536)
///            .ignore_case(true)
///            .build());
///
/// psarc.start_file("hello_world.txt")?;
/// psarc.write_all(b"Hello, World!")?;
///
/// // Apply the changes you've made.
/// let archive = psarc.finish()?.into_inner();
///
/// let archive = psarc::PsarcArchive::new(archive)?;
/// assert_eq!(archive.extract("HELLO_WORLD.txt")?, b"Hello, World!");
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
pub struct PsarcWriter<W: Write + Seek> {
    inner: W,
    options: PsarcWriterOptions,
    resolver: NameResolver,
    files: IndexMap<Box<str>, QueuedFile>,
    current: Option<PendingFile>,
}

impl<W: Write + Seek> Debug for PsarcWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PsarcWriter")
            .field("options", &self.options)
            .field("files", &self.files.len())
            .field("writing_file", &self.is_writing_file())
            .finish()
    }
}

impl<W: Write + Seek> PsarcWriter<W> {
    /// Initializes the archive.
    ///
    /// Before writing to this object, the [`PsarcWriter::start_file`] function should be called.
    /// After a successful write, the file remains open for writing.
    pub fn new(inner: W, options: PsarcWriterOptions) -> PsarcWriter<W> {
        PsarcWriter {
            inner,
            options,
            resolver: NameResolver::new(options.ignore_case),
            files: IndexMap::new(),
            current: None,
        }
    }

    /// Returns true if a file is currently open for writing.
    pub const fn is_writing_file(&self) -> bool {
        self.current.is_some()
    }

    /// Start a new file, finishing the one currently open.
    ///
    /// Names must survive a trip through the manifest: they can't be empty, can't carry
    /// surrounding whitespace or a leading byte order mark and can't contain line breaks or
    /// NUL. Two names can't share a lookup key.
    #[instrument(skip(self, name), fields(name = %name.as_ref()), err)]
    pub fn start_file(&mut self, name: impl AsRef<str>) -> Result<()> {
        self.finish_file();

        let name = name.as_ref();
        self.check_name(name)?;

        self.current = Some(PendingFile {
            name: name.into(),
            data: Vec::new(),
        });

        Ok(())
    }

    /// Add `source`, a file of another archive, under `name`
    ///
    /// When both archives share a block size the stored blocks are copied verbatim and never
    /// recompressed. Otherwise the file is decoded now and compressed again on
    /// [`PsarcWriter::finish`].
    #[instrument(skip(self, name, source), fields(name = %name.as_ref()), err)]
    pub fn copy_file(&mut self, name: impl AsRef<str>, source: &PsarcFile<'_>) -> Result<()> {
        self.finish_file();

        let name = name.as_ref();
        self.check_name(name)?;

        let payload = if source.block_size() == self.options.block_size {
            Payload::Stored(source.stored_blocks()?.into())
        } else {
            debug!(
                from = source.block_size(),
                to = self.options.block_size,
                "block sizes differ, recompressing"
            );
            Payload::Plain(source.read_to_vec()?)
        };
        self.queue(name.into(), payload);

        Ok(())
    }

    /// Add a whole file at once
    pub fn add_file(&mut self, name: impl AsRef<str>, data: &[u8]) -> Result<()> {
        self.start_file(name)?;
        self.write_all(data)?;
        self.finish_file();
        Ok(())
    }

    fn check_name(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        if self.files.contains_key(self.resolver.lookup_key(name).as_ref()) {
            return Err(Error::DuplicateName(name.to_owned()));
        }

        Ok(())
    }

    fn finish_file(&mut self) {
        if let Some(PendingFile { name, data }) = self.current.take() {
            self.queue(name, Payload::Plain(data));
        }
    }

    fn queue(&mut self, name: Box<str>, payload: Payload) {
        let key = self.resolver.lookup_key(&name).into_owned().into_boxed_str();
        self.files.insert(key, QueuedFile { name, payload });
    }

    /// Finish the last file and write all PSARC file structures
    ///
    /// This will return the writer, but one should normally not append any data to the end of the file.
    #[instrument(skip(self), err)]
    pub fn finish(mut self) -> Result<W> {
        self.finish_file();
        self.options.validate()?;

        let mut files = self.files.into_values().collect::<Vec<_>>();
        let mut hashes = files
            .iter()
            .map(|file| name_hash(&file.name))
            .collect::<Vec<NameHash>>();
        if self.options.order == EntryOrder::NameHash {
            let mut order = files.into_iter().zip(hashes).collect::<Vec<_>>();
            order.sort_by_key(|(_, hash)| *hash);
            (files, hashes) = order.into_iter().unzip();
        }

        let manifest = files
            .iter()
            .map(|file| file.name.as_ref())
            .collect::<Vec<_>>()
            .join("\n");
        let manifest = Payload::Plain(manifest.into_bytes());
        let payloads = std::iter::once(&manifest)
            .chain(files.iter().map(|file| &file.payload))
            .collect::<Vec<_>>();

        let level = Compression::new(self.options.compression_level);
        let encoded = encode_all(&payloads, self.options.block_size, level)?;

        let block_count = encoded.iter().map(|entry| entry.zsizes.len() as u64).sum::<u64>();
        let toc_length = HEADER_SIZE as u64
            + encoded.len() as u64 * TOC_ENTRY_SIZE as u64
            + block_count * 2;
        let header = PsarcHeader {
            toc_length: u32::try_from(toc_length).map_err(|_| Error::ArchiveTooLarge(toc_length))?,
            file_count: encoded.len() as u32,
            block_size: self.options.block_size,
            flags: self.options.flags(),
            ..Default::default()
        };

        // Offsets depend on the size of everything before the data section
        let mut records = Vec::with_capacity(encoded.len());
        let mut data_offset = toc_length;
        let mut zsize_index = 0u32;
        for (hash, entry) in std::iter::once(MANIFEST_HASH).chain(hashes).zip(&encoded) {
            records.push(TocRecord::try_from(&TocEntry {
                name_hash: hash,
                zsize_index,
                uncompressed_size: entry.size,
                data_offset,
            })?);
            data_offset += entry.stored_len();
            zsize_index += entry.zsizes.len() as u32;
        }
        debug!(
            files = files.len(),
            blocks = block_count,
            size = data_offset,
            "laid out archive"
        );

        header.write(&mut self.inner)?;
        for record in &records {
            record.write(&mut self.inner)?;
        }
        for zsize in encoded.iter().flat_map(|entry| &entry.zsizes) {
            self.inner.write_u16::<BigEndian>(*zsize)?;
        }
        for block in encoded.iter().flat_map(|entry| &entry.blocks) {
            self.inner.write_all(block)?;
        }
        self.inner.flush()?;

        Ok(self.inner)
    }
}

impl<W: Write + Seek> Write for PsarcWriter<W> {
    #[instrument(skip_all, err, ret(level = Level::TRACE), fields(size=buf.len()) )]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(file) = self.current.as_mut() else {
            return Err(io::Error::other("No file has been started"));
        };
        file.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    #[instrument(skip(self), err)]
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Build a complete archive in memory
///
/// Files are laid out in the order given, the remaining options keep their defaults.
pub fn build<N, D>(
    entries: impl IntoIterator<Item = (N, D)>,
    block_size: u32,
    ignore_case: bool,
) -> Result<Vec<u8>>
where
    N: AsRef<str>,
    D: AsRef<[u8]>,
{
    let options = PsarcWriterOptions::builder()
        .block_size(block_size)
        .ignore_case(ignore_case)
        .build();

    let mut writer = PsarcWriter::new(Cursor::new(Vec::new()), options);
    for (name, data) in entries {
        writer.add_file(name, data.as_ref())?;
    }

    Ok(writer.finish()?.into_inner())
}

fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.trim() != name {
        "name has leading or trailing whitespace"
    } else if name.contains(['\n', '\r', '\0']) {
        "name contains a line break or NUL"
    } else if name.starts_with('\u{FEFF}') {
        "name starts with a byte order mark"
    } else {
        return Ok(());
    };

    Err(Error::InvalidName {
        name: name.to_owned(),
        reason,
    })
}

/// Split `data` into blocks and compress each one
///
/// A block is kept compressed only when that saves space against a full block and its size
/// fits the block size table, otherwise it is stored raw with a zsize of 0.
fn encode(data: &[u8], block_size: u32, level: Compression) -> Result<EncodedEntry<'_>> {
    let mut entry = EncodedEntry {
        size: data.len() as u64,
        zsizes: Vec::new(),
        blocks: Vec::new(),
    };

    for chunk in data.chunks(block_size as usize) {
        let compressed = CompressionMethod::Zlib.compress(chunk, level)?;
        match u16::try_from(compressed.len()) {
            Ok(zsize) if compressed.len() < block_size as usize => {
                entry.zsizes.push(zsize);
                entry.blocks.push(Cow::Owned(compressed));
            }
            _ => {
                entry.zsizes.push(0);
                entry.blocks.push(Cow::Borrowed(chunk));
            }
        }
    }

    Ok(entry)
}

#[cfg(feature = "parallel")]
fn encode_all<'a>(
    payloads: &[&'a Payload],
    block_size: u32,
    level: Compression,
) -> Result<Vec<EncodedEntry<'a>>> {
    use rayon::prelude::*;

    payloads
        .par_iter()
        .map(|payload| payload.encode(block_size, level))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn encode_all<'a>(
    payloads: &[&'a Payload],
    block_size: u32,
    level: Compression,
) -> Result<Vec<EncodedEntry<'a>>> {
    payloads
        .iter()
        .map(|payload| payload.encode(block_size, level))
        .collect()
}
