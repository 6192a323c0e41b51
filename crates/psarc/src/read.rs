//! Types for reading PSARC archives
//!

use std::{
    fmt::{self, Debug},
    fs::File,
    path::Path,
    sync::Arc,
};

use memmap2::Mmap;
use tracing::{debug, instrument};

use crate::{
    block::{BlockStream, StoredBlocks},
    error::{Error, FileNotFoundError, FormatError, Result},
    hash::{name_hash, to_hex},
    manifest::{Catalog, Entry, FileData, NameResolver},
    toc::{check_block_runs, decode_entries, ZSizeTable},
    types::{NameHash, PsarcHeader, TocEntry, Warning},
};

/// Label used as the origin of archives read from memory
pub const MEMORY_ORIGIN: &str = "<memory>";

/// A struct for reading an entry from a PSARC file
pub struct PsarcFile<'a> {
    data: &'a FileData,
    stream: BlockStream<'a>,
}

impl Debug for PsarcFile<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PsarcFile({:#?})", self.data)
    }
}

/// Methods for retrieving information on PSARC file entries
impl<'a> PsarcFile<'a> {
    /// Get the name of the file
    ///
    /// # Warnings
    ///
    /// It is dangerous to use this name directly when extracting an archive.
    /// It may contain an absolute path (`/etc/shadow`), or break out of the
    /// current directory (`../runtime`). Carelessly writing to these paths
    /// allows an attacker to craft a PSARC archive that will overwrite critical
    /// files.
    ///
    pub fn name(&self) -> &'a str {
        &self.data.name
    }

    /// Get the size of the file, in bytes, when uncompressed
    pub fn size(&self) -> u64 {
        self.data.entry.uncompressed_size
    }

    /// Get the name hash stored in the table of contents
    pub fn name_hash(&self) -> NameHash {
        self.data.entry.name_hash
    }

    /// Whether the stored name hash is the MD5 digest of the upper-cased name
    pub fn hash_matches(&self) -> bool {
        name_hash(&self.data.name) == self.data.entry.name_hash
    }

    /// Get the index of the first block size of this file
    pub fn zsize_index(&self) -> u32 {
        self.data.entry.zsize_index
    }

    /// Get the position of this file in the table of contents
    pub fn toc_index(&self) -> usize {
        self.data.toc_index
    }

    /// Get the starting offset of the data of the file
    pub fn data_start(&self) -> u64 {
        self.data.entry.data_offset
    }

    /// Get the number of blocks the file is split into
    pub fn block_count(&self) -> u64 {
        self.data.entry.block_count(self.stream.block_size())
    }

    /// Get the number of bytes the file occupies in the archive
    pub fn stored_size(&self) -> Result<u64> {
        self.stream
            .spans(&self.data.entry)
            .map(|span| span.map(|span| span.stored_len()))
            .sum()
    }

    /// Get the uncompressed size of the archive's full blocks
    pub fn block_size(&self) -> u32 {
        self.stream.block_size()
    }

    /// Borrow the file's blocks as they are stored, still compressed
    pub fn stored_blocks(&self) -> Result<StoredBlocks<'a>> {
        self.stream.stored(&self.data.entry)
    }

    /// Get the table of contents record of the file
    pub fn meta(&self) -> &'a TocEntry {
        &self.data.entry
    }

    /// Decode the whole file
    pub fn read_to_vec(&self) -> Result<Vec<u8>> {
        self.stream.read(&self.data.entry)
    }
}

/// Summary of one file, as shown to a consumer browsing the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Name as listed in the manifest
    pub display_name: String,
    /// Uncompressed size in bytes
    pub size: u64,
    /// Label of the archive the entry comes from
    pub source_origin: Arc<str>,
}

/// The read surface offered to archive browsers
pub trait EntrySource {
    /// Every named file in archive order
    fn list_entries(&self) -> Vec<EntryInfo>;

    /// The full data of the file called `name`
    fn read_entry(&self, name: &str) -> Result<Vec<u8>>;
}

#[derive(Debug)]
struct Shared {
    header: PsarcHeader,
    warnings: Vec<Warning>,
    zsizes: ZSizeTable,
    catalog: Catalog,
}

/// PSARC archive reader
///
/// All metadata is decoded and validated when the archive is opened. Reading files only
/// borrows the archive, so one archive can be shared by many threads.
///
/// ```no_run
/// fn list_psarc_contents(path: &str) -> psarc::error::Result<()> {
///     let archive = psarc::PsarcArchive::open(path)?;
///
///     for i in 0..archive.len() {
///         let file = archive.by_index(i)?;
///         println!("Filename: {}", file.name());
///         std::io::Write::write_all(&mut std::io::stdout(), &file.read_to_vec()?)?;
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct PsarcArchive<S> {
    source: S,
    origin: Arc<str>,
    shared: Arc<Shared>,
}

impl<S> Debug for PsarcArchive<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PsarcArchive")
            .field("origin", &self.origin)
            .field("header", &self.shared.header)
            .field("files", &self.shared.catalog.len())
            .finish()
    }
}

impl<S> PsarcArchive<S> {
    /// Total size of the files in the archive, if it can be known. Doesn't include the
    /// manifest.
    pub fn decompressed_size(&self) -> Option<u128> {
        let mut total = 0u128;
        for file in self.shared.catalog.files() {
            total = total.checked_add(file.entry.uncompressed_size as u128)?;
        }
        Some(total)
    }

    /// Number of named files contained in this PSARC.
    pub fn len(&self) -> usize {
        self.shared.catalog.len()
    }

    /// Whether this PSARC archive contains no named files
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns an iterator over all the file names in this archive, in table of contents order.
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.shared.catalog.files().map(|file| file.name.as_ref())
    }

    /// Every entry in table of contents order, the manifest first
    pub fn entries(&self) -> impl Iterator<Item = Entry<'_>> {
        self.shared.catalog.entries()
    }

    /// The decoded header
    pub fn header(&self) -> &PsarcHeader {
        &self.shared.header
    }

    /// The archive wide block size table
    pub fn zsizes(&self) -> &ZSizeTable {
        &self.shared.zsizes
    }

    /// Non fatal findings made while opening the archive
    pub fn warnings(&self) -> &[Warning] {
        &self.shared.warnings
    }

    /// How names are matched against the manifest
    pub fn resolver(&self) -> NameResolver {
        self.shared.catalog.resolver()
    }

    /// Label naming where the archive came from
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Replace the label naming where the archive came from
    pub fn with_origin(mut self, origin: impl Into<Arc<str>>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Get the index of a file entry by name, if it's present.
    #[inline(always)]
    pub fn index_for_name(&self, name: &str) -> Option<usize> {
        self.shared.catalog.index_of(name)
    }

    /// Get the name of a file entry, if it's present.
    #[inline(always)]
    pub fn name_for_index(&self, index: usize) -> Option<&str> {
        self.shared
            .catalog
            .get_index(index)
            .map(|file| file.name.as_ref())
    }

    /// Summaries of every named file in archive order
    pub fn list(&self) -> Vec<EntryInfo> {
        self.shared
            .catalog
            .files()
            .map(|file| EntryInfo {
                display_name: file.name.to_string(),
                size: file.entry.uncompressed_size,
                source_origin: self.origin.clone(),
            })
            .collect()
    }

    /// Unwrap and return the inner byte source
    pub fn into_inner(self) -> S {
        self.source
    }
}

impl PsarcArchive<Mmap> {
    /// Memory map and open the archive at `path`
    ///
    /// The path becomes the archive's origin.
    #[instrument(skip_all, err)]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;

        // SAFETY: the mapping is only ever read. Modifying the file while it is mapped is
        // undefined behaviour which callers of `open` accept, as with any mapped archive.
        let mmap = unsafe { Mmap::map(&file)? };

        Ok(Self::new(mmap)?.with_origin(path.display().to_string()))
    }
}

impl<S: AsRef<[u8]>> PsarcArchive<S> {
    /// Read a PSARC archive collecting the files it contains.
    ///
    /// The header, table of contents, block size table and manifest are all checked here, a
    /// successfully opened archive has structurally valid metadata.
    #[instrument(skip_all, err)]
    pub fn new(source: S) -> Result<PsarcArchive<S>> {
        let shared = Self::get_metadata(source.as_ref())?;
        debug!(
            files = shared.catalog.len(),
            blocks = shared.zsizes.len(),
            "opened archive"
        );

        Ok(PsarcArchive {
            source,
            origin: MEMORY_ORIGIN.into(),
            shared: shared.into(),
        })
    }

    /// Search for a file entry by name
    pub fn by_name(&self, name: &str) -> Result<PsarcFile<'_>> {
        let Some(data) = self.shared.catalog.get(name) else {
            return Err(Error::FileNotFound(FileNotFoundError::Name(
                name.to_owned(),
            )));
        };
        Ok(self.file(data))
    }

    /// Get a contained file by index
    pub fn by_index(&self, file_number: usize) -> Result<PsarcFile<'_>> {
        let data = self
            .shared
            .catalog
            .get_index(file_number)
            .ok_or(Error::FileNotFound(FileNotFoundError::Index(file_number)))?;

        Ok(self.file(data))
    }

    /// Search for a file entry by the name hash stored in the table of contents
    pub fn by_hash(&self, hash: &NameHash) -> Result<PsarcFile<'_>> {
        let data = self
            .shared
            .catalog
            .files()
            .find(|file| &file.entry.name_hash == hash)
            .ok_or_else(|| Error::FileNotFound(FileNotFoundError::Hash(to_hex(hash))))?;

        Ok(self.file(data))
    }

    /// Decode the file called `name`
    #[instrument(skip(self), err)]
    pub fn extract(&self, name: &str) -> Result<Vec<u8>> {
        self.by_name(name)?.read_to_vec()
    }

    /// Decode the file at `file_number`
    pub fn extract_by_index(&self, file_number: usize) -> Result<Vec<u8>> {
        self.by_index(file_number)?.read_to_vec()
    }

    /// Decode the manifest entry
    pub fn manifest_bytes(&self) -> Result<Vec<u8>> {
        self.stream().read(self.shared.catalog.manifest())
    }

    /// Check that no two entries claim overlapping bytes of the data section
    #[instrument(skip(self), err)]
    pub fn check_overlaps(&self) -> Result<()> {
        let stream = self.stream();
        let mut ranges = Vec::with_capacity(self.len() + 1);
        for (toc_index, entry) in self.entries().enumerate() {
            let meta = entry.meta();
            let stored = stream
                .spans(meta)
                .map(|span| span.map(|span| span.stored_len()))
                .sum::<Result<u64>>()?;
            if stored > 0 {
                ranges.push((meta.data_offset, meta.data_offset + stored, toc_index));
            }
        }

        ranges.sort_unstable();
        for pair in ranges.windows(2) {
            let (_, first_end, first) = pair[0];
            let (second_start, _, second) = pair[1];
            if second_start < first_end {
                return Err(FormatError::OverlappingEntries { first, second }.into());
            }
        }

        Ok(())
    }

    fn file<'a>(&'a self, data: &'a FileData) -> PsarcFile<'a> {
        PsarcFile {
            data,
            stream: self.stream(),
        }
    }

    fn stream(&self) -> BlockStream<'_> {
        let header = &self.shared.header;
        BlockStream::new(
            self.source.as_ref(),
            &self.shared.zsizes,
            header.block_size,
            // Checked when the header was decoded
            header.compression_method().unwrap_or_default(),
        )
    }

    fn get_metadata(data: &[u8]) -> Result<Shared> {
        let (header, warning) = PsarcHeader::decode(data)?;
        let entries = decode_entries(data, &header)?;
        let zsizes = ZSizeTable::decode(data, &header)?;
        check_block_runs(&entries, &zsizes, header.block_size)?;

        let stream = BlockStream::new(
            data,
            &zsizes,
            header.block_size,
            header.compression_method()?,
        );
        let catalog = NameResolver::from(header.flags).resolve(&entries, |manifest| {
            stream.read(manifest)
        })?;

        Ok(Shared {
            header,
            warnings: warning.into_iter().collect(),
            zsizes,
            catalog,
        })
    }
}

impl<S: AsRef<[u8]>> EntrySource for PsarcArchive<S> {
    fn list_entries(&self) -> Vec<EntryInfo> {
        self.list()
    }

    fn read_entry(&self, name: &str) -> Result<Vec<u8>> {
        self.extract(name)
    }
}
