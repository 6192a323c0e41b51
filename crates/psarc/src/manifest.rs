//! Resolution of entry names through the manifest entry.
//!
//! The table of contents only stores a digest per entry. Human readable names come from entry 0,
//! whose data lists the names of entries `1..N` one per line, in table order.

use std::borrow::Cow;

use indexmap::IndexMap;
use tracing::{debug, instrument};

use crate::error::{FormatError, Result};
use crate::types::{ArchiveFlags, TocEntry};

/// Split manifest data into entry names
///
/// Lines end at `\n` or `\0`. Surrounding whitespace is dropped, which also covers `\r\n`
/// line endings, and blank lines are skipped.
pub fn parse_manifest(data: &[u8]) -> Vec<Box<str>> {
    let text = String::from_utf8_lossy(data);
    let text = text.strip_prefix('\u{FEFF}').unwrap_or(&text);

    text.split(|c: char| c == '\n' || c == '\0')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(Box::from)
        .collect()
}

/// A view of one table of contents entry at the API boundary
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Entry<'a> {
    /// Entry 0, the list of names
    Manifest(&'a TocEntry),
    /// A named file
    File { name: &'a str, meta: &'a TocEntry },
}

impl<'a> Entry<'a> {
    /// The entry's table of contents record
    pub fn meta(&self) -> &'a TocEntry {
        match *self {
            Entry::Manifest(meta) => meta,
            Entry::File { meta, .. } => meta,
        }
    }

    /// The entry's name, `None` for the manifest
    pub fn name(&self) -> Option<&'a str> {
        match *self {
            Entry::Manifest(_) => None,
            Entry::File { name, .. } => Some(name),
        }
    }
}

/// A named file entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileData {
    /// Name as listed in the manifest
    pub name: Box<str>,
    /// Position in the table of contents, the manifest being 0
    pub toc_index: usize,
    /// Table of contents record
    pub entry: TocEntry,
}

/// Maps names to entries, honouring the archive's case rule
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct NameResolver {
    ignore_case: bool,
}

impl From<ArchiveFlags> for NameResolver {
    fn from(flags: ArchiveFlags) -> Self {
        Self::new(flags.ignore_case())
    }
}

impl NameResolver {
    pub fn new(ignore_case: bool) -> Self {
        Self { ignore_case }
    }

    /// Whether names are matched case-insensitively
    pub fn ignore_case(&self) -> bool {
        self.ignore_case
    }

    /// The key a name is indexed and looked up under
    pub fn lookup_key<'n>(&self, name: &'n str) -> Cow<'n, str> {
        if self.ignore_case && name.bytes().any(|b| b.is_ascii_uppercase()) {
            Cow::Owned(name.to_ascii_lowercase())
        } else {
            Cow::Borrowed(name)
        }
    }

    /// Pair the manifest's names with the table of contents
    ///
    /// `read_manifest` is handed entry 0 and returns its data. It is only called once the
    /// manifest entry has been located.
    #[instrument(skip_all, fields(entries = entries.len()), err)]
    pub fn resolve<F>(&self, entries: &[TocEntry], read_manifest: F) -> Result<Catalog>
    where
        F: FnOnce(&TocEntry) -> Result<Vec<u8>>,
    {
        let found = entries.iter().filter(|entry| entry.is_manifest()).count();
        let manifest = match entries.first() {
            Some(first) if first.is_manifest() && found == 1 => *first,
            _ => return Err(FormatError::MissingOrDuplicateManifest { found }.into()),
        };

        let names = parse_manifest(&read_manifest(&manifest)?);
        let files = &entries[1..];
        if names.len() != files.len() {
            return Err(FormatError::ManifestEntryCountMismatch {
                names: names.len(),
                entries: files.len(),
            }
            .into());
        }

        let mut index = IndexMap::with_capacity(files.len());
        for (toc_index, (name, entry)) in names.into_iter().zip(files).enumerate() {
            let key: Box<str> = self.lookup_key(&name).into();
            let data = FileData {
                name,
                toc_index: toc_index + 1,
                entry: *entry,
            };

            if let Some(previous) = index.insert(key, data) {
                return Err(FormatError::DuplicateName(previous.name.into()).into());
            }
        }
        debug!(files = index.len(), ignore_case = self.ignore_case, "resolved manifest");

        Ok(Catalog {
            resolver: *self,
            manifest,
            files: index,
        })
    }
}

/// The resolved names of an archive
#[derive(Debug, Clone)]
pub struct Catalog {
    resolver: NameResolver,
    manifest: TocEntry,
    files: IndexMap<Box<str>, FileData>,
}

impl Catalog {
    /// Entry 0
    pub fn manifest(&self) -> &TocEntry {
        &self.manifest
    }

    pub fn resolver(&self) -> NameResolver {
        self.resolver
    }

    /// Number of named files
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Position of `name` among the named files
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.files.get_index_of(self.resolver.lookup_key(name).as_ref())
    }

    /// Look up a file by name
    pub fn get(&self, name: &str) -> Option<&FileData> {
        self.files.get(self.resolver.lookup_key(name).as_ref())
    }

    /// Look up a file by its position among the named files
    pub fn get_index(&self, index: usize) -> Option<&FileData> {
        self.files.get_index(index).map(|(_, data)| data)
    }

    /// Named files in table of contents order
    pub fn files(&self) -> impl Iterator<Item = &FileData> {
        self.files.values()
    }

    /// Every entry in table of contents order, the manifest first
    pub fn entries(&self) -> impl Iterator<Item = Entry<'_>> {
        std::iter::once(Entry::Manifest(&self.manifest)).chain(self.files.values().map(|file| {
            Entry::File {
                name: &file.name,
                meta: &file.entry,
            }
        }))
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::error::{Error, FormatError, Result};
    use crate::manifest::{parse_manifest, Entry, NameResolver};
    use crate::types::TocEntry;

    fn file(tag: u8, uncompressed_size: u64) -> TocEntry {
        TocEntry {
            name_hash: [tag; 16],
            uncompressed_size,
            ..Default::default()
        }
    }

    fn manifest() -> TocEntry {
        TocEntry {
            uncompressed_size: 17,
            ..Default::default()
        }
    }

    #[test]
    fn parse_lines() {
        let names = parse_manifest(b"\xEF\xBB\xBFa.txt\r\nsub/B.png\n\n  c.bin \0d\n");
        let names = names.iter().map(|name| &**name).collect::<Vec<&str>>();

        assert_eq!(names, vec!["a.txt", "sub/B.png", "c.bin", "d"]);
    }

    #[test]
    fn parse_empty() {
        assert!(parse_manifest(b"").is_empty());
        assert!(parse_manifest(b"\n\n").is_empty());
    }

    #[test]
    fn lookup_keys() {
        let insensitive = NameResolver::new(true);
        assert_eq!(insensitive.lookup_key("Foo.PNG"), "foo.png");
        assert_eq!(insensitive.lookup_key("foo.png"), "foo.png");

        let sensitive = NameResolver::new(false);
        assert_eq!(sensitive.lookup_key("Foo.PNG"), "Foo.PNG");
    }

    #[test]
    #[traced_test]
    fn resolve_names() -> Result<()> {
        let entries = [manifest(), file(1, 3), file(2, 5)];
        let catalog = NameResolver::new(true).resolve(&entries, |entry| {
            assert_eq!(entry, &manifest());
            Ok(b"a.txt\nDir/Foo.PNG".to_vec())
        })?;

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.index_of("dir/foo.png"), Some(1));

        let foo = catalog.get("DIR/FOO.png").map(|data| (&*data.name, data.toc_index));
        assert_eq!(foo, Some(("Dir/Foo.PNG", 2)));
        assert_eq!(catalog.get("a.TXT").map(|data| data.entry), Some(file(1, 3)));

        let entries = catalog.entries().collect::<Vec<_>>();
        assert_eq!(entries[0], Entry::Manifest(&manifest()));
        assert_eq!(entries[1].name(), Some("a.txt"));
        assert_eq!(entries[2].meta(), &file(2, 5));

        assert!(logs_contain("resolved manifest"));

        Ok(())
    }

    #[test]
    fn resolve_case_sensitive() -> Result<()> {
        let entries = [manifest(), file(1, 3), file(2, 5)];
        let catalog = NameResolver::new(false).resolve(&entries, |_| Ok(b"a.txt\nA.txt".to_vec()))?;

        assert_eq!(catalog.get("a.txt").map(|data| data.toc_index), Some(1));
        assert_eq!(catalog.get("A.txt").map(|data| data.toc_index), Some(2));
        assert!(catalog.get("A.TXT").is_none());

        Ok(())
    }

    #[test]
    fn resolve_duplicate_names() {
        let entries = [manifest(), file(1, 3), file(2, 5)];
        let result = NameResolver::new(true).resolve(&entries, |_| Ok(b"a.txt\nA.txt".to_vec()));

        assert!(matches!(
            result,
            Err(Error::Format(FormatError::DuplicateName(name))) if name == "a.txt"
        ));
    }

    #[test]
    fn resolve_without_manifest() {
        let entries = [file(1, 3), file(2, 5)];
        let result = NameResolver::new(true).resolve(&entries, |_| unreachable!());

        assert!(matches!(
            result,
            Err(Error::Format(FormatError::MissingOrDuplicateManifest { found: 0 }))
        ));

        let result = NameResolver::new(true).resolve(&[], |_| unreachable!());
        assert!(matches!(
            result,
            Err(Error::Format(FormatError::MissingOrDuplicateManifest { found: 0 }))
        ));
    }

    #[test]
    fn resolve_misplaced_manifest() {
        let entries = [file(1, 3), manifest()];
        let result = NameResolver::new(true).resolve(&entries, |_| unreachable!());

        assert!(matches!(
            result,
            Err(Error::Format(FormatError::MissingOrDuplicateManifest { found: 1 }))
        ));
    }

    #[test]
    fn resolve_two_manifests() {
        let entries = [manifest(), manifest(), file(1, 3)];
        let result = NameResolver::new(true).resolve(&entries, |_| unreachable!());

        assert!(matches!(
            result,
            Err(Error::Format(FormatError::MissingOrDuplicateManifest { found: 2 }))
        ));
    }

    #[test]
    fn resolve_count_mismatch() {
        let entries = [manifest(), file(1, 3), file(2, 5)];
        let result = NameResolver::new(true).resolve(&entries, |_| Ok(b"a.txt\n".to_vec()));

        assert!(matches!(
            result,
            Err(Error::Format(FormatError::ManifestEntryCountMismatch {
                names: 1,
                entries: 2
            }))
        ));
    }
}
