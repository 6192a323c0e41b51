use clap::{Args, ValueEnum};
use itertools::Itertools;
use miette::{miette, Context, IntoDiagnostic, Result};
use psarc::{
    manifest::parse_manifest,
    read::PsarcFile,
    types::DEFAULT_BLOCK_SIZE,
    write::{EntryOrder, PsarcWriterOptions},
    PsarcArchive, PsarcWriter,
};
use std::{
    collections::HashMap,
    fs::File,
    io::BufWriter,
    path::{Component, Path, PathBuf},
    time::SystemTime,
};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::MANIFEST_FILE;

/// File order used when no file list decides it
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Order {
    /// Ascending MD5 name hash
    Hash,
    /// Ascending archive path
    Path,
}

impl From<Order> for EntryOrder {
    fn from(order: Order) -> Self {
        match order {
            Order::Hash => EntryOrder::NameHash,
            Order::Path => EntryOrder::Insertion,
        }
    }
}

#[derive(Args)]
pub struct PackArgs {
    /// An input directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// A target PSARC file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,

    /// Uncompressed size of a full block
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: u32,

    /// zlib compression level
    #[arg(long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(0..=9))]
    level: u32,

    /// Match names case-sensitively when reading the archive
    #[arg(long, default_value_t = false)]
    case_sensitive: bool,

    /// File order when the directory has no filenames.txt listing every file
    #[arg(long, value_enum, default_value_t = Order::Hash)]
    order: Order,

    /// Reuse the stored blocks of files left unchanged since this archive was written
    #[arg(long, value_name = "FILE")]
    incremental: Option<PathBuf>,
}

impl PackArgs {
    pub fn handle(&self) -> Result<()> {
        info!("creating {}", &self.file.display());

        let target = std::fs::canonicalize(&self.file).ok();
        let mut listed = None;
        let mut files = Vec::new();
        for e in WalkDir::new(&self.directory)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_type().is_dir())
        {
            if target.is_some() && std::fs::canonicalize(e.path()).ok() == target {
                debug!("skipping the target {}", e.path().display());
                continue;
            }

            let name = archive_name(&self.directory, e.path())?;
            if name.eq_ignore_ascii_case(MANIFEST_FILE) {
                let list = std::fs::read(e.path())
                    .into_diagnostic()
                    .context(format!("reading {}", e.path().display()))?;
                listed = Some(list);
                continue;
            }

            files.push((name, e.into_path()));
        }

        if files.is_empty() {
            return Err(miette!("directory is empty"));
        }

        let ordered = match listed {
            Some(list) => order_by_list(&files, &list)?,
            None => None,
        };
        let (files, order) = match ordered {
            Some(ordered) => {
                info!("keeping the order of {}", MANIFEST_FILE);
                (ordered, EntryOrder::Insertion)
            }
            None => {
                let files = files
                    .into_iter()
                    .sorted_by(|(a, _), (b, _)| a.cmp(b))
                    .collect::<Vec<_>>();
                (files, self.order.into())
            }
        };

        let previous = match &self.incremental {
            Some(path) => self.open_previous(path, target.as_deref())?,
            None => None,
        };

        let out = if !self.overwrite {
            File::create_new(&self.file)
                .into_diagnostic()
                .context(format!("creating {}", &self.file.display()))?
        } else {
            File::create(&self.file)
                .into_diagnostic()
                .context(format!("creating {}", &self.file.display()))?
        };

        let mut psarc = PsarcWriter::new(
            BufWriter::new(out),
            PsarcWriterOptions::builder()
                .block_size(self.block_size)
                .compression_level(self.level)
                .ignore_case(!self.case_sensitive)
                .order(order)
                .build(),
        );

        let (mut reused, mut compressed) = (0usize, 0usize);
        for (name, path) in files {
            if let Some(file) = previous.as_ref().and_then(|p| p.unchanged(&name, &path)) {
                debug!("reusing {}", name);

                psarc
                    .copy_file(&name, &file)
                    .context(format!("copying {} from the previous archive", name))?;
                reused += 1;
                continue;
            }

            info!("packing {}", name);

            psarc
                .start_file(&name)
                .context(format!("starting entry for {}", name))?;

            let mut f = File::open(&path)
                .into_diagnostic()
                .context(format!("opening {}", path.display()))?;

            std::io::copy(&mut f, &mut psarc)
                .into_diagnostic()
                .context(format!("copying {}", path.display()))?;
            compressed += 1;
        }

        psarc.finish().context("finalizing psarc file")?;
        info!(reused, compressed, "wrote {}", self.file.display());

        Ok(())
    }

    /// Open the archive named by `--incremental`, `None` when there is nothing to reuse
    fn open_previous(
        &self,
        path: &Path,
        target: Option<&Path>,
    ) -> Result<Option<Previous<impl AsRef<[u8]>>>> {
        if !path.exists() {
            info!("{} does not exist, compressing every file", path.display());
            return Ok(None);
        }

        if target.is_some() && std::fs::canonicalize(path).ok().as_deref() == target {
            return Err(miette!(
                "unable to update {} in place, write the new archive to another file",
                path.display()
            ));
        }

        let modified = std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .into_diagnostic()
            .context(format!("reading the modification time of {}", path.display()))?;

        match PsarcArchive::open(path) {
            Ok(archive) => {
                info!(files = archive.len(), "reusing blocks from {}", path.display());
                Ok(Some(Previous { archive, modified }))
            }
            Err(err) => {
                warn!("unable to reuse {}: {}", path.display(), err);
                Ok(None)
            }
        }
    }
}

/// An earlier build of the archive
struct Previous<S> {
    archive: PsarcArchive<S>,
    modified: SystemTime,
}

impl<S: AsRef<[u8]>> Previous<S> {
    /// The packed copy of `name`, if the file at `path` has not changed since
    ///
    /// A file counts as unchanged when its size matches and it was last modified before the
    /// earlier archive was written.
    fn unchanged(&self, name: &str, path: &Path) -> Option<PsarcFile<'_>> {
        let file = self.archive.by_name(name).ok()?;
        let meta = std::fs::metadata(path).ok()?;

        (meta.len() == file.size() && meta.modified().ok()? <= self.modified).then_some(file)
    }
}

/// Arrange `files` in the order the file list names them
///
/// Returns `None` when some files are not listed, the list is then stale and the regular
/// order applies.
fn order_by_list(
    files: &[(String, PathBuf)],
    list: &[u8],
) -> Result<Option<Vec<(String, PathBuf)>>> {
    let mut paths = files
        .iter()
        .map(|(name, path)| (name.as_str(), path))
        .collect::<HashMap<_, _>>();

    let mut ordered = Vec::with_capacity(files.len());
    let mut missing = Vec::new();
    for name in parse_manifest(list) {
        let name = name.replace('\\', "/").trim_start_matches('/').to_owned();
        match paths.remove(name.as_str()) {
            Some(path) => ordered.push((name, path.clone())),
            None => missing.push(name),
        }
    }

    if !missing.is_empty() {
        return Err(miette!(
            "{} lists missing files: {}",
            MANIFEST_FILE,
            missing.join(", ")
        ));
    }

    if !paths.is_empty() {
        warn!(
            unlisted = paths.len(),
            "{} does not list every file, ignoring it", MANIFEST_FILE
        );
        return Ok(None);
    }

    Ok(Some(ordered))
}

/// Name of `path` inside the archive, relative to `root` and joined with forward slashes
fn archive_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).into_diagnostic()?;

    relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => part
                .to_str()
                .ok_or(miette!("unable to convert {} to a string", relative.display())),
            _ => Err(miette!("unexpected component in {}", relative.display())),
        })
        .collect::<Result<Vec<_>>>()
        .map(|parts| parts.join("/"))
}

#[cfg(test)]
mod test {
    use std::path::{Path, PathBuf};

    use miette::{IntoDiagnostic, Result};
    use psarc::PsarcArchive;

    use super::{archive_name, order_by_list, Order, PackArgs, MANIFEST_FILE};

    fn pack_args(directory: &Path, file: &Path) -> PackArgs {
        PackArgs {
            directory: directory.to_path_buf(),
            file: file.to_path_buf(),
            overwrite: true,
            block_size: 64,
            level: 6,
            case_sensitive: false,
            order: Order::Hash,
            incremental: None,
        }
    }

    #[test]
    fn names_use_forward_slashes() -> Result<()> {
        let root = Path::new("mods").join("pack");
        let path = root.join("songs").join("a.ogg");

        assert_eq!(archive_name(&root, &path)?, "songs/a.ogg");
        assert!(archive_name(&root, Path::new("elsewhere/a.ogg")).is_err());

        Ok(())
    }

    #[test]
    fn file_list_order() -> Result<()> {
        let files = vec![
            ("a.txt".to_string(), PathBuf::from("in/a.txt")),
            ("sub/b.txt".to_string(), PathBuf::from("in/sub/b.txt")),
        ];

        let ordered = order_by_list(&files, b"\xEF\xBB\xBFsub\\b.txt\r\na.txt\n")?;
        assert_eq!(
            ordered,
            Some(vec![
                ("sub/b.txt".to_string(), PathBuf::from("in/sub/b.txt")),
                ("a.txt".to_string(), PathBuf::from("in/a.txt")),
            ])
        );

        assert_eq!(order_by_list(&files, b"a.txt")?, None);
        assert!(order_by_list(&files, b"a.txt\nsub/b.txt\nc.txt").is_err());

        Ok(())
    }

    #[test]
    fn repack_extracted_directory() -> Result<()> {
        let root = std::env::temp_dir().join(format!("psarc_cli_pack_{}", std::process::id()));
        let input = root.join("input");
        std::fs::create_dir_all(input.join("sub")).into_diagnostic()?;

        let big = (0..1000u32).map(|i| (i * 7 % 251) as u8).collect::<Vec<_>>();
        std::fs::write(input.join("z.txt"), b"last").into_diagnostic()?;
        std::fs::write(input.join("sub").join("big.bin"), &big).into_diagnostic()?;
        std::fs::write(input.join(MANIFEST_FILE), "z.txt\nsub/big.bin").into_diagnostic()?;

        let first = root.join("first.psarc");
        pack_args(&input, &first).handle()?;

        let archive = PsarcArchive::open(&first)?;
        assert_eq!(
            archive.file_names().collect::<Vec<_>>(),
            vec!["z.txt", "sub/big.bin"]
        );
        assert_eq!(archive.extract("sub/big.bin")?, big);

        // The target lies inside the input directory and must not pack itself
        let second = input.join("second.psarc");
        std::fs::write(&second, b"stale").into_diagnostic()?;
        let mut args = pack_args(&input, &second);
        args.incremental = Some(first.clone());
        args.handle()?;

        let repacked = PsarcArchive::open(&second)?;
        assert_eq!(
            repacked.file_names().collect::<Vec<_>>(),
            vec!["z.txt", "sub/big.bin"]
        );
        assert_eq!(
            repacked.by_name("sub/big.bin")?.stored_blocks()?,
            archive.by_name("sub/big.bin")?.stored_blocks()?
        );
        assert_eq!(repacked.extract("z.txt")?, b"last");
        drop((archive, repacked));

        std::fs::remove_dir_all(&root).into_diagnostic()?;

        Ok(())
    }
}
