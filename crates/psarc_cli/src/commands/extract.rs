use clap::Args;
use miette::{miette, Context, IntoDiagnostic, Result};
use psarc::PsarcArchive;
use std::{
    fs::File,
    io::Write,
    path::{Component, Path, PathBuf},
};
use tracing::info;

use super::MANIFEST_FILE;

#[derive(Args)]
pub struct ExtractArgs {
    /// An input PSARC file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// A target directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,

    /// Also write the manifest to filenames.txt
    #[arg(long, default_value_t = false)]
    manifest: bool,
}

impl ExtractArgs {
    pub fn handle(&self) -> Result<()> {
        let archive =
            PsarcArchive::open(&self.file).context(format!("opening {}", &self.file.display()))?;
        let absolute = archive.header().flags.absolute_paths();

        for i in 0..archive.len() {
            let file = archive.by_index(i)?;

            // Absolute archives root their names, extract them below the target anyway
            let name = if absolute {
                file.name().trim_start_matches('/')
            } else {
                file.name()
            };
            let p = self.directory.join(checked_relative_path(name)?);
            info!("writing {}", p.display());

            let data = file
                .read_to_vec()
                .context(format!("decoding {}", file.name()))?;
            if let Some(parent) = p.parent() {
                std::fs::create_dir_all(parent)
                    .into_diagnostic()
                    .context(format!("creating {}", parent.display()))?;
            }
            self.create(&p)?.write_all(&data).into_diagnostic()?;
        }

        if self.manifest {
            let p = self.directory.join(MANIFEST_FILE);
            info!("writing {}", p.display());

            std::fs::create_dir_all(&self.directory).into_diagnostic()?;
            self.create(&p)?
                .write_all(&archive.manifest_bytes()?)
                .into_diagnostic()?;
        }

        Ok(())
    }

    fn create(&self, p: &Path) -> Result<File> {
        if !self.overwrite {
            File::create_new(p)
                .into_diagnostic()
                .context(format!("creating {}", p.display()))
        } else {
            File::create(p)
                .into_diagnostic()
                .context(format!("creating {}", p.display()))
        }
    }
}

/// Refuse names that would leave the target directory
fn checked_relative_path(name: &str) -> Result<&Path> {
    let path = Path::new(name);
    let relative = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !name.is_empty() && relative {
        Ok(path)
    } else {
        Err(miette!("refusing to extract {name:?} outside of the target directory"))
    }
}
