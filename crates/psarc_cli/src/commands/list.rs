use clap::Args;
use miette::{Context, Result};
use owo_colors::OwoColorize;
use psarc::{hash::to_hex, PsarcArchive};
use std::path::PathBuf;

#[derive(Args)]
pub struct ListArgs {
    /// An input PSARC file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Also show block layout and name hash of every file
    #[arg(short, long, default_value_t = false)]
    long: bool,
}

impl ListArgs {
    pub fn handle(&self) -> Result<()> {
        let archive =
            PsarcArchive::open(&self.file).context(format!("opening {}", &self.file.display()))?;

        for i in 0..archive.len() {
            let file = archive.by_index(i)?;
            if self.long {
                println!(
                    "{:>12} {:>12} {:>6} {} {}",
                    file.size(),
                    file.stored_size()?,
                    file.block_count(),
                    to_hex(&file.name_hash()).dimmed(),
                    file.name()
                );
            } else {
                println!("{:>12} {}", file.size(), file.name());
            }
        }

        let header = archive.header();
        println!(
            "{} files, {} bytes, block size {}, {}",
            archive.len().bold(),
            archive.decompressed_size().unwrap_or_default().bold(),
            header.block_size,
            if header.flags.ignore_case() {
                "case-insensitive names"
            } else {
                "case-sensitive names"
            }
        );

        Ok(())
    }
}
