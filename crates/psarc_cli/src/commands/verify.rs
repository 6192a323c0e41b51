use clap::Args;
use miette::{miette, Context, Result};
use owo_colors::OwoColorize;
use psarc::PsarcArchive;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Args)]
pub struct VerifyArgs {
    /// An input PSARC file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,
}

impl VerifyArgs {
    pub fn handle(&self) -> Result<()> {
        let archive =
            PsarcArchive::open(&self.file).context(format!("opening {}", &self.file.display()))?;
        for warning in archive.warnings() {
            warn!("{:?}", warning);
        }

        archive.check_overlaps().context("checking block layout")?;

        let mut failed = 0usize;
        let mut hash_mismatches = 0usize;
        for i in 0..archive.len() {
            let file = archive.by_index(i)?;
            if !file.hash_matches() {
                hash_mismatches += 1;
            }

            match file.read_to_vec() {
                Ok(data) => info!("{} {} ({} bytes)", "ok".green(), file.name(), data.len()),
                Err(e) => {
                    failed += 1;
                    error!("{} {}: {}", "failed".red(), file.name(), e);
                }
            }
        }

        if hash_mismatches > 0 {
            warn!(
                "{} of {} name hashes differ from the MD5 of the upper-cased name",
                hash_mismatches,
                archive.len()
            );
        }

        if failed > 0 {
            return Err(miette!("{} of {} files failed to decode", failed, archive.len()));
        }

        println!("{} {} files decoded", "ok".green().bold(), archive.len());

        Ok(())
    }
}
