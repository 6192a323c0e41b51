pub mod extract;
pub mod list;
pub mod pack;
pub mod verify;

/// File the manifest is written to by `extract --manifest` and read back by `pack`
pub const MANIFEST_FILE: &str = "filenames.txt";

#[derive(clap::Subcommand)]
pub enum Commands {
    /// List the files of a PSARC archive
    List(list::ListArgs),
    /// Extract a PSARC archive into a directory
    Extract(extract::ExtractArgs),
    /// Pack a directory into a PSARC archive
    Pack(pack::PackArgs),
    /// Check that every file of a PSARC archive decodes
    Verify(verify::VerifyArgs),
}

impl Commands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            Commands::List(list) => list.handle(),
            Commands::Extract(extract) => extract.handle(),
            Commands::Pack(pack) => pack.handle(),
            Commands::Verify(verify) => verify.handle(),
        }
    }
}
