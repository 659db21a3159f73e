use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lifelog")]
#[command(about = "Back up your data and turn it into a timeline")]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to ~/.config/lifelog/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override `backups_root` from the config file
    #[arg(long, global = true)]
    pub backups_root: Option<PathBuf>,

    /// Override `database` from the config file
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Back up and process sources (all of them by default)
    Process(ProcessArgs),

    /// List configured sources
    Sources,

    /// List the retained snapshots of an rsync source
    Snapshots(SnapshotsArgs),

    /// Show what a snapshot's transfer changed
    Changes(ChangesArgs),

    /// List the timeline entries of a source
    Entries(EntriesArgs),

    /// Delete every entry of a source (snapshots stay on disk)
    Forget(ForgetArgs),

    /// Write every entry to a JSON file
    Export(ExportArgs),

    /// Where the previews of a source's files belong, dropping entries whose
    /// file is gone
    Previews(PreviewsArgs),
}

#[derive(Parser)]
pub struct ProcessArgs {
    /// Source keys to process
    pub keys: Vec<String>,

    /// Reprocess every retained snapshot and skip all caches
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Parser)]
pub struct SnapshotsArgs {
    /// Source key
    pub key: String,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Parser)]
pub struct ChangesArgs {
    /// Source key
    pub key: String,

    /// Snapshot name (defaults to the latest)
    #[arg(long)]
    pub snapshot: Option<String>,
}

#[derive(Parser)]
pub struct EntriesArgs {
    /// Source key
    pub key: String,

    /// Only entries derived from this snapshot
    #[arg(long)]
    pub snapshot: Option<String>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Parser)]
pub struct ForgetArgs {
    /// Source key
    pub key: String,
}

#[derive(Parser)]
pub struct PreviewsArgs {
    /// Source key
    pub key: String,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Parser)]
pub struct ExportArgs {
    /// Destination file
    pub file: PathBuf,
}
