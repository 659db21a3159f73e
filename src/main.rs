use std::process::ExitCode;

use clap::Parser;
use lifelog::cli::{Cli, Command};
use lifelog::config::Config;
use lifelog::extract::SystemExtractors;
use lifelog::previews;
use lifelog::report::{self, SnapshotSummary};
use lifelog::snapshot::{RsyncTransfer, SnapshotStore};
use lifelog::source::{Context, Source};
use lifelog::store::EntryStore;
use lifelog::{scheduler, Error, Result};
use tracing::Level;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // RUST_LOG wins over -v
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn rsync_snapshots(config: &Config, key: &str) -> Result<SnapshotStore> {
    match config.source(key)? {
        Source::Rsync(source) => Ok(source.snapshots(&config.backups_root)),
        other => Err(Error::Config(format!(
            "source '{key}' is a {} source and has no snapshots",
            other.source_type()
        ))),
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(root) = cli.backups_root {
        config.backups_root = root;
    }
    if let Some(database) = cli.database {
        config.database = database;
    }

    match cli.command {
        Command::Process(args) => {
            let sources: Vec<&Source> = if args.keys.is_empty() {
                config.sources.iter().collect()
            } else {
                args.keys.iter().map(|k| config.source(k)).collect::<Result<_>>()?
            };

            let mut store = EntryStore::open(&config.database)?;
            let mut ctx = Context {
                config: &config,
                store: &mut store,
                extractors: &SystemExtractors,
                transfer: &RsyncTransfer,
            };

            let summary = scheduler::run(sources, &mut ctx, args.force);
            print!("{}", report::table::summary(&summary, cli.verbose > 0));

            if !summary.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Sources => {
            print!("{}", report::table::sources(&config.sources));
        }
        Command::Snapshots(args) => {
            let snapshots = rsync_snapshots(&config, &args.key)?;
            let latest = snapshots.latest()?;
            let summaries = snapshots
                .list()?
                .iter()
                .map(|s| SnapshotSummary::collect(s, latest.as_ref() == Some(s)))
                .collect::<Result<Vec<_>>>()?;

            if args.json {
                println!("{}", report::json::render(&summaries)?);
            } else {
                print!("{}", report::table::snapshots(&summaries));
            }
        }
        Command::Changes(args) => {
            let snapshots = rsync_snapshots(&config, &args.key)?;
            let snapshot = match &args.snapshot {
                Some(name) => Some(snapshots.get(name)?),
                None => snapshots.latest()?,
            };

            match snapshot {
                Some(snapshot) => {
                    println!("snapshot: {}\n", snapshot.name());
                    print!("{}", report::table::changes(&snapshot.changes()?, &snapshot.files_path()));
                }
                None => println!("No snapshots yet. Run 'lifelog process {}' first.", args.key),
            }
        }
        Command::Entries(args) => {
            let provenance = config.source(&args.key)?.provenance();
            let store = EntryStore::open(&config.database)?;

            let entries = match &args.snapshot {
                Some(name) => {
                    let snapshot = rsync_snapshots(&config, &args.key)?.get(name)?;
                    store.entries_for_backup(&provenance, &snapshot.backup_date())?
                }
                None => store.entries_for_source(&provenance)?,
            };

            if args.json {
                println!("{}", report::json::render(&entries)?);
            } else {
                print!("{}", report::table::entries(&entries));
            }
        }
        Command::Forget(args) => {
            let provenance = config.source(&args.key)?.provenance();
            let mut store = EntryStore::open(&config.database)?;
            let deleted = store.delete_source_entries(&provenance)?;
            println!("deleted {deleted} entries of {provenance}");
        }
        Command::Export(args) => {
            let store = EntryStore::open(&config.database)?;
            let entries = store.all_entries()?;
            let json = report::json::render(&entries)?;
            std::fs::write(&args.file, json).map_err(|e| Error::file(&args.file, e))?;
            println!("exported {} entries to {}", entries.len(), args.file.display());
        }
        Command::Previews(args) => {
            let provenance = config.source(&args.key)?.provenance();
            let mut store = EntryStore::open(&config.database)?;
            let live = store.live_file_entries(&provenance)?;
            let targets = previews::targets(&config.previews_root, &live);

            if args.json {
                println!("{}", report::json::render(&targets)?);
            } else {
                print!("{}", report::table::previews(&targets));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
