//! One backup run: copy the latest snapshot by hard links, let rsync bring it
//! up to date, keep the result only if something changed.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::changelog::count_actions;
use super::{Snapshot, SnapshotStore};
use crate::config::Config;
use crate::error::{Error, Result};

/// Lines of the transfer log kept in a failure report
const LOG_TAIL_LINES: usize = 5;

/// Where rsync pulls from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub user: Option<String>,
    /// `None` for a local directory
    pub host: Option<String>,
    pub port: u16,
    pub path: String,
}

impl Origin {
    pub fn is_remote(&self) -> bool {
        self.host.is_some()
    }

    /// The source argument for rsync. The trailing slash makes rsync copy the
    /// directory's contents, dotfiles included, instead of the directory.
    pub fn rsync_arg(&self) -> String {
        let dir = format!("{}/", self.path.trim().trim_end_matches('/'));
        match (&self.user, &self.host) {
            (Some(user), Some(host)) => format!("{user}@{host}:{dir}"),
            (None, Some(host)) => format!("{host}:{dir}"),
            _ => dir,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferRequest<'a> {
    pub origin: &'a Origin,
    /// The new snapshot's `files/` directory
    pub destination: PathBuf,
    /// stdout and stderr of the tool end up here
    pub log: PathBuf,
    pub ignore_file: &'a str,
    pub io_timeout: Duration,
    pub deadline: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    Failed { code: Option<i32> },
    TimedOut,
}

/// Brings `destination` in line with the origin and writes an itemized
/// change log.
pub trait Transfer {
    fn run(&self, request: &TransferRequest) -> Result<TransferOutcome>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RsyncTransfer;

impl RsyncTransfer {
    pub fn command(request: &TransferRequest) -> Command {
        let mut cmd = Command::new("rsync");
        cmd.arg("-az").arg("--itemize-changes").arg("--delete");
        if request.origin.is_remote() {
            cmd.arg("-e").arg(format!("ssh -p {}", request.origin.port));
        }
        cmd.arg("--timeout")
            .arg(request.io_timeout.as_secs().max(1).to_string())
            .arg("--filter")
            .arg(format!(":- {}", request.ignore_file))
            .arg(request.origin.rsync_arg())
            .arg(format!("{}/", request.destination.display()));
        cmd
    }
}

impl Transfer for RsyncTransfer {
    fn run(&self, request: &TransferRequest) -> Result<TransferOutcome> {
        let log = File::create(&request.log).map_err(|e| Error::file(&request.log, e))?;
        let log_err = log.try_clone().map_err(|e| Error::file(&request.log, e))?;

        let child = match Self::command(request)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
        {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::MissingTool("rsync".into()));
            }
            Err(e) => return Err(Error::Io(e)),
        };

        match wait_with_deadline(child, request.deadline)? {
            Some(status) if status.success() => Ok(TransferOutcome::Completed),
            Some(status) => Ok(TransferOutcome::Failed { code: status.code() }),
            None => Ok(TransferOutcome::TimedOut),
        }
    }
}

/// Wait for `child`, killing it once `deadline` has passed. `None` means it
/// was killed.
pub fn wait_with_deadline(mut child: Child, deadline: Option<Duration>) -> io::Result<Option<ExitStatus>> {
    let Some(deadline) = deadline else {
        return child.wait().map(Some);
    };

    let start = Instant::now();
    loop {
        match child.try_wait()? {
            Some(status) => return Ok(Some(status)),
            None => {
                if start.elapsed() > deadline {
                    let _ = child.kill();
                    // reap it so no zombie is left behind
                    let _ = child.wait();
                    return Ok(None);
                }
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
}

pub struct SnapshotEngine<'a> {
    snapshots: &'a SnapshotStore,
    transfer: &'a dyn Transfer,
    source_key: &'a str,
    origin: &'a Origin,
    ignore_file: &'a str,
    io_timeout: Duration,
    deadline: Option<Duration>,
}

impl<'a> SnapshotEngine<'a> {
    pub fn new(
        snapshots: &'a SnapshotStore,
        transfer: &'a dyn Transfer,
        source_key: &'a str,
        origin: &'a Origin,
        config: &'a Config,
    ) -> Self {
        SnapshotEngine {
            snapshots,
            transfer,
            source_key,
            origin,
            ignore_file: &config.transfer_ignore_file,
            io_timeout: config.transfer_timeout,
            deadline: config.transfer_deadline,
        }
    }

    /// Take a new snapshot. `Ok(None)` when the transfer changed nothing, in
    /// which case no directory is left behind and `latest` is untouched.
    pub fn run(&self, now: DateTime<Utc>) -> Result<Option<Snapshot>> {
        let previous = self.snapshots.latest()?;
        let snapshot = self.snapshots.allocate(now)?;

        if let Some(previous) = &previous {
            match link_tree(&previous.files_path(), &snapshot.files_path()) {
                Ok(linked) => debug!(from = %previous.name(), linked, "hard-linked previous snapshot"),
                Err(e) => {
                    self.discard(&snapshot);
                    return Err(e);
                }
            }
        }

        info!(source = self.source_key, origin = %self.origin.rsync_arg(), snapshot = %snapshot.name(), "starting transfer");
        let request = TransferRequest {
            origin: self.origin,
            destination: snapshot.files_path(),
            log: snapshot.log_path(),
            ignore_file: self.ignore_file,
            io_timeout: self.io_timeout,
            deadline: self.deadline,
        };

        let outcome = match self.transfer.run(&request) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.discard(&snapshot);
                return Err(e);
            }
        };

        match outcome {
            TransferOutcome::Completed => {}
            TransferOutcome::Failed { code } => {
                let log_tail = log_tail(&request.log);
                error!(source = self.source_key, ?code, "transfer failed, discarding snapshot");
                self.discard(&snapshot);
                return Err(Error::Transfer {
                    source_key: self.source_key.to_string(),
                    code,
                    log_tail,
                });
            }
            TransferOutcome::TimedOut => {
                let timeout = self.deadline.unwrap_or(self.io_timeout);
                error!(source = self.source_key, timeout = %humantime::format_duration(timeout), "transfer timed out, discarding snapshot");
                self.discard(&snapshot);
                return Err(Error::TransferTimeout {
                    source_key: self.source_key.to_string(),
                    timeout,
                });
            }
        }

        let changes = match snapshot.changes() {
            Ok(changes) => changes,
            Err(e) => {
                self.discard(&snapshot);
                return Err(e);
            }
        };

        let (new, changed, deleted) = count_actions(&changes);
        if changes.is_empty() {
            info!(source = self.source_key, "transfer finished, nothing changed");
            self.snapshots.discard(&snapshot)?;
            return Ok(None);
        }

        self.snapshots.set_latest(&snapshot)?;
        info!(source = self.source_key, snapshot = %snapshot.name(), new, changed, deleted, "snapshot created");
        Ok(Some(snapshot))
    }

    fn discard(&self, snapshot: &Snapshot) {
        // the transfer error matters more than a failed cleanup
        if let Err(e) = self.snapshots.discard(snapshot) {
            warn!(snapshot = %snapshot.root().display(), error = %e, "could not remove partial snapshot");
        }
    }
}

/// Recreate the tree under `from` at `to`: directories are created, regular
/// files hard-linked, symlinks recreated. Returns the number of linked files.
pub fn link_tree(from: &Path, to: &Path) -> Result<usize> {
    let mut linked = 0;

    for entry in WalkDir::new(from).follow_links(false).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(from).to_path_buf();
            Error::file(path, e.into())
        })?;
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        let target = to.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::file(&target, e))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(|e| Error::file(entry.path(), e))?;
            std::os::unix::fs::symlink(&link, &target).map_err(|e| Error::file(&target, e))?;
        } else if file_type.is_file() {
            fs::hard_link(entry.path(), &target).map_err(|e| Error::file(&target, e))?;
            linked += 1;
        }
    }

    Ok(linked)
}

fn log_tail(log: &Path) -> String {
    let Ok(raw) = fs::read(log) else {
        return String::new();
    };
    let text = String::from_utf8_lossy(&raw);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(LOG_TAIL_LINES)..].join("\n")
}
