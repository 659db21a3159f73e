use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::error::{Error, Result};

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "lifelog")
        .ok_or_else(|| Error::Config("could not determine home directory".into()))
}

/// ~/.config/lifelog/config.toml or platform equivalent
pub fn default_config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

/// ~/.local/share/lifelog or platform equivalent
pub fn data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// True when `tool` can be spawned from PATH. Every tool we shell out to
/// (rsync, ssh, ffprobe) answers `--version` or `-version` with status 0, so
/// only a spawn failure counts as missing.
pub fn tool_available(tool: &str) -> bool {
    Command::new(tool)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

pub fn require_tool(tool: &str) -> Result<()> {
    if tool_available(tool) {
        Ok(())
    } else {
        Err(Error::MissingTool(tool.to_string()))
    }
}
