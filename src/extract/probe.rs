//! Media probing through `ffprobe`.
//!
//! Runs `ffprobe -of json` and keeps the per-stream fields the timeline uses:
//! dimensions, duration, codec, rotation and creation time. JPEG and PNG files
//! come back as single-frame video streams, so callers deciding what a file
//! *is* should go by its schema, not by the probe.

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::entry;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeStream {
    pub kind: StreamKind,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Seconds
    pub duration: Option<f64>,
    pub codec: Option<String>,
    /// Clockwise degrees in 0..360
    pub rotation: Option<u16>,
    pub creation_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaProbe {
    pub streams: Vec<ProbeStream>,
}

impl MediaProbe {
    pub fn video(&self) -> Option<&ProbeStream> {
        self.streams.iter().find(|s| s.kind == StreamKind::Video)
    }

    pub fn audio(&self) -> Option<&ProbeStream> {
        self.streams.iter().find(|s| s.kind == StreamKind::Audio)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    // ffprobe prints durations as strings ("12.480000")
    duration: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

pub fn run_ffprobe(path: &Path) -> Result<MediaProbe> {
    let output = Command::new("ffprobe")
        .args(["-v", "error"])
        .args([
            "-show_entries",
            "stream=codec_type,codec_name,width,height,duration:stream_tags=rotate,creation_time",
        ])
        .args(["-of", "json"])
        .arg(path)
        .output();

    let output = match output {
        Ok(o) => o,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::MissingTool("ffprobe".into()));
        }
        Err(e) => return Err(Error::file(path, e)),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Probe {
            path: path.to_path_buf(),
            reason: format!(
                "ffprobe exited with status {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ),
        });
    }

    parse_ffprobe_json(&String::from_utf8_lossy(&output.stdout)).map_err(|e| Error::Probe {
        path: path.to_path_buf(),
        reason: format!("unreadable ffprobe output: {e}"),
    })
}

pub fn parse_ffprobe_json(json: &str) -> Result<MediaProbe, serde_json::Error> {
    let raw: FfprobeOutput = serde_json::from_str(json)?;

    let streams = raw
        .streams
        .into_iter()
        .map(|s| ProbeStream {
            kind: match s.codec_type.as_deref() {
                Some("video") => StreamKind::Video,
                Some("audio") => StreamKind::Audio,
                _ => StreamKind::Other,
            },
            width: s.width.filter(|w| *w > 0),
            height: s.height.filter(|h| *h > 0),
            duration: s
                .duration
                .as_deref()
                .and_then(|d| d.parse::<f64>().ok())
                .filter(|d| d.is_finite() && *d >= 0.0),
            codec: s.codec_name,
            rotation: s
                .tags
                .get("rotate")
                .and_then(|r| r.trim().parse::<i32>().ok())
                .map(|r| r.rem_euclid(360) as u16),
            creation_time: s.tags.get("creation_time").and_then(|t| entry::parse_date(t)),
        })
        .collect();

    Ok(MediaProbe { streams })
}
