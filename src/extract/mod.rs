//! Metadata extractors.
//!
//! Thin, stateless wrappers over the things that look inside files:
//! - content checksum (blake3)
//! - `ffprobe` for dimensions, duration and codec
//! - EXIF for location, camera, orientation and capture date
//!
//! The derivation pipeline talks to them through [`Extractors`] so tests can
//! count calls and serve canned results instead of shelling out.

pub mod checksum;
pub mod dates;
pub mod probe;
pub mod tags;

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};

pub use probe::{MediaProbe, ProbeStream, StreamKind};
pub use tags::{ExifMetadata, ExifTags, ExifValue};

pub trait Extractors {
    fn checksum(&self, path: &Path) -> Result<String> {
        checksum::file_checksum(path)
    }

    fn probe(&self, path: &Path) -> Result<MediaProbe>;

    fn exif(&self, path: &Path) -> Result<ExifTags>;
}

/// Extractors backed by the real tools
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExtractors;

impl Extractors for SystemExtractors {
    fn probe(&self, path: &Path) -> Result<MediaProbe> {
        probe::run_ffprobe(path)
    }

    fn exif(&self, path: &Path) -> Result<ExifTags> {
        tags::read_exif(path)
    }
}

/// Mimetype guessed from the file extension
pub fn mimetype(path: &Path) -> Option<String> {
    mime_guess::from_path(path).first_raw().map(str::to_string)
}

/// First `cap` bytes of a text file. A multi-byte character cut by the cap is
/// dropped rather than replaced.
pub fn read_description(path: &Path, cap: usize) -> Result<String> {
    let file = File::open(path).map_err(|e| Error::file(path, e))?;
    let mut buf = Vec::with_capacity(cap.min(64 * 1024));
    file.take(cap as u64)
        .read_to_end(&mut buf)
        .map_err(|e| Error::file(path, e))?;

    match String::from_utf8(buf) {
        Ok(s) => Ok(s),
        Err(e) => {
            let utf8 = e.utf8_error();
            let mut bytes = e.into_bytes();
            if utf8.error_len().is_none() {
                // only the tail is incomplete
                bytes.truncate(utf8.valid_up_to());
            }
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mimetypes_from_extension() {
        assert_eq!(mimetype(Path::new("a/b.JPG")).as_deref(), Some("image/jpeg"));
        assert_eq!(mimetype(Path::new("clip.mp4")).as_deref(), Some("video/mp4"));
        assert_eq!(mimetype(Path::new("notes.txt")).as_deref(), Some("text/plain"));
        assert_eq!(mimetype(Path::new("paper.pdf")).as_deref(), Some("application/pdf"));
        assert_eq!(mimetype(Path::new("Makefile")), None);
    }

    #[test]
    fn description_is_capped_on_char_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        // "é" is two bytes, so a 4 byte cap lands inside the second one
        std::fs::write(&path, "aéé tail").unwrap();

        assert_eq!(read_description(&path, 4).unwrap(), "aé");
        assert_eq!(read_description(&path, 100).unwrap(), "aéé tail");
    }
}
