use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};

const CHUNK_SIZE: usize = 8192;

/// Hex blake3 digest of a file, read in fixed-size chunks so large videos
/// never sit in memory.
pub fn file_checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::file(path, e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; CHUNK_SIZE];

    loop {
        let read = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::file(path, e)),
        };
        hasher.update(&buf[..read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}
