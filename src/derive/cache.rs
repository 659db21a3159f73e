use std::collections::HashMap;
use std::os::unix::fs::MetadataExt;

use crate::entry::{Entry, LocationAttributes, MediaAttributes};

/// The extracted part of a file entry, reusable for any file with the same
/// checksum.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedMetadata {
    pub description: String,
    pub media: Option<MediaAttributes>,
    pub location: Option<LocationAttributes>,
}

/// inode → checksum and checksum → metadata.
///
/// Snapshots share unchanged files through hard links, so an inode seen
/// before almost always means content seen before. An inode hit is only
/// trusted when the size still matches, which catches a reused inode number
/// in the common case without hashing.
#[derive(Debug, Default)]
pub struct ChecksumCache {
    by_inode: HashMap<u64, (String, u64)>,
    by_checksum: HashMap<String, CachedMetadata>,
}

impl ChecksumCache {
    /// Seed from entries already in the store. Entries whose file is gone
    /// still contribute their metadata, just not an inode.
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'a Entry>,
    {
        let mut cache = ChecksumCache::default();

        for entry in entries {
            let Some(attrs) = entry.file() else {
                continue;
            };
            let checksum = &attrs.file.checksum;

            if let Ok(meta) = std::fs::metadata(&attrs.file.path) {
                if meta.len() == attrs.file.size {
                    cache.by_inode.insert(meta.ino(), (checksum.clone(), attrs.file.size));
                }
            }

            cache.by_checksum.entry(checksum.clone()).or_insert_with(|| CachedMetadata {
                description: entry.description.clone(),
                media: attrs.media.clone(),
                location: attrs.location.clone(),
            });
        }

        cache
    }

    pub fn checksum(&self, inode: u64, size: u64) -> Option<&str> {
        match self.by_inode.get(&inode) {
            Some((checksum, cached_size)) if *cached_size == size => Some(checksum.as_str()),
            _ => None,
        }
    }

    pub fn metadata(&self, checksum: &str) -> Option<&CachedMetadata> {
        self.by_checksum.get(checksum)
    }

    pub fn remember(&mut self, inode: u64, size: u64, checksum: &str, metadata: &CachedMetadata) {
        self.by_inode.insert(inode, (checksum.to_string(), size));
        self.by_checksum
            .entry(checksum.to_string())
            .or_insert_with(|| metadata.clone());
    }

    pub fn len(&self) -> usize {
        self.by_checksum.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_checksum.is_empty()
    }
}
