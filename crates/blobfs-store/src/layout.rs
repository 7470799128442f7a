//! On-disk layout below the store root.
//!
//! ```text
//! <root>/
//! ├── income/                      # staging, swept on startup
//! └── data/
//!     └── 5d41/402a/bc4b/2a76/b971/9d91/1017/c592/
//!         ├── 1/
//!         │   ├── blob             # payload
//!         │   ├── 1                # copy markers (reference counting)
//!         │   └── 2
//!         └── 2/
//!             └── blob             # distinct content, same digest
//! ```
//!
//! While the last reference is released the payload briefly sits at
//! `blob.released` in the same folder, where a new reference can take it
//! back.
//!
//! In plain mode there is no folder level; `blob` sits directly in the
//! sharded partition directory.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::shard::shard_path;
use crate::BlobId;

pub const DATA_DIR: &str = "data";
pub const INCOME_DIR: &str = "income";
/// File name of the payload inside a blob directory.
pub const BLOB_FILE: &str = "blob";
/// The payload while its last reference is being released.
pub(crate) const RELEASED_FILE: &str = "blob.released";

#[derive(Debug, Clone)]
pub(crate) struct Layout {
    data: PathBuf,
}

impl Layout {
    pub(crate) fn new(data: PathBuf) -> Self {
        Self { data }
    }

    pub(crate) fn data_dir(&self) -> &Path {
        &self.data
    }

    pub(crate) fn partition_dir(&self, partition: &str) -> PathBuf {
        shard_path(&self.data, partition)
    }

    /// Directory holding the payload (and markers) of `id`.
    pub(crate) fn blob_dir(&self, id: &BlobId) -> PathBuf {
        let dir = self.partition_dir(id.partition());
        match id.folder() {
            Some(folder) => dir.join(folder),
            None => dir,
        }
    }

    pub(crate) fn blob_file(dir: &Path) -> PathBuf {
        dir.join(BLOB_FILE)
    }

    pub(crate) fn released_file(dir: &Path) -> PathBuf {
        dir.join(RELEASED_FILE)
    }

    /// Remove empty directories from `start` upwards, stopping below `data/`.
    ///
    /// Stops quietly at the first directory that is not empty or already gone.
    pub(crate) fn prune_empty(&self, start: &Path) {
        let mut dir = start;
        while dir.starts_with(&self.data) && dir != self.data {
            match fs::remove_dir(dir) {
                Ok(()) => debug!(dir = %dir.display(), "Pruned empty directory"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(_) => break,
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }
}

/// Names of the entries of `dir`; an absent directory has none.
pub(crate) fn child_names(dir: &Path) -> io::Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

/// Copy markers in a refcount folder: everything but the payload.
pub(crate) fn marker_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = child_names(dir)?;
    names.retain(|name| name != BLOB_FILE && name != RELEASED_FILE);
    Ok(names)
}

/// Numeric children sorted ascending; other names are ignored.
pub(crate) fn numeric_children(names: &[String]) -> Vec<(u64, &str)> {
    let mut numbered: Vec<(u64, &str)> = names
        .iter()
        .filter_map(|name| name.parse::<u64>().ok().map(|n| (n, name.as_str())))
        .collect();
    numbered.sort_unstable();
    numbered
}

/// Smallest positive integer whose decimal form is not in `taken`.
///
/// Gaps left by out-of-order deletes are reused.
pub(crate) fn first_free_name(taken: &[String]) -> String {
    let taken: HashSet<&str> = taken.iter().map(String::as_str).collect();
    (1u64..)
        .map(|n| n.to_string())
        .find(|name| !taken.contains(name.as_str()))
        .unwrap_or_default()
}

/// Create an empty marker file; fails if it already exists.
pub(crate) fn create_marker(path: &Path) -> io::Result<()> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map(drop)
}

/// Move a released payload back to `blob`.
///
/// Returns `false` if nothing was released, or it was deleted or taken back
/// by someone else first.
pub(crate) fn reclaim_released(released: &Path, blob: &Path) -> io::Result<bool> {
    match fs::rename(released, blob) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove a file, reporting whether it existed.
pub(crate) fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
