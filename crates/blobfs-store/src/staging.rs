//! Income area: blobs are written here first and linked into `data/` on
//! commit, so readers never observe a partially written payload.

use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::digest::{DigestAlgorithm, HashingReader};
use crate::resource::BlobSource;
use crate::{BlobError, Result};

/// Staged files older than this are swept on startup by default.
pub const DEFAULT_INCOME_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The income directory of a store.
#[derive(Debug, Clone)]
pub(crate) struct Staging {
    dir: PathBuf,
}

impl Staging {
    /// Create the income directory, or sweep stale leftovers if it exists.
    pub(crate) fn open(dir: PathBuf, max_age: Duration) -> Result<Self> {
        if dir.is_dir() {
            let removed = sweep(&dir, max_age)?;
            if removed > 0 {
                debug!(dir = %dir.display(), removed, "Swept stale staging files");
            }
        } else {
            fs::create_dir_all(&dir)?;
        }
        Ok(Self { dir })
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stream `source` into a fresh staging file.
    ///
    /// When `digest` is set, the content digest is accumulated on the way.
    pub(crate) fn write(
        &self,
        source: &mut dyn BlobSource,
        digest: Option<DigestAlgorithm>,
    ) -> Result<StagedBlob> {
        let (mut staged, file) = self.create_file()?;
        let mut out = BufWriter::new(file);
        {
            let reader = source.open()?;
            match digest {
                Some(algorithm) => {
                    let mut hashing = HashingReader::new(reader, algorithm);
                    staged.size = io::copy(&mut hashing, &mut out)?;
                    staged.digest = Some(hashing.finalize_hex());
                }
                None => {
                    let mut reader = reader;
                    staged.size = io::copy(&mut reader, &mut out)?;
                }
            }
        }
        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        debug!(
            source = %source.name(),
            bytes = staged.size,
            path = %staged.path.display(),
            "Staged blob"
        );
        Ok(staged)
    }

    /// Claim a unique staging file. One regeneration is allowed on collision.
    fn create_file(&self) -> Result<(StagedBlob, File)> {
        let mut last = None;
        for attempt in 0..2 {
            let name = unique_name();
            let path = self.dir.join(&name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((StagedBlob::new(path, name), file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(name = %name, attempt, "Staging name collision");
                    last = Some(path);
                }
                Err(e) => return Err(BlobError::Io(e)),
            }
        }
        Err(BlobError::Exhausted {
            path: last.unwrap_or_else(|| self.dir.clone()),
        })
    }
}

/// A unique token built from the wall clock in nanoseconds, a process-wide
/// counter and a discriminator for the calling process and thread.
///
/// Counter and discriminator are fixed width, so distinct inputs never
/// produce the same token.
pub(crate) fn unique_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let count = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut hasher = DefaultHasher::new();
    std::process::id().hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);
    let caller = hasher.finish() as u32;
    format!("{:x}{:016x}{:08x}", nanos, count, caller)
}

fn sweep(dir: &Path, max_age: Duration) -> io::Result<usize> {
    let cutoff = SystemTime::now().checked_sub(max_age).unwrap_or(UNIX_EPOCH);
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
        if modified >= cutoff {
            continue;
        }
        let path = entry.path();
        let result = if metadata.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to sweep staging entry"),
        }
    }
    Ok(removed)
}

/// One save in flight: the staged file plus what was learned while writing it.
///
/// Dropping an uncommitted value removes the staging file.
#[derive(Debug)]
pub(crate) struct StagedBlob {
    path: PathBuf,
    name: String,
    size: u64,
    digest: Option<String>,
    done: bool,
}

impl StagedBlob {
    fn new(path: PathBuf, name: String) -> Self {
        Self {
            path,
            name,
            size: 0,
            digest: None,
            done: false,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Atomically publish the staged file at `dest`.
    ///
    /// Never replaces an existing file: a taken `dest` fails with
    /// `AlreadyExists` and the staged file stays in place.
    pub(crate) fn commit_to(&mut self, dest: &Path) -> io::Result<()> {
        fs::hard_link(&self.path, dest)?;
        self.done = true;
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to unlink committed staging file");
            }
        }
        Ok(())
    }

    /// Drop the staged bytes because an equal payload is already stored.
    pub(crate) fn discard(mut self) -> io::Result<()> {
        self.done = true;
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Drop for StagedBlob {
    fn drop(&mut self) {
        if !self.done {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "Failed to remove staging file");
                }
            }
        }
    }
}
