//! The filesystem blob store engine.
//!
//! One engine covers three modes:
//!
//! - [`StoreMode::Plain`]: every save gets a fresh unique partition.
//! - [`StoreMode::Deduplicating`]: the partition is the content digest and
//!   equal content is stored once.
//! - [`StoreMode::RefCounted`]: deduplicating, plus one marker file per save
//!   so the payload is removed only after as many deletes as saves.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::digest::DigestAlgorithm;
use crate::layout::{
    child_names, create_marker, first_free_name, marker_names, numeric_children,
    reclaim_released, remove_if_exists, Layout, BLOB_FILE, DATA_DIR, INCOME_DIR, RELEASED_FILE,
};
use crate::policy::{AssumeEqualOnSize, CompareBytes, DuplicatePolicy};
use crate::resource::{BlobHandle, BlobSource};
use crate::staging::{unique_name, StagedBlob, Staging, DEFAULT_INCOME_MAX_AGE};
use crate::traits::BlobStore;
use crate::{BlobError, BlobId, Result};

/// A colliding unique partition gets one retry.
const MAX_ATTEMPTS: usize = 2;

/// Folder and marker names are claimed with exclusive creates; every lost
/// race rescans, up to this many times.
const MAX_CLAIM_ATTEMPTS: usize = 64;

/// How a store maps content to ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    Plain,
    #[serde(rename = "dedup")]
    Deduplicating,
    #[default]
    #[serde(rename = "refcount")]
    RefCounted,
}

impl StoreMode {
    pub fn is_content_addressed(self) -> bool {
        !matches!(self, StoreMode::Plain)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StoreMode::Plain => "plain",
            StoreMode::Deduplicating => "dedup",
            StoreMode::RefCounted => "refcount",
        }
    }
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" | "simple" => Ok(StoreMode::Plain),
            "dedup" | "deduplicating" => Ok(StoreMode::Deduplicating),
            "refcount" | "refcounted" => Ok(StoreMode::RefCounted),
            other => Err(format!("unknown store mode: {}", other)),
        }
    }
}

/// Everything needed to open a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Root directory; `data/` and `income/` live below it.
    pub directory: PathBuf,
    pub mode: StoreMode,
    pub digest: DigestAlgorithm,
    /// Compare bytes instead of trusting digest plus size.
    pub verify_duplicates: bool,
    /// Staged files older than this are swept when the store is opened.
    pub income_max_age: Duration,
}

impl StoreConfig {
    pub fn new<P: AsRef<Path>>(directory: P, mode: StoreMode) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            mode,
            digest: DigestAlgorithm::default(),
            verify_duplicates: false,
            income_max_age: DEFAULT_INCOME_MAX_AGE,
        }
    }
}

/// Filesystem-backed blob store.
#[derive(Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    layout: Layout,
    staging: Staging,
    mode: StoreMode,
    digest: DigestAlgorithm,
    policy: Arc<dyn DuplicatePolicy>,
}

impl fmt::Debug for FsBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsBlobStore")
            .field("root", &self.root)
            .field("mode", &self.mode)
            .field("digest", &self.digest)
            .field("policy", &self.policy.name())
            .finish()
    }
}

impl FsBlobStore {
    /// Open (and create if needed) a store.
    ///
    /// Stale files in the income directory are swept.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let root = config.directory.clone();
        let data = root.join(DATA_DIR);
        fs::create_dir_all(&data)?;
        let staging = Staging::open(root.join(INCOME_DIR), config.income_max_age)?;
        let policy: Arc<dyn DuplicatePolicy> = if config.verify_duplicates {
            Arc::new(CompareBytes)
        } else {
            Arc::new(AssumeEqualOnSize)
        };
        debug!(
            root = %root.display(),
            mode = %config.mode,
            digest = %config.digest,
            policy = policy.name(),
            "Opened blob store"
        );
        Ok(Self {
            root,
            layout: Layout::new(data),
            staging,
            mode: config.mode,
            digest: config.digest,
            policy,
        })
    }

    /// Plain store: no deduplication.
    pub fn plain<P: AsRef<Path>>(root: P) -> Result<Self> {
        Self::open(&StoreConfig::new(root, StoreMode::Plain))
    }

    /// Deduplicating store with the default digest.
    pub fn deduplicating<P: AsRef<Path>>(root: P) -> Result<Self> {
        Self::open(&StoreConfig::new(root, StoreMode::Deduplicating))
    }

    /// Deduplicating store with reference counting.
    pub fn ref_counted<P: AsRef<Path>>(root: P) -> Result<Self> {
        Self::open(&StoreConfig::new(root, StoreMode::RefCounted))
    }

    /// Replace the duplicate policy.
    pub fn with_policy<D: DuplicatePolicy + 'static>(mut self, policy: D) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> &Path {
        self.layout.data_dir()
    }

    pub fn income_dir(&self) -> &Path {
        self.staging.dir()
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    pub fn digest(&self) -> DigestAlgorithm {
        self.digest
    }

    /// Stream `source` into the store and return the id of the new blob.
    #[instrument(skip(self, source), fields(source = %source.name()), level = "debug")]
    pub fn save(&self, source: &mut dyn BlobSource) -> Result<BlobId> {
        let digest = self.mode.is_content_addressed().then_some(self.digest);
        let staged = self.staging.write(source, digest)?;
        match self.mode {
            StoreMode::Plain => self.commit_unique(staged),
            StoreMode::Deduplicating | StoreMode::RefCounted => {
                self.commit_content(staged, &source.name())
            }
        }
    }

    /// Look up a blob; a missing one yields [`BlobHandle::unavailable`].
    #[instrument(skip(self), level = "debug")]
    pub fn find(&self, id: &BlobId) -> BlobHandle {
        match self.resolve(id) {
            Some(handle) if handle.is_available() => handle,
            _ => BlobHandle::unavailable(),
        }
    }

    /// Look up a blob that must exist.
    pub fn load(&self, id: &BlobId) -> Result<BlobHandle> {
        let handle = self.find(id);
        if handle.is_available() {
            Ok(handle)
        } else {
            Err(BlobError::NotFound { id: id.to_string() })
        }
    }

    pub fn exists(&self, id: &BlobId) -> bool {
        self.find(id).is_available()
    }

    /// Delete a blob, or in reference-counted mode one reference to it.
    ///
    /// Returns `false` when there was nothing to delete.
    #[instrument(skip(self), level = "debug")]
    pub fn delete(&self, id: &BlobId) -> Result<bool> {
        match self.mode {
            StoreMode::RefCounted => self.release_copy(id),
            StoreMode::Plain | StoreMode::Deduplicating => {
                let dir = self.layout.blob_dir(id);
                let removed = remove_if_exists(&Layout::blob_file(&dir))?;
                if removed {
                    self.layout.prune_empty(&dir);
                }
                Ok(removed)
            }
        }
    }

    /// Parse the string form of an id.
    pub fn create_id(&self, id: &str) -> Result<BlobId> {
        BlobId::parse(id)
    }

    /// Handle on the payload `id` refers to, `None` if the id holds no
    /// reference to it.
    fn resolve(&self, id: &BlobId) -> Option<BlobHandle> {
        let dir = self.layout.blob_dir(id);
        let blob = Layout::blob_file(&dir);
        if self.mode == StoreMode::RefCounted {
            if let Some(copy) = id.copy() {
                if id.folder().is_none() || !marker_path(&dir, copy)?.is_file() {
                    return None;
                }
                // A live marker keeps the payload even while a release has
                // it set aside.
                return Some(BlobHandle::referenced(blob, Layout::released_file(&dir)));
            }
        }
        Some(BlobHandle::at(blob))
    }

    // ========================================================================
    // Plain commit
    // ========================================================================

    /// Commit under the staging name; on the (unexpected) event that the
    /// destination is taken, fall back to one freshly generated partition.
    ///
    /// The payload is published with a link that fails on an existing file,
    /// so a taken destination is never overwritten.
    fn commit_unique(&self, mut staged: StagedBlob) -> Result<BlobId> {
        let mut partition = staged.name().to_string();
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                partition = unique_name();
            }
            let dir = self.layout.partition_dir(&partition);
            fs::create_dir_all(&dir)?;
            match move_into(&mut staged, &dir, &Layout::blob_file(&dir)) {
                Ok(()) => {
                    debug!(partition = %partition, bytes = staged.size(), "Committed blob");
                    return BlobId::new(partition, None, None);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(partition = %partition, attempt, "Partition collision");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(BlobError::Exhausted {
            path: self.layout.partition_dir(&partition),
        })
    }

    // ========================================================================
    // Content-addressed commit
    // ========================================================================

    /// Commit by digest: reuse an existing payload of equal content, or claim
    /// the first free numbered folder below the digest directory.
    fn commit_content(&self, mut staged: StagedBlob, name: &str) -> Result<BlobId> {
        let digest = match staged.digest() {
            Some(digest) => digest.to_string(),
            None => return Err(io::Error::other("staged blob has no digest").into()),
        };
        let partition_dir = self.layout.partition_dir(&digest);
        fs::create_dir_all(&partition_dir)?;

        for attempt in 0..MAX_CLAIM_ATTEMPTS {
            let children = child_names(&partition_dir)?;

            if let Some(folder) = self.find_duplicate(&partition_dir, &children, &staged)? {
                info!(source = %name, digest = %digest, folder = %folder, "Blob is a duplicate");
                let folder_dir = partition_dir.join(&folder);
                let copy = match self.mode {
                    StoreMode::RefCounted => match self.add_reference(&folder_dir, &staged)? {
                        Some(copy) => Some(copy),
                        None => {
                            debug!(folder = %folder_dir.display(), attempt, "Duplicate vanished");
                            fs::create_dir_all(&partition_dir)?;
                            continue;
                        }
                    },
                    _ => None,
                };
                staged.discard()?;
                return BlobId::new(digest, Some(folder), copy);
            }

            let folder = first_free_name(&children);
            let folder_dir = partition_dir.join(&folder);
            match create_dir_claim(&partition_dir, &folder_dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(folder = %folder_dir.display(), attempt, "Folder claimed concurrently");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            if attempt > 0 || folder != "1" {
                debug!(digest = %digest, folder = %folder, "Digest collision, new folder");
            }
            // The first marker goes in before the payload so a concurrent
            // duplicate can never take copy "1".
            let copy = if self.mode == StoreMode::RefCounted {
                match create_marker(&folder_dir.join(FIRST_COPY)) {
                    Ok(()) => Some(FIRST_COPY.to_string()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        debug!(folder = %folder_dir.display(), attempt, "Claimed folder pruned concurrently");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            } else {
                None
            };
            if let Err(e) = move_into(&mut staged, &folder_dir, &Layout::blob_file(&folder_dir)) {
                if copy.is_some() {
                    remove_if_exists(&folder_dir.join(FIRST_COPY))?;
                }
                self.layout.prune_empty(&folder_dir);
                return Err(e.into());
            }
            debug!(digest = %digest, folder = %folder, bytes = staged.size(), "Committed blob");
            return BlobId::new(digest, Some(folder), copy);
        }
        Err(BlobError::Exhausted {
            path: partition_dir,
        })
    }

    /// First numbered folder whose payload equals the staged content.
    fn find_duplicate(
        &self,
        partition_dir: &Path,
        children: &[String],
        staged: &StagedBlob,
    ) -> Result<Option<String>> {
        for (_, folder) in numeric_children(children) {
            let blob = Layout::blob_file(&partition_dir.join(folder));
            if self.same_content(&blob, staged)? == Some(true) {
                return Ok(Some(folder.to_string()));
            }
        }
        Ok(None)
    }

    /// Whether `payload` holds the staged content; `None` if it is gone.
    fn same_content(&self, payload: &Path, staged: &StagedBlob) -> Result<Option<bool>> {
        let len = match fs::metadata(payload) {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if len != staged.size() {
            return Ok(Some(false));
        }
        match self.policy.is_duplicate(staged.path(), payload) {
            Ok(same) => Ok(Some(same)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ========================================================================
    // Reference counting
    // ========================================================================

    /// Create a new copy marker next to an existing payload.
    ///
    /// A payload that a concurrent release moved aside is taken back. Returns
    /// `None` if the folder or its payload is gone.
    fn add_reference(&self, folder_dir: &Path, staged: &StagedBlob) -> Result<Option<String>> {
        let blob = Layout::blob_file(folder_dir);
        let mut withdrawn = false;
        for attempt in 0..MAX_CLAIM_ATTEMPTS {
            // After a withdrawal the folder may hold another payload by now.
            if withdrawn && !self.holds_content(folder_dir, staged)? {
                return Ok(None);
            }
            let copy = first_free_name(&marker_names(folder_dir)?);
            let marker = folder_dir.join(&copy);
            match create_marker(&marker) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(marker = %marker.display(), attempt, "Copy marker claimed concurrently");
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            }
            if blob.is_file() || reclaim_payload(folder_dir)? || blob.is_file() {
                return Ok(Some(copy));
            }

            // Neither payload nor released payload was seen. Withdraw, then
            // retry if it turns up again: a release that saw our marker
            // puts it back.
            remove_if_exists(&marker)?;
            if !blob.is_file() && !Layout::released_file(folder_dir).is_file() {
                self.layout.prune_empty(folder_dir);
                return Ok(None);
            }
            debug!(folder = %folder_dir.display(), attempt, "Payload in flux, retrying reference");
            withdrawn = true;
        }
        Err(BlobError::Exhausted {
            path: folder_dir.to_path_buf(),
        })
    }

    /// Whether the payload of `folder_dir`, wherever it sits, still equals
    /// the staged content.
    fn holds_content(&self, folder_dir: &Path, staged: &StagedBlob) -> Result<bool> {
        for payload in [Layout::blob_file(folder_dir), Layout::released_file(folder_dir)] {
            if let Some(same) = self.same_content(&payload, staged)? {
                return Ok(same);
            }
        }
        Ok(false)
    }

    /// Drop one reference; the payload goes with the last one.
    ///
    /// The last release moves the payload aside before looking at the
    /// markers a second time. A marker created in between means a new
    /// reference, and the payload is put back. Whoever holds a marker may
    /// also put it back, so the payload is only deleted by the caller that
    /// still finds it aside after seeing no markers.
    fn release_copy(&self, id: &BlobId) -> Result<bool> {
        let copy = id
            .copy()
            .ok_or_else(|| BlobError::MissingCopy { id: id.to_string() })?;
        if id.folder().is_none() {
            debug!(id = %id, "Id names no folder, nothing to release");
            return Ok(false);
        }
        let dir = self.layout.blob_dir(id);
        let marker = marker_path(&dir, copy).ok_or_else(|| BlobError::InvalidId {
            id: id.to_string(),
            reason: "copy token names the payload file",
        })?;
        let deleted = remove_if_exists(&marker)?;

        let blob = Layout::blob_file(&dir);
        let released = Layout::released_file(&dir);
        // Each pass either finishes or follows another caller's step.
        loop {
            let remaining = marker_names(&dir)?.len();
            if remaining > 0 {
                debug!(id = %id, remaining, "Released copy, payload still referenced");
                return Ok(deleted);
            }

            match fs::rename(&blob, &released) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    if released.is_file() {
                        debug!(id = %id, "Payload release already in progress");
                    } else if deleted {
                        warn!(id = %id, path = %blob.display(), "Copy marker existed without payload");
                    } else {
                        debug!(id = %id, "Payload was already deleted");
                    }
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            if marker_names(&dir)?.is_empty() {
                if remove_if_exists(&released)? {
                    debug!(id = %id, "Removed payload of last copy");
                    break;
                }
                debug!(id = %id, "Released payload was taken back");
            } else if reclaim_payload(&dir)? {
                debug!(id = %id, "New reference appeared, payload restored");
            }
        }
        self.layout.prune_empty(&dir);
        Ok(deleted)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Walk `data/` and summarize what is stored.
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for entry in WalkDir::new(self.layout.data_dir()).min_depth(1) {
            let entry = entry.map_err(|e| {
                e.into_io_error()
                    .unwrap_or_else(|| io::Error::other("filesystem loop in data directory"))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.file_name() == BLOB_FILE {
                stats.blob_count += 1;
                stats.total_bytes += entry.metadata().map_err(io::Error::from)?.len();
            } else if entry.file_name() != RELEASED_FILE {
                stats.marker_count += 1;
            }
        }
        stats.staged_count = child_names(self.staging.dir())?.len() as u64;
        Ok(stats)
    }
}

/// Copy token of the first save of a payload.
const FIRST_COPY: &str = "1";

/// Marker file of `copy` in `dir`; `None` if the token would name the payload.
fn marker_path(dir: &Path, copy: &str) -> Option<PathBuf> {
    (copy != BLOB_FILE).then(|| dir.join(copy))
}

/// Move the released payload of `dir` back into place.
fn reclaim_payload(dir: &Path) -> io::Result<bool> {
    reclaim_released(&Layout::released_file(dir), &Layout::blob_file(dir))
}

/// Exclusively create `folder_dir`, recreating the parent once if a
/// concurrent delete pruned it.
fn create_dir_claim(partition_dir: &Path, folder_dir: &Path) -> io::Result<()> {
    match fs::create_dir(folder_dir) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(partition_dir)?;
            fs::create_dir(folder_dir)
        }
        other => other,
    }
}

/// Publish the staged file at `dest`, recreating `dir` once if it was pruned
/// between creation and commit.
fn move_into(staged: &mut StagedBlob, dir: &Path, dest: &Path) -> io::Result<()> {
    match staged.commit_to(dest) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir)?;
            staged.commit_to(dest)
        }
        other => other,
    }
}

impl BlobStore for FsBlobStore {
    fn save(&self, source: &mut dyn BlobSource) -> Result<BlobId> {
        FsBlobStore::save(self, source)
    }

    fn find(&self, id: &BlobId) -> BlobHandle {
        FsBlobStore::find(self, id)
    }

    fn delete(&self, id: &BlobId) -> Result<bool> {
        FsBlobStore::delete(self, id)
    }
}

/// Summary of a store's `data/` and `income/` directories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Number of stored payloads
    pub blob_count: u64,
    /// Total payload bytes (after deduplication)
    pub total_bytes: u64,
    /// Copy markers (reference-counted mode)
    pub marker_count: u64,
    /// Files currently in the income directory
    pub staged_count: u64,
}

impl StoreStats {
    pub fn avg_blob_size(&self) -> u64 {
        if self.blob_count == 0 {
            0
        } else {
            self.total_bytes / self.blob_count
        }
    }
}
