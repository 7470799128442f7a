//! # blobfs-store
//!
//! Filesystem storage for binary large objects (media files, attachments)
//! addressed by opaque string ids.
//!
//! Three modes share one engine ([`FsBlobStore`]):
//!
//! - **plain**: every save gets a new unique partition
//! - **dedup**: the partition is the content digest (MD5 by default), so
//!   equal content is stored once
//! - **refcount**: like dedup, but every save also creates a copy marker and
//!   the payload is removed with its last marker
//!
//! ## Directory Layout
//!
//! ```text
//! <root>/
//! ├── income/                # staging; linked into data/ on commit
//! └── data/
//!     └── 5d41/402a/bc4b/2a76/b971/9d91/1017/c592/
//!         └── 1/
//!             ├── blob       # payload
//!             ├── 1          # copy markers
//!             └── 2
//! ```
//!
//! Ids print as `partition['/' folder]['#' copy]`, e.g.
//! `5d41402abc4b2a76b9719d911017c592/1#2`.

mod digest;
mod error;
mod id;
mod layout;
mod policy;
mod resource;
mod shard;
mod staging;
mod store;
mod traits;

pub use digest::{ContentHasher, DigestAlgorithm, HashingReader};
pub use error::{BlobError, Result};
pub use id::BlobId;
pub use layout::{BLOB_FILE, DATA_DIR, INCOME_DIR};
pub use policy::{AssumeEqualOnSize, CompareBytes, DuplicatePolicy};
pub use resource::{BlobHandle, BlobSource, BytesSource, FileSource, ReaderSource};
pub use shard::{shard, shard_path, SEGMENT_LEN};
pub use staging::DEFAULT_INCOME_MAX_AGE;
pub use store::{FsBlobStore, StoreConfig, StoreMode, StoreStats};
pub use traits::BlobStore;
