//! Byte sources consumed by `save` and handles produced by `find`/`load`.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::layout::reclaim_released;

/// Something that can be saved into a blob store.
///
/// A store opens the source exactly once per save attempt and never assumes
/// it can be re-read.
pub trait BlobSource {
    /// Open the stream to read the content from.
    fn open(&mut self) -> io::Result<Box<dyn Read + '_>>;

    /// Expected number of bytes, if known up front.
    fn size_hint(&self) -> Option<u64> {
        None
    }

    /// Display name used in log messages.
    fn name(&self) -> String;

    fn is_available(&self) -> bool {
        true
    }
}

/// A file on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlobSource for FileSource {
    fn open(&mut self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(File::open(&self.path)?))
    }

    fn size_hint(&self) -> Option<u64> {
        fs::metadata(&self.path).ok().map(|m| m.len())
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn is_available(&self) -> bool {
        self.path.is_file()
    }
}

/// In-memory content.
#[derive(Debug, Clone)]
pub struct BytesSource {
    name: String,
    data: Vec<u8>,
}

impl BytesSource {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

impl BlobSource for BytesSource {
    fn open(&mut self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(Cursor::new(self.data.as_slice())))
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Wraps an arbitrary reader. It can be opened only once.
pub struct ReaderSource<R> {
    name: String,
    reader: Option<R>,
    size_hint: Option<u64>,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader: Some(reader),
            size_hint: None,
        }
    }

    pub fn with_size_hint(mut self, size: u64) -> Self {
        self.size_hint = Some(size);
        self
    }
}

impl<R> fmt::Debug for ReaderSource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderSource")
            .field("name", &self.name)
            .field("consumed", &self.reader.is_none())
            .finish()
    }
}

impl<R: Read> BlobSource for ReaderSource<R> {
    fn open(&mut self) -> io::Result<Box<dyn Read + '_>> {
        match self.reader.take() {
            Some(reader) => Ok(Box::new(reader)),
            None => Err(io::Error::other(format!(
                "stream of {} was already consumed",
                self.name
            ))),
        }
    }

    fn size_hint(&self) -> Option<u64> {
        self.size_hint
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_available(&self) -> bool {
        self.reader.is_some()
    }
}

/// Result of a lookup: a stored payload, or the unavailable sentinel.
///
/// Availability and size are checked against the filesystem on every call,
/// so a handle observes a later delete. Only one read pass is guaranteed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHandle {
    location: Option<PathBuf>,
    /// Where a release in flight sets the payload aside. Only handles backed
    /// by a live copy marker carry it, and they move the payload back.
    released: Option<PathBuf>,
}

impl BlobHandle {
    pub(crate) fn at(path: PathBuf) -> Self {
        Self {
            location: Some(path),
            released: None,
        }
    }

    pub(crate) fn referenced(path: PathBuf, released: PathBuf) -> Self {
        Self {
            location: Some(path),
            released: Some(released),
        }
    }

    /// The handle returned when nothing is stored under an id.
    pub fn unavailable() -> Self {
        Self {
            location: None,
            released: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.settled_path().is_some_and(Path::is_file)
    }

    /// Payload size in bytes, `None` if unavailable.
    pub fn size(&self) -> Option<u64> {
        let path = self.settled_path()?;
        fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
    }

    /// Filesystem path of the payload.
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Open the payload for reading.
    pub fn open(self) -> io::Result<File> {
        match self.settled_path() {
            Some(path) => File::open(path),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "blob is not available",
            )),
        }
    }

    pub fn read_to_vec(self) -> io::Result<Vec<u8>> {
        let mut data = Vec::new();
        self.open()?.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Memory-map the payload read-only.
    pub fn mmap(&self) -> io::Result<memmap2::Mmap> {
        let path = self.settled_path().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "blob is not available")
        })?;
        let file = File::open(path)?;
        // Safety: payloads are never rewritten in place, only linked, moved or removed
        unsafe { memmap2::Mmap::map(&file) }
    }

    /// The payload path, after taking a set-aside payload back if needed.
    fn settled_path(&self) -> Option<&Path> {
        let path = self.location.as_deref()?;
        if let Some(released) = self.released.as_deref() {
            if !path.is_file() {
                if let Err(e) = reclaim_released(released, path) {
                    debug!(path = %path.display(), error = %e, "Could not take back released payload");
                }
            }
        }
        Some(path)
    }
}
