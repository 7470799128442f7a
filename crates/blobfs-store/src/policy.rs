//! Deciding whether a staged blob duplicates an existing payload.
//!
//! The engine only asks a policy after digest and byte length already match.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Equality check between a staged file and a stored payload of equal length
/// and equal digest.
pub trait DuplicatePolicy: Send + Sync + fmt::Debug {
    fn is_duplicate(&self, staged: &Path, existing: &Path) -> io::Result<bool>;

    /// Name of this policy (for logging)
    fn name(&self) -> &'static str;
}

/// Treats equal digest plus equal length as equal content without reading
/// either file.
///
/// Two different contents with the same length and the same digest collapse
/// into one stored object. For non-adversarial media files this does not
/// happen in practice; use [`CompareBytes`] when it must never happen.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeEqualOnSize;

impl DuplicatePolicy for AssumeEqualOnSize {
    fn is_duplicate(&self, _staged: &Path, _existing: &Path) -> io::Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "assume-equal-on-size"
    }
}

/// Full byte-by-byte comparison.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompareBytes;

const COMPARE_CHUNK: usize = 64 * 1024;

impl DuplicatePolicy for CompareBytes {
    fn is_duplicate(&self, staged: &Path, existing: &Path) -> io::Result<bool> {
        let mut a = BufReader::new(File::open(staged)?);
        let mut b = BufReader::new(File::open(existing)?);
        let mut buf_a = vec![0u8; COMPARE_CHUNK];
        let mut buf_b = vec![0u8; COMPARE_CHUNK];
        loop {
            let n = read_full(&mut a, &mut buf_a)?;
            let m = read_full(&mut b, &mut buf_b)?;
            if n != m || buf_a[..n] != buf_b[..m] {
                return Ok(false);
            }
            if n == 0 {
                return Ok(true);
            }
        }
    }

    fn name(&self) -> &'static str {
        "compare-bytes"
    }
}

/// Fill `buf` as far as the reader allows.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
