//! Directory sharding for partition tokens.
//!
//! Long tokens (unique ids, hex digests) are split into 4-character segments
//! so that no single directory under `data/` collects more than 65536
//! children for hex input.

use std::path::{Path, PathBuf};

/// Width of one directory segment.
pub const SEGMENT_LEN: usize = 4;

/// Split `token` into 4-character segments, each followed by `/`.
///
/// A trailing shorter segment is kept. Separators already in the token are
/// copied through as ordinary characters.
pub fn shard(token: &str) -> String {
    let mut out = String::with_capacity(token.len() + token.len() / SEGMENT_LEN + 1);
    let mut width = 0;
    for c in token.chars() {
        out.push(c);
        width += 1;
        if width == SEGMENT_LEN {
            out.push('/');
            width = 0;
        }
    }
    if width > 0 {
        out.push('/');
    }
    out
}

/// Join the segments of `token` onto `base` as individual path components.
pub fn shard_path(base: &Path, token: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    let chars: Vec<char> = token.chars().collect();
    for segment in chars.chunks(SEGMENT_LEN) {
        path.push(segment.iter().collect::<String>());
    }
    path
}
