//! Blob identifiers and their canonical string form.
//!
//! ```text
//! partition['/' folder]['#' copy]
//! ```
//!
//! `partition` is a unique token (plain mode) or a hex digest (deduplicating
//! modes). `folder` tells apart distinct contents that share a digest, and
//! `copy` names one reference to a deduplicated payload.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{BlobError, Result};

const SEPARATOR_FOLDER: char = '/';
const SEPARATOR_COPY: char = '#';

/// Identifier of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobId {
    partition: String,
    folder: Option<String>,
    copy: Option<String>,
}

impl BlobId {
    /// Build an id from its components.
    ///
    /// Every present component must be non-empty and made of ASCII
    /// alphanumerics, `-` or `_`.
    pub fn new(
        partition: impl Into<String>,
        folder: Option<String>,
        copy: Option<String>,
    ) -> Result<Self> {
        let id = Self {
            partition: partition.into(),
            folder,
            copy,
        };
        id.validate()?;
        Ok(id)
    }

    /// Parse the canonical string form.
    pub fn parse(s: &str) -> Result<Self> {
        let mut end = s.len();
        let mut copy = None;
        if let Some(pos) = s.find(SEPARATOR_COPY) {
            if pos > 0 {
                copy = Some(s[pos + 1..].to_string());
                end = pos;
            }
        }
        let mut folder = None;
        if let Some(pos) = s[..end].rfind(SEPARATOR_FOLDER) {
            if pos > 0 {
                folder = Some(s[pos + 1..end].to_string());
                end = pos;
            }
        }
        let id = Self {
            partition: s[..end].to_string(),
            folder,
            copy,
        };
        id.validate().map_err(|e| match e {
            BlobError::InvalidId { reason, .. } => BlobError::InvalidId {
                id: s.to_string(),
                reason,
            },
            other => other,
        })?;
        Ok(id)
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn folder(&self) -> Option<&str> {
        self.folder.as_deref()
    }

    pub fn copy(&self) -> Option<&str> {
        self.copy.as_deref()
    }

    /// Same partition and folder, different copy token.
    pub(crate) fn with_copy(&self, copy: Option<String>) -> Self {
        Self {
            partition: self.partition.clone(),
            folder: self.folder.clone(),
            copy,
        }
    }

    fn validate(&self) -> Result<()> {
        check_component(&self.partition).map_err(|reason| self.invalid(reason))?;
        if let Some(folder) = &self.folder {
            check_component(folder).map_err(|reason| self.invalid(reason))?;
        }
        if let Some(copy) = &self.copy {
            check_component(copy).map_err(|reason| self.invalid(reason))?;
        }
        Ok(())
    }

    fn invalid(&self, reason: &'static str) -> BlobError {
        BlobError::InvalidId {
            id: self.to_string(),
            reason,
        }
    }
}

fn check_component(part: &str) -> std::result::Result<(), &'static str> {
    if part.is_empty() {
        return Err("empty component");
    }
    if !part
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err("component contains characters outside [A-Za-z0-9_-]");
    }
    Ok(())
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.partition)?;
        if let Some(folder) = &self.folder {
            write!(f, "{}{}", SEPARATOR_FOLDER, folder)?;
        }
        if let Some(copy) = &self.copy {
            write!(f, "{}{}", SEPARATOR_COPY, copy)?;
        }
        Ok(())
    }
}

impl FromStr for BlobId {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BlobId {
    type Error = BlobError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<BlobId> for String {
    fn from(id: BlobId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(partition: &str, folder: Option<&str>, copy: Option<&str>) -> BlobId {
        BlobId::new(
            partition,
            folder.map(str::to_string),
            copy.map(str::to_string),
        )
        .unwrap()
    }

    #[test]
    fn test_format() {
        assert_eq!(id("abc", None, None).to_string(), "abc");
        assert_eq!(id("abc", Some("2"), None).to_string(), "abc/2");
        assert_eq!(id("abc", None, Some("3")).to_string(), "abc#3");
        assert_eq!(id("abc", Some("2"), Some("3")).to_string(), "abc/2#3");
    }

    #[test]
    fn test_parse_components() {
        let parsed = BlobId::parse("d41d8cd98f00b204e9800998ecf8427e/1#2").unwrap();
        assert_eq!(parsed.partition(), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(parsed.folder(), Some("1"));
        assert_eq!(parsed.copy(), Some("2"));

        let plain = BlobId::parse("18f3a9c0b7e").unwrap();
        assert_eq!(plain.folder(), None);
        assert_eq!(plain.copy(), None);
    }

    #[test]
    fn test_roundtrip() {
        for original in [
            id("18f3a9c0b7e", None, None),
            id("ff00", Some("1"), None),
            id("ff00", Some("12"), Some("7")),
            id("ff00", None, Some("1")),
        ] {
            let parsed: BlobId = original.to_string().parse().unwrap();
            assert_eq!(parsed, original);
        }
    }

    #[test]
    fn test_leading_separators_are_not_split() {
        // A separator at index 0 would leave an empty partition.
        let err = BlobId::parse("#1").unwrap_err();
        assert!(err.is_invalid_argument());
        let err = BlobId::parse("/1").unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", "abc/", "abc#", "abc/#1", "a/b/1", "../etc", "abc/..", "abc#1#2"] {
            let err = BlobId::parse(bad).unwrap_err();
            assert!(
                matches!(err, BlobError::InvalidId { .. }),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_new_rejects_separators() {
        assert!(BlobId::new("a/b", None, None).is_err());
        assert!(BlobId::new("ab", Some("1#2".into()), None).is_err());
        assert!(BlobId::new("ab", None, Some(String::new())).is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let original = id("cafe", Some("1"), Some("2"));
        let json = serde_json::to_string(&original).unwrap();
        assert_eq!(json, "\"cafe/1#2\"");
        let back: BlobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
        assert!(serde_json::from_str::<BlobId>("\"a/\"").is_err());
    }
}
