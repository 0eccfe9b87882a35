//! Video identifiers.
//!
//! A [`VideoId`] is derived deterministically from a file name, so the same
//! file keeps the same URL across rescans and restarts.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Number of hex characters kept from the SHA-256 digest.
pub const VIDEO_ID_LEN: usize = 8;

/// Stable short identifier for a video file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    /// Derive the ID for a file name (not a path).
    #[must_use]
    pub fn from_file_name(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let mut hex = hex::encode(digest);
        hex.truncate(VIDEO_ID_LEN);
        Self(hex)
    }

    /// Borrow the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error returned when a path segment is not a well-formed [`VideoId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid video id: {0:?}")]
pub struct InvalidVideoId(pub String);

impl FromStr for VideoId {
    type Err = InvalidVideoId;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.len() == VIDEO_ID_LEN && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(InvalidVideoId(s.to_string()))
        }
    }
}
