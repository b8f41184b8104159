//! Object store boundary.
//!
//! The pipeline only ever talks to a store through [`ObjectStore`]: hand
//! over a descriptor plus a body, get back an opaque integrity token.
//! Backends live in their own modules; [`MemStore`] for tests and
//! embedding, [`FsStore`] for a local directory, [`HttpStore`] for an
//! S3-compatible remote.

use core::fmt;
use std::io;

use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::digest::ContentDigest;

pub mod fs_impl;
pub mod http_impl;
pub mod mem_impl;

pub use fs_impl::FsStore;
pub use http_impl::HttpStore;
pub use mem_impl::MemStore;

/// Per-attempt upload metadata.
///
/// Built once per prepared blob; never reused with different content.
#[derive(Debug, Clone)]
pub struct UploadDescriptor {
    /// Destination key within the store.
    pub key: String,
    pub content_type: String,
    /// `Some("gzip")` when the body carries gzipped bytes.
    pub content_encoding: Option<String>,
    /// Digest of the exact bytes being transmitted.
    pub digest: ContentDigest,
    /// Body length in bytes.
    pub length: u64,
}

impl UploadDescriptor {
    pub fn new(key: impl Into<String>, digest: ContentDigest, length: u64) -> Self {
        Self {
            key: key.into(),
            content_type: "application/octet-stream".into(),
            content_encoding: Some("gzip".into()),
            digest,
            length,
        }
    }

    /// Wire encoding of the digest: base64 over the raw 16 bytes.
    pub fn digest_b64(&self) -> String {
        self.digest.to_base64()
    }
}

/// Opaque integrity value the store reports after a successful write.
///
/// For a single-part write this is the hex digest of the stored bytes,
/// usually wrapped in double quotes. Multipart writes produce a
/// composite value with a `-<parts>` suffix that is *not* the digest of
/// the whole object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreToken(String);

impl StoreToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Token with any surrounding double quotes stripped.
    pub fn normalized(&self) -> &str {
        self.0.trim_matches('"')
    }

    /// Whether the token carries a multipart marker.
    pub fn is_composite(&self) -> bool {
        self.normalized().contains('-')
    }

    /// Decode a plain token back into a digest.
    ///
    /// Returns `None` for composite tokens and for anything that does
    /// not parse as 16 hex-encoded bytes.
    pub fn plain_digest(&self) -> Option<ContentDigest> {
        if self.is_composite() {
            return None;
        }
        ContentDigest::parse_hex(self.normalized())
    }
}

impl fmt::Display for StoreToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the store reports back after a completed write.
#[derive(Debug, Clone)]
pub struct StoreReceipt {
    pub token: StoreToken,
    pub length: u64,
}

/// Typed failures at the store boundary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Network-level failure; the write may or may not have landed.
    #[error("transport failure: {0}")]
    Transport(#[source] io::Error),

    /// The store hashed the received bytes and they did not match the
    /// digest announced in the descriptor. Bytes were corrupted in
    /// transit; retrying the same transfer will not help.
    #[error("store refused {key}: received bytes do not hash to {digest}")]
    IntegrityMismatch { key: String, digest: String },

    /// Authorization, quota or validation failure.
    #[error("store rejected {key}: {reason}")]
    Rejected { key: String, reason: String },
}

impl StoreError {
    /// Only transport failures warrant another attempt with the same
    /// bytes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Upload body, either fully materialized or streamed.
pub enum UploadBody {
    Buffered(Bytes),
    Streamed(Box<dyn AsyncRead + Send + Unpin>),
}

impl UploadBody {
    /// Drain the body into memory. Backends that cannot stream use this.
    pub async fn into_bytes(self) -> io::Result<Bytes> {
        match self {
            Self::Buffered(bytes) => Ok(bytes),
            Self::Streamed(mut read) => {
                let mut buf = Vec::new();
                read.read_to_end(&mut buf).await?;
                Ok(buf.into())
            }
        }
    }
}

impl fmt::Debug for UploadBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            Self::Streamed(_) => f.write_str("Streamed(..)"),
        }
    }
}

/// Accept bytes, return an integrity token.
///
/// Implementations must hand the token back only after the write
/// completed; a failed or partial write surfaces as a [`StoreError`].
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        descriptor: &UploadDescriptor,
        body: UploadBody,
    ) -> Result<StoreReceipt, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_normalization_strips_quotes() {
        let token = StoreToken::new("\"5eb63bbbe01eeed093cb22bb8f5acdc3\"");
        assert_eq!(token.normalized(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert!(!token.is_composite());
        assert_eq!(
            token.plain_digest(),
            Some(ContentDigest::of(b"hello world"))
        );
    }

    #[test]
    fn composite_marker_is_detected() {
        let token = StoreToken::new("\"d41d8cd98f00b204e9800998ecf8427e-2\"");
        assert!(token.is_composite());
        assert_eq!(token.plain_digest(), None);
    }

    #[test]
    fn unquoted_plain_token_parses() {
        let token = StoreToken::new("5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(
            token.plain_digest(),
            Some(ContentDigest::of(b"hello world"))
        );
    }

    #[test]
    fn garbage_token_is_not_a_digest() {
        assert_eq!(StoreToken::new("\"W/123abc\"").plain_digest(), None);
    }

    #[test]
    fn retryability() {
        assert!(StoreError::Transport(io::Error::other("reset")).is_retryable());
        assert!(!StoreError::IntegrityMismatch {
            key: "k".into(),
            digest: "d".into()
        }
        .is_retryable());
        assert!(!StoreError::Rejected {
            key: "k".into(),
            reason: "denied".into()
        }
        .is_retryable());
    }
}
