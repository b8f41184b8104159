//! Upload verifier: compress, digest, upload, compare.
//!
//! One call drives the whole pipeline for one blob: the source is
//! gzipped exactly once, the compressed bytes are digested, the store
//! receives them together with the digest, and the token it reports
//! back decides the verdict. Retries replay the already-compressed
//! bytes; nothing is ever recompressed mid-call.

use core::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use async_compression::Level;
use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncRead, BufWriter};
use tokio_util::sync::CancellationToken;

use crate::compress;
use crate::digest::{ContentDigest, DigestWriter};
use crate::error::UploadError;
use crate::store::{ObjectStore, StoreToken, UploadBody, UploadDescriptor};

/// Raw content handed to the pipeline.
///
/// Buffers go through the in-memory path; files and readers are
/// compressed in one streaming pass and spooled, since their size is
/// unbounded or unknown.
pub enum UploadSource {
    Bytes(Bytes),
    File(PathBuf),
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl UploadSource {
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Self::Bytes(data.into())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn reader(read: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::Reader(Box::new(read))
    }
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

/// Bounded exponential backoff for transport failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.initial_delay.as_secs_f64()
            * self.multiplier.powf(attempt.saturating_sub(1).into());
        // cap before converting: a runaway policy overflows `exp` to
        // infinity, which `from_secs_f64` refuses
        let capped = exp.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped)
    }
}

/// Why the verdict came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerifyReason {
    /// Plain token, equal to the digest of the transmitted bytes.
    ExactMatch,
    /// Plain token, different from the digest. The store accepted bytes
    /// other than the ones sent; this is a corruption finding.
    DigestMismatch,
    /// Composite (multipart) token. Not a digest of the whole object,
    /// so no comparison is possible; this is *not* a corruption alarm.
    CompositeTransferNotComparable,
}

/// Outcome of one upload-and-verify call.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub matched: bool,
    pub reason: VerifyReason,
    pub key: String,
    /// Hex digest of the compressed bytes that were transmitted.
    pub expected: String,
    pub token: StoreToken,
    pub attempts: u32,
    pub compressed_len: u64,
}

/// The prepared blob an upload attempt replays from.
enum CompressedPayload {
    Buffered(Bytes),
    /// Streaming path: compressed bytes spooled to disk, unlinked on
    /// drop.
    Spooled(tempfile::NamedTempFile),
}

struct Compressed {
    payload: CompressedPayload,
    digest: ContentDigest,
    len: u64,
}

impl Compressed {
    fn body(&self) -> io::Result<UploadBody> {
        match &self.payload {
            CompressedPayload::Buffered(bytes) => Ok(UploadBody::Buffered(bytes.clone())),
            CompressedPayload::Spooled(tmp) => {
                // fresh handle per attempt, positioned at the start
                let file = tokio::fs::File::from_std(tmp.reopen()?);
                Ok(UploadBody::Streamed(Box::new(file)))
            }
        }
    }
}

/// Pipeline orchestrator, generic over the store it uploads into.
#[derive(Debug)]
pub struct Uploader<S> {
    store: S,
    level: Level,
    retry: RetryPolicy,
    content_type: String,
}

impl<S: ObjectStore> Uploader<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            level: Level::Default,
            retry: RetryPolicy::default(),
            content_type: "application/octet-stream".into(),
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Compress `source`, upload it under `key` and check the store's
    /// token against the digest of the transmitted bytes.
    pub async fn upload_and_verify(
        &self,
        source: UploadSource,
        key: &str,
    ) -> Result<VerificationResult, UploadError> {
        self.upload_and_verify_cancellable(source, key, &CancellationToken::new())
            .await
    }

    /// Like [`upload_and_verify`](Self::upload_and_verify), aborting as
    /// soon as `cancel` fires. A cancelled call never reports a verdict
    /// and all spooled state is released.
    pub async fn upload_and_verify_cancellable(
        &self,
        source: UploadSource,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<VerificationResult, UploadError> {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let compressed = self.prepare(source, cancel).await?;
        tracing::debug!(
            key,
            len = compressed.len,
            digest = %compressed.digest,
            "compressed and digested"
        );

        let mut descriptor =
            UploadDescriptor::new(key, compressed.digest, compressed.len);
        descriptor.content_type = self.content_type.clone();

        let (receipt, attempts) = self.put_with_retry(&descriptor, &compressed, cancel).await?;

        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        Ok(self.verdict(&descriptor, receipt.token, attempts, compressed.len))
    }

    /// Compress exactly once. Buffers stay in memory; files and readers
    /// stream through the encoder into a spool file while the digest
    /// rides along on the same pass.
    async fn prepare(
        &self,
        source: UploadSource,
        cancel: &CancellationToken,
    ) -> Result<Compressed, UploadError> {
        match source {
            UploadSource::Bytes(data) => {
                let compressed = tokio::select! {
                    res = compress::compress_bytes(&data, self.level) => {
                        res.map_err(UploadError::Compression)?
                    }
                    _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                };
                let digest = ContentDigest::of(&compressed);
                let len = compressed.len() as u64;
                Ok(Compressed {
                    payload: CompressedPayload::Buffered(compressed.into()),
                    digest,
                    len,
                })
            }
            UploadSource::File(path) => {
                let file = tokio::fs::File::open(&path).await?;
                self.spool(file, cancel).await
            }
            UploadSource::Reader(read) => self.spool(read, cancel).await,
        }
    }

    async fn spool(
        &self,
        reader: impl AsyncRead + Unpin,
        cancel: &CancellationToken,
    ) -> Result<Compressed, UploadError> {
        let tmp = tempfile::NamedTempFile::new()?;
        let sink = tokio::fs::File::from_std(tmp.reopen()?);
        let mut writer = DigestWriter::new(BufWriter::new(sink));

        let len = tokio::select! {
            res = compress::compress_stream(reader, &mut writer, self.level) => {
                res.map_err(UploadError::Compression)?
            }
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
        };

        let (_, digest) = writer.finalize();
        Ok(Compressed {
            payload: CompressedPayload::Spooled(tmp),
            digest,
            len,
        })
    }

    async fn put_with_retry(
        &self,
        descriptor: &UploadDescriptor,
        compressed: &Compressed,
        cancel: &CancellationToken,
    ) -> Result<(crate::store::StoreReceipt, u32), UploadError> {
        let mut attempt = 1u32;
        loop {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            let body = compressed.body()?;
            let result = tokio::select! {
                res = self.store.put(descriptor, body) => res,
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            };

            match result {
                Ok(receipt) => return Ok((receipt, attempt)),
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        key = %descriptor.key,
                        attempt,
                        ?delay,
                        error = %err,
                        "upload attempt failed, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                    }
                    attempt += 1;
                }
                Err(source) => {
                    return Err(UploadError::Store {
                        key: descriptor.key.clone(),
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }

    fn verdict(
        &self,
        descriptor: &UploadDescriptor,
        token: StoreToken,
        attempts: u32,
        compressed_len: u64,
    ) -> VerificationResult {
        let expected = descriptor.digest;

        let (matched, reason) = if token.is_composite() {
            tracing::debug!(
                key = %descriptor.key,
                %token,
                "composite token, whole-object comparison not possible"
            );
            (false, VerifyReason::CompositeTransferNotComparable)
        } else if token.plain_digest() == Some(expected) {
            (true, VerifyReason::ExactMatch)
        } else {
            // the store committed bytes other than the ones announced,
            // past its own pre-write integrity check
            tracing::error!(
                key = %descriptor.key,
                expected = %expected,
                %token,
                "store token does not match digest of transmitted bytes"
            );
            (false, VerifyReason::DigestMismatch)
        };

        VerificationResult {
            matched,
            reason,
            key: descriptor.key.clone(),
            expected: expected.to_hex(),
            token,
            attempts,
            compressed_len,
        }
    }
}
