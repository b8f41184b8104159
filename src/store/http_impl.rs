//! HTTP store backend for S3-compatible endpoints.
//!
//! A write is a single `PUT` with `Content-MD5` carrying the announced
//! digest, so the remote end refuses corrupted transfers before they are
//! committed. The `ETag` response header is returned as the integrity
//! token; whether it is comparable to the digest is the verifier's
//! business, not ours.

use std::io;

use reqwest::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use reqwest::StatusCode;
use tokio_util::io::ReaderStream;

use super::{ObjectStore, StoreError, StoreReceipt, StoreToken, UploadBody, UploadDescriptor};

#[derive(Debug, Clone)]
pub struct HttpStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }
}

fn transport(err: reqwest::Error) -> StoreError {
    StoreError::Transport(io::Error::other(err))
}

/// Map a non-success response to a typed store error.
///
/// S3-compatible stores answer a failed `Content-MD5` check with 400
/// and an error code of `BadDigest` or `InvalidDigest` in the XML body.
/// Other 400s (InvalidArgument, EntityTooLarge, ...) are plain
/// rejections, not transit corruption.
fn classify_failure(descriptor: &UploadDescriptor, status: StatusCode, body: &str) -> StoreError {
    let digest_refused = status == StatusCode::BAD_REQUEST
        && (body.contains("BadDigest") || body.contains("InvalidDigest"));

    if digest_refused {
        return StoreError::IntegrityMismatch {
            key: descriptor.key.clone(),
            digest: descriptor.digest.to_hex(),
        };
    }

    StoreError::Rejected {
        key: descriptor.key.clone(),
        reason: format!("{status}: {body}"),
    }
}

#[async_trait::async_trait]
impl ObjectStore for HttpStore {
    async fn put(
        &self,
        descriptor: &UploadDescriptor,
        body: UploadBody,
    ) -> Result<StoreReceipt, StoreError> {
        let body = match body {
            UploadBody::Buffered(bytes) => reqwest::Body::from(bytes),
            UploadBody::Streamed(read) => reqwest::Body::wrap_stream(ReaderStream::new(read)),
        };

        let mut request = self
            .client
            .put(self.object_url(&descriptor.key))
            .header("Content-MD5", descriptor.digest_b64())
            .header(CONTENT_TYPE, &descriptor.content_type)
            .header(CONTENT_LENGTH, descriptor.length);
        if let Some(encoding) = &descriptor.content_encoding {
            request = request.header(CONTENT_ENCODING, encoding);
        }

        let response = request.body(body).send().await.map_err(transport)?;
        let status = response.status();

        if status.is_success() {
            let token = response
                .headers()
                .get(ETAG)
                .and_then(|value| value.to_str().ok())
                .map(StoreToken::new)
                .ok_or_else(|| StoreError::Rejected {
                    key: descriptor.key.clone(),
                    reason: "store returned no integrity token".into(),
                })?;

            return Ok(StoreReceipt {
                token,
                length: descriptor.length,
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(descriptor, status, &body))
    }
}

#[cfg(test)]
mod tests {
    use crate::digest::ContentDigest;

    use super::*;

    fn descriptor() -> UploadDescriptor {
        UploadDescriptor::new("k.gz", ContentDigest::of(b"hello world"), 11)
    }

    #[test]
    fn bad_digest_is_an_integrity_mismatch() {
        for code in ["BadDigest", "InvalidDigest"] {
            let body = format!(
                "<Error><Code>{code}</Code><Message>digest check failed</Message></Error>"
            );
            let err = classify_failure(&descriptor(), StatusCode::BAD_REQUEST, &body);
            assert!(matches!(err, StoreError::IntegrityMismatch { .. }), "{code}");
        }
    }

    #[test]
    fn other_400s_are_plain_rejections() {
        let body = "<Error><Code>EntityTooLarge</Code></Error>";
        let err = classify_failure(&descriptor(), StatusCode::BAD_REQUEST, body);
        assert!(matches!(err, StoreError::Rejected { .. }));
    }

    #[test]
    fn non_400_statuses_are_rejections_with_context() {
        let err = classify_failure(&descriptor(), StatusCode::FORBIDDEN, "AccessDenied");
        match err {
            StoreError::Rejected { key, reason } => {
                assert_eq!(key, "k.gz");
                assert!(reason.contains("403"));
                assert!(reason.contains("AccessDenied"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn object_url_joins_cleanly() {
        let store = HttpStore::new("http://localhost:9000/bucket/");
        assert_eq!(
            store.object_url("reports/2024.csv.gz"),
            "http://localhost:9000/bucket/reports/2024.csv.gz"
        );
    }
}
