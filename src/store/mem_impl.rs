//! In-memory store backend, for tests and embedding.

use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;

use crate::digest::{ContentDigest, DigestBuilder};

use super::{ObjectStore, StoreError, StoreReceipt, StoreToken, UploadBody, UploadDescriptor};

#[derive(Debug)]
struct StoredObject {
    data: Bytes,
    #[allow(dead_code)]
    content_type: String,
    token: StoreToken,
}

/// `HashMap`-backed store.
///
/// Behaves like the remote it stands in for: the announced digest is
/// checked against the received bytes before the write is accepted, and
/// bodies past the multipart threshold yield a composite token.
#[derive(Debug, Default)]
pub struct MemStore {
    objects: RwLock<HashMap<String, StoredObject>>,
    /// Body lengths strictly above this switch to a multipart write.
    multipart_threshold: Option<u64>,
    part_size: u64,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store bodies longer than `threshold` as multipart writes with
    /// `part_size` parts, producing composite tokens.
    pub fn with_multipart_threshold(threshold: u64, part_size: u64) -> Self {
        assert!(part_size > 0);
        Self {
            objects: RwLock::default(),
            multipart_threshold: Some(threshold),
            part_size,
        }
    }

    /// Stored bytes for `key`, if present.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let objects = self.objects.read().unwrap();
        objects.get(key).map(|obj| obj.data.clone())
    }

    /// Token reported for `key` at write time, if present.
    pub fn token(&self, key: &str) -> Option<StoreToken> {
        let objects = self.objects.read().unwrap();
        objects.get(key).map(|obj| obj.token.clone())
    }

    fn token_for(&self, data: &[u8]) -> StoreToken {
        let multipart = self
            .multipart_threshold
            .is_some_and(|threshold| data.len() as u64 > threshold);

        if !multipart {
            return StoreToken::new(format!("\"{}\"", ContentDigest::of(data).to_hex()));
        }

        // composite token: digest over the concatenated part digests,
        // suffixed with the part count
        let mut combined = DigestBuilder::new();
        let mut parts = 0u32;
        for part in data.chunks(self.part_size as usize) {
            combined.update(ContentDigest::of(part).as_bytes());
            parts += 1;
        }
        StoreToken::new(format!("\"{}-{parts}\"", combined.finalize().to_hex()))
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemStore {
    async fn put(
        &self,
        descriptor: &UploadDescriptor,
        body: UploadBody,
    ) -> Result<StoreReceipt, StoreError> {
        let data = body.into_bytes().await.map_err(StoreError::Transport)?;

        if ContentDigest::of(&data) != descriptor.digest {
            return Err(StoreError::IntegrityMismatch {
                key: descriptor.key.clone(),
                digest: descriptor.digest.to_hex(),
            });
        }

        let token = self.token_for(&data);
        let length = data.len() as u64;

        let mut objects = self.objects.write().unwrap();
        objects.insert(
            descriptor.key.clone(),
            StoredObject {
                data,
                content_type: descriptor.content_type.clone(),
                token: token.clone(),
            },
        );

        Ok(StoreReceipt { token, length })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(key: &str, data: &[u8]) -> UploadDescriptor {
        UploadDescriptor::new(key, ContentDigest::of(data), data.len() as u64)
    }

    #[tokio::test]
    async fn put_echoes_the_digest_as_a_plain_token() {
        let store = MemStore::new();
        let data = b"hello world";

        let receipt = store
            .put(
                &descriptor("greeting.gz", data),
                UploadBody::Buffered(Bytes::from_static(data)),
            )
            .await
            .unwrap();

        assert_eq!(receipt.length, data.len() as u64);
        assert_eq!(receipt.token.plain_digest(), Some(ContentDigest::of(data)));
        assert_eq!(store.get("greeting.gz").unwrap(), data.as_slice());
    }

    #[tokio::test]
    async fn wrong_digest_is_refused() {
        let store = MemStore::new();
        let mut descriptor = descriptor("k", b"what was sent");
        descriptor.digest = ContentDigest::of(b"something else");

        let err = store
            .put(
                &descriptor,
                UploadBody::Buffered(Bytes::from_static(b"what was sent")),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::IntegrityMismatch { .. }));
        assert!(store.get("k").is_none());
    }

    #[tokio::test]
    async fn large_body_yields_a_composite_token() {
        let store = MemStore::with_multipart_threshold(16, 8);
        let data = vec![0x5A; 100];

        let receipt = store
            .put(
                &descriptor("big", &data),
                UploadBody::Buffered(data.clone().into()),
            )
            .await
            .unwrap();

        assert!(receipt.token.is_composite());
        assert!(receipt.token.normalized().ends_with("-13"));
        // composite token is not the digest of the whole object
        assert_ne!(
            receipt.token.normalized(),
            ContentDigest::of(&data).to_hex()
        );
    }

    #[tokio::test]
    async fn streamed_body_is_accepted() {
        let store = MemStore::new();
        let data = b"streamed bytes".to_vec();

        let receipt = store
            .put(
                &descriptor("s", &data),
                UploadBody::Streamed(Box::new(std::io::Cursor::new(data.clone()))),
            )
            .await
            .unwrap();

        assert_eq!(receipt.length, data.len() as u64);
        assert_eq!(store.get("s").unwrap(), data.as_slice());
    }
}
