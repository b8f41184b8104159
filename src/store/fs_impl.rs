//! Filesystem store backend.
//!
//! Objects land under a root directory, one file per key. Writes spool
//! into a temp file first and only rename into place once the received
//! bytes check out against the announced digest, so a crashed or corrupt
//! transfer never leaves a half-written object behind.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::digest::{ContentDigest, DigestWriter};

use super::{ObjectStore, StoreError, StoreReceipt, StoreToken, UploadBody, UploadDescriptor};

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Read an object back, mainly for inspection and tests.
    pub async fn get(&self, key: &str) -> std::io::Result<Vec<u8>> {
        fs::read(self.object_path(key)).await
    }

    async fn receive(
        &self,
        body: UploadBody,
        tmp: &tempfile::NamedTempFile,
    ) -> std::io::Result<(ContentDigest, u64)> {
        let file = fs::File::from_std(tmp.reopen()?);
        let mut writer = DigestWriter::new(BufWriter::new(file));

        let length = match body {
            UploadBody::Buffered(bytes) => {
                writer.write_all(&bytes).await?;
                bytes.len() as u64
            }
            UploadBody::Streamed(mut read) => tokio::io::copy(&mut read, &mut writer).await?,
        };
        writer.flush().await?;

        let (_, digest) = writer.finalize();
        Ok((digest, length))
    }
}

#[async_trait::async_trait]
impl ObjectStore for FsStore {
    async fn put(
        &self,
        descriptor: &UploadDescriptor,
        body: UploadBody,
    ) -> Result<StoreReceipt, StoreError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(StoreError::Transport)?;

        // temp file lives in the root so the final rename stays on one
        // filesystem; dropped (and unlinked) on every error path
        let tmp = tempfile::NamedTempFile::new_in(&self.root).map_err(StoreError::Transport)?;

        let (received, length) = self
            .receive(body, &tmp)
            .await
            .map_err(StoreError::Transport)?;

        if received != descriptor.digest {
            return Err(StoreError::IntegrityMismatch {
                key: descriptor.key.clone(),
                digest: descriptor.digest.to_hex(),
            });
        }

        let path = self.object_path(&descriptor.key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(StoreError::Transport)?;
        }
        tmp.persist(&path)
            .map_err(|err| StoreError::Transport(err.error))?;

        tracing::debug!(key = %descriptor.key, length, "stored object");

        Ok(StoreReceipt {
            token: StoreToken::new(format!("\"{}\"", received.to_hex())),
            length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(key: &str, data: &[u8]) -> UploadDescriptor {
        UploadDescriptor::new(key, ContentDigest::of(data), data.len() as u64)
    }

    #[tokio::test]
    async fn put_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let data = b"on disk".to_vec();

        let receipt = store
            .put(
                &descriptor("nested/key.gz", &data),
                UploadBody::Buffered(data.clone().into()),
            )
            .await
            .unwrap();

        assert_eq!(receipt.length, data.len() as u64);
        assert_eq!(receipt.token.plain_digest(), Some(ContentDigest::of(&data)));
        assert_eq!(store.get("nested/key.gz").await.unwrap(), data);
    }

    #[tokio::test]
    async fn digest_mismatch_leaves_no_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        let mut descriptor = descriptor("k", b"sent");
        descriptor.digest = ContentDigest::of(b"announced");

        let err = store
            .put(&descriptor, UploadBody::Buffered(b"sent".to_vec().into()))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::IntegrityMismatch { .. }));
        assert!(store.get("k").await.is_err());
    }

    #[tokio::test]
    async fn streamed_put() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let data = vec![7u8; 64 * 1024];

        let receipt = store
            .put(
                &descriptor("blob", &data),
                UploadBody::Streamed(Box::new(std::io::Cursor::new(data.clone()))),
            )
            .await
            .unwrap();

        assert_eq!(receipt.length, data.len() as u64);
        assert_eq!(store.get("blob").await.unwrap(), data);
    }
}
