//! Compress-hash-upload-verify pipeline.
//!
//! Byte content is gzipped, the compressed bytes are MD5-digested, the
//! blob is pushed to an object store together with the digest, and the
//! integrity token the store reports back is checked against the local
//! digest. Multipart writes return composite tokens that are not the
//! digest of the whole object; the verifier reports those explicitly
//! instead of raising a false corruption alarm.

pub mod compress;
pub mod digest;
pub mod error;
pub mod store;
pub mod uploader;

pub use digest::{ContentDigest, DigestBuilder};
pub use error::UploadError;
pub use store::{ObjectStore, StoreError, StoreReceipt, StoreToken, UploadBody, UploadDescriptor};
pub use uploader::{RetryPolicy, UploadSource, Uploader, VerificationResult, VerifyReason};
