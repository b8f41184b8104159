use std::io;

use crate::store::StoreError;

/// Everything that can abort an upload-and-verify call.
///
/// Verification verdicts are not in here: a mismatching or
/// non-comparable token is a result the caller branches on, not an
/// error.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The compressor errored mid-read or mid-write; partial output was
    /// discarded.
    #[error("compression failed: {0}")]
    Compression(#[source] io::Error),

    /// Local filesystem failure reading the source or spooling the
    /// compressed blob.
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),

    /// The store never accepted the write. `attempts` counts every try,
    /// including the failed last one.
    #[error("upload of {key} failed after {attempts} attempt(s): {source}")]
    Store {
        key: String,
        attempts: u32,
        source: StoreError,
    },

    /// Caller cancelled; nothing was verified.
    #[error("operation cancelled")]
    Cancelled,
}
