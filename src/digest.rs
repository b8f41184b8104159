use core::fmt;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use md5::{Digest as _, Md5};
use tokio::io::AsyncWrite;

/// 128-bit digest over an exact byte sequence.
///
/// Always bound to the bytes that were actually fed in, pre- or
/// post-compression depending on the call site. The store boundary
/// transmits it as base64 over the raw bytes, humans read it as hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 16]);

impl ContentDigest {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Digest a fully buffered blob in one call.
    pub fn of(data: &[u8]) -> Self {
        Self(Md5::digest(data).into())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        base16ct::lower::encode_string(&self.0)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Parse a hex-encoded digest, upper- or lowercase.
    pub fn parse_hex(s: &str) -> Option<Self> {
        let mut out = [0u8; 16];
        let decoded = base16ct::mixed::decode(s, &mut out).ok()?;
        (decoded.len() == 16).then_some(Self(out))
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({:x})", base16ct::HexDisplay(&self.0))
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", base16ct::HexDisplay(&self.0))
    }
}

/// Incremental digest accumulator.
///
/// The result depends only on the bytes fed in, never on how they were
/// chunked.
#[derive(Default)]
pub struct DigestBuilder(Md5);

impl DigestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.0.update(chunk);
    }

    pub fn finalize(self) -> ContentDigest {
        ContentDigest(self.0.finalize().into())
    }
}

/// Writer adapter that digests every byte it forwards to the inner sink.
///
/// Lets one pass over the compressed stream feed both the spool file and
/// the digest without buffering the object twice.
pub struct DigestWriter<W> {
    inner: W,
    hasher: Md5,
}

impl<W> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Md5::new(),
        }
    }

    pub fn finalize(self) -> (W, ContentDigest) {
        (self.inner, ContentDigest(self.hasher.finalize().into()))
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for DigestWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let me = &mut *self;
        let written = ready!(Pin::new(&mut me.inner).poll_write(cx, buf))?;
        // only the accepted prefix counts towards the digest
        me.hasher.update(&buf[..written]);
        Poll::Ready(Ok(written))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
