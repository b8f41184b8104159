use std::io;

use async_compression::tokio::bufread::{GzipDecoder, GzipEncoder};
use async_compression::Level;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Gzip a fully buffered blob.
///
/// For a fixed `level` the output is byte-identical across invocations,
/// which is what makes digesting the compressed bytes meaningful.
pub async fn compress_bytes(data: &[u8], level: Level) -> io::Result<Vec<u8>> {
    let mut encoder = GzipEncoder::with_quality(data, level);
    let mut out = Vec::new();
    encoder.read_to_end(&mut out).await?;
    Ok(out)
}

/// Inverse of [`compress_bytes`].
pub async fn decompress_bytes(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = GzipDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).await?;
    Ok(out)
}

/// Gzip `reader` into `writer` without materializing either side.
///
/// Returns the number of compressed bytes written. A mid-stream error
/// from either side aborts the copy; the caller must discard whatever
/// partial output reached the sink.
pub async fn compress_stream<R, W>(reader: R, writer: &mut W, level: Level) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut encoder = GzipEncoder::with_quality(BufReader::new(reader), level);
    let written = tokio::io::copy(&mut encoder, writer).await?;
    writer.flush().await?;
    Ok(written)
}
