use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use futures_util::StreamExt;
use tokio_util::io::StreamReader;
use tracing_subscriber::EnvFilter;

use gzput::store::FsStore;
use gzput::uploader::{UploadSource, Uploader, VerificationResult};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let data_dir = std::env::var("GZPUT_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let uploader = Arc::new(Uploader::new(FsStore::new(&data_dir)));

    let app = Router::new()
        .route("/upload/{*key}", post(upload_blob))
        .with_state(uploader);

    let addr: SocketAddr = std::env::var("GZPUT_LISTEN")
        .unwrap_or_else(|_| "127.0.0.1:3000".into())
        .parse()?;
    tracing::info!(%addr, %data_dir, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Streams the request body through the pipeline into the store and
/// answers with the verification verdict.
async fn upload_blob(
    State(uploader): State<Arc<Uploader<FsStore>>>,
    Path(key): Path<String>,
    body: Body,
) -> Result<Json<VerificationResult>, (StatusCode, String)> {
    let stream = body
        .into_data_stream()
        .map(|result| result.map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err)));
    let read = StreamReader::new(stream);

    match uploader
        .upload_and_verify(UploadSource::Reader(Box::new(read)), &key)
        .await
    {
        Ok(result) => Ok(Json(result)),
        Err(err) => {
            tracing::error!(key, error = %err, "upload failed");
            Err((StatusCode::BAD_GATEWAY, err.to_string()))
        }
    }
}
