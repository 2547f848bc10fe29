use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Multipart, State};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::analysis::aggregate::EmotionDistribution;
use crate::api::error::{AppError, AppResult};
use crate::api::AppState;
use crate::media::mimetype::UploadHead;

/// Multipart field name clients are expected to use for the video.
const UPLOAD_FIELD: &str = "file";

pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Welcome to the Emotion Analysis API" }))
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// POST /analyze_emotion
///
/// Stores the uploaded video in a temporary file, samples and classifies its
/// frames, and answers the percentage of classified frames per emotion.
pub async fn analyze_emotion(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<Json<EmotionDistribution>> {
    // Removed from disk when dropped, whichever way this handler exits.
    let (upload, head) = receive_upload(&mut multipart).await?;

    let kind = head.kind();
    if kind.is_video() {
        info!(bytes = head.total_bytes(), mime = kind.mime(), "Video received");
    } else {
        warn!(bytes = head.total_bytes(), mime = kind.mime(), "Upload does not look like a video");
    }

    let tally = state.analysis.run(upload.path()).await?;
    drop(upload);

    Ok(Json(tally.distribution))
}

/// Streams the first file field of the form into a fresh temporary file.
async fn receive_upload(multipart: &mut Multipart) -> AppResult<(NamedTempFile, UploadHead)> {
    while let Some(mut field) = multipart.next_field().await? {
        if field.file_name().is_none() && field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let upload = tempfile::Builder::new()
            .prefix("deep-affect-")
            .tempfile()
            .context("Failed to create temporary upload file")?;
        let std_file = upload
            .as_file()
            .try_clone()
            .context("Failed to open temporary upload file")?;
        let mut file = tokio::fs::File::from_std(std_file);

        let mut head = UploadHead::default();
        while let Some(chunk) = field.chunk().await? {
            head.push(&chunk);
            file.write_all(&chunk)
                .await
                .context("Failed to write temporary upload file")?;
        }
        file.flush().await.context("Failed to flush temporary upload file")?;

        return Ok((upload, head));
    }

    Err(AppError::MissingFile)
}
