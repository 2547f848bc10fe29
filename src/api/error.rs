use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::analysis::AnalysisError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("No video file uploaded")]
    MissingFile,

    #[error("Invalid upload: {0}")]
    Upload(#[from] MultipartError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Analysis(AnalysisError::NoFramesProcessed) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::Analysis(AnalysisError::Internal(e)) | AppError::Internal(e) => {
                tracing::error!(error = %format!("{:#}", e), "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
            AppError::MissingFile => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            AppError::Upload(e) => (e.status(), e.body_text()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
