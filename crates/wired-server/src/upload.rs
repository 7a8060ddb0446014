//! `POST /upload`: store multipart files and announce them in every terminal.

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::state::SharedState;

/// Multipart field name carrying files.
const FILES_FIELD: &str = "files";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub files: Vec<String>,
    pub dir: String,
    pub message: String,
}

#[derive(Debug)]
pub enum UploadError {
    BadRequest(String),
    /// The body ran past the configured upload limit.
    TooLarge(String),
    Storage(std::io::Error),
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadError::BadRequest(msg) => write!(f, "bad upload: {msg}"),
            UploadError::TooLarge(msg) => write!(f, "upload too large: {msg}"),
            UploadError::Storage(err) => write!(f, "could not store upload: {err}"),
        }
    }
}

impl std::error::Error for UploadError {}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::Storage(err)
    }
}

impl From<MultipartError> for UploadError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            UploadError::TooLarge(err.body_text())
        } else {
            UploadError::BadRequest(err.body_text())
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = match self {
            UploadError::BadRequest(_) => StatusCode::BAD_REQUEST,
            UploadError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        log::warn!("{self}");
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub async fn upload_handler(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, UploadError> {
    let dir = &state.config.storage_dir;
    tokio::fs::create_dir_all(dir).await?;

    let mut stored = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }
        let Some(name) = field.file_name().and_then(sanitize_file_name) else {
            continue;
        };
        let bytes = field.bytes().await?;
        tokio::fs::write(dir.join(&name), &bytes).await?;
        log::info!("stored upload {name} ({} bytes)", bytes.len());
        stored.push(name);
    }

    if stored.is_empty() {
        return Err(UploadError::BadRequest("no files in request".to_string()));
    }

    let message = format!("Uploaded: {} -> {}", stored.join(", "), dir.display());
    state.notify(message.clone());
    Ok(Json(UploadResponse {
        files: stored,
        dir: dir.display().to_string(),
        message,
    }))
}

/// Reduce a client-supplied name to a plain file name inside the storage
/// directory. Returns `None` when nothing usable is left.
fn sanitize_file_name(raw: &str) -> Option<String> {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = last
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return None;
    }
    Some(cleaned.to_string())
}
