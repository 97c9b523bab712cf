use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;

use crate::{error::AppError, AppState};

#[derive(Debug, Deserialize)]
pub struct SignedFileQuery {
    pub expires: i64,
    pub signature: String,
}

/// GET /files/{*path}: serves an upload to whoever holds a valid signed URL.
pub async fn serve_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(params): Query<SignedFileQuery>,
) -> Result<impl IntoResponse, AppError> {
    if !state.storage.verify(&path, params.expires, &params.signature, Utc::now()) {
        return Err(AppError::forbidden("Invalid or expired link"));
    }

    let bytes = state.storage.read(&path).await?;
    let content_type = mime_guess::from_path(&path)
        .first_raw()
        .unwrap_or("application/octet-stream");

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, "inline"),
            (header::CACHE_CONTROL, "private, no-store"),
        ],
        bytes,
    ))
}
