use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::Json,
};
use std::sync::Arc;

use crate::models::{
    ActiveUploadsResponse, CancelAllResponse, ErrorResponse, FileRecord, LocalId,
    RemoveResponse, UploaderId, ViewResponse,
};
use crate::state::AppState;
use crate::transport::SelectedFile;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: error.into() }))
}

// link (or re-link) the view for an uploader
pub async fn link_view(
    State(state): State<Arc<AppState>>,
    Path(uploader_id): Path<String>,
) -> Json<ViewResponse> {
    let uploader_id = UploaderId::from(uploader_id);
    tracing::debug!("Linking view for uploader {}", uploader_id);

    let view = state.view(&uploader_id);
    let snapshot = view.snapshot();

    Json(ViewResponse {
        uploader_id: snapshot.uploader_id,
        has_files: snapshot.has_files,
        files: snapshot.files.into_values().collect(),
        revision: view.revision(),
    })
}

// tear the view down; uploads keep going
pub async fn teardown_view(
    State(state): State<Arc<AppState>>,
    Path(uploader_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let uploader_id = UploaderId::from(uploader_id);

    if !state.teardown(&uploader_id) {
        tracing::warn!("No view linked for uploader {}", uploader_id);
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("No view linked for uploader {}", uploader_id),
        ));
    }

    tracing::info!("Tore down view for uploader {}", uploader_id);
    Ok(StatusCode::NO_CONTENT)
}

// recovery query: what is still in flight
pub async fn active_uploads(
    State(state): State<Arc<AppState>>,
    Path(uploader_id): Path<String>,
) -> Json<ActiveUploadsResponse> {
    let uploader_id = UploaderId::from(uploader_id);
    let registry = state.service.registry();

    Json(ActiveUploadsResponse {
        has_active_uploads: registry.has_active_uploads(&uploader_id),
        active_count: registry.active_uploads_count(&uploader_id),
        new_files_count: registry.new_files_count(&uploader_id),
        files: registry.get_active_uploads(&uploader_id).into_values().collect(),
        uploader_id,
    })
}

// select a file for upload via multipart form data
pub async fn select_file(
    State(state): State<Arc<AppState>>,
    Path(uploader_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<FileRecord>, ApiError> {
    let uploader_id = UploaderId::from(uploader_id);
    tracing::debug!("Processing file selection for uploader {}", uploader_id);

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::error!("Failed to read multipart field: {}", e);
        api_error(StatusCode::BAD_REQUEST, format!("Failed to read multipart field: {}", e))
    })? {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };

        let data = field.bytes().await.map_err(|e| {
            tracing::error!("Failed to read file data for {}: {}", filename, e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to read file data: {}", e),
            )
        })?;

        let view = state.view(&uploader_id);
        let record = state
            .service
            .add(SelectedFile::from_bytes(filename, data), &view);
        return Ok(Json(record));
    }

    tracing::warn!("File selection contained no file field");
    Err(api_error(StatusCode::BAD_REQUEST, "No file provided"))
}

// remove a file from the view and, if tracked, from the registry
pub async fn remove_file(
    State(state): State<Arc<AppState>>,
    Path((uploader_id, local_id)): Path<(String, u64)>,
) -> Result<Json<RemoveResponse>, ApiError> {
    let uploader_id = UploaderId::from(uploader_id);
    let local_id = LocalId(local_id);

    let listed = state
        .views
        .get(&uploader_id)
        .map(|view| view.snapshot().files.contains_key(&local_id))
        .unwrap_or(false);
    let tracked = state.service.exists(local_id, &uploader_id);

    if !listed && !tracked {
        tracing::warn!("File {} not found for uploader {}", local_id, uploader_id);
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("File not found: {}", local_id),
        ));
    }

    state.service.remove(&uploader_id, local_id);
    tracing::info!("🗑️  Removed file {} from uploader {}", local_id, uploader_id);

    Ok(Json(RemoveResponse {
        success: true,
        uploader_id,
        local_id,
        tracked,
    }))
}

// cancel one upload and wait for the cleanup to land
pub async fn cancel_file(
    State(state): State<Arc<AppState>>,
    Path((uploader_id, local_id)): Path<(String, u64)>,
) -> Result<Json<FileRecord>, ApiError> {
    let uploader_id = UploaderId::from(uploader_id);
    let local_id = LocalId(local_id);

    let record = state
        .service
        .registry()
        .record(&uploader_id, local_id)
        .ok_or_else(|| {
            tracing::warn!("Upload {} not found for uploader {}", local_id, uploader_id);
            api_error(StatusCode::NOT_FOUND, format!("Upload not found: {}", local_id))
        })?;

    state.service.cancel(&record).await.map_err(|e| {
        tracing::error!("Cancellation of {} did not complete: {}", local_id, e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Cancellation failed: {}", e))
    })?;

    Ok(Json(record))
}

// cancel every active upload of an uploader
pub async fn cancel_all(
    State(state): State<Arc<AppState>>,
    Path(uploader_id): Path<String>,
) -> Json<CancelAllResponse> {
    let uploader_id = UploaderId::from(uploader_id);
    let tasks = state.service.cancel_all(&uploader_id);
    let cancelled = tasks.len();

    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!("Cancellation task failed: {}", e);
        }
    }

    tracing::info!("📦 Cancelled {} uploads for uploader {}", cancelled, uploader_id);
    Json(CancelAllResponse {
        uploader_id,
        cancelled,
    })
}

// health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "upload-tracker",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
