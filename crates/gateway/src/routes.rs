use crate::{error::ApiError, event, state::AppState};
use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, State, multipart::MultipartRejection},
    http::StatusCode,
    response::IntoResponse,
};
use inference::PredictionResult;
use serde_json::{Value, json};

const UPLOAD_FIELD: &str = "file";

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    if state.slot.is_ready() {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "loading" })))
    }
}

pub async fn predict(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResult>, ApiError> {
    let service = state.slot.get().ok_or(ApiError::ModelNotLoaded)?;
    let upload = read_upload(multipart.map_err(|_| ApiError::MalformedUpload)?).await?;
    tracing::debug!(bytes = upload.len(), "Received upload");

    let result = run_blocking(&state, move || {
        service.predict(&upload).map_err(ApiError::from)
    })
    .await?;
    Ok(Json(result))
}

pub async fn invoke(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let response = match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => {
            let service = state.slot.get();
            run_blocking(&state, move || {
                Ok(event::invoke(service.as_deref(), &payload))
            })
            .await
            .unwrap_or_else(event::EventResponse::failure)
        }
        Err(_) => event::EventResponse::failure(ApiError::InvalidEvent),
    };
    (response.status, Json(response.body))
}

async fn read_upload(mut multipart: Multipart) -> Result<Bytes, ApiError> {
    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|_| ApiError::MalformedUpload)?
            .ok_or(ApiError::MissingFile)?;
        if field.name() == Some(UPLOAD_FIELD) {
            return field.bytes().await.map_err(|_| ApiError::MalformedUpload);
        }
    }
}

/// Run a pipeline call on the blocking pool under the request timeout.
///
/// An expired task is not cancelled; it finishes in the background and its
/// result is dropped.
async fn run_blocking<T, F>(state: &AppState, task: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(task);
    match tokio::time::timeout(state.request_timeout, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            tracing::error!(error = %err, "Pipeline task failed");
            Err(ApiError::Internal)
        }
        Err(_) => {
            tracing::warn!(
                timeout_ms = state.request_timeout.as_millis() as u64,
                "Pipeline call timed out"
            );
            Err(ApiError::Timeout)
        }
    }
}
