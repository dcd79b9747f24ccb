use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use inference::{ErrorKind, PipelineError};
use serde_json::json;
use thiserror::Error;

/// Client-facing failures. Messages are fixed strings; underlying errors are
/// logged, never returned.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    #[error("Failed to decode image input")]
    InputDecode,

    #[error("Model is not ready")]
    ModelNotLoaded,

    #[error("Missing multipart field 'file'")]
    MissingFile,

    #[error("Malformed multipart upload")]
    MalformedUpload,

    #[error("No image provided")]
    MissingImage,

    #[error("Invalid event payload")]
    InvalidEvent,

    #[error("Invalid base64 image payload")]
    InvalidPayload,

    #[error("Prediction timed out")]
    Timeout,

    #[error("Failed to resolve the target layer for this model")]
    TargetLayerResolution,

    #[error("Failed to encode the result image")]
    Encoding,

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingFile
            | ApiError::MalformedUpload
            | ApiError::MissingImage
            | ApiError::InvalidEvent => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl From<ErrorKind> for ApiError {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::InputDecode => ApiError::InputDecode,
            ErrorKind::ModelNotLoaded => ApiError::ModelNotLoaded,
            ErrorKind::TargetLayerResolution => ApiError::TargetLayerResolution,
            ErrorKind::Encoding => ApiError::Encoding,
            ErrorKind::Internal => ApiError::Internal,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let kind = err.kind();
        match kind {
            ErrorKind::InputDecode => tracing::warn!(error = %err, "Rejected image input"),
            _ => tracing::error!(error = ?err, ?kind, "Pipeline failure"),
        }
        kind.into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inference::ModelError;

    #[test]
    fn test_client_errors_are_bad_request() {
        assert_eq!(ApiError::MissingImage.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::MissingFile.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::ModelNotLoaded.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiError::InputDecode.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_internal_errors_do_not_leak_detail() {
        let err: ApiError = PipelineError::from(ModelError::Weights(
            "/secret/path/weights.safetensors is corrupt".to_string(),
        ))
        .into();

        assert_eq!(err, ApiError::Internal);
        assert!(!err.message().contains("secret"));
    }

    #[test]
    fn test_messages_name_the_failure() {
        assert!(ApiError::ModelNotLoaded.message().contains("not ready"));
        assert!(ApiError::InputDecode.message().contains("decode"));
        assert!(ApiError::MissingImage.message().contains("No image"));
        assert!(ApiError::Timeout.message().contains("timed out"));
    }
}
