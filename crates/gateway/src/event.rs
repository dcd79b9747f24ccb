//! Event-driven invocation: `{image: <base64>}` in, `{score, gradcam_image}`
//! out. Used by `POST /invoke` and the `invoke` binary.

use crate::error::ApiError;
use axum::http::StatusCode;
use inference::{
    Explanation, NativeService,
    serialization::{PayloadError, decode_base64_payload, to_data_uri},
};
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq)]
pub struct EventResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl EventResponse {
    pub fn success(explanation: &Explanation) -> Self {
        Self {
            status: StatusCode::OK,
            body: json!({
                "score": explanation.score,
                "gradcam_image": to_data_uri(&explanation.png),
            }),
        }
    }

    pub fn failure(err: ApiError) -> Self {
        Self {
            status: err.status(),
            body: json!({ "error": err.message() }),
        }
    }

    /// API-gateway style envelope, with the body serialized to a string.
    pub fn envelope(&self) -> Value {
        json!({
            "statusCode": self.status.as_u16(),
            "headers": {
                "Content-Type": "application/json",
                "Access-Control-Allow-Origin": "*",
            },
            "body": self.body.to_string(),
        })
    }
}

/// Pull the base64 image out of either `{image}` or `{body: <string|object>}`.
pub fn extract_image(payload: &Value) -> Result<String, ApiError> {
    let object = match payload.get("body") {
        Some(Value::String(raw)) => {
            serde_json::from_str::<Value>(raw).map_err(|_| ApiError::InvalidEvent)?
        }
        Some(body @ Value::Object(_)) => body.clone(),
        Some(Value::Null) | None => payload.clone(),
        Some(_) => return Err(ApiError::InvalidEvent),
    };
    if !object.is_object() {
        return Err(ApiError::InvalidEvent);
    }

    match object.get("image") {
        Some(Value::String(image)) if !image.trim().is_empty() => Ok(image.clone()),
        Some(Value::String(_)) | Some(Value::Null) | None => Err(ApiError::MissingImage),
        Some(_) => Err(ApiError::InvalidEvent),
    }
}

/// Decode the event's image payload into encoded image bytes.
pub fn decode_image(payload: &Value) -> Result<Vec<u8>, ApiError> {
    let image = extract_image(payload)?;
    decode_base64_payload(&image).map_err(|err| match err {
        PayloadError::Empty => ApiError::MissingImage,
        PayloadError::Base64(err) => {
            tracing::warn!(error = %err, "Rejected event payload");
            ApiError::InvalidPayload
        }
    })
}

/// Grad-CAM of the arg-max class for one event.
pub fn invoke(service: Option<&NativeService>, payload: &Value) -> EventResponse {
    let result = decode_image(payload).and_then(|bytes| {
        let service = service.ok_or(ApiError::ModelNotLoaded)?;
        service.explain(&bytes, None).map_err(ApiError::from)
    });

    match result {
        Ok(explanation) => {
            tracing::info!(
                label = %explanation.label,
                score = explanation.score,
                captured = explanation.captured,
                "Event processed"
            );
            EventResponse::success(&explanation)
        }
        Err(err) => EventResponse::failure(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_and_wrapped_events() {
        assert_eq!(extract_image(&json!({ "image": "YWJj" })).unwrap(), "YWJj");
        assert_eq!(
            extract_image(&json!({ "body": { "image": "YWJj" } })).unwrap(),
            "YWJj"
        );
        assert_eq!(
            extract_image(&json!({ "body": "{\"image\": \"YWJj\"}" })).unwrap(),
            "YWJj"
        );
    }

    #[test]
    fn test_missing_or_blank_image() {
        assert_eq!(extract_image(&json!({ "image": "" })), Err(ApiError::MissingImage));
        assert_eq!(extract_image(&json!({ "image": "  " })), Err(ApiError::MissingImage));
        assert_eq!(extract_image(&json!({})), Err(ApiError::MissingImage));
        assert_eq!(extract_image(&json!({ "body": "{}" })), Err(ApiError::MissingImage));
        assert_eq!(
            decode_image(&json!({ "image": "data:image/png;base64," })),
            Err(ApiError::MissingImage),
            "a bare prefix carries no image"
        );
    }

    #[test]
    fn test_malformed_events() {
        assert_eq!(extract_image(&json!([1, 2])), Err(ApiError::InvalidEvent));
        assert_eq!(extract_image(&json!({ "body": "not json" })), Err(ApiError::InvalidEvent));
        assert_eq!(extract_image(&json!({ "image": 7 })), Err(ApiError::InvalidEvent));
    }

    #[test]
    fn test_invalid_base64_is_server_error() {
        let response = invoke(None, &json!({ "image": "!!!not-base64" }));
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body["error"], "Invalid base64 image payload");
    }

    #[test]
    fn test_model_not_loaded() {
        let response = invoke(None, &json!({ "image": "YWJj" }));
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body["error"], "Model is not ready");
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = EventResponse::failure(ApiError::MissingImage).envelope();

        assert_eq!(envelope["statusCode"], 400);
        assert_eq!(envelope["headers"]["Access-Control-Allow-Origin"], "*");
        let body: Value = serde_json::from_str(envelope["body"].as_str().unwrap()).unwrap();
        assert_eq!(body, json!({ "error": "No image provided" }));
    }
}
