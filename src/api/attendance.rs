//! Recognition and manual-mark endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;

use crate::api::types::{outcome_response, MarkRequest, RecognizeRequest};
use crate::api::{ApiError, ApiResult};
use crate::error::Error;
use crate::server::AppState;

/// Decode a base64 image payload, tolerating a data-URI prefix.
pub fn decode_image(payload: &str) -> Result<Vec<u8>, Error> {
    let raw = payload.rsplit(',').next().unwrap_or(payload);
    BASE64
        .decode(raw.trim())
        .map_err(|e| Error::InvalidImage(format!("Base64 decode failed: {}", e)))
}

/// POST /recognize
async fn recognize(
    State(state): State<AppState>,
    Json(req): Json<RecognizeRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let image = decode_image(&req.image).map_err(ApiError)?;
    let scope = req.scope.as_deref();

    // Transient infrastructure failures get one retry before surfacing
    let outcome = match state.attendance.recognize(&image, scope).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_transient() => state.attendance.recognize(&image, scope).await?,
        Err(e) => return Err(ApiError(e)),
    };

    let (status, body) = outcome_response(&outcome);
    Ok((status, Json(body)))
}

/// POST /attendance/mark
async fn mark(
    State(state): State<AppState>,
    Json(req): Json<MarkRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let outcome = match state
        .attendance
        .mark(req.session_id, req.student_id, req.status)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) if e.is_transient() => {
            state
                .attendance
                .mark(req.session_id, req.student_id, req.status)
                .await?
        }
        Err(e) => return Err(ApiError(e)),
    };

    let (status, body) = outcome_response(&outcome);
    Ok((status, Json(body)))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/recognize", post(recognize))
        .route("/attendance/mark", post(mark))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_image_accepts_data_uri() {
        let plain = BASE64.encode(b"fake-image-bytes");
        assert_eq!(decode_image(&plain).unwrap(), b"fake-image-bytes");

        let data_uri = format!("data:image/jpeg;base64,{}", plain);
        assert_eq!(decode_image(&data_uri).unwrap(), b"fake-image-bytes");

        assert!(decode_image("!!not-base64!!").is_err());
    }
}
