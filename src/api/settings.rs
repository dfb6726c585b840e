//! Settings endpoints

use axum::extract::State;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::{json, Map, Value};

use crate::api::{ApiError, ApiResult};
use crate::db::settings::{all_settings, set_setting};
use crate::error::Error;
use crate::server::AppState;

/// GET /settings
async fn get_settings(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let settings = all_settings(&state.db).await?;

    let map: Map<String, Value> = settings
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();

    Ok(Json(Value::Object(map)))
}

/// PUT /settings - update one or more keys
async fn update_settings(
    State(state): State<AppState>,
    Json(body): Json<Map<String, Value>>,
) -> ApiResult<Json<Value>> {
    if body.is_empty() {
        return Err(ApiError(Error::InvalidInput("No settings provided".to_string())));
    }

    for (key, value) in &body {
        let value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        set_setting(&state.db, key, value).await?;
    }

    Ok(Json(json!({ "updated": body.len() })))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/settings", get(get_settings))
        .route("/settings", put(update_settings))
}
