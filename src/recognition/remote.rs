//! HTTP embedding provider
//!
//! The detection/embedding model runs in a separate inference service; this
//! client posts images to it and maps the response onto [`DetectedFace`].
//! The service is probed once at startup and the process refuses to serve
//! if it is unreachable.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::recognition::provider::{DetectedFace, EmbeddingProvider, FaceQuality};

/// Outer HTTP timeout; the attendance pipeline applies its own soft
/// deadline on top of this.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RemoteEmbeddingProvider {
    http_client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    faces: Vec<FacePayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FacePayload {
    bbox: [f32; 4],
    embedding: Vec<f32>,
    detection_score: f32,
    #[serde(default)]
    sharpness: f32,
    #[serde(default)]
    yaw_deg: f32,
    #[serde(default)]
    pitch_deg: f32,
    #[serde(default)]
    roll_deg: f32,
}

impl RemoteEmbeddingProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http_client: Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.into(),
        }
    }

    /// Probe the inference service. Called once at startup; an unreachable
    /// model is fatal.
    pub async fn check_ready(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Embedding service unreachable at {}: {}", url, e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Provider(format!(
                "Embedding service at {} returned {}",
                url,
                response.status()
            )))
        }
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    async fn embed(&self, image: &[u8]) -> Result<Vec<DetectedFace>> {
        let url = format!("{}/embed", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .json(&serde_json::json!({ "image": BASE64.encode(image) }))
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Provider(format!(
                "Embedding service returned {}",
                response.status()
            )));
        }

        let payload: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Malformed embedding response: {}", e)))?;

        debug!("Embedding service detected {} face(s)", payload.faces.len());

        Ok(payload
            .faces
            .into_iter()
            .map(|f| DetectedFace {
                bbox: f.bbox,
                embedding: f.embedding,
                detection_score: f.detection_score,
                quality: FaceQuality {
                    sharpness: f.sharpness,
                    yaw_deg: f.yaw_deg,
                    pitch_deg: f.pitch_deg,
                    roll_deg: f.roll_deg,
                },
            })
            .collect())
    }
}
