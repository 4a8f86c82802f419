//! HTTP clients for the detection and OCR sidecars
//!
//! The detector receives the uploaded image unchanged; the recognizer receives
//! the enhanced sign region as PNG. Both answer JSON:
//! - detector: `{"detections": [{"label": "bus", "confidence": 0.91, "box": {"x1":..,"y1":..,"x2":..,"y2":..}}]}`
//! - recognizer: `{"results": [{"text": "2441", "confidence": 0.87}]}`

use crate::domain::types::RawDetection;
use crate::services::localizer::{Frame, ObjectDetector};
use crate::services::recognizer::{Recognizer, TextSpan};
use crate::services::sign_extractor::EnhancedRegion;
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<RawDetection>,
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<TextSpan>,
}

fn build_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .http1_only()
        .build()
        .context("Failed to build inference HTTP client")
}

/// MIME type sniffed from the image header
fn content_type(encoded: &[u8]) -> &'static str {
    image::guess_format(encoded)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream")
}

async fn post_image(
    client: &reqwest::Client,
    url: &str,
    content_type: &str,
    body: Bytes,
) -> anyhow::Result<Vec<u8>> {
    let response = client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, content_type)
        .body(body)
        .send()
        .await
        .with_context(|| format!("POST {} failed", url))?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("{} returned {}", url, status);
    }

    let body = response.bytes().await.with_context(|| format!("reading {} response", url))?;
    Ok(body.to_vec())
}

/// Object detection over HTTP
pub struct HttpDetector {
    url: String,
    client: reqwest::Client,
}

impl HttpDetector {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        info!(url = %url, "detector_backend_configured");
        Ok(Self { url: url.to_string(), client: build_client(timeout)? })
    }
}

#[async_trait]
impl ObjectDetector for HttpDetector {
    async fn detect(&self, frame: &Frame) -> anyhow::Result<Vec<RawDetection>> {
        let encoded = frame.encoded().clone();
        let body = post_image(&self.client, &self.url, content_type(&encoded), encoded).await?;
        let parsed: DetectResponse =
            serde_json::from_slice(&body).context("invalid detector response")?;

        debug!(count = %parsed.detections.len(), "detector_response");
        Ok(parsed.detections)
    }
}

/// OCR over HTTP
pub struct HttpRecognizer {
    url: String,
    client: reqwest::Client,
}

impl HttpRecognizer {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        info!(url = %url, "recognizer_backend_configured");
        Ok(Self { url: url.to_string(), client: build_client(timeout)? })
    }
}

#[async_trait]
impl Recognizer for HttpRecognizer {
    async fn recognize(&self, region: &EnhancedRegion) -> anyhow::Result<Vec<TextSpan>> {
        let region = region.clone();
        let png = tokio::task::spawn_blocking(move || region.to_png())
            .await
            .context("sign region encoder task failed")?
            .context("encoding sign region for recognizer")?;

        let body = post_image(&self.client, &self.url, "image/png", Bytes::from(png)).await?;
        let parsed: RecognizeResponse =
            serde_json::from_slice(&body).context("invalid recognizer response")?;

        debug!(count = %parsed.results.len(), "recognizer_response");
        Ok(parsed.results)
    }
}
