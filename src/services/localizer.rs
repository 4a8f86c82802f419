//! Vehicle localization over a pluggable object detection backend

use crate::domain::errors::VisionError;
use crate::domain::types::{Detection, RawDetection};
use async_trait::async_trait;
use bytes::Bytes;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

/// Object detection capability. Implementations return every labelled box
/// they find; filtering happens in [`VehicleLocalizer`].
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> anyhow::Result<Vec<RawDetection>>;
}

/// A decoded image together with the bytes it was decoded from
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<DynamicImage>,
    encoded: Bytes,
}

impl Frame {
    pub fn new(image: DynamicImage, encoded: Bytes) -> Self {
        Self { image: Arc::new(image), encoded }
    }

    /// Decode on the blocking pool so large uploads do not stall the runtime
    pub async fn decode(encoded: Bytes) -> Result<Self, VisionError> {
        let input = encoded.clone();
        let image = tokio::task::spawn_blocking(move || decode_image(&input))
            .await
            .map_err(|e| VisionError::ImageDecode(format!("decoder task failed: {}", e)))??;
        Ok(Self { image: Arc::new(image), encoded })
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn shared_image(&self) -> Arc<DynamicImage> {
        self.image.clone()
    }

    /// Original upload bytes, as received
    pub fn encoded(&self) -> &Bytes {
        &self.encoded
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Decode an uploaded buffer into a raster image
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, VisionError> {
    if bytes.is_empty() {
        return Err(VisionError::ImageDecode("empty buffer".to_string()));
    }
    let image =
        image::load_from_memory(bytes).map_err(|e| VisionError::ImageDecode(e.to_string()))?;
    if image.width() == 0 || image.height() == 0 {
        return Err(VisionError::ImageDecode("zero-size image".to_string()));
    }
    Ok(image)
}

/// Keep target-class detections at or above `min_confidence`, best first
pub fn filter_detections(
    raw: Vec<RawDetection>,
    target_classes: &[String],
    min_confidence: f32,
) -> Vec<Detection> {
    let mut detections: Vec<Detection> = raw
        .into_iter()
        .filter(|d| target_classes.iter().any(|c| c == &d.label))
        .filter(|d| d.confidence >= min_confidence)
        .map(|d| Detection { bounding_box: d.bounding_box, confidence: d.confidence })
        .collect();

    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    detections
}

pub struct VehicleLocalizer {
    detector: Arc<dyn ObjectDetector>,
    target_classes: Vec<String>,
    min_confidence: f32,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl VehicleLocalizer {
    pub fn new(
        detector: Arc<dyn ObjectDetector>,
        target_classes: Vec<String>,
        min_confidence: f32,
        timeout: Duration,
        permits: Arc<Semaphore>,
    ) -> Self {
        Self { detector, target_classes, min_confidence, timeout, permits }
    }

    /// Vehicle candidates in descending confidence order. An empty list is a
    /// normal outcome; backend errors and timeouts are `LocalizationFailed`.
    pub async fn locate(&self, frame: &Frame) -> Result<Vec<Detection>, VisionError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| VisionError::LocalizationFailed("inference pool closed".to_string()))?;

        let raw = match tokio::time::timeout(self.timeout, self.detector.detect(frame)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return Err(VisionError::LocalizationFailed(format!("{:#}", e))),
            Err(_) => {
                return Err(VisionError::LocalizationFailed(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        };

        let raw_count = raw.len();
        let detections = filter_detections(raw, &self.target_classes, self.min_confidence);
        debug!(raw = %raw_count, kept = %detections.len(), "vehicles_located");
        Ok(detections)
    }
}
