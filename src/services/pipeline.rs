//! Detection pipeline: image bytes → identified line
//!
//! decode → localize → for each vehicle (best first): extract sign → recognize → match.
//! The search short-circuits on the first vehicle whose sign reads as a
//! registered line. Zero vehicles, empty crops, unreadable signs and backend
//! failures all collapse into `Ok(None)`; only undecodable input is an error.
//!
//! Decoding and sign enhancement run on the blocking pool.

use crate::domain::errors::VisionError;
use crate::domain::line::LineRegistry;
use crate::domain::types::{BoundingBox, Detection, IdentifiedLine};
use crate::infra::config::Config;
use crate::infra::metrics::{Metrics, PipelineOutcome};
use crate::services::line_matcher::match_line;
use crate::services::localizer::{Frame, ObjectDetector, VehicleLocalizer};
use crate::services::recognizer::{Recognizer, TextRecognizer};
use crate::services::sign_extractor::{EnhancedRegion, SignExtractor};
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub struct Pipeline {
    registry: Arc<LineRegistry>,
    localizer: VehicleLocalizer,
    extractor: SignExtractor,
    recognizer: TextRecognizer,
    metrics: Arc<Metrics>,
}

impl Pipeline {
    pub fn new(
        registry: Arc<LineRegistry>,
        localizer: VehicleLocalizer,
        recognizer: TextRecognizer,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { registry, localizer, extractor: SignExtractor::new(), recognizer, metrics }
    }

    /// Wire both backends behind one permit pool sized from config
    pub fn from_config(
        config: &Config,
        registry: Arc<LineRegistry>,
        detector: Arc<dyn ObjectDetector>,
        recognizer: Arc<dyn Recognizer>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_inferences()));
        let timeout = Duration::from_millis(config.inference_timeout_ms());

        let localizer = VehicleLocalizer::new(
            detector,
            config.target_classes().to_vec(),
            config.min_detection_confidence(),
            timeout,
            permits.clone(),
        );
        let recognizer = TextRecognizer::new(recognizer, timeout, permits);

        Self::new(registry, localizer, recognizer, metrics)
    }

    pub fn recognition_available(&self) -> bool {
        self.recognizer.is_available()
    }

    /// Localization stage alone, for inspection tools
    pub async fn locate(&self, frame: &Frame) -> Result<Vec<Detection>, VisionError> {
        self.localizer.locate(frame).await
    }

    /// Run the full pipeline on an encoded image
    pub async fn identify(&self, bytes: Bytes) -> Result<Option<IdentifiedLine>, VisionError> {
        let start = Instant::now();
        let len = bytes.len();

        let frame = match Frame::decode(bytes).await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(bytes = %len, error = %e, "image_decode_failed");
                self.metrics
                    .record_image_processed(PipelineOutcome::DecodeError, elapsed_ms(start));
                return Err(e);
            }
        };

        Ok(self.timed_search(&frame, start).await)
    }

    /// Run the pipeline on an already decoded frame
    pub async fn identify_frame(&self, frame: &Frame) -> Option<IdentifiedLine> {
        self.timed_search(frame, Instant::now()).await
    }

    async fn timed_search(&self, frame: &Frame, start: Instant) -> Option<IdentifiedLine> {
        let result = self.search(frame).await;
        let outcome = if result.is_some() {
            PipelineOutcome::LineIdentified
        } else {
            PipelineOutcome::NoLine
        };
        self.metrics.record_image_processed(outcome, elapsed_ms(start));
        result
    }

    async fn search(&self, frame: &Frame) -> Option<IdentifiedLine> {
        let detections = match self.localizer.locate(frame).await {
            Ok(detections) => detections,
            Err(e) => {
                warn!(error = %e, "localization_failed");
                self.metrics.record_localization_failure();
                return None;
            }
        };

        if detections.is_empty() {
            debug!(width = %frame.width(), height = %frame.height(), "no_vehicle_detected");
            return None;
        }

        for (rank, detection) in detections.iter().enumerate() {
            let Some(region) = self.extract(frame, detection.bounding_box).await else {
                continue;
            };

            let candidates = match self.recognizer.recognize(&region).await {
                Ok(candidates) => candidates,
                Err(_) => {
                    // Every remaining box would hit the same backend
                    self.metrics.record_recognition_unavailable();
                    return None;
                }
            };

            if let Some(line) = match_line(&candidates, &self.registry) {
                info!(
                    line_code = %line.code,
                    vehicle_rank = %rank,
                    vehicle_confidence = %format!("{:.2}", detection.confidence),
                    "line_identified"
                );
                return Some(IdentifiedLine {
                    line_code: line.code.clone(),
                    line_name: line.display_name.clone(),
                });
            }

            debug!(vehicle_rank = %rank, candidates = %candidates.len(), "sign_unreadable");
        }

        debug!(vehicles = %detections.len(), "no_line_detected");
        None
    }

    async fn extract(&self, frame: &Frame, bounding_box: BoundingBox) -> Option<EnhancedRegion> {
        let extractor = self.extractor;
        let image = frame.shared_image();
        match tokio::task::spawn_blocking(move || extractor.extract(&image, &bounding_box)).await {
            Ok(region) => region,
            Err(e) => {
                warn!(error = %e, "sign_extraction_failed");
                None
            }
        }
    }
}

#[inline]
fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
