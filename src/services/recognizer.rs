//! Text recognition over the enhanced sign region
//!
//! [`TextRecognizer`] wraps a [`Recognizer`] backend with the shared inference
//! permit pool and timeout. Any backend failure becomes
//! `VisionError::RecognitionUnavailable`; the first one is logged at `warn`,
//! later ones at `debug` so a missing OCR sidecar does not flood the log.

use crate::domain::errors::VisionError;
use crate::domain::types::OcrCandidate;
use crate::services::sign_extractor::EnhancedRegion;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// One text span as returned by an OCR backend
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TextSpan {
    pub text: String,
    pub confidence: f32,
}

/// OCR capability
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, region: &EnhancedRegion) -> anyhow::Result<Vec<TextSpan>>;

    /// False when the backend is known to be absent (degraded mode)
    fn is_available(&self) -> bool {
        true
    }
}

/// Stand-in used when no OCR backend is configured
#[derive(Debug, Default)]
pub struct DisabledRecognizer;

#[async_trait]
impl Recognizer for DisabledRecognizer {
    async fn recognize(&self, _region: &EnhancedRegion) -> anyhow::Result<Vec<TextSpan>> {
        anyhow::bail!("no OCR backend configured")
    }

    fn is_available(&self) -> bool {
        false
    }
}

pub struct TextRecognizer {
    backend: Arc<dyn Recognizer>,
    timeout: Duration,
    permits: Arc<Semaphore>,
    warned: AtomicBool,
}

impl TextRecognizer {
    pub fn new(backend: Arc<dyn Recognizer>, timeout: Duration, permits: Arc<Semaphore>) -> Self {
        Self { backend, timeout, permits, warned: AtomicBool::new(false) }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }

    /// Candidates in backend order; an empty list means nothing was read
    pub async fn recognize(
        &self,
        region: &EnhancedRegion,
    ) -> Result<Vec<OcrCandidate>, VisionError> {
        if !self.backend.is_available() {
            return Err(self.unavailable("no OCR backend configured".to_string()));
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| self.unavailable("inference pool closed".to_string()))?;

        let spans = match tokio::time::timeout(self.timeout, self.backend.recognize(region)).await
        {
            Ok(Ok(spans)) => spans,
            Ok(Err(e)) => return Err(self.unavailable(format!("{:#}", e))),
            Err(_) => {
                return Err(self.unavailable(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        };

        Ok(spans.iter().map(|s| OcrCandidate::new(&s.text, s.confidence)).collect())
    }

    fn unavailable(&self, reason: String) -> VisionError {
        if !self.warned.swap(true, Ordering::Relaxed) {
            warn!(reason = %reason, "recognition_unavailable");
        } else {
            debug!(reason = %reason, "recognition_unavailable");
        }
        VisionError::RecognitionUnavailable(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::BoundingBox;
    use crate::services::sign_extractor::SignExtractor;
    use image::DynamicImage;

    struct FixedRecognizer(Vec<TextSpan>);

    #[async_trait]
    impl Recognizer for FixedRecognizer {
        async fn recognize(&self, _region: &EnhancedRegion) -> anyhow::Result<Vec<TextSpan>> {
            Ok(self.0.clone())
        }
    }

    fn region() -> EnhancedRegion {
        SignExtractor::new()
            .extract(&DynamicImage::new_rgb8(20, 20), &BoundingBox::new(0.0, 0.0, 20.0, 20.0))
            .unwrap()
    }

    #[tokio::test]
    async fn test_spans_become_candidates() {
        let backend = Arc::new(FixedRecognizer(vec![TextSpan {
            text: "BRT 2441".to_string(),
            confidence: 0.8,
        }]));
        let recognizer =
            TextRecognizer::new(backend, Duration::from_secs(1), Arc::new(Semaphore::new(1)));

        let candidates = recognizer.recognize(&region()).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].digits_only, "2441");
        assert_eq!(candidates[0].raw_text, "BRT 2441");
    }

    #[tokio::test]
    async fn test_disabled_backend_is_unavailable() {
        let recognizer = TextRecognizer::new(
            Arc::new(DisabledRecognizer),
            Duration::from_secs(1),
            Arc::new(Semaphore::new(1)),
        );

        assert!(!recognizer.is_available());
        for _ in 0..2 {
            let result = recognizer.recognize(&region()).await;
            assert!(matches!(result, Err(VisionError::RecognitionUnavailable(_))));
        }
    }
}
