//! Application context - shared components built once at startup

use crate::domain::line::LineRegistry;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::egress::EgressSender;
use crate::io::inference::{HttpDetector, HttpRecognizer};
use crate::services::arrival_queue::{ArrivalQueue, QueueSettings};
use crate::services::localizer::ObjectDetector;
use crate::services::pipeline::Pipeline;
use crate::services::recognizer::{DisabledRecognizer, Recognizer};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct AppContext {
    pub config: Config,
    pub registry: Arc<LineRegistry>,
    pub metrics: Arc<Metrics>,
    pub pipeline: Pipeline,
    pub queue: ArrivalQueue,
}

impl AppContext {
    /// Assemble the context around explicit backends
    pub fn new(
        config: Config,
        registry: Arc<LineRegistry>,
        detector: Arc<dyn ObjectDetector>,
        recognizer: Arc<dyn Recognizer>,
        egress: Option<EgressSender>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let pipeline =
            Pipeline::from_config(&config, registry.clone(), detector, recognizer, metrics.clone());

        let mut queue =
            ArrivalQueue::new(registry.clone(), QueueSettings::from_config(&config), metrics.clone());
        if let Some(egress) = egress {
            queue = queue.with_egress(egress);
        }

        Self { config, registry, metrics, pipeline, queue }
    }

    /// Load the line registry and connect the HTTP inference backends.
    /// A registry that fails to load is fatal.
    pub fn from_config(config: Config, egress: Option<EgressSender>) -> anyhow::Result<Self> {
        let registry = LineRegistry::load(config.registry_file())
            .context("Line registry unavailable")?;

        let timeout = Duration::from_millis(config.inference_timeout_ms());
        let detector: Arc<dyn ObjectDetector> =
            Arc::new(HttpDetector::new(config.detector_url(), timeout)?);

        let recognizer: Arc<dyn Recognizer> = match config.recognizer_url() {
            Some(url) => Arc::new(HttpRecognizer::new(url, timeout)?),
            None => {
                warn!("recognizer_not_configured");
                Arc::new(DisabledRecognizer)
            }
        };

        let ctx = Self::new(config, Arc::new(registry), detector, recognizer, egress);
        info!(
            lines = %ctx.registry.len(),
            recognition = %ctx.pipeline.recognition_available(),
            "app_context_ready"
        );
        Ok(ctx)
    }
}
