//! Domain models - core business types
//!
//! This module contains the canonical data types used throughout the system:
//! - `arrival` - `ArrivalEvent`, the long-lived queue entry, and its prediction view
//! - `line` - `LineRecord` and the immutable `LineRegistry`
//! - `types` - transient vision types (`Detection`, `OcrCandidate`, ...)
//! - `errors` - typed errors for the pipeline, queue and registry

pub mod arrival;
pub mod errors;
pub mod line;
pub mod types;

// Re-export commonly used types at module level
pub use arrival::{ArrivalEvent, ArrivalId, ArrivalSource, ArrivalStatus, PredictionView};
pub use errors::{QueueError, RegistryError, VisionError};
pub use line::{LineRecord, LineRegistry};
pub use types::{BoundingBox, Detection, IdentifiedLine, OcrCandidate, RawDetection};
