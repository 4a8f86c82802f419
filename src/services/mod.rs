//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `localizer` - Vehicle localization over an object detection backend
//! - `sign_extractor` - Sign region crop and contrast/binarization enhancement
//! - `recognizer` - Text recognition over an OCR backend
//! - `line_matcher` - OCR candidates → registered line code
//! - `pipeline` - Orchestrates the four stages above
//! - `arrival_queue` - Arrival state machine and prediction queries

pub mod arrival_queue;
pub mod line_matcher;
pub mod localizer;
pub mod pipeline;
pub mod recognizer;
pub mod sign_extractor;

// Re-export commonly used types
pub use arrival_queue::{
    ArrivalQueue, QueueSettings, QueueStats, RecordedArrival, StopPredictions,
};
pub use localizer::{Frame, ObjectDetector, VehicleLocalizer};
pub use pipeline::Pipeline;
pub use recognizer::{DisabledRecognizer, Recognizer, TextRecognizer, TextSpan};
pub use sign_extractor::{EnhancedRegion, SignExtractor};
