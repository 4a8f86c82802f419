//! Error taxonomy for the detection pipeline, the arrival queue and the line registry
//!
//! Only conditions a caller must act on are errors. "Nothing found" outcomes
//! (no vehicle, empty crop, unreadable sign) are `Option::None` in the pipeline.

use crate::domain::arrival::{ArrivalId, ArrivalStatus};
use std::path::PathBuf;

/// Vision pipeline errors
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    /// Input bytes could not be decoded into a non-empty raster image
    #[error("image decode failed: {0}")]
    ImageDecode(String),

    /// Object detection backend failed or timed out
    #[error("localization backend failed: {0}")]
    LocalizationFailed(String),

    /// OCR backend not ready, failed, or timed out
    #[error("recognition backend unavailable: {0}")]
    RecognitionUnavailable(String),
}

/// Arrival queue errors. None of these leave partial state behind.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum QueueError {
    #[error("line {0} is not registered")]
    UnknownLine(String),

    #[error("arrival {0} not found")]
    UnknownArrival(ArrivalId),

    #[error("arrival {id} cannot move from {from} to {to}")]
    InvalidTransition { id: ArrivalId, from: ArrivalStatus, to: ArrivalStatus },
}

/// Line registry loading errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to read line registry {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse line registry {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("duplicate line code {0}")]
    DuplicateCode(String),

    #[error("line entry with empty code")]
    EmptyCode,

    #[error("line {code} has invalid average travel time {minutes}")]
    InvalidTravelTime { code: String, minutes: f64 },

    #[error("line registry is empty")]
    Empty,
}
