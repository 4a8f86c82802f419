//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `api` - HTTP API server (upload, manual registration, predictions)
//! - `inference` - HTTP clients for the detection and OCR sidecars
//! - `store` - Arrival persistence trait and in-memory store
//! - `egress` - Arrival transitions to file (JSONL format)
//! - `prometheus` - Prometheus text exposition for `/metrics`

pub mod api;
pub mod egress;
pub mod inference;
pub mod prometheus;
pub mod store;

// Re-export commonly used types
pub use api::start_api_server;
pub use egress::{create_egress_channel, ArrivalLogEntry, EgressSender, EgressWriter};
pub use inference::{HttpDetector, HttpRecognizer};
pub use store::{ArrivalStore, MemoryStore};
