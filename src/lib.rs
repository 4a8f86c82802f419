//! BRT arrivals library
//!
//! Vehicle line detection from photos and the arrival-prediction queue.
//! Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
