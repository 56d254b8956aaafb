//! Shared types for the hospitality back-office
//!
//! Error system, entity models and request payloads used by the server and
//! its clients.

pub mod error;
pub mod models;
pub mod util;

// Re-exports
pub use axum::{Json, body};
pub use http;
pub use serde::{Deserialize, Serialize};
