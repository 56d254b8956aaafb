//! Id and time helpers

use chrono::{DateTime, SubsecRound, Utc};

/// Current UTC time truncated to milliseconds (the stored precision)
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Opaque internal id
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Human-facing id with a stable prefix: `ORD-000042`
pub fn display_id(prefix: &str, n: u64) -> String {
    format!("{prefix}-{n:06}")
}
