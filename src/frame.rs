//! The per-window telemetry record published by the control loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable snapshot of one control window.
///
/// Serialized with the field names telemetry clients expect:
/// `Temp`, `Target`, `FrameStart`, `FrameDuration` and `FireTime`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "Temp")]
    pub temperature: f64,
    #[serde(rename = "Target")]
    pub target: f64,
    #[serde(rename = "FrameStart")]
    pub window_start: DateTime<Utc>,
    /// Window length in milliseconds.
    #[serde(rename = "FrameDuration")]
    pub window_duration_ms: u64,
    /// Heater on-time within the window, in milliseconds.
    #[serde(rename = "FireTime")]
    pub fire_time_ms: u64,
}

impl Frame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
