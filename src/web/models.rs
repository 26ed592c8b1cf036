//! Contains the data models for API requests and responses.

use serde::{Deserialize, Serialize};

/// Query string of `POST /?target=<temperature>`.
#[derive(Debug, Deserialize)]
pub struct TargetQuery {
    pub target: Option<String>,
}

/// Represents the response to a successful target change.
#[derive(Debug, Serialize)]
pub struct TargetResponse {
    pub result: &'static str,
    pub target: f64,
}
