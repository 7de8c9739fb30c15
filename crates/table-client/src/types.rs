//! Wire types of the table service's row listing API.

use serde::{Deserialize, Serialize};

/// One page of `GET /api/database/rows/table/{id}/`, rows still in raw form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRowPage {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    #[serde(default)]
    pub results: Vec<serde_json::Value>,
}

/// Error body returned by the table service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub error: String,
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

impl ApiErrorResponse {
    pub fn describe(&self) -> String {
        match &self.detail {
            Some(serde_json::Value::String(detail)) => format!("{}: {}", self.error, detail),
            Some(detail) => format!("{}: {}", self.error, detail),
            None => self.error.clone(),
        }
    }
}
