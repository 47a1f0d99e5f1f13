//! Response DTOs for the token endpoint and the spreadsheet API.
//!
//! # Design
//! These mirror the mock-server's payloads but are defined independently;
//! the integration tests catch drift between the two. Requests are not typed
//! here because the body framing is done by `http::build`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Successful answer of the OAuth2 token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// A block of cells as returned by a `values/{range}` read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValueRange {
    pub range: String,
    #[serde(default)]
    pub major_dimension: Option<String>,
    /// Absent when the range holds no data.
    #[serde(default)]
    pub values: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSummary {
    pub spreadsheet_id: String,
    pub updated_range: String,
    #[serde(default)]
    pub updated_rows: u32,
    #[serde(default)]
    pub updated_columns: u32,
    #[serde(default)]
    pub updated_cells: u32,
}

/// Answer to a `values/{range}:append` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppendResponse {
    pub spreadsheet_id: String,
    #[serde(default)]
    pub table_range: Option<String>,
    pub updates: UpdateSummary,
}
