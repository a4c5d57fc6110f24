//! Response envelope returned by the indexer service.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{ "error": {...}, "data": ... }`; both members are optional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T = Value> {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<ApiError>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data: Option<T>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
  pub code: String,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
}
