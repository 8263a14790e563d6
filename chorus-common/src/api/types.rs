//! Shared API request/response types

use serde::{Deserialize, Serialize};

/// JSON body of every error response
///
/// ```
/// use chorus_common::api::types::ErrorResponse;
///
/// let body = ErrorResponse::new("Unauthorized");
/// assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"error":"Unauthorized"}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
