//! Wire format for API errors shared by the chat services.
//!
//! Services keep their own domain error enums and render them through
//! [`ErrorResponse`] so every client sees the same JSON shape:
//!
//! ```json
//! {
//!   "error": "Forbidden",
//!   "message": "only admins can change roles",
//!   "status": 403,
//!   "type": "authorization_error",
//!   "code": "NOT_CONVERSATION_ADMIN",
//!   "timestamp": "2026-01-01T00:00:00Z"
//! }
//! ```

use serde::{Deserialize, Serialize};

/// Unified API error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short HTTP reason phrase ("Not Found", "Conflict", ...)
    pub error: String,

    /// Human-readable explanation
    pub message: String,

    /// HTTP status code
    pub status: u16,

    /// Error category, one of [`error_types`]
    #[serde(rename = "type")]
    pub error_type: String,

    /// Stable machine code, one of [`error_codes`]
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// Request id for log correlation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// RFC 3339 timestamp
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, status: u16, error_type: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            status,
            error_type: error_type.to_string(),
            code: code.to_string(),
            details: None,
            trace_id: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_trace_id(mut self, trace_id: String) -> Self {
        self.trace_id = Some(trace_id);
        self
    }
}

/// Stable error codes returned to clients.
pub mod error_codes {
    // Authentication
    pub const TOKEN_INVALID: &str = "TOKEN_INVALID";
    pub const TOKEN_MISSING: &str = "TOKEN_MISSING";

    // Directory
    pub const USER_NOT_FOUND: &str = "USER_NOT_FOUND";
    pub const CONVERSATION_NOT_FOUND: &str = "CONVERSATION_NOT_FOUND";
    pub const NOT_CONVERSATION_MEMBER: &str = "NOT_CONVERSATION_MEMBER";
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    pub const JOIN_REQUEST_PENDING: &str = "JOIN_REQUEST_PENDING";
    pub const MEMBERSHIP_CONFLICT: &str = "MEMBERSHIP_CONFLICT";
    pub const INVALID_STATE: &str = "INVALID_STATE";

    // Messages
    pub const MESSAGE_NOT_FOUND: &str = "MESSAGE_NOT_FOUND";
    pub const EDIT_WINDOW_EXPIRED: &str = "EDIT_WINDOW_EXPIRED";
    pub const VERSION_CONFLICT: &str = "VERSION_CONFLICT";

    // Request validation
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";

    // Database/System
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
}

/// Error categories used for client-side routing of failures.
pub mod error_types {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const AUTHENTICATION_ERROR: &str = "authentication_error";
    pub const AUTHORIZATION_ERROR: &str = "authorization_error";
    pub const NOT_FOUND_ERROR: &str = "not_found_error";
    pub const CONFLICT_ERROR: &str = "conflict_error";
    pub const STATE_ERROR: &str = "state_error";
    pub const SERVER_ERROR: &str = "server_error";
    pub const SERVICE_UNAVAILABLE_ERROR: &str = "service_unavailable_error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_creation() {
        let error = ErrorResponse::new(
            "Not Found",
            "conversation not found",
            404,
            error_types::NOT_FOUND_ERROR,
            error_codes::CONVERSATION_NOT_FOUND,
        );

        assert_eq!(error.status, 404);
        assert_eq!(error.error_type, error_types::NOT_FOUND_ERROR);
        assert_eq!(error.code, error_codes::CONVERSATION_NOT_FOUND);
        assert!(error.trace_id.is_none());
    }

    #[test]
    fn test_serialized_shape_uses_type_key() {
        let error = ErrorResponse::new(
            "Conflict",
            "join request already pending",
            409,
            error_types::CONFLICT_ERROR,
            error_codes::JOIN_REQUEST_PENDING,
        )
        .with_trace_id("req-1".to_string());

        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["type"], "conflict_error");
        assert_eq!(json["trace_id"], "req-1");
        assert!(json.get("details").is_none());
    }
}
