use serde::Serialize;
use utoipa::ToSchema;

/// Structured error response — designed for agents, not humans.
/// Every error contains enough information for the caller to understand
/// what went wrong and how to fix it.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "already_resolved", "not_found")
    pub error: String,
    /// Human/agent-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the API
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const ALREADY_RESOLVED: &str = "already_resolved";
    pub const INVALID_POLICY: &str = "invalid_policy";
    pub const GENERATION_FAILED: &str = "generation_failed";
    pub const INTERNAL_ERROR: &str = "internal_error";
}
