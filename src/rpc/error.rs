// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for JSON-RPC operations.

use thiserror::Error;

/// Errors that can occur while talking to a tool server.
#[derive(Error, Debug)]
pub enum RpcError {
    /// The server's output stream closed; no further responses will arrive.
    #[error("Connection to {0} closed")]
    Closed(String),

    /// Request timed out.
    #[error("Request {method} timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// Server returned an error response.
    #[error("Server error {code}: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Response did not have the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Writing to the server failed.
    #[error("Communication error: {0}")]
    CommunicationError(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RpcError {
    /// Create a server error from a JSON-RPC error object.
    pub fn server_error(code: i32, message: impl Into<String>) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Check if the error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::CommunicationError(_))
    }

    /// Whether the session is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Closed(_) | Self::CommunicationError(_))
    }

    /// Whether the server does not implement the requested method.
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, Self::ServerError { code, .. } if *code == error_codes::METHOD_NOT_FOUND)
    }
}

/// Result type for JSON-RPC operations.
pub type RpcResult<T> = std::result::Result<T, RpcError>;

/// Standard JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received by the server.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist / is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameter(s).
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error() {
        let err = RpcError::server_error(-32601, "Method not found");
        assert!(err.is_method_not_found());
        assert!(err.to_string().contains("Method not found"));
        assert!(!RpcError::server_error(-32603, "boom").is_method_not_found());
    }

    #[test]
    fn test_is_retryable() {
        let timeout = RpcError::Timeout {
            method: "ping".to_string(),
            timeout_ms: 5000,
        };
        assert!(timeout.is_retryable());
        assert!(!timeout.is_fatal());
        assert!(!RpcError::InvalidResponse("bad".to_string()).is_retryable());
    }

    #[test]
    fn test_is_fatal() {
        assert!(RpcError::Closed("docs".to_string()).is_fatal());
        assert!(RpcError::CommunicationError("pipe".to_string()).is_fatal());
    }
}
