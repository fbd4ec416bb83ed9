// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for hvconsole-operations.

use thiserror::Error;

/// Result type using ConsoleError.
pub type Result<T> = std::result::Result<T, ConsoleError>;

/// Errors that can occur when talking to the management daemon or driving
/// the operation tracker.
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// Configuration error (missing or invalid values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection to the management API failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Request timed out.
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// Server returned an error response.
    #[error("server error [{code}]: {message}")]
    Server { code: String, message: String },

    /// Unexpected response from server.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Operation not found.
    #[error("operation not found: {0}")]
    OperationNotFound(String),

    /// Invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A component was driven from a state that does not allow the call.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ConsoleError {
    fn from(err: serde_json::Error) -> Self {
        ConsoleError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for ConsoleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ConsoleError::Serialization(err.to_string())
        } else {
            ConsoleError::Connection(err.to_string())
        }
    }
}
