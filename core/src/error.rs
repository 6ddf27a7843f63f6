//! Error types for the users API client.
//!
//! # Design
//! Every non-2xx response lands in `ApiError::Http` with the numeric status,
//! the parsed (or raw) body and a display message. Callers that care about
//! "not found" or "duplicate email" ask the error via `is_not_found()` /
//! `is_conflict()` instead of matching on a dedicated variant, because the
//! read queries and the write operations classify the same status
//! differently.
//!
//! `ApiError` is `Clone` so a single cached failure can be handed to every
//! subscriber of a query.

use serde_json::Value;
use thiserror::Error;

static NULL_BODY: Value = Value::Null;

/// Errors returned by the HTTP client, the resource client and the queries.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The server answered with a non-2xx status.
    #[error("{message}")]
    Http {
        status: u16,
        message: String,
        body: Value,
    },

    /// The request never produced an HTTP response (connect, TLS, timeout).
    #[error("transport failed: {0}")]
    Transport(String),

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The request payload could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl ApiError {
    /// Build the error for a non-2xx response from its parsed body.
    ///
    /// A body that parsed to a plain string becomes the message; anything
    /// else falls back to `HTTP {status}`.
    pub fn from_status(status: u16, body: Value) -> Self {
        let message = match &body {
            Value::String(text) => text.clone(),
            _ => format!("HTTP {status}"),
        };
        ApiError::Http {
            status,
            message,
            body,
        }
    }

    /// HTTP status of the failed response, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// 409 from create/update means the email is already taken.
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    /// Parsed response body for HTTP failures, `Null` otherwise.
    pub fn body(&self) -> &Value {
        match self {
            ApiError::Http { body, .. } => body,
            _ => &NULL_BODY,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Transport(e.to_string())
    }
}

/// Errors raised while loading `ClientConfig` from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read environment: {0}")]
    Env(String),

    #[error("invalid API base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}
