//! Error types for runwatch-core.
//!
//! The aggregation path itself never fails: bad lines and patches are dropped.
//! These errors only cover the surfaces around it (config files, replay input).
//! Keep RunwatchFfiError minimal and stable to avoid breaking FFI clients.

use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════════════
// FFI-Compatible Error (for Swift/Kotlin/Python)
// ═══════════════════════════════════════════════════════════════════════════════

/// FFI-safe error type carrying only a message string.
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum RunwatchFfiError {
    #[error("{message}")]
    General { message: String },
}

impl From<String> for RunwatchFfiError {
    fn from(message: String) -> Self {
        RunwatchFfiError::General { message }
    }
}

impl From<&str> for RunwatchFfiError {
    fn from(message: &str) -> Self {
        RunwatchFfiError::General {
            message: message.to_string(),
        }
    }
}

impl From<RunwatchError> for RunwatchFfiError {
    fn from(err: RunwatchError) -> Self {
        RunwatchFfiError::General {
            message: err.to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Internal Error (for Rust-only use)
// ═══════════════════════════════════════════════════════════════════════════════

/// All errors that can occur around the aggregation engine.
#[derive(Debug, thiserror::Error)]
pub enum RunwatchError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Invalid configuration value: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────
    // Input Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Malformed input at line {line}: {details}")]
    MalformedInput { line: usize, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parsing error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience type alias for Results using RunwatchError.
pub type Result<T> = std::result::Result<T, RunwatchError>;

impl From<RunwatchError> for String {
    fn from(err: RunwatchError) -> String {
        err.to_string()
    }
}
