// Copyright 2025 mobile_rag_engine contributors
// SPDX-License-Identifier: MIT
//
// CONTRIBUTOR GUIDELINES:
// This file is part of the core engine. Any modifications require owner approval.
// Please submit a PR with detailed explanation of changes before modifying.

use thiserror::Error;
use flutter_rust_bridge::frb;

/// Structured error type passed to Dart via FFI.
#[frb(dart_metadata=("freezed"))] // Generated as a sealed class in Dart.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RagError {
    /// Malformed vocabulary bytes or embedding blob.
    #[error("Format error: {0}")]
    FormatError(String),

    /// Store operation attempted before `initialize` or after `close`.
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// Embedding length disagrees with the store's established dimension.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Database related error (potential for retry).
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// I/O error (file missing, permission issues, etc.).
    #[error("IO error: {0}")]
    IoError(String),

    /// User input error (empty embedding, bad protocol arguments, etc.).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Failure reported by, or while talking to, the store worker.
    #[error("Worker error: {0}")]
    WorkerError(String),
}

pub type Result<T> = std::result::Result<T, RagError>;

impl From<rusqlite::Error> for RagError {
    fn from(e: rusqlite::Error) -> Self {
        RagError::DatabaseError(e.to_string())
    }
}

impl From<r2d2::Error> for RagError {
    fn from(e: r2d2::Error) -> Self {
        RagError::DatabaseError(e.to_string())
    }
}

impl From<std::io::Error> for RagError {
    fn from(e: std::io::Error) -> Self {
        RagError::IoError(e.to_string())
    }
}

impl From<serde_json::Error> for RagError {
    fn from(e: serde_json::Error) -> Self {
        RagError::InvalidInput(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_reports_both_lengths() {
        let err = RagError::DimensionMismatch { expected: 768, actual: 512 };
        let msg = err.to_string();
        assert!(msg.contains("768"));
        assert!(msg.contains("512"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.model");
        let err: RagError = io.into();
        assert!(matches!(err, RagError::IoError(ref m) if m.contains("missing.model")));
    }
}
