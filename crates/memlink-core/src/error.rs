//! Typed error hierarchy for memory mapping.
//!
//! Every fallible operation in the workspace returns [`MemError`] through a
//! single channel.  Callers treat an error as fatal to the one mapping
//! operation that produced it, never to the whole pipeline.
//!
//! # Error codes
//!
//! Each variant maps to a stable integer code via [`MemError::error_code`]
//! for structured telemetry without string parsing.

use crate::types::{DataType, MemoryType};

/// All errors originating from memlink.
#[derive(Debug, thiserror::Error)]
pub enum MemError {
    // ── Arguments & lookup ───────────────────────────────────────────
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // ── Mapping ──────────────────────────────────────────────────────
    #[error("No mapper available from {from} to {to}")]
    MappingUnavailable { from: MemoryType, to: MemoryType },

    #[error("Scalar type mismatch: requested {requested}, tensor holds {actual}")]
    TypeMismatch {
        requested: DataType,
        actual: DataType,
    },

    // ── Device ───────────────────────────────────────────────────────
    #[error("Device call {call} failed with status {status}")]
    DeviceOperationFailed { call: String, status: i32 },

    #[error("Timed out waiting for {operation} after {polls} polls ({elapsed_ms} ms)")]
    Timeout {
        operation: String,
        polls: u32,
        elapsed_ms: u64,
    },

    // ── Worker ───────────────────────────────────────────────────────
    #[error("Map worker shut down; submission refused")]
    Shutdown,

    #[error("Panic recovered in {stage}: {message}")]
    PanicRecovered {
        stage: &'static str,
        message: String,
    },
}

impl MemError {
    /// Stable integer error code for structured telemetry.
    ///
    /// Codes are grouped by category:
    /// - 1xx: arguments and lookup
    /// - 2xx: mapping
    /// - 3xx: device
    /// - 4xx: worker
    pub fn error_code(&self) -> u32 {
        match self {
            Self::InvalidArgument(_) => 100,
            Self::NotFound(_) => 101,
            Self::MappingUnavailable { .. } => 200,
            Self::TypeMismatch { .. } => 201,
            Self::DeviceOperationFailed { .. } => 300,
            Self::Timeout { .. } => 301,
            Self::Shutdown => 400,
            Self::PanicRecovered { .. } => 401,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, MemError>;
