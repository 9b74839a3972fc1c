//! Failure taxonomy of a single side's generation.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::inference::ClientError;
use crate::types::InstanceId;

/// Coarse failure classification surfaced with every failed result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    TransportError,
    ParseError,
    RecoveryFailed,
    InstanceMismatch,
}

impl ErrorKind {
    /// Label used for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorKind::TransportError => "transport_error",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::RecoveryFailed => "recovery_failed",
            ErrorKind::InstanceMismatch => "instance_mismatch",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Terminal failure of one orchestrator run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    /// Connectivity or HTTP status failure outside the retry path. The
    /// orchestrator pivots on every fast-path failure, so its own transport
    /// failures surface as `RecoveryFailed`; this kind is kept for callers
    /// that report a failure without recovery.
    #[error("transport error: {0}")]
    Transport(String),

    /// Response shape violated the chat contract
    #[error("parse error: {0}")]
    Parse(String),

    /// The single retry after the pivot failed as well
    #[error("Error after recovery attempt: {source}")]
    RecoveryFailed { source: ClientError },

    /// A different instance answered than the one the request targeted
    #[error("Error: Response mismatch. Expected {expected}, got {actual}")]
    InstanceMismatch { expected: InstanceId, actual: InstanceId },
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerationError::Transport(_) => ErrorKind::TransportError,
            GenerationError::Parse(_) => ErrorKind::ParseError,
            GenerationError::RecoveryFailed { .. } => ErrorKind::RecoveryFailed,
            GenerationError::InstanceMismatch { .. } => ErrorKind::InstanceMismatch,
        }
    }
}
