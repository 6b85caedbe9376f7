// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::backtrace::{Backtrace, BacktraceStatus};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum WorkerError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unknown request type: {0}")]
    UnknownRequestType(String),

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("Handshake with worker '{0}' timed out")]
    HandshakeTimeout(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("Script core is dead: {0}")]
    DeadCore(String),

    #[error("Worker already exists: {0}")]
    AlreadyExists(String),

    #[error("Already disposed: {0}")]
    AlreadyDisposed(String),

    #[error("Frame not found: {0}")]
    FrameNotFound(String),

    #[error("Frame {index} out of range for clip of length {length}")]
    IndexOutOfRange { index: u32, length: u32 },

    #[error("Remote {kind} error: {message}")]
    Remote {
        kind: String,
        message: String,
        traceback: Vec<String>,
    },

    #[error("{} errors occurred: {}", .0.len(), join_messages(.0))]
    Aggregate(Vec<WorkerError>),

    #[error("Cancelled")]
    Cancelled,

    #[error("System stopped")]
    SystemStopped,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

pub type Result<T> = std::result::Result<T, WorkerError>;

fn join_messages(errors: &[WorkerError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<std::io::Error> for WorkerError {
    fn from(err: std::io::Error) -> Self {
        WorkerError::Io(Arc::new(err))
    }
}

impl From<rmp_serde::encode::Error> for WorkerError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        WorkerError::Protocol(format!("encode failed: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for WorkerError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        WorkerError::Protocol(format!("malformed message: {}", err))
    }
}

impl WorkerError {
    /// Stable tag used on the wire and in logs.
    pub fn kind(&self) -> &str {
        match self {
            WorkerError::Protocol(_) => "protocol",
            WorkerError::UnknownRequestType(_) => "unknown_request_type",
            WorkerError::Spawn(_) => "spawn",
            WorkerError::HandshakeTimeout(_) => "handshake_timeout",
            WorkerError::Handshake(_) => "handshake",
            WorkerError::WorkerUnavailable(_) => "worker_unavailable",
            WorkerError::DeadCore(_) => "dead_core",
            WorkerError::AlreadyExists(_) => "already_exists",
            WorkerError::AlreadyDisposed(_) => "already_disposed",
            WorkerError::FrameNotFound(_) => "frame_not_found",
            WorkerError::IndexOutOfRange { .. } => "index_out_of_range",
            WorkerError::Remote { kind, .. } => kind,
            WorkerError::Aggregate(_) => "aggregate",
            WorkerError::Cancelled => "cancelled",
            WorkerError::SystemStopped => "system_stopped",
            WorkerError::Timeout(_) => "timeout",
            WorkerError::Script(_) => "script",
            WorkerError::Configuration(_) => "configuration",
            WorkerError::NotSupported(_) => "not_supported",
            WorkerError::Io(_) => "io",
        }
    }

    /// True when the worker's script engine is gone and the worker should be
    /// recreated rather than retried.
    pub fn is_dead_core(&self) -> bool {
        self.kind() == "dead_core"
    }

    /// Textual trace: the error and each `source()` below it, then the
    /// captured backtrace when `RUST_BACKTRACE` enables capture.
    pub fn traceback(&self) -> Vec<String> {
        if let WorkerError::Remote { traceback, .. } = self {
            return traceback.clone();
        }

        let mut lines = vec![format!("{}: {}", self.kind(), self)];
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            lines.push(format!("caused by: {}", err));
            source = err.source();
        }
        if let WorkerError::Aggregate(errors) = self {
            for (i, err) in errors.iter().enumerate() {
                lines.push(format!("[{}] {}: {}", i, err.kind(), err));
            }
        }

        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            lines.extend(backtrace.to_string().lines().map(str::to_string));
        }
        lines
    }

    pub fn to_remote(&self) -> RemoteError {
        RemoteError {
            kind: self.kind().to_string(),
            message: match self {
                WorkerError::Remote { message, .. } => message.clone(),
                other => other.to_string(),
            },
            traceback: self.traceback(),
        }
    }

    /// Rebuild a failure received from a worker.
    ///
    /// Kinds the controller reacts to keep their local variant; the remote
    /// trace for those is logged at debug level.
    pub fn from_remote(remote: RemoteError) -> Self {
        let local = match remote.kind.as_str() {
            "dead_core" => Some(WorkerError::DeadCore(remote.message.clone())),
            "frame_not_found" => Some(WorkerError::FrameNotFound(remote.message.clone())),
            "unknown_request_type" => {
                Some(WorkerError::UnknownRequestType(remote.message.clone()))
            }
            "system_stopped" => Some(WorkerError::SystemStopped),
            _ => None,
        };

        match local {
            Some(err) => {
                tracing::debug!(
                    kind = %remote.kind,
                    "Remote traceback:\n{}",
                    remote.traceback.join("\n")
                );
                err
            }
            None => WorkerError::Remote {
                kind: remote.kind,
                message: remote.message,
                traceback: remote.traceback,
            },
        }
    }
}

/// Failure as it travels in a `Response` or handshake reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_core_survives_the_wire() {
        let remote = WorkerError::DeadCore("engine gone".into()).to_remote();
        assert_eq!(remote.kind, "dead_core");
        assert!(!remote.traceback.is_empty());

        let back = WorkerError::from_remote(remote);
        assert!(back.is_dead_core());
        assert!(matches!(back, WorkerError::DeadCore(msg) if msg.contains("engine gone")));
    }

    #[test]
    fn test_unclassified_remote_error_keeps_trace() {
        let remote = RemoteError {
            kind: "script".into(),
            message: "boom".into(),
            traceback: vec!["line 1".into(), "line 2".into()],
        };
        let err = WorkerError::from_remote(remote.clone());
        assert_eq!(err.kind(), "script");
        assert_eq!(err.traceback(), remote.traceback);
        assert_eq!(err.to_remote(), remote);
    }

    #[test]
    fn test_aggregate_lists_every_failure() {
        let err = WorkerError::Aggregate(vec![
            WorkerError::Script("first".into()),
            WorkerError::Cancelled,
        ]);
        let text = err.to_string();
        assert!(text.starts_with("2 errors occurred"));
        assert!(text.contains("first"));
        assert!(text.contains("Cancelled"));
        assert!(err.traceback().iter().any(|l| l.starts_with("[1] cancelled")));
    }

    #[test]
    fn test_io_error_is_cloneable() {
        let err: WorkerError = std::io::Error::other("pipe closed").into();
        let copy = err.clone();
        assert_eq!(copy.kind(), "io");
        assert_eq!(err.to_string(), copy.to_string());
    }
}
