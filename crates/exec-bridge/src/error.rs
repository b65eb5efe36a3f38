use std::io;

use thiserror::Error;

use crate::bridge::Direction;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("access denied for resource {resource_id}")]
    DenyAccess { resource_id: String },
    #[error("invalid resource id '{0}'")]
    InvalidTarget(String),
    #[error("runtime unavailable for resource {resource_id}: {reason}")]
    RemoteUnavailable { resource_id: String, reason: String },
    #[error("runtime returned an invalid exec session: {0}")]
    InvalidResponse(String),
    #[error("failed to dial runtime at {addr}: {source}")]
    DialFailed {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("attach handshake failed: {reason}")]
    HandshakeFailed { reason: String },
    #[error("relay error ({direction}): {source}")]
    RelayError {
        direction: Direction,
        #[source]
        source: io::Error,
    },
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    pub(crate) fn handshake(reason: impl Into<String>) -> Self {
        BridgeError::HandshakeFailed {
            reason: reason.into(),
        }
    }

    pub(crate) fn relay(direction: Direction, source: io::Error) -> Self {
        BridgeError::RelayError { direction, source }
    }

    pub fn metric_label(&self) -> &'static str {
        match self {
            BridgeError::DenyAccess { .. } => "deny_access",
            BridgeError::InvalidTarget(_) => "invalid_target",
            BridgeError::RemoteUnavailable { .. } => "remote_unavailable",
            BridgeError::InvalidResponse(_) => "invalid_response",
            BridgeError::DialFailed { .. } => "dial_failed",
            BridgeError::HandshakeFailed { .. } => "handshake_failed",
            BridgeError::RelayError { .. } => "relay_error",
        }
    }
}
