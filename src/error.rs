//! Driver error types.
//!
//! All failures in this crate are represented by the [`DriverError`] enum,
//! which derives [`thiserror::Error`] for ergonomic error handling and also
//! implements [`Serialize`]/[`Deserialize`] so errors can travel across the
//! transport layer back to the orchestrator.
//!
//! Every variant maps onto exactly one [`ErrorCode`], keeping the
//! caller-input / server-internal / not-implemented taxonomy machine-checkable
//! instead of being inferred from message strings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all driver operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum DriverError {
    /// The caller supplied a missing, malformed, or contradictory request
    /// field, or referenced a share that does not resolve.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The cluster's authorization service denied the workload access to the
    /// requested share.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Wiring the target path up failed.
    #[error("mount failed at {path}: {reason}")]
    MountFailed {
        /// Filesystem path where the mount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Tearing a mount down failed.
    #[error("unmount failed at {path}: {reason}")]
    UnmountFailed {
        /// Filesystem path where the unmount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The volume state store could not read or write its durable state.
    #[error("state store error: {0}")]
    StateStore(String),

    /// An unclassified server-side error.
    #[error("internal error: {0}")]
    Internal(String),

    /// The RPC is outside this driver's ephemeral-inline contract.
    #[error("unimplemented: {0}")]
    Unimplemented(String),
}

/// Condition code attached to every [`DriverError`], mirroring the status
/// codes of the storage-interface protocol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    /// Caller-input error; the orchestrator must not retry unchanged.
    InvalidArgument,
    /// Authorization denied the request.
    PermissionDenied,
    /// Server-side failure; the orchestrator is expected to retry.
    Internal,
    /// Operation is not part of this driver's contract.
    Unimplemented,
}

impl DriverError {
    /// Create a [`DriverError::InvalidArgument`] from anything that
    /// implements [`std::fmt::Display`].
    pub fn invalid<E: std::fmt::Display>(e: E) -> Self {
        Self::InvalidArgument(e.to_string())
    }

    /// Create a [`DriverError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Create a [`DriverError::StateStore`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn state<E: std::fmt::Display>(e: E) -> Self {
        Self::StateStore(e.to_string())
    }

    /// Create a [`DriverError::Unimplemented`] naming the rejected RPC.
    pub fn unimplemented(rpc: &str) -> Self {
        Self::Unimplemented(format!(
            "{rpc} is not supported by this ephemeral-inline driver"
        ))
    }

    /// The condition code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::PermissionDenied(_) => ErrorCode::PermissionDenied,
            Self::MountFailed { .. }
            | Self::UnmountFailed { .. }
            | Self::StateStore(_)
            | Self::Internal(_) => ErrorCode::Internal,
            Self::Unimplemented(_) => ErrorCode::Unimplemented,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = DriverError::InvalidArgument("volume ID missing in request".into());
        assert_eq!(
            err.to_string(),
            "invalid argument: volume ID missing in request"
        );
    }

    #[test]
    fn error_codes() {
        assert_eq!(
            DriverError::invalid("x").code(),
            ErrorCode::InvalidArgument
        );
        assert_eq!(
            DriverError::PermissionDenied("no".into()).code(),
            ErrorCode::PermissionDenied
        );
        assert_eq!(
            DriverError::MountFailed {
                path: "/mnt".into(),
                reason: "busy".into()
            }
            .code(),
            ErrorCode::Internal
        );
        assert_eq!(DriverError::state("disk full").code(), ErrorCode::Internal);
        assert_eq!(
            DriverError::unimplemented("NodeStageVolume").code(),
            ErrorCode::Unimplemented
        );
    }

    #[test]
    fn error_serde_roundtrip() {
        let err = DriverError::UnmountFailed {
            path: "/var/lib/kubelet/pods/x".into(),
            reason: "device busy".into(),
        };
        let json = serde_json::to_string(&err).expect("serialize");
        let de: DriverError = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(err.to_string(), de.to_string());
        assert_eq!(de.code(), ErrorCode::Internal);
    }
}
