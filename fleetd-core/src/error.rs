//! Canonical error taxonomy shared by every fleetd crate.

use serde::{Deserialize, Serialize};

/// The seven canonical error kinds every operation in the control plane maps onto.
///
/// Mirrors standard RPC status codes so a REST/JSON boundary can translate a
/// `ClusterError` into an HTTP status without string-sniffing the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    ResourceExhausted,
    Unavailable,
    Internal,
}

impl ErrorKind {
    /// Canonical lowercase status name, as used in `§6`'s error code mapping.
    pub fn canonical_name(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::FailedPrecondition => "failed_precondition",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Internal => "internal",
        }
    }
}

/// The error type returned by every fleetd crate below the REST boundary.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ClusterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClusterError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ClusterError::NotFound(_) => ErrorKind::NotFound,
            ClusterError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            ClusterError::FailedPrecondition(_) => ErrorKind::FailedPrecondition,
            ClusterError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            ClusterError::Unavailable(_) => ErrorKind::Unavailable,
            ClusterError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ClusterError::NotFound(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        ClusterError::AlreadyExists(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ClusterError::InvalidArgument(msg.into())
    }

    pub fn failed_precondition(msg: impl Into<String>) -> Self {
        ClusterError::FailedPrecondition(msg.into())
    }

    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        ClusterError::ResourceExhausted(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        ClusterError::Unavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ClusterError::Internal(msg.into())
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;

/// The driver-specific error kinds from §4.G, which are a strict subset of
/// [`ErrorKind`] (drivers never raise `Unavailable`: a disconnected driver is
/// `NotConnected`, folded into `Internal` at the agent boundary).
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("instance already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("wrong state for operation: {0}")]
    WrongState(String),

    #[error("driver not connected")]
    NotConnected,

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("operation failed: {0}")]
    OperationFailed(String),
}

impl From<DriverError> for ClusterError {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::NotFound(m) => ClusterError::NotFound(m),
            DriverError::AlreadyExists(m) => ClusterError::AlreadyExists(m),
            DriverError::InvalidSpec(m) => ClusterError::InvalidArgument(m),
            DriverError::WrongState(m) => ClusterError::FailedPrecondition(m),
            DriverError::NotConnected => ClusterError::Internal("driver not connected".into()),
            DriverError::NotSupported(m) => ClusterError::InvalidArgument(m),
            DriverError::OperationFailed(m) => ClusterError::Internal(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_canonical_name() {
        assert_eq!(ErrorKind::NotFound.canonical_name(), "not_found");
        assert_eq!(ClusterError::not_found("x").kind(), ErrorKind::NotFound);
    }

    #[test]
    fn driver_error_maps_to_canonical_kind() {
        let e: ClusterError = DriverError::WrongState("running".into()).into();
        assert_eq!(e.kind(), ErrorKind::FailedPrecondition);
    }
}
