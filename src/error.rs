//! Error taxonomy for the transfer engine

use std::io;
use thiserror::Error;

use crate::protocol::reason;

/// Why the receiver refused an entry during preflight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionKind {
    /// Destination exists and the overwrite policy is `No`
    Exists,
    /// Destination exists and the user answered "no" to the prompt
    Declined,
    /// Not enough free space (with the 10% margin)
    NoSpace,
    /// Creating or replacing the destination was not permitted
    Permission,
    /// Any other local failure while preparing the destination
    Io,
}

impl AdmissionKind {
    /// Classify a PreflightFail reason received from the peer.
    pub fn from_reason(text: &str) -> Self {
        if text.starts_with(reason::NO_SPACE) {
            AdmissionKind::NoSpace
        } else if text == reason::EXISTS {
            AdmissionKind::Exists
        } else if text == reason::DECLINED || text == reason::DECLINED_DIR {
            AdmissionKind::Declined
        } else if text.contains("ermission denied") {
            AdmissionKind::Permission
        } else {
            AdmissionKind::Io
        }
    }

    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => AdmissionKind::Permission,
            _ => AdmissionKind::Io,
        }
    }
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unexpected EOF: {0}")]
    UnexpectedEof(String),

    #[error("transfer rejected: {reason}")]
    Rejected { reason: String, kind: AdmissionKind },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("source {path} changed size during transfer: declared {declared} bytes, read {actual}")]
    SourceChanged {
        path: String,
        declared: u64,
        actual: u64,
    },

    #[error("{context}: {source}")]
    Connection {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("receiver reported failure for {name} after {received} bytes")]
    RemoteFailure { name: String, received: u64 },

    #[error("all {attempts} attempts failed, last error: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<TransferError>,
    },

    #[error("interrupted")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TransferError>;

impl TransferError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        TransferError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn connection(context: impl Into<String>, source: io::Error) -> Self {
        TransferError::Connection {
            context: context.into(),
            source,
        }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        TransferError::Protocol(msg.into())
    }

    /// Socket-level read failure: EOF becomes a protocol-level truncation,
    /// everything else is a connection failure.
    pub fn from_stream_read(context: &str, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            TransferError::UnexpectedEof(context.to_string())
        } else {
            TransferError::connection(context, err)
        }
    }

    /// Only connection-level failures are worth a fresh attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Connection { .. })
    }

    /// Process exit status for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            TransferError::Protocol(_)
            | TransferError::UnexpectedEof(_)
            | TransferError::RemoteFailure { .. } => 2,
            TransferError::Io { source, .. } => {
                if source.kind() == io::ErrorKind::PermissionDenied {
                    4
                } else {
                    3
                }
            }
            TransferError::SourceChanged { .. } => 3,
            TransferError::Rejected { kind, .. } => match kind {
                AdmissionKind::NoSpace => 6,
                AdmissionKind::Permission => 4,
                AdmissionKind::Io => 3,
                AdmissionKind::Exists | AdmissionKind::Declined => 1,
            },
            TransferError::Connection { .. } | TransferError::Config(_) => 1,
            TransferError::RetriesExhausted { .. } => 11,
            TransferError::Cancelled => 130,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_classification() {
        assert_eq!(
            AdmissionKind::from_reason("Insufficient disk space. Need: 1.0 KB, Available: 12 B"),
            AdmissionKind::NoSpace
        );
        assert_eq!(AdmissionKind::from_reason(reason::EXISTS), AdmissionKind::Exists);
        assert_eq!(AdmissionKind::from_reason(reason::DECLINED), AdmissionKind::Declined);
        assert_eq!(
            AdmissionKind::from_reason(reason::DECLINED_DIR),
            AdmissionKind::Declined
        );
        assert_eq!(
            AdmissionKind::from_reason("Failed to create directory /x: Permission denied (os error 13)"),
            AdmissionKind::Permission
        );
        assert_eq!(AdmissionKind::from_reason("something else"), AdmissionKind::Io);
    }

    #[test]
    fn test_exit_codes_are_distinct_per_category() {
        let protocol = TransferError::protocol("bad type");
        let io = TransferError::io("write", io::Error::new(io::ErrorKind::Other, "disk"));
        let perm = TransferError::io(
            "open",
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
        );
        let space = TransferError::Rejected {
            reason: "Insufficient disk space".into(),
            kind: AdmissionKind::NoSpace,
        };
        let general = TransferError::connection(
            "connect",
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        );

        assert_eq!(protocol.exit_code(), 2);
        assert_eq!(io.exit_code(), 3);
        assert_eq!(perm.exit_code(), 4);
        assert_eq!(space.exit_code(), 6);
        assert_eq!(general.exit_code(), 1);
        assert_eq!(TransferError::Cancelled.exit_code(), 130);
    }

    #[test]
    fn test_only_connection_errors_retry() {
        let conn = TransferError::connection(
            "connect",
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert!(conn.is_retryable());
        assert!(!TransferError::protocol("x").is_retryable());
        assert!(!TransferError::UnexpectedEof("x".into()).is_retryable());
        assert!(!TransferError::Cancelled.is_retryable());
    }

    #[test]
    fn test_stream_read_eof_is_protocol_level() {
        let err = TransferError::from_stream_read(
            "reading frame",
            io::Error::new(io::ErrorKind::UnexpectedEof, "eof"),
        );
        assert!(matches!(err, TransferError::UnexpectedEof(_)));
        let err = TransferError::from_stream_read(
            "reading frame",
            io::Error::new(io::ErrorKind::ConnectionReset, "reset"),
        );
        assert!(err.is_retryable());
    }
}
