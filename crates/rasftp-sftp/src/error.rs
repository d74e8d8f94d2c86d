//! Error types for the SFTP adapter.

use rasftp_storage::StorageError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// SFTP v3 status codes carried by remote failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// `SSH_FX_OK`.
    Ok,
    /// `SSH_FX_EOF`.
    Eof,
    /// `SSH_FX_NO_SUCH_FILE`.
    NoSuchFile,
    /// `SSH_FX_PERMISSION_DENIED`.
    PermissionDenied,
    /// `SSH_FX_FAILURE`, also used for unknown codes.
    Failure,
    /// `SSH_FX_BAD_MESSAGE`.
    BadMessage,
    /// `SSH_FX_NO_CONNECTION`.
    NoConnection,
    /// `SSH_FX_CONNECTION_LOST`.
    ConnectionLost,
    /// `SSH_FX_OP_UNSUPPORTED`.
    OpUnsupported,
}

impl StatusCode {
    /// Wire value of the status code.
    pub fn code(self) -> u32 {
        match self {
            StatusCode::Ok => 0,
            StatusCode::Eof => 1,
            StatusCode::NoSuchFile => 2,
            StatusCode::PermissionDenied => 3,
            StatusCode::Failure => 4,
            StatusCode::BadMessage => 5,
            StatusCode::NoConnection => 6,
            StatusCode::ConnectionLost => 7,
            StatusCode::OpUnsupported => 8,
        }
    }

    /// Maps a wire value; unknown values collapse to `Failure`.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => StatusCode::Ok,
            1 => StatusCode::Eof,
            2 => StatusCode::NoSuchFile,
            3 => StatusCode::PermissionDenied,
            5 => StatusCode::BadMessage,
            6 => StatusCode::NoConnection,
            7 => StatusCode::ConnectionLost,
            8 => StatusCode::OpUnsupported,
            _ => StatusCode::Failure,
        }
    }
}

/// A failure reported by the remote SFTP server. Displays as the server's
/// message, unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteError {
    /// Status code of the failure.
    pub code: StatusCode,
    /// The server's message.
    pub message: String,
}

impl RemoteError {
    /// A remote failure with `code` and `message`.
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The completion for an accepted call was dropped before it resolved.
    pub fn connection_lost() -> Self {
        Self::new(StatusCode::ConnectionLost, "Connection lost")
    }
}

/// Errors from the SSH transport underneath the SFTP session.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Nothing accepted the connection.
    #[error("connection refused to {addr}")]
    ConnectionRefused {
        /// `host:port` that was dialled.
        addr: String,
    },

    /// The server rejected the credentials.
    #[error("authentication failed for {user}@{host}")]
    AuthenticationFailed {
        /// Login user.
        user: String,
        /// Server host.
        host: String,
    },

    /// The connection went away.
    #[error("transport closed")]
    Closed,

    /// Socket-level failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from the SFTP adapter.
#[derive(Debug, Error)]
pub enum SftpError {
    /// read/write/stat/close attempted without a live session and handle.
    #[error("Client is not connected.")]
    NotConnected,

    /// The session kept refusing the call under backpressure.
    #[error("Client is busy and could not perform.")]
    Busy,

    /// Connecting or authenticating failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The `sftp` subsystem could not be negotiated.
    #[error(transparent)]
    Subsystem(RemoteError),

    /// A session RPC failed on the server.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The connection target could not be resolved.
    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

/// Result type alias for adapter operations.
pub type SftpResult<T> = std::result::Result<T, SftpError>;

impl From<SftpError> for StorageError {
    fn from(err: SftpError) -> Self {
        match err {
            SftpError::NotConnected => StorageError::NotConnected,
            SftpError::Busy => StorageError::Busy,
            other => StorageError::backend(other),
        }
    }
}
