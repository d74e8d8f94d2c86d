//! Error types for the storage subsystem.

use thiserror::Error;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error variants surfaced by every storage backend.
///
/// Remote backends map their own failures onto these so callers see the same
/// error shapes whether the bytes live in memory, on disk, or behind SFTP.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend has no live session or handle.
    #[error("Client is not connected.")]
    NotConnected,

    /// The backend refused the request under backpressure until its retry
    /// budget ran out.
    #[error("Client is busy and could not perform.")]
    Busy,

    /// The storage was closed and has not been reopened.
    #[error("Storage is closed")]
    Closed,

    /// A request reached outside the addressable range of the stored data.
    #[error("Out of range: {size} bytes at offset {offset} with length {len}")]
    OutOfRange {
        /// Requested offset.
        offset: u64,
        /// Requested size in bytes.
        size: u64,
        /// Current length of the stored data.
        len: u64,
    },

    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific failure, carried verbatim.
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl StorageError {
    /// Wraps a backend-specific error without altering its message.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StorageError::Backend(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("Permission denied")]
    struct Denied;

    #[test]
    fn test_storage_result_alias() {
        let ok: StorageResult<i32> = Ok(42);
        assert!(ok.is_ok());

        let err: StorageResult<i32> = Err(StorageError::Closed);
        assert!(err.is_err());
    }

    #[test]
    fn test_fixed_messages() {
        assert_eq!(
            StorageError::NotConnected.to_string(),
            "Client is not connected."
        );
        assert_eq!(
            StorageError::Busy.to_string(),
            "Client is busy and could not perform."
        );
    }

    #[test]
    fn test_out_of_range() {
        let err = StorageError::OutOfRange {
            offset: 10,
            size: 5,
            len: 12,
        };
        assert_eq!(
            err.to_string(),
            "Out of range: 5 bytes at offset 10 with length 12"
        );
    }

    #[test]
    fn test_backend_is_transparent() {
        let err = StorageError::backend(Denied);
        assert_eq!(err.to_string(), "Permission denied");
    }

    #[test]
    fn test_io_error_from_std() {
        let std_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: StorageError = std_err.into();
        assert!(matches!(err, StorageError::Io(_)));
    }
}
