#![warn(missing_docs)]

//! Random-access storage over a single remote SFTP file.
//!
//! [`SftpStorage`] drives an [`SshTransport`] through connect, subsystem
//! negotiation and file open, then serves offset reads and writes and stat on
//! the open handle. Session RPCs that hit backpressure are retried through
//! [`retry::call`]. Wrap the adapter in [`rasftp_storage::Storage`] (see
//! [`create_storage`]) to get lazy open and request queueing.

pub mod adapter;
pub mod config;
pub mod error;
pub mod mock;
pub mod protocol;
pub mod retry;

pub use adapter::{create_storage, is_unsupported, Session, SftpStorage};
pub use config::{resolve, AccessMode, ConnectOptions, ConnectionDescriptor, ResolvedConfig, Target};
pub use error::{RemoteError, SftpError, SftpResult, StatusCode, TransportError};
pub use protocol::{
    FileAttributes, Handle, OpenFlags, Readiness, ReadinessSignal, SftpChannel, SshTransport,
    Submission,
};
pub use retry::RetryConfig;
