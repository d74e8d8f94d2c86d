//! Random-access storage over one SFTP session.
//!
//! [`SftpStorage`] owns a transport and, while open, exactly one
//! [`Session`]: the negotiated SFTP channel plus the open file handle. Open
//! runs connect → subsystem → open-file, with only the open-file RPC going
//! through the backpressure retry. Read, write and stat borrow the session
//! immutably; only open and close replace it.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use rasftp_storage::{RandomAccess, ReadRequest, Stat, Storage, StorageResult, WriteRequest};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::{self, AccessMode, ConnectOptions, ConnectionDescriptor, Target};
use crate::error::{RemoteError, SftpError, SftpResult, StatusCode};
use crate::protocol::{FileAttributes, Handle, SftpChannel, SshTransport, Submission};
use crate::retry::{self, RetryConfig};

static UNSUPPORTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:not[\s_-]?|un)supported\b").expect("static pattern compiles")
});

/// Whether `err` says the server does not implement the requested operation.
pub fn is_unsupported(err: &RemoteError) -> bool {
    err.code == StatusCode::OpUnsupported || UNSUPPORTED.is_match(&err.message)
}

/// A negotiated SFTP session and the file handle opened on it.
pub struct Session<C> {
    channel: C,
    handle: Handle,
}

impl<C> Session<C> {
    /// Handle of the open remote file.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

/// SFTP-backed [`RandomAccess`] implementation.
pub struct SftpStorage<T: SshTransport> {
    transport: T,
    descriptor: ConnectionDescriptor,
    mode: AccessMode,
    retry: RetryConfig,
    session: Option<Session<T::Channel>>,
}

impl<T: SshTransport> SftpStorage<T> {
    /// Resolves `target` with `options` and builds a closed adapter.
    pub fn new(transport: T, target: impl Into<Target>, options: &ConnectOptions) -> SftpResult<Self> {
        let resolved = config::resolve(target, options)?;
        debug!(
            host = %resolved.descriptor.host,
            path = %resolved.descriptor.path,
            mode = ?resolved.mode,
            "created sftp storage"
        );
        Ok(Self {
            transport,
            descriptor: resolved.descriptor,
            mode: resolved.mode,
            retry: resolved.retry,
            session: None,
        })
    }

    /// The resolved connection target.
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Access mode the file is opened with.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The live session, if open.
    pub fn session(&self) -> Option<&Session<T::Channel>> {
        self.session.as_ref()
    }

    /// Whether a session and file handle are live.
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn live(&self) -> SftpResult<&Session<T::Channel>> {
        self.session.as_ref().ok_or(SftpError::NotConnected)
    }

    /// Connects, negotiates the subsystem and opens the remote file. A
    /// failure after the connection is up ends the transport again.
    pub async fn open_session(&mut self) -> SftpResult<()> {
        if self.session.is_some() {
            debug!(path = %self.descriptor.path, "session already open");
            return Ok(());
        }

        info!(
            addr = %self.descriptor.address(),
            path = %self.descriptor.path,
            "connecting"
        );
        self.transport.connect(&self.descriptor).await?;

        match self.negotiate().await {
            Ok(session) => {
                self.session = Some(session);
                info!(path = %self.descriptor.path, mode = ?self.mode, "remote file open");
                Ok(())
            }
            Err(e) => {
                warn!(path = %self.descriptor.path, error = %e, "open failed");
                self.transport.end().await;
                Err(e)
            }
        }
    }

    async fn negotiate(&mut self) -> SftpResult<Session<T::Channel>> {
        let channel = self.transport.sftp().await.map_err(SftpError::Subsystem)?;
        let path = self.descriptor.path.as_str();
        let flags = self.mode.open_flags();
        let handle = retry::call(&channel, &self.retry, "open", |c| c.open(path, flags)).await?;
        Ok(Session { channel, handle })
    }

    /// Closes the handle with a single attempt, then ends the transport and
    /// drops the session whatever the close RPC reported.
    pub async fn close_session(&mut self) -> SftpResult<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        let result = match session.channel.close(&session.handle) {
            Submission::Accepted(pending) => pending.await.map_err(SftpError::from),
            Submission::Backpressure => Err(SftpError::Busy),
        };
        if let Err(e) = &result {
            warn!(path = %self.descriptor.path, error = %e, "close rpc failed");
        }

        drop(session);
        self.transport.end().await;
        info!(path = %self.descriptor.path, "session closed");
        result
    }

    /// Reads `size` bytes at `offset`, returning the buffer as the server
    /// handed it back.
    pub async fn read_at(&self, offset: u64, size: usize) -> SftpResult<Vec<u8>> {
        let session = self.live()?;
        let outcome = retry::call(&session.channel, &self.retry, "read", |c| {
            c.read(&session.handle, vec![0u8; size], 0, size, offset)
        })
        .await?;
        debug!(offset, size, bytes_read = outcome.bytes_read, "read");
        Ok(outcome.buffer)
    }

    /// Writes `data` at `offset`.
    pub async fn write_at(&self, offset: u64, data: &[u8]) -> SftpResult<()> {
        let session = self.live()?;
        retry::call(&session.channel, &self.retry, "write", |c| {
            c.write(&session.handle, data, 0, data.len(), offset)
        })
        .await?;
        debug!(offset, size = data.len(), "write");
        Ok(())
    }

    /// Stats by handle, falling back to stat by path when the server does
    /// not support `fstat`.
    pub async fn stat_file(&self) -> SftpResult<FileAttributes> {
        let session = self.live()?;
        let primary = retry::call(&session.channel, &self.retry, "fstat", |c| {
            c.fstat(&session.handle)
        })
        .await;

        match primary {
            Err(SftpError::Remote(e)) if is_unsupported(&e) => {
                debug!(path = %self.descriptor.path, error = %e, "fstat unsupported, using lstat");
                let path = self.descriptor.path.as_str();
                retry::call(&session.channel, &self.retry, "lstat", |c| c.lstat(path)).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl<T: SshTransport> RandomAccess for SftpStorage<T> {
    async fn open(&mut self) -> StorageResult<()> {
        Ok(self.open_session().await?)
    }

    async fn read(&self, req: ReadRequest) -> StorageResult<Vec<u8>> {
        Ok(self.read_at(req.offset, req.size).await?)
    }

    async fn write(&self, req: WriteRequest) -> StorageResult<()> {
        Ok(self.write_at(req.offset, &req.data).await?)
    }

    async fn stat(&self) -> StorageResult<Stat> {
        Ok(self.stat_file().await?.into())
    }

    async fn close(&mut self) -> StorageResult<()> {
        Ok(self.close_session().await?)
    }
}

/// Builds a queued storage over an SFTP file.
pub fn create_storage<T: SshTransport>(
    transport: T,
    target: impl Into<Target>,
    options: &ConnectOptions,
) -> SftpResult<Storage<SftpStorage<T>>> {
    Ok(Storage::new(SftpStorage::new(transport, target, options)?))
}
