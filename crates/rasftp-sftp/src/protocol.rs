//! Collaborator interfaces for the SSH transport and the SFTP session.
//!
//! The session API mirrors a callback-style SFTP client: each RPC method
//! returns immediately with a [`Submission`]. `Accepted` carries a
//! [`Pending`] future that resolves with the RPC's completion;
//! `Backpressure` means the channel refused the call and the caller must wait
//! for the next readiness ("continue") event before trying again.
//!
//! Readiness is broadcast through a [`ReadinessSignal`]. A caller takes a
//! [`Readiness`] subscription before submitting, so an event fired between
//! the refusal and the wait still wakes it, and every subscriber sees every
//! event.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bitflags::bitflags;
use rasftp_storage::Stat;
use tokio::sync::{oneshot, watch};

use crate::config::ConnectionDescriptor;
use crate::error::{RemoteError, TransportError};

bitflags! {
    /// SFTP v3 `pflags` for the open RPC.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        /// Open for reading.
        const READ = 0x0000_0001;
        /// Open for writing.
        const WRITE = 0x0000_0002;
        /// Force writes to the end of the file.
        const APPEND = 0x0000_0004;
        /// Create the file if it does not exist.
        const CREATE = 0x0000_0008;
        /// Truncate an existing file to zero length.
        const TRUNCATE = 0x0000_0010;
        /// Fail if the file already exists (with `CREATE`).
        const EXCLUDE = 0x0000_0020;
    }
}

/// Opaque remote file handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle(Vec<u8>);

impl Handle {
    /// Wraps the handle bytes returned by the open RPC.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw handle bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Attributes returned by `fstat` / `lstat`. Every field is optional on the
/// wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    /// File size in bytes.
    pub size: Option<u64>,
    /// Owner user id.
    pub uid: Option<u32>,
    /// Owner group id.
    pub gid: Option<u32>,
    /// POSIX permission and type bits.
    pub permissions: Option<u32>,
    /// Last access time, seconds since the Unix epoch.
    pub atime: Option<u32>,
    /// Last modification time, seconds since the Unix epoch.
    pub mtime: Option<u32>,
}

impl From<FileAttributes> for Stat {
    fn from(attrs: FileAttributes) -> Self {
        Stat {
            size: attrs.size.unwrap_or(0),
            mode: attrs.permissions,
            uid: attrs.uid,
            gid: attrs.gid,
            atime: attrs.atime,
            mtime: attrs.mtime,
        }
    }
}

/// Completion of a read RPC: the buffer as the server handed it back and the
/// number of bytes it filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Bytes the server filled.
    pub bytes_read: usize,
    /// The read buffer, possibly shortened on a short read.
    pub buffer: Vec<u8>,
}

/// Future resolving with the completion of an accepted RPC.
#[must_use = "an accepted RPC completes through its Pending future"]
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T, RemoteError>>,
}

/// Sending half paired with a [`Pending`].
pub struct Completer<T> {
    tx: oneshot::Sender<Result<T, RemoteError>>,
}

/// Creates a linked completer / pending pair.
pub fn pending<T>() -> (Completer<T>, Pending<T>) {
    let (tx, rx) = oneshot::channel();
    (Completer { tx }, Pending { rx })
}

impl<T> Completer<T> {
    /// Delivers the RPC's completion. A dropped `Pending` is ignored.
    pub fn complete(self, result: Result<T, RemoteError>) {
        let _ = self.tx.send(result);
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T, RemoteError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RemoteError::connection_lost())),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Acceptance signal of a session RPC method.
#[must_use]
pub enum Submission<T> {
    /// The call was taken; its completion arrives through the future.
    Accepted(Pending<T>),
    /// The channel applied backpressure; nothing was sent.
    Backpressure,
}

impl<T> Submission<T> {
    /// An accepted call whose completion is already known.
    pub fn ready(result: Result<T, RemoteError>) -> Self {
        let (completer, pending) = pending();
        completer.complete(result);
        Submission::Accepted(pending)
    }

    /// Whether the channel took the call.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Submission::Accepted(_))
    }
}

/// Broadcasting side of a session's readiness ("continue") events.
///
/// Each [`notify`](Self::notify) bumps a generation counter that every
/// [`Readiness`] subscription observes.
pub struct ReadinessSignal {
    tx: watch::Sender<u64>,
    waits: Arc<AtomicU32>,
}

impl ReadinessSignal {
    /// Creates a signal with no subscribers.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            tx,
            waits: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Wakes every current subscriber.
    pub fn notify(&self) {
        self.tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Subscribes to events fired from now on.
    pub fn subscribe(&self) -> Readiness {
        Readiness {
            rx: self.tx.subscribe(),
            waits: Arc::clone(&self.waits),
        }
    }

    /// Number of times a subscriber has waited for an event.
    pub fn waits(&self) -> u32 {
        self.waits.load(Ordering::SeqCst)
    }
}

impl Default for ReadinessSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscription to a session's readiness events.
pub struct Readiness {
    rx: watch::Receiver<u64>,
    waits: Arc<AtomicU32>,
}

impl Readiness {
    /// Resolves at the first event not yet seen by this subscription,
    /// immediately if one already fired. Resolves at once when the signal is
    /// gone.
    pub async fn continued(&mut self) {
        self.waits.fetch_add(1, Ordering::SeqCst);
        let _ = self.rx.changed().await;
    }
}

/// A negotiated SFTP session.
pub trait SftpChannel: Send + Sync {
    /// Opens `path` with `flags`.
    fn open(&self, path: &str, flags: OpenFlags) -> Submission<Handle>;

    /// Reads up to `len` bytes at file `position` into `buffer[buf_offset..]`.
    fn read(
        &self,
        handle: &Handle,
        buffer: Vec<u8>,
        buf_offset: usize,
        len: usize,
        position: u64,
    ) -> Submission<ReadOutcome>;

    /// Writes `data[buf_offset..buf_offset + len]` at file `position`.
    fn write(
        &self,
        handle: &Handle,
        data: &[u8],
        buf_offset: usize,
        len: usize,
        position: u64,
    ) -> Submission<()>;

    /// Stats the open file by handle.
    fn fstat(&self, handle: &Handle) -> Submission<FileAttributes>;

    /// Stats `path` without following a final symlink.
    fn lstat(&self, path: &str) -> Submission<FileAttributes>;

    /// Closes the handle.
    fn close(&self, handle: &Handle) -> Submission<()>;

    /// Subscribes to the session's readiness ("continue") events.
    fn readiness(&self) -> Readiness;
}

/// SSH client able to carry one SFTP session.
#[async_trait]
pub trait SshTransport: Send + Sync + 'static {
    /// Session type produced by [`sftp`](Self::sftp).
    type Channel: SftpChannel + 'static;

    /// Connects and authenticates; resolves once the transport is ready.
    async fn connect(&mut self, descriptor: &ConnectionDescriptor) -> Result<(), TransportError>;

    /// Negotiates the `sftp` subsystem on the ready connection.
    async fn sftp(&mut self) -> Result<Self::Channel, RemoteError>;

    /// Tears the connection down. Safe to call when not connected.
    async fn end(&mut self);
}
