//! Request front for [`RandomAccess`] backends.
//!
//! [`Storage`] turns a backend into a request API that is safe to share:
//! - the backend is opened lazily by the first read, write or stat;
//! - at most one request per operation kind is in flight at a time;
//! - `open` and `close` run exclusively, never overlapping I/O;
//! - once closed, I/O fails with [`StorageError::Closed`] until `open` is
//!   called again.

use tokio::sync::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, trace};

use crate::error::{StorageError, StorageResult};
use crate::request::{RandomAccess, ReadRequest, Stat, WriteRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    /// Never opened.
    Idle,
    Open,
    Closed,
}

struct Inner<B> {
    backend: B,
    state: Lifecycle,
}

/// Queueing front over a [`RandomAccess`] backend.
pub struct Storage<B> {
    inner: RwLock<Inner<B>>,
    read_queue: Mutex<()>,
    write_queue: Mutex<()>,
    stat_queue: Mutex<()>,
}

impl<B: RandomAccess> Storage<B> {
    /// Wraps `backend`. Nothing is opened until the first request.
    pub fn new(backend: B) -> Self {
        Self {
            inner: RwLock::new(Inner {
                backend,
                state: Lifecycle::Idle,
            }),
            read_queue: Mutex::new(()),
            write_queue: Mutex::new(()),
            stat_queue: Mutex::new(()),
        }
    }

    /// Opens the backend. Opening an open storage is a no-op; opening a
    /// closed storage reopens it.
    pub async fn open(&self) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        if inner.state == Lifecycle::Open {
            return Ok(());
        }
        inner.backend.open().await?;
        inner.state = Lifecycle::Open;
        debug!("storage opened");
        Ok(())
    }

    /// Reads `size` bytes at `offset`.
    pub async fn read(&self, offset: u64, size: usize) -> StorageResult<Vec<u8>> {
        let _queued = self.read_queue.lock().await;
        let inner = self.ready().await?;
        trace!(offset, size, "read");
        if size == 0 {
            return Ok(Vec::new());
        }
        inner.backend.read(ReadRequest::new(offset, size)).await
    }

    /// Writes `data` at `offset`.
    pub async fn write(&self, offset: u64, data: impl Into<Vec<u8>>) -> StorageResult<()> {
        let data = data.into();
        let _queued = self.write_queue.lock().await;
        let inner = self.ready().await?;
        trace!(offset, size = data.len(), "write");
        if data.is_empty() {
            return Ok(());
        }
        inner.backend.write(WriteRequest::new(offset, data)).await
    }

    /// Returns metadata for the backing object.
    pub async fn stat(&self) -> StorageResult<Stat> {
        let _queued = self.stat_queue.lock().await;
        let inner = self.ready().await?;
        trace!("stat");
        inner.backend.stat().await
    }

    /// Closes the backend. Closing a storage that is not open only marks it
    /// closed. The storage counts as closed even when the backend reports an
    /// error.
    pub async fn close(&self) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        let was_open = inner.state == Lifecycle::Open;
        inner.state = Lifecycle::Closed;
        if was_open {
            inner.backend.close().await?;
            debug!("storage closed");
        }
        Ok(())
    }

    /// Whether the backend is currently open.
    pub async fn is_open(&self) -> bool {
        self.inner.read().await.state == Lifecycle::Open
    }

    /// Whether `close` has been called since the last successful open.
    pub async fn is_closed(&self) -> bool {
        self.inner.read().await.state == Lifecycle::Closed
    }

    /// Consumes the front, returning the backend.
    pub fn into_backend(self) -> B {
        self.inner.into_inner().backend
    }

    /// Returns a read guard on an open backend, opening it first if this
    /// storage has never been opened.
    async fn ready(&self) -> StorageResult<RwLockReadGuard<'_, Inner<B>>> {
        {
            let inner = self.inner.read().await;
            let state = inner.state;
            match state {
                Lifecycle::Open => return Ok(inner),
                Lifecycle::Closed => return Err(StorageError::Closed),
                Lifecycle::Idle => {}
            }
        }

        let mut inner = self.inner.write().await;
        let state = inner.state;
        match state {
            Lifecycle::Closed => return Err(StorageError::Closed),
            Lifecycle::Idle => {
                inner.backend.open().await?;
                inner.state = Lifecycle::Open;
                debug!("storage opened on first request");
            }
            Lifecycle::Open => {}
        }
        Ok(inner.downgrade())
    }
}
