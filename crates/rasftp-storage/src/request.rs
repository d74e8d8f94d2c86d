//! The random-access storage contract.
//!
//! Every backend implements [`RandomAccess`]: open, read at offset, write at
//! offset, stat, close. Only `open` and `close` take `&mut self`, so the
//! borrow checker enforces that nothing else mutates backend session state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;

/// A read of `size` bytes starting at byte `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    /// Byte offset to read from.
    pub offset: u64,
    /// Number of bytes requested.
    pub size: usize,
}

impl ReadRequest {
    /// Creates a new read request.
    pub fn new(offset: u64, size: usize) -> Self {
        Self { offset, size }
    }
}

/// A write of `data` starting at byte `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    /// Byte offset to write at.
    pub offset: u64,
    /// Bytes to write.
    pub data: Vec<u8>,
}

impl WriteRequest {
    /// Creates a new write request.
    pub fn new(offset: u64, data: impl Into<Vec<u8>>) -> Self {
        Self {
            offset,
            data: data.into(),
        }
    }
}

/// File metadata reported by `stat`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Length of the stored data in bytes.
    pub size: u64,
    /// POSIX permission and type bits, when the backend knows them.
    pub mode: Option<u32>,
    /// Owner user id.
    pub uid: Option<u32>,
    /// Owner group id.
    pub gid: Option<u32>,
    /// Last access time, seconds since the Unix epoch.
    pub atime: Option<u32>,
    /// Last modification time, seconds since the Unix epoch.
    pub mtime: Option<u32>,
}

impl Stat {
    /// Creates a stat carrying only a size.
    pub fn with_size(size: u64) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }
}

/// Byte-addressed storage backend.
///
/// Implementations are driven by [`crate::Storage`], which guarantees at most
/// one in-flight request per operation kind and never overlaps `open`/`close`
/// with anything else. Backends therefore perform no locking of their own.
#[async_trait]
pub trait RandomAccess: Send + Sync {
    /// Prepares the backend for I/O.
    async fn open(&mut self) -> StorageResult<()>;

    /// Reads `req.size` bytes at `req.offset`.
    async fn read(&self, req: ReadRequest) -> StorageResult<Vec<u8>>;

    /// Writes `req.data` at `req.offset`.
    async fn write(&self, req: WriteRequest) -> StorageResult<()>;

    /// Returns metadata for the backing object.
    async fn stat(&self) -> StorageResult<Stat>;

    /// Releases the backend's resources. Closing a backend that was never
    /// opened succeeds.
    async fn close(&mut self) -> StorageResult<()>;
}
