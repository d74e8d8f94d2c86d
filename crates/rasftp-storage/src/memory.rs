//! In-memory storage backend.

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::request::{RandomAccess, ReadRequest, Stat, WriteRequest};

/// Growable byte buffer implementing [`RandomAccess`].
///
/// Writes past the current end zero-fill the gap. Reads past the end fail
/// with [`StorageError::OutOfRange`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: AsyncMutex<Vec<u8>>,
}

impl MemoryStorage {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend preloaded with `bytes`.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            data: AsyncMutex::new(bytes.into()),
        }
    }

    /// Returns a copy of the stored bytes.
    pub async fn contents(&self) -> Vec<u8> {
        self.data.lock().await.clone()
    }
}

#[async_trait]
impl RandomAccess for MemoryStorage {
    async fn open(&mut self) -> StorageResult<()> {
        Ok(())
    }

    async fn read(&self, req: ReadRequest) -> StorageResult<Vec<u8>> {
        let data = self.data.lock().await;
        let len = data.len() as u64;
        let end = req.offset.saturating_add(req.size as u64);
        if end > len {
            return Err(StorageError::OutOfRange {
                offset: req.offset,
                size: req.size as u64,
                len,
            });
        }
        debug!(offset = req.offset, size = req.size, "memory read");
        Ok(data[req.offset as usize..end as usize].to_vec())
    }

    async fn write(&self, req: WriteRequest) -> StorageResult<()> {
        let mut data = self.data.lock().await;
        let out_of_range = |len: usize| StorageError::OutOfRange {
            offset: req.offset,
            size: req.data.len() as u64,
            len: len as u64,
        };
        let start = usize::try_from(req.offset).map_err(|_| out_of_range(data.len()))?;
        let end = start
            .checked_add(req.data.len())
            .ok_or_else(|| out_of_range(data.len()))?;
        if data.len() < end {
            let len = data.len();
            data.try_reserve(end - len).map_err(|_| out_of_range(len))?;
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(&req.data);
        debug!(offset = req.offset, size = req.data.len(), "memory write");
        Ok(())
    }

    async fn stat(&self) -> StorageResult<Stat> {
        Ok(Stat::with_size(self.data.lock().await.len() as u64))
    }

    async fn close(&mut self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_read() {
        let mem = MemoryStorage::new();
        mem.write(WriteRequest::new(0, b"hello".to_vec())).await.unwrap();
        let out = mem.read(ReadRequest::new(1, 3)).await.unwrap();
        assert_eq!(out, b"ell");
    }

    #[tokio::test]
    async fn test_write_past_end_zero_fills() {
        let mem = MemoryStorage::new();
        mem.write(WriteRequest::new(4, vec![9, 9])).await.unwrap();
        assert_eq!(mem.contents().await, vec![0, 0, 0, 0, 9, 9]);
        assert_eq!(mem.stat().await.unwrap().size, 6);
    }

    #[tokio::test]
    async fn test_read_past_end_is_out_of_range() {
        let mem = MemoryStorage::from_bytes(vec![1, 2, 3]);
        let err = mem.read(ReadRequest::new(2, 4)).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::OutOfRange {
                offset: 2,
                size: 4,
                len: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_write_at_unaddressable_offset_is_out_of_range() {
        let mem = MemoryStorage::from_bytes(vec![1, 2]);
        let err = mem.write(WriteRequest::new(u64::MAX, vec![1])).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::OutOfRange {
                offset: u64::MAX,
                size: 1,
                len: 2
            }
        ));

        let err = mem
            .write(WriteRequest::new(u64::MAX - 1, vec![0; 8]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::OutOfRange { len: 2, .. }));
        assert_eq!(mem.contents().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_overwrite_in_place() {
        let mem = MemoryStorage::from_bytes(b"abcdef".to_vec());
        mem.write(WriteRequest::new(2, b"XY".to_vec())).await.unwrap();
        assert_eq!(mem.contents().await, b"abXYef");
    }
}
