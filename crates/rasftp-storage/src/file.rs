//! Local file backend over `tokio::fs`.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::request::{RandomAccess, ReadRequest, Stat, WriteRequest};

/// A local file addressed through [`RandomAccess`].
///
/// Read-write backends create the file on open. I/O before `open` or after
/// `close` fails with [`StorageError::NotConnected`], the same as a remote
/// backend without a session.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    writable: bool,
    file: AsyncMutex<Option<File>>,
}

impl FileStorage {
    /// Creates a read-write backend for `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writable: true,
            file: AsyncMutex::new(None),
        }
    }

    /// Creates a read-only backend for `path`.
    pub fn read_only(path: impl AsRef<Path>) -> Self {
        Self {
            writable: false,
            ..Self::new(path)
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RandomAccess for FileStorage {
    async fn open(&mut self) -> StorageResult<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(self.writable)
            .create(self.writable)
            .open(&self.path)
            .await?;
        debug!(path = %self.path.display(), writable = self.writable, "opened file");
        *self.file.get_mut() = Some(file);
        Ok(())
    }

    async fn read(&self, req: ReadRequest) -> StorageResult<Vec<u8>> {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(StorageError::NotConnected)?;
        file.seek(SeekFrom::Start(req.offset)).await?;
        let mut buf = vec![0u8; req.size];
        match file.read_exact(&mut buf).await {
            Ok(_) => Ok(buf),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                let len = file.metadata().await?.len();
                Err(StorageError::OutOfRange {
                    offset: req.offset,
                    size: req.size as u64,
                    len,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, req: WriteRequest) -> StorageResult<()> {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(StorageError::NotConnected)?;
        file.seek(SeekFrom::Start(req.offset)).await?;
        file.write_all(&req.data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn stat(&self) -> StorageResult<Stat> {
        let guard = self.file.lock().await;
        let file = guard.as_ref().ok_or(StorageError::NotConnected)?;
        let meta = file.metadata().await?;
        let mut stat = Stat::with_size(meta.len());
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            stat.mode = Some(meta.mode());
            stat.uid = Some(meta.uid());
            stat.gid = Some(meta.gid());
            stat.atime = u32::try_from(meta.atime()).ok();
            stat.mtime = u32::try_from(meta.mtime()).ok();
        }
        Ok(stat)
    }

    async fn close(&mut self) -> StorageResult<()> {
        if let Some(mut file) = self.file.get_mut().take() {
            file.flush().await?;
            debug!(path = %self.path.display(), "closed file");
        }
        Ok(())
    }
}
