//! In-memory SFTP server for testing.
//!
//! [`MockSftpServer`] keeps a file store that outlives sessions, records
//! every RPC submission, and can be programmed to refuse calls under
//! backpressure, fail specific RPCs, refuse connections, or fail subsystem
//! negotiation. Each refusal broadcasts a readiness event, so every caller
//! subscribed at the time resumes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::ConnectionDescriptor;
use crate::error::{RemoteError, StatusCode, TransportError};
use crate::protocol::{
    FileAttributes, Handle, OpenFlags, ReadOutcome, Readiness, ReadinessSignal, SftpChannel,
    SshTransport, Submission,
};

/// File mode reported by the mock for every regular file.
pub const MOCK_FILE_MODE: u32 = 0o100644;

/// Session RPC kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcKind {
    /// `open(path, flags)`.
    Open,
    /// `read(handle, ...)`.
    Read,
    /// `write(handle, ...)`.
    Write,
    /// `fstat(handle)`.
    Fstat,
    /// `lstat(path)`.
    Lstat,
    /// `close(handle)`.
    Close,
}

/// One recorded RPC submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcCall {
    /// Which RPC was submitted.
    pub kind: RpcKind,
    /// Whether the channel accepted the call (false under backpressure).
    pub accepted: bool,
    /// Path argument of `open` and `lstat`.
    pub path: Option<String>,
    /// Flags argument of `open`.
    pub flags: Option<OpenFlags>,
    /// File position of `read` and `write`.
    pub position: Option<u64>,
    /// Byte count of `read` and `write`.
    pub len: Option<usize>,
}

impl RpcCall {
    fn new(kind: RpcKind) -> Self {
        Self {
            kind,
            accepted: false,
            path: None,
            flags: None,
            position: None,
            len: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum BusyPlan {
    Times(u32),
    Always,
}

#[derive(Debug)]
struct OpenFile {
    path: String,
    flags: OpenFlags,
}

#[derive(Default)]
struct ServerState {
    files: HashMap<String, Vec<u8>>,
    handles: HashMap<Handle, OpenFile>,
    next_handle: u64,
    calls: Vec<RpcCall>,
    busy: HashMap<RpcKind, BusyPlan>,
    failures: HashMap<RpcKind, RemoteError>,
    refuse_connections: bool,
    subsystem_error: Option<RemoteError>,
    connects: u32,
    ends: u32,
}

impl ServerState {
    /// Consumes one unit of the backpressure plan for `kind`.
    fn refuse(&mut self, kind: RpcKind) -> bool {
        match self.busy.get_mut(&kind) {
            Some(BusyPlan::Always) => true,
            Some(BusyPlan::Times(n)) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    fn open_file(&self, handle: &Handle) -> Result<&OpenFile, RemoteError> {
        self.handles
            .get(handle)
            .ok_or_else(|| RemoteError::new(StatusCode::Failure, "Invalid handle"))
    }

    fn attributes(&self, path: &str) -> Result<FileAttributes, RemoteError> {
        let data = self
            .files
            .get(path)
            .ok_or_else(|| RemoteError::new(StatusCode::NoSuchFile, "No such file"))?;
        Ok(FileAttributes {
            size: Some(data.len() as u64),
            uid: Some(1000),
            gid: Some(1000),
            permissions: Some(MOCK_FILE_MODE),
            atime: None,
            mtime: None,
        })
    }
}

/// Shared in-memory SFTP server. Clones refer to the same server.
#[derive(Clone, Default)]
pub struct MockSftpServer {
    state: Arc<Mutex<ServerState>>,
    ready: Arc<ReadinessSignal>,
}

impl MockSftpServer {
    /// An empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that connects to this server.
    pub fn transport(&self) -> MockTransport {
        MockTransport {
            server: self.clone(),
            connected: false,
        }
    }

    /// A session on this server without going through a transport.
    pub fn channel(&self) -> MockChannel {
        MockChannel {
            server: self.clone(),
        }
    }

    /// Stores `data` at `path`, replacing any existing file.
    pub fn insert_file(&self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.state.lock().files.insert(path.into(), data.into());
    }

    /// Current contents of the file at `path`.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().files.get(path).cloned()
    }

    /// Refuses the next `times` submissions of `kind`.
    pub fn set_backpressure(&self, kind: RpcKind, times: u32) {
        self.state.lock().busy.insert(kind, BusyPlan::Times(times));
    }

    /// Refuses every submission of `kind`.
    pub fn set_always_busy(&self, kind: RpcKind) {
        self.state.lock().busy.insert(kind, BusyPlan::Always);
    }

    /// Completes every accepted `kind` call with `err`.
    pub fn fail(&self, kind: RpcKind, err: RemoteError) {
        self.state.lock().failures.insert(kind, err);
    }

    /// Stops failing `kind` calls.
    pub fn clear_failure(&self, kind: RpcKind) {
        self.state.lock().failures.remove(&kind);
    }

    /// Makes every later connect fail with `ConnectionRefused`.
    pub fn refuse_connections(&self) {
        self.state.lock().refuse_connections = true;
    }

    /// Makes subsystem negotiation fail with `err`.
    pub fn fail_subsystem(&self, err: RemoteError) {
        self.state.lock().subsystem_error = Some(err);
    }

    /// Every submission so far, in order.
    pub fn calls(&self) -> Vec<RpcCall> {
        self.state.lock().calls.clone()
    }

    /// Number of submissions of `kind`, accepted or not.
    pub fn submissions(&self, kind: RpcKind) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.kind == kind)
            .count()
    }

    /// Number of accepted, and therefore completed, calls of `kind`.
    pub fn completions(&self, kind: RpcKind) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.kind == kind && c.accepted)
            .count()
    }

    /// Total submissions across all kinds.
    pub fn total_submissions(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Number of times a caller waited for a readiness event.
    pub fn suspensions(&self) -> u32 {
        self.ready.waits()
    }

    /// Number of successful connects.
    pub fn connects(&self) -> u32 {
        self.state.lock().connects
    }

    /// Number of times a connected transport was ended.
    pub fn ends(&self) -> u32 {
        self.state.lock().ends
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.state.lock().handles.len()
    }

    fn submit<T>(
        &self,
        mut call: RpcCall,
        op: impl FnOnce(&mut ServerState) -> Result<T, RemoteError>,
    ) -> Submission<T> {
        let mut state = self.state.lock();
        if state.refuse(call.kind) {
            state.calls.push(call);
            drop(state);
            self.ready.notify();
            return Submission::Backpressure;
        }

        call.accepted = true;
        let kind = call.kind;
        state.calls.push(call);
        let failure = state.failures.get(&kind).cloned();
        let result = match failure {
            Some(err) => Err(err),
            None => op(&mut *state),
        };
        Submission::ready(result)
    }
}

/// Transport half of the mock. Connecting is immediate.
pub struct MockTransport {
    server: MockSftpServer,
    connected: bool,
}

impl MockTransport {
    /// The server this transport connects to.
    pub fn server(&self) -> &MockSftpServer {
        &self.server
    }
}

#[async_trait]
impl SshTransport for MockTransport {
    type Channel = MockChannel;

    async fn connect(&mut self, descriptor: &ConnectionDescriptor) -> Result<(), TransportError> {
        let mut state = self.server.state.lock();
        if state.refuse_connections {
            return Err(TransportError::ConnectionRefused {
                addr: descriptor.address(),
            });
        }
        state.connects += 1;
        self.connected = true;
        debug!(addr = %descriptor.address(), "mock transport ready");
        Ok(())
    }

    async fn sftp(&mut self) -> Result<MockChannel, RemoteError> {
        if !self.connected {
            return Err(RemoteError::new(StatusCode::NoConnection, "Not connected"));
        }
        if let Some(err) = self.server.state.lock().subsystem_error.clone() {
            return Err(err);
        }
        Ok(self.server.channel())
    }

    async fn end(&mut self) {
        if self.connected {
            self.connected = false;
            self.server.state.lock().ends += 1;
        }
    }
}

/// Session half of the mock.
pub struct MockChannel {
    server: MockSftpServer,
}

fn invalid_range() -> RemoteError {
    RemoteError::new(StatusCode::Failure, "Invalid offset or length")
}

impl SftpChannel for MockChannel {
    fn open(&self, path: &str, flags: OpenFlags) -> Submission<Handle> {
        let mut call = RpcCall::new(RpcKind::Open);
        call.path = Some(path.to_string());
        call.flags = Some(flags);
        self.server.submit(call, |state| {
            if !state.files.contains_key(path) {
                if !flags.contains(OpenFlags::CREATE) {
                    return Err(RemoteError::new(StatusCode::NoSuchFile, "No such file"));
                }
                state.files.insert(path.to_string(), Vec::new());
            }
            if flags.contains(OpenFlags::TRUNCATE) {
                if let Some(data) = state.files.get_mut(path) {
                    data.clear();
                }
            }
            state.next_handle += 1;
            let handle = Handle::new(state.next_handle.to_be_bytes().to_vec());
            state.handles.insert(
                handle.clone(),
                OpenFile {
                    path: path.to_string(),
                    flags,
                },
            );
            Ok(handle)
        })
    }

    fn read(
        &self,
        handle: &Handle,
        mut buffer: Vec<u8>,
        buf_offset: usize,
        len: usize,
        position: u64,
    ) -> Submission<ReadOutcome> {
        let mut call = RpcCall::new(RpcKind::Read);
        call.position = Some(position);
        call.len = Some(len);
        self.server.submit(call, |state| {
            let path = state.open_file(handle)?.path.clone();
            let data = state.files.get(&path).map(Vec::as_slice).unwrap_or(&[]);
            let fits = buf_offset
                .checked_add(len)
                .is_some_and(|end| end <= buffer.len());
            if !fits {
                return Err(invalid_range());
            }
            if len == 0 {
                buffer.truncate(buf_offset);
                return Ok(ReadOutcome {
                    bytes_read: 0,
                    buffer,
                });
            }
            let start = match usize::try_from(position) {
                Ok(start) if start < data.len() => start,
                _ => return Err(RemoteError::new(StatusCode::Eof, "End of file")),
            };
            let n = len.min(data.len() - start);
            buffer[buf_offset..buf_offset + n].copy_from_slice(&data[start..start + n]);
            buffer.truncate(buf_offset + n);
            Ok(ReadOutcome {
                bytes_read: n,
                buffer,
            })
        })
    }

    fn write(
        &self,
        handle: &Handle,
        data: &[u8],
        buf_offset: usize,
        len: usize,
        position: u64,
    ) -> Submission<()> {
        let mut call = RpcCall::new(RpcKind::Write);
        call.position = Some(position);
        call.len = Some(len);
        self.server.submit(call, |state| {
            let open = state.open_file(handle)?;
            if !open.flags.contains(OpenFlags::WRITE) {
                return Err(RemoteError::new(
                    StatusCode::PermissionDenied,
                    "Permission denied",
                ));
            }
            let path = open.path.clone();
            let src = buf_offset
                .checked_add(len)
                .and_then(|src_end| data.get(buf_offset..src_end))
                .ok_or_else(invalid_range)?;
            let start = usize::try_from(position).map_err(|_| invalid_range())?;
            let end = start.checked_add(len).ok_or_else(invalid_range)?;
            let file = state.files.entry(path).or_default();
            if file.len() < end {
                let grow = end - file.len();
                file.try_reserve(grow).map_err(|_| invalid_range())?;
                file.resize(end, 0);
            }
            file[start..end].copy_from_slice(src);
            Ok(())
        })
    }

    fn fstat(&self, handle: &Handle) -> Submission<FileAttributes> {
        self.server.submit(RpcCall::new(RpcKind::Fstat), |state| {
            let path = state.open_file(handle)?.path.clone();
            state.attributes(&path)
        })
    }

    fn lstat(&self, path: &str) -> Submission<FileAttributes> {
        let mut call = RpcCall::new(RpcKind::Lstat);
        call.path = Some(path.to_string());
        self.server.submit(call, |state| state.attributes(path))
    }

    fn close(&self, handle: &Handle) -> Submission<()> {
        self.server.submit(RpcCall::new(RpcKind::Close), |state| {
            state
                .handles
                .remove(handle)
                .map(|_| ())
                .ok_or_else(|| RemoteError::new(StatusCode::Failure, "Invalid handle"))
        })
    }

    fn readiness(&self) -> Readiness {
        self.server.ready.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn accepted<T>(submission: Submission<T>) -> Result<T, RemoteError> {
        match submission {
            Submission::Accepted(pending) => pending.await,
            Submission::Backpressure => panic!("unexpected backpressure"),
        }
    }

    #[tokio::test]
    async fn test_open_create_and_write_read() {
        let server = MockSftpServer::new();
        let channel = server.channel();
        let flags = OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE;
        let handle = accepted(channel.open("/f", flags)).await.unwrap();

        accepted(channel.write(&handle, b"xxhello", 2, 5, 3)).await.unwrap();
        assert_eq!(server.file("/f").unwrap(), b"\0\0\0hello");

        let out = accepted(channel.read(&handle, vec![0; 5], 0, 5, 3))
            .await
            .unwrap();
        assert_eq!(out.bytes_read, 5);
        assert_eq!(out.buffer, b"hello");
    }

    #[tokio::test]
    async fn test_open_missing_read_only_fails() {
        let server = MockSftpServer::new();
        let err = accepted(server.channel().open("/nope", OpenFlags::READ))
            .await
            .unwrap_err();
        assert_eq!(err.code, StatusCode::NoSuchFile);
    }

    #[tokio::test]
    async fn test_short_read_truncates_buffer() {
        let server = MockSftpServer::new();
        server.insert_file("/f", vec![1, 2, 3]);
        let channel = server.channel();
        let handle = accepted(channel.open("/f", OpenFlags::READ)).await.unwrap();

        let out = accepted(channel.read(&handle, vec![0; 8], 0, 8, 1))
            .await
            .unwrap();
        assert_eq!(out.bytes_read, 2);
        assert_eq!(out.buffer, vec![2, 3]);

        let err = accepted(channel.read(&handle, vec![0; 8], 0, 8, 3))
            .await
            .unwrap_err();
        assert_eq!(err.code, StatusCode::Eof);
    }

    #[tokio::test]
    async fn test_write_on_read_only_handle_denied() {
        let server = MockSftpServer::new();
        server.insert_file("/f", Vec::new());
        let channel = server.channel();
        let handle = accepted(channel.open("/f", OpenFlags::READ)).await.unwrap();
        let err = accepted(channel.write(&handle, b"x", 0, 1, 0))
            .await
            .unwrap_err();
        assert_eq!(err.code, StatusCode::PermissionDenied);
    }

    #[tokio::test]
    async fn test_backpressure_is_recorded() {
        let server = MockSftpServer::new();
        server.set_backpressure(RpcKind::Lstat, 1);
        let channel = server.channel();
        assert!(!channel.lstat("/f").is_accepted());
        assert!(channel.lstat("/f").is_accepted());

        let calls = server.calls();
        assert_eq!(calls.len(), 2);
        assert!(!calls[0].accepted);
        assert!(calls[1].accepted);
        assert_eq!(calls[1].path.as_deref(), Some("/f"));
    }

    #[tokio::test]
    async fn test_refusals_before_waiting_wake_every_subscriber() {
        let server = MockSftpServer::new();
        server.insert_file("/f", vec![0; 4]);
        let channel = server.channel();
        let handle = accepted(channel.open("/f", OpenFlags::READ)).await.unwrap();
        server.set_backpressure(RpcKind::Lstat, 1);
        server.set_backpressure(RpcKind::Read, 1);

        let mut stat_waiter = channel.readiness();
        let mut read_waiter = channel.readiness();
        assert!(!channel.lstat("/f").is_accepted());
        assert!(!channel.read(&handle, vec![0; 4], 0, 4, 0).is_accepted());

        let wait = Duration::from_millis(200);
        assert!(timeout(wait, stat_waiter.continued()).await.is_ok());
        assert!(timeout(wait, read_waiter.continued()).await.is_ok());
        assert_eq!(server.suspensions(), 2);
    }

    #[tokio::test]
    async fn test_write_at_unaddressable_position_fails() {
        let server = MockSftpServer::new();
        let channel = server.channel();
        let flags = OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE;
        let handle = accepted(channel.open("/f", flags)).await.unwrap();

        let err = accepted(channel.write(&handle, b"x", 0, 1, u64::MAX))
            .await
            .unwrap_err();
        assert_eq!(err.code, StatusCode::Failure);

        let err = accepted(channel.write(&handle, b"x", 1, 4, 0))
            .await
            .unwrap_err();
        assert_eq!(err.code, StatusCode::Failure);
        assert_eq!(server.file("/f").unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn test_read_into_short_buffer_fails() {
        let server = MockSftpServer::new();
        server.insert_file("/f", vec![1, 2, 3]);
        let channel = server.channel();
        let handle = accepted(channel.open("/f", OpenFlags::READ)).await.unwrap();

        let err = accepted(channel.read(&handle, vec![0; 2], 0, 3, 0))
            .await
            .unwrap_err();
        assert_eq!(err.code, StatusCode::Failure);

        let err = accepted(channel.read(&handle, vec![0; 3], 0, 3, u64::MAX))
            .await
            .unwrap_err();
        assert_eq!(err.code, StatusCode::Eof);
    }

    #[tokio::test]
    async fn test_close_removes_handle() {
        let server = MockSftpServer::new();
        server.insert_file("/f", Vec::new());
        let channel = server.channel();
        let handle = accepted(channel.open("/f", OpenFlags::READ)).await.unwrap();
        assert_eq!(server.open_handles(), 1);
        accepted(channel.close(&handle)).await.unwrap();
        assert_eq!(server.open_handles(), 0);
        assert!(accepted(channel.close(&handle)).await.is_err());
    }

    #[tokio::test]
    async fn test_transport_lifecycle() {
        let server = MockSftpServer::new();
        let mut transport = server.transport();
        assert!(transport.sftp().await.is_err());

        transport
            .connect(&ConnectionDescriptor::new("h", "/f"))
            .await
            .unwrap();
        assert!(transport.sftp().await.is_ok());
        transport.end().await;
        transport.end().await;
        assert_eq!(server.connects(), 1);
        assert_eq!(server.ends(), 1);
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let server = MockSftpServer::new();
        server.refuse_connections();
        let err = server
            .transport()
            .connect(&ConnectionDescriptor::new("h", "/f"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionRefused { .. }));
    }
}
