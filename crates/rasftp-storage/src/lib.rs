#![warn(missing_docs)]

//! rasftp storage subsystem: random-access storage contract and request front
//!
//! This crate defines the uniform byte-addressed storage interface
//! ([`RandomAccess`]) shared by every backend, the [`Storage`] front that
//! queues caller requests per operation kind, and two local backends
//! (in-memory and file) that behave identically to remote ones.

pub mod error;
pub mod file;
pub mod memory;
pub mod request;
pub mod storage;

pub use error::{StorageError, StorageResult};
pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use request::{RandomAccess, ReadRequest, Stat, WriteRequest};
pub use storage::Storage;
