//! Backing storage for cached files.
//!
//! The cache never touches the filesystem directly. Everything it needs
//! from the outside world goes through the [`Storage`] trait:
//! - [`Storage::open_or_create`]: obtain a handle, creating a zero-filled file if absent
//! - [`Storage::read_full`]: fill a buffer with exactly its length in bytes
//! - [`Storage::write_full`]: write a buffer back at offset 0
//! - [`Storage::close`]: release the handle
//!
//! [`disk_io`] provides the local filesystem implementation.

pub mod disk_io;

use std::path::PathBuf;

use thiserror::Error;

pub use disk_io::{DiskIoStats, DiskStorage};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Error opening file {name}: {source}")]
    Open {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Error reading file {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Short read on file {name}: expected {expected} bytes, got {actual}")]
    ShortRead {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Error writing file {name}: {source}")]
    Write {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid file name: {0:?}")]
    InvalidName(String),

    #[error("Storage root {path:?} unavailable: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Coarse classification of a [`StorageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageErrorKind {
    Open,
    Read,
    Write,
}

impl StorageError {
    pub fn kind(&self) -> StorageErrorKind {
        match self {
            StorageError::Open { .. }
            | StorageError::InvalidName(_)
            | StorageError::Root { .. } => StorageErrorKind::Open,
            StorageError::Read { .. } | StorageError::ShortRead { .. } => StorageErrorKind::Read,
            StorageError::Write { .. } => StorageErrorKind::Write,
        }
    }
}

/// The I/O contract the cache core depends on.
///
/// Every call is made while the cache lock is held, so implementations
/// should not call back into the cache.
pub trait Storage: Send + Sync {
    /// Open handle to one backing file.
    type Handle: Send;

    /// Open `name` for reading and writing. If it does not exist it is
    /// created and zero-filled to `size` bytes.
    fn open_or_create(&self, name: &str, size: usize) -> Result<Self::Handle, StorageError>;

    /// Read exactly `buf.len()` bytes from offset 0. A short read is an error.
    fn read_full(
        &self,
        name: &str,
        handle: &mut Self::Handle,
        buf: &mut [u8],
    ) -> Result<(), StorageError>;

    /// Write all of `buf` starting at offset 0.
    fn write_full(
        &self,
        name: &str,
        handle: &mut Self::Handle,
        buf: &[u8],
    ) -> Result<(), StorageError>;

    /// Release a handle.
    fn close(&self, name: &str, handle: Self::Handle);
}
