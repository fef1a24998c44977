//! pinned-file-cache: a fixed-capacity, pin-based cache for fixed-size files.
//!
//! Clients pin a set of file names to make them resident, read or write the
//! buffered contents through views, and unpin them to allow eviction.
//! Dirty files are written back to the local filesystem when evicted and
//! when the cache is dropped.

pub mod cache;
pub mod config;
pub mod storage;

pub use cache::{CacheError, CacheStats, FileCache, FileData, FileDataMut, PinReport};
pub use config::{CacheConfig, Config, EvictionConfig, DEFAULT_FILE_SIZE};
pub use storage::{DiskStorage, Storage, StorageError};
