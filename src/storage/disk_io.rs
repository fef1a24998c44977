//! Local filesystem storage for cached files.
//!
//! Each cached name maps to a regular file under a root directory. Files
//! are opened read-write and kept open for as long as the entry stays
//! resident; all transfers are whole-file and always start at offset 0.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::storage::{Storage, StorageError};

/// Disk I/O counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiskIoStats {
    pub total_writes: u64,
    pub total_reads: u64,
    pub total_bytes_written: u64,
    pub total_bytes_read: u64,
    pub files_created: u64,
}

#[derive(Debug, Default)]
struct AtomicDiskIoStats {
    total_writes: AtomicU64,
    total_reads: AtomicU64,
    total_bytes_written: AtomicU64,
    total_bytes_read: AtomicU64,
    files_created: AtomicU64,
}

/// Filesystem-backed [`Storage`].
#[derive(Debug)]
pub struct DiskStorage {
    /// Directory that cached names are resolved against.
    root: PathBuf,

    /// Transfer statistics.
    stats: AtomicDiskIoStats,
}

impl DiskStorage {
    /// Create a storage rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StorageError::Root {
            path: root.clone(),
            source,
        })?;

        Ok(Self {
            root,
            stats: AtomicDiskIoStats::default(),
        })
    }

    /// Resolve a cache name to a path under the root.
    ///
    /// Names must be relative and may not climb out of the root.
    pub fn file_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(name);
        let valid = !name.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !valid {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(rel))
    }

    /// Snapshot of the I/O counters.
    pub fn stats(&self) -> DiskIoStats {
        DiskIoStats {
            total_writes: self.stats.total_writes.load(Ordering::Relaxed),
            total_reads: self.stats.total_reads.load(Ordering::Relaxed),
            total_bytes_written: self.stats.total_bytes_written.load(Ordering::Relaxed),
            total_bytes_read: self.stats.total_bytes_read.load(Ordering::Relaxed),
            files_created: self.stats.files_created.load(Ordering::Relaxed),
        }
    }
}

impl Storage for DiskStorage {
    type Handle = File;

    fn open_or_create(&self, name: &str, size: usize) -> Result<File, StorageError> {
        let path = self.file_path(name)?;
        let open_err = |source| StorageError::Open {
            name: name.to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(open_err)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(open_err)?;

        // A zero-length file is one we just created (or an empty one left
        // behind); either way it becomes `size` zero bytes.
        let len = file.metadata().map_err(open_err)?.len();
        if len == 0 && size > 0 {
            file.set_len(size as u64).map_err(open_err)?;
            self.stats.files_created.fetch_add(1, Ordering::Relaxed);
            debug!(name, path = %path.display(), size, "Created zero-filled file");
        }

        Ok(file)
    }

    fn read_full(&self, name: &str, file: &mut File, buf: &mut [u8]) -> Result<(), StorageError> {
        let read_err = |source| StorageError::Read {
            name: name.to_string(),
            source,
        };

        file.seek(SeekFrom::Start(0)).map_err(read_err)?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(read_err(e)),
            }
        }

        if filled < buf.len() {
            return Err(StorageError::ShortRead {
                name: name.to_string(),
                expected: buf.len(),
                actual: filled,
            });
        }

        self.stats.total_reads.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes_read
            .fetch_add(filled as u64, Ordering::Relaxed);
        debug!(name, size = filled, "Read file from disk");
        Ok(())
    }

    fn write_full(&self, name: &str, file: &mut File, buf: &[u8]) -> Result<(), StorageError> {
        let write_err = |source| StorageError::Write {
            name: name.to_string(),
            source,
        };

        file.seek(SeekFrom::Start(0)).map_err(write_err)?;
        file.write_all(buf).map_err(write_err)?;
        file.flush().map_err(write_err)?;

        self.stats.total_writes.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes_written
            .fetch_add(buf.len() as u64, Ordering::Relaxed);
        debug!(name, size = buf.len(), "Wrote file to disk");
        Ok(())
    }

    fn close(&self, name: &str, file: File) {
        drop(file);
        debug!(name, "Closed file");
    }
}
