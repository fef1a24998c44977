//! Cache entry: one resident file.
//!
//! An entry owns the file's bytes, its pin count, its dirty flag and the
//! open storage handle. Entries are created pinned once and can only be
//! destroyed through [`CacheTable`](crate::cache::table::CacheTable), which
//! flushes dirty contents before releasing the handle.

use std::sync::Arc;

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};
use tracing::warn;

use crate::storage::{Storage, StorageError};

/// Owned read guard over an entry's bytes.
pub(crate) type BufferReadGuard = ArcRwLockReadGuard<RawRwLock, Box<[u8]>>;

/// Owned write guard over an entry's bytes.
pub(crate) type BufferWriteGuard = ArcRwLockWriteGuard<RawRwLock, Box<[u8]>>;

/// Result of a non-blocking flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing to write.
    Clean,
    /// Contents written back; the entry is clean now.
    Written,
    /// A writer holds the buffer; the entry is still dirty.
    Busy,
}

/// A single resident file.
#[derive(Debug)]
pub struct CacheEntry<H> {
    /// File contents, exactly `file_size` bytes.
    ///
    /// The lock only serializes access to the bytes themselves; the cache
    /// never hands the buffer out except through guards.
    buffer: Arc<RwLock<Box<[u8]>>>,

    /// Outstanding pins. Non-zero means the entry must stay resident.
    pin_count: u32,

    /// Set by any writable access; cleared only by a successful flush.
    dirty: bool,

    /// Open handle to the backing file.
    handle: H,
}

impl<H> CacheEntry<H> {
    /// Wrap freshly loaded contents in an entry holding one pin.
    pub fn new(buffer: Box<[u8]>, handle: H) -> Self {
        Self {
            buffer: Arc::new(RwLock::new(buffer)),
            pin_count: 1,
            dirty: false,
            handle,
        }
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether the entry may be evicted (no outstanding pins).
    pub fn is_evictable(&self) -> bool {
        self.pin_count == 0
    }

    pub fn pin(&mut self) {
        self.pin_count += 1;
    }

    /// Drop one pin. Returns `true` if this released the last pin.
    ///
    /// Unpinning an entry with no pins is a caller bug; it is logged and
    /// leaves the count at zero.
    pub fn unpin(&mut self, name: &str) -> bool {
        match self.pin_count {
            0 => {
                warn!(name, "Unpin of a file that is not pinned");
                false
            }
            n => {
                self.pin_count = n - 1;
                self.pin_count == 0
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn read_guard(&self) -> BufferReadGuard {
        self.buffer.read_arc()
    }

    /// Writable view; marks the entry dirty unconditionally.
    #[cfg(test)]
    pub(crate) fn write_guard(&mut self) -> BufferWriteGuard {
        self.mark_dirty();
        self.buffer.write_arc()
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Shared handle to the buffer, for locking outside the cache lock.
    pub(crate) fn buffer(&self) -> Arc<RwLock<Box<[u8]>>> {
        Arc::clone(&self.buffer)
    }

    /// Write the buffer back if dirty, waiting for any active writer.
    /// Returns whether anything was written.
    ///
    /// Clears the dirty flag only on success.
    pub fn flush_blocking<S>(&mut self, name: &str, storage: &S) -> Result<bool, StorageError>
    where
        S: Storage<Handle = H>,
    {
        if !self.dirty {
            return Ok(false);
        }
        let buffer = self.buffer.read();
        storage.write_full(name, &mut self.handle, &buffer)?;
        drop(buffer);
        self.dirty = false;
        Ok(true)
    }

    /// Like [`flush_blocking`](Self::flush_blocking) but gives up instead
    /// of waiting when a writer holds the buffer.
    pub fn try_flush<S>(&mut self, name: &str, storage: &S) -> Result<FlushOutcome, StorageError>
    where
        S: Storage<Handle = H>,
    {
        if !self.dirty {
            return Ok(FlushOutcome::Clean);
        }
        let Some(buffer) = self.buffer.try_read() else {
            return Ok(FlushOutcome::Busy);
        };
        storage.write_full(name, &mut self.handle, &buffer)?;
        drop(buffer);
        self.dirty = false;
        Ok(FlushOutcome::Written)
    }

    /// Consume the entry, handing back its storage handle.
    pub(crate) fn into_handle(self) -> H {
        self.handle
    }
}
