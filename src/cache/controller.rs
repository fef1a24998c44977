//! Pin/unpin admission control and data access.
//!
//! [`FileCache`] is the thread-safe front of the cache. One mutex guards
//! the whole [`CacheTable`]; a condition variable on that mutex is the only
//! place a caller ever blocks. The protocol:
//! - `pin` takes a pin on resident names immediately, loads the rest into
//!   free slots, and otherwise evicts unpinned entries to make room,
//!   waiting whenever nothing can be evicted
//! - `unpin` drops pins and wakes every waiter once any entry becomes
//!   evictable, since one freed slot may satisfy several of them
//!
//! Data views lock only the entry's own buffer, never the table, so a
//! thread holding a view can still pin and unpin.

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::entry::{BufferReadGuard, BufferWriteGuard};
use crate::cache::evictor::Evictor;
use crate::cache::table::{CacheStats, CacheTable, FlushFailure};
use crate::config::{CacheConfig, EvictionConfig};
use crate::storage::{DiskStorage, Storage, StorageError};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cannot pin {requested} files in a cache of {capacity} entries")]
    InvalidRequest { requested: usize, capacity: usize },

    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{} file(s) failed to load", .failed.len())]
    PartialPin { failed: Vec<PinFailure> },

    #[error("File not resident in cache: {0}")]
    NotFound(String),
}

/// A name that could not be pinned because its file failed to load.
#[derive(Debug)]
pub struct PinFailure {
    pub name: String,
    pub error: StorageError,
}

/// Outcome of a [`FileCache::pin`] call.
///
/// Every name in `pinned` now holds one pin taken by this call and must be
/// unpinned later. Names in `failed` hold no pin.
#[derive(Debug, Default)]
pub struct PinReport {
    pub pinned: Vec<String>,
    pub failed: Vec<PinFailure>,
}

impl PinReport {
    /// Whether every requested name was pinned.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Turn a partial pin into [`CacheError::PartialPin`].
    ///
    /// The successful pins are still held either way.
    pub fn into_result(self) -> Result<Vec<String>, CacheError> {
        if self.failed.is_empty() {
            Ok(self.pinned)
        } else {
            Err(CacheError::PartialPin {
                failed: self.failed,
            })
        }
    }
}

/// Read-only view of a pinned file's contents.
///
/// Borrows the [`FileCache`] it came from, so the cache cannot be dropped
/// while the view is alive.
pub struct FileData<'a> {
    guard: BufferReadGuard,
    _cache: PhantomData<&'a ()>,
}

impl Deref for FileData<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard[..]
    }
}

impl AsRef<[u8]> for FileData<'_> {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

/// Writable view of a pinned file's contents.
///
/// Like [`FileData`] it borrows the cache. Dropping the cache while a
/// writer is still around does not compile:
///
/// ```compile_fail,E0505
/// use pinned_file_cache::{DiskStorage, FileCache};
///
/// let storage = DiskStorage::new(std::env::temp_dir()).unwrap();
/// let cache = FileCache::new(storage, 1, 16).unwrap();
/// cache.pin(["a"]).unwrap();
/// let mut view = cache.write("a").unwrap();
/// drop(cache);
/// view[0] = 7;
/// ```
pub struct FileDataMut<'a> {
    guard: BufferWriteGuard,
    _cache: PhantomData<&'a ()>,
}

impl Deref for FileDataMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard[..]
    }
}

impl DerefMut for FileDataMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.guard[..]
    }
}

impl AsMut<[u8]> for FileDataMut<'_> {
    fn as_mut(&mut self) -> &mut [u8] {
        self
    }
}

/// A fixed-capacity cache of fixed-size files with pin-based residency.
pub struct FileCache<S: Storage = DiskStorage> {
    table: Mutex<CacheTable<S::Handle>>,

    /// Signalled whenever an entry may have become evictable or a slot freed.
    evictable: Condvar,

    storage: S,

    evictor: Evictor,
}

impl FileCache<DiskStorage> {
    /// Open a cache over the filesystem directory named in `config`.
    pub fn open(config: &CacheConfig, eviction: EvictionConfig) -> Result<Self, CacheError> {
        let storage = DiskStorage::new(&config.storage_dir)?;
        Self::with_storage(storage, config, eviction)
    }
}

impl<S: Storage> FileCache<S> {
    /// Create a cache holding at most `max_entries` files of `file_size` bytes.
    pub fn new(storage: S, max_entries: usize, file_size: usize) -> Result<Self, CacheError> {
        let config = CacheConfig {
            max_entries,
            file_size,
            ..CacheConfig::default()
        };
        Self::with_storage(storage, &config, EvictionConfig::default())
    }

    pub fn with_storage(
        storage: S,
        config: &CacheConfig,
        eviction: EvictionConfig,
    ) -> Result<Self, CacheError> {
        config.validate().map_err(CacheError::InvalidConfig)?;
        debug!(
            max_entries = config.max_entries,
            file_size = config.file_size,
            "Creating file cache"
        );

        Ok(Self {
            table: Mutex::new(CacheTable::new(config.max_entries, config.file_size)),
            evictable: Condvar::new(),
            storage,
            evictor: Evictor::new(eviction),
        })
    }

    /// Pin every name in `names`, loading files as needed.
    ///
    /// Blocks until all loadable names are resident and pinned. Duplicate
    /// names are pinned once. Files that fail to load are reported in the
    /// returned [`PinReport`] without affecting the others.
    ///
    /// Callers must make sure the files they pin at the same time can
    /// actually fit; pinning more than the cache can hold across threads
    /// blocks forever.
    pub fn pin<I, N>(&self, names: I) -> Result<PinReport, CacheError>
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        let requested: BTreeSet<String> =
            names.into_iter().map(|n| n.as_ref().to_string()).collect();

        let mut table = self.table.lock();
        if requested.len() > table.capacity() {
            return Err(CacheError::InvalidRequest {
                requested: requested.len(),
                capacity: table.capacity(),
            });
        }

        let mut report = PinReport::default();

        // Resident names never block and cannot be evicted from here on.
        let mut unresolved = BTreeSet::new();
        for name in requested {
            if table.try_pin(&name) {
                report.pinned.push(name);
            } else {
                unresolved.insert(name);
            }
        }

        self.fill(&mut table, &mut unresolved, &mut report);

        while !unresolved.is_empty() {
            while table.free_slots() == 0 && !table.any_evictable() {
                table.record_wait();
                debug!(waiting_for = unresolved.len(), "Cache full, waiting for unpin");
                self.evictable.wait(&mut table);
            }

            // Someone else may have loaded what we need while we waited.
            unresolved.retain(|name| {
                if table.try_pin(name) {
                    report.pinned.push(name.clone());
                    false
                } else {
                    true
                }
            });
            if unresolved.is_empty() {
                break;
            }

            let needed = unresolved.len().saturating_sub(table.free_slots());
            if needed > 0 {
                let evicted = table.evict(needed, &self.storage, &self.evictor);
                debug!(needed, evicted, "Evicted entries for pin");
            }
            self.fill(&mut table, &mut unresolved, &mut report);
        }

        // A failed load leaves its slot free for other waiters.
        if !report.failed.is_empty() && table.free_slots() > 0 {
            self.evictable.notify_all();
        }

        Ok(report)
    }

    /// Load unresolved names into free slots until either runs out.
    fn fill(
        &self,
        table: &mut CacheTable<S::Handle>,
        unresolved: &mut BTreeSet<String>,
        report: &mut PinReport,
    ) {
        while table.free_slots() > 0 {
            let Some(name) = unresolved.pop_first() else {
                break;
            };
            match table.create(&name, &self.storage) {
                Ok(()) => report.pinned.push(name),
                Err(error) => {
                    warn!(name = %name, error = %error, "Failed to load file");
                    report.failed.push(PinFailure { name, error });
                }
            }
        }
    }

    /// Drop one pin from every resident name in `names`.
    ///
    /// Duplicate names are unpinned once. Unpinning a name that holds no
    /// pin is a caller bug; it is logged and ignored.
    pub fn unpin<I, N>(&self, names: I)
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        let names: BTreeSet<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();

        let mut table = self.table.lock();
        let mut released = false;
        for name in &names {
            match table.lookup_mut(name) {
                Some(entry) => released |= entry.unpin(name),
                None => warn!(name = %name, "Unpin of a file that is not resident"),
            }
        }

        if released {
            self.evictable.notify_all();
        }
    }

    /// Read-only view of a pinned file.
    ///
    /// The caller must hold a pin on `name` for as long as the view lives.
    /// Any number of read views of one file can coexist, but this blocks
    /// while a [`write`](Self::write) view of the same file is alive.
    pub fn read(&self, name: &str) -> Result<FileData<'_>, CacheError> {
        let buffer = {
            let table = self.table.lock();
            let entry = table
                .lookup(name)
                .ok_or_else(|| CacheError::NotFound(name.to_string()))?;
            entry.buffer()
        };
        Ok(FileData {
            guard: buffer.read_arc(),
            _cache: PhantomData,
        })
    }

    /// Writable view of a pinned file. Marks the file dirty.
    ///
    /// The caller must hold a pin on `name` for as long as the view lives.
    /// Blocks until every other view of the same file, read or write, has
    /// been dropped. A thread that still holds a view of `name` and calls
    /// `write(name)` deadlocks on itself.
    pub fn write(&self, name: &str) -> Result<FileDataMut<'_>, CacheError> {
        let buffer = {
            let mut table = self.table.lock();
            let entry = table
                .lookup_mut(name)
                .ok_or_else(|| CacheError::NotFound(name.to_string()))?;
            entry.mark_dirty();
            entry.buffer()
        };
        Ok(FileDataMut {
            guard: buffer.write_arc(),
            _cache: PhantomData,
        })
    }

    /// Write back every dirty file without evicting anything.
    ///
    /// Files with an outstanding writable view are skipped and reported.
    pub fn flush_all(&self) -> Vec<FlushFailure> {
        self.table.lock().flush_all(&self.storage)
    }

    /// Current pin count of `name`, or `None` if it is not resident.
    pub fn pin_count(&self, name: &str) -> Option<u32> {
        self.table.lock().lookup(name).map(|e| e.pin_count())
    }

    /// Whether `name` is dirty, or `None` if it is not resident.
    pub fn is_dirty(&self, name: &str) -> Option<bool> {
        self.table.lock().lookup(name).map(|e| e.is_dirty())
    }

    pub fn is_resident(&self, name: &str) -> bool {
        self.table.lock().lookup(name).is_some()
    }

    /// Number of resident files.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    /// Maximum number of resident files.
    pub fn capacity(&self) -> usize {
        self.table.lock().capacity()
    }

    pub fn file_size(&self) -> usize {
        self.table.lock().file_size()
    }

    pub fn stats(&self) -> CacheStats {
        self.table.lock().stats()
    }
}

impl<S: Storage> Drop for FileCache<S> {
    fn drop(&mut self) {
        let table = self.table.get_mut();
        table.shutdown(&self.storage);
        let stats = table.stats();
        info!(
            hits = stats.hits,
            misses = stats.misses,
            evictions = stats.evictions,
            flushes = stats.flushes,
            flush_failures = stats.flush_failures,
            "File cache closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SIZE: usize = 64;

    fn test_cache(max_entries: usize) -> (TempDir, FileCache) {
        let tmp = TempDir::new().unwrap();
        let storage = DiskStorage::new(tmp.path()).unwrap();
        let cache = FileCache::new(storage, max_entries, SIZE).unwrap();
        (tmp, cache)
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let tmp = TempDir::new().unwrap();
        let storage = DiskStorage::new(tmp.path()).unwrap();
        assert!(matches!(
            FileCache::new(storage, 0, SIZE),
            Err(CacheError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_pin_too_many_is_invalid() {
        let (_tmp, cache) = test_cache(2);
        let err = cache.pin(["a", "b", "c"]).unwrap_err();
        assert!(matches!(
            err,
            CacheError::InvalidRequest {
                requested: 3,
                capacity: 2
            }
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_duplicate_names_pin_once() {
        let (_tmp, cache) = test_cache(2);
        let report = cache.pin(["a", "a", "b"]).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.pinned.len(), 2);
        assert_eq!(cache.pin_count("a"), Some(1));

        cache.unpin(["a", "a"]);
        assert_eq!(cache.pin_count("a"), Some(0));
    }

    #[test]
    fn test_repin_counts_hit() {
        let (_tmp, cache) = test_cache(2);
        cache.pin(["a"]).unwrap();
        cache.pin(["a"]).unwrap();
        assert_eq!(cache.pin_count("a"), Some(2));

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_not_found_accessors() {
        let (_tmp, cache) = test_cache(1);
        assert!(matches!(cache.read("nope"), Err(CacheError::NotFound(_))));
        assert!(matches!(cache.write("nope"), Err(CacheError::NotFound(_))));
    }

    #[test]
    fn test_write_marks_dirty_without_mutation() {
        let (_tmp, cache) = test_cache(1);
        cache.pin(["a"]).unwrap();
        assert_eq!(cache.is_dirty("a"), Some(false));
        drop(cache.write("a").unwrap());
        assert_eq!(cache.is_dirty("a"), Some(true));

        cache.unpin(["a"]);
        assert_eq!(cache.is_dirty("a"), Some(true));
    }

    #[test]
    fn test_eviction_makes_room() {
        let (_tmp, cache) = test_cache(1);
        cache.pin(["a"]).unwrap();
        cache.unpin(["a"]);

        let report = cache.pin(["b"]).unwrap();
        assert!(report.is_complete());
        assert!(!cache.is_resident("a"));
        assert_eq!(cache.pin_count("b"), Some(1));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_failed_load_reported_others_pinned() {
        let (_tmp, cache) = test_cache(2);
        let report = cache.pin(["good", "../bad"]).unwrap();
        assert_eq!(report.pinned, ["good"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].name, "../bad");
        assert!(!report.is_complete());
        assert!(matches!(
            report.into_result(),
            Err(CacheError::PartialPin { .. })
        ));
        assert_eq!(cache.pin_count("good"), Some(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_view_does_not_block_pinning() {
        let (_tmp, cache) = test_cache(2);
        cache.pin(["a"]).unwrap();
        let mut view = cache.write("a").unwrap();
        view[0] = 1;

        // The table lock is free while the view is held.
        cache.pin(["b"]).unwrap();
        cache.unpin(["b"]);
        drop(view);

        assert_eq!(cache.read("a").unwrap()[0], 1);
    }
}
