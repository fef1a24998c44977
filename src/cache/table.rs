//! Cache table: name → resident entry, bounded by `max_entries`.
//!
//! The table is not thread-safe on its own; [`FileCache`] keeps it behind
//! a single mutex and every method here runs with that lock held.
//!
//! [`FileCache`]: crate::cache::controller::FileCache

use std::collections::HashMap;

use tracing::{debug, error, info, warn};

use crate::cache::entry::{CacheEntry, FlushOutcome};
use crate::cache::evictor::Evictor;
use crate::storage::{Storage, StorageError};

/// Cache activity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Pins satisfied by an already-resident entry.
    pub hits: u64,
    /// Loads attempted for non-resident names.
    pub misses: u64,
    /// Loads that failed to open or read the backing file.
    pub load_failures: u64,
    /// Entries removed to make room.
    pub evictions: u64,
    /// Successful write-backs of dirty entries.
    pub flushes: u64,
    /// Failed write-backs.
    pub flush_failures: u64,
    /// Times a pinner had to block for an evictable entry.
    pub waits: u64,
}

/// A dirty entry that could not be written back.
#[derive(Debug)]
pub struct FlushFailure {
    pub name: String,
    pub error: FlushError,
}

#[derive(Debug)]
pub enum FlushError {
    /// The storage write failed; the entry stays dirty.
    Storage(StorageError),
    /// A writer currently holds the buffer; the entry stays dirty.
    Busy,
}

/// Mapping from file name to resident entry.
#[derive(Debug)]
pub struct CacheTable<H> {
    entries: HashMap<String, CacheEntry<H>>,

    /// Maximum number of resident entries.
    max_entries: usize,

    /// Size of every cached file in bytes.
    file_size: usize,

    stats: CacheStats,
}

impl<H> CacheTable<H> {
    pub fn new(max_entries: usize, file_size: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(max_entries),
            max_entries,
            file_size,
            stats: CacheStats::default(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&CacheEntry<H>> {
        self.entries.get(name)
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut CacheEntry<H>> {
        self.entries.get_mut(name)
    }

    /// Add a pin to `name` if it is resident. Counts as a hit.
    pub fn try_pin(&mut self, name: &str) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.pin();
                self.stats.hits += 1;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    pub fn file_size(&self) -> usize {
        self.file_size
    }

    pub fn free_slots(&self) -> usize {
        self.max_entries.saturating_sub(self.entries.len())
    }

    /// Whether any resident entry has a zero pin count.
    pub fn any_evictable(&self) -> bool {
        self.entries.values().any(CacheEntry::is_evictable)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub(crate) fn record_wait(&mut self) {
        self.stats.waits += 1;
    }

    /// Load `name` from storage and insert it with one pin.
    ///
    /// On failure nothing is inserted and any opened handle is closed.
    pub fn create<S>(&mut self, name: &str, storage: &S) -> Result<(), StorageError>
    where
        S: Storage<Handle = H>,
    {
        debug_assert!(self.free_slots() > 0, "create on a full cache table");
        debug_assert!(!self.entries.contains_key(name), "create of resident file");
        self.stats.misses += 1;

        let loaded = storage
            .open_or_create(name, self.file_size)
            .and_then(|mut handle| {
                let mut buffer = vec![0u8; self.file_size].into_boxed_slice();
                match storage.read_full(name, &mut handle, &mut buffer) {
                    Ok(()) => Ok((buffer, handle)),
                    Err(e) => {
                        storage.close(name, handle);
                        Err(e)
                    }
                }
            });

        match loaded {
            Ok((buffer, handle)) => {
                self.entries
                    .insert(name.to_string(), CacheEntry::new(buffer, handle));
                debug!(name, resident = self.entries.len(), "Loaded file into cache");
                Ok(())
            }
            Err(e) => {
                self.stats.load_failures += 1;
                Err(e)
            }
        }
    }

    /// Remove an unpinned entry, flushing it first if dirty.
    ///
    /// A failed flush is logged and the entry is removed anyway so that
    /// eviction always reclaims the slot.
    fn destroy<S>(&mut self, name: &str, storage: &S) -> bool
    where
        S: Storage<Handle = H>,
    {
        let Some(mut entry) = self.entries.remove(name) else {
            return false;
        };
        debug_assert!(entry.is_evictable(), "destroying a pinned entry");

        match entry.flush_blocking(name, storage) {
            Ok(true) => self.stats.flushes += 1,
            Ok(false) => {}
            Err(e) => {
                self.stats.flush_failures += 1;
                error!(name, error = %e, "Flush failed during eviction, dropping entry");
            }
        }
        storage.close(name, entry.into_handle());
        true
    }

    /// Evict up to `count` unpinned entries. Returns the number evicted.
    pub fn evict<S>(&mut self, count: usize, storage: &S, evictor: &Evictor) -> usize
    where
        S: Storage<Handle = H>,
    {
        let victims = evictor.select_victims(self.entries.iter(), count);
        debug_assert!(victims.len() <= count);

        let mut evicted = 0;
        for victim in victims {
            if self.destroy(&victim.name, storage) {
                evicted += 1;
                debug!(name = %victim.name, "Evicted file");
            }
        }
        self.stats.evictions += evicted as u64;
        evicted
    }

    /// Write back every dirty entry without evicting anything.
    ///
    /// Entries whose buffer is currently held by a writer are skipped and
    /// reported as [`FlushError::Busy`].
    pub fn flush_all<S>(&mut self, storage: &S) -> Vec<FlushFailure>
    where
        S: Storage<Handle = H>,
    {
        let mut failures = Vec::new();
        for (name, entry) in self.entries.iter_mut() {
            match entry.try_flush(name, storage) {
                Ok(FlushOutcome::Written) => self.stats.flushes += 1,
                Ok(FlushOutcome::Clean) => {}
                Ok(FlushOutcome::Busy) => {
                    warn!(name = %name, "Skipping flush of file with an active writer");
                    failures.push(FlushFailure {
                        name: name.clone(),
                        error: FlushError::Busy,
                    });
                }
                Err(e) => {
                    self.stats.flush_failures += 1;
                    error!(name = %name, error = %e, "Flush failed");
                    failures.push(FlushFailure {
                        name: name.clone(),
                        error: FlushError::Storage(e),
                    });
                }
            }
        }
        failures
    }

    /// Flush every dirty entry and close every handle, pinned or not.
    pub fn shutdown<S>(&mut self, storage: &S)
    where
        S: Storage<Handle = H>,
    {
        let resident = self.entries.len();
        let mut flushed = 0;
        for (name, mut entry) in self.entries.drain() {
            if entry.pin_count() > 0 {
                warn!(name = %name, pins = entry.pin_count(), "File still pinned at shutdown");
            }
            // Views borrow the cache, so a held buffer here means a leaked guard.
            match entry.try_flush(&name, storage) {
                Ok(FlushOutcome::Written) => {
                    flushed += 1;
                    self.stats.flushes += 1;
                }
                Ok(FlushOutcome::Clean) => {}
                Ok(FlushOutcome::Busy) => {
                    self.stats.flush_failures += 1;
                    error!(name = %name, "Buffer still locked at shutdown, dirty contents lost");
                }
                Err(e) => {
                    self.stats.flush_failures += 1;
                    error!(name = %name, error = %e, "Flush failed at shutdown");
                }
            }
            storage.close(&name, entry.into_handle());
        }

        if resident > 0 {
            info!(resident, flushed, "Cache shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvictionConfig;
    use crate::storage::DiskStorage;
    use tempfile::TempDir;

    fn setup(max_entries: usize) -> (TempDir, DiskStorage, CacheTable<std::fs::File>) {
        let tmp = TempDir::new().unwrap();
        let storage = DiskStorage::new(tmp.path()).unwrap();
        (tmp, storage, CacheTable::new(max_entries, 32))
    }

    #[test]
    fn test_create_inserts_pinned_entry() {
        let (_tmp, storage, mut table) = setup(2);

        table.create("a", &storage).unwrap();
        let entry = table.lookup("a").unwrap();
        assert_eq!(entry.pin_count(), 1);
        assert!(!entry.is_dirty());
        assert_eq!(table.len(), 1);
        assert_eq!(table.free_slots(), 1);
        assert_eq!(table.stats().misses, 1);
    }

    #[test]
    fn test_failed_create_leaves_table_unchanged() {
        let (_tmp, storage, mut table) = setup(2);

        assert!(table.create("../escape", &storage).is_err());
        assert!(table.is_empty());
        assert_eq!(table.stats().load_failures, 1);
    }

    #[test]
    fn test_evict_only_unpinned() {
        let (_tmp, storage, mut table) = setup(3);
        let evictor = Evictor::new(EvictionConfig::default());

        table.create("a", &storage).unwrap();
        table.create("b", &storage).unwrap();
        table.lookup_mut("b").unwrap().unpin("b");
        assert!(table.any_evictable());

        assert_eq!(table.evict(2, &storage, &evictor), 1);
        assert!(table.lookup("a").is_some());
        assert!(table.lookup("b").is_none());
        assert!(!table.any_evictable());
        assert_eq!(table.stats().evictions, 1);
    }

    #[test]
    fn test_evict_flushes_dirty() {
        let (tmp, storage, mut table) = setup(1);
        let evictor = Evictor::new(EvictionConfig::default());

        table.create("a", &storage).unwrap();
        {
            let entry = table.lookup_mut("a").unwrap();
            entry.write_guard()[..3].copy_from_slice(b"xyz");
            entry.unpin("a");
        }
        table.evict(1, &storage, &evictor);

        let on_disk = std::fs::read(tmp.path().join("a")).unwrap();
        assert_eq!(&on_disk[..3], b"xyz");
        assert_eq!(on_disk.len(), 32);
        assert_eq!(table.stats().flushes, 1);
    }

    #[test]
    fn test_flush_all_keeps_entries() {
        let (tmp, storage, mut table) = setup(2);

        table.create("a", &storage).unwrap();
        table.lookup_mut("a").unwrap().write_guard()[0] = 5;

        assert!(table.flush_all(&storage).is_empty());
        let entry = table.lookup("a").unwrap();
        assert!(!entry.is_dirty());
        assert_eq!(entry.pin_count(), 1);
        assert_eq!(std::fs::read(tmp.path().join("a")).unwrap()[0], 5);
    }

    #[test]
    fn test_flush_all_skips_active_writer() {
        let (_tmp, storage, mut table) = setup(1);

        table.create("a", &storage).unwrap();
        let guard = table.lookup_mut("a").unwrap().write_guard();

        let failures = table.flush_all(&storage);
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].error, FlushError::Busy));
        drop(guard);
        assert!(table.lookup("a").unwrap().is_dirty());
    }

    #[test]
    fn test_shutdown_flushes_pinned_dirty() {
        let (tmp, storage, mut table) = setup(1);

        table.create("a", &storage).unwrap();
        table.lookup_mut("a").unwrap().write_guard()[0] = 42;
        table.shutdown(&storage);

        assert!(table.is_empty());
        assert_eq!(std::fs::read(tmp.path().join("a")).unwrap()[0], 42);
    }

    #[test]
    fn test_shutdown_with_locked_buffer_does_not_block() {
        let (tmp, storage, mut table) = setup(2);

        table.create("held", &storage).unwrap();
        table.create("free", &storage).unwrap();
        let mut guard = table.lookup_mut("held").unwrap().write_guard();
        guard[0] = 1;
        table.lookup_mut("free").unwrap().write_guard()[0] = 2;

        table.shutdown(&storage);
        drop(guard);

        assert!(table.is_empty());
        assert_eq!(table.stats().flush_failures, 1);
        assert_eq!(table.stats().flushes, 1);
        assert_eq!(std::fs::read(tmp.path().join("free")).unwrap()[0], 2);
        assert_eq!(std::fs::read(tmp.path().join("held")).unwrap()[0], 0);
    }
}
