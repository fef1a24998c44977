//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use pinned_file_cache::storage::{Storage, StorageError};
use pinned_file_cache::FileCache;

#[derive(Debug, Default)]
struct MemoryInner {
    files: HashMap<String, Vec<u8>>,
    fail_open: HashSet<String>,
    fail_read: HashSet<String>,
    fail_write: HashSet<String>,
    opens: HashMap<String, usize>,
    open_handles: usize,
}

/// In-memory storage with per-name fault injection.
///
/// Clones share state, so a test can keep one to inspect what the cache
/// wrote after the cache itself is gone.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.inner.lock().files.get(name).cloned()
    }

    pub fn put(&self, name: &str, data: Vec<u8>) {
        self.inner.lock().files.insert(name.to_string(), data);
    }

    pub fn fail_open(&self, name: &str) {
        self.inner.lock().fail_open.insert(name.to_string());
    }

    pub fn fail_read(&self, name: &str) {
        self.inner.lock().fail_read.insert(name.to_string());
    }

    pub fn fail_write(&self, name: &str) {
        self.inner.lock().fail_write.insert(name.to_string());
    }

    /// Number of successful opens of `name`.
    pub fn opens(&self, name: &str) -> usize {
        self.inner.lock().opens.get(name).copied().unwrap_or(0)
    }

    /// Handles opened and not yet closed.
    pub fn open_handles(&self) -> usize {
        self.inner.lock().open_handles
    }
}

fn injected(kind: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("injected {kind} failure"))
}

impl Storage for MemoryStorage {
    type Handle = String;

    fn open_or_create(&self, name: &str, size: usize) -> Result<String, StorageError> {
        let mut inner = self.inner.lock();
        if inner.fail_open.contains(name) {
            return Err(StorageError::Open {
                name: name.to_string(),
                source: injected("open"),
            });
        }
        inner
            .files
            .entry(name.to_string())
            .or_insert_with(|| vec![0u8; size]);
        *inner.opens.entry(name.to_string()).or_default() += 1;
        inner.open_handles += 1;
        Ok(name.to_string())
    }

    fn read_full(
        &self,
        name: &str,
        _handle: &mut String,
        buf: &mut [u8],
    ) -> Result<(), StorageError> {
        let inner = self.inner.lock();
        if inner.fail_read.contains(name) {
            return Err(StorageError::Read {
                name: name.to_string(),
                source: injected("read"),
            });
        }
        let data = &inner.files[name];
        if data.len() < buf.len() {
            return Err(StorageError::ShortRead {
                name: name.to_string(),
                expected: buf.len(),
                actual: data.len(),
            });
        }
        buf.copy_from_slice(&data[..buf.len()]);
        Ok(())
    }

    fn write_full(
        &self,
        name: &str,
        _handle: &mut String,
        buf: &[u8],
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        if inner.fail_write.contains(name) {
            return Err(StorageError::Write {
                name: name.to_string(),
                source: injected("write"),
            });
        }
        inner.files.insert(name.to_string(), buf.to_vec());
        Ok(())
    }

    fn close(&self, _name: &str, _handle: String) {
        self.inner.lock().open_handles -= 1;
    }
}

/// Poll until `cond` holds, panicking after a generous timeout.
pub fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Wait until `count` blocked pinners have been recorded.
pub fn wait_for_waiters<S: Storage>(cache: &FileCache<S>, count: u64) {
    wait_until("blocked pinners", || cache.stats().waits >= count);
}

/// Receive one completion, panicking if it takes too long.
pub fn expect_done<T>(rx: &Receiver<T>) -> T {
    rx.recv_timeout(Duration::from_secs(10))
        .expect("pinner did not complete")
}
