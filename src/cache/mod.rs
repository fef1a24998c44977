//! Pinned file cache.
//!
//! This module contains the core cache data structures and algorithms:
//! - [`entry`]: CacheEntry, one resident file with its pin count and dirty flag
//! - [`table`]: CacheTable, the bounded name → entry map and entry lifecycle
//! - [`evictor`]: Victim selection among unpinned entries
//! - [`controller`]: FileCache, pin/unpin admission control and data views

pub mod controller;
pub mod entry;
pub mod evictor;
pub mod table;

pub use controller::{CacheError, FileCache, FileData, FileDataMut, PinFailure, PinReport};
pub use table::{CacheStats, FlushError, FlushFailure};
