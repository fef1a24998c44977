//! Eviction policy: decides which unpinned entries to drop.
//!
//! Only entries with a zero pin count are ever candidates. Among those,
//! no recency is tracked; the policy only decides between clean and dirty
//! victims:
//! - `prefer_clean`: clean entries go first since dropping them costs no I/O
//! - otherwise any eligible entry may go, in name order
//!
//! Names break ties so the choice is deterministic for a given table.

use crate::cache::entry::CacheEntry;
use crate::config::EvictionConfig;

/// An eviction candidate with its computed priority (lower goes first).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EvictionCandidate {
    pub rank: u8,
    pub name: String,
}

/// The eviction policy engine.
#[derive(Debug, Clone)]
pub struct Evictor {
    config: EvictionConfig,
}

impl Evictor {
    pub fn new(config: EvictionConfig) -> Self {
        Self { config }
    }

    fn rank<H>(&self, entry: &CacheEntry<H>) -> u8 {
        if self.config.prefer_clean && entry.is_dirty() {
            1
        } else {
            0
        }
    }

    /// Select up to `count` unpinned entries to evict.
    ///
    /// Never returns a pinned entry and never returns more than `count`.
    pub fn select_victims<'a, H: 'a>(
        &self,
        entries: impl Iterator<Item = (&'a String, &'a CacheEntry<H>)>,
        count: usize,
    ) -> Vec<EvictionCandidate> {
        if count == 0 {
            return Vec::new();
        }

        let mut candidates: Vec<EvictionCandidate> = entries
            .filter(|(_, entry)| entry.is_evictable())
            .map(|(name, entry)| EvictionCandidate {
                rank: self.rank(entry),
                name: name.clone(),
            })
            .collect();

        candidates.sort_unstable();
        candidates.truncate(count);
        candidates
    }
}
