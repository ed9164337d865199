//! Block cache for the durable part of an append log file
//!
//! - Keyed by block index (data-region offset / block size)
//! - Values are verbatim copies of durable disk bytes, never modified
//! - Least-recently-used eviction once `capacity` entries are held
//! - Writers only invalidate (`remove`/`clear`); readers populate (`put`)
//!
//! All operations take `&self` so readers holding the shared file lock can
//! populate the cache concurrently. The map lives behind its own mutex.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::errors::{StorageError, StorageResult};

/// Shared, immutable bytes of one block.
pub type BlockBytes = Arc<[u8]>;

#[derive(Debug)]
struct CacheEntry {
    bytes: BlockBytes,
    last_used: u64,
}

#[derive(Debug, Default)]
struct LruState {
    entries: HashMap<u64, CacheEntry>,
    /// access tick -> block index, oldest first
    recency: BTreeMap<u64, u64>,
    tick: u64,
}

impl LruState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, block_index: u64) -> Option<BlockBytes> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(&block_index)?;
        self.recency.remove(&entry.last_used);
        entry.last_used = tick;
        self.recency.insert(tick, block_index);
        Some(Arc::clone(&entry.bytes))
    }

    fn remove(&mut self, block_index: u64) -> bool {
        match self.entries.remove(&block_index) {
            Some(entry) => {
                self.recency.remove(&entry.last_used);
                true
            }
            None => false,
        }
    }

    fn evict_oldest(&mut self) -> bool {
        let oldest = self.recency.iter().next().map(|(tick, index)| (*tick, *index));
        match oldest {
            Some((tick, index)) => {
                self.recency.remove(&tick);
                self.entries.remove(&index);
                true
            }
            None => false,
        }
    }
}

/// Capacity-bounded LRU cache of block bytes.
#[derive(Debug)]
pub struct BlockCache {
    capacity: usize,
    state: Mutex<LruState>,
}

impl BlockCache {
    /// Create a cache holding at most `capacity` blocks.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(LruState::default()),
        }
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, LruState>> {
        self.state.lock().map_err(|_| StorageError::lock_poisoned())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up a block and mark it most recently used.
    pub fn get(&self, block_index: u64) -> StorageResult<Option<BlockBytes>> {
        Ok(self.lock()?.touch(block_index))
    }

    /// Insert a block. Returns the number of entries evicted to make room.
    ///
    /// Re-inserting an existing index replaces its bytes and refreshes it.
    pub fn put(&self, block_index: u64, bytes: BlockBytes) -> StorageResult<usize> {
        if self.capacity == 0 {
            return Ok(0);
        }
        let mut state = self.lock()?;
        state.remove(block_index);

        let mut evicted = 0;
        while state.entries.len() >= self.capacity && state.evict_oldest() {
            evicted += 1;
        }

        let tick = state.next_tick();
        state.recency.insert(tick, block_index);
        state.entries.insert(
            block_index,
            CacheEntry {
                bytes,
                last_used: tick,
            },
        );
        Ok(evicted)
    }

    /// Drop one block. Returns whether it was cached.
    pub fn remove(&self, block_index: u64) -> StorageResult<bool> {
        Ok(self.lock()?.remove(block_index))
    }

    /// Drop every block intersecting `[offset, offset + len)` of the data
    /// region. Returns the number of entries removed.
    pub fn invalidate_range(&self, offset: u64, len: u64, block_size: u64) -> StorageResult<u64> {
        if len == 0 || block_size == 0 {
            return Ok(0);
        }
        let first = offset / block_size;
        let last = (offset + len - 1) / block_size;

        let mut state = self.lock()?;
        if state.entries.is_empty() {
            return Ok(0);
        }
        let mut removed = 0;
        for block_index in first..=last {
            if state.remove(block_index) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn clear(&self) -> StorageResult<()> {
        let mut state = self.lock()?;
        state.entries.clear();
        state.recency.clear();
        Ok(())
    }

    pub fn contains(&self, block_index: u64) -> StorageResult<bool> {
        Ok(self.lock()?.entries.contains_key(&block_index))
    }

    pub fn len(&self) -> StorageResult<usize> {
        Ok(self.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}
