//! Block store: decoded blocks behind a byte-budgeted LRU cache
//!
//! Misses go through `try_get_with`, so concurrent queries that want the
//! same block wait on a single read-and-decode. A failed load caches
//! nothing and the error reaches every waiter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hh_common::{Error, Result};
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde::Serialize;
use tracing::{debug, trace};

use super::reader::BlockReader;
use crate::formats::block::{self, Block, BlockLayout};
use crate::formats::OpenedArtifact;

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: u64,
    pub weighted_bytes: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

pub struct BlockStore {
    artifact: Arc<OpenedArtifact>,
    layout: BlockLayout,
    reader: BlockReader,
    cache: Cache<u32, Arc<Block>>,
    counters: Arc<Counters>,
}

impl BlockStore {
    pub fn new(artifact: Arc<OpenedArtifact>, reader: BlockReader, cache_bytes: u64) -> Self {
        let counters = Arc::new(Counters::default());
        let evictions = Arc::clone(&counters);
        let cache = Cache::builder()
            .weigher(|_id: &u32, block: &Arc<Block>| block.size_bytes().min(u32::MAX as usize) as u32)
            .max_capacity(cache_bytes)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(move |_id, _block, cause| {
                if cause.was_evicted() {
                    evictions.evictions.fetch_add(1, Ordering::Relaxed);
                }
            })
            .build();
        let layout = BlockLayout {
            ids: crate::graph::IdLayout::new(
                artifact.header.bits_per_block_id,
                artifact.header.bits_per_vertex_offset,
            ),
            hop_indices: artifact.header.has_hop_indices(),
        };
        Self {
            artifact,
            layout,
            reader,
            cache,
            counters,
        }
    }

    pub fn artifact(&self) -> &OpenedArtifact {
        &self.artifact
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn num_blocks(&self) -> u32 {
        self.artifact.header.num_blocks
    }

    /// Decoded block, from cache or storage.
    pub fn get_block(&self, block_id: u32) -> Result<Arc<Block>> {
        if block_id >= self.num_blocks() {
            return Err(Error::out_of_range("block", block_id, self.num_blocks()));
        }
        // a caller that waited on another thread's load counts as a hit
        match self
            .cache
            .entry_by_ref(&block_id)
            .or_try_insert_with(|| self.load(block_id).map(Arc::new))
        {
            Ok(entry) => {
                let counter = if entry.is_fresh() {
                    &self.counters.misses
                } else {
                    &self.counters.hits
                };
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(entry.into_value())
            }
            Err(err) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                Err((*err).clone())
            }
        }
    }

    fn load(&self, block_id: u32) -> Result<Block> {
        let level = self
            .artifact
            .header
            .level_of_block(block_id)
            .ok_or_else(|| Error::out_of_range("block", block_id, self.num_blocks()))?;
        let (offset, len) = self.artifact.block_range(block_id)?;
        let bytes = self.reader.read(block_id, offset, len)?;
        let block = block::decode(block_id, level, &bytes, &self.layout).inspect_err(|err| {
            debug!(block = block_id, error = %err, "block failed to decode");
        })?;
        trace!(block = block_id, level, bytes = len, vertices = block.num_vertices(), "block loaded");
        Ok(block)
    }

    /// Flush pending cache maintenance so counters and sizes are current.
    pub fn sync(&self) {
        self.cache.run_pending_tasks();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entries: self.cache.entry_count(),
            weighted_bytes: self.cache.weighted_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::BuildConfig;
    use crate::testing::{three_chains, Fixture};
    use hh_common::Error;
    use std::sync::Arc;

    #[test]
    fn test_hits_and_misses_are_counted() {
        let f = Fixture::chains();
        let store = f.graph.store();
        // the fixture decoded the level-0 block while mapping ids
        let before = store.stats();
        assert_eq!(before.misses, 1);

        let top = store.artifact().header.levels[2].first_block;
        let first = store.get_block(top).unwrap();
        let again = store.get_block(top).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        store.sync();
        let after = store.stats();
        assert_eq!(after.misses, before.misses + 1);
        assert_eq!(after.hits, before.hits + 1);
        assert_eq!(after.entries, 2);
        assert!(after.weighted_bytes > 0);
        assert_eq!(after.evictions, 0);
    }

    #[test]
    fn test_concurrent_lookups_count_once_each() {
        let build = BuildConfig {
            block_vertices: 2,
            ..Default::default()
        };
        let f = Fixture::new(&three_chains(), build);
        let store = f.graph.store();
        let before = store.stats();
        let blocks = store.num_blocks();
        let rounds = 50u32;

        std::thread::scope(|scope| {
            for worker in 0..4 {
                scope.spawn(move || {
                    for i in 0..rounds {
                        store.get_block((i + worker) % blocks).unwrap();
                    }
                });
            }
        });
        store.sync();
        let after = store.stats();
        let lookups = (after.hits - before.hits) + (after.misses - before.misses);
        assert_eq!(lookups, 4 * rounds as u64);
        // every block is decoded once and then served from memory
        assert_eq!(after.misses, blocks as u64);
        assert_eq!(after.evictions, 0);
    }

    #[test]
    fn test_block_ids_are_checked() {
        let f = Fixture::chains();
        let n = f.graph.store().num_blocks();
        assert!(matches!(
            f.graph.store().get_block(n),
            Err(Error::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_decoded_block_belongs_to_its_level() {
        let build = BuildConfig {
            block_vertices: 2,
            ..Default::default()
        };
        let f = Fixture::new(&three_chains(), build);
        let header = f.graph.header().clone();
        for (level, info) in header.levels.iter().enumerate() {
            for id in info.first_block..info.first_block + info.num_blocks {
                let block = f.graph.store().get_block(id).unwrap();
                assert_eq!(block.level as usize, level);
                assert_eq!(block.id, id);
                assert!(block.num_vertices() <= 2);
            }
        }
    }
}
