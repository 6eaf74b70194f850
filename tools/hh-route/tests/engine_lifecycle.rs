//! Opening, failure latching, storage deadlines, cancellation and caching

mod common;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use hh_route::build::{ArtifactWriter, HierarchyBuilder};
use hh_route::formats::{block, encode_artifact, Block};
use hh_route::store::{ByteSource, MemorySource};
use hh_route::{BuildConfig, Engine, EngineConfig, Error};
use tokio_util::sync::CancellationToken;

/// Memory source that stalls every read while `slow` is set
struct StallingSource {
    inner: MemorySource,
    slow: AtomicBool,
    delay: Duration,
}

impl ByteSource for StallingSource {
    fn len(&self) -> u64 {
        self.inner.len()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        if self.slow.load(Ordering::SeqCst) {
            std::thread::sleep(self.delay);
        }
        self.inner.read_at(offset, buf)
    }
}

/// Byte range of the first level-1 block.
fn level_one_block(bytes: &[u8]) -> (u32, usize, usize) {
    let engine = Engine::from_bytes(bytes.to_vec(), engine_config()).unwrap();
    let block = engine.header().levels[1].first_block;
    let (offset, len) = engine.graph().store().artifact().block_range(block).unwrap();
    (block, offset as usize, len)
}

#[test]
fn test_corrupt_block_poisons_the_engine() {
    let network = three_chains();
    let mut bytes = encode(&network, &BuildConfig::default());
    let (block, offset, len) = level_one_block(&bytes);
    bytes[offset..offset + len].fill(0xFF);

    let config = EngineConfig {
        verify_checksum: false,
        ..engine_config()
    };
    // level 0 is intact, so opening works
    let engine = Engine::from_bytes(bytes, config).unwrap();
    let ids = ids_by_index(&engine, &network);
    assert!(engine.failure().is_none());

    // a to b has to climb to level 1
    let err = engine.shortest_path(ids[0], ids[3]).unwrap_err();
    assert!(matches!(err, Error::CorruptBlock { block: b, .. } if b == block), "{err}");
    assert!(err.is_fatal());
    assert!(matches!(engine.failure(), Some(Error::CorruptBlock { .. })));

    // from now on nothing is served, not even trivial queries
    assert!(matches!(
        engine.shortest_path(ids[2], ids[2]),
        Err(Error::CorruptBlock { .. })
    ));
    assert!(matches!(engine.nearest_vertex(48.0, 11.0), Err(Error::CorruptBlock { .. })));
    assert!(matches!(engine.get_vertex(ids[0]), Err(Error::CorruptBlock { .. })));
}

/// Decode every block, let `edit` change it and lay the artifact out again.
fn rewrite_blocks(bytes: Vec<u8>, edit: impl Fn(&mut Block)) -> Vec<u8> {
    let engine = Engine::from_bytes(bytes, engine_config()).unwrap();
    let store = engine.graph().store();
    let blocks: Vec<Vec<u8>> = (0..store.num_blocks())
        .map(|id| {
            let mut decoded = (*store.get_block(id).unwrap()).clone();
            edit(&mut decoded);
            block::encode(&decoded, store.layout()).unwrap()
        })
        .collect();
    encode_artifact(
        engine.header().clone(),
        &blocks,
        store.artifact().distance_table.as_ref(),
    )
    .unwrap()
    .bytes
}

#[test]
fn test_dangling_pointer_poisons_the_engine() {
    let network = three_chains();
    let bytes = encode(&network, &BuildConfig::default());
    let clean = Engine::from_bytes(bytes.clone(), engine_config()).unwrap();
    let ids = ids_by_index(&clean, &network);
    let layout = clean.graph().ids();
    let a = ids[0];

    // a's overlying pointer names the level-1 block but no vertex in it
    let bytes = rewrite_blocks(bytes, |decoded| {
        if decoded.id == layout.block_of(a) {
            let v = &mut decoded.vertices[layout.offset_of(a) as usize];
            let up = v.overlying.expect("a is on level 1");
            v.overlying = Some(layout.vertex_id(layout.block_of(up), 40));
        }
    });
    let engine = Engine::from_bytes(bytes, engine_config()).unwrap();

    // the same kind of id from a caller is only a bad argument
    let err = engine.get_vertex(layout.vertex_id(layout.block_of(a), 40)).unwrap_err();
    assert!(matches!(err, Error::OutOfRange { .. }), "{err}");
    assert!(engine.failure().is_none());

    let err = engine.shortest_path(a, ids[3]).unwrap_err();
    assert!(matches!(err, Error::GraphInconsistency(_)), "{err}");
    assert!(matches!(engine.failure(), Some(Error::GraphInconsistency(_))));
    assert!(matches!(
        engine.shortest_path(ids[1], ids[2]),
        Err(Error::GraphInconsistency(_))
    ));
}

#[test]
fn test_checksums_catch_corruption_at_open() {
    let network = three_chains();
    let clean = encode(&network, &BuildConfig::default());
    let (_, offset, _) = level_one_block(&clean);

    let mut body = clean.clone();
    body[offset + 1] ^= 0x10;
    let err = Engine::from_bytes(body.clone(), engine_config()).err().expect("must fail");
    assert!(matches!(err, Error::InvalidArtifact(_)), "{err}");
    // skipping the body checksum defers the problem to query time
    assert!(Engine::from_bytes(
        body,
        EngineConfig {
            verify_checksum: false,
            ..engine_config()
        }
    )
    .is_ok());

    // the header is always checked
    let mut head = clean.clone();
    head[20] ^= 0x01;
    let err = Engine::from_bytes(
        head,
        EngineConfig {
            verify_checksum: false,
            ..engine_config()
        },
    )
    .err()
    .expect("must fail");
    assert!(matches!(err, Error::InvalidArtifact(_)), "{err}");

    let truncated = clean[..clean.len() / 2].to_vec();
    assert!(Engine::from_bytes(truncated, engine_config()).is_err());
    assert!(Engine::from_bytes(Vec::new(), engine_config()).is_err());
}

#[test]
fn test_slow_storage_times_out_and_recovers() {
    let network = three_chains();
    let source = Arc::new(StallingSource {
        inner: MemorySource::new(encode(&network, &BuildConfig::default())),
        slow: AtomicBool::new(false),
        delay: Duration::from_millis(400),
    });
    let config = EngineConfig {
        storage_timeout_ms: Some(40),
        reader_threads: 2,
        ..EngineConfig::default()
    };
    let engine = Engine::from_source(source.clone(), config).unwrap();
    let ids = ids_by_index(&engine, &network);

    source.slow.store(true, Ordering::SeqCst);
    let err = engine.shortest_path(ids[0], ids[3]).unwrap_err();
    assert!(matches!(err, Error::StorageTimeout { .. }), "{err}");
    assert!(err.is_retryable());
    assert!(engine.failure().is_none());

    source.slow.store(false, Ordering::SeqCst);
    // let the stalled worker finish its abandoned read
    std::thread::sleep(Duration::from_millis(500));
    let route = engine.shortest_path(ids[0], ids[3]).unwrap().unwrap();
    assert_eq!(route.distance, 8);
}

#[test]
fn test_cancelled_query() {
    let network = three_chains();
    let engine = engine(&network);
    let ids = ids_by_index(&engine, &network);

    let token = CancellationToken::new();
    token.cancel();
    let err = engine.shortest_path_cancellable(ids[0], ids[3], &token).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(engine.failure().is_none());

    let live = CancellationToken::new();
    let route = engine.shortest_path_cancellable(ids[0], ids[3], &live).unwrap();
    assert_eq!(route.map(|r| r.distance), Some(8));
}

#[test]
fn test_tiny_cache_evicts_but_answers_stay_the_same() {
    let network = grid(6, 6, 21, 0.1);
    let build = BuildConfig {
        block_vertices: 4,
        ..Default::default()
    };
    let roomy = engine_with(&network, &build, engine_config());
    let cramped = engine_with(
        &network,
        &build,
        EngineConfig {
            cache_bytes: 1,
            ..engine_config()
        },
    );
    let ids = ids_by_index(&roomy, &network);
    for &s in ids.iter().step_by(4) {
        for &t in ids.iter().step_by(3) {
            let a = roomy.shortest_path(s, t).unwrap().map(|r| r.distance);
            let b = cramped.shortest_path(s, t).unwrap().map(|r| r.distance);
            assert_eq!(a, b, "{s} -> {t}");
        }
    }

    let roomy_stats = roomy.cache_stats();
    assert_eq!(roomy_stats.evictions, 0);
    assert!(roomy_stats.hits > 0);
    assert!(roomy_stats.entries > 0);

    let cramped_stats = cramped.cache_stats();
    assert!(cramped_stats.evictions > 0, "{cramped_stats:?}");
    assert!(cramped_stats.misses > roomy_stats.misses, "{cramped_stats:?}");
}

#[test]
fn test_artifact_file_round_trip() {
    let network = three_chains();
    let build = BuildConfig::default();
    let hierarchy = HierarchyBuilder::new(build.clone()).build(&network).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chains.hh");
    let written = ArtifactWriter::new(build).write(&hierarchy, &path).unwrap();

    let engine = Engine::open(&path, EngineConfig::default()).unwrap();
    assert_eq!(engine.header(), &written);
    assert_eq!(engine.header().num_levels(), hierarchy.num_levels());

    let ids = ids_by_index(&engine, &network);
    assert_eq!(engine.shortest_path(ids[0], ids[3]).unwrap().unwrap().distance, 8);
    for (i, level) in hierarchy.levels.iter().enumerate() {
        assert_eq!(engine.header().levels[i].num_vertices as usize, level.vertices.len());
    }

    assert!(matches!(
        Engine::open(dir.path().join("missing.hh"), EngineConfig::default()),
        Err(Error::Io(_))
    ));
}

#[test]
fn test_concurrent_queries_agree_with_sequential() {
    let network = grid(7, 7, 13, 0.1);
    let engine = engine_with(
        &network,
        &BuildConfig {
            block_vertices: 8,
            ..Default::default()
        },
        EngineConfig {
            cache_bytes: 4 * 1024,
            ..EngineConfig::default()
        },
    );
    let ids = ids_by_index(&engine, &network);
    let pairs: Vec<_> = ids
        .iter()
        .flat_map(|&s| ids.iter().step_by(5).map(move |&t| (s, t)))
        .collect();
    let expected: Vec<_> = pairs
        .iter()
        .map(|&(s, t)| engine.shortest_path(s, t).unwrap().map(|r| r.distance))
        .collect();

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let engine = &engine;
            let pairs = &pairs;
            let expected = &expected;
            scope.spawn(move || {
                for (i, &(s, t)) in pairs.iter().enumerate().skip(worker) {
                    let got = engine.shortest_path(s, t).unwrap().map(|r| r.distance);
                    assert_eq!(got, expected[i], "{s} -> {t}");
                }
            });
        }
    });
    assert!(engine.failure().is_none());
}

#[test]
fn test_invalid_config_is_rejected() {
    let bytes = encode(&three_chains(), &BuildConfig::default());
    let err = Engine::from_bytes(
        bytes,
        EngineConfig {
            cache_bytes: 0,
            ..engine_config()
        },
    )
    .err()
    .expect("must fail");
    assert!(matches!(err, Error::InvalidInput(_)));
}
