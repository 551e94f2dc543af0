mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{add_hosts, StallingStore};
use downsample_store::{
    DatasetRef, DownsampleConfig, DownsampledTimeSeriesStore, IndexState, MemoryColumnStore, ReadableTimeSeriesStore,
    Schema, ShardError, ShardRegistry, StaticSchemaRegistry, StoreConfig, TermInfo, TimeRange,
};
use tokio_util::sync::CancellationToken;

fn dataset() -> DatasetRef {
    DatasetRef::new("metrics_ds_5")
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn reads_during_recovery_see_whole_snapshots() -> anyhow::Result<()> {
    let store = MemoryColumnStore::new();
    let registry = Arc::new(ShardRegistry::new(Arc::new(store.clone()), CancellationToken::new()));
    let config = StoreConfig::new().with_part_key_page_size(1);
    let index = registry.setup(&dataset(), 0, Schema::gauge(), config, DownsampleConfig::default())?;

    add_hosts(&store, &dataset(), 0, "a", 3);
    index.recover_index().await?;

    let old = vec![TermInfo::new("a", 3)];
    let new = vec![TermInfo::new("b", 5)];

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let index = index.clone();
            let (old, new) = (old.clone(), new.clone());
            tokio::spawn(async move {
                for _ in 0..500 {
                    let values = index.label_values("host", 10).unwrap();
                    assert!(values == old || values == new, "torn read: {:?}", values);

                    let count = index
                        .part_keys_with_filters(Vec::new(), TimeRange::all(), usize::MAX)
                        .unwrap()
                        .count();
                    assert!(count == 3 || count == 5, "torn read: {} partitions", count);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    // Flip the persisted state back and forth while readers run
    for round in 0..10 {
        store.clear_shard(&dataset(), 0);
        if round % 2 == 0 {
            add_hosts(&store, &dataset(), 0, "b", 5);
        } else {
            add_hosts(&store, &dataset(), 0, "a", 3);
        }
        index.recover_index().await?;
    }

    for reader in readers {
        reader.await?;
    }
    assert_eq!(index.shard_stats().recoveries, 11);
    assert_eq!(index.label_values("host", 10)?, old);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn shutdown_cancels_recovery_and_keeps_snapshot() -> anyhow::Result<()> {
    let memory = MemoryColumnStore::new();
    add_hosts(&memory, &dataset(), 0, "a", 4);
    let store = Arc::new(StallingStore::new(memory.clone()));
    let shutdown = CancellationToken::new();
    let registry = ShardRegistry::new(store.clone(), shutdown.clone());

    let config = StoreConfig::new().with_part_key_page_size(1);
    let index = registry.setup(&dataset(), 0, Schema::gauge(), config, DownsampleConfig::default())?;
    assert_eq!(index.recover_index().await?, 1);

    store.set_stalled(true);
    let recovering = {
        let index = index.clone();
        tokio::spawn(async move { index.recover_index().await })
    };

    while index.state() != IndexState::Indexing {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    // Reads are still served from the previous snapshot
    assert_eq!(index.label_values("host", 1)?, vec![TermInfo::new("a", 4)]);

    shutdown.cancel();
    let err = recovering.await?.unwrap_err();
    assert!(matches!(err, ShardError::Cancelled { shard: 0, .. }));

    assert_eq!(index.state(), IndexState::Ready);
    assert_eq!(index.shard_stats().generation, 1);
    assert_eq!(index.shard_stats().recovery_failures, 1);
    assert_eq!(memory.open_cursors(), 0);
    Ok(())
}

#[tokio::test]
async fn recoveries_of_one_shard_are_serialized() -> anyhow::Result<()> {
    let store = MemoryColumnStore::new();
    add_hosts(&store, &dataset(), 0, "a", 20);
    let registry = ShardRegistry::new(Arc::new(store.clone()), CancellationToken::new());
    let config = StoreConfig::new().with_part_key_page_size(3);
    let index = registry.setup(&dataset(), 0, Schema::gauge(), config, DownsampleConfig::default())?;

    let (first, second) = tokio::join!(index.recover_index(), index.recover_index());
    let mut generations = vec![first?, second?];
    generations.sort_unstable();
    assert_eq!(generations, vec![1, 2]);
    assert_eq!(index.shard_stats().generation, 2);
    assert_eq!(index.shard_stats().num_partitions, 20);
    Ok(())
}

#[tokio::test]
async fn store_unavailable_is_propagated() -> anyhow::Result<()> {
    let memory = MemoryColumnStore::new();
    let ds = dataset();
    add_hosts(&memory, &ds, 0, "a", 2);

    let schemas = StaticSchemaRegistry::new().with_schema(ds.clone(), Schema::gauge());
    let store = DownsampledTimeSeriesStore::new(
        Arc::new(memory.clone()),
        Arc::new(schemas),
        StoreConfig::default(),
        DownsampleConfig::default(),
    )?;
    store.setup_shard(&ds, 0)?;

    memory.set_available(false);
    let err = store.recover_index(&ds, 0).await.unwrap_err();
    assert!(err.is_store_unavailable());
    assert!(err.suggestion().is_some());

    // Still no snapshot, which is not the same as zero matches
    let err = store.label_values(&ds, 0, "host", 10).unwrap_err();
    assert!(matches!(err.as_shard_error(), Some(ShardError::IndexNotReady { .. })));

    memory.set_available(true);
    store.recover_index(&ds, 0).await?;
    assert_eq!(store.label_values(&ds, 0, "host", 10)?, vec![TermInfo::new("a", 2)]);
    Ok(())
}
