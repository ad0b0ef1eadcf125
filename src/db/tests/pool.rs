use std::sync::Arc;
use std::time::Duration;

use super::support::{gbso, memory_store, pbso};
use crate::db::pool::{path::MEMORY_URL, tidy, StorePool, TidySettings};
use crate::db::{DbResult, SyncTimestamp, NEXT_PURGE};
use crate::server::metrics::Metrics;
use crate::settings::StorageSettings;

fn pool_settings(partitions: u32, partition_size: u32) -> StorageSettings {
    StorageSettings {
        database_path: MEMORY_URL.to_owned(),
        num_partitions: partitions,
        partition_size,
        element_ttl_secs: 60,
        vacuum_free_percent: 10,
        min_purge_secs: 1,
        max_purge_secs: 2,
    }
}

fn test_pool(partitions: u32, partition_size: u32) -> Arc<StorePool> {
    StorePool::from_settings(&pool_settings(partitions, partition_size), &Metrics::noop())
        .expect("Could not build pool")
}

#[tokio::test]
async fn element_is_reused_for_a_uid() -> DbResult<()> {
    let pool = test_pool(2, 10);
    let first = pool.element("alice").await?;
    let second = pool.element("alice").await?;
    assert!(Arc::ptr_eq(&first, &second));
    assert!(first.is_open());
    Ok(())
}

#[tokio::test]
async fn different_users_can_work_in_parallel() -> DbResult<()> {
    let pool = test_pool(4, 10);
    let alice = pool.element("alice").await?;
    let bob = pool.element("bob").await?;

    let ts = SyncTimestamp::now();
    alice
        .store()?
        .put_bso(ts, pbso("bookmarks", "b0", Some("alice data"), None, None))?;
    assert!(bob.store()?.get_bso(ts, gbso("bookmarks", "b0"))?.is_none());
    Ok(())
}

#[tokio::test]
async fn overflow_evicts_the_lru_tail() -> DbResult<()> {
    let pool = test_pool(1, 2);
    pool.element("user1").await?;
    pool.element("user2").await?;
    let first = pool.element("user1").await?; // refresh user1
    pool.element("user3").await?; // overflows, sheds the tail (user2)

    let open: usize = pool.partitions().iter().map(|p| p.len()).sum();
    assert!(open <= 2);
    // user1 was refreshed, so it survived
    assert!(first.is_open());
    // the shed user opens again from scratch
    let again = pool.element("user2").await?;
    assert!(again.is_open());
    Ok(())
}

#[tokio::test]
async fn idle_elements_are_evicted() -> DbResult<()> {
    let pool = test_pool(1, 10);
    let element = pool.element("alice").await?;

    let partition = &pool.partitions()[0];
    partition.evict_idle(Duration::from_secs(0)).await;

    assert!(!element.is_open());
    assert!(element.store().is_err());
    assert_eq!(partition.len(), 0);

    // the next request simply reopens
    let fresh = pool.element("alice").await?;
    assert!(fresh.is_open());
    Ok(())
}

#[tokio::test]
async fn busy_elements_survive_idle_eviction() -> DbResult<()> {
    let pool = test_pool(1, 10);
    let element = pool.element("alice").await?;
    let guard = element.acquire().await;

    let partition = &pool.partitions()[0];
    partition.evict_idle(Duration::from_secs(0)).await;

    // in-flight request: the walk skipped us
    assert!(element.is_open());
    assert_eq!(partition.len(), 1);
    drop(guard);

    partition.evict_idle(Duration::from_secs(0)).await;
    assert!(!element.is_open());
    Ok(())
}

#[tokio::test]
async fn stopped_pool_refuses_requests() -> DbResult<()> {
    let pool = test_pool(2, 10);
    let element = pool.element("alice").await?;

    pool.stop_all().await;

    assert!(!element.is_open());
    let err = pool.element("alice").await.unwrap_err();
    assert!(err.is_pool_stopped());
    let err = pool.element("somebody-new").await.unwrap_err();
    assert!(err.is_pool_stopped());
    Ok(())
}

#[tokio::test]
async fn stopping_element_waits_for_inflight_request() -> DbResult<()> {
    let pool = test_pool(1, 10);
    let element = pool.element("alice").await?;
    let store = element.store()?;

    let guard = element.acquire().await;
    let stopper = {
        let element = Arc::clone(&element);
        tokio::spawn(async move { element.stop(false).await })
    };

    // the stop is pending behind our request; the store handle we grabbed
    // keeps working
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!stopper.is_finished());
    let ts = SyncTimestamp::now();
    store.put_bso(ts, pbso("bookmarks", "b0", Some("racing"), None, None))?;

    drop(guard);
    stopper.await.expect("stop task panicked");
    assert!(element.store().is_err());
    Ok(())
}

#[test]
fn check_probes_the_base_directory() -> DbResult<()> {
    use rand::{distributions::Alphanumeric, thread_rng, Rng};

    // a memory pool has nothing on disk to check
    assert!(test_pool(1, 10).check()?);

    let name: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    let base = std::env::temp_dir().join(format!("syncshard-pool-{}", name));
    let settings = StorageSettings {
        database_path: base.to_string_lossy().into_owned(),
        ..pool_settings(1, 10)
    };
    let pool = StorePool::from_settings(&settings, &Metrics::noop())?;
    assert!(pool.check()?);

    // losing the backing directory must fail the health check
    std::fs::remove_dir_all(&base)?;
    assert!(pool.check().is_err());
    Ok(())
}

#[test]
fn tidy_first_sighting_only_schedules() -> DbResult<()> {
    let store = memory_store();
    let settings = TidySettings {
        min_purge: Duration::from_secs(60),
        max_purge: Duration::from_secs(120),
        vacuum_free_percent: 10,
    };

    // first pass arms the gate without purging
    assert!(!tidy::tidy_up(&store, &settings)?);
    assert!(store.get_key(NEXT_PURGE)?.is_some());

    // still in the future: skipped
    assert!(!tidy::tidy_up(&store, &settings)?);
    Ok(())
}

#[test]
fn tidy_purges_once_due() -> DbResult<()> {
    let store = memory_store();
    let settings = TidySettings {
        min_purge: Duration::from_secs(60),
        max_purge: Duration::from_secs(120),
        vacuum_free_percent: 100,
    };

    let ts = SyncTimestamp::now();
    store.put_bso(ts, pbso("bookmarks", "doomed", Some("x"), None, Some(1)))?;

    // force the gate into the past
    store.set_key(NEXT_PURGE, "1")?;
    assert!(tidy::tidy_up(&store, &settings)?);

    // the expired row is gone for good and the gate is re-armed
    let now = SyncTimestamp::now();
    assert_eq!(store.purge_expired(now)?, 0);
    let due = store
        .get_key(NEXT_PURGE)?
        .expect("Could not get NEXT_PURGE")
        .parse::<i64>()
        .expect("Bad NEXT_PURGE");
    assert!(due >= now.as_i64() + 60 * 1000 - 1000);
    Ok(())
}
