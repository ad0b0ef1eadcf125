//! The sharded pool of per-user stores.
pub mod dispatcher;
pub mod element;
pub mod partition;
pub mod path;
pub mod tidy;

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

pub use element::Element;
pub use partition::Partition;
pub use tidy::TidySettings;

use crate::db::{BlockingThreadpool, DbError, DbResult};
use crate::server::metrics::Metrics;
use crate::settings::StorageSettings;

pub struct StorePool {
    partitions: Vec<Arc<Partition>>,
    blocking_threadpool: Arc<BlockingThreadpool>,
    tidy: TidySettings,
    element_ttl: Duration,
    base_dir: PathBuf,
    stopped: AtomicBool,
}

impl StorePool {
    pub fn from_settings(settings: &StorageSettings, metrics: &Metrics) -> DbResult<Arc<Self>> {
        let partition_count = if settings.num_partitions == 0 {
            num_cpus::get()
        } else {
            settings.num_partitions as usize
        };
        let base_dir = PathBuf::from(&settings.database_path);
        if settings.database_path != path::MEMORY_URL && !base_dir.exists() {
            std::fs::create_dir_all(&base_dir).map_err(|e| {
                DbError::internal(format!(
                    "Could not create base directory {:?}: {}",
                    base_dir, e
                ))
            })?;
        }

        let partitions = (0..partition_count)
            .map(|_| {
                Arc::new(Partition::new(
                    base_dir.clone(),
                    settings.partition_size as usize,
                    metrics.clone(),
                ))
            })
            .collect();

        Ok(Arc::new(StorePool {
            partitions,
            blocking_threadpool: Arc::new(BlockingThreadpool::default()),
            tidy: TidySettings {
                min_purge: Duration::from_secs(settings.min_purge_secs),
                max_purge: Duration::from_secs(settings.max_purge_secs.max(settings.min_purge_secs)),
                vacuum_free_percent: settings.vacuum_free_percent,
            },
            element_ttl: Duration::from_secs(settings.element_ttl_secs.max(1)),
            base_dir,
            stopped: AtomicBool::new(false),
        }))
    }

    /// One maintenance loop per partition: evict idle elements, then run the
    /// purge gate over the survivors.
    pub fn spawn_tidy_loops(self: &Arc<Self>) {
        for partition in &self.partitions {
            let pool = Arc::clone(self);
            let partition = Arc::clone(partition);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(pool.element_ttl).await;
                    if pool.is_stopped() {
                        break;
                    }
                    partition
                        .tick(pool.element_ttl, &pool.tidy, &pool.blocking_threadpool)
                        .await;
                }
            });
        }
    }

    /// Verify the backing storage is still there: the base directory must
    /// exist and be a directory. Memory pools have nothing on disk to lose.
    pub fn check(&self) -> DbResult<bool> {
        if self.base_dir.as_os_str() == path::MEMORY_URL {
            return Ok(true);
        }
        let metadata = std::fs::metadata(&self.base_dir).map_err(|e| {
            DbError::internal(format!(
                "Can't read storage directory {:?}: {}",
                self.base_dir, e
            ))
        })?;
        Ok(metadata.is_dir())
    }

    /// Route `uid` to its partition and fetch (or open) its element.
    pub async fn element(&self, uid: &str) -> DbResult<Arc<Element>> {
        if self.is_stopped() {
            return Err(DbError::pool_stopped());
        }
        let index = dispatcher::partition_index(uid, self.partitions.len());
        self.partitions[index]
            .element(uid, &self.blocking_threadpool)
            .await
    }

    pub fn blocking_threadpool(&self) -> &Arc<BlockingThreadpool> {
        &self.blocking_threadpool
    }

    #[cfg(test)]
    pub fn partitions(&self) -> &[Arc<Partition>] {
        &self.partitions
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// Quiescent shutdown: new requests bounce immediately, the tidy loops
    /// wind down, and every element waits out its in-flight request before
    /// its store closes.
    pub async fn stop_all(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        for partition in &self.partitions {
            partition.stop_all().await;
        }
    }
}

impl std::fmt::Debug for StorePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorePool")
            .field("partitions", &self.partitions.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
