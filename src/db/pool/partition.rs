//! One shard of the store pool: a keyed LRU of elements.
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::element::Element;
use super::path::{db_path, MEMORY_URL};
use super::tidy::{tidy_up, TidySettings};
use crate::db::{store::Store, BlockingThreadpool, DbError, DbResult};
use crate::server::metrics::Metrics;

pub struct Partition {
    base_dir: PathBuf,
    max_size: usize,
    inner: Mutex<PartitionInner>,
    metrics: Metrics,
}

#[derive(Default)]
struct PartitionInner {
    map: HashMap<String, Arc<Element>>,
    /// front = most recently used
    lru: VecDeque<String>,
    stopped: bool,
}

impl PartitionInner {
    fn promote(&mut self, uid: &str) {
        self.lru.retain(|entry| entry != uid);
        self.lru.push_front(uid.to_owned());
    }

    fn remove(&mut self, uid: &str) {
        self.map.remove(uid);
        self.lru.retain(|entry| entry != uid);
    }
}

impl Partition {
    pub fn new(base_dir: PathBuf, max_size: usize, metrics: Metrics) -> Self {
        Partition {
            base_dir,
            max_size: max_size.max(1),
            inner: Mutex::new(PartitionInner::default()),
            metrics,
        }
    }

    fn inner(&self) -> MutexGuard<'_, PartitionInner> {
        // the lock is only held for map/list mutation, never across disk I/O
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn database_url(&self, uid: &str) -> (String, Option<PathBuf>) {
        if self.base_dir.as_os_str() == MEMORY_URL {
            return (MEMORY_URL.to_owned(), None);
        }
        let path = db_path(&self.base_dir, uid);
        let dir = path.parent().map(|parent| parent.to_path_buf());
        (path.to_string_lossy().into_owned(), dir)
    }

    /// Look up (or lazily open) the element for `uid`.
    ///
    /// A hit on a Stopping/Stopped element surfaces as `ElementStopped`; the
    /// caller retries, by which time the element has been unlinked and a
    /// fresh one can open.
    pub async fn element(
        &self,
        uid: &str,
        blocking_threadpool: &Arc<BlockingThreadpool>,
    ) -> DbResult<Arc<Element>> {
        {
            let mut inner = self.inner();
            if inner.stopped {
                return Err(DbError::pool_stopped());
            }
            if let Some(element) = inner.map.get(uid).cloned() {
                if !element.is_open() {
                    return Err(DbError::element_stopped());
                }
                element.touch();
                inner.promote(uid);
                return Ok(element);
            }
        }

        // open the store outside the partition lock
        let (url, dir) = self.database_url(uid);
        let store = blocking_threadpool
            .spawn(move || {
                if let Some(dir) = dir {
                    std::fs::create_dir_all(dir)?;
                }
                Store::open(&url)
            })
            .await?;
        self.metrics.incr("storage.pool.element.open");

        let element = Arc::new(Element::new(uid.to_owned(), store));
        let evicted = {
            let mut inner = self.inner();
            if inner.stopped {
                return Err(DbError::pool_stopped());
            }
            if let Some(existing) = inner.map.get(uid).cloned() {
                // another request opened this user first; ours just gets
                // dropped
                if !existing.is_open() {
                    return Err(DbError::element_stopped());
                }
                existing.touch();
                inner.promote(uid);
                return Ok(existing);
            }
            inner.map.insert(uid.to_owned(), Arc::clone(&element));
            inner.lru.push_front(uid.to_owned());

            if inner.map.len() > self.max_size {
                // shed ~10% of the tail so overflow doesn't evict one-by-one
                let shed = (self.max_size / 10).max(1);
                let mut evicted = Vec::with_capacity(shed);
                for _ in 0..shed {
                    let uid = match inner.lru.pop_back() {
                        Some(uid) => uid,
                        None => break,
                    };
                    if let Some(element) = inner.map.remove(&uid) {
                        evicted.push(element);
                    }
                }
                evicted
            } else {
                Vec::new()
            }
        };

        for element in evicted {
            debug!("Evicting overflow element"; "uid" => element.uid());
            self.metrics.incr("storage.pool.element.evict");
            element.stop(true).await;
        }

        Ok(element)
    }

    /// Walk the LRU from the tail, closing elements idle at least `ttl`.
    /// An element with a request in flight is skipped, not waited on.
    pub async fn evict_idle(&self, ttl: Duration) {
        let candidates: Vec<Arc<Element>> = {
            let inner = self.inner();
            let mut picked = Vec::new();
            for uid in inner.lru.iter().rev() {
                let element = match inner.map.get(uid) {
                    Some(element) => element,
                    None => continue,
                };
                if element.idle_for() < ttl {
                    // everything closer to the front is fresher
                    break;
                }
                picked.push(Arc::clone(element));
            }
            picked
        };

        for element in candidates {
            if element.try_stop(true) {
                debug!("Evicting idle element"; "uid" => element.uid());
                self.metrics.incr("storage.pool.element.evict");
                self.inner().remove(element.uid());
            }
        }
    }

    /// One background tick: drop idle elements, then run the purge gate on
    /// the survivors.
    pub async fn tick(
        &self,
        ttl: Duration,
        tidy: &TidySettings,
        blocking_threadpool: &Arc<BlockingThreadpool>,
    ) {
        self.evict_idle(ttl).await;

        let elements: Vec<Arc<Element>> = self.inner().map.values().cloned().collect();
        for element in elements {
            let _guard = element.acquire().await;
            let store = match element.store() {
                Ok(store) => store,
                Err(_) => continue,
            };
            let tidy = tidy.clone();
            if let Err(e) = blocking_threadpool
                .spawn(move || tidy_up(&store, &tidy))
                .await
            {
                warn!("Tidy failed"; "uid" => element.uid(), "error" => e.to_string());
            }
        }
    }

    /// Refuse new elements and stop every existing one, waiting out
    /// in-flight requests.
    pub async fn stop_all(&self) {
        let elements: Vec<Arc<Element>> = {
            let mut inner = self.inner();
            inner.stopped = true;
            inner.lru.clear();
            inner.map.drain().map(|(_, element)| element).collect()
        };
        for element in elements {
            element.stop(true).await;
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner().map.len()
    }
}
