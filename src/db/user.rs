//! Per-request async facade over one user's store.
use std::sync::Arc;

use super::pool::Element;
use super::store::Store;
use super::{params, results, BlockingThreadpool, DbResult, SyncTimestamp};

/// A `UserDb` is created once per request, after the per-user request lock
/// is held. Every call hops to the blocking threadpool because the store's
/// diesel calls are synchronous.
///
/// The timestamp is fixed at creation (after the write-serialization sleep),
/// so every mutation in one request shares one `modified` value.
#[derive(Clone)]
pub struct UserDb {
    element: Arc<Element>,
    blocking_threadpool: Arc<BlockingThreadpool>,
    timestamp: SyncTimestamp,
}

impl UserDb {
    pub fn new(
        element: Arc<Element>,
        blocking_threadpool: Arc<BlockingThreadpool>,
        timestamp: SyncTimestamp,
    ) -> Self {
        Self {
            element,
            blocking_threadpool,
            timestamp,
        }
    }

    pub fn timestamp(&self) -> SyncTimestamp {
        self.timestamp
    }

    async fn run<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(Arc<Store>) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.element.store()?;
        self.blocking_threadpool.spawn(move || f(store)).await
    }

    pub async fn get_collection_timestamps(&self) -> DbResult<results::GetCollectionTimestamps> {
        self.run(|store| store.get_collection_timestamps()).await
    }

    pub async fn get_collection_timestamp(
        &self,
        params: params::GetCollectionTimestamp,
    ) -> DbResult<results::GetCollectionTimestamp> {
        self.run(move |store| store.get_collection_timestamp(params))
            .await
    }

    pub async fn get_collection_counts(&self) -> DbResult<results::GetCollectionCounts> {
        let now = self.timestamp;
        self.run(move |store| store.get_collection_counts(now)).await
    }

    pub async fn get_collection_usage(&self) -> DbResult<results::GetCollectionUsage> {
        let now = self.timestamp;
        self.run(move |store| store.get_collection_usage(now)).await
    }

    pub async fn get_storage_timestamp(&self) -> DbResult<results::GetStorageTimestamp> {
        self.run(|store| store.last_modified()).await
    }

    pub async fn get_storage_usage(&self) -> DbResult<results::GetStorageUsage> {
        let now = self.timestamp;
        self.run(move |store| store.get_storage_usage(now)).await
    }

    pub async fn delete_storage(&self) -> DbResult<results::DeleteStorage> {
        let modified = self.timestamp;
        self.run(move |store| store.delete_everything(modified))
            .await
    }

    pub async fn delete_collection(
        &self,
        params: params::DeleteCollection,
    ) -> DbResult<results::DeleteCollection> {
        let modified = self.timestamp;
        self.run(move |store| store.delete_collection(modified, params))
            .await
    }

    pub async fn delete_bsos(&self, params: params::DeleteBsos) -> DbResult<results::DeleteBsos> {
        let modified = self.timestamp;
        self.run(move |store| store.delete_bsos(modified, params))
            .await
    }

    pub async fn delete_bso(&self, params: params::DeleteBso) -> DbResult<results::DeleteBso> {
        let modified = self.timestamp;
        self.run(move |store| store.delete_bso(modified, params))
            .await
    }

    pub async fn get_bsos(&self, params: params::GetBsos) -> DbResult<results::GetBsos> {
        let now = self.timestamp;
        self.run(move |store| store.get_bsos(now, params)).await
    }

    pub async fn get_bso_ids(&self, params: params::GetBsoIds) -> DbResult<results::GetBsoIds> {
        let now = self.timestamp;
        self.run(move |store| store.get_bso_ids(now, params)).await
    }

    pub async fn get_bso(&self, params: params::GetBso) -> DbResult<Option<results::GetBso>> {
        let now = self.timestamp;
        self.run(move |store| store.get_bso(now, params)).await
    }

    pub async fn get_bso_timestamp(
        &self,
        params: params::GetBsoTimestamp,
    ) -> DbResult<results::GetBsoTimestamp> {
        let now = self.timestamp;
        self.run(move |store| store.get_bso_timestamp(now, params))
            .await
    }

    pub async fn put_bso(&self, params: params::PutBso) -> DbResult<results::PutBso> {
        let modified = self.timestamp;
        self.run(move |store| store.put_bso(modified, params)).await
    }

    pub async fn post_bsos(&self, params: params::PostBsos) -> DbResult<results::PostBsos> {
        let modified = self.timestamp;
        self.run(move |store| store.post_bsos(modified, params))
            .await
    }

    pub async fn create_batch(&self, params: params::CreateBatch) -> DbResult<results::CreateBatch> {
        let modified = self.timestamp;
        self.run(move |store| store.create_batch(modified, params))
            .await
    }

    pub async fn validate_batch(
        &self,
        params: params::ValidateBatch,
    ) -> DbResult<results::ValidateBatch> {
        let now = self.timestamp;
        self.run(move |store| store.validate_batch(now, params))
            .await
    }

    pub async fn append_to_batch(
        &self,
        params: params::AppendToBatch,
    ) -> DbResult<results::AppendToBatch> {
        let modified = self.timestamp;
        self.run(move |store| store.append_to_batch(modified, params))
            .await
    }

    pub async fn get_batch(&self, params: params::GetBatch) -> DbResult<Option<results::GetBatch>> {
        self.run(move |store| store.get_batch(params)).await
    }

    pub async fn commit_batch(&self, params: params::CommitBatch) -> DbResult<results::CommitBatch> {
        let modified = self.timestamp;
        self.run(move |store| store.commit_batch(modified, params))
            .await
    }

    pub async fn delete_batch(&self, params: params::DeleteBatch) -> DbResult<results::DeleteBatch> {
        self.run(move |store| store.delete_batch(params)).await
    }

    /// Retrieve the timestamp for an item/collection, for conditional
    /// request evaluation. An absent collection or BSO reads as 0.
    pub async fn extract_resource(
        &self,
        collection: Option<String>,
        bso: Option<String>,
    ) -> DbResult<SyncTimestamp> {
        match collection {
            None => {
                // No collection specified, return overall storage timestamp
                self.get_storage_timestamp().await
            }
            Some(collection) => match bso {
                None => self
                    .get_collection_timestamp(params::GetCollectionTimestamp { collection })
                    .await
                    .or_else(|e| {
                        if e.is_collection_not_found() {
                            Ok(SyncTimestamp::zero())
                        } else {
                            Err(e)
                        }
                    }),
                Some(bso) => self
                    .get_bso_timestamp(params::GetBsoTimestamp {
                        collection,
                        id: bso,
                    })
                    .await
                    .or_else(|e| {
                        if e.is_collection_not_found() {
                            Ok(SyncTimestamp::zero())
                        } else {
                            Err(e)
                        }
                    }),
            },
        }
    }
}

impl std::fmt::Debug for UserDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserDb")
            .field("timestamp", &self.timestamp)
            .finish()
    }
}
