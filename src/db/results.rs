//! Result types for store methods.
use std::collections::HashMap;

use diesel::Queryable;
use serde::{Deserialize, Serialize};

use crate::db::util::SyncTimestamp;

pub type GetBsoTimestamp = SyncTimestamp;
pub type GetCollectionTimestamps = HashMap<String, SyncTimestamp>;
pub type GetCollectionTimestamp = SyncTimestamp;
pub type GetCollectionCounts = HashMap<String, i64>;
pub type GetCollectionUsage = HashMap<String, i64>;
pub type GetStorageTimestamp = SyncTimestamp;
pub type GetStorageUsage = u64;
pub type DeleteStorage = SyncTimestamp;
pub type DeleteCollection = SyncTimestamp;
pub type DeleteBsos = SyncTimestamp;
pub type DeleteBso = SyncTimestamp;
pub type PutBso = SyncTimestamp;
pub type TouchCollection = SyncTimestamp;

pub type CreateBatch = i64;
pub type ValidateBatch = bool;
pub type AppendToBatch = ();
pub type DeleteBatch = ();
pub type CommitBatch = PostBsos;
pub type PurgeExpired = usize;
pub type PurgeBatches = usize;

#[derive(Debug, Default, Deserialize, Queryable, Serialize)]
pub struct GetBso {
    pub id: String,
    pub modified: SyncTimestamp,
    pub payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sortindex: Option<i32>,
    // NOTE: expiry (ttl) is never rendered to clients and only loaded for
    // tests: this and its associated queries/loading could be wrapped in
    // #[cfg(test)]
    #[serde(skip_serializing)]
    #[serde(skip_deserializing)]
    pub expiry: i64,
}

#[derive(Debug, Default)]
pub struct Paginated<T>
where
    T: Serialize,
{
    pub items: Vec<T>,
    pub offset: Option<String>,
}

pub type GetBsos = Paginated<GetBso>;
pub type GetBsoIds = Paginated<String>;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PostBsos {
    pub modified: SyncTimestamp,
    pub success: Vec<String>,
    pub failed: HashMap<String, String>,
}

/// One row out of the batches table.
#[derive(Debug, Default, Queryable)]
pub struct GetBatch {
    pub id: i64,
    pub collection_id: i32,
    pub modified: SyncTimestamp,
    pub bsos: String,
}

/// Raw page accounting for one store, reported by SQLite itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct StorageUsage {
    pub page_size: i64,
    pub total_pages: i64,
    pub free_pages: i64,
}

impl StorageUsage {
    pub fn free_bytes(&self) -> i64 {
        self.page_size * self.free_pages
    }

    /// Free pages as a share of the whole file, in percent.
    pub fn free_percent(&self) -> u32 {
        if self.total_pages == 0 {
            return 0;
        }
        (self.free_pages * 100 / self.total_pages) as u32
    }
}
