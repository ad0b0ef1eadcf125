//! Per-user storage: one SQLite database per user, fronted by a sharded
//! pool of lazily-opened stores.
pub mod error;
pub mod params;
pub mod pool;
pub mod results;
pub mod store;
#[cfg(test)]
mod tests;
pub mod user;
pub mod util;

use std::sync::atomic::{AtomicU64, Ordering};

use actix_web::web;
use lazy_static::lazy_static;
use serde::Deserialize;

pub use error::{DbError, DbErrorKind};
pub use user::UserDb;
pub use util::SyncTimestamp;

pub type DbResult<T> = Result<T, DbError>;

lazy_static! {
    /// For efficiency, it's possible to use fixed pre-determined IDs for
    /// common collection names.  This is the canonical list of such
    /// names.  Non-standard collections will be allocated IDs starting
    /// from the highest ID in this collection.
    pub static ref STD_COLLS: Vec<(i32, &'static str)> = {
        vec![
        (1, "clients"),
        (2, "crypto"),
        (3, "forms"),
        (4, "history"),
        (5, "keys"),
        (6, "meta"),
        (7, "bookmarks"),
        (8, "prefs"),
        (9, "tabs"),
        (10, "passwords"),
        (11, "addons"),
        (12, "addresses"),
        (13, "creditcards"),
        ]
    };
}

/// Rough guesstimate of the maximum reasonable life span of a batch
pub const BATCH_LIFETIME: i64 = 2 * 60 * 60 * 1000; // 2 hours, in milliseconds

/// The ttl to use for rows that are never supposed to expire (in seconds)
pub const DEFAULT_BSO_TTL: u32 = 2_100_000_000;

/// Non-standard collections will be allocated IDs beginning with this value
pub const FIRST_CUSTOM_COLLECTION_ID: i32 = 100;

/// Key under which a store records the timestamp of its last mutation.
pub const STORAGE_LAST_MODIFIED: &str = "STORAGE_LAST_MODIFIED";

/// Key under which a store records when its next maintenance pass is due.
pub const NEXT_PURGE: &str = "NEXT_PURGE";

#[derive(Debug, Default, Deserialize, Clone, PartialEq, Eq, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Sorting {
    #[default]
    None,
    Newest,
    Oldest,
    Index,
}

/// A threadpool on which callers can spawn non-CPU-bound tasks that block
/// their thread (this is mostly useful for running I/O tasks).
/// `BlockingThreadpool` intentionally does not implement `Clone`: `Arc`s are
/// not used internally, so a `BlockingThreadpool` should be instantiated once
/// and shared by passing around `Arc<BlockingThreadpool>`s.
#[derive(Debug, Default)]
pub struct BlockingThreadpool {
    spawned_tasks: AtomicU64,
}

impl BlockingThreadpool {
    /// Runs a function as a task on the blocking threadpool.
    ///
    /// WARNING: Spawning a blocking task through means other than calling
    /// this method will result in inaccurate threadpool metrics being
    /// reported. If you want to spawn a task on the blocking threadpool, you
    /// **must** use this function.
    pub async fn spawn<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce() -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.spawned_tasks.fetch_add(1, Ordering::Relaxed);

        let result = web::block(f).await.unwrap_or_else(|_| {
            Err(DbError::internal(
                "Blocking threadpool operation canceled".to_owned(),
            ))
        });

        self.spawned_tasks.fetch_sub(1, Ordering::Relaxed);

        result
    }

    pub fn active_threads(&self) -> u64 {
        self.spawned_tasks.load(Ordering::Relaxed)
    }
}
