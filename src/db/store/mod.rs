//! A `Store` is the single-writer gateway to one user's SQLite database.
//!
//! All access is serialized behind a mutex around the store's only
//! connection; every mutating operation runs inside a transaction.
mod batch;
mod models;
pub(crate) mod schema;

use std::sync::{Mutex, MutexGuard};

use diesel::{
    connection::SimpleConnection,
    sql_query,
    sql_types::Text,
    sqlite::SqliteConnection,
    Connection, ExpressionMethods, OptionalExtension, QueryDsl, QueryableByName, RunQueryDsl,
};

use super::{results, DbError, DbResult, SyncTimestamp, STD_COLLS, STORAGE_LAST_MODIFIED};
use schema::{key_values, SCHEMA_LEVEL_0, SCHEMA_LEVEL_1, SCHEMA_VERSION};

pub use batch::{decode_batch_id, encode_batch_id, parse_batch_bsos};

pub struct Store {
    conn: Mutex<SqliteConnection>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish()
    }
}

#[derive(QueryableByName)]
struct UserVersion {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    user_version: i64,
}

#[derive(QueryableByName)]
struct PageSize {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    page_size: i64,
}

#[derive(QueryableByName)]
struct PageCount {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    page_count: i64,
}

#[derive(QueryableByName)]
struct FreelistCount {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    freelist_count: i64,
}

impl Store {
    /// Open (creating if necessary) the database at `database_url` and bring
    /// its schema up to date.
    ///
    /// `":memory:"` is accepted and yields a store that lives only as long
    /// as the process.
    pub fn open(database_url: &str) -> DbResult<Self> {
        let mut conn = SqliteConnection::establish(database_url)?;
        conn.batch_execute(
            "PRAGMA page_size = 4096;\
             PRAGMA journal_mode = WAL;\
             PRAGMA synchronous = NORMAL;\
             PRAGMA cache_size = -2000;\
             PRAGMA busy_timeout = 10000;",
        )?;
        Self::init_schema(&mut conn)?;
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    /// Apply the base schema to an empty file, or just the batch level to a
    /// file predating it.
    fn init_schema(conn: &mut SqliteConnection) -> DbResult<()> {
        let version = sql_query("PRAGMA user_version")
            .get_result::<UserVersion>(conn)?
            .user_version;
        if version == 0 {
            conn.batch_execute(&format!("{}{}", SCHEMA_LEVEL_0, SCHEMA_LEVEL_1))?;
            for (id, name) in STD_COLLS.iter() {
                sql_query("INSERT OR IGNORE INTO collections (id, name) VALUES (?, ?)")
                    .bind::<diesel::sql_types::Integer, _>(id)
                    .bind::<Text, _>(*name)
                    .execute(conn)?;
            }
        } else if version < SCHEMA_VERSION {
            conn.batch_execute(SCHEMA_LEVEL_1)?;
        }
        Ok(())
    }

    pub(super) fn conn(&self) -> MutexGuard<'_, SqliteConnection> {
        // a poisoned lock only means a panic mid-query; the connection
        // itself rolls back any open transaction
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The `STORAGE_LAST_MODIFIED` value, or 0 if nothing was ever written.
    pub fn last_modified(&self) -> DbResult<SyncTimestamp> {
        let mut conn = self.conn();
        Self::storage_modified_in(&mut conn)
    }

    pub(super) fn storage_modified_in(conn: &mut SqliteConnection) -> DbResult<SyncTimestamp> {
        match Self::get_key_in(conn, STORAGE_LAST_MODIFIED)? {
            Some(val) => {
                let ms = val
                    .parse::<i64>()
                    .map_err(|e| DbError::internal(format!("Bad storage timestamp: {}", e)))?;
                SyncTimestamp::from_i64(ms)
            }
            None => Ok(SyncTimestamp::zero()),
        }
    }

    pub fn get_key(&self, key: &str) -> DbResult<Option<String>> {
        let mut conn = self.conn();
        Self::get_key_in(&mut conn, key)
    }

    pub fn set_key(&self, key: &str, value: &str) -> DbResult<()> {
        let mut conn = self.conn();
        Self::set_key_in(&mut conn, key, value)
    }

    pub(super) fn get_key_in(conn: &mut SqliteConnection, key: &str) -> DbResult<Option<String>> {
        Ok(key_values::table
            .select(key_values::value)
            .filter(key_values::key.eq(key))
            .first::<String>(conn)
            .optional()?)
    }

    pub(super) fn set_key_in(conn: &mut SqliteConnection, key: &str, value: &str) -> DbResult<()> {
        sql_query(
            "INSERT INTO key_values (key, value)
             VALUES (?, ?)
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind::<Text, _>(key)
        .bind::<Text, _>(value)
        .execute(conn)?;
        Ok(())
    }

    /// Raw page accounting, for vacuum decisions and usage reporting.
    pub fn usage(&self) -> DbResult<results::StorageUsage> {
        let mut conn = self.conn();
        Self::usage_in(&mut conn)
    }

    fn usage_in(conn: &mut SqliteConnection) -> DbResult<results::StorageUsage> {
        let page_size = sql_query("PRAGMA page_size")
            .get_result::<PageSize>(conn)?
            .page_size;
        let total_pages = sql_query("PRAGMA page_count")
            .get_result::<PageCount>(conn)?
            .page_count;
        let free_pages = sql_query("PRAGMA freelist_count")
            .get_result::<FreelistCount>(conn)?
            .freelist_count;
        Ok(results::StorageUsage {
            page_size,
            total_pages,
            free_pages,
        })
    }

    /// Rebuild the database file, returning freelist pages to the OS.
    pub fn vacuum(&self) -> DbResult<()> {
        let mut conn = self.conn();
        Self::vacuum_in(&mut conn)
    }

    pub(super) fn vacuum_in(conn: &mut SqliteConnection) -> DbResult<()> {
        conn.batch_execute("VACUUM")?;
        Ok(())
    }

    /// Vacuum when at least `free_percent_threshold` percent of the file is
    /// freelist pages. Returns whether a vacuum ran.
    pub fn optimize(&self, free_percent_threshold: u32) -> DbResult<bool> {
        let mut conn = self.conn();
        let usage = Self::usage_in(&mut conn)?;
        if usage.free_percent() < free_percent_threshold {
            return Ok(false);
        }
        debug!(
            "Vacuuming store: {} of {} pages free",
            usage.free_pages, usage.total_pages
        );
        Self::vacuum_in(&mut conn)?;
        Ok(true)
    }
}
