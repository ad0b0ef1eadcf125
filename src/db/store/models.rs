use std::collections::HashMap;

use diesel::{
    delete,
    dsl::sql,
    sql_query,
    sql_types::{BigInt, Integer, Nullable, Text},
    Connection, ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl,
    sqlite::SqliteConnection,
};
use lazy_static::lazy_static;
use regex::Regex;

use super::{
    schema::{bso, collections},
    Store,
};
use crate::db::{
    params, results, DbError, DbErrorKind, DbResult, Sorting, SyncTimestamp, DEFAULT_BSO_TTL,
    FIRST_CUSTOM_COLLECTION_ID, STORAGE_LAST_MODIFIED,
};

// this is the max number of records we will return.
pub static DEFAULT_LIMIT: u32 = 1000;

/// Max number of ids a single query will filter on; the excess is dropped.
const QUERY_MAX_IDS: usize = 100;

const MAX_SORTINDEX: i32 = 999_999_999;
const MIN_SORTINDEX: i32 = -999_999_999;
const MAX_TTL: u32 = 999_999_999;

/// Key recording when the user last wiped their whole storage.
const DELETE_EVERYTHING_DATE: &str = "DELETE_EVERYTHING_DATE";

lazy_static! {
    static ref VALID_COLLECTION_NAME: Regex = Regex::new(r"^[a-zA-Z0-9._-]{1,32}$").unwrap();
    static ref VALID_BSO_ID: Regex = Regex::new(r"^[ -~]{1,64}$").unwrap();
}

fn validate_collection_name(name: &str) -> DbResult<()> {
    if !VALID_COLLECTION_NAME.is_match(name) {
        return Err(DbErrorKind::InvalidCollectionName.into());
    }
    Ok(())
}

fn validate_bso_id(id: &str) -> DbResult<()> {
    if !VALID_BSO_ID.is_match(id) {
        return Err(DbErrorKind::InvalidBsoId.into());
    }
    Ok(())
}

fn validate_sortindex(sortindex: i32) -> DbResult<()> {
    if !(MIN_SORTINDEX..=MAX_SORTINDEX).contains(&sortindex) {
        return Err(DbErrorKind::InvalidSortIndex.into());
    }
    Ok(())
}

fn validate_ttl(ttl: u32) -> DbResult<()> {
    if ttl > MAX_TTL {
        return Err(DbErrorKind::InvalidTtl.into());
    }
    Ok(())
}

impl Store {
    pub fn get_collection_id(&self, name: &str) -> DbResult<i32> {
        validate_collection_name(name)?;
        let mut conn = self.conn();
        Self::collection_id_in(&mut conn, name)
    }

    pub(super) fn collection_id_in(conn: &mut SqliteConnection, name: &str) -> DbResult<i32> {
        collections::table
            .select(collections::id)
            .filter(collections::name.eq(name))
            .first::<i32>(conn)
            .optional()?
            .ok_or_else(DbError::collection_not_found)
    }

    /// Assign the next free id (>= 100) to a new user-created collection.
    /// The reserved low ids are pre-seeded for the well-known names.
    pub fn create_collection(&self, name: &str) -> DbResult<i32> {
        validate_collection_name(name)?;
        let mut conn = self.conn();
        conn.transaction(|conn| Self::create_collection_in(conn, name))
    }

    fn create_collection_in(conn: &mut SqliteConnection, name: &str) -> DbResult<i32> {
        sql_query(
            "INSERT INTO collections (id, name)
             VALUES ((SELECT MAX(?, COALESCE(MAX(id) + 1, ?)) FROM collections), ?)",
        )
        .bind::<Integer, _>(FIRST_CUSTOM_COLLECTION_ID)
        .bind::<Integer, _>(FIRST_CUSTOM_COLLECTION_ID)
        .bind::<Text, _>(name)
        .execute(conn)?;
        Self::collection_id_in(conn, name)
    }

    pub(super) fn get_or_create_collection_id_in(
        conn: &mut SqliteConnection,
        name: &str,
    ) -> DbResult<i32> {
        validate_collection_name(name)?;
        match Self::collection_id_in(conn, name) {
            Err(e) if e.is_collection_not_found() => Self::create_collection_in(conn, name),
            result => result,
        }
    }

    /// The collection's modified timestamp; 0 if it was never touched.
    pub fn get_collection_timestamp(
        &self,
        params: params::GetCollectionTimestamp,
    ) -> DbResult<results::GetCollectionTimestamp> {
        let mut conn = self.conn();
        let collection_id = Self::collection_id_in(&mut conn, &params.collection)?;
        Self::collection_modified_in(&mut conn, collection_id)
    }

    pub(super) fn collection_modified_in(
        conn: &mut SqliteConnection,
        collection_id: i32,
    ) -> DbResult<SyncTimestamp> {
        let modified = collections::table
            .select(collections::modified)
            .filter(collections::id.eq(collection_id))
            .first::<i64>(conn)
            .optional()?
            .unwrap_or_default();
        SyncTimestamp::from_i64(modified)
    }

    /// Stamp the collection and the storage root in one step. Always part of
    /// the surrounding write transaction.
    pub(super) fn touch_collection_in(
        conn: &mut SqliteConnection,
        collection_id: i32,
        modified: SyncTimestamp,
    ) -> DbResult<SyncTimestamp> {
        diesel::update(collections::table)
            .filter(collections::id.eq(collection_id))
            .set(collections::modified.eq(modified.as_i64()))
            .execute(conn)?;
        Self::set_key_in(conn, STORAGE_LAST_MODIFIED, &modified.as_i64().to_string())?;
        Ok(modified)
    }

    pub fn touch_collection(
        &self,
        collection: &str,
        modified: SyncTimestamp,
    ) -> DbResult<results::TouchCollection> {
        let mut conn = self.conn();
        conn.transaction(|conn| {
            let collection_id = Self::get_or_create_collection_id_in(conn, collection)?;
            Self::touch_collection_in(conn, collection_id, modified)
        })
    }

    // Deleting the collection should result in:
    //  - collection does not appear in /info/collections
    //  - X-Last-Modified timestamp at the storage level changing
    pub fn delete_collection(
        &self,
        modified: SyncTimestamp,
        params: params::DeleteCollection,
    ) -> DbResult<results::DeleteCollection> {
        let mut conn = self.conn();
        conn.transaction(|conn| {
            let collection_id = Self::collection_id_in(conn, &params.collection)?;
            delete(bso::table)
                .filter(bso::collection_id.eq(collection_id))
                .execute(conn)?;
            sql_query("DELETE FROM batches WHERE collection = ?")
                .bind::<Integer, _>(collection_id)
                .execute(conn)?;
            diesel::update(collections::table)
                .filter(collections::id.eq(collection_id))
                .set(collections::modified.eq(0))
                .execute(conn)?;
            Self::set_key_in(conn, STORAGE_LAST_MODIFIED, &modified.as_i64().to_string())?;
            Ok(modified)
        })
    }

    /// Wipe the user: every BSO, batch and user-created collection goes,
    /// then the file is compacted.
    pub fn delete_everything(&self, modified: SyncTimestamp) -> DbResult<results::DeleteStorage> {
        {
            let mut conn = self.conn();
            conn.transaction::<_, DbError, _>(|conn| {
                sql_query("DELETE FROM bso").execute(conn)?;
                sql_query("DELETE FROM batches").execute(conn)?;
                sql_query("DELETE FROM collections WHERE id >= ?")
                    .bind::<Integer, _>(FIRST_CUSTOM_COLLECTION_ID)
                    .execute(conn)?;
                sql_query("UPDATE collections SET modified = 0").execute(conn)?;
                Self::set_key_in(conn, DELETE_EVERYTHING_DATE, &modified.as_i64().to_string())?;
                Self::set_key_in(conn, STORAGE_LAST_MODIFIED, &modified.as_i64().to_string())?;
                Ok(())
            })?;
        }
        // VACUUM cannot run inside the transaction
        self.vacuum()?;
        Ok(modified)
    }

    pub fn get_collection_timestamps(&self) -> DbResult<results::GetCollectionTimestamps> {
        let mut conn = self.conn();
        collections::table
            .select((collections::name, collections::modified))
            .filter(collections::modified.ne(0))
            .load::<(String, i64)>(&mut *conn)?
            .into_iter()
            .map(|(name, modified)| SyncTimestamp::from_i64(modified).map(|ts| (name, ts)))
            .collect()
    }

    pub fn get_collection_usage(
        &self,
        now: SyncTimestamp,
    ) -> DbResult<results::GetCollectionUsage> {
        let mut conn = self.conn();
        let usage = bso::table
            .filter(bso::expiry.gt(now.as_i64()))
            .group_by(bso::collection_id)
            .select((bso::collection_id, sql::<BigInt>("SUM(payload_size)")))
            .load::<(i32, i64)>(&mut *conn)?
            .into_iter()
            .collect();
        Self::map_collection_names(&mut conn, usage)
    }

    pub fn get_collection_counts(
        &self,
        now: SyncTimestamp,
    ) -> DbResult<results::GetCollectionCounts> {
        let mut conn = self.conn();
        let counts = bso::table
            .filter(bso::expiry.gt(now.as_i64()))
            .group_by(bso::collection_id)
            .select((bso::collection_id, sql::<BigInt>("COUNT(collection)")))
            .load::<(i32, i64)>(&mut *conn)?
            .into_iter()
            .collect();
        Self::map_collection_names(&mut conn, counts)
    }

    // Perform a lighter weight "read only" storage size check
    pub fn get_storage_usage(&self, now: SyncTimestamp) -> DbResult<results::GetStorageUsage> {
        let mut conn = self.conn();
        let total_bytes = bso::table
            .select(sql::<Nullable<BigInt>>("SUM(payload_size)"))
            .filter(bso::expiry.gt(now.as_i64()))
            .get_result::<Option<i64>>(&mut *conn)?;
        Ok(total_bytes.unwrap_or_default() as u64)
    }

    fn map_collection_names<T>(
        conn: &mut SqliteConnection,
        by_id: HashMap<i32, T>,
    ) -> DbResult<HashMap<String, T>> {
        let mut names: HashMap<i32, String> = collections::table
            .select((collections::id, collections::name))
            .filter(collections::id.eq_any(by_id.keys().cloned().collect::<Vec<_>>()))
            .load::<(i32, String)>(conn)?
            .into_iter()
            .collect();
        by_id
            .into_iter()
            .map(|(id, value)| {
                names.remove(&id).map(|name| (name, value)).ok_or_else(|| {
                    DbError::internal("load_collection_names unknown collection id".to_owned())
                })
            })
            .collect()
    }

    pub fn put_bso(
        &self,
        modified: SyncTimestamp,
        bso: params::PutBso,
    ) -> DbResult<results::PutBso> {
        if bso.payload.is_none() && bso.sortindex.is_none() && bso.ttl.is_none() {
            return Err(DbErrorKind::NothingToDo.into());
        }
        validate_bso_id(&bso.id)?;
        if let Some(sortindex) = bso.sortindex {
            validate_sortindex(sortindex)?;
        }
        if let Some(ttl) = bso.ttl {
            validate_ttl(ttl)?;
        }
        let mut conn = self.conn();
        conn.transaction(|conn| {
            let collection_id = Self::get_or_create_collection_id_in(conn, &bso.collection)?;
            Self::put_bso_in(conn, collection_id, modified, &bso)?;
            Self::touch_collection_in(conn, collection_id, modified)
        })
    }

    /// Upsert one BSO row. `modified` only advances when the payload or the
    /// sortindex is part of the write; a TTL-only update re-arms expiry and
    /// leaves `modified` alone.
    fn put_bso_in(
        conn: &mut SqliteConnection,
        collection_id: i32,
        modified: SyncTimestamp,
        bso: &params::PutBso,
    ) -> DbResult<()> {
        let payload = bso.payload.as_deref().unwrap_or_default();
        let ttl = bso.ttl.unwrap_or(DEFAULT_BSO_TTL);
        let expiry = modified.as_i64() + i64::from(ttl) * 1000;

        let mut q = "
            INSERT INTO bso (collection, id, sortindex, payload, payload_size, modified, ttl)
            VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (collection, id) DO UPDATE SET
                   id = excluded.id"
            .to_owned();
        if bso.sortindex.is_some() {
            q.push_str(", sortindex = excluded.sortindex");
        }
        if bso.payload.is_some() {
            q.push_str(", payload = excluded.payload, payload_size = excluded.payload_size");
        }
        if bso.ttl.is_some() {
            q.push_str(", ttl = excluded.ttl");
        }
        if bso.payload.is_some() || bso.sortindex.is_some() {
            q.push_str(", modified = excluded.modified");
        }
        sql_query(q)
            .bind::<Integer, _>(collection_id)
            .bind::<Text, _>(&bso.id)
            .bind::<Nullable<Integer>, _>(bso.sortindex)
            .bind::<Text, _>(payload)
            .bind::<BigInt, _>(payload.len() as i64)
            .bind::<BigInt, _>(modified.as_i64())
            .bind::<BigInt, _>(expiry)
            .execute(conn)?;
        Ok(())
    }

    /// Upsert a set of BSOs sharing one timestamp. Per-record validation
    /// failures land in the `failed` map without aborting the rest.
    pub fn post_bsos(
        &self,
        modified: SyncTimestamp,
        input: params::PostBsos,
    ) -> DbResult<results::PostBsos> {
        let mut conn = self.conn();
        conn.transaction(|conn| {
            let collection_id = Self::get_or_create_collection_id_in(conn, &input.collection)?;
            let mut result = results::PostBsos {
                modified,
                success: Default::default(),
                failed: input.failed,
            };
            for pbso in input.bsos {
                let id = pbso.id;
                let put_result = Self::post_bso_in(
                    conn,
                    collection_id,
                    modified,
                    params::PutBso {
                        collection: input.collection.clone(),
                        id: id.clone(),
                        payload: pbso.payload,
                        sortindex: pbso.sortindex,
                        ttl: pbso.ttl,
                    },
                );
                match put_result {
                    Ok(_) => result.success.push(id),
                    Err(e) if e.is_reportable() => return Err(e),
                    Err(e) => {
                        result.failed.insert(id, e.to_string());
                    }
                }
            }
            Self::touch_collection_in(conn, collection_id, modified)?;
            Ok(result)
        })
    }

    pub(super) fn post_bso_in(
        conn: &mut SqliteConnection,
        collection_id: i32,
        modified: SyncTimestamp,
        bso: params::PutBso,
    ) -> DbResult<()> {
        if bso.payload.is_none() && bso.sortindex.is_none() && bso.ttl.is_none() {
            return Err(DbErrorKind::NothingToDo.into());
        }
        validate_bso_id(&bso.id)?;
        if let Some(sortindex) = bso.sortindex {
            validate_sortindex(sortindex)?;
        }
        if let Some(ttl) = bso.ttl {
            validate_ttl(ttl)?;
        }
        Self::put_bso_in(conn, collection_id, modified, &bso)
    }

    pub fn get_bsos(
        &self,
        now: SyncTimestamp,
        params: params::GetBsos,
    ) -> DbResult<results::GetBsos> {
        let mut conn = self.conn();
        let collection_id = Self::collection_id_in(&mut conn, &params.collection)?;
        let mut query = bso::table
            .select((
                bso::id,
                bso::modified,
                bso::payload,
                bso::sortindex,
                bso::expiry,
            ))
            .filter(bso::collection_id.eq(collection_id))
            .filter(bso::expiry.gt(now.as_i64()))
            .into_boxed();

        if let Some(older) = params.older {
            query = query.filter(bso::modified.lt(older.as_i64()));
        }
        if let Some(newer) = params.newer {
            query = query.filter(bso::modified.gt(newer.as_i64()));
        }

        let mut ids = params.ids;
        ids.truncate(QUERY_MAX_IDS);
        if !ids.is_empty() {
            query = query.filter(bso::id.eq_any(ids));
        }

        // it's possible for two BSOs to be inserted with the same `modified`
        // date, since there's no guarantee of order when doing a get,
        // pagination can return an error. We "fudge" a bit here by taking the
        // id order as a secondary, since that is guaranteed to be unique by
        // the client.
        query = match params.sort {
            Sorting::Index => query.order(bso::sortindex.desc()),
            Sorting::Newest => query.order((bso::modified.desc(), bso::id.desc())),
            Sorting::Oldest => query.order((bso::modified.asc(), bso::id.asc())),
            _ => query,
        };

        let limit = params
            .limit
            .map(i64::from)
            .unwrap_or(DEFAULT_LIMIT as i64)
            .max(0);
        // fetch an extra row to detect if there are more rows that
        // match the query conditions
        query = query.limit(if limit > 0 { limit + 1 } else { limit });

        let numeric_offset = params.offset.map_or(0, |offset| offset.offset as i64);
        if numeric_offset > 0 {
            query = query.offset(numeric_offset);
        }
        let mut bsos = query.load::<results::GetBso>(&mut *conn)?;

        let next_offset = if limit > 0 && bsos.len() > limit as usize {
            bsos.pop();
            Some((limit + numeric_offset).to_string())
        } else {
            None
        };

        Ok(results::GetBsos {
            items: bsos,
            offset: next_offset,
        })
    }

    pub fn get_bso_ids(
        &self,
        now: SyncTimestamp,
        params: params::GetBsos,
    ) -> DbResult<results::GetBsoIds> {
        let mut conn = self.conn();
        let collection_id = Self::collection_id_in(&mut conn, &params.collection)?;
        let mut query = bso::table
            .select(bso::id)
            .filter(bso::collection_id.eq(collection_id))
            .filter(bso::expiry.gt(now.as_i64()))
            .into_boxed();

        if let Some(older) = params.older {
            query = query.filter(bso::modified.lt(older.as_i64()));
        }
        if let Some(newer) = params.newer {
            query = query.filter(bso::modified.gt(newer.as_i64()));
        }

        let mut ids = params.ids;
        ids.truncate(QUERY_MAX_IDS);
        if !ids.is_empty() {
            query = query.filter(bso::id.eq_any(ids));
        }

        query = match params.sort {
            Sorting::Index => query.order(bso::sortindex.desc()),
            Sorting::Newest => query.order((bso::modified.desc(), bso::id.desc())),
            Sorting::Oldest => query.order((bso::modified.asc(), bso::id.asc())),
            _ => query,
        };

        let limit = params
            .limit
            .map(i64::from)
            .unwrap_or(DEFAULT_LIMIT as i64)
            .max(0);
        query = query.limit(if limit > 0 { limit + 1 } else { limit });
        let numeric_offset = params.offset.map_or(0, |offset| offset.offset as i64);
        if numeric_offset > 0 {
            query = query.offset(numeric_offset);
        }
        let mut ids = query.load::<String>(&mut *conn)?;

        let next_offset = if limit > 0 && ids.len() > limit as usize {
            ids.pop();
            Some((limit + numeric_offset).to_string())
        } else {
            None
        };

        Ok(results::GetBsoIds {
            items: ids,
            offset: next_offset,
        })
    }

    pub fn get_bso(
        &self,
        now: SyncTimestamp,
        params: params::GetBso,
    ) -> DbResult<Option<results::GetBso>> {
        let mut conn = self.conn();
        let collection_id = Self::collection_id_in(&mut conn, &params.collection)?;
        Ok(bso::table
            .select((
                bso::id,
                bso::modified,
                bso::payload,
                bso::sortindex,
                bso::expiry,
            ))
            .filter(bso::collection_id.eq(collection_id))
            .filter(bso::id.eq(&params.id))
            .filter(bso::expiry.gt(now.as_i64()))
            .get_result::<results::GetBso>(&mut *conn)
            .optional()?)
    }

    pub fn get_bso_timestamp(
        &self,
        now: SyncTimestamp,
        params: params::GetBsoTimestamp,
    ) -> DbResult<results::GetBsoTimestamp> {
        let mut conn = self.conn();
        let collection_id = Self::collection_id_in(&mut conn, &params.collection)?;
        let modified = bso::table
            .select(bso::modified)
            .filter(bso::collection_id.eq(collection_id))
            .filter(bso::id.eq(&params.id))
            .filter(bso::expiry.gt(now.as_i64()))
            .first::<i64>(&mut *conn)
            .optional()?
            .unwrap_or_default();
        SyncTimestamp::from_i64(modified)
    }

    pub fn delete_bso(
        &self,
        modified: SyncTimestamp,
        params: params::DeleteBso,
    ) -> DbResult<results::DeleteBso> {
        let mut conn = self.conn();
        conn.transaction(|conn| {
            let collection_id = Self::collection_id_in(conn, &params.collection)?;
            let affected_rows = delete(bso::table)
                .filter(bso::collection_id.eq(collection_id))
                .filter(bso::id.eq(&params.id))
                .filter(bso::expiry.gt(modified.as_i64()))
                .execute(conn)?;
            if affected_rows == 0 {
                return Err(DbError::bso_not_found());
            }
            Self::touch_collection_in(conn, collection_id, modified)
        })
    }

    pub fn delete_bsos(
        &self,
        modified: SyncTimestamp,
        params: params::DeleteBsos,
    ) -> DbResult<results::DeleteBsos> {
        let mut conn = self.conn();
        conn.transaction(|conn| {
            let collection_id = Self::collection_id_in(conn, &params.collection)?;
            delete(bso::table)
                .filter(bso::collection_id.eq(collection_id))
                .filter(bso::id.eq_any(params.ids))
                .execute(conn)?;
            Self::touch_collection_in(conn, collection_id, modified)
        })
    }

    /// Drop every row whose ttl has passed. Read paths never see them, this
    /// just reclaims the space.
    pub fn purge_expired(&self, now: SyncTimestamp) -> DbResult<results::PurgeExpired> {
        let mut conn = self.conn();
        let count = delete(bso::table)
            .filter(bso::expiry.le(now.as_i64()))
            .execute(&mut *conn)?;
        Ok(count)
    }
}
