//! Server-side batch uploads.
//!
//! A batch accumulates BSOs across multiple POSTs as newline-delimited JSON
//! in a single row, then commit applies the whole set with one shared
//! timestamp and drops the row. Batches are strictly ephemeral: anything
//! older than the batch lifetime is reclaimed by `purge_batches`.
use diesel::{
    delete,
    dsl::sql,
    sql_query,
    sql_types::{BigInt, Integer, Text},
    sqlite::SqliteConnection,
    Connection, ExpressionMethods, OptionalExtension, QueryDsl, QueryableByName, RunQueryDsl,
};

use super::{schema::batches, Store};
use crate::db::{params, results, DbError, DbResult, SyncTimestamp};

/// Batch ids cross the wire with a `b` prefix to force clients to treat them
/// as opaque strings.
pub fn encode_batch_id(id: i64) -> String {
    format!("b{}", id)
}

pub fn decode_batch_id(wire_id: &str) -> DbResult<i64> {
    wire_id
        .strip_prefix('b')
        .and_then(|id| id.parse::<i64>().ok())
        .ok_or_else(DbError::batch_not_found)
}

/// Serialize BSOs into the newline-delimited accumulator format.
pub fn serialize_batch_bsos(bsos: &[params::PostCollectionBso]) -> DbResult<String> {
    let mut blob = String::new();
    for bso in bsos {
        blob.push_str(&serde_json::to_string(bso)?);
        blob.push('\n');
    }
    Ok(blob)
}

/// Parse an accumulator blob back into BSOs.
pub fn parse_batch_bsos(blob: &str) -> DbResult<Vec<params::PostCollectionBso>> {
    blob.lines()
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(Into::into))
        .collect()
}

#[derive(QueryableByName)]
struct IdResult {
    #[diesel(sql_type = BigInt)]
    id: i64,
}

impl Store {
    /// Open a new batch seeded with this request's BSOs. The collection is
    /// created if needed but its modified timestamp is left alone: nothing
    /// is visible until commit.
    pub fn create_batch(
        &self,
        modified: SyncTimestamp,
        params: params::CreateBatch,
    ) -> DbResult<results::CreateBatch> {
        let blob = serialize_batch_bsos(&params.bsos)?;
        let mut conn = self.conn();
        conn.transaction(|conn| {
            let collection_id = Self::get_or_create_collection_id_in(conn, &params.collection)?;
            sql_query(
                "INSERT INTO batches (collection, modified, bsos)
                 VALUES (?, ?, ?)",
            )
            .bind::<Integer, _>(collection_id)
            .bind::<BigInt, _>(modified.as_i64())
            .bind::<Text, _>(&blob)
            .execute(conn)?;
            let id = sql_query("SELECT last_insert_rowid() AS id")
                .get_result::<IdResult>(conn)?
                .id;
            Ok(id)
        })
    }

    pub fn validate_batch(
        &self,
        now: SyncTimestamp,
        params: params::ValidateBatch,
    ) -> DbResult<results::ValidateBatch> {
        let id = match decode_batch_id(&params.id) {
            Ok(id) => id,
            Err(_) => return Ok(false),
        };
        let mut conn = self.conn();
        let collection_id = match Self::collection_id_in(&mut conn, &params.collection) {
            Ok(id) => id,
            Err(e) if e.is_collection_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        let exists = batches::table
            .select(sql::<Integer>("1"))
            .filter(batches::id.eq(id))
            .filter(batches::collection_id.eq(collection_id))
            .filter(batches::modified.gt(now.as_i64() - crate::db::BATCH_LIFETIME))
            .get_result::<i32>(&mut *conn)
            .optional()?;
        Ok(exists.is_some())
    }

    /// Append more BSOs to an open batch, refreshing its reclamation clock.
    pub fn append_to_batch(
        &self,
        modified: SyncTimestamp,
        params: params::AppendToBatch,
    ) -> DbResult<results::AppendToBatch> {
        let id = decode_batch_id(&params.id)?;
        let blob = serialize_batch_bsos(&params.bsos)?;
        let mut conn = self.conn();
        conn.transaction(|conn| {
            let collection_id = Self::collection_id_in(conn, &params.collection)?;
            let affected_rows = sql_query(
                "UPDATE batches
                    SET bsos = bsos || ?, modified = ?
                  WHERE id = ? AND collection = ?",
            )
            .bind::<Text, _>(&blob)
            .bind::<BigInt, _>(modified.as_i64())
            .bind::<BigInt, _>(id)
            .bind::<Integer, _>(collection_id)
            .execute(conn)?;
            if affected_rows == 0 {
                return Err(DbError::batch_not_found());
            }
            Ok(())
        })
    }

    pub fn get_batch(&self, params: params::GetBatch) -> DbResult<Option<results::GetBatch>> {
        let id = decode_batch_id(&params.id)?;
        let mut conn = self.conn();
        let collection_id = Self::collection_id_in(&mut conn, &params.collection)?;
        Ok(batches::table
            .select((
                batches::id,
                batches::collection_id,
                batches::modified,
                batches::bsos,
            ))
            .filter(batches::id.eq(id))
            .filter(batches::collection_id.eq(collection_id))
            .get_result::<results::GetBatch>(&mut *conn)
            .optional()?)
    }

    pub fn delete_batch(&self, params: params::DeleteBatch) -> DbResult<results::DeleteBatch> {
        let id = decode_batch_id(&params.id)?;
        let mut conn = self.conn();
        delete(batches::table)
            .filter(batches::id.eq(id))
            .execute(&mut *conn)?;
        Ok(())
    }

    /// Apply every accumulated BSO with one shared timestamp, then drop the
    /// batch row. All in one transaction.
    pub fn commit_batch(
        &self,
        modified: SyncTimestamp,
        params: params::CommitBatch,
    ) -> DbResult<results::CommitBatch> {
        let id = decode_batch_id(&params.id)?;
        let mut conn = self.conn();
        conn.transaction(|conn| {
            let collection_id = Self::collection_id_in(conn, &params.collection)?;
            let blob = batches::table
                .select(batches::bsos)
                .filter(batches::id.eq(id))
                .filter(batches::collection_id.eq(collection_id))
                .get_result::<String>(conn)
                .optional()?
                .ok_or_else(DbError::batch_not_found)?;

            let mut result = results::PostBsos {
                modified,
                success: Default::default(),
                failed: Default::default(),
            };
            for pbso in parse_batch_bsos(&blob)? {
                let id = pbso.id;
                let put_result = Self::post_bso_in(
                    conn,
                    collection_id,
                    modified,
                    params::PutBso {
                        collection: params.collection.clone(),
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
            delete(batches::table)
                .filter(batches::id.eq(id))
                .execute(conn)?;
            Self::touch_collection_in(conn, collection_id, modified)?;
            Ok(result)
        })
    }

    /// Reclaim batches that were never committed within `lifetime_ms`.
    pub fn purge_batches(
        &self,
        now: SyncTimestamp,
        lifetime_ms: i64,
    ) -> DbResult<results::PurgeBatches> {
        let mut conn = self.conn();
        let count = delete(batches::table)
            .filter(batches::modified.le(now.as_i64() - lifetime_ms))
            .execute(&mut *conn)?;
        Ok(count)
    }
}
