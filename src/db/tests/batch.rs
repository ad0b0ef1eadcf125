use std::collections::HashMap;

use super::support::{gbso, memory_store, postbso, ts_add};
use crate::db::store::{decode_batch_id, encode_batch_id};
use crate::db::{params, DbResult, SyncTimestamp, BATCH_LIFETIME};

fn cb(collection: &str, bsos: Vec<params::PostCollectionBso>) -> params::CreateBatch {
    params::CreateBatch {
        collection: collection.to_owned(),
        bsos,
    }
}

#[test]
fn batch_ids_cross_the_wire_with_a_prefix() {
    assert_eq!(encode_batch_id(17), "b17");
    assert_eq!(decode_batch_id("b17").unwrap(), 17);
    assert!(decode_batch_id("17").is_err());
    assert!(decode_batch_id("bnope").is_err());
    assert!(decode_batch_id("true").is_err());
}

#[test]
fn create_append_commit() -> DbResult<()> {
    let store = memory_store();
    let coll = "bookmarks";
    let ts = SyncTimestamp::now();

    let id = store.create_batch(
        ts,
        cb(
            coll,
            vec![
                postbso("b0", Some("payload 0"), None, None),
                postbso("b1", Some("payload 1"), None, None),
            ],
        ),
    )?;
    let wire_id = encode_batch_id(id);

    // nothing visible before commit, collection untouched
    assert!(store.get_bso(ts, gbso(coll, "b0"))?.is_none());
    assert_eq!(
        store
            .get_collection_timestamp(params::GetCollectionTimestamp {
                collection: coll.to_owned(),
            })?
            .as_i64(),
        0
    );

    let ts2 = ts_add(ts, 10);
    store.append_to_batch(
        ts2,
        params::AppendToBatch {
            collection: coll.to_owned(),
            id: wire_id.clone(),
            bsos: vec![postbso("b2", Some("payload 2"), None, None)],
        },
    )?;

    let batch = store
        .get_batch(params::GetBatch {
            collection: coll.to_owned(),
            id: wire_id.clone(),
        })?
        .expect("Could not get batch");
    assert_eq!(batch.bsos.lines().count(), 3);

    let ts3 = ts_add(ts, 20);
    let result = store.commit_batch(
        ts3,
        params::CommitBatch {
            collection: coll.to_owned(),
            id: wire_id.clone(),
        },
    )?;
    assert_eq!(result.modified, ts3);
    assert_eq!(result.success.len(), 3);
    assert!(result.failed.is_empty());

    // all three rows share the commit timestamp
    for bid in ["b0", "b1", "b2"] {
        let bso = store.get_bso(ts3, gbso(coll, bid))?.unwrap();
        assert_eq!(bso.modified, ts3);
    }

    // the batch row is gone
    assert!(store
        .get_batch(params::GetBatch {
            collection: coll.to_owned(),
            id: wire_id,
        })?
        .is_none());
    Ok(())
}

#[test]
fn append_to_unknown_batch_fails() {
    let store = memory_store();
    let err = store
        .append_to_batch(
            SyncTimestamp::now(),
            params::AppendToBatch {
                collection: "bookmarks".to_owned(),
                id: "b12345".to_owned(),
                bsos: vec![postbso("b0", Some("x"), None, None)],
            },
        )
        .unwrap_err();
    assert!(err.is_batch_not_found());
}

#[test]
fn batch_is_scoped_to_its_collection() -> DbResult<()> {
    let store = memory_store();
    let ts = SyncTimestamp::now();
    let id = store.create_batch(ts, cb("bookmarks", vec![]))?;
    let wire_id = encode_batch_id(id);

    assert!(store.validate_batch(
        ts,
        params::ValidateBatch {
            collection: "bookmarks".to_owned(),
            id: wire_id.clone(),
        },
    )?);
    assert!(!store.validate_batch(
        ts,
        params::ValidateBatch {
            collection: "history".to_owned(),
            id: wire_id.clone(),
        },
    )?);

    let err = store
        .append_to_batch(
            ts,
            params::AppendToBatch {
                collection: "history".to_owned(),
                id: wire_id,
                bsos: vec![postbso("b0", Some("x"), None, None)],
            },
        )
        .unwrap_err();
    assert!(err.is_batch_not_found() || err.is_collection_not_found());
    Ok(())
}

#[test]
fn stale_batches_are_reclaimed() -> DbResult<()> {
    let store = memory_store();
    let ts = SyncTimestamp::now();
    let id = store.create_batch(ts, cb("bookmarks", vec![postbso("b0", Some("x"), None, None)]))?;

    // too young to purge
    assert_eq!(store.purge_batches(ts_add(ts, 1000), BATCH_LIFETIME)?, 0);

    let beyond = ts_add(ts, BATCH_LIFETIME + 1000);
    assert_eq!(store.purge_batches(beyond, BATCH_LIFETIME)?, 1);
    assert!(!store.validate_batch(
        beyond,
        params::ValidateBatch {
            collection: "bookmarks".to_owned(),
            id: encode_batch_id(id),
        },
    )?);
    Ok(())
}

#[test]
fn commit_reports_per_record_failures() -> DbResult<()> {
    let store = memory_store();
    let coll = "bookmarks";
    let ts = SyncTimestamp::now();
    let id = store.create_batch(
        ts,
        cb(
            coll,
            vec![
                postbso("good", Some("x"), None, None),
                postbso("bad", Some("y"), Some(1_000_000_000), None),
            ],
        ),
    )?;

    let ts2 = ts_add(ts, 10);
    let result = store.commit_batch(
        ts2,
        params::CommitBatch {
            collection: coll.to_owned(),
            id: encode_batch_id(id),
        },
    )?;
    assert_eq!(result.success, vec!["good".to_owned()]);
    assert!(result.failed.contains_key("bad"));
    assert_eq!(result.failed.len(), 1);

    let counts: HashMap<String, i64> = store.get_collection_counts(ts2)?;
    assert_eq!(counts.get(coll), Some(&1));
    Ok(())
}
