#![allow(clippy::cognitive_complexity)]
use std::collections::HashMap;

use super::support::{dbso, dbsos, gbso, gbsos, memory_store, pbso, postbso, ts_add};
use crate::db::{params, Sorting, SyncTimestamp, DbResult};

// distant future (year 2099) timestamp for tests
const MAX_TIMESTAMP: i64 = 4_070_937_600_000;

#[test]
fn bso_successfully_updates_single_values() -> DbResult<()> {
    let store = memory_store();
    let coll = "clients";
    let bid = "testBSO";

    let ts1 = SyncTimestamp::now();
    let sortindex = 1;
    let ttl = 3_600;
    let bso1 = pbso(coll, bid, Some("initial value"), Some(sortindex), Some(ttl));
    store.put_bso(ts1, bso1)?;

    let ts2 = ts_add(ts1, 100);
    let payload = "Updated payload";
    let bso2 = pbso(coll, bid, Some(payload), None, None);
    store.put_bso(ts2, bso2)?;

    let bso = store.get_bso(ts2, gbso(coll, bid))?.unwrap();
    assert_eq!(bso.modified, ts2);
    assert_eq!(bso.payload, payload);
    assert_eq!(bso.sortindex, Some(sortindex));
    // ttl was not touched by the payload update
    assert_eq!(bso.expiry, ts1.as_i64() + i64::from(ttl) * 1000);

    let ts3 = ts_add(ts2, 100);
    let sortindex = 2;
    let bso3 = pbso(coll, bid, None, Some(sortindex), None);
    store.put_bso(ts3, bso3)?;
    let bso = store.get_bso(ts3, gbso(coll, bid))?.unwrap();
    assert_eq!(bso.modified, ts3);
    assert_eq!(bso.payload, payload);
    assert_eq!(bso.sortindex, Some(sortindex));
    assert_eq!(bso.expiry, ts1.as_i64() + i64::from(ttl) * 1000);
    Ok(())
}

#[test]
fn bso_modified_not_changed_on_ttl_touch() -> DbResult<()> {
    let store = memory_store();
    let coll = "clients";
    let bid = "testBSO";

    let ts1 = SyncTimestamp::now();
    let bso1 = pbso(coll, bid, Some("hello"), Some(1), Some(10));
    store.put_bso(ts1, bso1)?;

    let ts2 = ts_add(ts1, 100);
    let bso2 = pbso(coll, bid, None, None, Some(15));
    store.put_bso(ts2, bso2)?;
    let bso = store.get_bso(ts2, gbso(coll, bid))?.unwrap();
    // ttl has changed
    assert_eq!(bso.expiry, ts2.as_i64() + 15 * 1000);
    // modified has not changed
    assert_eq!(bso.modified, ts1);
    Ok(())
}

#[test]
fn put_bso_nothing_to_do() {
    let store = memory_store();
    let result = store.put_bso(SyncTimestamp::now(), pbso("clients", "b0", None, None, None));
    assert!(result.is_err());
}

#[test]
fn put_bso_validates_sortindex() -> DbResult<()> {
    let store = memory_store();
    let ts = SyncTimestamp::now();
    store.put_bso(ts, pbso("clients", "b0", Some("x"), Some(999_999_999), None))?;
    assert!(store
        .put_bso(ts, pbso("clients", "b1", Some("x"), Some(1_000_000_000), None))
        .is_err());
    assert!(store
        .put_bso(ts, pbso("clients", "b2", Some("x"), Some(-1_000_000_000), None))
        .is_err());
    Ok(())
}

#[test]
fn collection_names_are_validated() {
    let store = memory_store();
    let ok = "a".repeat(32);
    let too_long = "a".repeat(33);
    assert!(store.create_collection(&ok).is_ok());
    assert!(store.create_collection(&too_long).is_err());
    assert!(store.create_collection("no spaces").is_err());
    assert!(store.get_collection_id("no/slash").is_err());
}

#[test]
fn custom_collections_start_at_100() -> DbResult<()> {
    let store = memory_store();
    let first = store.create_collection("custom-one")?;
    let second = store.create_collection("custom-two")?;
    assert_eq!(first, 100);
    assert_eq!(second, 101);
    assert_eq!(store.get_collection_id("custom-one")?, 100);
    assert_eq!(store.get_collection_id("bookmarks")?, 7);
    Ok(())
}

#[test]
fn missing_collection_is_not_found() {
    let store = memory_store();
    let err = store.get_collection_id("nonexistent").unwrap_err();
    assert!(err.is_collection_not_found());
}

#[test]
fn write_updates_collection_and_storage_timestamps() -> DbResult<()> {
    let store = memory_store();
    let ts = SyncTimestamp::now();
    store.put_bso(ts, pbso("bookmarks", "b0", Some("x"), None, None))?;

    assert_eq!(
        store.get_collection_timestamp(params::GetCollectionTimestamp {
            collection: "bookmarks".to_owned(),
        })?,
        ts
    );
    assert_eq!(store.last_modified()?, ts);

    let timestamps = store.get_collection_timestamps()?;
    assert_eq!(timestamps.get("bookmarks"), Some(&ts));
    // untouched collections don't appear at all
    assert!(!timestamps.contains_key("clients"));
    Ok(())
}

#[test]
fn get_bsos_limit_offset() -> DbResult<()> {
    let store = memory_store();
    let coll = "clients";
    let size = 12;
    let mut ts = SyncTimestamp::now();
    for i in 0..size {
        let bso = pbso(
            coll,
            &i.to_string(),
            Some(&format!("payload-{}", i)),
            Some(i),
            None,
        );
        store.put_bso(ts_add(ts, i as i64 * 10), bso)?;
    }
    ts = ts_add(ts, size as i64 * 10);

    let bsos = store.get_bsos(
        ts,
        gbsos(coll, &[], MAX_TIMESTAMP, 0, Sorting::Index, Some(5), 0),
    )?;
    assert_eq!(bsos.items.len(), 5);
    assert_eq!(bsos.offset, Some("5".to_owned()));
    assert_eq!(bsos.items[0].sortindex, Some(11));
    assert_eq!(bsos.items[4].sortindex, Some(7));

    let bsos = store.get_bsos(
        ts,
        gbsos(coll, &[], MAX_TIMESTAMP, 0, Sorting::Index, Some(5), 5),
    )?;
    assert_eq!(bsos.items.len(), 5);
    assert_eq!(bsos.offset, Some("10".to_owned()));
    assert_eq!(bsos.items[0].sortindex, Some(6));
    assert_eq!(bsos.items[4].sortindex, Some(2));

    let bsos = store.get_bsos(
        ts,
        gbsos(coll, &[], MAX_TIMESTAMP, 0, Sorting::Index, Some(5), 10),
    )?;
    assert_eq!(bsos.items.len(), 2);
    assert_eq!(bsos.offset, None);
    assert_eq!(bsos.items[0].sortindex, Some(1));
    assert_eq!(bsos.items[1].sortindex, Some(0));
    Ok(())
}

#[test]
fn get_bsos_newer_older() -> DbResult<()> {
    let store = memory_store();
    let coll = "clients";
    let ts0 = SyncTimestamp::now();
    let ts1 = ts_add(ts0, 10);
    let ts2 = ts_add(ts0, 20);
    store.put_bso(ts0, pbso(coll, "b0", Some("a"), None, None))?;
    store.put_bso(ts1, pbso(coll, "b1", Some("b"), None, None))?;
    store.put_bso(ts2, pbso(coll, "b2", Some("c"), None, None))?;

    // newer is exclusive
    let bsos = store.get_bsos(
        ts2,
        gbsos(
            coll,
            &[],
            MAX_TIMESTAMP,
            ts0.as_i64(),
            Sorting::Oldest,
            None,
            0,
        ),
    )?;
    assert_eq!(bsos.items.len(), 2);
    assert_eq!(bsos.items[0].id, "b1");
    assert_eq!(bsos.items[1].id, "b2");

    // older is exclusive
    let bsos = store.get_bsos(
        ts2,
        gbsos(coll, &[], ts2.as_i64(), 0, Sorting::Newest, None, 0),
    )?;
    assert_eq!(bsos.items.len(), 2);
    assert_eq!(bsos.items[0].id, "b1");
    assert_eq!(bsos.items[1].id, "b0");
    Ok(())
}

#[test]
fn get_bsos_by_ids() -> DbResult<()> {
    let store = memory_store();
    let coll = "clients";
    let ts = SyncTimestamp::now();
    for id in ["b0", "b1", "b2"] {
        store.put_bso(ts, pbso(coll, id, Some("x"), None, None))?;
    }
    let bsos = store.get_bsos(
        ts,
        gbsos(coll, &["b0", "b2"], MAX_TIMESTAMP, 0, Sorting::None, None, 0),
    )?;
    assert_eq!(bsos.items.len(), 2);
    Ok(())
}

#[test]
fn expired_bsos_are_invisible() -> DbResult<()> {
    let store = memory_store();
    let coll = "clients";
    let ts = SyncTimestamp::now();
    store.put_bso(ts, pbso(coll, "living", Some("x"), None, Some(3600)))?;
    store.put_bso(ts, pbso(coll, "dying", Some("y"), None, Some(1)))?;

    let later = ts_add(ts, 2000);
    assert!(store.get_bso(later, gbso(coll, "dying"))?.is_none());
    let bsos = store.get_bsos(
        later,
        gbsos(coll, &[], MAX_TIMESTAMP, 0, Sorting::None, None, 0),
    )?;
    assert_eq!(bsos.items.len(), 1);
    assert_eq!(bsos.items[0].id, "living");

    let counts = store.get_collection_counts(later)?;
    assert_eq!(counts.get(coll), Some(&1));
    let usage = store.get_collection_usage(later)?;
    assert_eq!(usage.get(coll), Some(&1));

    // reclamation actually removes the row
    assert_eq!(store.purge_expired(later)?, 1);
    Ok(())
}

#[test]
fn delete_bso_twice_is_not_found() -> DbResult<()> {
    let store = memory_store();
    let coll = "clients";
    let ts = SyncTimestamp::now();
    store.put_bso(ts, pbso(coll, "b0", Some("x"), None, None))?;

    let ts2 = ts_add(ts, 10);
    assert_eq!(store.delete_bso(ts2, dbso(coll, "b0"))?, ts2);
    let err = store
        .delete_bso(ts_add(ts, 20), dbso(coll, "b0"))
        .unwrap_err();
    assert!(err.is_bso_not_found());
    Ok(())
}

#[test]
fn delete_bsos_updates_collection() -> DbResult<()> {
    let store = memory_store();
    let coll = "clients";
    let ts = SyncTimestamp::now();
    for id in ["b0", "b1", "b2"] {
        store.put_bso(ts, pbso(coll, id, Some("x"), None, None))?;
    }
    let ts2 = ts_add(ts, 10);
    assert_eq!(store.delete_bsos(ts2, dbsos(coll, &["b0", "b1"]))?, ts2);
    let bsos = store.get_bsos(
        ts2,
        gbsos(coll, &[], MAX_TIMESTAMP, 0, Sorting::None, None, 0),
    )?;
    assert_eq!(bsos.items.len(), 1);
    Ok(())
}

#[test]
fn delete_collection_resets_timestamp() -> DbResult<()> {
    let store = memory_store();
    let coll = "bookmarks";
    let ts = SyncTimestamp::now();
    store.put_bso(ts, pbso(coll, "b0", Some("x"), None, None))?;

    let ts2 = ts_add(ts, 10);
    assert_eq!(
        store.delete_collection(ts2, params::DeleteCollection {
            collection: coll.to_owned(),
        })?,
        ts2
    );
    // gone from the listing, storage timestamp advanced
    assert!(!store.get_collection_timestamps()?.contains_key(coll));
    assert_eq!(store.last_modified()?, ts2);

    // the collection id survives (it's a well-known name) but the data is gone
    assert!(store.get_bso(ts2, gbso(coll, "b0"))?.is_none());
    Ok(())
}

#[test]
fn delete_everything_leaves_no_trace() -> DbResult<()> {
    let store = memory_store();
    let ts = SyncTimestamp::now();
    store.put_bso(ts, pbso("bookmarks", "b0", Some("x"), None, None))?;
    store.put_bso(ts, pbso("history", "b1", Some("y"), None, None))?;
    store.create_collection("custom-one")?;

    let ts2 = ts_add(ts, 10);
    store.delete_everything(ts2)?;

    assert!(store.get_collection_timestamps()?.is_empty());
    assert!(store.get_bso(ts2, gbso("bookmarks", "b0"))?.is_none());
    let err = store.get_collection_id("custom-one").unwrap_err();
    assert!(err.is_collection_not_found());
    Ok(())
}

#[test]
fn post_bsos_mixes_success_and_failure() -> DbResult<()> {
    let store = memory_store();
    let coll = "tabs";
    let ts = SyncTimestamp::now();
    let result = store.post_bsos(
        ts,
        params::PostBsos {
            collection: coll.to_owned(),
            bsos: vec![
                postbso("b0", Some("payload 0"), Some(10), None),
                postbso("b1", Some("payload 1"), Some(1_000_000_000), None),
                postbso("b2", Some("payload 2"), Some(100), None),
            ],
            failed: HashMap::new(),
        },
    )?;

    assert_eq!(result.modified, ts);
    assert_eq!(result.success, vec!["b0".to_owned(), "b2".to_owned()]);
    assert!(result.failed.contains_key("b1"));

    let counts = store.get_collection_counts(ts)?;
    assert_eq!(counts.get(coll), Some(&2));
    Ok(())
}

#[test]
fn touch_collection_is_idempotent() -> DbResult<()> {
    let store = memory_store();
    let ts = SyncTimestamp::now();
    store.touch_collection("bookmarks", ts)?;
    store.touch_collection("bookmarks", ts)?;
    assert_eq!(
        store.get_collection_timestamp(params::GetCollectionTimestamp {
            collection: "bookmarks".to_owned(),
        })?,
        ts
    );
    Ok(())
}

#[test]
fn get_bso_timestamp_tracks_writes() -> DbResult<()> {
    let store = memory_store();
    let coll = "clients";
    let ts = SyncTimestamp::now();
    store.put_bso(ts, pbso(coll, "b0", Some("x"), None, None))?;
    assert_eq!(
        store.get_bso_timestamp(
            ts,
            params::GetBsoTimestamp {
                collection: coll.to_owned(),
                id: "b0".to_owned(),
            }
        )?,
        ts
    );
    // unknown ids read as zero
    assert_eq!(
        store
            .get_bso_timestamp(
                ts,
                params::GetBsoTimestamp {
                    collection: coll.to_owned(),
                    id: "nope".to_owned(),
                }
            )?
            .as_i64(),
        0
    );
    Ok(())
}

#[test]
fn storage_usage_sums_payload_bytes() -> DbResult<()> {
    let store = memory_store();
    let ts = SyncTimestamp::now();
    store.put_bso(ts, pbso("clients", "b0", Some("12345"), None, None))?;
    store.put_bso(ts, pbso("history", "b1", Some("123"), None, None))?;
    assert_eq!(store.get_storage_usage(ts)?, 8);
    Ok(())
}

#[test]
fn key_value_round_trip() -> DbResult<()> {
    let store = memory_store();
    assert_eq!(store.get_key("SOME_KEY")?, None);
    store.set_key("SOME_KEY", "a value")?;
    assert_eq!(store.get_key("SOME_KEY")?, Some("a value".to_owned()));
    store.set_key("SOME_KEY", "another")?;
    assert_eq!(store.get_key("SOME_KEY")?, Some("another".to_owned()));
    Ok(())
}

#[test]
fn usage_and_vacuum() -> DbResult<()> {
    let store = memory_store();
    let usage = store.usage()?;
    assert_eq!(usage.page_size, 4096);
    assert!(usage.total_pages > 0);
    // a fresh store has nothing to reclaim
    assert!(!store.optimize(10)?);
    store.vacuum()?;
    Ok(())
}

#[test]
fn persists_across_reopen() -> DbResult<()> {
    use rand::{distributions::Alphanumeric, thread_rng, Rng};

    let name: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    let path = std::env::temp_dir().join(format!("syncshard-test-{}.db", name));
    let url = path.to_string_lossy().into_owned();

    let ts = SyncTimestamp::now();
    {
        let store = crate::db::store::Store::open(&url)?;
        store.put_bso(ts, pbso("bookmarks", "b0", Some("kept"), None, None))?;
    }
    {
        let store = crate::db::store::Store::open(&url)?;
        let bso = store.get_bso(ts, gbso("bookmarks", "b0"))?.unwrap();
        assert_eq!(bso.payload, "kept");
        assert_eq!(bso.modified, ts);
    }
    let _ = std::fs::remove_file(&path);
    Ok(())
}
