use crate::db::store::Store;
use crate::db::{params, Sorting, SyncTimestamp};

pub fn memory_store() -> Store {
    let _ = env_logger::try_init();
    Store::open(":memory:").expect("Could not open memory store")
}

/// A timestamp a fixed distance from `ts`, for writes that must not share a
/// quantum.
pub fn ts_add(ts: SyncTimestamp, delta_ms: i64) -> SyncTimestamp {
    SyncTimestamp::from_i64(ts.as_i64() + delta_ms).expect("Could not offset timestamp")
}

pub fn pbso(
    coll: &str,
    bid: &str,
    payload: Option<&str>,
    sortindex: Option<i32>,
    ttl: Option<u32>,
) -> params::PutBso {
    params::PutBso {
        collection: coll.to_owned(),
        id: bid.to_owned(),
        payload: payload.map(|payload| payload.to_owned()),
        sortindex,
        ttl,
    }
}

pub fn postbso(
    bid: &str,
    payload: Option<&str>,
    sortindex: Option<i32>,
    ttl: Option<u32>,
) -> params::PostCollectionBso {
    params::PostCollectionBso {
        id: bid.to_owned(),
        payload: payload.map(&str::to_owned),
        sortindex,
        ttl,
    }
}

pub fn gbso(coll: &str, bid: &str) -> params::GetBso {
    params::GetBso {
        collection: coll.to_owned(),
        id: bid.to_owned(),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn gbsos(
    coll: &str,
    ids: &[&str],
    older: i64,
    newer: i64,
    sort: Sorting,
    limit: Option<u32>,
    offset: u64,
) -> params::GetBsos {
    params::GetBsos {
        collection: coll.to_owned(),
        ids: ids.iter().map(|id| id.to_owned().into()).collect(),
        older: Some(SyncTimestamp::from_i64(older).expect("bad older")),
        newer: Some(SyncTimestamp::from_i64(newer).expect("bad newer")),
        sort,
        limit,
        offset: if offset == 0 {
            None
        } else {
            Some(params::Offset::from(offset))
        },
        full: true,
    }
}

pub fn dbso(coll: &str, bid: &str) -> params::DeleteBso {
    params::DeleteBso {
        collection: coll.to_owned(),
        id: bid.to_owned(),
    }
}

pub fn dbsos(coll: &str, bids: &[&str]) -> params::DeleteBsos {
    params::DeleteBsos {
        collection: coll.to_owned(),
        ids: bids.iter().map(|id| id.to_owned().into()).collect(),
    }
}
