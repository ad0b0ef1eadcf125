//! Periodic per-user maintenance.
use std::time::Duration;

use rand::{thread_rng, Rng};

use crate::db::{store::Store, DbResult, SyncTimestamp, BATCH_LIFETIME, NEXT_PURGE};

#[derive(Clone, Debug)]
pub struct TidySettings {
    pub min_purge: Duration,
    pub max_purge: Duration,
    /// Vacuum once this share of the file (in percent) is freelist pages.
    pub vacuum_free_percent: u32,
}

/// One maintenance pass over a store, gated by the `NEXT_PURGE` key so most
/// ticks are a single cheap read. Returns whether any work ran.
///
/// Runs under the element's request lock, so it can never overlap a write.
pub fn tidy_up(store: &Store, settings: &TidySettings) -> DbResult<bool> {
    let now = SyncTimestamp::now();
    match store.get_key(NEXT_PURGE)? {
        None => {
            // first sighting of this store: schedule, don't purge
            let due = now.as_i64() + settings.max_purge.as_millis() as i64;
            store.set_key(NEXT_PURGE, &due.to_string())?;
            return Ok(false);
        }
        Some(val) => {
            let due = val.parse::<i64>().unwrap_or(0);
            if due > now.as_i64() {
                return Ok(false);
            }
        }
    }

    let purged = store.purge_expired(now)?;
    let batches = store.purge_batches(now, BATCH_LIFETIME)?;
    let vacuumed = store.optimize(settings.vacuum_free_percent)?;
    if purged > 0 || batches > 0 || vacuumed {
        debug!(
            "Tidy pass";
            "purged_bsos" => purged,
            "purged_batches" => batches,
            "vacuumed" => vacuumed
        );
    }

    let min_ms = settings.min_purge.as_millis() as i64;
    let max_ms = settings.max_purge.as_millis() as i64;
    let due = now.as_i64()
        + if max_ms > min_ms {
            thread_rng().gen_range(min_ms..=max_ms)
        } else {
            min_ms
        };
    store.set_key(NEXT_PURGE, &due.to_string())?;
    Ok(true)
}
