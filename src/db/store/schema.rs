// We use BigInt here instead of Integer, even though Sqlite does not have the
// concept of BigInt, to allow diesel to assume that integer is i64. See
// https://github.com/diesel-rs/diesel/issues/852

diesel::table! {
    bso (collection_id, id) {
        #[sql_name = "collection"]
        collection_id -> Integer,
        id -> Text,
        sortindex -> Nullable<Integer>,
        payload -> Text,
        payload_size -> BigInt,
        modified -> BigInt,
        #[sql_name = "ttl"]
        expiry -> BigInt,
    }
}

diesel::table! {
    collections (id) {
        id -> Integer,
        name -> Text,
        size -> BigInt,
        modified -> BigInt,
    }
}

diesel::table! {
    batches (id) {
        id -> BigInt,
        #[sql_name = "collection"]
        collection_id -> Integer,
        modified -> BigInt,
        bsos -> Text,
    }
}

diesel::table! {
    key_values (key) {
        key -> Text,
        value -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(bso, collections, batches, key_values);

/// Base schema. `user_version` 0 means an empty file; applying this brings it
/// to 1.
pub const SCHEMA_LEVEL_0: &str = r#"
CREATE TABLE IF NOT EXISTS bso (
    collection   INTEGER NOT NULL,
    id           TEXT NOT NULL,
    sortindex    INTEGER,
    payload      TEXT NOT NULL DEFAULT '',
    payload_size INTEGER NOT NULL DEFAULT 0,
    modified     INTEGER NOT NULL,
    ttl          INTEGER NOT NULL,
    PRIMARY KEY (collection, id)
);
CREATE INDEX IF NOT EXISTS idx_bso_modified ON bso (collection, modified);

CREATE TABLE IF NOT EXISTS collections (
    id       INTEGER PRIMARY KEY,
    name     TEXT NOT NULL UNIQUE,
    size     INTEGER NOT NULL DEFAULT 0,
    modified INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS key_values (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

PRAGMA user_version = 1;
"#;

/// Adds the batch accumulator table and bumps `user_version` to 2.
pub const SCHEMA_LEVEL_1: &str = r#"
CREATE TABLE IF NOT EXISTS batches (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    collection INTEGER NOT NULL,
    modified   INTEGER NOT NULL,
    bsos       TEXT NOT NULL DEFAULT ''
);

PRAGMA user_version = 2;
"#;

/// Latest schema level expressed in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 2;
