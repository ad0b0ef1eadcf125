//! Parameter types for store methods.
//!
//! A `Store` holds exactly one user's data, so unlike multi-tenant backends
//! these carry no user identifier: the caller already resolved the store.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::db::{util::SyncTimestamp, Sorting};

macro_rules! data {
    ($name:ident {$($property:ident: $type:ty,)*}) => {
        #[derive(Clone, Debug, Default)]
        pub struct $name {
            $(pub $property: $type,)*
        }
    }
}

macro_rules! collection_data {
    ($($name:ident {$($property:ident: $type:ty,)*},)+) => ($(
        data! {
            $name {
                collection: String,
                $($property: $type,)*
            }
        }
    )+)
}

macro_rules! bso_data {
    ($($name:ident {$($property:ident: $type:ty,)*},)+) => ($(
        data! {
            $name {
                collection: String,
                id: String,
                $($property: $type,)*
            }
        }
    )+)
}

collection_data! {
    DeleteCollection {},
    GetCollectionTimestamp {},
    DeleteBsos {
        ids: Vec<String>,
    },
    GetBsos {
        newer: Option<SyncTimestamp>,
        older: Option<SyncTimestamp>,
        sort: Sorting,
        limit: Option<u32>,
        offset: Option<Offset>,
        ids: Vec<String>,
        full: bool,
    },
    PostBsos {
        bsos: Vec<PostCollectionBso>,
        failed: HashMap<String, String>,
    },
    CreateBatch {
        bsos: Vec<PostCollectionBso>,
    },
    ValidateBatch {
        id: String,
    },
    AppendToBatch {
        id: String,
        bsos: Vec<PostCollectionBso>,
    },
    CommitBatch {
        id: String,
    },
    GetBatch {
        id: String,
    },
    DeleteBatch {
        id: String,
    },
}

pub type GetBsoIds = GetBsos;

bso_data! {
    DeleteBso {},
    GetBso {},
    GetBsoTimestamp {},
}

#[derive(Debug, Default, Clone)]
pub struct Offset {
    pub offset: u64,
}

impl ToString for Offset {
    fn to_string(&self) -> String {
        self.offset.to_string()
    }
}

impl From<u64> for Offset {
    fn from(offset: u64) -> Self {
        Self { offset }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PutBso {
    pub collection: String,
    pub id: String,
    pub sortindex: Option<i32>,
    pub payload: Option<String>,
    // ttl in seconds
    pub ttl: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PostCollectionBso {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sortindex: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    // ttl in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
}
