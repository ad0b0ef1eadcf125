//! Error types for the storage layer.
use backtrace::Backtrace;
use http::StatusCode;
use thiserror::Error;

use crate::impl_fmt_display;

/// An error arising from a `Store`, the element pool, or the dispatch layer
/// in front of them.
#[derive(Debug)]
pub struct DbError {
    kind: DbErrorKind,
    pub status: StatusCode,
    pub backtrace: Backtrace,
}

#[derive(Debug, Error)]
pub enum DbErrorKind {
    #[error("Specified collection does not exist")]
    CollectionNotFound,

    #[error("Specified bso does not exist")]
    BsoNotFound,

    #[error("Specified batch does not exist")]
    BatchNotFound,

    #[error("Invalid collection name")]
    InvalidCollectionName,

    #[error("Invalid bso id")]
    InvalidBsoId,

    #[error("Invalid sortindex")]
    InvalidSortIndex,

    #[error("Invalid ttl")]
    InvalidTtl,

    #[error("Nothing to do")]
    NothingToDo,

    #[error("Element is stopping or stopped")]
    ElementStopped,

    #[error("Pool is shutting down")]
    PoolStopped,

    #[error("Unexpected error: {}", _0)]
    Internal(String),
}

impl DbError {
    pub fn kind(&self) -> &DbErrorKind {
        &self.kind
    }

    pub fn internal(msg: String) -> Self {
        DbErrorKind::Internal(msg).into()
    }

    pub fn batch_not_found() -> Self {
        DbErrorKind::BatchNotFound.into()
    }

    pub fn bso_not_found() -> Self {
        DbErrorKind::BsoNotFound.into()
    }

    pub fn collection_not_found() -> Self {
        DbErrorKind::CollectionNotFound.into()
    }

    pub fn element_stopped() -> Self {
        DbErrorKind::ElementStopped.into()
    }

    pub fn pool_stopped() -> Self {
        DbErrorKind::PoolStopped.into()
    }

    pub fn is_collection_not_found(&self) -> bool {
        matches!(self.kind, DbErrorKind::CollectionNotFound)
    }

    pub fn is_bso_not_found(&self) -> bool {
        matches!(self.kind, DbErrorKind::BsoNotFound)
    }

    pub fn is_batch_not_found(&self) -> bool {
        matches!(self.kind, DbErrorKind::BatchNotFound)
    }

    pub fn is_element_stopped(&self) -> bool {
        matches!(self.kind, DbErrorKind::ElementStopped)
    }

    pub fn is_pool_stopped(&self) -> bool {
        matches!(self.kind, DbErrorKind::PoolStopped)
    }

    /// Whether the error is worth a log line with its cause attached.
    pub fn is_reportable(&self) -> bool {
        matches!(self.kind, DbErrorKind::Internal(_))
    }

    pub fn metric_label(&self) -> Option<&'static str> {
        match self.kind {
            DbErrorKind::ElementStopped => Some("storage.element_stopped"),
            DbErrorKind::PoolStopped => Some("storage.pool_stopped"),
            _ => None,
        }
    }
}

impl From<DbErrorKind> for DbError {
    fn from(kind: DbErrorKind) -> Self {
        let status = match kind {
            DbErrorKind::CollectionNotFound | DbErrorKind::BsoNotFound => StatusCode::NOT_FOUND,
            // Matching the Python code here (a 400 vs 404)
            DbErrorKind::BatchNotFound => StatusCode::BAD_REQUEST,
            DbErrorKind::InvalidCollectionName
            | DbErrorKind::InvalidBsoId
            | DbErrorKind::InvalidSortIndex
            | DbErrorKind::InvalidTtl
            | DbErrorKind::NothingToDo => StatusCode::BAD_REQUEST,
            DbErrorKind::ElementStopped => StatusCode::CONFLICT,
            DbErrorKind::PoolStopped => StatusCode::SERVICE_UNAVAILABLE,
            DbErrorKind::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        Self {
            kind,
            status,
            backtrace: Backtrace::new(),
        }
    }
}

impl_fmt_display!(DbError, DbErrorKind);

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.source()
    }
}

impl From<diesel::result::Error> for DbError {
    fn from(inner: diesel::result::Error) -> Self {
        DbError::internal(inner.to_string())
    }
}

impl From<diesel::result::ConnectionError> for DbError {
    fn from(inner: diesel::result::ConnectionError) -> Self {
        DbError::internal(inner.to_string())
    }
}

impl From<std::io::Error> for DbError {
    fn from(inner: std::io::Error) -> Self {
        DbError::internal(inner.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(inner: serde_json::Error) -> Self {
        DbError::internal(inner.to_string())
    }
}
