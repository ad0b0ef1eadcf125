//! Error types and macros.
#![allow(clippy::single_match, clippy::large_enum_variant)]
use std::convert::From;
use std::error::Error;

use actix_web::{
    dev::ServiceResponse, error::ResponseError, http::StatusCode,
    middleware::ErrorHandlerResponse, HttpResponse, HttpResponseBuilder, Result,
};
use backtrace::Backtrace;
use serde::Serialize;
use thiserror::Error;

use crate::db::DbError;
use crate::web::error::ValidationError;

#[macro_export]
macro_rules! from_error {
    ($from:ty, $to:ty, $to_kind:expr) => {
        impl From<$from> for $to {
            fn from(inner: $from) -> $to {
                $to_kind(inner).into()
            }
        }
    };
}

#[macro_export]
macro_rules! impl_fmt_display {
    ($error:ty, $kind:ty) => {
        impl std::fmt::Display for $error {
            fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.kind, formatter)
            }
        }
    };
}

/// Legacy Sync 1.1 error codes, which Sync 1.5 also returns by replacing the
/// descriptive JSON information and replacing it with one of these error
/// codes.
#[allow(dead_code)]
#[derive(Serialize)]
pub enum WeaveError {
    /// Unknown error
    UnknownError = 0,
    /// Illegal method/protocol
    IllegalMethod = 1,
    /// Json parse failure
    MalformedJson = 6,
    /// Invalid Weave Basic Object
    InvalidWbo = 8,
    /// Size limit exceeded
    SizeLimitExceeded = 14,
}

/// Common `Result` type.
pub type ApiResult<T> = Result<T, ApiError>;

/// How long, in seconds, a client should wait before retrying against a
/// stopping element or a shutting-down server.
pub const RETRY_AFTER: u8 = 60;

/// Top-level error type.
#[derive(Debug)]
pub struct ApiError {
    kind: ApiErrorKind,
    pub backtrace: Box<Backtrace>,
    status: StatusCode,
}

/// Top-level ErrorKind.
#[derive(Error, Debug)]
pub enum ApiErrorKind {
    #[error("{}", _0)]
    Db(DbError),

    #[error("No app_data ServerState")]
    NoServerState,

    #[error("{}", _0)]
    Internal(String),

    #[error("{}", _0)]
    Validation(ValidationError),
}

impl ApiErrorKind {
    pub fn metric_label(&self) -> Option<&'static str> {
        match self {
            ApiErrorKind::Db(err) => err.metric_label(),
            ApiErrorKind::Validation(err) => err.metric_label(),
            _ => None,
        }
    }
}

impl ApiError {
    fn weave_error_code(&self) -> WeaveError {
        match &self.kind {
            ApiErrorKind::Validation(ver) => ver.weave_error_code(),
            _ => WeaveError::UnknownError,
        }
    }

    /// Whether the failure deserves a log line with its cause.
    pub fn is_reportable(&self) -> bool {
        self.status.is_server_error()
            && match &self.kind {
                ApiErrorKind::Db(dbe) => dbe.is_reportable(),
                _ => self.kind.metric_label().is_none(),
            }
    }

    /// Replace the outbound 404 message with the legacy numeric body.
    pub fn render_404<B>(res: ServiceResponse<B>) -> Result<ErrorHandlerResponse<B>> {
        let resp =
            HttpResponseBuilder::new(StatusCode::NOT_FOUND).json(WeaveError::UnknownError as u32);
        Ok(ErrorHandlerResponse::Response(ServiceResponse::new(
            res.request().clone(),
            resp.map_into_right_body(),
        )))
    }

}

impl Error for ApiError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.kind.source()
    }
}

impl From<ApiError> for HttpResponse {
    fn from(inner: ApiError) -> Self {
        ResponseError::error_response(&inner)
    }
}

impl From<std::io::Error> for ApiError {
    fn from(inner: std::io::Error) -> Self {
        ApiErrorKind::Internal(inner.to_string()).into()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(inner: serde_json::Error) -> Self {
        ApiErrorKind::Internal(inner.to_string()).into()
    }
}

impl From<ApiErrorKind> for ApiError {
    fn from(kind: ApiErrorKind) -> Self {
        let status = match &kind {
            ApiErrorKind::Db(error) => error.status,
            ApiErrorKind::NoServerState | ApiErrorKind::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiErrorKind::Validation(error) => error.status,
        };

        Self {
            kind,
            backtrace: Box::new(Backtrace::new()),
            status,
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        self.status
    }

    fn error_response(&self) -> HttpResponse {
        if self.is_reportable() {
            warn!("Request failed: {}", self; "status" => self.status.as_u16());
        }
        // To return a descriptive error response, this would work. We do not
        // unfortunately do that so that we can retain Sync 1.1 backwards
        // compatibility as the Python one does.
        // HttpResponse::build(self.status).json(self)
        //
        // So instead we translate our error to a backwards compatible one
        let mut resp = HttpResponse::build(self.status);
        if self.status == StatusCode::CONFLICT || self.status == StatusCode::SERVICE_UNAVAILABLE {
            resp.insert_header(("Retry-After", RETRY_AFTER.to_string()));
        };
        resp.json(self.weave_error_code() as i32)
    }
}

impl_fmt_display!(ApiError, ApiErrorKind);

impl From<DbError> for ApiError {
    fn from(db_error: DbError) -> Self {
        Self {
            status: db_error.status,
            backtrace: Box::new(Backtrace::new()),
            kind: ApiErrorKind::Db(db_error),
        }
    }
}

from_error!(ValidationError, ApiError, ApiErrorKind::Validation);
