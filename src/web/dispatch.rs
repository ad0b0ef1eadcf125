//! Routes a request to its user's store and serializes it there.
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_web::{
    dev::Payload,
    http::{header, Method, StatusCode},
    web::Data,
    Error, FromRequest, HttpMessage, HttpRequest, HttpResponse,
};
use futures::future::LocalBoxFuture;

use crate::db::{pool::StorePool, DbError, SyncTimestamp, UserDb};
use crate::error::{ApiError, ApiErrorKind};
use crate::server::{metrics::Metrics, ServerState};
use crate::web::extractors::{
    BsoParam, CollectionParam, PreConditionHeader, PreConditionHeaderOpt, UserIdParam,
};
use crate::web::X_LAST_MODIFIED;

/// How many times a request knocks on a stopping element before giving up
/// with a 409.
const STOPPED_RETRIES: u32 = 3;
const STOPPED_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Minimum spacing between two writes for one user. One millisecond more
/// than the 10 ms timestamp quantum, so consecutive writes can never round
/// to the same value.
const WRITE_SPACING: Duration = Duration::from_millis(11);

/// A freshly (re)opened element has no record of the previous write, which
/// may have landed within the current quantum. Sleeping out one full quantum
/// covers it.
const COLD_WRITE_SPACING: Duration = Duration::from_millis(10);

/// Per-request dispatch context: which user, which resource, and the
/// precondition headers that gate the work.
#[derive(Clone)]
pub struct UserDispatch {
    pool: Arc<StorePool>,
    pub user_id: UserIdParam,
    collection: Option<String>,
    bso_opt: Option<String>,
    is_read: bool,
    precondition: PreConditionHeaderOpt,
    metrics: Metrics,
}

impl UserDispatch {
    /// Run `action` against the user's store with the request-level
    /// guarantees in place:
    ///
    /// 1. the per-user request lock is held for the whole call, so requests
    ///    to one user are strictly serial;
    /// 2. writes sleep out the remainder of the write-spacing window first,
    ///    making every write timestamp strictly greater than the last;
    /// 3. `X-If-Modified-Since` / `X-If-Unmodified-Since` are evaluated
    ///    against the addressed resource before any work happens;
    /// 4. the response carries `X-Last-Modified` even when the action didn't
    ///    set one.
    pub async fn serialized_http<F, Fut>(&self, action: F) -> Result<HttpResponse, ApiError>
    where
        F: FnOnce(UserDb) -> Fut,
        Fut: Future<Output = Result<HttpResponse, ApiError>>,
    {
        let mut timer_metrics = self.metrics.clone();
        timer_metrics.start_timer("storage.request", None);

        let element = self.acquire_element().await?;
        let mut guard = element.acquire().await;

        if !self.is_read {
            let delay = match guard.last_change {
                None => COLD_WRITE_SPACING,
                Some(last_change) => WRITE_SPACING.saturating_sub(last_change.elapsed()),
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        let db = UserDb::new(
            Arc::clone(&element),
            Arc::clone(self.pool.blocking_threadpool()),
            SyncTimestamp::now(),
        );

        let resource_ts = db
            .extract_resource(self.collection.clone(), self.bso_opt.clone())
            .await?;

        if let Some(precondition) = &self.precondition.opt {
            let status = match precondition {
                PreConditionHeader::IfModifiedSince(header_ts) if resource_ts <= *header_ts => {
                    StatusCode::NOT_MODIFIED
                }
                PreConditionHeader::IfUnmodifiedSince(header_ts) if resource_ts > *header_ts => {
                    StatusCode::PRECONDITION_FAILED
                }
                _ => StatusCode::OK,
            };
            if status != StatusCode::OK {
                return Ok(HttpResponse::build(status)
                    .insert_header((X_LAST_MODIFIED, resource_ts.as_header()))
                    .finish());
            };
        }

        let mut resp = action(db).await?;

        if !self.is_read && resp.status().is_success() {
            guard.last_change = Some(Instant::now());
        }
        element.touch();

        if resp.headers().contains_key(X_LAST_MODIFIED) {
            return Ok(resp);
        }

        // See if we already extracted one and use that if possible
        if let Ok(ts_header) = header::HeaderValue::from_str(&resource_ts.as_header()) {
            trace!("📝 Setting X-Last-Modified {:?}", ts_header);
            resp.headers_mut()
                .insert(header::HeaderName::from_static(X_LAST_MODIFIED), ts_header);
        }

        Ok(resp)
    }

    /// Fetch the user's element, backing off while a stopping element
    /// unlinks itself. Exhausting the retries surfaces as 409 with
    /// Retry-After; a shut-down pool as 503.
    async fn acquire_element(&self) -> Result<Arc<crate::db::pool::Element>, ApiError> {
        let mut attempt = 0;
        loop {
            match self.pool.element(&self.user_id.uid).await {
                Ok(element) => return Ok(element),
                Err(e) if e.is_element_stopped() && attempt < STOPPED_RETRIES => {
                    attempt += 1;
                    self.metrics.incr("storage.pool.element.retry");
                    tokio::time::sleep(STOPPED_RETRY_DELAY).await;
                }
                Err(e) => {
                    if e.is_element_stopped() {
                        self.metrics.incr("storage.pool.element.conflict");
                    }
                    return Err(e.into());
                }
            }
        }
    }
}

impl FromRequest for UserDispatch {
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        // Cache in extensions to avoid parsing the path twice
        if let Some(dispatch) = req.extensions().get::<Self>() {
            let dispatch = dispatch.clone();
            return Box::pin(async move { Ok(dispatch) });
        }

        let req = req.clone();
        Box::pin(async move {
            let state = match req.app_data::<Data<ServerState>>() {
                Some(state) => state,
                None => {
                    let apie: ApiError = ApiErrorKind::NoServerState.into();
                    return Err(apie.into());
                }
            };

            if state.pool.is_stopped() {
                let apie: ApiError = DbError::pool_stopped().into();
                return Err(apie.into());
            }

            let user_id = UserIdParam::extrude(req.uri(), &mut req.extensions_mut())?;
            let collection = CollectionParam::extrude(req.uri(), &mut req.extensions_mut())?
                .map(|collection| collection.collection);
            let bso = BsoParam::extrude(req.head(), &mut req.extensions_mut()).ok();
            let bso_opt = bso.map(|b| b.bso);

            let method = req.method().clone();
            let is_read = matches!(method, Method::GET | Method::HEAD);
            let precondition = PreConditionHeaderOpt::extrude(req.headers())?;

            let dispatch = Self {
                pool: Arc::clone(&state.pool),
                user_id,
                collection,
                bso_opt,
                is_read,
                precondition,
                metrics: Metrics::extract(&req).await?,
            };

            req.extensions_mut().insert(dispatch.clone());
            Ok(dispatch)
        })
    }
}
