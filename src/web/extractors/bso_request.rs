use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use futures::future::LocalBoxFuture;

use super::{BsoParam, BsoQueryParams, CollectionParam, UserIdParam};
use crate::server::metrics::Metrics;

/// BSO Request Delete/Get extractor
///
/// Extracts/validates information needed for BSO delete/get requests.
#[derive(Debug)]
pub struct BsoRequest {
    pub collection: String,
    pub user_id: UserIdParam,
    pub query: BsoQueryParams,
    pub bso: String,
    pub metrics: Metrics,
}

impl FromRequest for BsoRequest {
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let req = req.clone();
        let mut payload = payload.take();
        Box::pin(async move {
            let (user_id, query, collection, bso) =
                <(UserIdParam, BsoQueryParams, CollectionParam, BsoParam)>::from_request(
                    &req,
                    &mut payload,
                )
                .await?;
            let collection = collection.collection;

            Ok(BsoRequest {
                collection,
                user_id,
                query,
                bso: bso.bso,
                metrics: Metrics::extract(&req).await?,
            })
        })
    }
}

impl BsoRequest {
    pub fn emit_api_metric(&self, label: &'static str) {
        self.metrics.incr(label)
    }
}
