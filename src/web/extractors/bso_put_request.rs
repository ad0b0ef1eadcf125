use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use futures::future::LocalBoxFuture;

use super::{
    BsoBody, BsoParam, BsoQueryParams, CollectionParam, RequestErrorLocation, UserIdParam,
    KNOWN_BAD_PAYLOAD_REGEX,
};
use crate::server::metrics::Metrics;
use crate::web::error::ValidationErrorKind;

/// BSO Request Put extractor
///
/// Extracts/validates information needed for BSO put requests.
pub struct BsoPutRequest {
    pub collection: String,
    pub user_id: UserIdParam,
    pub query: BsoQueryParams,
    pub bso: String,
    pub body: BsoBody,
    pub metrics: Metrics,
}

impl FromRequest for BsoPutRequest {
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let req = req.clone();
        let mut payload = payload.take();
        Box::pin(async move {
            let (user_id, query, collection, bso, body) =
                <(
                    UserIdParam,
                    BsoQueryParams,
                    CollectionParam,
                    BsoParam,
                    BsoBody,
                )>::from_request(&req, &mut payload)
                .await?;
            let collection = collection.collection;

            if collection == "crypto" {
                // Verify the client didn't mess up the crypto if we have a
                // payload
                if let Some(ref data) = body.payload {
                    if KNOWN_BAD_PAYLOAD_REGEX.is_match(data) {
                        return Err(ValidationErrorKind::FromDetails(
                            "Known-bad BSO payload".to_owned(),
                            RequestErrorLocation::Body,
                            Some("bsos".to_owned()),
                            Some("request.process.known_bad_bso"),
                        )
                        .into());
                    }
                }
            }

            Ok(BsoPutRequest {
                collection,
                user_id,
                query,
                bso: bso.bso,
                body,
                metrics: Metrics::extract(&req).await?,
            })
        })
    }
}

impl BsoPutRequest {
    pub fn emit_api_metric(&self, label: &'static str) {
        self.metrics.incr(label)
    }
}
