use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use futures::future::{FutureExt, LocalBoxFuture};

use super::{
    get_accepted, BsoQueryParams, CollectionParam, RequestErrorLocation, UserIdParam,
    ACCEPTED_CONTENT_TYPES,
};
use crate::server::metrics::Metrics;
use crate::web::error::ValidationErrorKind;

/// Desired reply format for a Collection Get request
#[derive(Copy, Clone, Debug)]
pub enum ReplyFormat {
    Json,
    Newlines,
}

/// Collection Request Delete/Get extractor
///
/// Extracts/validates information needed for collection delete/get requests.
pub struct CollectionRequest {
    pub collection: String,
    pub user_id: UserIdParam,
    pub query: BsoQueryParams,
    pub reply: ReplyFormat,
    pub metrics: Metrics,
}

impl FromRequest for CollectionRequest {
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let req = req.clone();
        let mut payload = Payload::None;
        async move {
            let (user_id, query, collection) =
                <(UserIdParam, BsoQueryParams, CollectionParam)>::from_request(&req, &mut payload)
                    .await?;
            let collection = collection.collection;

            let accept = get_accepted(&req, &ACCEPTED_CONTENT_TYPES, "application/json");
            let reply = match accept.as_str() {
                "application/newlines" => ReplyFormat::Newlines,
                "application/json" | "" => ReplyFormat::Json,
                _ => {
                    return Err(ValidationErrorKind::FromDetails(
                        format!("Invalid Accept header specified: {:?}", accept),
                        RequestErrorLocation::Header,
                        Some("accept".to_string()),
                        Some("request.error.invalid_accept"),
                    )
                    .into());
                }
            };

            Ok(CollectionRequest {
                collection,
                user_id,
                query,
                reply,
                metrics: Metrics::extract(&req).await?,
            })
        }
        .boxed_local()
    }
}

impl CollectionRequest {
    pub fn emit_api_metric(&self, label: &'static str) {
        self.metrics.incr(label)
    }
}
