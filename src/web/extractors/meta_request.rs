use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use futures::future::{FutureExt, LocalBoxFuture};

use super::UserIdParam;
use crate::server::metrics::Metrics;

/// Information Requests extractor
///
/// Only the user identifier is required for information requests:
/// https://mozilla-services.readthedocs.io/en/latest/storage/apis-1.5.html#general-info
pub struct MetaRequest {
    pub user_id: UserIdParam,
    pub metrics: Metrics,
}

impl FromRequest for MetaRequest {
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let req = req.clone();
        let mut payload = Payload::None;
        async move {
            let user_id = UserIdParam::from_request(&req, &mut payload).await?;

            Ok(MetaRequest {
                user_id,
                metrics: Metrics::extract(&req).await?,
            })
        }
        .boxed_local()
    }
}

impl MetaRequest {
    pub fn emit_api_metric(&self, label: &'static str) {
        self.metrics.incr(label)
    }
}
