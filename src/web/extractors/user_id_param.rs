use actix_web::{
    dev::{Extensions, Payload},
    http::Uri,
    Error, FromRequest, HttpMessage, HttpRequest,
};
use futures::future::{self, Ready};
use lazy_static::lazy_static;
use regex::Regex;

use super::RequestErrorLocation;
use crate::server::UID_REGEX;
use crate::web::error::ValidationErrorKind;

lazy_static! {
    static ref VALID_UID_REGEX: Regex = Regex::new(&format!("^{}$", UID_REGEX)).unwrap();
}

/// The authenticated user, as the upstream token layer put it into the URL.
///
/// Everything in front of this server (token validation, nonce replay
/// protection) has already vouched for the uid by the time a request gets
/// here, so the path segment is taken at face value; only its shape is
/// checked since it also names the on-disk database file.
#[derive(Clone, Debug)]
pub struct UserIdParam {
    pub uid: String,
}

impl UserIdParam {
    fn uid_from_path(uri: &Uri) -> Result<Self, Error> {
        // path: "/1.5/{uid}[/...]"
        let elements: Vec<&str> = uri.path().split('/').collect();
        let uid = match (elements.get(1), elements.get(2)) {
            (Some(&"1.5"), Some(uid)) if !uid.is_empty() => *uid,
            _ => {
                return Err(ValidationErrorKind::FromDetails(
                    "Missing uid".to_owned(),
                    RequestErrorLocation::Path,
                    Some("uid".to_owned()),
                    Some("request.process.missing_uid"),
                ))?
            }
        };
        if !VALID_UID_REGEX.is_match(uid) {
            return Err(ValidationErrorKind::FromDetails(
                "Invalid uid".to_owned(),
                RequestErrorLocation::Path,
                Some("uid".to_owned()),
                Some("request.process.invalid_uid"),
            ))?;
        }
        Ok(Self {
            uid: uid.to_owned(),
        })
    }

    pub fn extrude(uri: &Uri, extensions: &mut Extensions) -> Result<Self, Error> {
        if let Some(user_id) = extensions.get::<UserIdParam>() {
            return Ok(user_id.clone());
        }
        let user_id = Self::uid_from_path(uri)?;
        extensions.insert(user_id.clone());
        Ok(user_id)
    }
}

impl FromRequest for UserIdParam {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        future::ready(Self::extrude(req.uri(), &mut req.extensions_mut()))
    }
}
