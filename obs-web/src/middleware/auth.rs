//! Shared request-extension type for the authenticated principal. The JWT
//! verification itself lives in the server crate (it owns the signing
//! secret); this crate only needs a stable type other middleware can look
//! for on `req.extensions()` once the server has inserted it.

use actix_web::{dev::Payload, FromRequest, HttpRequest};
use futures::future::{ready, Ready};

use crate::{ApiError, ApiErrorKind};

#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    pub id: i64,
}

impl FromRequest for AuthenticatedUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;
    type Config = ();

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let user = req.extensions().get::<AuthenticatedUser>().copied();
        ready(user.ok_or_else(|| ApiError::new(ApiErrorKind::Unauthorized)))
    }
}
