//! Middleware #6 (spec §4.A "Language detect"): sets a request-local
//! locale from `Accept-Language`, falling back to a default when the
//! header is absent or unparsable.

use std::task::{Context, Poll};

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::header::ACCEPT_LANGUAGE,
    Error, HttpMessage,
};
use futures::future::{self, LocalBoxFuture};

pub const DEFAULT_LOCALE: &str = "en";

#[derive(Debug, Clone)]
pub struct Locale(pub String);

fn primary_tag(accept_language: &str) -> Option<String> {
    accept_language
        .split(',')
        .next()
        .map(|tag| tag.split(';').next().unwrap_or(tag).trim().to_owned())
        .filter(|tag| !tag.is_empty())
}

#[derive(Default, Clone, Copy)]
pub struct LanguageDetect;

impl<S, B> Transform<S> for LanguageDetect
where
    S: Service<Request = ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Request = ServiceRequest;
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = LanguageDetectMiddleware<S>;
    type Future = LocalBoxFuture<'static, Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        Box::pin(future::ok(LanguageDetectMiddleware { service }))
    }
}

pub struct LanguageDetectMiddleware<S> {
    service: S,
}

impl<S, B> Service for LanguageDetectMiddleware<S>
where
    S: Service<Request = ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Request = ServiceRequest;
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, req: ServiceRequest) -> Self::Future {
        let locale = req
            .headers()
            .get(ACCEPT_LANGUAGE)
            .and_then(|v| v.to_str().ok())
            .and_then(primary_tag)
            .unwrap_or_else(|| DEFAULT_LOCALE.to_owned());
        req.extensions_mut().insert(Locale(locale));
        Box::pin(self.service.call(req))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn picks_the_first_tag_and_drops_quality_weights() {
        assert_eq!(primary_tag("fr-CA;q=0.9, en;q=0.8").as_deref(), Some("fr-CA"));
    }

    #[test]
    fn empty_header_yields_nothing() {
        assert_eq!(primary_tag(""), None);
    }
}
