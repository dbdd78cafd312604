//! Middleware #5 (spec §4.A "CSRF"): enforced only for cross-origin
//! requests, bypassed for the replay marker header and for localhost/
//! same-host origins.

use std::task::{Context, Poll};

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::header::HOST,
    Error,
};
use futures::future::{self, LocalBoxFuture};
use obs_common::ApiEnvelope;

use crate::error::{ApiError, ApiErrorKind};
use crate::REPLAY_MARKER_HEADER;

fn is_localhost(origin: &str) -> bool {
    origin.contains("localhost") || origin.contains("127.0.0.1")
}

fn same_host(origin: &str, host: Option<&str>) -> bool {
    match (url::Url::parse(origin).ok(), host) {
        (Some(u), Some(host)) => u.host_str().map(|h| h == host.split(':').next().unwrap_or(host)).unwrap_or(false),
        _ => false,
    }
}

#[derive(Default, Clone, Copy)]
pub struct Csrf;

impl<S, B> Transform<S> for Csrf
where
    S: Service<Request = ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Request = ServiceRequest;
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = CsrfMiddleware<S>;
    type Future = LocalBoxFuture<'static, Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        Box::pin(future::ok(CsrfMiddleware { service }))
    }
}

pub struct CsrfMiddleware<S> {
    service: S,
}

impl<S, B> Service for CsrfMiddleware<S>
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
        let is_replay = req
            .headers()
            .get(REPLAY_MARKER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "true")
            .unwrap_or(false);

        let origin = req
            .headers()
            .get(actix_web::http::header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_owned());

        let host = req
            .headers()
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_owned());

        let blocked = match &origin {
            None => false,
            Some(origin) if is_replay || is_localhost(origin) || same_host(origin, host.as_deref()) => false,
            Some(_) => true,
        };

        if blocked {
            let err = ApiError::new(ApiErrorKind::Forbidden("cross-origin request rejected".into()));
            let body: ApiEnvelope<()> = ApiEnvelope::err(err.body());
            let resp = actix_web::HttpResponse::Forbidden().json(body);
            return Box::pin(future::ok(req.into_response(resp.into_body())));
        }
        Box::pin(self.service.call(req))
    }
}
