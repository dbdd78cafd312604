//! Middleware #1 (spec §4.A "Request-ID"): generates an opaque ID per
//! request and exposes it both on the request extensions (for downstream
//! middleware/handlers) and as a response header.

use std::task::{Context, Poll};

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::{HeaderName, HeaderValue},
    Error, HttpMessage,
};
use futures::future::{self, LocalBoxFuture, TryFutureExt};

#[derive(Debug, Clone)]
pub struct RequestId(pub String);

#[derive(Default, Clone, Copy)]
pub struct RequestIdMiddlewareFactory;

impl<S, B> Transform<S> for RequestIdMiddlewareFactory
where
    S: Service<Request = ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Request = ServiceRequest;
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestIdMiddleware<S>;
    type Future = LocalBoxFuture<'static, Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        Box::pin(future::ok(RequestIdMiddleware { service }))
    }
}

pub struct RequestIdMiddleware<S> {
    service: S,
}

impl<S, B> Service for RequestIdMiddleware<S>
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
        let id = uuid::Uuid::new_v4().to_string();
        req.extensions_mut().insert(RequestId(id.clone()));
        Box::pin(self.service.call(req).and_then(move |mut resp| {
            if let Ok(value) = HeaderValue::from_str(&id) {
                resp.headers_mut()
                    .insert(HeaderName::from_static("x-request-id"), value);
            }
            future::ok(resp)
        }))
    }
}
