//! Middleware #2 (spec §4.A "Favicon short-circuit"): answers
//! `/favicon.ico` directly so it never reaches routing or the capture
//! stages.

use std::task::{Context, Poll};

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::header::CONTENT_TYPE,
    Error, HttpResponse,
};
use futures::future::{self, LocalBoxFuture};

const FAVICON_BYTES: &[u8] = &[
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x01, 0x01, 0x00, 0x00, 0x01, 0x00, 0x20, 0x00, 0x30,
    0x00, 0x00, 0x00, 0x16, 0x00, 0x00, 0x00,
];

#[derive(Default, Clone, Copy)]
pub struct Favicon;

impl<S, B> Transform<S> for Favicon
where
    S: Service<Request = ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Request = ServiceRequest;
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = FaviconMiddleware<S>;
    type Future = LocalBoxFuture<'static, Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        Box::pin(future::ok(FaviconMiddleware { service }))
    }
}

pub struct FaviconMiddleware<S> {
    service: S,
}

impl<S, B> Service for FaviconMiddleware<S>
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
        if req.path() == "/favicon.ico" {
            let resp = HttpResponse::Ok()
                .insert_header((CONTENT_TYPE, "image/x-icon"))
                .body(FAVICON_BYTES.to_vec());
            return Box::pin(future::ok(req.into_response(resp.into_body())));
        }
        Box::pin(self.service.call(req))
    }
}
