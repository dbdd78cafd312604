//! Middleware #7 (spec §4.A "Server-Timing"): measures wall time spent in
//! the rest of the pipeline plus the handler and reports it via the
//! standard `Server-Timing` response header.

use std::task::{Context, Poll};
use std::time::Instant;

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::{HeaderName, HeaderValue},
    Error,
};
use futures::future::{self, LocalBoxFuture, TryFutureExt};

#[derive(Default, Clone, Copy)]
pub struct ServerTiming;

impl<S, B> Transform<S> for ServerTiming
where
    S: Service<Request = ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Request = ServiceRequest;
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = ServerTimingMiddleware<S>;
    type Future = LocalBoxFuture<'static, Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        Box::pin(future::ok(ServerTimingMiddleware { service }))
    }
}

pub struct ServerTimingMiddleware<S> {
    service: S,
}

impl<S, B> Service for ServerTimingMiddleware<S>
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
        let start = Instant::now();
        Box::pin(self.service.call(req).and_then(move |mut resp| {
            let dur_ms = start.elapsed().as_secs_f64() * 1000.0;
            let value = format!("total;dur={:.2}", dur_ms);
            if let Ok(header) = HeaderValue::from_str(&value) {
                resp.headers_mut()
                    .insert(HeaderName::from_static("server-timing"), header);
            }
            future::ok(resp)
        }))
    }
}
