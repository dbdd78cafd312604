//! Middleware #10 (spec §4.A): sets the fixed security-header set on every
//! response and strips `X-Powered-By`. Modeled on the teacher's
//! `WeaveTimestamp` transform (`obs-web` shares its actix-web 3 shape).

use std::task::{Context, Poll};

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::{header, HeaderName, HeaderValue},
    Error,
};
use futures::future::{self, LocalBoxFuture, TryFutureExt};

#[derive(Clone, Copy)]
pub struct SecurityHeaders {
    pub production: bool,
}

impl SecurityHeaders {
    pub fn new(production: bool) -> Self {
        Self { production }
    }
}

impl<S, B> Transform<S> for SecurityHeaders
where
    S: Service<Request = ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Request = ServiceRequest;
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = SecurityHeadersMiddleware<S>;
    type Future = LocalBoxFuture<'static, Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        let production = self.production;
        Box::pin(future::ok(SecurityHeadersMiddleware { service, production }))
    }
}

pub struct SecurityHeadersMiddleware<S> {
    service: S,
    production: bool,
}

impl<S, B> Service for SecurityHeadersMiddleware<S>
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
        let production = self.production;
        Box::pin(self.service.call(req).and_then(move |mut resp| {
            let headers = resp.headers_mut();
            headers.insert(
                HeaderName::from_static("x-frame-options"),
                HeaderValue::from_static("DENY"),
            );
            headers.insert(
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            );
            headers.insert(
                HeaderName::from_static("x-xss-protection"),
                HeaderValue::from_static("1; mode=block"),
            );
            headers.insert(
                header::REFERRER_POLICY,
                HeaderValue::from_static("strict-origin-when-cross-origin"),
            );
            headers.insert(
                HeaderName::from_static("permissions-policy"),
                HeaderValue::from_static(
                    "camera=(), microphone=(), geolocation=(), accelerometer=(), gyroscope=()",
                ),
            );
            headers.insert(
                header::CONTENT_SECURITY_POLICY,
                HeaderValue::from_static("default-src 'self'; script-src 'self'"),
            );
            if production {
                headers.insert(
                    header::STRICT_TRANSPORT_SECURITY,
                    HeaderValue::from_static("max-age=63072000; includeSubDomains"),
                );
            }
            headers.remove("x-powered-by");
            future::ok(resp)
        }))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use actix_web::{test, web, App, HttpResponse};

    #[actix_rt::test]
    async fn sets_the_fixed_header_set() {
        let mut app = test::init_service(
            App::new()
                .wrap(SecurityHeaders::new(false))
                .route("/", web::get().to(|| HttpResponse::Ok().finish())),
        )
        .await;
        let req = test::TestRequest::get().uri("/").to_request();
        let resp = test::call_service(&mut app, req).await;
        assert!(resp.headers().contains_key("x-frame-options"));
        assert!(resp.headers().contains_key(header::X_CONTENT_TYPE_OPTIONS));
        assert!(!resp.headers().contains_key(header::STRICT_TRANSPORT_SECURITY));
    }

    #[actix_rt::test]
    async fn adds_hsts_only_in_production() {
        let mut app = test::init_service(
            App::new()
                .wrap(SecurityHeaders::new(true))
                .route("/", web::get().to(|| HttpResponse::Ok().finish())),
        )
        .await;
        let req = test::TestRequest::get().uri("/").to_request();
        let resp = test::call_service(&mut app, req).await;
        assert!(resp.headers().contains_key(header::STRICT_TRANSPORT_SECURITY));
    }
}
