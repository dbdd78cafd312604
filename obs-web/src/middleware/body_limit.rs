//! Middleware #9 (spec §4.A "Body-size limit"): for POST/PUT/PATCH/DELETE,
//! picks a cap by declared content-type and short-circuits with 413 before
//! the inner handler runs when `Content-Length` exceeds it. Requests
//! without a `Content-Length` are passed through untouched.

use std::task::{Context, Poll};

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::Method,
    Error, HttpResponse,
};
use futures::future::{self, LocalBoxFuture};
use obs_common::ApiEnvelope;

use crate::error::{ApiError, ApiErrorKind};

const JSON_CAP: u64 = 1024 * 1024;
const FORM_CAP: u64 = 10 * 1024 * 1024;
const BINARY_CAP: u64 = 50 * 1024 * 1024;
const DEFAULT_CAP: u64 = 1024 * 1024;

fn cap_for_content_type(content_type: Option<&str>) -> u64 {
    match content_type {
        Some(ct) if ct.starts_with("application/json") => JSON_CAP,
        Some(ct) if ct.starts_with("application/x-www-form-urlencoded") || ct.starts_with("multipart/form-data") => {
            FORM_CAP
        }
        Some(ct) if ct.starts_with("image/") || ct.starts_with("video/") || ct.starts_with("audio/") || ct.starts_with("application/octet-stream") => {
            BINARY_CAP
        }
        _ => DEFAULT_CAP,
    }
}

fn guarded_method(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

#[derive(Default, Clone, Copy)]
pub struct BodySizeLimit;

impl<S, B> Transform<S> for BodySizeLimit
where
    S: Service<Request = ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Request = ServiceRequest;
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = BodySizeLimitMiddleware<S>;
    type Future = LocalBoxFuture<'static, Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        Box::pin(future::ok(BodySizeLimitMiddleware { service }))
    }
}

pub struct BodySizeLimitMiddleware<S> {
    service: S,
}

impl<S, B> Service for BodySizeLimitMiddleware<S>
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
        if !guarded_method(req.method()) {
            return Box::pin(self.service.call(req));
        }
        let content_length = req
            .headers()
            .get(actix_web::http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let received = match content_length {
            Some(v) => v,
            None => return Box::pin(self.service.call(req)),
        };
        let content_type = req
            .headers()
            .get(actix_web::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let cap = cap_for_content_type(content_type);
        if received > cap {
            let err = ApiError::new(ApiErrorKind::PayloadTooLarge {
                received,
                allowed: cap,
            });
            let body: ApiEnvelope<()> = ApiEnvelope::err(err.body());
            let resp = HttpResponse::PayloadTooLarge().json(body);
            return Box::pin(future::ok(req.into_response(resp.into_body())));
        }
        Box::pin(self.service.call(req))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use actix_web::{http::StatusCode, test, web, App, HttpResponse};

    #[actix_rt::test]
    async fn rejects_oversized_json_body_before_the_handler_runs() {
        let mut app = test::init_service(
            App::new()
                .wrap(BodySizeLimit::default())
                .route("/anything", web::post().to(|| HttpResponse::Ok().finish())),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/anything")
            .insert_header(("content-type", "application/json"))
            .insert_header(("content-length", (1024 * 1024 + 1).to_string()))
            .to_request();
        let resp = test::call_service(&mut app, req).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[actix_rt::test]
    async fn allows_body_at_exactly_the_cap() {
        let mut app = test::init_service(
            App::new()
                .wrap(BodySizeLimit::default())
                .route("/anything", web::post().to(|| HttpResponse::Ok().finish())),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/anything")
            .insert_header(("content-type", "application/json"))
            .insert_header(("content-length", (1024 * 1024).to_string()))
            .to_request();
        let resp = test::call_service(&mut app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_rt::test]
    async fn get_requests_are_never_guarded() {
        let mut app = test::init_service(
            App::new()
                .wrap(BodySizeLimit::default())
                .route("/anything", web::get().to(|| HttpResponse::Ok().finish())),
        )
        .await;
        let req = test::TestRequest::get()
            .uri("/anything")
            .insert_header(("content-length", (1024 * 1024 * 100).to_string()))
            .to_request();
        let resp = test::call_service(&mut app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
