//! Middlewares #11-13 (spec §4.A "metrics capture", "snapshot capture",
//! "access log"): one `Transform` wraps all three, since all three need
//! the same before/after timing and the same request/response facts.
//! Scoped to `/api/v1` (spec §4.A: the raw-metric and snapshot stages
//! apply only under the public/private API surface).
//!
//! Two things push this past the high-level request/response extractors
//! the rest of this crate uses: reading the request body ahead of the
//! handler and putting it back (the `Rc<RefCell<S>>` service wrapper, a
//! standard actix-web middleware technique for holding state across an
//! await point), and reading the response body without disturbing it
//! (wrapping it in a counting/capturing `MessageBody`, the same trick
//! actix-web's own `Logger` uses to track response size).

use std::cell::RefCell;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix_web::{
    dev::{MessageBody, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::CONTENT_TYPE,
    web::Bytes,
    Error, HttpMessage,
};
use futures::future::{self, FutureExt, LocalBoxFuture};
use futures::{stream, StreamExt};
use obs_db::{
    gateway::Gateway,
    models::{
        Geo, Log, LogEntity, LogLevel, NewLog, NewRequestSnapshot, RawMetric, RequestSnapshot,
        RequestSnapshotEntity,
    },
};

use crate::buffer::RawMetricBuffer;
use crate::geo;
use crate::snapshot::{is_json_content_type, query_map, redact_headers, response_headers_map};

const CAPTURED_PREFIX: &str = "/api/v1";
const SNAPSHOT_BODY_CAP: usize = obs_common::SNAPSHOT_BODY_CAP;

#[derive(Clone)]
pub struct CaptureState {
    pub buffer: Arc<RawMetricBuffer>,
    pub snapshots: Gateway<RequestSnapshotEntity>,
    pub logs: Gateway<LogEntity>,
}

/// Wraps a response body to count bytes and, if the content-type is JSON,
/// buffer up to `cap` bytes of it, firing `on_done` once the stream is
/// exhausted. Requires `B: Unpin` so the inner body can be projected
/// without pinning machinery.
struct BodyCapture<B> {
    body: B,
    buffer: Vec<u8>,
    cap: usize,
    capture_text: bool,
    total_len: usize,
    on_done: Option<Box<dyn FnOnce(usize, Vec<u8>) + Send>>,
}

impl<B: MessageBody + Unpin> MessageBody for BodyCapture<B> {
    fn size(&self) -> actix_web::dev::BodySize {
        self.body.size()
    }

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes, Error>>> {
        let this = &mut *self;
        match Pin::new(&mut this.body).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.total_len += chunk.len();
                if this.capture_text && this.buffer.len() < this.cap {
                    this.buffer.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                if let Some(f) = this.on_done.take() {
                    f(this.total_len, std::mem::take(&mut this.buffer));
                }
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

/// Reads the full request payload, reinserting an equivalent stream so the
/// inner handler can still consume it, and returns the bytes read
/// alongside a parsed JSON value when content-type is JSON and the body
/// fits within `cap`.
async fn capture_request_body(req: &mut ServiceRequest, cap: usize) -> Option<serde_json::Value> {
    let is_json = is_json_content_type(
        req.headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
    );

    let mut payload = req.take_payload();
    let mut bytes = Vec::new();
    while let Some(chunk) = payload.next().await {
        match chunk {
            Ok(chunk) => bytes.extend_from_slice(&chunk),
            Err(_) => break,
        }
    }

    let replay = Bytes::from(bytes.clone());
    req.set_payload(Payload::Stream(Box::pin(stream::once(async move {
        Ok::<_, actix_web::error::PayloadError>(replay)
    }))));

    if is_json && !bytes.is_empty() && bytes.len() <= cap {
        serde_json::from_slice(&bytes).ok()
    } else {
        None
    }
}

struct CaptureFacts {
    method: String,
    path: String,
    query: std::collections::HashMap<String, String>,
    headers: std::collections::HashMap<String, String>,
    body: Option<serde_json::Value>,
    geo: Geo,
    user_id: Option<i64>,
    start: std::time::Instant,
}

#[derive(Clone)]
pub struct Capture(pub CaptureState);

impl<S, B> Transform<S> for Capture
where
    S: Service<Request = ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + Unpin + 'static,
{
    type Request = ServiceRequest;
    type Response = ServiceResponse<BodyCapture<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = CaptureMiddleware<S>;
    type Future = LocalBoxFuture<'static, Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        let state = self.0.clone();
        Box::pin(future::ok(CaptureMiddleware {
            service: Rc::new(RefCell::new(service)),
            state,
        }))
    }
}

pub struct CaptureMiddleware<S> {
    service: Rc<RefCell<S>>,
    state: CaptureState,
}

impl<S, B> Service for CaptureMiddleware<S>
where
    S: Service<Request = ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + Unpin + 'static,
{
    type Request = ServiceRequest;
    type Response = ServiceResponse<BodyCapture<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.borrow_mut().poll_ready(cx)
    }

    fn call(&mut self, mut req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        if !req.path().starts_with(CAPTURED_PREFIX) {
            return async move {
                let resp = service.borrow_mut().call(req).await?;
                Ok(resp.map_body(|_, body| BodyCapture {
                    body,
                    buffer: Vec::new(),
                    cap: 0,
                    capture_text: false,
                    total_len: 0,
                    on_done: None,
                }))
            }
            .boxed_local();
        }

        let state = self.state.clone();

        async move {
            let body = capture_request_body(&mut req, SNAPSHOT_BODY_CAP).await;
            let facts = CaptureFacts {
                method: req.method().to_string(),
                path: req.path().to_owned(),
                query: query_map(req.request()),
                headers: redact_headers(req.request()),
                body,
                geo: geo::resolve(req.request()),
                user_id: req
                    .extensions()
                    .get::<crate::middleware::auth::AuthenticatedUser>()
                    .map(|u| u.id),
                start: std::time::Instant::now(),
            };

            let resp = service.borrow_mut().call(req).await?;
            let status = resp.status().as_u16();
            let response_content_type = resp
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_owned());
            let response_headers = response_headers_map(resp.headers());
            let capture_text = is_json_content_type(response_content_type.as_deref());

            let (tx, rx) = tokio::sync::oneshot::channel::<(usize, Vec<u8>)>();
            let resp = resp.map_body(|_, body| BodyCapture {
                body,
                buffer: Vec::new(),
                cap: SNAPSHOT_BODY_CAP,
                capture_text,
                total_len: 0,
                on_done: Some(Box::new(move |len, buf| {
                    let _ = tx.send((len, buf));
                })),
            });

            let state2 = state.clone();
            let method = facts.method.clone();
            let path = facts.path.clone();
            let query = facts.query.clone();
            let headers = facts.headers.clone();
            let request_body = facts.body.clone();
            let geo = facts.geo.clone();
            let user_id = facts.user_id;
            let start = facts.start;

            actix_web::rt::spawn(async move {
                let (response_size, body_bytes) = rx.await.unwrap_or((0, Vec::new()));
                let duration_ms = start.elapsed().as_millis() as i64;
                let ts_ms = chrono::Utc::now().timestamp_millis();

                state2.buffer.push(RawMetric {
                    endpoint: path.clone(),
                    latency_ms: duration_ms,
                    status,
                    ts_ms,
                    request_size: None,
                    response_size: Some(response_size as i64),
                });

                let response_body: Option<serde_json::Value> = if body_bytes.is_empty() {
                    None
                } else {
                    serde_json::from_slice(&body_bytes).ok()
                };

                let new_snapshot = NewRequestSnapshot {
                    method: method.clone(),
                    path: path.clone(),
                    query,
                    headers,
                    body: request_body,
                    user_id,
                    version: None,
                    environment: None,
                    response_status: status,
                    response_headers,
                    response_body,
                    duration_ms,
                    geo,
                };
                if let Err(e) = state2.snapshots.create::<_, RequestSnapshot>(new_snapshot).await {
                    warn!("snapshot capture failed: {:?}", e);
                }

                let level = if status >= 500 {
                    LogLevel::Error
                } else if status >= 400 {
                    LogLevel::Warn
                } else {
                    LogLevel::Info
                };
                let new_log = NewLog {
                    source: "access-log".to_owned(),
                    level,
                    message: format!("{} {} -> {} in {}ms", method, path, status, duration_ms),
                    attributes: serde_json::json!({ "status": status, "duration_ms": duration_ms }),
                };
                if let Err(e) = state2.logs.create::<_, Log>(new_log).await {
                    warn!("access log write failed: {:?}", e);
                }
            });

            Ok(resp)
        }
        .boxed_local()
    }
}
