//! Replay executor (spec §4.E). Re-issues a captured `RequestSnapshot`
//! against a live base URL so an operator can reproduce a failure. Grounded
//! on the teacher's use of `reqwest` as the outbound HTTP client
//! (`syncserver/src/tokenserver/settings.rs` pulls in the same crate for
//! its own external calls).

use std::collections::HashMap;
use std::time::Instant;

use obs_db::models::RequestSnapshot;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;

use crate::REPLAY_MARKER_HEADER;

const BLOCKED_PATHS: &[&str] = &["/replay", "/metrics", "/logs"];
const STRIPPED_REQUEST_HEADERS: &[&str] = &["authorization", "cookie", "x-api-key", "host"];

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("replaying {0} is not allowed")]
    Blocked(String),
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),
    #[error("outbound replay request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Debug, Serialize)]
pub struct ReplayResult {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
    pub duration_ms: i64,
}

fn is_blocked(path: &str) -> bool {
    BLOCKED_PATHS.iter().any(|blocked| path.contains(blocked))
}

fn build_headers(snapshot: &RequestSnapshot) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in &snapshot.headers {
        let lower = name.to_lowercase();
        if STRIPPED_REQUEST_HEADERS.contains(&lower.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(lower.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    headers.insert(
        HeaderName::from_static(REPLAY_MARKER_HEADER),
        HeaderValue::from_static("true"),
    );
    headers
}

fn build_query(query: &HashMap<String, String>) -> String {
    if query.is_empty() {
        return String::new();
    }
    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(query.iter())
        .finish();
    format!("?{}", encoded)
}

/// Replays `snapshot` against `base_url`, rejecting blocked paths before
/// issuing anything over the network (spec §8 "Replay safety").
pub async fn replay(
    client: &reqwest::Client,
    base_url: &str,
    snapshot: &RequestSnapshot,
) -> Result<ReplayResult, ReplayError> {
    if is_blocked(&snapshot.path) {
        return Err(ReplayError::Blocked(snapshot.path.clone()));
    }

    let method = match snapshot.method.to_uppercase().as_str() {
        "GET" => reqwest::Method::GET,
        "POST" => reqwest::Method::POST,
        "PUT" => reqwest::Method::PUT,
        "PATCH" => reqwest::Method::PATCH,
        "DELETE" => reqwest::Method::DELETE,
        other => return Err(ReplayError::UnsupportedMethod(other.to_owned())),
    };

    let url = format!(
        "{}{}{}",
        base_url.trim_end_matches('/'),
        snapshot.path,
        build_query(&snapshot.query)
    );

    let mut request = client.request(method.clone(), &url).headers(build_headers(snapshot));
    if matches!(method, reqwest::Method::POST | reqwest::Method::PUT | reqwest::Method::PATCH) {
        if let Some(body) = &snapshot.body {
            request = request.json(body);
        }
    }

    let start = Instant::now();
    let response = request.send().await?;
    let status_code = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_owned(),
                value.to_str().unwrap_or_default().to_owned(),
            )
        })
        .collect();
    let bytes = response.bytes().await?;
    let body = if bytes.is_empty() {
        None
    } else {
        serde_json::from_slice(&bytes).ok()
    };
    let duration_ms = start.elapsed().as_millis() as i64;

    Ok(ReplayResult {
        status_code,
        headers,
        body,
        duration_ms,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn blocks_paths_containing_operational_routes() {
        assert!(is_blocked("/replay"));
        assert!(is_blocked("/metrics"));
        assert!(is_blocked("/logs/stream"));
        assert!(!is_blocked("/api/v1/users"));
    }
}
