//! Request/response capture helpers shared by the metrics and snapshot
//! stages of the pipeline (spec §4.A middlewares #11-13).

use std::collections::HashMap;

use actix_web::HttpRequest;

pub const REDACTED_HEADERS: &[&str] = &["authorization", "cookie", "x-api-key"];

pub fn redact_headers(req: &HttpRequest) -> HashMap<String, String> {
    req.headers()
        .iter()
        .map(|(name, value)| {
            let name = name.as_str().to_lowercase();
            let value = if REDACTED_HEADERS.contains(&name.as_str()) {
                "[redacted]".to_owned()
            } else {
                value.to_str().unwrap_or_default().to_owned()
            };
            (name, value)
        })
        .collect()
}

pub fn query_map(req: &HttpRequest) -> HashMap<String, String> {
    url::form_urlencoded::parse(req.query_string().as_bytes())
        .into_owned()
        .collect()
}

pub fn response_headers_map(headers: &actix_web::http::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_owned(),
                value.to_str().unwrap_or_default().to_owned(),
            )
        })
        .collect()
}

/// Parses `content_type` as a MIME type rather than string-prefixing it, so
/// `application/json; charset=utf-8` and friends are recognized correctly.
pub fn is_json_content_type(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.parse::<mime::Mime>().ok())
        .map(|m| m.type_() == mime::APPLICATION && m.subtype() == mime::JSON)
        .unwrap_or(false)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn recognizes_json_with_charset_parameter() {
        assert!(is_json_content_type(Some("application/json; charset=utf-8")));
    }

    #[test]
    fn rejects_non_json_content_types() {
        assert!(!is_json_content_type(Some("text/plain")));
        assert!(!is_json_content_type(None));
    }
}
