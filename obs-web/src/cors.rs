//! Middleware #4 (spec §4.A "CORS"): allow-list computed from localhost,
//! same-origin, the configured front-end host, and the cloud-distribution
//! suffix. Grounded on the teacher's `build_cors` (`syncserver/src/server/mod.rs`).

use actix_cors::Cors;

const CLOUD_DISTRIBUTION_SUFFIX: &str = ".cloudfront.net";

pub fn build_cors(frontend_url: Option<&str>) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .supports_credentials();

    cors = cors.allowed_origin("http://localhost:3000");
    cors = cors.allowed_origin("http://localhost:5173");
    cors = cors.allowed_origin("http://127.0.0.1:3000");

    if let Some(frontend) = frontend_url {
        cors = cors.allowed_origin(frontend);
    }

    cors.allowed_origin_fn(|origin, _req_head| {
        origin
            .to_str()
            .map(|s| s.ends_with(CLOUD_DISTRIBUTION_SUFFIX))
            .unwrap_or(false)
    })
}
