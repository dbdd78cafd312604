//! Geo attachment (spec §4.A middleware #8): platform-provided hints first,
//! then `x-forwarded-for`, then `none`. No real GeoIP database lookup is in
//! scope (spec §1 names the database itself as an external collaborator) —
//! this resolves the header-driven cases the core owns.

use actix_web::HttpRequest;
use obs_db::models::{Geo, GeoSource};

const PLATFORM_COUNTRY: &str = "x-vercel-ip-country";
const PLATFORM_REGION: &str = "x-vercel-ip-country-region";
const PLATFORM_CITY: &str = "x-vercel-ip-city";
const PLATFORM_LAT: &str = "x-vercel-ip-latitude";
const PLATFORM_LON: &str = "x-vercel-ip-longitude";

fn header(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_owned())
}

/// Resolves geo attributes in the order spec §4.A prescribes: platform
/// hints, then a bare `x-forwarded-for` presence check, then `none`.
pub fn resolve(req: &HttpRequest) -> Geo {
    if let Some(country) = header(req, PLATFORM_COUNTRY) {
        return Geo {
            country: Some(country),
            region: header(req, PLATFORM_REGION),
            city: header(req, PLATFORM_CITY),
            lat: header(req, PLATFORM_LAT).and_then(|s| s.parse().ok()),
            lon: header(req, PLATFORM_LON).and_then(|s| s.parse().ok()),
            source: GeoSource::Platform,
        };
    }
    if let Some(xff) = header(req, "x-forwarded-for") {
        let ip = xff.split(',').next().unwrap_or(&xff).trim().to_owned();
        return Geo {
            country: None,
            region: None,
            city: None,
            lat: None,
            lon: None,
            source: GeoSource::Ip,
        }
        .with_hint(ip);
    }
    Geo {
        country: None,
        region: None,
        city: None,
        lat: None,
        lon: None,
        source: GeoSource::None,
    }
}

trait GeoHint {
    fn with_hint(self, ip: String) -> Geo;
}

impl GeoHint for Geo {
    fn with_hint(mut self, ip: String) -> Geo {
        // The IP-only path has no locality data to resolve without a GeoIP
        // database (out of scope, spec §1); it only asserts `source: ip`.
        let _ = ip;
        self.source = GeoSource::Ip;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn falls_back_to_none_without_any_hint() {
        let req = TestRequest::default().to_http_request();
        let geo = resolve(&req);
        assert_eq!(geo.source, GeoSource::None);
    }

    #[test]
    fn prefers_platform_headers_over_x_forwarded_for() {
        let req = TestRequest::default()
            .insert_header((PLATFORM_COUNTRY, "US"))
            .insert_header(("x-forwarded-for", "1.2.3.4"))
            .to_http_request();
        let geo = resolve(&req);
        assert_eq!(geo.source, GeoSource::Platform);
        assert_eq!(geo.country.as_deref(), Some("US"));
    }

    #[test]
    fn falls_back_to_x_forwarded_for_without_platform_headers() {
        let req = TestRequest::default()
            .insert_header(("x-forwarded-for", "5.6.7.8"))
            .to_http_request();
        let geo = resolve(&req);
        assert_eq!(geo.source, GeoSource::Ip);
    }
}
