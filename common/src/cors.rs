use http::{HeaderValue, Method, header::CONTENT_TYPE};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Requests are trusted and unauthenticated, so only Content-Type needs to
/// cross the origin boundary and no credentials are ever exchanged.
fn base() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60))
}

pub fn dev() -> CorsLayer {
    base().allow_origin(AllowOrigin::mirror_request())
}

pub fn prod(origins: &[&str]) -> CorsLayer {
    base().allow_origin(AllowOrigin::list(origins.iter().map(|o| {
        HeaderValue::from_str(o).unwrap_or_else(|_| panic!("Invalid CORS origin: {}", o))
    })))
}
