use std::net::IpAddr;

use axum::http::HeaderMap;
use owo_colors::OwoColorize;

pub mod args;
pub mod cors;
pub mod metrics;
pub mod postgres;
pub mod rate_limit;
pub mod retry;

/// Process-wide setup: console colors and the rustls crypto provider.
/// Call once from main before anything opens a TLS connection.
pub fn init() {
    let no_color = std::env::var_os("NO_COLOR").is_some()
        || std::env::var("DISABLE_COLORS")
            .is_ok_and(|v| matches!(v.to_lowercase().as_str(), "1" | "true"));
    owo_colors::set_override(!no_color);

    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("install rustls crypto provider");
}

/// Labels and annotations stamped on every cluster object the platform owns.
pub mod labels {
    pub const MANAGED_BY: &str = "managed-by";
    pub const MANAGED_BY_VALUE: &str = "urumi-platform";
    pub const STORE_ID: &str = "store-id";
    pub const STORE_NAME: &str = "store-name";
    pub const ENGINE: &str = "engine";
    pub const CREATED_AT: &str = "urumi.dev/created-at";
}

/// Client IP as seen through the single trusted ingress hop: the first
/// `X-Forwarded-For` entry, which that hop prepends. Deeper entries are
/// client-controlled and never consulted; requests that bypassed the
/// ingress have no attributable IP.
pub fn get_source_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

pub mod response {
    use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
    use serde_json::json;

    /// `200 OK` with the standard success envelope.
    pub fn ok(data: serde_json::Value) -> Response {
        (StatusCode::OK, Json(json!({"success": true, "data": data}))).into_response()
    }

    /// `202 Accepted` with the standard success envelope.
    pub fn accepted(data: serde_json::Value) -> Response {
        (
            StatusCode::ACCEPTED,
            Json(json!({"success": true, "data": data})),
        )
            .into_response()
    }

    pub fn err_resp(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
        (
            status,
            Json(json!({
                "success": false,
                "error": {"code": code, "message": message.into()},
            })),
        )
            .into_response()
    }

    pub fn validation_error(message: impl Into<String>) -> Response {
        err_resp(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn not_found(message: impl Into<String>) -> Response {
        err_resp(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Response {
        err_resp(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Response {
        err_resp(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Response {
        err_resp(StatusCode::BAD_GATEWAY, "GATEWAY_ERROR", message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Response {
        err_resp(StatusCode::GATEWAY_TIMEOUT, "DEADLINE_EXCEEDED", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Response {
        err_resp(StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", message)
    }

    /// Internals are never surfaced verbatim; callers log the cause first.
    pub fn internal_error() -> Response {
        err_resp(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "Internal server error",
        )
    }
}

pub mod access_log {
    use super::*;
    use axum::http::StatusCode;

    pub async fn request(
        req: axum::extract::Request,
        next: axum::middleware::Next,
    ) -> axum::response::Response {
        let ip = get_source_ip(req.headers())
            .map(|ip| ip.to_string())
            .unwrap_or("unknown".into());
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let start = std::time::Instant::now();
        let response = next.run(req).await;
        let duration = start.elapsed();
        let is_success =
            response.status().is_success() || response.status() == StatusCode::NOT_MODIFIED;
        let status = if is_success {
            response.status().to_string().green().to_string()
        } else {
            response.status().to_string().yellow().to_string()
        };
        println!(
            "🧾 {} {} {} {} ({:?}) ip={}",
            "[API]".cyan(),
            method.bold(),
            path,
            status,
            duration,
            ip.dimmed(),
        );
        response
    }
}

/// Uniform security headers on every response.
pub mod security_headers {
    pub async fn apply(
        req: axum::extract::Request,
        next: axum::middleware::Next,
    ) -> axum::response::Response {
        let mut response = next.run(req).await;
        let headers = response.headers_mut();
        headers.insert("x-content-type-options", "nosniff".parse().unwrap());
        headers.insert("x-frame-options", "DENY".parse().unwrap());
        headers.insert("referrer-policy", "no-referrer".parse().unwrap());
        headers.insert("x-xss-protection", "0".parse().unwrap());
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn success_envelope_wraps_data() {
        let response = response::accepted(serde_json::json!({"store": {"id": "a1b2c3d4"}}));
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["store"]["id"], "a1b2c3d4");
    }

    #[tokio::test]
    async fn error_envelope_carries_stable_code() {
        let cases = [
            (response::validation_error("bad name"), StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            (response::not_found("nope"), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (response::conflict("cap"), StatusCode::CONFLICT, "CONFLICT"),
            (response::rate_limited("slow down"), StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
            (response::bad_gateway("cluster"), StatusCode::BAD_GATEWAY, "GATEWAY_ERROR"),
            (response::deadline_exceeded("late"), StatusCode::GATEWAY_TIMEOUT, "DEADLINE_EXCEEDED"),
            (response::internal_error(), StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        ];
        for (response, status, code) in cases {
            assert_eq!(response.status(), status);
            let body = body_json(response).await;
            assert_eq!(body["success"], false);
            assert_eq!(body["error"]["code"], code);
            assert!(body["error"]["message"].is_string());
        }
    }

    #[test]
    fn source_ip_takes_first_forwarded_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.10, 70.41.3.18, 150.172.238.178".parse().unwrap(),
        );
        assert_eq!(
            get_source_ip(&headers),
            Some("203.0.113.10".parse().unwrap())
        );
    }

    #[test]
    fn source_ip_absent_without_the_ingress_header() {
        assert_eq!(get_source_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn source_ip_rejects_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "not-an-ip, 10.0.0.1".parse().unwrap());
        assert_eq!(get_source_ip(&headers), None);
    }
}
