use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use axum::{
    body::Body,
    http::{Method, Request, Response},
};
use tower::{Layer, Service};

use crate::rate_limit::RateLimiter;

/// A Tower layer that rate-limits write requests per client IP.
///
/// GET/HEAD/OPTIONS and health probes pass through unconditionally. When the
/// client IP cannot be determined the request passes through as well; the
/// limiter only guards traffic that arrived via the trusted proxy hop.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: RateLimiter,
}

impl RateLimitLayer {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitMiddleware {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitMiddleware<S> {
    inner: S,
    limiter: RateLimiter,
}

impl<S> Service<Request<Body>> for RateLimitMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let is_write = matches!(
                *req.method(),
                Method::POST | Method::PUT | Method::PATCH | Method::DELETE
            );
            if !is_write || req.uri().path().starts_with("/health") {
                return inner.call(req).await;
            }

            let Some(ip) = crate::get_source_ip(req.headers()) else {
                return inner.call(req).await;
            };

            if !limiter.check(&format!("ip:{ip}")) {
                return Ok(crate::response::rate_limited("Too many requests"));
            }

            inner.call(req).await
        })
    }
}
