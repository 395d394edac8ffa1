//! Axum middleware that applies the limiter to one route prefix.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{debug, warn};

use crate::ratelimit::{Clock, Decision, RateLimitInfo, SlidingWindowLimiter};

/// Header carrying the configured threshold.
pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
/// Header carrying the requests left in the window.
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
/// Header carrying the seconds until the window frees a slot.
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Key used when the peer address is unavailable.
const UNKNOWN_CLIENT: &str = "unknown";

/// Shared state for the [`rate_limit`] middleware.
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<SlidingWindowLimiter>,
    clock: Arc<dyn Clock>,
    /// Path prefix without a trailing slash, e.g. `/threads`
    route_prefix: Arc<str>,
    /// Prefix without slashes, used in client keys and messages
    scope: Arc<str>,
}

impl RateLimitState {
    /// Create middleware state limiting requests under `route_prefix`.
    pub fn new(
        limiter: Arc<SlidingWindowLimiter>,
        clock: Arc<dyn Clock>,
        route_prefix: &str,
    ) -> Self {
        let route_prefix = route_prefix.trim_end_matches('/');
        Self {
            limiter,
            clock,
            route_prefix: Arc::from(route_prefix),
            scope: Arc::from(route_prefix.trim_matches('/')),
        }
    }

    /// Whether `path` falls under the limited prefix.
    ///
    /// Matches whole path segments: `/threads` and `/threads/1`, not
    /// `/threadsafe`.
    pub fn applies_to(&self, path: &str) -> bool {
        match path.strip_prefix(&*self.route_prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Derive the limiter key for a request: `<remote ip>:<scope>`.
    pub fn client_key(&self, request: &Request) -> String {
        let ip = match request.extensions().get::<ConnectInfo<SocketAddr>>() {
            Some(ConnectInfo(addr)) => addr.ip().to_string(),
            None => {
                warn!(
                    path = %request.uri().path(),
                    "No peer address on request, rate limiting as unknown client"
                );
                UNKNOWN_CLIENT.to_string()
            }
        };
        format!("{}:{}", ip, self.scope)
    }
}

/// Admission filter and header finalizer.
///
/// Requests outside the prefix pass through untouched. Denied requests get a
/// 429 without reaching the handler. Admitted requests get the
/// `X-RateLimit-*` headers on whatever the handler returns, error responses
/// included.
pub async fn rate_limit(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.applies_to(request.uri().path()) {
        return next.run(request).await;
    }

    let key = state.client_key(&request);

    match state.limiter.admit(&key, state.clock.now_ms()) {
        Decision::Unlimited => next.run(request).await,
        Decision::Denied(info) => {
            debug!(
                key = %key,
                path = %request.uri().path(),
                retry_after = info.reset_secs,
                "Rejecting rate limited request"
            );
            too_many_requests(&state.scope, &info)
        }
        Decision::Allowed(info) => {
            let mut response = next.run(request).await;
            apply_headers(response.headers_mut(), &info);
            response
        }
    }
}

/// The 429 response for a denied request.
fn too_many_requests(scope: &str, info: &RateLimitInfo) -> Response {
    let body = json!({
        "status": "fail",
        "message": format!(
            "Too many requests to the {} resource. Please try again later.",
            scope
        ),
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    headers.insert(RETRY_AFTER, HeaderValue::from(info.reset_secs));
    apply_headers(headers, info);
    response
}

fn apply_headers(headers: &mut HeaderMap, info: &RateLimitInfo) {
    headers.insert(
        HeaderName::from_static(X_RATELIMIT_LIMIT),
        HeaderValue::from(info.limit),
    );
    headers.insert(
        HeaderName::from_static(X_RATELIMIT_REMAINING),
        HeaderValue::from(info.remaining),
    );
    headers.insert(
        HeaderName::from_static(X_RATELIMIT_RESET),
        HeaderValue::from(info.reset_secs),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{LimiterConfig, ManualClock};
    use axum::body::Body;
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    struct Harness {
        app: Router,
        limiter: Arc<SlidingWindowLimiter>,
        clock: Arc<ManualClock>,
    }

    fn harness(max_requests: u32, enabled: bool) -> Harness {
        let limiter = Arc::new(
            SlidingWindowLimiter::new(LimiterConfig {
                window_ms: 60_000,
                max_requests,
                enabled,
            })
            .unwrap(),
        );
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let state = RateLimitState::new(limiter.clone(), clock.clone(), "/threads");

        let app = Router::new()
            .route("/threads", get(|| async { "list" }))
            .route(
                "/threads/broken",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            )
            .route("/health", get(|| async { "OK" }))
            .layer(from_fn_with_state(state, rate_limit));

        Harness {
            app,
            limiter,
            clock,
        }
    }

    fn request_from(path: &str, ip: [u8; 4]) -> Request {
        let mut request = Request::builder().uri(path).body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((ip, 40000))));
        request
    }

    fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
        response.headers().get(name).and_then(|v| v.to_str().ok())
    }

    #[test]
    fn test_applies_to_whole_segments() {
        let limiter = Arc::new(SlidingWindowLimiter::new(LimiterConfig::default()).unwrap());
        let state = RateLimitState::new(limiter, Arc::new(ManualClock::new(0)), "/threads/");

        assert!(state.applies_to("/threads"));
        assert!(state.applies_to("/threads/"));
        assert!(state.applies_to("/threads/42/comments"));
        assert!(!state.applies_to("/threadsafe"));
        assert!(!state.applies_to("/users"));
        assert!(!state.applies_to("/"));
    }

    #[test]
    fn test_client_key() {
        let limiter = Arc::new(SlidingWindowLimiter::new(LimiterConfig::default()).unwrap());
        let state = RateLimitState::new(limiter, Arc::new(ManualClock::new(0)), "/threads");

        let request = request_from("/threads", [203, 0, 113, 9]);
        assert_eq!(state.client_key(&request), "203.0.113.9:threads");

        let request = Request::builder().uri("/threads").body(Body::empty()).unwrap();
        assert_eq!(state.client_key(&request), "unknown:threads");
    }

    #[tokio::test]
    async fn test_admitted_response_carries_headers() {
        let h = harness(3, true);

        let response = h
            .app
            .oneshot(request_from("/threads", [10, 0, 0, 1]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, X_RATELIMIT_LIMIT), Some("3"));
        assert_eq!(header(&response, X_RATELIMIT_REMAINING), Some("2"));
        assert_eq!(header(&response, X_RATELIMIT_RESET), Some("60"));
        assert_eq!(header(&response, "retry-after"), None);
        assert_eq!(h.limiter.request_count("10.0.0.1:threads"), Some(1));
    }

    #[tokio::test]
    async fn test_error_response_carries_headers() {
        let h = harness(3, true);

        let response = h
            .app
            .clone()
            .oneshot(request_from("/threads/broken", [10, 0, 0, 1]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(header(&response, X_RATELIMIT_REMAINING), Some("2"));

        // Unmatched route under the prefix: the router's own 404
        let response = h
            .app
            .oneshot(request_from("/threads/missing", [10, 0, 0, 1]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(header(&response, X_RATELIMIT_REMAINING), Some("1"));
    }

    #[tokio::test]
    async fn test_denied_request_gets_429() {
        let h = harness(2, true);

        for _ in 0..2 {
            let response = h
                .app
                .clone()
                .oneshot(request_from("/threads", [10, 0, 0, 1]))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            h.clock.advance(20_000);
        }

        let response = h
            .app
            .clone()
            .oneshot(request_from("/threads", [10, 0, 0, 1]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        // Oldest request is 40s old, so it leaves the window in 20s
        assert_eq!(header(&response, "retry-after"), Some("20"));
        assert_eq!(header(&response, X_RATELIMIT_LIMIT), Some("2"));
        assert_eq!(header(&response, X_RATELIMIT_REMAINING), Some("0"));
        assert_eq!(header(&response, X_RATELIMIT_RESET), Some("20"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "fail");
        assert!(body["message"].as_str().unwrap().contains("threads"));

        // Another client is unaffected
        let response = h
            .app
            .oneshot(request_from("/threads", [10, 0, 0, 2]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_paths_outside_prefix_are_not_limited() {
        let h = harness(1, true);

        for _ in 0..5 {
            let response = h
                .app
                .clone()
                .oneshot(request_from("/health", [10, 0, 0, 1]))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(header(&response, X_RATELIMIT_LIMIT), None);
        }
        assert_eq!(h.limiter.key_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_limiter_attaches_nothing() {
        let h = harness(1, false);

        for _ in 0..5 {
            let response = h
                .app
                .clone()
                .oneshot(request_from("/threads", [10, 0, 0, 1]))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(header(&response, X_RATELIMIT_LIMIT), None);
            assert_eq!(header(&response, X_RATELIMIT_REMAINING), None);
        }
    }

    #[tokio::test]
    async fn test_requests_without_peer_share_unknown_bucket() {
        let h = harness(1, true);

        let anonymous = || Request::builder().uri("/threads").body(Body::empty()).unwrap();

        let response = h.app.clone().oneshot(anonymous()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = h.app.oneshot(anonymous()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(h.limiter.request_count("unknown:threads"), Some(1));
    }
}
