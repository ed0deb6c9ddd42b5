//! `/mcp`-prefix middleware: content-type enforcement on POST and the
//! rate-limit gate that stamps `X-RateLimit-*` on every response.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

static RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Client IP per §4.3: first hop of `X-Forwarded-For`, falling back
/// to the connection peer address.
fn client_ip(req: &axum::extract::Request, peer: Option<SocketAddr>) -> Option<IpAddr> {
    if let Some(value) = req.headers().get("x-forwarded-for") {
        if let Ok(s) = value.to_str() {
            if let Some(first) = s.split(',').next() {
                if let Ok(ip) = first.trim().parse::<IpAddr>() {
                    return Some(ip);
                }
            }
        }
    }
    peer.map(|addr| addr.ip())
}

pub async fn rate_limit(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: axum::extract::Request,
    next: Next,
) -> Response {
    let ip = client_ip(&req, Some(peer)).unwrap_or(peer.ip());
    let decision = state.rate_limiter.check(ip);

    if !decision.allowed {
        let retry_after = decision.retry_after_secs.unwrap_or(1);
        let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
        let headers = response.headers_mut();
        headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        headers.insert(RATELIMIT_LIMIT.clone(), HeaderValue::from(decision.limit));
        headers.insert(RATELIMIT_REMAINING.clone(), HeaderValue::from(0u32));
        return response;
    }

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(RATELIMIT_LIMIT.clone(), HeaderValue::from(decision.limit));
    headers.insert(RATELIMIT_REMAINING.clone(), HeaderValue::from(decision.remaining));
    response
}

/// POST bodies must be `application/json`; anything else is 415.
pub async fn require_json_content_type(req: axum::extract::Request, next: Next) -> Response {
    if req.method() == Method::POST {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").trim() == "application/json")
            .unwrap_or(false);
        if !is_json {
            return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
        }
    }
    next.run(req).await
}
