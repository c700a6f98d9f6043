//! Request admission: rate limiting and principal checks.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use ratelimit::{Decision, PolicyClass};
use store::ReservationStore;

use crate::auth::Principal;
use crate::error::ApiError;
use crate::state::AppState;

/// Picks the policy class for a request. `None` means the path is exempt.
pub fn classify(path: &str, principal: &Principal) -> Option<PolicyClass> {
    match path {
        "/health" | "/metrics" => None,
        "/auth/login" => Some(PolicyClass::Sensitive),
        p if p.starts_with("/webhooks/") => Some(PolicyClass::Webhook),
        _ if principal.is_authenticated() => Some(PolicyClass::Authenticated),
        _ => Some(PolicyClass::Anonymous),
    }
}

/// Client key for rate limiting.
///
/// Forwarding headers are honoured only when the deployment says a trusted
/// proxy sets them: first `X-Forwarded-For` hop, then `X-Real-IP`. Otherwise
/// the peer address is used.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let real_ip = || {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        if let Some(ip) = forwarded.or_else(real_ip) {
            return ip.to_string();
        }
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

/// Resolves the principal, then admits or refuses the request under its
/// policy class. Refusals are a 429 with `Retry-After`.
pub async fn rate_limit<S: ReservationStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = state.principals.resolve(request.headers());
    let class = classify(request.uri().path(), &principal);
    request.extensions_mut().insert(principal);

    let Some(class) = class else {
        return Ok(next.run(request).await);
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(request.headers(), peer, state.trust_proxy_headers);

    match state.limiter.admit(class, &client) {
        Decision::Allowed { remaining } => {
            let mut response = next.run(request).await;
            response
                .headers_mut()
                .insert(
                    HeaderName::from_static("x-ratelimit-remaining"),
                    HeaderValue::from(remaining),
                );
            Ok(response)
        }
        decision @ Decision::Denied { retry_after } => Err(ApiError::RateLimited {
            retry_after,
            secs: decision.retry_after_secs().unwrap_or(1),
        }),
    }
}

/// Refuses requests without an authenticated principal.
pub async fn require_authenticated<S: ReservationStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = match request.extensions().get::<Principal>() {
        Some(principal) => principal.clone(),
        None => state.principals.resolve(request.headers()),
    };

    match principal {
        Principal::Authenticated { subject } => {
            tracing::debug!(%subject, "authenticated request");
            Ok(next.run(request).await)
        }
        Principal::Anonymous => Err(ApiError::Unauthorized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticated() -> Principal {
        Principal::Authenticated {
            subject: "admin".to_string(),
        }
    }

    #[test]
    fn classifies_paths() {
        let anon = Principal::Anonymous;
        assert_eq!(classify("/health", &anon), None);
        assert_eq!(classify("/metrics", &authenticated()), None);
        assert_eq!(
            classify("/webhooks/asaas", &authenticated()),
            Some(PolicyClass::Webhook)
        );
        assert_eq!(
            classify("/auth/login", &anon),
            Some(PolicyClass::Sensitive)
        );
        assert_eq!(
            classify("/admin/stats", &authenticated()),
            Some(PolicyClass::Authenticated)
        );
        assert_eq!(
            classify("/vouchers/RM-1", &anon),
            Some(PolicyClass::Anonymous)
        );
    }

    #[test]
    fn proxy_headers_only_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        let peer: SocketAddr = "192.0.2.1:5555".parse().unwrap();

        assert_eq!(client_key(&headers, Some(peer), true), "203.0.113.9");
        assert_eq!(client_key(&headers, Some(peer), false), "192.0.2.1");

        headers.remove("x-forwarded-for");
        assert_eq!(client_key(&headers, Some(peer), true), "198.51.100.4");
        assert_eq!(client_key(&HeaderMap::new(), None, true), "unknown");
    }
}
