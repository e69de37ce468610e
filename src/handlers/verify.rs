//! Verification HTTP handlers.
//!
//! This module implements the two billed endpoints:
//! - POST /api/v1/verify/exact - precise single-user lookup
//! - POST /api/v1/verify/smart - flexible filtered lookup
//!
//! Both handlers are thin: they assemble a [`RequestContext`] from the raw
//! request, hand the body to the admission pipeline, and shape the
//! pipeline's verdict into the documented status codes, bodies, and
//! headers. Every response carries `X-Request-ID`; successes carry
//! `X-Cache`, and freshly billed successes additionally carry
//! `X-Credits-Used` / `X-Credits-Remaining`.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::AppState;
use crate::models::verify::VerifySuccessResponse;
use crate::services::pipeline::{Admitted, Denial, RequestContext, VerifyEndpoint};

/// `POST /api/v1/verify/exact`
pub async fn verify_exact(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    run(state, VerifyEndpoint::Exact, headers, body).await
}

/// `POST /api/v1/verify/smart`
pub async fn verify_smart(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    run(state, VerifyEndpoint::Smart, headers, body).await
}

async fn run(state: AppState, endpoint: VerifyEndpoint, headers: HeaderMap, body: Value) -> Response {
    let ctx = RequestContext::new(
        header_string(&headers, "x-api-key"),
        client_ip(&headers),
        header_string(&headers, "user-agent"),
    );

    match state.pipeline.admit(endpoint, body, &ctx).await {
        Ok(admitted) => success_response(admitted, ctx.request_id),
        Err(denial) => denial_response(denial, ctx.request_id),
    }
}

fn success_response(admitted: Admitted, request_id: Uuid) -> Response {
    let from_cache = admitted.from_cache;
    let credits_used = admitted.credits_used;
    let current_balance = admitted.current_balance;

    let body = VerifySuccessResponse {
        success: true,
        data: admitted.data,
        from_cache,
        credits_used,
        current_balance,
        request_id,
    };

    let mut response = (StatusCode::OK, Json(body)).into_response();
    set_request_id(&mut response, request_id);
    set_header(
        &mut response,
        "x-cache",
        if from_cache { "HIT" } else { "MISS" }.to_string(),
    );
    if !from_cache {
        set_header(&mut response, "x-credits-used", credits_used.to_string());
        set_header(
            &mut response,
            "x-credits-remaining",
            current_balance.unwrap_or(0).to_string(),
        );
    }
    response
}

fn denial_response(denial: Denial, request_id: Uuid) -> Response {
    let mut response = match denial {
        Denial::Unauthorized { message } => (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "Authentication failed",
                "message": message,
            })),
        )
            .into_response(),
        Denial::Invalid { details } => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Validation failed",
                "details": details,
            })),
        )
            .into_response(),
        Denial::RateLimited { retry_after } => {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": "Rate limit exceeded",
                    "message": format!("Rate limit exceeded. Retry after {retry_after} seconds."),
                    "retryAfter": retry_after,
                })),
            )
                .into_response();
            set_header(&mut response, "retry-after", retry_after.to_string());
            set_header(&mut response, "x-ratelimit-limit", "1".to_string());
            set_header(&mut response, "x-ratelimit-remaining", "0".to_string());
            set_header(
                &mut response,
                "x-ratelimit-reset",
                (Utc::now() + Duration::seconds(retry_after)).to_rfc3339(),
            );
            response
        }
        Denial::InsufficientCredits { required, current } => (
            StatusCode::PAYMENT_REQUIRED,
            Json(json!({
                "error": "Insufficient credits",
                "message": format!(
                    "This verification requires {required} credits. Please purchase more credits."
                ),
                "requiredCredits": required,
                "currentBalance": current,
            })),
        )
            .into_response(),
        Denial::NoMatch { message } => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "User not found",
                "message": message,
                "creditsUsed": 0,
                "requestId": request_id,
            })),
        )
            .into_response(),
        Denial::Internal { message } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Internal server error",
                "message": message,
                "requestId": request_id,
            })),
        )
            .into_response(),
    };

    set_request_id(&mut response, request_id);
    response
}

/// Best-effort client IP: first X-Forwarded-For hop, then X-Real-IP.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = header_string(headers, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
    }
    header_string(headers, "x-real-ip")
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn set_request_id(response: &mut Response, request_id: Uuid) {
    set_header(response, "x-request-id", request_id.to_string());
}

/// Insert a response header, dropping values that are not valid header text.
fn set_header(response: &mut Response, name: &'static str, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        response.headers_mut().insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers), Some("203.0.113.9".to_string()));
    }

    #[test]
    fn real_ip_is_the_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers), Some("198.51.100.2".to_string()));
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn rate_limited_denial_carries_retry_headers() {
        let response = denial_response(Denial::RateLimited { retry_after: 2 }, Uuid::new_v4());
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers.get("Retry-After").unwrap(), "2");
        assert_eq!(headers.get("X-RateLimit-Limit").unwrap(), "1");
        assert_eq!(headers.get("X-RateLimit-Remaining").unwrap(), "0");
        assert!(headers.contains_key("X-Request-ID"));
    }

    #[test]
    fn every_denial_carries_request_id() {
        let denials = [
            Denial::Unauthorized {
                message: "Invalid API key".to_string(),
            },
            Denial::Invalid {
                details: json!({"username": ["required"]}),
            },
            Denial::InsufficientCredits {
                required: 100,
                current: 0,
            },
            Denial::NoMatch {
                message: "User not found".to_string(),
            },
            Denial::Internal {
                message: "oops".to_string(),
            },
        ];
        for denial in denials {
            let response = denial_response(denial, Uuid::new_v4());
            assert!(response.headers().contains_key("X-Request-ID"));
        }
    }
}
