//! Axum middleware wrapped around the router service.
//!
//! These run outside the dispatch, so they apply to every response however it
//! was produced: a handler, an unhandled error, or the final 404. Which ones
//! are active is decided by [`MiddlewareConfig`].
use std::sync::Arc;

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue, header},
    middleware::{self, Next},
    response::Response,
};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{adapters::service::REQUEST_ID_HEADER, config::models::MiddlewareConfig};

/// Wrap `app` with the middleware enabled in `config`.
pub fn apply_middleware(app: axum::Router, config: &MiddlewareConfig) -> axum::Router {
    let mut app = app;

    let headers = response_headers(config);
    if !headers.is_empty() {
        let headers = Arc::new(headers);
        app = app.layer(middleware::from_fn(move |req, next| {
            fixed_headers_middleware(req, next, headers.clone())
        }));
    }
    if config.cors {
        app = app.layer(cors_layer());
    }
    if config.request_id {
        app = app.layer(middleware::from_fn(request_id_middleware));
    }
    if config.request_timing {
        app = app.layer(TraceLayer::new_for_http());
    }
    app
}

/// Headers stamped on every response: hardening headers, then the configured
/// extras, which may replace them. Invalid pairs are skipped with a warning.
fn response_headers(config: &MiddlewareConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if config.security_headers {
        headers.insert(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        );
        headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
        headers.insert(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        );
    }
    for (name, value) in &config.custom_headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!("Skipping invalid custom header {} = {}", name, value),
        }
    }
    headers
}

/// Add `headers` to the response unless the router already set them.
pub async fn fixed_headers_middleware(
    req: Request,
    next: Next,
    headers: Arc<HeaderMap>,
) -> Response {
    let mut response = next.run(req).await;
    let target = response.headers_mut();
    for (name, value) in headers.iter() {
        target.entry(name).or_insert_with(|| value.clone());
    }
    response
}

/// Permissive CORS: the caller's origin, method and headers are mirrored back
/// and the request id is exposed to scripts. Preflight requests are answered
/// here without reaching the router.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)])
}

/// Assign a per-request UUID (keeping one supplied by the caller) and echo it
/// in `X-Request-ID`. The router service picks it up for its request span.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = match req.headers().get(REQUEST_ID_HEADER) {
        Some(value) => value.clone(),
        None => {
            let generated = uuid::Uuid::new_v4().to_string();
            match HeaderValue::from_str(&generated) {
                Ok(value) => {
                    req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
                    value
                }
                Err(e) => {
                    tracing::warn!("Failed to encode request id {}: {}", generated, e);
                    return next.run(req).await;
                }
            }
        }
    };

    let mut response = next.run(req).await;
    response.headers_mut().insert(REQUEST_ID_HEADER, request_id);
    response
}
