//! Serve a [`Router`] over HTTP as a `tower::Service`.
//!
//! The service buffers the request body, runs one dispatch and turns its
//! [`Outcome`] into a response: the handler's response when one halted the
//! dispatch, otherwise a final answer built from what is left (a pending
//! error, an `OPTIONS` allow list, or a 404).
use std::{
    convert::Infallible,
    task::{Context, Poll},
    time::Instant,
};

use axum::body::Body;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{HeaderValue, Method, Request, Response, StatusCode, header};
use http_body_util::BodyExt;
use tower::Service;
use tracing::Instrument;

use crate::{
    core::{Outcome, RequestContext, Router},
    ports::handler::HandlerError,
    tracing_setup::create_request_span,
};

/// Header carrying the request id assigned by the request id middleware.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// A [`Router`] exposed as a `tower::Service` over axum bodies.
#[derive(Clone, Debug)]
pub struct RouterService {
    router: Router,
}

impl RouterService {
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }
}

impl From<Router> for RouterService {
    fn from(router: Router) -> Self {
        Self::new(router)
    }
}

impl Service<Request<Body>> for RouterService {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let router = self.router.clone();
        Box::pin(async move { Ok(serve_request(&router, req).await) })
    }
}

/// Dispatch one HTTP request through `router`.
pub async fn serve_request(router: &Router, req: Request<Body>) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::warn!("Failed to read request body for {}: {}", parts.uri, e);
            return plain(StatusCode::BAD_REQUEST, "Bad Request\n").map(Body::from);
        }
    };

    let request_id = parts
        .headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let span = create_request_span(parts.method.as_str(), parts.uri.path(), &request_id);

    async move {
        let start = Instant::now();
        let is_head = parts.method == Method::HEAD;
        let mut ctx = RequestContext::from_parts(parts, body);
        let outcome = router.handle(&mut ctx).await;
        let mut response = finalize(ctx, outcome);
        if is_head {
            *response.body_mut() = Bytes::new();
        }

        let span = tracing::Span::current();
        span.record("http.status_code", response.status().as_u16());
        span.record("duration_ms", start.elapsed().as_millis() as u64);
        response.map(Body::from)
    }
    .instrument(span)
    .await
}

/// Turn a finished dispatch into the response sent to the client.
pub fn finalize(ctx: RequestContext, outcome: Outcome) -> Response<Bytes> {
    match outcome {
        Outcome::Halted => ctx.into_response(),
        Outcome::Finished { error: Some(error) } => error_response(&ctx, &error),
        Outcome::Finished { error: None } => {
            if *ctx.method() == Method::OPTIONS && !ctx.allowed_methods().is_empty() {
                let allow = ctx
                    .allowed_methods()
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(",");
                let mut response = plain(StatusCode::OK, allow.clone());
                match HeaderValue::from_str(&allow) {
                    Ok(value) => {
                        response.headers_mut().insert(header::ALLOW, value);
                    }
                    Err(e) => tracing::warn!("Invalid Allow header {}: {}", allow, e),
                }
                return response;
            }
            let path = ctx
                .original_url()
                .split_once('?')
                .map_or(ctx.original_url(), |(path, _)| path);
            tracing::debug!("No handler answered {} {}", ctx.method(), path);
            plain(
                StatusCode::NOT_FOUND,
                format!("Cannot {} {}\n", ctx.method(), path),
            )
        }
    }
}

fn error_response(ctx: &RequestContext, error: &HandlerError) -> Response<Bytes> {
    let status = error.status();
    let body = match error {
        HandlerError::Status { message, .. } if status.is_client_error() => format!("{message}\n"),
        _ => format!("{}\n", status.canonical_reason().unwrap_or(status.as_str())),
    };
    if status.is_server_error() {
        tracing::error!("Unhandled error for {} {}: {}", ctx.method(), ctx.original_url(), error);
    } else {
        tracing::warn!("Unhandled error for {} {}: {}", ctx.method(), ctx.original_url(), error);
    }
    plain(status, body)
}

fn plain(status: StatusCode, body: impl Into<Bytes>) -> Response<Bytes> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
