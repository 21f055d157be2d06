//! One entry of a router stack: an endpoint bound to a path matcher.
use std::{any::Any, fmt, panic::AssertUnwindSafe, sync::Arc};

use futures_util::{FutureExt, future::BoxFuture};

use crate::{
    core::{
        context::RequestContext,
        matcher::{Candidate, PathMatch, PathMatcher},
        route::Route,
        router::{Outcome, Router},
    },
    ports::handler::{ErrorHandler, Flow, Handler, HandlerError},
};

/// What a layer (or a route entry) runs once it matches.
#[derive(Clone)]
pub(crate) enum Endpoint {
    Handler(Arc<dyn Handler>),
    ErrorHandler(Arc<dyn ErrorHandler>),
    Router(Router),
    Route(Route),
}

impl Endpoint {
    /// Whether the endpoint may run given the presence of a pending error.
    /// Routers and routes always get the chance to see (or resolve) it.
    pub(crate) fn accepts(&self, error_pending: bool) -> bool {
        match self {
            Endpoint::Handler(_) => !error_pending,
            Endpoint::ErrorHandler(_) => error_pending,
            Endpoint::Router(_) | Endpoint::Route(_) => true,
        }
    }

    /// Run a handler, error handler or sub-router. A panic inside a handler
    /// becomes a [`HandlerError::Panicked`] failure.
    pub(crate) async fn invoke(&self, error: Option<HandlerError>, ctx: &mut RequestContext) -> Flow {
        let future = match (self, error) {
            (Endpoint::Handler(handler), None) => handler.handle(ctx),
            (Endpoint::ErrorHandler(handler), Some(error)) => handler.handle_error(error, ctx),
            (Endpoint::Router(router), error) => {
                return match router.run(ctx, error).await {
                    Outcome::Halted => Flow::Halt,
                    Outcome::Finished { error: None } => Flow::Next,
                    Outcome::Finished { error: Some(e) } => Flow::Fail(e),
                };
            }
            (Endpoint::Route(route), error) => return route.dispatch(ctx, error).await,
            (Endpoint::Handler(_), Some(error)) => return Flow::Fail(error),
            (Endpoint::ErrorHandler(_), None) => return Flow::Next,
        };

        guarded(future).await
    }
}

/// Await a handler future, turning a panic into a failure.
pub(crate) async fn guarded(future: BoxFuture<'_, Flow>) -> Flow {
    let result = AssertUnwindSafe(future).catch_unwind().await;
    match result {
        Ok(flow) => flow,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!("Handler panicked: {}", message);
            Flow::Fail(HandlerError::Panicked(message))
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Handler(_) => f.write_str("Handler"),
            Endpoint::ErrorHandler(_) => f.write_str("ErrorHandler"),
            Endpoint::Router(router) => f.debug_tuple("Router").field(router).finish(),
            Endpoint::Route(route) => f.debug_tuple("Route").field(&route.path()).finish(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// An endpoint and the matcher deciding which requests reach it.
///
/// Layers are shared by every dispatch through their router and hold no
/// per-request state.
#[derive(Debug)]
pub(crate) struct Layer {
    matcher: Arc<PathMatcher>,
    endpoint: Endpoint,
}

impl Layer {
    pub(crate) fn new(matcher: Arc<PathMatcher>, endpoint: Endpoint) -> Self {
        Self { matcher, endpoint }
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Match against the unconsumed part of the request path.
    pub(crate) fn try_match(&self, candidate: &Candidate) -> Option<PathMatch> {
        self.matcher.test_candidate(candidate)
    }

    /// Whether a match rewrites `url`/`base_url` before the endpoint runs.
    pub(crate) fn strips_prefix(&self) -> bool {
        self.matcher.is_prefix() && !matches!(self.endpoint, Endpoint::Route(_))
    }
}
