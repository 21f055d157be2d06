//! Items accepted by the registration calls.
//!
//! A registration takes one [`Middleware`] value which may itself be a nested
//! list; lists are flattened depth-first so `[[h1, h2], h3]` registers exactly
//! like `[h1, h2, h3]`.
use std::{fmt, sync::Arc};

use futures_util::future::BoxFuture;

use crate::{
    core::{context::RequestContext, layer::Endpoint, router::Router},
    ports::handler::{ErrorHandler, ErrorHandlerFn, Flow, Handler, HandlerError, HandlerFn},
};

/// Something that can be registered on a router or route.
#[derive(Clone)]
pub enum Middleware {
    /// Regular handler, runs while no error is pending
    Handler(Arc<dyn Handler>),
    /// Error-aware handler, runs while an error is pending
    ErrorHandler(Arc<dyn ErrorHandler>),
    /// Mounted sub-router
    Router(Router),
    /// Ordered group, flattened at registration
    List(Vec<Middleware>),
}

impl Middleware {
    /// Register a regular handler value.
    pub fn handler(handler: impl Handler) -> Self {
        Self::Handler(Arc::new(handler))
    }

    /// Register an error-aware handler value.
    pub fn error_handler(handler: impl ErrorHandler) -> Self {
        Self::ErrorHandler(Arc::new(handler))
    }

    /// Group several items, preserving their order.
    pub fn list<I, M>(items: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<Middleware>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Flatten into endpoints in left-to-right order.
    pub(crate) fn flatten(self) -> Vec<Endpoint> {
        let mut endpoints = Vec::new();
        let mut pending = vec![self];
        while let Some(item) = pending.pop() {
            match item {
                Middleware::Handler(h) => endpoints.push(Endpoint::Handler(h)),
                Middleware::ErrorHandler(h) => endpoints.push(Endpoint::ErrorHandler(h)),
                Middleware::Router(r) => endpoints.push(Endpoint::Router(r)),
                Middleware::List(items) => pending.extend(items.into_iter().rev()),
            }
        }
        endpoints
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler(_) => f.write_str("Handler"),
            Self::ErrorHandler(_) => f.write_str("ErrorHandler"),
            Self::Router(router) => f.debug_tuple("Router").field(router).finish(),
            Self::List(items) => f.debug_list().entries(items).finish(),
        }
    }
}

impl From<Router> for Middleware {
    fn from(router: Router) -> Self {
        Self::Router(router)
    }
}

impl From<&Router> for Middleware {
    fn from(router: &Router) -> Self {
        Self::Router(router.clone())
    }
}

impl From<Vec<Middleware>> for Middleware {
    fn from(items: Vec<Middleware>) -> Self {
        Self::List(items)
    }
}

impl<const N: usize> From<[Middleware; N]> for Middleware {
    fn from(items: [Middleware; N]) -> Self {
        Self::List(items.into())
    }
}

/// Wrap a closure as a regular handler.
///
/// ```
/// use http::StatusCode;
/// use junction::handler_fn;
///
/// let hello = handler_fn(|ctx| Box::pin(async move { ctx.respond(StatusCode::OK, "hello") }));
/// # let _ = hello;
/// ```
pub fn handler_fn<F>(f: F) -> Middleware
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, Flow> + Send + Sync + 'static,
{
    Middleware::handler(HandlerFn(f))
}

/// Wrap a closure as an error-aware handler.
pub fn error_handler_fn<F>(f: F) -> Middleware
where
    F: for<'a> Fn(HandlerError, &'a mut RequestContext) -> BoxFuture<'a, Flow>
        + Send
        + Sync
        + 'static,
{
    Middleware::error_handler(ErrorHandlerFn(f))
}
