//! The handler port: what user code implements to take part in a dispatch.
//!
//! A handler receives the per-request [`RequestContext`] and hands control back
//! to the engine by returning a [`Flow`]. Returning is the continuation, so it
//! cannot be invoked twice and is always invoked once the handler completes.
use std::fmt;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use http::StatusCode;
use thiserror::Error;

use crate::core::RequestContext;

/// Error carried through a dispatch once a handler signals failure.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HandlerError {
    /// Failure with an explicit HTTP status for the caller to report
    #[error("{status}: {message}")]
    Status {
        /// Status the caller should answer with
        status: StatusCode,
        /// Human readable description
        message: String,
    },

    /// A handler panicked while it was in control of the request
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// Any other failure
    #[error(transparent)]
    Other(#[from] eyre::Report),
}

impl HandlerError {
    /// Create an error that reports the given status.
    pub fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Create an opaque error from a displayable message.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::Other(eyre::Report::msg(message))
    }

    /// Status an adapter should answer with when this error is left unhandled.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Status { status, .. } => *status,
            Self::Panicked(_) | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// What a handler asks the engine to do once it is finished.
#[derive(Debug)]
#[must_use]
pub enum Flow {
    /// Continue with the next eligible layer, clearing any error this layer saw
    Next,
    /// Continue with the given error pending
    Fail(HandlerError),
    /// Abandon the remaining handlers of the active route
    SkipRoute,
    /// Abandon the remaining layers of the router currently dispatching
    SkipRouter,
    /// The response has been produced; nothing else runs for this request
    Halt,
}

impl Flow {
    /// Shorthand for [`Flow::Fail`].
    pub fn fail(error: impl Into<HandlerError>) -> Self {
        Self::Fail(error.into())
    }

    /// Whether this flow keeps an error pending.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Fail(_))
    }
}

impl<E> From<Result<(), E>> for Flow
where
    E: Into<HandlerError>,
{
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::Next,
            Err(e) => Self::Fail(e.into()),
        }
    }
}

/// A regular handler. It only runs while no error is pending.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handle the request and say how dispatch should continue.
    async fn handle(&self, ctx: &mut RequestContext) -> Flow;
}

/// An error-aware handler. It only runs while an error is pending, and
/// returning [`Flow::Next`] resolves that error.
#[async_trait]
pub trait ErrorHandler: Send + Sync + 'static {
    /// Handle the pending error.
    async fn handle_error(&self, error: HandlerError, ctx: &mut RequestContext) -> Flow;
}

/// Pre-processor run for a named path parameter before the layer that
/// captured it.
#[async_trait]
pub trait ParamHandler: Send + Sync + 'static {
    /// Inspect (or load data for) the captured parameter value.
    async fn handle_param(&self, ctx: &mut RequestContext, value: &str) -> Flow;
}

/// [`Handler`] backed by a closure returning a boxed future.
pub struct HandlerFn<F>(pub(crate) F);

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, Flow> + Send + Sync + 'static,
{
    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        (self.0)(ctx).await
    }
}

/// [`ErrorHandler`] backed by a closure returning a boxed future.
pub struct ErrorHandlerFn<F>(pub(crate) F);

#[async_trait]
impl<F> ErrorHandler for ErrorHandlerFn<F>
where
    F: for<'a> Fn(HandlerError, &'a mut RequestContext) -> BoxFuture<'a, Flow>
        + Send
        + Sync
        + 'static,
{
    async fn handle_error(&self, error: HandlerError, ctx: &mut RequestContext) -> Flow {
        (self.0)(error, ctx).await
    }
}

/// [`ParamHandler`] backed by a closure returning a boxed future.
pub struct ParamFn<F>(pub(crate) F);

#[async_trait]
impl<F> ParamHandler for ParamFn<F>
where
    F: for<'a> Fn(&'a mut RequestContext, &'a str) -> BoxFuture<'a, Flow> + Send + Sync + 'static,
{
    async fn handle_param(&self, ctx: &mut RequestContext, value: &str) -> Flow {
        (self.0)(ctx, value).await
    }
}

/// Wrap a closure as a [`ParamHandler`].
pub fn param_fn<F>(f: F) -> ParamFn<F>
where
    F: for<'a> Fn(&'a mut RequestContext, &'a str) -> BoxFuture<'a, Flow> + Send + Sync + 'static,
{
    ParamFn(f)
}
