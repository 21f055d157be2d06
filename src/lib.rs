//! Junction - an ordered middleware stack and request router.
//!
//! A [`Router`] holds an ordered stack of layers. Each layer pairs a path
//! matcher with something to run: a handler, an error handler, a route (an
//! exact path with per-method handler lists) or another router mounted under
//! a prefix. A request walks the stack in registration order; every handler
//! says how the walk continues by returning a [`Flow`].
//!
//! # Quick Example
//! ```no_run
//! use http::StatusCode;
//! use junction::{Router, RouterService, handler_fn};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let api = Router::new();
//! api.get(
//!     "/users/:id",
//!     handler_fn(|ctx| {
//!         let body = format!("user {}", ctx.param("id").unwrap_or_default());
//!         Box::pin(async move { ctx.respond(StatusCode::OK, body) })
//!     }),
//! )?;
//!
//! let app = Router::new();
//! app.use_at("/api", &api)?;
//!
//! let service = axum::Router::new().fallback_service(RouterService::new(app));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, service).await?;
//! # Ok(()) }
//! ```
//!
//! # Dispatch rules
//! - Layers run in registration order; the first route that answers wins.
//! - [`Flow::Fail`] puts an error in flight. Regular handlers are skipped
//!   until an [`ErrorHandler`] resolves it by returning [`Flow::Next`].
//! - [`Flow::SkipRoute`] leaves the current route, [`Flow::SkipRouter`] the
//!   current router.
//! - While a mounted router runs, the matched prefix moves from
//!   [`RequestContext::url`] to [`RequestContext::base_url`]; both are put
//!   back when it returns.
//!
//! # Architecture
//! The crate separates **ports** (handler traits) from **adapters** (HTTP
//! service, declarative configuration) while keeping the dispatch engine
//! inside `core`.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{RouterService, build_router},
    core::{
        Middleware, Outcome, Params, PathPattern, RegistrationError, RequestContext, Route, Router,
        RouterOptions, error_handler_fn, handler_fn,
    },
    ports::handler::{ErrorHandler, Flow, Handler, HandlerError, ParamHandler, param_fn},
};
