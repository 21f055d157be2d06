//! The router: an ordered stack of layers and the dispatch loop walking it.
//!
//! A [`Router`] is a cheap handle; clones share the same stack, so a router
//! can be mounted in several places and still be extended afterwards. Each
//! dispatch walks a snapshot of the stack taken when the router is entered,
//! so registrations racing a request never disturb it.
use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use arc_swap::ArcSwap;
use futures_util::future::BoxFuture;
use http::Method;
use thiserror::Error;
use tracing::Instrument;

use crate::{
    core::{
        context::{Params, RequestContext},
        layer::{Endpoint, Layer, guarded},
        matcher::{Candidate, MatchOptions, PathMatcher},
        middleware::Middleware,
        pattern::{PathPattern, PatternError},
        route::Route,
    },
    ports::handler::{Flow, HandlerError, ParamHandler},
    tracing_setup::create_dispatch_span,
};

/// Errors raised while registering handlers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RegistrationError {
    #[error("A handler is required when registering {path}")]
    MissingHandler { path: String },

    #[error("Invalid path pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: PatternError,
    },

    #[error("Mounting at {path} would make the router reachable from itself")]
    CyclicMount { path: String },
}

/// Matching behaviour shared by every layer of a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterOptions {
    /// Compare literal path text case-sensitively
    pub case_sensitive: bool,
    /// Treat a trailing slash as significant on routes
    pub strict: bool,
    /// Let parameters captured by mounting routers show through
    pub merge_params: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            strict: false,
            merge_params: true,
        }
    }
}

/// How a dispatch through a router ended.
#[derive(Debug)]
#[must_use]
pub enum Outcome {
    /// A handler produced the response
    Halted,
    /// Every eligible layer ran without producing a response
    Finished {
        /// Error still pending when the stack ran out
        error: Option<HandlerError>,
    },
}

impl Outcome {
    pub fn is_halted(&self) -> bool {
        matches!(self, Self::Halted)
    }

    pub fn error(&self) -> Option<&HandlerError> {
        match self {
            Self::Finished { error } => error.as_ref(),
            Self::Halted => None,
        }
    }

    pub fn into_error(self) -> Option<HandlerError> {
        match self {
            Self::Finished { error } => error,
            Self::Halted => None,
        }
    }
}

pub(crate) struct RouterInner {
    options: RouterOptions,
    stack: ArcSwap<Vec<Arc<Layer>>>,
    routes: Mutex<HashMap<String, Route>>,
    params: ArcSwap<HashMap<String, Vec<Arc<dyn ParamHandler>>>>,
}

/// An ordered stack of middleware, routes and mounted routers.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

/// Flatten registration items, rejecting an empty result.
pub(crate) fn collect_endpoints(
    items: Middleware,
    path: &str,
) -> Result<Vec<Endpoint>, RegistrationError> {
    let endpoints = items.flatten();
    if endpoints.is_empty() {
        return Err(RegistrationError::MissingHandler {
            path: path.to_string(),
        });
    }
    Ok(endpoints)
}

fn compile(pattern: &PathPattern, options: MatchOptions) -> Result<Arc<PathMatcher>, RegistrationError> {
    PathMatcher::compile(pattern, options)
        .map(Arc::new)
        .map_err(|source| RegistrationError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}

macro_rules! method_shortcuts {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            #[doc = concat!("Register handlers for `", stringify!($method), "` requests matching `pattern`.")]
            pub fn $name(
                &self,
                pattern: impl Into<PathPattern>,
                items: impl Into<Middleware>,
            ) -> Result<&Self, RegistrationError> {
                self.on(Method::$method, pattern, items)
            }
        )*
    };
}

impl Router {
    pub fn new() -> Self {
        Self::with_options(RouterOptions::default())
    }

    pub fn with_options(options: RouterOptions) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                options,
                stack: ArcSwap::from_pointee(Vec::new()),
                routes: Mutex::new(HashMap::new()),
                params: ArcSwap::from_pointee(HashMap::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RouterInner>) -> Self {
        Self { inner }
    }

    pub fn router_options(&self) -> RouterOptions {
        self.inner.options
    }

    /// Number of layers in the stack.
    pub fn len(&self) -> usize {
        self.inner.stack.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both handles refer to the same router.
    pub fn ptr_eq(&self, other: &Router) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn push_layers(&self, layers: Vec<Arc<Layer>>) {
        self.inner.stack.rcu(|stack| {
            let mut next = Vec::with_capacity(stack.len() + layers.len());
            next.extend(stack.iter().cloned());
            next.extend(layers.iter().cloned());
            next
        });
    }

    /// Mount middleware at the root; it sees every request.
    pub fn use_middleware(&self, items: impl Into<Middleware>) -> Result<&Self, RegistrationError> {
        self.use_at(PathPattern::root(), items)
    }

    /// Mount middleware under a path prefix.
    ///
    /// Matching is by whole segments and ignores the router's `strict`
    /// setting. While a mounted item runs, the matched prefix is moved from
    /// the request url to its base url.
    pub fn use_at(
        &self,
        pattern: impl Into<PathPattern>,
        items: impl Into<Middleware>,
    ) -> Result<&Self, RegistrationError> {
        let pattern = pattern.into();
        let endpoints = collect_endpoints(items.into(), &pattern.to_string())?;
        self.check_cycles(&endpoints, &pattern)?;

        let options = MatchOptions {
            case_sensitive: self.inner.options.case_sensitive,
            strict: false,
            end: false,
        };
        let matcher = compile(&pattern, options)?;
        let count = endpoints.len();
        self.push_layers(
            endpoints
                .into_iter()
                .map(|endpoint| Arc::new(Layer::new(matcher.clone(), endpoint)))
                .collect(),
        );
        tracing::debug!("Mounted {} middleware layer(s) at {}", count, pattern);
        Ok(self)
    }

    /// Reject endpoints that would make this router reachable from itself.
    fn check_cycles(
        &self,
        endpoints: &[Endpoint],
        pattern: &PathPattern,
    ) -> Result<(), RegistrationError> {
        for endpoint in endpoints {
            if let Endpoint::Router(child) = endpoint {
                if child.reaches(self) {
                    return Err(RegistrationError::CyclicMount {
                        path: pattern.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Find the route registered at the literal path `pattern`, creating it
    /// (and its layer) on first use. Expression and list patterns always get
    /// a new route.
    pub fn route(&self, pattern: impl Into<PathPattern>) -> Result<Route, RegistrationError> {
        let pattern = pattern.into();
        let mut routes = self
            .inner
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let key = pattern.literal_path().map(str::to_string);
        if let Some(route) = key.as_ref().and_then(|key| routes.get(key)) {
            return Ok(route.clone());
        }

        let options = MatchOptions {
            case_sensitive: self.inner.options.case_sensitive,
            strict: self.inner.options.strict,
            end: true,
        };
        let matcher = compile(&pattern, options)?;
        let route = Route::owned_by(pattern, Arc::downgrade(&self.inner));
        self.push_layers(vec![Arc::new(Layer::new(matcher, Endpoint::Route(route.clone())))]);
        if let Some(key) = key {
            routes.insert(key, route.clone());
        }
        Ok(route)
    }

    /// Register handlers for `method` requests whose path matches `pattern`
    /// exactly.
    pub fn on(
        &self,
        method: Method,
        pattern: impl Into<PathPattern>,
        items: impl Into<Middleware>,
    ) -> Result<&Self, RegistrationError> {
        let pattern = pattern.into();
        let endpoints = collect_endpoints(items.into(), &pattern.to_string())?;
        self.check_cycles(&endpoints, &pattern)?;
        self.route(pattern)?.append(Some(method), endpoints)?;
        Ok(self)
    }

    /// Register handlers for requests of any method.
    pub fn all(
        &self,
        pattern: impl Into<PathPattern>,
        items: impl Into<Middleware>,
    ) -> Result<&Self, RegistrationError> {
        let pattern = pattern.into();
        let endpoints = collect_endpoints(items.into(), &pattern.to_string())?;
        self.check_cycles(&endpoints, &pattern)?;
        self.route(pattern)?.append(None, endpoints)?;
        Ok(self)
    }

    method_shortcuts! {
        get => GET,
        post => POST,
        put => PUT,
        delete => DELETE,
        patch => PATCH,
        head => HEAD,
        options => OPTIONS,
        trace => TRACE,
        connect => CONNECT,
    }

    /// Register a pre-processor for the parameter `name`. Callbacks run in
    /// registration order, once per distinct value per dispatch.
    pub fn param(&self, name: impl Into<String>, handler: impl ParamHandler) -> &Self {
        let name = name.into();
        let handler: Arc<dyn ParamHandler> = Arc::new(handler);
        self.inner.params.rcu(|params| {
            let mut next = HashMap::clone(params);
            next.entry(name.clone()).or_default().push(handler.clone());
            next
        });
        self
    }

    /// Whether `target` is this router or is mounted somewhere below it.
    pub(crate) fn reaches(&self, target: &Router) -> bool {
        let mut visited: HashSet<*const RouterInner> = HashSet::new();
        let mut queue = vec![self.clone()];
        while let Some(router) = queue.pop() {
            if router.ptr_eq(target) {
                return true;
            }
            if !visited.insert(Arc::as_ptr(&router.inner)) {
                continue;
            }
            for layer in router.inner.stack.load().iter() {
                match layer.endpoint() {
                    Endpoint::Router(child) => queue.push(child.clone()),
                    Endpoint::Route(route) => queue.extend(route.routers()),
                    Endpoint::Handler(_) | Endpoint::ErrorHandler(_) => {}
                }
            }
        }
        false
    }

    /// Dispatch a request through the stack.
    pub async fn handle(&self, ctx: &mut RequestContext) -> Outcome {
        self.run(ctx, None).await
    }

    pub(crate) fn run<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        error: Option<HandlerError>,
    ) -> BoxFuture<'a, Outcome> {
        let stack = self.inner.stack.load_full();
        let span = create_dispatch_span(&ctx.base_url, stack.len());
        Box::pin(async move {
            let parent_base = ctx.base_url.clone();
            let parent_params = ctx.params.clone();
            let mut pending = error;
            let mut called = Params::new();
            let mut candidate: Option<Candidate> = None;
            let mut halted = false;

            for (index, layer) in stack.iter().enumerate() {
                let endpoint = layer.endpoint();
                if !endpoint.accepts(pending.is_some()) {
                    continue;
                }

                let protohost = protohost_len(&ctx.url);
                let path = request_path(&ctx.url, protohost);
                if path.is_empty() {
                    break;
                }
                if candidate.as_ref().is_none_or(|c| c.raw() != path) {
                    candidate = Some(Candidate::new(path));
                }
                let Some(found) = candidate.as_ref().and_then(|c| layer.try_match(c)) else {
                    tracing::trace!("Layer {} does not match {}", index, path);
                    continue;
                };

                if let Endpoint::Route(route) = endpoint {
                    if !route.handles(&ctx.method) {
                        if ctx.method == Method::OPTIONS {
                            for method in route.methods() {
                                if !ctx.allow.contains(&method) {
                                    ctx.allow.push(method);
                                }
                            }
                        }
                        continue;
                    }
                }

                ctx.params = if self.inner.options.merge_params {
                    parent_params.merged(&found.params)
                } else {
                    found.params.clone()
                };

                match self.process_params(ctx, &found.params, &mut called).await {
                    Flow::Next => {}
                    Flow::Fail(e) => {
                        if pending.is_none() {
                            pending = Some(e);
                        }
                        continue;
                    }
                    Flow::SkipRoute => continue,
                    Flow::SkipRouter => {
                        pending = None;
                        break;
                    }
                    Flow::Halt => {
                        halted = true;
                        break;
                    }
                }

                let protohost = protohost_len(&ctx.url);
                let path = request_path(&ctx.url, protohost);
                if candidate.as_ref().is_none_or(|c| c.raw() != path) {
                    tracing::debug!("Url changed by param callbacks, skipping layer {}", index);
                    continue;
                }

                tracing::debug!("Layer {} matched '{}'", index, found.matched);
                let flow = if layer.strips_prefix() {
                    let mount = Mount::enter(ctx, protohost, &found.matched, &parent_base);
                    tracing::debug!("Rewrote url to {} under {}", ctx.url, ctx.base_url);
                    let flow = endpoint.invoke(pending.take(), ctx).await;
                    mount.leave(ctx, &parent_base);
                    flow
                } else {
                    endpoint.invoke(pending.take(), ctx).await
                };

                match flow {
                    Flow::Next | Flow::SkipRoute => {}
                    Flow::Fail(e) => pending = Some(e),
                    Flow::SkipRouter => {
                        tracing::debug!("Leaving router early at layer {}", index);
                        pending = None;
                        break;
                    }
                    Flow::Halt => {
                        halted = true;
                        break;
                    }
                }
            }

            ctx.base_url = parent_base;
            ctx.params = parent_params;
            tracing::debug!(
                halted,
                error = pending.is_some(),
                "Dispatch finished for {}",
                ctx.url
            );
            if halted {
                Outcome::Halted
            } else {
                Outcome::Finished { error: pending }
            }
        }
        .instrument(span))
    }

    /// Run parameter callbacks for the captured values not yet seen by this
    /// dispatch of the router.
    async fn process_params(
        &self,
        ctx: &mut RequestContext,
        params: &Params,
        called: &mut Params,
    ) -> Flow {
        let handlers = self.inner.params.load_full();
        if handlers.is_empty() {
            return Flow::Next;
        }

        for (name, value) in params.iter() {
            let Some(callbacks) = handlers.get(name) else {
                continue;
            };
            if called.get(name) == Some(value) {
                continue;
            }
            called.insert(name, value);
            for callback in callbacks {
                match guarded(callback.handle_param(ctx, value)).await {
                    Flow::Next => {}
                    flow => return flow,
                }
            }
        }
        Flow::Next
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("options", &self.inner.options)
            .field("layers", &self.len())
            .finish()
    }
}

/// Byte length of a leading `scheme://host` in an absolute-form url.
fn protohost_len(url: &str) -> usize {
    if url.is_empty() || url.starts_with('/') {
        return 0;
    }
    let search_end = url.find('?').unwrap_or(url.len());
    match url[..search_end].find("://") {
        Some(scheme_end) => {
            let host_start = scheme_end + 3;
            url[host_start..search_end]
                .find('/')
                .map_or(search_end, |slash| host_start + slash)
        }
        None => 0,
    }
}

/// The path part of `url`: after the protohost, before the query.
fn request_path(url: &str, protohost: usize) -> &str {
    let end = url.find('?').unwrap_or(url.len());
    url.get(protohost.min(end)..end).unwrap_or("")
}

/// Bookkeeping for one prefix strip, undone once the mounted item returns.
struct Mount {
    removed: String,
    protohost: usize,
    slash_added: bool,
}

impl Mount {
    fn enter(ctx: &mut RequestContext, protohost: usize, removed: &str, parent_base: &str) -> Self {
        let mut mount = Mount {
            removed: removed.to_string(),
            protohost,
            slash_added: false,
        };
        if removed.is_empty() {
            return mount;
        }

        let rest = ctx.url.get(protohost + removed.len()..).unwrap_or("");
        let mut url = String::with_capacity(ctx.url.len() + 1);
        url.push_str(ctx.url.get(..protohost).unwrap_or(""));
        if protohost == 0 && !rest.starts_with('/') {
            url.push('/');
            mount.slash_added = true;
        }
        url.push_str(rest);
        ctx.url = url;

        let mut base = String::with_capacity(parent_base.len() + removed.len());
        base.push_str(parent_base);
        base.push_str(removed.strip_suffix('/').unwrap_or(removed));
        ctx.base_url = base;
        mount
    }

    fn leave(self, ctx: &mut RequestContext, parent_base: &str) {
        if self.removed.is_empty() {
            return;
        }
        let mut current = std::mem::take(&mut ctx.url);
        if self.slash_added && current.starts_with('/') {
            current.remove(0);
        }
        let split = if current.is_char_boundary(self.protohost) {
            self.protohost
        } else {
            0
        };
        let (protohost, rest) = current.split_at(split);
        ctx.url = format!("{}{}{}", protohost, self.removed, rest);
        ctx.base_url = parent_base.to_string();
    }
}
