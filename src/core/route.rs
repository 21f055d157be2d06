//! Per-method handler lists registered under one exact path.
use std::{
    fmt,
    sync::{Arc, Weak},
};

use arc_swap::ArcSwap;
use futures_util::future::BoxFuture;
use http::Method;

use crate::{
    core::{
        context::RequestContext,
        layer::Endpoint,
        middleware::Middleware,
        pattern::PathPattern,
        router::{RegistrationError, Router, RouterInner, collect_endpoints},
    },
    ports::handler::{Flow, HandlerError},
};

#[derive(Clone, Default)]
struct MethodTable {
    /// Handlers registered for every method
    all: Vec<Endpoint>,
    /// Method specific handlers, in order of first registration
    methods: Vec<(Method, Vec<Endpoint>)>,
}

impl MethodTable {
    fn specific(&self, method: &Method) -> Option<&[Endpoint]> {
        self.methods
            .iter()
            .find(|(m, handlers)| m == method && !handlers.is_empty())
            .map(|(_, handlers)| handlers.as_slice())
    }

    /// Specific handlers for `method`, answering `HEAD` with `GET` handlers
    /// when no `HEAD` handler exists.
    fn lookup(&self, method: &Method) -> Option<&[Endpoint]> {
        match self.specific(method) {
            Some(handlers) => Some(handlers),
            None if *method == Method::HEAD => self.specific(&Method::GET),
            None => None,
        }
    }

    fn append(&mut self, method: Option<&Method>, endpoints: &[Endpoint]) {
        match method {
            None => self.all.extend_from_slice(endpoints),
            Some(method) => match self.methods.iter_mut().find(|(m, _)| m == method) {
                Some((_, handlers)) => handlers.extend_from_slice(endpoints),
                None => self.methods.push((method.clone(), endpoints.to_vec())),
            },
        }
    }
}

struct RouteInner {
    pattern: PathPattern,
    table: ArcSwap<MethodTable>,
    owner: Weak<RouterInner>,
}

/// Handlers registered for one path, keyed by method.
///
/// Obtained from [`Router::route`]; the handle is cheap to clone and every
/// clone refers to the same route.
#[derive(Clone)]
pub struct Route {
    inner: Arc<RouteInner>,
}

macro_rules! route_method_shortcuts {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            #[doc = concat!("Append handlers for `", stringify!($method), "` requests.")]
            pub fn $name(&self, items: impl Into<Middleware>) -> Result<&Self, RegistrationError> {
                self.on(Method::$method, items)
            }
        )*
    };
}

impl Route {
    #[cfg(test)]
    pub(crate) fn new(pattern: PathPattern) -> Self {
        Self::owned_by(pattern, Weak::new())
    }

    pub(crate) fn owned_by(pattern: PathPattern, owner: Weak<RouterInner>) -> Self {
        Self {
            inner: Arc::new(RouteInner {
                pattern,
                table: ArcSwap::from_pointee(MethodTable::default()),
                owner,
            }),
        }
    }

    /// The path this route was registered under.
    pub fn path(&self) -> String {
        self.inner.pattern.to_string()
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.inner.pattern
    }

    /// Append handlers run for every method, ahead of method specific ones.
    pub fn all(&self, items: impl Into<Middleware>) -> Result<&Self, RegistrationError> {
        let endpoints = collect_endpoints(items.into(), &self.path())?;
        self.append(None, endpoints)?;
        Ok(self)
    }

    /// Append handlers for `method`.
    pub fn on(&self, method: Method, items: impl Into<Middleware>) -> Result<&Self, RegistrationError> {
        let endpoints = collect_endpoints(items.into(), &self.path())?;
        self.append(Some(method), endpoints)?;
        Ok(self)
    }

    route_method_shortcuts! {
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

    pub(crate) fn append(
        &self,
        method: Option<Method>,
        endpoints: Vec<Endpoint>,
    ) -> Result<(), RegistrationError> {
        if let Some(owner) = self.inner.owner.upgrade() {
            let owner = Router::from_inner(owner);
            for endpoint in &endpoints {
                if let Endpoint::Router(child) = endpoint {
                    if child.reaches(&owner) {
                        return Err(RegistrationError::CyclicMount { path: self.path() });
                    }
                }
            }
        }

        self.inner.table.rcu(|table| {
            let mut next = MethodTable::clone(table);
            next.append(method.as_ref(), &endpoints);
            next
        });
        tracing::debug!(
            "Registered {} handler(s) for {} {}",
            endpoints.len(),
            method.as_ref().map_or("ALL", Method::as_str),
            self.path()
        );
        Ok(())
    }

    /// Whether any handler would run for `method`.
    pub fn handles(&self, method: &Method) -> bool {
        let table = self.inner.table.load();
        !table.all.is_empty() || table.lookup(method).is_some()
    }

    /// Methods with dedicated handlers; `HEAD` is implied by `GET`.
    pub fn methods(&self) -> Vec<Method> {
        let table = self.inner.table.load();
        let mut methods: Vec<Method> = table
            .methods
            .iter()
            .filter(|(_, handlers)| !handlers.is_empty())
            .map(|(method, _)| method.clone())
            .collect();
        if methods.contains(&Method::GET) && !methods.contains(&Method::HEAD) {
            methods.push(Method::HEAD);
        }
        methods
    }

    /// Handlers run for `method`: catch-all handlers first, then specific ones.
    pub(crate) fn handlers_for(&self, method: &Method) -> Vec<Endpoint> {
        let table = self.inner.table.load();
        let mut handlers = table.all.clone();
        if let Some(specific) = table.lookup(method) {
            handlers.extend_from_slice(specific);
        }
        handlers
    }

    /// Routers mounted directly inside this route's handler lists.
    pub(crate) fn routers(&self) -> Vec<Router> {
        let table = self.inner.table.load();
        table
            .all
            .iter()
            .chain(table.methods.iter().flat_map(|(_, handlers)| handlers.iter()))
            .filter_map(|endpoint| match endpoint {
                Endpoint::Router(router) => Some(router.clone()),
                _ => None,
            })
            .collect()
    }

    /// Run this route's handlers for the request method. `ctx.route` points at
    /// this route while they run and is restored once the list is exhausted.
    pub(crate) fn dispatch<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        error: Option<HandlerError>,
    ) -> BoxFuture<'a, Flow> {
        Box::pin(async move {
            let handlers = self.handlers_for(&ctx.method);
            let previous = ctx.route.replace(self.clone());
            let mut pending = error;

            for endpoint in &handlers {
                if !endpoint.accepts(pending.is_some()) {
                    continue;
                }
                match endpoint.invoke(pending.take(), ctx).await {
                    Flow::Next => {}
                    Flow::Fail(e) => pending = Some(e),
                    Flow::SkipRoute => {
                        tracing::debug!("Skipping rest of route {}", self.path());
                        break;
                    }
                    Flow::SkipRouter => {
                        ctx.route = previous;
                        return Flow::SkipRouter;
                    }
                    Flow::Halt => return Flow::Halt,
                }
            }

            ctx.route = previous;
            pending.map_or(Flow::Next, Flow::Fail)
        })
    }

    /// Whether both handles refer to the same route.
    pub fn ptr_eq(&self, other: &Route) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path())
            .field("methods", &self.methods())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::core::middleware::handler_fn;

    fn record(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Middleware {
        let log = log.clone();
        handler_fn(move |_ctx| {
            log.lock().unwrap().push(name);
            Box::pin(async { Flow::Next })
        })
    }

    #[test]
    fn test_empty_registration_is_rejected() {
        let route = Route::new("/x".into());
        let err = route.get(Middleware::List(vec![])).unwrap_err();
        assert!(matches!(err, RegistrationError::MissingHandler { .. }));
        assert!(!route.handles(&Method::GET));
    }

    #[test]
    fn test_handles_and_methods() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let route = Route::new("/x".into());
        route.get(record(&log, "get")).unwrap();
        route.post(record(&log, "post")).unwrap();

        assert!(route.handles(&Method::GET));
        assert!(route.handles(&Method::HEAD));
        assert!(!route.handles(&Method::PUT));
        assert_eq!(route.methods(), vec![Method::GET, Method::POST, Method::HEAD]);

        route.all(record(&log, "all")).unwrap();
        assert!(route.handles(&Method::PUT));
    }

    #[tokio::test]
    async fn test_all_handlers_run_before_specific() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let route = Route::new("/x".into());
        route.get(record(&log, "get-1")).unwrap();
        route.all(record(&log, "all")).unwrap();
        route.get(record(&log, "get-2")).unwrap();

        let mut ctx = RequestContext::new(Method::GET, "/x");
        assert!(matches!(route.dispatch(&mut ctx, None).await, Flow::Next));
        assert_eq!(*log.lock().unwrap(), vec!["all", "get-1", "get-2"]);
        assert!(ctx.route().is_none());
    }

    #[tokio::test]
    async fn test_skip_route_abandons_remaining_handlers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let route = Route::new("/x".into());
        route
            .get(Middleware::list([
                record(&log, "first"),
                handler_fn(|_ctx| Box::pin(async { Flow::SkipRoute })),
                record(&log, "never"),
            ]))
            .unwrap();

        let mut ctx = RequestContext::new(Method::GET, "/x");
        assert!(matches!(route.dispatch(&mut ctx, None).await, Flow::Next));
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
    }

    #[tokio::test]
    async fn test_route_is_visible_while_running() {
        let route = Route::new("/foo".into());
        route
            .get(handler_fn(|ctx| {
                let path = ctx.route().map(Route::path).unwrap_or_default();
                Box::pin(async move { ctx.respond(http::StatusCode::OK, path) })
            }))
            .unwrap();

        let mut ctx = RequestContext::new(Method::GET, "/foo");
        assert!(matches!(route.dispatch(&mut ctx, None).await, Flow::Halt));
        assert_eq!(ctx.response().body().as_ref(), b"/foo");
    }
}
