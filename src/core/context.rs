//! Per-request state threaded through a dispatch.
//!
//! A [`RequestContext`] is created once per incoming request and owned by that
//! request's dispatch. Routers rewrite `url`, `base_url` and `params` while a
//! mounted layer runs and put the caller's view back afterwards; nothing in
//! here is ever stored on the shared router graph.
use bytes::Bytes;
use http::{
    Extensions, HeaderMap, HeaderName, HeaderValue, Method, Response, StatusCode, header,
    request::Parts,
};
use serde::Serialize;

use crate::{core::route::Route, ports::handler::Flow};

/// Ordered name/value pairs captured from the matched path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value captured for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Insert or replace a value, keeping the original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    /// Overlay `other` on top of `self`; values in `other` win.
    pub fn merged(&self, other: &Params) -> Params {
        let mut merged = self.clone();
        for (name, value) in other.iter() {
            merged.insert(name, value);
        }
        merged
    }

    /// Iterate name/value pairs in capture order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Params {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut params = Params::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

/// Mutable state for one request travelling through a router graph.
#[derive(Debug)]
pub struct RequestContext {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) original_url: String,
    pub(crate) base_url: String,
    pub(crate) params: Params,
    pub(crate) route: Option<Route>,
    pub(crate) allow: Vec<Method>,
    headers: HeaderMap,
    extensions: Extensions,
    body: Bytes,
    response: Response<Bytes>,
}

impl RequestContext {
    /// Create a context for `method` and `url` (path plus optional query).
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            method,
            original_url: url.clone(),
            url,
            base_url: String::new(),
            params: Params::new(),
            route: None,
            allow: Vec::new(),
            headers: HeaderMap::new(),
            extensions: Extensions::new(),
            body: Bytes::new(),
            response: Response::new(Bytes::new()),
        }
    }

    /// Build a context from the head and buffered body of an HTTP request.
    pub fn from_parts(parts: Parts, body: Bytes) -> Self {
        let url = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_default();
        let mut ctx = Self::new(parts.method, url);
        ctx.headers = parts.headers;
        ctx.extensions = parts.extensions;
        ctx.body = body;
        ctx
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Url as seen by the current layer: the part not yet consumed by
    /// enclosing mounts, query string included.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Rewrite the url seen by subsequent layers.
    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    /// Url the request arrived with, never rewritten.
    pub fn original_url(&self) -> &str {
        &self.original_url
    }

    /// Portion of the original path consumed by enclosing mounts.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Path part of [`url`](Self::url), without the query string.
    pub fn path(&self) -> &str {
        self.url.split_once('?').map_or(self.url.as_str(), |(p, _)| p)
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Value captured for a named path parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Route whose handlers are currently running, if any.
    pub fn route(&self) -> Option<&Route> {
        self.route.as_ref()
    }

    /// Methods collected from matched routes while answering `OPTIONS`.
    pub fn allowed_methods(&self) -> &[Method] {
        &self.allow
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Typed storage for data shared between handlers of one request.
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn response(&self) -> &Response<Bytes> {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response<Bytes> {
        &mut self.response
    }

    /// Set a response header, skipping (with a warning) invalid pairs.
    pub fn set_header<K, V>(&mut self, name: K, value: V)
    where
        HeaderName: TryFrom<K>,
        HeaderValue: TryFrom<V>,
    {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.response.headers_mut().insert(name, value);
            }
            _ => tracing::warn!("Ignoring invalid response header for {}", self.url),
        }
    }

    /// Write a plain text response and halt the dispatch.
    pub fn respond(&mut self, status: StatusCode, body: impl Into<Bytes>) -> Flow {
        *self.response.status_mut() = status;
        self.response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        *self.response.body_mut() = body.into();
        Flow::Halt
    }

    /// Write a JSON response and halt the dispatch.
    pub fn respond_json<T: Serialize>(&mut self, status: StatusCode, value: &T) -> Flow {
        let body = match serde_json::to_vec(value) {
            Ok(body) => body,
            Err(e) => return Flow::fail(eyre::Report::new(e)),
        };
        *self.response.status_mut() = status;
        self.response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        *self.response.body_mut() = Bytes::from(body);
        Flow::Halt
    }

    /// Consume the context, keeping only the response produced so far.
    pub fn into_response(self) -> Response<Bytes> {
        self.response
    }
}
