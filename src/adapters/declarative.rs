//! Build a router tree from its configuration.
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderName, HeaderValue, Method, StatusCode, header};
use thiserror::Error;

use crate::{
    config::models::{RouteEntry, RouterConfig},
    core::{Middleware, RegistrationError, RequestContext, Router},
    ports::handler::{ErrorHandler, Flow, Handler, HandlerError},
};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BuildError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("Invalid method '{method}' for route {path}")]
    InvalidMethod { path: String, method: String },

    #[error("Invalid status {status} for route {path}")]
    InvalidStatus { path: String, status: u16 },

    #[error("Invalid header {name} in {scope}")]
    InvalidHeader { scope: String, name: String },
}

enum ResponseBody {
    Empty,
    Text {
        template: String,
        content_type: Option<HeaderValue>,
    },
    Json(serde_json::Value),
}

/// Handler answering every request with a configured response.
struct StaticResponse {
    status: StatusCode,
    body: ResponseBody,
    headers: Vec<(HeaderName, HeaderValue)>,
}

#[async_trait]
impl Handler for StaticResponse {
    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        let flow = match &self.body {
            ResponseBody::Empty => ctx.respond(self.status, Bytes::new()),
            ResponseBody::Text {
                template,
                content_type,
            } => {
                let body = render(template, ctx);
                let flow = ctx.respond(self.status, body);
                if let Some(content_type) = content_type {
                    ctx.response_mut()
                        .headers_mut()
                        .insert(header::CONTENT_TYPE, content_type.clone());
                }
                flow
            }
            ResponseBody::Json(value) => ctx.respond_json(self.status, value),
        };
        if matches!(flow, Flow::Halt) {
            let headers = ctx.response_mut().headers_mut();
            for (name, value) in &self.headers {
                headers.insert(name.clone(), value.clone());
            }
        }
        flow
    }
}

/// Middleware adding fixed headers to the response under construction.
struct ResponseHeaders(Vec<(HeaderName, HeaderValue)>);

#[async_trait]
impl Handler for ResponseHeaders {
    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        let headers = ctx.response_mut().headers_mut();
        for (name, value) in &self.0 {
            headers.insert(name.clone(), value.clone());
        }
        Flow::Next
    }
}

/// Error handler that logs the pending error and passes it on unchanged.
pub struct ErrorLogger;

#[async_trait]
impl ErrorHandler for ErrorLogger {
    async fn handle_error(&self, error: HandlerError, ctx: &mut RequestContext) -> Flow {
        if error.status().is_server_error() {
            tracing::error!(
                "{} {} failed under '{}': {}",
                ctx.method(),
                ctx.original_url(),
                ctx.base_url(),
                error
            );
        } else {
            tracing::warn!(
                "{} {} failed under '{}': {}",
                ctx.method(),
                ctx.original_url(),
                ctx.base_url(),
                error
            );
        }
        Flow::Fail(error)
    }
}

/// Substitute `{name}` placeholders with captured path parameters.
fn render(template: &str, ctx: &RequestContext) -> String {
    let mut rendered = template.to_string();
    for (name, value) in ctx.params().iter() {
        rendered = rendered.replace(&format!("{{{name}}}"), value);
    }
    rendered
}

fn parse_headers<'a>(
    headers: impl IntoIterator<Item = (&'a String, &'a String)>,
    scope: &str,
) -> Result<Vec<(HeaderName, HeaderValue)>, BuildError> {
    headers
        .into_iter()
        .map(|(name, value)| {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => Ok((name, value)),
                _ => Err(BuildError::InvalidHeader {
                    scope: scope.to_string(),
                    name: name.clone(),
                }),
            }
        })
        .collect()
}

fn responder(route: &RouteEntry) -> Result<Middleware, BuildError> {
    let status = StatusCode::from_u16(route.status).map_err(|_| BuildError::InvalidStatus {
        path: route.path.clone(),
        status: route.status,
    })?;
    let content_type = match &route.content_type {
        Some(content_type) => Some(HeaderValue::from_str(content_type).map_err(|_| {
            BuildError::InvalidHeader {
                scope: route.path.clone(),
                name: header::CONTENT_TYPE.to_string(),
            }
        })?),
        None => None,
    };
    let body = match (&route.json, &route.body) {
        (Some(value), _) => ResponseBody::Json(value.clone()),
        (None, Some(template)) => ResponseBody::Text {
            template: template.clone(),
            content_type,
        },
        (None, None) => ResponseBody::Empty,
    };

    Ok(Middleware::handler(StaticResponse {
        status,
        body,
        headers: parse_headers(&route.headers, &route.path)?,
    }))
}

/// Build the router described by `config`, mounting nested routers
/// recursively.
pub fn build_router(config: &RouterConfig) -> Result<Router, BuildError> {
    let router = Router::with_options(config.router_options());

    if !config.response_headers.is_empty() {
        let headers = parse_headers(&config.response_headers, "response_headers")?;
        router.use_middleware(Middleware::handler(ResponseHeaders(headers)))?;
    }

    for route in &config.routes {
        let handler = responder(route)?;
        if route.methods.is_empty() {
            router.all(route.path.as_str(), handler)?;
        } else {
            for method in &route.methods {
                let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(
                    |_| BuildError::InvalidMethod {
                        path: route.path.clone(),
                        method: method.clone(),
                    },
                )?;
                router.on(method, route.path.as_str(), handler.clone())?;
            }
        }
        tracing::info!("Configured route: {} {:?}", route.path, route.methods);
    }

    for mount in &config.mounts {
        let child = build_router(&mount.router)?;
        router.use_at(mount.path.as_str(), child)?;
        tracing::info!("Mounted router at {}", mount.path);
    }

    if config.log_errors {
        router.use_middleware(Middleware::error_handler(ErrorLogger))?;
    }

    Ok(router)
}
