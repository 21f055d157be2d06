//! Configuration data structures for the junction server.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files and
//! describe a router tree declaratively: static responders registered as
//! routes, plus nested routers mounted under path prefixes.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::RouterOptions;

fn default_true() -> bool {
    true
}

fn default_status() -> u16 {
    200
}

/// Top level server configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub middleware: MiddlewareConfig,
    #[serde(default)]
    pub router: RouterConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            logging: LoggingConfig::default(),
            middleware: MiddlewareConfig::default(),
            router: RouterConfig::default(),
        }
    }
}

/// Logging output settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `junction=debug`
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// HTTP layers wrapped around the router service
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MiddlewareConfig {
    /// Tag every response with a generated `X-Request-ID`
    pub request_id: bool,
    /// Log start and completion of every request
    pub request_timing: bool,
    /// Add common hardening headers
    pub security_headers: bool,
    /// Reflect the caller origin in permissive CORS headers
    pub cors: bool,
    /// Extra headers added to every response
    pub custom_headers: HashMap<String, String>,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            request_id: true,
            request_timing: true,
            security_headers: false,
            cors: false,
            custom_headers: HashMap::new(),
        }
    }
}

/// One router of the declarative tree
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RouterConfig {
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub strict: bool,
    #[serde(default = "default_true")]
    pub merge_params: bool,
    /// Log errors that leave this router unhandled
    #[serde(default)]
    pub log_errors: bool,
    /// Headers set on every response passing through this router
    #[serde(default)]
    pub response_headers: HashMap<String, String>,
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
    #[serde(default)]
    pub mounts: Vec<MountConfig>,
}

impl RouterConfig {
    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            case_sensitive: self.case_sensitive,
            strict: self.strict,
            merge_params: self.merge_params,
        }
    }

    /// Number of routes in this router and every router mounted below it.
    pub fn route_count(&self) -> usize {
        self.routes.len()
            + self
                .mounts
                .iter()
                .map(|mount| mount.router.route_count())
                .sum::<usize>()
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            strict: false,
            merge_params: true,
            log_errors: false,
            response_headers: HashMap::new(),
            routes: Vec::new(),
            mounts: Vec::new(),
        }
    }
}

/// A route answering with a fixed response
///
/// `{name}` placeholders in `body` are replaced with the value of the path
/// parameter `name`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RouteEntry {
    pub path: String,
    /// Methods served; empty means every method
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub json: Option<serde_json::Value>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// A nested router mounted under a path prefix
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MountConfig {
    pub path: String,
    pub router: RouterConfig,
}
