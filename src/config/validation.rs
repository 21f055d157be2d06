use std::{collections::HashSet, net::SocketAddr};

use eyre::Result;
use http::{HeaderName, HeaderValue, Method, StatusCode};

use crate::{
    config::models::{RouteEntry, RouterConfig, ServerConfig},
    core::{MatchOptions, PathMatcher, PathPattern},
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid path pattern '{path}': {reason}")]
    InvalidPattern { path: String, reason: String },

    #[error("Route conflict detected: {message}")]
    RouteConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if config.router.route_count() == 0 {
            errors.push(ValidationError::MissingField {
                field: "router.routes".to_string(),
            });
        }
        Self::validate_router(&config.router, "router", &mut errors);
        Self::validate_headers(
            &config.middleware.custom_headers,
            "middleware.custom_headers",
            &mut errors,
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_router(router: &RouterConfig, scope: &str, errors: &mut Vec<ValidationError>) {
        Self::validate_headers(
            &router.response_headers,
            &format!("{scope}.response_headers"),
            errors,
        );

        let options = MatchOptions {
            case_sensitive: router.case_sensitive,
            strict: router.strict,
            end: true,
        };
        let mut seen = HashSet::new();
        for (index, route) in router.routes.iter().enumerate() {
            let field = format!("{scope}.routes[{index}]");
            Self::validate_route(route, &field, options, errors);
            for method in Self::route_methods(route) {
                if !seen.insert((route.path.clone(), method.clone())) {
                    errors.push(ValidationError::RouteConflict {
                        message: format!(
                            "{method} {} is registered more than once in {scope}; only the first answers",
                            route.path
                        ),
                    });
                }
            }
        }

        let mount_options = MatchOptions {
            end: false,
            strict: false,
            ..options
        };
        for (index, mount) in router.mounts.iter().enumerate() {
            let field = format!("{scope}.mounts[{index}]");
            Self::validate_path(&mount.path, &field, mount_options, errors);
            Self::validate_router(&mount.router, &format!("{field}.router"), errors);
        }
    }

    fn route_methods(route: &RouteEntry) -> Vec<String> {
        if route.methods.is_empty() {
            vec!["*".to_string()]
        } else {
            route.methods.iter().map(|m| m.to_ascii_uppercase()).collect()
        }
    }

    fn validate_route(
        route: &RouteEntry,
        field: &str,
        options: MatchOptions,
        errors: &mut Vec<ValidationError>,
    ) {
        Self::validate_path(&route.path, field, options, errors);

        for method in &route.methods {
            if Method::from_bytes(method.to_ascii_uppercase().as_bytes()).is_err() {
                errors.push(ValidationError::InvalidField {
                    field: format!("{field}.methods"),
                    message: format!("'{method}' is not a valid HTTP method"),
                });
            }
        }

        if StatusCode::from_u16(route.status).is_err() {
            errors.push(ValidationError::InvalidField {
                field: format!("{field}.status"),
                message: format!("{} is not a valid HTTP status code", route.status),
            });
        }

        if route.body.is_some() && route.json.is_some() {
            errors.push(ValidationError::InvalidField {
                field: field.to_string(),
                message: "Only one of 'body' and 'json' may be set".to_string(),
            });
        }

        if let Some(content_type) = &route.content_type {
            if HeaderValue::from_str(content_type).is_err() {
                errors.push(ValidationError::InvalidField {
                    field: format!("{field}.content_type"),
                    message: format!("'{content_type}' is not a valid header value"),
                });
            }
        }

        Self::validate_headers(&route.headers, &format!("{field}.headers"), errors);
    }

    fn validate_path(
        path: &str,
        field: &str,
        options: MatchOptions,
        errors: &mut Vec<ValidationError>,
    ) {
        if !path.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("{field}.path"),
                message: format!("Path '{path}' must start with '/'"),
            });
            return;
        }
        if let Err(e) = PathMatcher::compile(&PathPattern::from(path), options) {
            errors.push(ValidationError::InvalidPattern {
                path: path.to_string(),
                reason: e.to_string(),
            });
        }
    }

    fn validate_headers<'a>(
        headers: impl IntoIterator<Item = (&'a String, &'a String)>,
        field: &str,
        errors: &mut Vec<ValidationError>,
    ) {
        for (name, value) in headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err()
                || HeaderValue::from_str(value).is_err()
            {
                errors.push(ValidationError::InvalidField {
                    field: field.to_string(),
                    message: format!("Invalid header: {name} = {value}"),
                });
            }
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
