pub mod declarative;
pub mod middleware;
pub mod service;

pub use declarative::{BuildError, ErrorLogger, build_router};
pub use middleware::apply_middleware;
pub use service::{RouterService, serve_request};
