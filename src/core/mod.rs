pub mod context;
pub(crate) mod layer;
pub mod matcher;
pub mod middleware;
pub mod pattern;
pub mod route;
pub mod router;

pub use context::{Params, RequestContext};
pub use matcher::{MatchOptions, PathMatch, PathMatcher};
pub use middleware::{Middleware, error_handler_fn, handler_fn};
pub use pattern::{PathPattern, PatternError};
pub use route::Route;
pub use router::{Outcome, RegistrationError, Router, RouterOptions};
