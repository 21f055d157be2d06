pub mod handler;

pub use handler::{ErrorHandler, Flow, Handler, HandlerError, ParamHandler, param_fn};
