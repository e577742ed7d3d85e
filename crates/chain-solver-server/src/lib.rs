//! Chain solver server: dispatch endpoint, CLI helpers and logging setup.

pub mod config;
pub mod error;
pub mod logging;
pub mod rest;

pub use config::{resolve_secret, SolverArgs};
pub use error::{DispatchError, ServerError};
pub use rest::{router, serve, AppState, DispatchRequest};
