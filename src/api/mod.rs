//! HTTP API handlers.

mod routes;

pub use routes::*;
