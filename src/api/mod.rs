//! HTTP API surface, enabled with the `api` feature.

pub mod handlers;
pub mod models;
pub mod server;

pub use server::{build_router, start_http_server, AppState};
