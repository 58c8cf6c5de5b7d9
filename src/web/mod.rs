//! HTTP surface: handlers, middleware and the server

pub mod api;
pub mod middleware;
pub mod server;
pub mod streaming;

pub use server::{build_router, start_server, AppState, RouteInfo, ServeOptions, ServiceState};
