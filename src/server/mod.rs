//! HTTP surface: axum middleware adapters and a demo server.

mod middleware;
mod server;

pub use middleware::{gate_requests, identity_from_headers, to_gate_request, trusted_identity};
pub use server::{router, spawn_sweeper, HttpServer};
