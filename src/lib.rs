//! Chatgate - request gating for chat services
//!
//! This crate puts an ordered chain of gates in front of a chat application's
//! HTTP handlers: an audit logger, an opening-hours check, a per-client fixed
//! window rate limiter and a role check for administrative paths.

pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod pipeline;
pub mod ratelimit;
pub mod request;
pub mod server;
