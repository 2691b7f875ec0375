//! REST API and SSE surface for the problem service

pub mod handlers;
pub mod server;
pub mod sse;
