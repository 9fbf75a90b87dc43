//! HTTP server, routing and health checks

mod health;
mod server;

pub use health::*;
pub use server::*;
