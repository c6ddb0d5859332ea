//! HTTP/WebSocket API gateway library.
//!
//! Requests are matched against configured routes (asynchronous composable
//! predicates), pass through an ordered chain of filters sharing a
//! per-request [`exchange::Exchange`], and are forwarded by terminal routing
//! filters (HTTP(S), WebSocket, in-process forward). Responses stream back
//! through deferred writeback, and a distributed token-bucket rate limiter
//! can be attached to any route as a filter.

pub mod config;
pub mod error;
pub mod exchange;
pub mod factory;
pub mod filter;
pub mod http;
pub mod lifecycle;
pub mod ratelimit;
pub mod routing;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
