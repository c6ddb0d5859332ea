//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, catch-all handler)
//!     → Exchange built per request
//!     → routing handler matches a route and runs the filter chain
//!     → response assembled from the exchange after the chain completes
//! ```

pub mod server;

pub use server::GatewayServer;
