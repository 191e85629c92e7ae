//! HTTP API handlers for mls-cxr
//!
//! JSON intake adapter standing in for the imaging transport: received
//! objects and liveness checks arrive as HTTP requests and are handed to
//! the [`EventDispatcher`](crate::services::EventDispatcher).

pub mod health;
pub mod intake;

pub use health::health_routes;
pub use intake::intake_routes;
