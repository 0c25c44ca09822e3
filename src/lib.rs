// Engagement Core - likes, shares, comments and notifications with consistent counters

// Core types and primitives
pub mod core;

// Infrastructure - database, counters, IDs, auth and metrics
pub mod infrastructure;

// Engagement mutations and notification fan-out
pub mod services;

// Push transport - hub and WebSocket endpoint
pub mod push;

// Client-side mutation coordinator
pub mod client;

// HTTP surface and wiring
pub mod app_state;
pub mod config;
pub mod engagement_interface;

// Common utilities
pub mod error;

// Re-exports for convenience
pub use error::{AppError, AppResult};
