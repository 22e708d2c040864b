//! HTTP and WebSocket front end for the Spades match engine.
//!
//! The binary in `main.rs` wires configuration, logging and metrics around
//! [`api::create_router`]; integration tests drive the same router against
//! in-memory backends.

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;
