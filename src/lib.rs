//! Shimgate - a supervising reverse proxy for a single backend process
//!
//! This library provides a thin supervisor-and-proxy shim that:
//! - Spawns one backend server process on a fixed loopback port
//! - Forwards all inbound HTTP traffic to that backend verbatim
//! - Exposes a `/health` endpoint that probes the backend directly
//! - Stops the backend cleanly on SIGINT/SIGTERM before exiting

pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod proxy;
pub mod supervisor;
