//! Listing moderation service
//!
//! Classifies marketplace advertisements as violating or not, either
//! synchronously over HTTP or asynchronously through a Redis Streams work
//! queue drained by the `worker` binary. Results are stored in PostgreSQL and
//! cached in Redis.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
