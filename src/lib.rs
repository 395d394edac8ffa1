//! Slidegate - Sliding Window Rate Limiting
//!
//! This crate implements a per-client sliding-window request-rate limiter
//! attached to a single HTTP route prefix. Each client key keeps a log of
//! its recent request timestamps; requests beyond the threshold within the
//! trailing window are rejected with `429 Too Many Requests`, and idle
//! state is swept in the background.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
