//! # lib_pulse
//!
//! Shared library for the opspulse operational-event stream.
//!
//! - **`producer`**: seed generator, tick engine, periodic emitter and the
//!   axum snapshot/push gateway.
//! - **`consumer`**: snapshot client, state reconciler, slice cache, push
//!   channel listener and derived views.
//! - **`models`**: wire records, push frames and consumer slices.
//! - **`retrieve`**: retrying JSON HTTP client.
//! - **`loggers`**: `tracing` subscriber setup and log pruning.

#![forbid(unsafe_code)]

pub mod consumer;
pub mod error;
pub mod loggers;
pub mod models;
pub mod producer;
pub mod retrieve;

pub use error::{CacheError, ChannelError, FetchError};
