//! # footfall-server
//!
//! HTTP server library for the footfall doorway counter.
//!
//! This library provides the API handlers, shared state and logging setup
//! used by the `footfall-server` binary.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
