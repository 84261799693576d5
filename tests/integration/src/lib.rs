//! Integration test utilities for the roomcast gateway
//!
//! This crate provides helpers for running end-to-end tests against a
//! gateway served on a loopback port, and for wiring several nodes into
//! an in-process cluster.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
