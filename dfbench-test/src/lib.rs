//! Test utilities for dfbench.
//!
//! This crate provides utilities to facilitate testing of the benchmark service and binary. See
//! the modules for all available utilities.

pub mod fixtures;
pub mod tracing;

/// The scripted executor, enabled through the `testing` feature of `dfbench-service`.
pub use dfbench_service::exec::mock::{ExecCall, MockExecutor};
