//! The `dfbench` command line tool.
//!
//! This wires the benchmarks of [`dfbench_service`] to a command line, a layered configuration
//! and terminal logging.

pub mod cli;
pub mod config;
pub mod observability;
