//! Benchmark orchestration for Dragonfly and Nydus clusters.
//!
//! The service drives load against an already deployed cluster and reduces what it observes
//! into latency reports:
//!
//!  - [`exec`] runs commands inside pods through an [`Executor`](exec::Executor)
//!  - [`dragonfly`] fans out downloads per size tier and collects client metrics via [`stats`]
//!  - [`nydus`] times container starts on the Nydus snapshotter
//!  - [`scheduler`] replays scheduler protocol scenarios through a gRPC load generator
//!
//! Every benchmark ends in a [`report::Table`] that is printed to the terminal.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod dragonfly;
pub mod error;
pub mod exec;
mod fanout;
pub mod file_server;
pub mod metrics;
pub mod nydus;
pub mod pods;
pub mod record;
pub mod report;
pub mod scheduler;
pub mod stats;

pub use error::{Error, Result};
