//! Error types for benchmark orchestration.

use std::process::ExitStatus;

use dfbench_types::{Downloader, ParseError, SizeTier};
use thiserror::Error;

use crate::metrics::MetricsError;

/// Errors that can occur while running a benchmark.
#[derive(Debug, Error)]
pub enum Error {
    /// Pod discovery returned an empty result set.
    #[error("no client pod found in namespace {namespace} matching {selector:?}")]
    NoPods {
        /// The namespace that was queried.
        namespace: String,
        /// The label selector that matched nothing.
        selector: String,
    },

    /// A remote command exited unsuccessfully.
    #[error("command on {target} exited with {status}: {output}")]
    Exec {
        /// The pod, or the local tool, that ran the command.
        target: String,
        /// Exit status of the command.
        status: ExitStatus,
        /// Captured standard output and error.
        output: String,
    },

    /// The benchmark-wide deadline elapsed before the command finished.
    #[error("deadline exceeded while running command on {target}")]
    DeadlineExceeded {
        /// The pod, or the local tool, that ran the command.
        target: String,
    },

    /// Spawning or talking to a local process failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A download URL could not be built.
    #[error("invalid file server URL: {0}")]
    Url(#[from] url::ParseError),

    /// The requested downloader is not one of the known modes.
    #[error("unknown downloader: {0:?}")]
    UnknownDownloader(String),

    /// The requested file size level is not one of the known tiers.
    #[error("unknown file size level: {0:?}")]
    UnknownTier(String),

    /// The metrics endpoint of a pod could not be scraped.
    #[error("failed to get client metrics of pod {pod}")]
    Scrape {
        /// The pod that was scraped.
        pod: String,
        /// Why the scrape command failed.
        #[source]
        source: Box<Error>,
    },

    /// The scraped metrics could not be parsed.
    #[error("failed to parse client metrics of pod {pod}")]
    Metrics {
        /// The pod that was scraped.
        pod: String,
        /// Why parsing failed.
        #[source]
        source: MetricsError,
    },

    /// The metrics of a pod could not be reset, so later runs would see stale samples.
    #[error("failed to reset client metrics of pod {pod}")]
    ResetMetrics {
        /// The pod whose metrics are now stale.
        pod: String,
        /// Why the reset command failed.
        #[source]
        source: Box<Error>,
    },

    /// A recorded histogram does not hold exactly one sample.
    #[error("invalid sample count {count} of pod {pod} for {tier} by {downloader}")]
    InvalidSampleCount {
        /// The pod the snapshot was taken from.
        pod: String,
        /// The downloader of the run.
        downloader: Downloader,
        /// The tier of the run.
        tier: SizeTier,
        /// The number of samples found.
        count: u64,
    },

    /// A recorded histogram has a negative or non-finite sum.
    #[error("invalid sample sum {sum} of pod {pod} for {tier} by {downloader}")]
    InvalidSampleSum {
        /// The pod the snapshot was taken from.
        pod: String,
        /// The downloader of the run.
        downloader: Downloader,
        /// The tier of the run.
        tier: SizeTier,
        /// The offending sum.
        sum: f64,
    },

    /// Records exist for a tier but none of them carries a matching sample.
    #[error("no samples recorded for {tier} by {downloader}")]
    MissingSamples {
        /// The downloader of the group.
        downloader: Downloader,
        /// The tier of the group.
        tier: SizeTier,
    },

    /// The load generator produced a report that could not be read.
    #[error("failed to read load generator report for {method}")]
    RunReport {
        /// The gRPC method that was exercised.
        method: String,
        /// Why deserialization failed.
        #[source]
        source: serde_json::Error,
    },

    /// A spawned task panicked or was cancelled.
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::UnknownDownloader(name) => Error::UnknownDownloader(name),
            ParseError::UnknownTier(name) => Error::UnknownTier(name),
        }
    }
}

/// Result type for benchmark operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
