//! Shared types for the Dragonfly benchmark harness.
//!
//! This crate defines the closed sets a benchmark is parametrized over:
//!
//!  - [`SizeTier`] is one of the seven fixed file-size categories
//!  - [`Downloader`] selects how a file is fetched inside a client pod
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod downloader;
pub mod tier;

pub use downloader::Downloader;
pub use tier::SizeTier;

/// Error returned when parsing one of the closed benchmark parameters fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The value does not name a known file size level.
    #[error("unknown file size level: {0:?}")]
    UnknownTier(String),

    /// The value does not name a known downloader.
    #[error("unknown downloader: {0:?}")]
    UnknownDownloader(String),
}
