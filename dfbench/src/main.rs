//! Benchmark tool for Dragonfly and Nydus clusters.
//!
//! See [`dfbench::cli`] for the available commands.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

fn main() -> anyhow::Result<()> {
    dfbench::cli::execute()
}
