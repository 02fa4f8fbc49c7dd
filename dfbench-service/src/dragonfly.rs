//! Download benchmark against the Dragonfly client pods.
//!
//! A benchmark downloads one file per size tier on every client pod at once. Each pod's
//! download is followed by a scrape of its client metrics through [`Stats`], which later
//! reduces everything into a [`Report`](crate::report::Report).

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use dfbench_types::{Downloader, SizeTier};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::Result;
use crate::exec::{Executor, PodExec, shell};
use crate::fanout::fan_out;
use crate::file_server::{FileServer, OUTPUT_DIR, output_path};
use crate::pods::{CLIENT_CONTAINER, client_pods};
use crate::stats::Stats;

/// Address of the Dragonfly proxy inside every client pod.
pub const PROXY_ADDR: &str = "http://127.0.0.1:4001";

/// How the duration of a download is determined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Measurement {
    /// Read the download task histogram from the client's metrics endpoint.
    #[default]
    Metrics,
    /// Time the download command from the outside.
    Timing,
}

/// The verdicts of a benchmark and of the cleanup that followed it.
///
/// A failed cleanup never changes the verdict of the runs before it, so both are kept.
#[derive(Debug)]
pub struct BenchmarkOutcome {
    /// Result of the downloads.
    pub run: Result<()>,
    /// Result of removing the downloaded files.
    pub cleanup: Result<()>,
}

impl BenchmarkOutcome {
    /// Returns the first failure, preferring the run over the cleanup.
    pub fn into_result(self) -> Result<()> {
        self.run.and(self.cleanup)
    }
}

/// Runs download benchmarks on the client pods of one namespace.
#[derive(Clone, Debug)]
pub struct Dragonfly {
    namespace: String,
    executor: Arc<dyn Executor>,
    file_server: FileServer,
    stats: Stats,
    measurement: Measurement,
    targeted: Arc<Mutex<BTreeSet<String>>>,
}

impl Dragonfly {
    /// Creates a benchmark runner for the client pods in `namespace`.
    pub fn new(namespace: impl Into<String>, executor: Arc<dyn Executor>, stats: Stats) -> Self {
        let namespace = namespace.into();
        Self {
            file_server: FileServer::new(namespace.clone()),
            namespace,
            executor,
            stats,
            measurement: Measurement::default(),
            targeted: Default::default(),
        }
    }

    /// Sets how download durations are determined.
    pub fn measurement(mut self, measurement: Measurement) -> Self {
        self.measurement = measurement;
        self
    }

    /// Returns the collector the downloads are recorded in.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Downloads every size tier in ascending order, stopping at the first failing tier.
    pub async fn run(&self, downloader: &str) -> Result<()> {
        let downloader: Downloader = downloader.parse()?;
        for tier in SizeTier::ALL {
            self.download(downloader, tier).await.inspect_err(|err| {
                tracing::error!(
                    error = err as &dyn std::error::Error,
                    %downloader,
                    %tier,
                    "failed to download file"
                )
            })?;
        }
        Ok(())
    }

    /// Downloads a single size tier.
    pub async fn run_by_file_size(&self, downloader: &str, tier: SizeTier) -> Result<()> {
        let downloader: Downloader = downloader.parse()?;
        self.download(downloader, tier).await
    }

    /// Downloads the file of `tier` on every client pod concurrently.
    ///
    /// All pods finish their download before the first failure, in pod order, is returned.
    pub async fn download(&self, downloader: Downloader, tier: SizeTier) -> Result<()> {
        let pods = client_pods(&*self.executor, &self.namespace).await?;
        self.target(&pods);

        tracing::info!(%downloader, %tier, pods = pods.len(), "downloading file");
        let operation = format!("download {tier} by {downloader}");
        fan_out(&operation, &pods, |pod| {
            let this = self.clone();
            async move { this.download_on(&pod, downloader, tier).await }
        })
        .await
    }

    async fn download_on(&self, pod: &str, downloader: Downloader, tier: SizeTier) -> Result<()> {
        let target = PodExec::new(&self.namespace, pod).container(CLIENT_CONTAINER);
        let tag = downloader.as_str();
        let url = self.file_server.file_url(tier, tag)?;
        let output = output_path(tier, tag);

        let command = match downloader {
            Downloader::Dfget => format!("dfget '{url}' --output {output}"),
            Downloader::Proxy => format!("curl -x {PROXY_ADDR} '{url}' --output {output}"),
        };

        let started_at = SystemTime::now();
        let start = Instant::now();
        let output = self.executor.exec(&target, &shell(command)).await?;
        let elapsed = start.elapsed();
        tracing::debug!(
            pod,
            %downloader,
            %tier,
            output = %String::from_utf8_lossy(&output),
            "downloaded file"
        );

        match self.measurement {
            Measurement::Metrics => {
                self.stats
                    .collect_client_metrics(pod, downloader, tier)
                    .await
            }
            Measurement::Timing => {
                self.stats
                    .add_download(pod, downloader, tier, started_at, elapsed);
                Ok(())
            }
        }
    }

    /// Removes the downloaded files from every pod a download was started on.
    ///
    /// Does nothing if no download was started yet.
    pub async fn cleanup(&self) -> Result<()> {
        let pods = self.targeted();
        if pods.is_empty() {
            tracing::debug!("no pods to clean up");
            return Ok(());
        }

        tracing::info!(pods = pods.len(), "cleaning up downloaded files");
        fan_out("cleanup", &pods, |pod| {
            let executor = Arc::clone(&self.executor);
            let target = PodExec::new(&self.namespace, pod).container(CLIENT_CONTAINER);
            async move {
                executor
                    .exec(&target, &shell(format!("rm -rf {OUTPUT_DIR}/*")))
                    .await
                    .map(drop)
            }
        })
        .await
    }

    /// Runs the benchmark `number` times and cleans up once afterwards.
    ///
    /// Without a `tier`, every repetition downloads all tiers. Repetitions stop at the first
    /// failure. Cleanup runs regardless, over every pod any repetition reached.
    pub async fn benchmark(
        &self,
        downloader: &str,
        tier: Option<SizeTier>,
        number: u32,
    ) -> BenchmarkOutcome {
        let run = self.repeat(downloader, tier, number).await;
        let cleanup = self.cleanup().await;
        BenchmarkOutcome { run, cleanup }
    }

    async fn repeat(&self, downloader: &str, tier: Option<SizeTier>, number: u32) -> Result<()> {
        for round in 1..=number {
            tracing::debug!(round, number, downloader, "running dragonfly benchmark");
            match tier {
                Some(tier) => self.run_by_file_size(downloader, tier).await?,
                None => self.run(downloader).await?,
            }
        }
        Ok(())
    }

    fn target(&self, pods: &[String]) {
        self.targeted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(pods.iter().cloned());
    }

    fn targeted(&self) -> Vec<String> {
        self.targeted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}
