//! Collection of client metrics and their reduction into latency reports.
//!
//! After every download, [`Stats::collect_client_metrics`] scrapes the client's metrics
//! endpoint, keeps the parsed snapshot as a [`DownloadRecord`] and resets the endpoint so the
//! next run starts from an empty histogram. [`reduce`] turns the collected records into a
//! [`Report`] with one row per downloader and size tier.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dfbench_types::{Downloader, SizeTier};

use crate::error::{Error, Result};
use crate::exec::{Executor, PodExec, shell};
use crate::metrics::{self, Histogram};
use crate::pods::CLIENT_CONTAINER;
use crate::record::{DownloadRecord, Observation, RecordStore};
use crate::report::{Report, Row, Summary};

/// Histogram of download durations exposed by the Dragonfly client.
pub const TASK_DURATION_METRIC: &str = "dragonfly_client_download_task_duration_milliseconds";

/// Label on [`TASK_DURATION_METRIC`] that carries the size code of the downloaded task.
pub const TASK_SIZE_LEVEL_LABEL: &str = "task_size_level";

/// Metrics endpoint of the client, reachable from inside its pod.
pub const METRICS_ENDPOINT: &str = "http://127.0.0.1:4002/metrics";

/// Collects download observations of one benchmark invocation.
#[derive(Clone, Debug)]
pub struct Stats {
    namespace: String,
    executor: Arc<dyn Executor>,
    downloads: RecordStore<DownloadRecord>,
}

impl Stats {
    /// Creates a collector for the client pods in `namespace`.
    pub fn new(namespace: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        Self {
            namespace: namespace.into(),
            executor,
            downloads: RecordStore::new(),
        }
    }

    /// Returns the store of all recorded downloads.
    pub fn downloads(&self) -> &RecordStore<DownloadRecord> {
        &self.downloads
    }

    /// Records a download that was timed around the download command.
    pub fn add_download(
        &self,
        pod: &str,
        downloader: Downloader,
        tier: SizeTier,
        started_at: SystemTime,
        elapsed: Duration,
    ) {
        self.downloads.insert(DownloadRecord {
            pod: pod.to_owned(),
            downloader,
            tier,
            observation: Observation::Timing {
                started_at,
                elapsed,
            },
        });
    }

    /// Scrapes the metrics of `pod`, records them and resets the endpoint.
    ///
    /// The snapshot is recorded before the reset, so a failed reset still leaves the download
    /// in the report. It does fail the call, because the next run on this pod would otherwise
    /// read stale samples.
    pub async fn collect_client_metrics(
        &self,
        pod: &str,
        downloader: Downloader,
        tier: SizeTier,
    ) -> Result<()> {
        let target = PodExec::new(&self.namespace, pod).container(CLIENT_CONTAINER);

        let output = self
            .executor
            .exec(&target, &shell(format!("curl -s {METRICS_ENDPOINT}")))
            .await
            .map_err(|err| Error::Scrape {
                pod: pod.to_owned(),
                source: Box::new(err),
            })
            .inspect_err(|err| log_error(err, pod, downloader, tier))?;

        let families = metrics::parse(&String::from_utf8_lossy(&output))
            .map_err(|source| Error::Metrics {
                pod: pod.to_owned(),
                source,
            })
            .inspect_err(|err| log_error(err, pod, downloader, tier))?;

        tracing::debug!(pod, %downloader, %tier, families = families.len(), "collected client metrics");
        self.downloads.insert(DownloadRecord {
            pod: pod.to_owned(),
            downloader,
            tier,
            observation: Observation::Metrics(families),
        });

        self.executor
            .exec(
                &target,
                &shell(format!("curl -s -X DELETE {METRICS_ENDPOINT}")),
            )
            .await
            .map_err(|err| Error::ResetMetrics {
                pod: pod.to_owned(),
                source: Box::new(err),
            })
            .inspect_err(|err| log_error(err, pod, downloader, tier))?;

        Ok(())
    }

    /// Reduces everything recorded so far into a report.
    pub fn report(&self) -> Result<Report> {
        reduce(&self.downloads.snapshot())
    }
}

fn log_error(err: &Error, pod: &str, downloader: Downloader, tier: SizeTier) {
    tracing::error!(
        error = err as &dyn std::error::Error,
        pod,
        %downloader,
        %tier,
        "failed to collect client metrics"
    );
}

/// Aggregates download records into min, max and average latency per downloader and tier.
///
/// Metric snapshots contribute every [`TASK_DURATION_METRIC`] histogram whose
/// [`TASK_SIZE_LEVEL_LABEL`] matches the tier of the record. Each such histogram must hold
/// exactly one sample, its sum is the download time in milliseconds. Timed records contribute
/// their wall-clock duration.
///
/// A tier with records but without any matching sample is an error, as no average can be
/// derived for it.
pub fn reduce(records: &[DownloadRecord]) -> Result<Report> {
    let mut groups: BTreeMap<Downloader, BTreeMap<SizeTier, Summary>> = BTreeMap::new();

    for record in records {
        let summary = groups
            .entry(record.downloader)
            .or_default()
            .entry(record.tier)
            .or_default();

        match &record.observation {
            Observation::Timing { elapsed, .. } => summary.add(*elapsed),
            Observation::Metrics(families) => {
                let histograms = families.histograms(
                    TASK_DURATION_METRIC,
                    TASK_SIZE_LEVEL_LABEL,
                    record.tier.task_size_level(),
                );
                for (_, histogram) in histograms {
                    summary.add(sample_cost(record, histogram)?);
                }
            }
        }
    }

    let mut report = Report::default();
    for (downloader, tiers) in groups {
        let mut rows = Vec::with_capacity(tiers.len());
        for (tier, summary) in tiers {
            let (Some(min), Some(max), Some(avg)) = (summary.min(), summary.max(), summary.avg())
            else {
                let err = Error::MissingSamples { downloader, tier };
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    %downloader,
                    %tier,
                    "no samples recorded"
                );
                return Err(err);
            };
            rows.push(Row {
                tier,
                times: summary.count(),
                min,
                max,
                avg,
            });
        }
        report.push(downloader, rows);
    }

    Ok(report)
}

/// Returns the download time recorded in a single-sample histogram.
fn sample_cost(record: &DownloadRecord, histogram: &Histogram) -> Result<Duration> {
    let err = if histogram.sample_count != 1 {
        Error::InvalidSampleCount {
            pod: record.pod.clone(),
            downloader: record.downloader,
            tier: record.tier,
            count: histogram.sample_count,
        }
    } else if !histogram.sample_sum.is_finite() || histogram.sample_sum < 0.0 {
        Error::InvalidSampleSum {
            pod: record.pod.clone(),
            downloader: record.downloader,
            tier: record.tier,
            sum: histogram.sample_sum,
        }
    } else {
        let nanos = (histogram.sample_sum * 1e6).round() as u64;
        return Ok(Duration::from_nanos(nanos));
    };

    tracing::error!(
        error = &err as &dyn std::error::Error,
        pod = %record.pod,
        downloader = %record.downloader,
        tier = %record.tier,
        "invalid download duration histogram"
    );
    Err(err)
}

#[cfg(test)]
mod tests {
    use dfbench_test::fixtures;

    use super::*;
    use crate::exec::mock::MockExecutor;

    fn metrics_record(pod: &str, tier: SizeTier, text: &str) -> DownloadRecord {
        DownloadRecord {
            pod: pod.to_owned(),
            downloader: Downloader::Dfget,
            tier,
            observation: Observation::Metrics(metrics::parse(text).unwrap()),
        }
    }

    fn timing_record(downloader: Downloader, tier: SizeTier, ms: u64) -> DownloadRecord {
        DownloadRecord {
            pod: "client-0".to_owned(),
            downloader,
            tier,
            observation: Observation::Timing {
                started_at: SystemTime::UNIX_EPOCH,
                elapsed: Duration::from_millis(ms),
            },
        }
    }

    #[test]
    fn reduces_min_max_avg() {
        let level = SizeTier::Small.task_size_level();
        let records: Vec<_> = [10.0, 30.0, 20.0]
            .into_iter()
            .enumerate()
            .map(|(i, ms)| {
                let text = fixtures::client_metrics(level, ms, 1);
                metrics_record(&format!("client-{i}"), SizeTier::Small, &text)
            })
            .collect();

        let report = reduce(&records).unwrap();
        let rows = report.rows(Downloader::Dfget).unwrap();
        assert_eq!(
            rows,
            [Row {
                tier: SizeTier::Small,
                times: 3,
                min: Duration::from_millis(10),
                max: Duration::from_millis(30),
                avg: Duration::from_millis(20),
            }]
        );
        assert!(report.rows(Downloader::Proxy).is_none());
    }

    #[test]
    fn fractional_milliseconds_are_kept() {
        let text = fixtures::client_metrics(SizeTier::Nano.task_size_level(), 0.25, 1);
        let report = reduce(&[metrics_record("client-0", SizeTier::Nano, &text)]).unwrap();
        let row = report.rows(Downloader::Dfget).unwrap()[0];
        assert_eq!(row.min, Duration::from_micros(250));
    }

    #[test]
    fn two_samples_in_one_snapshot_fail() {
        let text = fixtures::client_metrics(SizeTier::Small.task_size_level(), 40.0, 2);
        let err = reduce(&[metrics_record("client-0", SizeTier::Small, &text)]).unwrap_err();
        assert!(
            matches!(err, Error::InvalidSampleCount { count: 2, ref pod, .. } if pod == "client-0"),
            "{err:?}"
        );
    }

    #[test]
    fn negative_sum_fails() {
        let text = fixtures::client_metrics(SizeTier::Small.task_size_level(), -1.0, 1);
        let err = reduce(&[metrics_record("client-0", SizeTier::Small, &text)]).unwrap_err();
        assert!(matches!(err, Error::InvalidSampleSum { .. }), "{err:?}");
    }

    #[test]
    fn other_size_levels_are_ignored() {
        let small = SizeTier::Small.task_size_level();
        let large = SizeTier::Large.task_size_level();
        let text = fixtures::client_metrics_multi(&[(small, 12.0, 1), (large, 900.0, 3)]);
        let report = reduce(&[metrics_record("client-0", SizeTier::Small, &text)]).unwrap();
        let row = report.rows(Downloader::Dfget).unwrap()[0];
        assert_eq!(row.times, 1);
        assert_eq!(row.max, Duration::from_millis(12));
    }

    #[test]
    fn records_without_samples_fail() {
        let text = fixtures::empty_client_metrics();
        let err = reduce(&[metrics_record("client-0", SizeTier::Medium, &text)]).unwrap_err();
        assert!(
            matches!(
                err,
                Error::MissingSamples {
                    downloader: Downloader::Dfget,
                    tier: SizeTier::Medium
                }
            ),
            "{err:?}"
        );
    }

    #[test]
    fn timing_records_contribute_wall_clock() {
        let records = [
            timing_record(Downloader::Proxy, SizeTier::Large, 300),
            timing_record(Downloader::Proxy, SizeTier::Nano, 4),
            timing_record(Downloader::Proxy, SizeTier::Nano, 6),
        ];
        let report = reduce(&records).unwrap();
        let rows = report.rows(Downloader::Proxy).unwrap();
        let tiers: Vec<_> = rows.iter().map(|row| row.tier).collect();
        assert_eq!(tiers, [SizeTier::Nano, SizeTier::Large]);
        assert_eq!(rows[0].avg, Duration::from_millis(5));
    }

    #[test]
    fn timing_ignores_wall_clock_stamps() {
        // A start stamp later than now, as after the wall clock stepped backwards.
        let stats = Stats::new("dragonfly-system", Arc::new(MockExecutor::new(["client-0"])));
        let started_at = SystemTime::now() + Duration::from_secs(3600);
        stats.add_download(
            "client-0",
            Downloader::Dfget,
            SizeTier::Small,
            started_at,
            Duration::from_millis(42),
        );

        let report = stats.report().unwrap();
        assert_eq!(
            report.rows(Downloader::Dfget).unwrap()[0].avg,
            Duration::from_millis(42)
        );
    }

    #[test]
    fn empty_store_reduces_to_empty_report() {
        assert!(reduce(&[]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn collect_scrapes_then_resets() {
        let text = fixtures::client_metrics(SizeTier::Nano.task_size_level(), 3.0, 1);
        let executor = MockExecutor::new(["client-0"]).respond("curl -s http://", text);
        let stats = Stats::new("dragonfly-system", Arc::new(executor.clone()));

        stats
            .collect_client_metrics("client-0", Downloader::Dfget, SizeTier::Nano)
            .await
            .unwrap();

        let lines: Vec<_> = executor.calls().iter().map(|call| call.line()).collect();
        assert_eq!(
            lines,
            [
                format!("sh -c curl -s {METRICS_ENDPOINT}"),
                format!("sh -c curl -s -X DELETE {METRICS_ENDPOINT}"),
            ]
        );
        assert!(
            executor
                .calls()
                .iter()
                .all(|call| call.target.container.as_deref() == Some(CLIENT_CONTAINER))
        );
        assert_eq!(stats.downloads().len(), 1);
        let report = stats.report().unwrap();
        assert_eq!(report.rows(Downloader::Dfget).unwrap()[0].times, 1);
    }

    #[tokio::test]
    async fn failed_scrape_records_nothing() {
        let executor = MockExecutor::new(["client-0"]).fail("client-0", "curl -s http://");
        let stats = Stats::new("dragonfly-system", Arc::new(executor.clone()));

        let err = stats
            .collect_client_metrics("client-0", Downloader::Proxy, SizeTier::Nano)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Scrape { .. }), "{err:?}");
        assert!(stats.downloads().is_empty());
        assert_eq!(executor.calls().len(), 1);
    }

    #[tokio::test]
    async fn unparsable_scrape_is_a_metrics_error() {
        let executor = MockExecutor::new(["client-0"]).respond("curl -s http://", "{not metrics");
        let stats = Stats::new("dragonfly-system", Arc::new(executor));

        let err = stats
            .collect_client_metrics("client-0", Downloader::Dfget, SizeTier::Nano)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Metrics { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn failed_reset_keeps_snapshot() {
        let text = fixtures::client_metrics(SizeTier::Nano.task_size_level(), 3.0, 1);
        let executor = MockExecutor::new(["client-0"])
            .respond("curl -s http://", text)
            .fail("client-0", "-X DELETE");
        let stats = Stats::new("dragonfly-system", Arc::new(executor));

        let err = stats
            .collect_client_metrics("client-0", Downloader::Dfget, SizeTier::Nano)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResetMetrics { .. }), "{err:?}");
        assert_eq!(stats.downloads().len(), 1);
    }
}
