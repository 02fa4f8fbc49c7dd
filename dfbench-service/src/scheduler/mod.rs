//! Load tests of the scheduler's gRPC API.
//!
//! A [`Scenario`] simulates a group of peers that register for a task and then exercise one
//! scheduler method. Requests are sent by a [`RequestRunner`], the latencies it reports are
//! rendered per scenario.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use yansi::Paint;

use crate::error::{Error, Result};
use crate::report::Table;

mod ghz;
pub mod scenarios;

pub use self::ghz::Ghz;
pub use self::scenarios::Scenario;

use self::scenarios::{PEER_IP, REGISTER_METHOD, REPORT_PEER_METHOD, peer_id};

/// How many requests a run sends and how many of them are in flight at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunOptions {
    /// Number of concurrent workers.
    pub concurrency: u32,
    /// Total number of requests.
    pub total: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            total: 1,
        }
    }
}

/// Latency and outcome of one load run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Number of requests sent.
    #[serde(default)]
    pub count: u64,
    /// Duration of the whole run.
    #[serde(default, deserialize_with = "nanos")]
    pub total: Duration,
    /// Mean request latency.
    #[serde(default, deserialize_with = "nanos")]
    pub average: Duration,
    /// Lowest request latency.
    #[serde(default, deserialize_with = "nanos")]
    pub fastest: Duration,
    /// Highest request latency.
    #[serde(default, deserialize_with = "nanos")]
    pub slowest: Duration,
    /// Number of responses per gRPC status code.
    #[serde(default, deserialize_with = "nullable")]
    pub status_code_distribution: BTreeMap<String, u64>,
    /// Number of failed requests per error message.
    #[serde(default, deserialize_with = "nullable")]
    pub error_distribution: BTreeMap<String, u64>,
}

fn nanos<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_nanos)
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl RunReport {
    /// Combines the reports of independent runs into one.
    ///
    /// The average is weighted by the request count of each run. Returns `None` if there are no
    /// reports.
    pub fn merge(reports: impl IntoIterator<Item = RunReport>) -> Option<RunReport> {
        let mut reports = reports.into_iter();
        let mut merged = reports.next()?;
        let mut weighted = merged.average.as_nanos() * u128::from(merged.count);

        for report in reports {
            weighted += report.average.as_nanos() * u128::from(report.count);
            merged.count += report.count;
            merged.total += report.total;
            merged.fastest = merged.fastest.min(report.fastest);
            merged.slowest = merged.slowest.max(report.slowest);
            for (code, count) in report.status_code_distribution {
                *merged.status_code_distribution.entry(code).or_default() += count;
            }
            for (error, count) in report.error_distribution {
                *merged.error_distribution.entry(error).or_default() += count;
            }
        }

        if merged.count > 0 {
            let average = weighted / u128::from(merged.count);
            merged.average = Duration::from_nanos(u64::try_from(average).unwrap_or(u64::MAX));
        }
        Some(merged)
    }
}

/// Sends gRPC requests and measures their latency.
#[async_trait::async_trait]
pub trait RequestRunner: fmt::Debug + Send + Sync + 'static {
    /// Calls `method` with `payload` and reports on the responses.
    ///
    /// An array payload hands its elements to consecutive requests.
    async fn run(&self, method: &str, payload: &Value, options: RunOptions) -> Result<RunReport>;
}

/// The outcome of one scenario.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScenarioReport {
    /// The scenario that ran.
    pub scenario: Scenario,
    /// Latency of the measured method.
    pub report: RunReport,
    /// Runs that failed as a whole, counted per error message.
    pub runner_errors: BTreeMap<String, u64>,
}

impl ScenarioReport {
    /// Renders the report as a table.
    pub fn table(&self) -> Table {
        let name = self.scenario.name();
        let report = &self.report;

        let mut table = Table::new(["Scenario", "Name", "Description", "Value"]);
        let mut row = |section: &str, description: &str, value: String| {
            table.push_row([name, section, description, value.as_str()]);
        };

        row("Summary", "Count", format!("{} times", report.count));
        row("Summary", "Slowest", format!("{} ms", report.slowest.as_millis()));
        row("Summary", "Fastest", format!("{} ms", report.fastest.as_millis()));
        row("Summary", "Average", format!("{} ms", report.average.as_millis()));

        for (section, distribution) in [
            ("Status Code Distribution", &report.status_code_distribution),
            ("Error Distribution", &report.error_distribution),
            ("Runner Error Distribution", &self.runner_errors),
        ] {
            for (key, count) in distribution {
                row(section, key.as_str(), format!("{count} times"));
            }
        }

        table
    }

    /// Prints the table to stdout.
    pub fn print(&self) {
        println!();
        println!("{} {}", "## Scenario".bold(), self.scenario.name().bold().blue());
        print!("{}", self.table());
    }
}

/// Runs the scheduler scenarios with a fixed number of simulated peers.
#[derive(Clone, Debug)]
pub struct Scheduler {
    runner: Arc<dyn RequestRunner>,
    concurrency: u32,
}

impl Scheduler {
    /// Creates a load test that simulates `concurrency` peers per scenario.
    pub fn new(runner: Arc<dyn RequestRunner>, concurrency: u32) -> Self {
        Self {
            runner,
            concurrency,
        }
    }

    /// Runs every scenario in order, stopping at the first failure.
    pub async fn run_all(&self) -> Result<Vec<ScenarioReport>> {
        let mut reports = Vec::with_capacity(Scenario::ALL.len());
        for scenario in Scenario::ALL {
            let report = self.run(scenario).await.inspect_err(|err| {
                tracing::error!(
                    error = err as &dyn std::error::Error,
                    %scenario,
                    "failed to run scheduler scenario"
                )
            })?;
            reports.push(report);
        }
        Ok(reports)
    }

    /// Runs the setup requests of `scenario`, then measures its method.
    pub async fn run(&self, scenario: Scenario) -> Result<ScenarioReport> {
        let url = scenario.url();
        let peers: Vec<_> = (0..self.concurrency).map(|_| peer_id(PEER_IP)).collect();
        let all = RunOptions {
            concurrency: self.concurrency,
            total: self.concurrency,
        };

        tracing::info!(%scenario, peers = peers.len(), "running scheduler scenario");
        let measured = match scenario {
            Scenario::Register => scenarios::register(url, &peers),
            Scenario::ReportPiece => {
                self.setup(REGISTER_METHOD, scenarios::register(url, &peers), all)
                    .await?;
                return self.report_pieces(url, &peers).await;
            }
            Scenario::ReportPeer => {
                self.setup(REGISTER_METHOD, scenarios::register(url, &peers), all)
                    .await?;
                scenarios::report_peer(url, &peers)
            }
            Scenario::StatTask => {
                self.setup(REGISTER_METHOD, scenarios::register(url, &peers), all)
                    .await?;
                scenarios::stat_task(url, self.concurrency)
            }
            Scenario::AnnounceTask => scenarios::announce_task(url, &peers),
            Scenario::LeaveTask => {
                self.setup(REGISTER_METHOD, scenarios::register(url, &peers), all)
                    .await?;
                self.setup(REPORT_PEER_METHOD, scenarios::report_peer(url, &peers), all)
                    .await?;
                scenarios::leave_task(url, &peers)
            }
        };

        let report = self.runner.run(scenario.method(), &measured, all).await?;
        Ok(ScenarioReport {
            scenario,
            report,
            runner_errors: BTreeMap::new(),
        })
    }

    async fn setup(&self, method: &str, payload: Value, options: RunOptions) -> Result<()> {
        tracing::debug!(method, "running setup requests");
        self.runner.run(method, &payload, options).await?;
        Ok(())
    }

    /// Streams one piece result per peer, each in its own run, and merges the reports.
    ///
    /// Failed runs are counted rather than failing the scenario, unless every run failed.
    async fn report_pieces(&self, url: &str, peers: &[String]) -> Result<ScenarioReport> {
        let handles: Vec<_> = peers
            .iter()
            .map(|peer| {
                let runner = Arc::clone(&self.runner);
                let payload = scenarios::report_piece(url, peer);
                tokio::spawn(async move {
                    runner
                        .run(Scenario::ReportPiece.method(), &payload, RunOptions::default())
                        .await
                })
            })
            .collect();

        let mut reports = Vec::new();
        let mut runner_errors = BTreeMap::new();
        let mut first_error = None;
        for result in futures::future::join_all(handles).await {
            match result.map_err(Error::from).and_then(|result| result) {
                Ok(report) => reports.push(report),
                Err(err) => {
                    tracing::error!(
                        error = &err as &dyn std::error::Error,
                        "failed to report piece"
                    );
                    *runner_errors.entry(err.to_string()).or_default() += 1;
                    first_error.get_or_insert(err);
                }
            }
        }

        match (RunReport::merge(reports), first_error) {
            (Some(report), _) => Ok(ScenarioReport {
                scenario: Scenario::ReportPiece,
                report,
                runner_errors,
            }),
            (None, Some(err)) => Err(err),
            (None, None) => Ok(ScenarioReport {
                scenario: Scenario::ReportPiece,
                report: RunReport::default(),
                runner_errors,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    const GHZ_REPORT: &str = r#"{
        "name": "",
        "endReason": "normal",
        "date": "2024-05-01T10:00:00Z",
        "count": 100,
        "total": 2000000000,
        "average": 18500000,
        "fastest": 1200000,
        "slowest": 95000000,
        "rps": 50.0,
        "errorDistribution": {"rpc error: code = Unavailable": 3},
        "statusCodeDistribution": {"OK": 97, "Unavailable": 3},
        "latencyDistribution": [{"percentage": 50, "latency": 17000000}]
    }"#;

    #[derive(Debug, Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Value, RunOptions)>>,
        fail_every_other: bool,
    }

    impl Recorder {
        fn calls(&self) -> Vec<(String, Value, RunOptions)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl RequestRunner for Recorder {
        async fn run(
            &self,
            method: &str,
            payload: &Value,
            options: RunOptions,
        ) -> Result<RunReport> {
            let mut calls = self.calls.lock().unwrap();
            calls.push((method.to_owned(), payload.clone(), options));
            if self.fail_every_other && calls.len() % 2 == 0 {
                return Err(Error::UnknownTier("boom".into()));
            }
            Ok(RunReport {
                count: 1,
                average: Duration::from_millis(calls.len() as u64),
                fastest: Duration::from_millis(1),
                slowest: Duration::from_millis(calls.len() as u64),
                status_code_distribution: [("OK".to_owned(), 1)].into(),
                ..Default::default()
            })
        }
    }

    #[test]
    fn deserializes_ghz_report() {
        let report: RunReport = serde_json::from_str(GHZ_REPORT).unwrap();
        assert_eq!(report.count, 100);
        assert_eq!(report.total, Duration::from_secs(2));
        assert_eq!(report.average, Duration::from_micros(18500));
        assert_eq!(report.fastest, Duration::from_micros(1200));
        assert_eq!(report.slowest, Duration::from_millis(95));
        assert_eq!(report.status_code_distribution["Unavailable"], 3);
        assert_eq!(report.error_distribution.len(), 1);
    }

    #[test]
    fn merge_weights_average_by_count() {
        let a = RunReport {
            count: 3,
            average: Duration::from_millis(10),
            fastest: Duration::from_millis(5),
            slowest: Duration::from_millis(20),
            status_code_distribution: [("OK".to_owned(), 3)].into(),
            ..Default::default()
        };
        let b = RunReport {
            count: 1,
            average: Duration::from_millis(30),
            fastest: Duration::from_millis(30),
            slowest: Duration::from_millis(30),
            status_code_distribution: [("OK".to_owned(), 1)].into(),
            ..Default::default()
        };

        let merged = RunReport::merge([a, b]).unwrap();
        assert_eq!(merged.count, 4);
        assert_eq!(merged.average, Duration::from_millis(15));
        assert_eq!(merged.fastest, Duration::from_millis(5));
        assert_eq!(merged.slowest, Duration::from_millis(30));
        assert_eq!(merged.status_code_distribution["OK"], 4);
        assert!(RunReport::merge([]).is_none());
    }

    #[tokio::test]
    async fn leave_task_registers_and_reports_first() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = Scheduler::new(recorder.clone(), 3);

        let report = scheduler.run(Scenario::LeaveTask).await.unwrap();

        let calls = recorder.calls();
        let methods: Vec<_> = calls.iter().map(|(method, _, _)| method.as_str()).collect();
        assert_eq!(
            methods,
            [
                scenarios::REGISTER_METHOD,
                scenarios::REPORT_PEER_METHOD,
                scenarios::LEAVE_TASK_METHOD
            ]
        );
        assert!(calls.iter().all(|(_, payload, options)| {
            payload.as_array().map(Vec::len) == Some(3)
                && *options
                    == RunOptions {
                        concurrency: 3,
                        total: 3,
                    }
        }));
        // Every step addresses the same peers.
        assert_eq!(calls[0].1[2]["peerId"], calls[2].1[2]["peerId"]);
        assert_eq!(report.report.average, Duration::from_millis(3));
    }

    #[tokio::test]
    async fn report_piece_runs_once_per_peer() {
        let recorder = Arc::new(Recorder {
            fail_every_other: true,
            ..Default::default()
        });
        let scheduler = Scheduler::new(recorder.clone(), 4);

        let report = scheduler.run(Scenario::ReportPiece).await.unwrap();

        let calls = recorder.calls();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[0].0, scenarios::REGISTER_METHOD);
        for (method, payload, options) in &calls[1..] {
            assert_eq!(method, scenarios::REPORT_PIECE_METHOD);
            assert!(payload.is_object());
            assert_eq!(*options, RunOptions::default());
        }
        // Calls 2 and 4 fail.
        assert_eq!(report.report.count, 2);
        assert_eq!(report.runner_errors.values().sum::<u64>(), 2);
    }

    #[tokio::test]
    async fn run_all_in_order() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = Scheduler::new(recorder, 2);

        let reports = scheduler.run_all().await.unwrap();
        let scenarios: Vec<_> = reports.iter().map(|report| report.scenario).collect();
        assert_eq!(scenarios, Scenario::ALL);
    }

    #[test]
    fn table_lists_summary_and_distributions() {
        let report = ScenarioReport {
            scenario: Scenario::StatTask,
            report: serde_json::from_str(GHZ_REPORT).unwrap(),
            runner_errors: BTreeMap::new(),
        };
        let table = report.table();
        let rows = table.rows();
        assert_eq!(rows[0], ["StatTask", "Summary", "Count", "100 times"]);
        assert_eq!(rows[1], ["StatTask", "Summary", "Slowest", "95 ms"]);
        assert_eq!(rows[3], ["StatTask", "Summary", "Average", "18 ms"]);
        assert_eq!(
            rows[4],
            ["StatTask", "Status Code Distribution", "OK", "97 times"]
        );
        assert_eq!(rows.len(), 7);
    }
}
