//! Container start benchmark against the Nydus snapshotter.
//!
//! Every snapshotter pod starts the same image through `nerdctl` at once. The wall-clock time of
//! each start, including pulling the lazily loaded image, is recorded as a [`ContainerRun`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::time::Instant;
use yansi::Paint;

use crate::error::Result;
use crate::exec::{Executor, PodExec};
use crate::fanout::fan_out;
use crate::pods::pods;
use crate::record::{ContainerRun, RecordStore};
use crate::report::{Summary, Table, format_duration};

/// Label selector of the Nydus snapshotter pods.
pub const SNAPSHOTTER_SELECTOR: &str = "app=nydus-snapshotter";

/// Runs container start benchmarks on the snapshotter pods of one namespace.
#[derive(Clone, Debug)]
pub struct Nydus {
    namespace: String,
    executor: Arc<dyn Executor>,
    selector: String,
    container: Option<String>,
    image: String,
    command: Vec<String>,
    runs: RecordStore<ContainerRun>,
}

impl Nydus {
    /// Creates a benchmark that starts `image` on the snapshotter pods in `namespace`.
    pub fn new(
        namespace: impl Into<String>,
        executor: Arc<dyn Executor>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            executor,
            selector: SNAPSHOTTER_SELECTOR.to_owned(),
            container: None,
            image: image.into(),
            command: Vec::new(),
            runs: RecordStore::new(),
        }
    }

    /// Selects the pods to run on by a different label selector.
    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = selector.into();
        self
    }

    /// Runs `nerdctl` in the named container of each pod.
    pub fn container(mut self, container: Option<String>) -> Self {
        self.container = container;
        self
    }

    /// Sets the command the container runs, the image's entrypoint if empty.
    pub fn command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    /// Returns all recorded container starts.
    pub fn runs(&self) -> &RecordStore<ContainerRun> {
        &self.runs
    }

    /// Starts the container on every pod `number` times, stopping at the first failed round.
    pub async fn run(&self, number: u32) -> Result<()> {
        for round in 1..=number {
            tracing::debug!(round, number, image = %self.image, "running nydus benchmark");
            self.start().await?;
        }
        Ok(())
    }

    /// Starts the container once on every pod concurrently.
    pub async fn start(&self) -> Result<()> {
        let pods = pods(&*self.executor, &self.namespace, &self.selector).await?;

        tracing::info!(image = %self.image, pods = pods.len(), "starting containers");
        fan_out("start container", &pods, |pod| {
            let this = self.clone();
            async move { this.start_on(&pod).await }
        })
        .await
    }

    async fn start_on(&self, pod: &str) -> Result<()> {
        let mut target = PodExec::new(&self.namespace, pod);
        target.container = self.container.clone();

        let command = self.nerdctl();
        let started_at = SystemTime::now();
        let start = Instant::now();
        let output = self.executor.exec(&target, &command).await?;
        let elapsed = start.elapsed();
        tracing::debug!(
            pod,
            image = %self.image,
            output = %String::from_utf8_lossy(&output),
            "container exited"
        );

        self.runs.insert(ContainerRun {
            pod: pod.to_owned(),
            image: self.image.clone(),
            started_at,
            elapsed,
        });
        Ok(())
    }

    fn nerdctl(&self) -> Vec<String> {
        let mut command: Vec<String> = ["nerdctl", "--snapshotter", "nydus", "run", "--rm"]
            .map(String::from)
            .into();
        command.push(self.image.clone());
        command.extend(self.command.iter().cloned());
        command
    }

    /// Summarizes the recorded starts per image.
    pub fn report(&self) -> NydusReport {
        summarize(&self.runs.snapshot())
    }
}

/// Start latency of one image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NydusRow {
    /// The image that was started.
    pub image: String,
    /// Number of starts.
    pub times: u64,
    /// Fastest start.
    pub min: Duration,
    /// Slowest start.
    pub max: Duration,
    /// Mean start time.
    pub avg: Duration,
}

/// Start latency per image.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NydusReport {
    rows: Vec<NydusRow>,
}

impl NydusReport {
    /// Returns the rows ordered by image.
    pub fn rows(&self) -> &[NydusRow] {
        &self.rows
    }

    /// Renders the report as a table.
    pub fn table(&self) -> Table {
        let mut table = Table::new(["Image", "Times", "Min", "Max", "Avg"]);
        for row in &self.rows {
            table.push_row([
                row.image.clone(),
                row.times.to_string(),
                format_duration(row.min),
                format_duration(row.max),
                format_duration(row.avg),
            ]);
        }
        table
    }

    /// Prints the table to stdout.
    pub fn print(&self) {
        println!();
        println!("{}", "## Nydus".bold());
        print!("{}", self.table());
    }
}

/// Aggregates container starts into min, max and average per image.
pub fn summarize(runs: &[ContainerRun]) -> NydusReport {
    let mut summaries: BTreeMap<&str, Summary> = BTreeMap::new();
    for run in runs {
        summaries.entry(&run.image).or_default().add(run.elapsed);
    }

    let rows = summaries
        .into_iter()
        .filter_map(|(image, summary)| {
            Some(NydusRow {
                image: image.to_owned(),
                times: summary.count(),
                min: summary.min()?,
                max: summary.max()?,
                avg: summary.avg()?,
            })
        })
        .collect();

    NydusReport { rows }
}
