use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use dfbench_service::dragonfly::{BenchmarkOutcome, Dragonfly};
use dfbench_service::exec::{Executor, Kubectl};
use dfbench_service::nydus::Nydus;
use dfbench_service::scheduler::{Ghz, Scheduler};
use dfbench_service::stats::Stats;
use dfbench_types::SizeTier;
use tokio::time::Instant;
use tracing::level_filters::LevelFilter;
use yansi::Paint;

use crate::config::{Config, LogFormat};
use crate::observability;

/// Benchmarks for Dragonfly P2P downloads, Nydus lazy image loading and the scheduler API.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// path to the kubeconfig used by kubectl
    #[argh(option)]
    kubeconfig: Option<PathBuf>,

    /// deadline of the whole benchmark, e.g. "30m"
    #[argh(option, from_str_fn(parse_duration))]
    timeout: Option<Duration>,

    /// minimum log level: trace, debug, info, warn, error or off
    #[argh(option)]
    log_level: Option<LevelFilter>,

    /// log output format: auto, pretty, simplified or json
    #[argh(option)]
    log_format: Option<LogFormat>,

    #[argh(subcommand)]
    command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Dragonfly(DragonflyCommand),
    Nydus(NydusCommand),
    Scheduler(SchedulerCommand),
    Version(VersionCommand),
}

/// download files of every size tier on the Dragonfly client pods
#[derive(Debug, Default, FromArgs)]
#[argh(subcommand, name = "dragonfly")]
struct DragonflyCommand {
    /// number of times the benchmark is repeated
    #[argh(option, short = 'n')]
    number: Option<u32>,

    /// namespace of the client pods
    #[argh(option, short = 's')]
    namespace: Option<String>,

    /// downloader to use, dfget or proxy
    #[argh(option, short = 'd')]
    downloader: Option<String>,

    /// only download the file of this size tier, e.g. "small"
    #[argh(option)]
    file_size_level: Option<SizeTier>,
}

/// start containers through the Nydus snapshotter
#[derive(Debug, Default, FromArgs)]
#[argh(subcommand, name = "nydus")]
struct NydusCommand {
    /// number of times the benchmark is repeated
    #[argh(option, short = 'n')]
    number: Option<u32>,

    /// namespace of the snapshotter pods
    #[argh(option, short = 's')]
    namespace: Option<String>,

    /// image to start
    #[argh(option)]
    image: Option<String>,
}

/// load test the scheduler's gRPC API
#[derive(Debug, Default, FromArgs)]
#[argh(subcommand, name = "scheduler")]
struct SchedulerCommand {
    /// address of the scheduler
    #[argh(option)]
    host: Option<String>,

    /// compiled protobuf descriptors of the scheduler API
    #[argh(option)]
    protoset: Option<PathBuf>,

    /// number of simulated peers
    #[argh(option)]
    concurrency: Option<u32>,

    /// connect without TLS, true or false
    #[argh(option)]
    insecure: Option<bool>,
}

/// print the dfbench version
#[derive(Debug, Default, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|err| err.to_string())
}

impl Args {
    /// Applies the command line flags on top of the loaded configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(ref kubeconfig) = self.kubeconfig {
            config.kubeconfig = Some(kubeconfig.clone());
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }

        match &self.command {
            Command::Dragonfly(command) => {
                let dragonfly = &mut config.dragonfly;
                if let Some(number) = command.number {
                    dragonfly.number = number;
                }
                if let Some(ref namespace) = command.namespace {
                    dragonfly.namespace = namespace.clone();
                }
                if let Some(ref downloader) = command.downloader {
                    dragonfly.downloader = downloader.clone();
                }
                if command.file_size_level.is_some() {
                    dragonfly.file_size_level = command.file_size_level;
                }
            }
            Command::Nydus(command) => {
                let nydus = &mut config.nydus;
                if let Some(number) = command.number {
                    nydus.number = number;
                }
                if let Some(ref namespace) = command.namespace {
                    nydus.namespace = namespace.clone();
                }
                if let Some(ref image) = command.image {
                    nydus.image = image.clone();
                }
            }
            Command::Scheduler(command) => {
                let scheduler = &mut config.scheduler;
                if let Some(ref host) = command.host {
                    scheduler.host = host.clone();
                }
                if let Some(ref protoset) = command.protoset {
                    scheduler.protoset = protoset.clone();
                }
                if let Some(concurrency) = command.concurrency {
                    scheduler.concurrency = concurrency;
                }
                if let Some(insecure) = command.insecure {
                    scheduler.insecure = insecure;
                }
            }
            Command::Version(_) => {}
        }
    }
}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if let Command::Version(_) = args.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("main-rt")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    runtime.block_on(async move {
        let deadline = deadline(config.timeout)?;
        match args.command {
            Command::Dragonfly(_) => run_dragonfly(&config, deadline).await,
            Command::Nydus(_) => run_nydus(&config, deadline).await,
            Command::Scheduler(_) => run_scheduler(&config, deadline).await,
            Command::Version(_) => unreachable!(),
        }
    })
}

/// Returns the instant the whole benchmark must finish by.
fn deadline(timeout: Duration) -> Result<Instant> {
    Instant::now()
        .checked_add(timeout)
        .with_context(|| format!("timeout of {timeout:?} is out of range"))
}

fn kubectl(config: &Config, deadline: Instant) -> Arc<dyn Executor> {
    Arc::new(Kubectl::new(deadline).kubeconfig(config.kubeconfig.clone()))
}

async fn run_dragonfly(config: &Config, deadline: Instant) -> Result<()> {
    let settings = &config.dragonfly;
    let executor = kubectl(config, deadline);
    let stats = Stats::new(&settings.namespace, Arc::clone(&executor));
    let dragonfly =
        Dragonfly::new(&settings.namespace, executor, stats).measurement(settings.measurement);

    let target = match settings.file_size_level {
        Some(tier) => format!("{tier} files"),
        None => "all file sizes".to_owned(),
    };
    println!(
        "{}",
        format!("Running benchmark for {target} by {}", settings.downloader).bold()
    );

    let BenchmarkOutcome { run, cleanup } = dragonfly
        .benchmark(
            &settings.downloader,
            settings.file_size_level,
            settings.number,
        )
        .await;

    match run.and_then(|()| dragonfly.stats().report()) {
        Ok(report) => {
            report.print();
            cleanup.context("failed to clean up downloaded files")
        }
        Err(err) => {
            if let Err(ref cleanup) = cleanup {
                tracing::error!(
                    error = cleanup as &dyn std::error::Error,
                    "failed to clean up downloaded files"
                );
            }
            Err(err).context("dragonfly benchmark failed")
        }
    }
}

async fn run_nydus(config: &Config, deadline: Instant) -> Result<()> {
    let settings = &config.nydus;
    let nydus = Nydus::new(&settings.namespace, kubectl(config, deadline), &settings.image)
        .selector(&settings.selector)
        .container(settings.container.clone())
        .command(settings.command.clone());

    println!(
        "{}",
        format!("Running nydus benchmark for {}", settings.image).bold()
    );
    nydus
        .run(settings.number)
        .await
        .context("nydus benchmark failed")?;

    nydus.report().print();
    Ok(())
}

async fn run_scheduler(config: &Config, deadline: Instant) -> Result<()> {
    let settings = &config.scheduler;
    let ghz = Ghz::new(&settings.host, settings.protoset.clone(), deadline)
        .insecure(settings.insecure);
    let scheduler = Scheduler::new(Arc::new(ghz), settings.concurrency);

    println!(
        "{}",
        format!("Running scheduler benchmark against {}", settings.host).bold()
    );
    let reports = scheduler
        .run_all()
        .await
        .context("scheduler benchmark failed")?;

    for report in &reports {
        report.print();
    }
    Ok(())
}
