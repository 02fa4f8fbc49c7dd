//! Configuration for dfbench.
//!
//! Configuration is loaded once at startup and passed to every benchmark. Sources are merged
//! with the following precedence (highest to lowest):
//!
//! 1. Command line flags
//! 2. Environment variables (prefixed with `DFBENCH__`)
//! 3. YAML configuration file (specified via `-c` or `--config` flag)
//! 4. Defaults
//!
//! # Environment Variables
//!
//! Environment variables use `DFBENCH__` as a prefix and double underscores (`__`) to denote
//! nested configuration structures. For example:
//!
//! - `DFBENCH__TIMEOUT=1h` sets the benchmark timeout
//! - `DFBENCH__DRAGONFLY__NAMESPACE=dragonfly` sets the namespace of the client pods
//! - `DFBENCH__LOGGING__LEVEL=debug` sets the log level
//!
//! # YAML Configuration File
//!
//! The above configuration in YAML format would look like this:
//!
//! ```yaml
//! timeout: 1h
//!
//! dragonfly:
//!   namespace: dragonfly
//!
//! logging:
//!   level: debug
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use dfbench_service::dragonfly::Measurement;
use dfbench_service::nydus::SNAPSHOTTER_SELECTOR;
use dfbench_types::{Downloader, SizeTier};
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

const ENV_PREFIX: &str = "DFBENCH__";

/// Benchmarks must be allowed to run for longer than this.
const MIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound of the benchmark deadline.
const MAX_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Log output format.
///
/// Controls how log messages are formatted. The format can be explicitly specified or
/// auto-detected based on whether output is to a TTY.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// Error parsing a `--log-format` value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormatParseError(String);

impl fmt::Display for FormatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown log format {:?}, expected auto, pretty, simplified or json",
            self.0
        )
    }
}

impl std::error::Error for FormatParseError {}

impl LogFormat {
    /// Returns the lowercase name used in configuration files and flags.
    pub fn as_str(self) -> &'static str {
        match self {
            LogFormat::Auto => "auto",
            LogFormat::Pretty => "pretty",
            LogFormat::Simplified => "simplified",
            LogFormat::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            LogFormat::Auto,
            LogFormat::Pretty,
            LogFormat::Simplified,
            LogFormat::Json,
        ]
        .into_iter()
        .find(|format| s.eq_ignore_ascii_case(format.as_str()))
        .ok_or_else(|| FormatParseError(s.to_owned()))
    }
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr, so they never interleave with the report tables on
/// stdout.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// Valid levels in increasing severity: TRACE, DEBUG, INFO, WARN, ERROR, OFF. The
    /// `RUST_LOG` environment variable overrides this.
    ///
    /// # Default
    ///
    /// `INFO`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Default
    ///
    /// `Auto` (pretty for TTY, simplified otherwise)
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Download benchmark against the Dragonfly client pods.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Dragonfly {
    /// Namespace of the client pods and the file server.
    pub namespace: String,

    /// Number of times the benchmark is repeated.
    pub number: u32,

    /// How files are downloaded, `dfget` or `proxy`.
    ///
    /// Kept as text so that an unknown downloader is rejected before any pod is touched.
    pub downloader: String,

    /// The only size tier to download. All tiers are downloaded if unset.
    pub file_size_level: Option<SizeTier>,

    /// Where download durations are taken from.
    ///
    /// # Default
    ///
    /// `metrics`, the client's own download histogram
    pub measurement: Measurement,
}

impl Default for Dragonfly {
    fn default() -> Self {
        Self {
            namespace: "dragonfly-system".to_owned(),
            number: 1,
            downloader: Downloader::Dfget.as_str().to_owned(),
            file_size_level: None,
            measurement: Measurement::default(),
        }
    }
}

/// Container start benchmark against the Nydus snapshotter.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Nydus {
    /// Namespace of the snapshotter pods.
    pub namespace: String,

    /// Number of times the benchmark is repeated.
    pub number: u32,

    /// Label selector of the snapshotter pods.
    pub selector: String,

    /// Container to run `nerdctl` in, the pod's default container if unset.
    pub container: Option<String>,

    /// Image to start.
    pub image: String,

    /// Command the container runs, the image's entrypoint if empty.
    pub command: Vec<String>,
}

impl Default for Nydus {
    fn default() -> Self {
        Self {
            namespace: "nydus-snapshotter".to_owned(),
            number: 1,
            selector: SNAPSHOTTER_SELECTOR.to_owned(),
            container: None,
            image: "ghcr.io/dragonflyoss/image-service/python:3.9-nydus".to_owned(),
            command: vec!["python".to_owned(), "-c".to_owned(), "print('hello')".to_owned()],
        }
    }
}

/// Load test of the scheduler's gRPC API.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Scheduler {
    /// Address of the scheduler.
    pub host: String,

    /// Compiled protobuf descriptors of the scheduler API.
    pub protoset: PathBuf,

    /// Connects without TLS.
    pub insecure: bool,

    /// Number of simulated peers, and of requests in flight at once.
    pub concurrency: u32,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            host: "localhost:8002".to_owned(),
            protoset: PathBuf::from("../bundle.pb"),
            insecure: true,
            concurrency: 100,
        }
    }
}

/// Root configuration.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Path to the kubeconfig used by `kubectl`.
    ///
    /// # Default
    ///
    /// `None`, the ambient cluster credentials
    pub kubeconfig: Option<PathBuf>,

    /// Deadline of the whole benchmark, shared by every remote command.
    ///
    /// # Default
    ///
    /// `30m`
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Logging configuration.
    pub logging: Logging,

    /// Dragonfly download benchmark.
    pub dragonfly: Dragonfly,

    /// Nydus container start benchmark.
    pub nydus: Nydus,

    /// Scheduler load test.
    pub scheduler: Scheduler,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            timeout: Duration::from_secs(30 * 60),
            logging: Logging::default(),
            dragonfly: Dragonfly::default(),
            nydus: Nydus::default(),
            scheduler: Scheduler::default(),
        }
    }
}

impl Config {
    /// Loads configuration from defaults, the optional YAML file and the environment.
    ///
    /// Command line flags are applied on top by the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML file cannot be read or parsed, or if environment variables
    /// contain invalid values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// Rejects configurations no benchmark can run with.
    pub fn validate(&self) -> Result<()> {
        if self.timeout <= MIN_TIMEOUT {
            bail!("timeout must be greater than 1 minute");
        }
        if self.timeout > MAX_TIMEOUT {
            bail!("timeout must not exceed 7 days");
        }
        self.dragonfly
            .downloader
            .parse::<Downloader>()
            .context("invalid dragonfly downloader")?;
        Ok(())
    }
}
