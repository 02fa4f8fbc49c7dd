//! A scripted [`Executor`] for tests.
//!
//! [`MockExecutor`] never touches a cluster. It returns a fixed pod list, answers commands
//! from canned responses, and records every call so tests can assert on what was executed.
//! The executor is [`Clone`], so a test can keep a handle for inspection while the code under
//! test owns another.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{Executor, PodExec};
use crate::error::{Error, Result};

/// A command that was run through a [`MockExecutor`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecCall {
    /// Where the command ran.
    pub target: PodExec,
    /// The argument vector.
    pub command: Vec<String>,
}

impl ExecCall {
    /// Returns the command joined with spaces.
    pub fn line(&self) -> String {
        self.command.join(" ")
    }
}

#[derive(Debug, Default)]
struct Script {
    pods: Vec<String>,
    responses: Vec<(String, Vec<u8>)>,
    failures: Vec<(String, String)>,
    delays: Vec<(String, Duration)>,
    calls: Vec<ExecCall>,
    pod_queries: Vec<(String, String)>,
}

/// An executor that replays a script instead of running commands.
#[derive(Clone, Debug, Default)]
pub struct MockExecutor {
    script: Arc<Mutex<Script>>,
}

impl MockExecutor {
    /// Creates an executor that reports `pods` for every selector.
    pub fn new<I, S>(pods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let script = Script {
            pods: pods.into_iter().map(Into::into).collect(),
            ..Default::default()
        };
        Self {
            script: Arc::new(Mutex::new(script)),
        }
    }

    /// Answers commands containing `needle` with `output`. The first matching response wins.
    pub fn respond(self, needle: &str, output: impl Into<Vec<u8>>) -> Self {
        self.lock()
            .responses
            .push((needle.to_owned(), output.into()));
        self
    }

    /// Fails commands containing `needle` on `pod` with a non-zero exit status.
    pub fn fail(self, pod: &str, needle: &str) -> Self {
        self.lock()
            .failures
            .push((pod.to_owned(), needle.to_owned()));
        self
    }

    /// Delays every command on `pod` before it completes.
    pub fn delay(self, pod: &str, delay: Duration) -> Self {
        self.lock().delays.push((pod.to_owned(), delay));
        self
    }

    /// Returns all executed commands in the order they were issued.
    pub fn calls(&self) -> Vec<ExecCall> {
        self.lock().calls.clone()
    }

    /// Returns the executed commands containing `needle`.
    pub fn calls_matching(&self, needle: &str) -> Vec<ExecCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.line().contains(needle))
            .cloned()
            .collect()
    }

    /// Returns every `(namespace, selector)` pods were listed for.
    pub fn pod_queries(&self) -> Vec<(String, String)> {
        self.lock().pod_queries.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl Executor for MockExecutor {
    async fn exec(&self, target: &PodExec, command: &[String]) -> Result<Vec<u8>> {
        let call = ExecCall {
            target: target.clone(),
            command: command.to_vec(),
        };
        let line = call.line();

        let (delay, failed, output) = {
            let mut script = self.lock();
            script.calls.push(call);

            let delay = script
                .delays
                .iter()
                .find(|(pod, _)| *pod == target.pod)
                .map(|(_, delay)| *delay);
            let failed = script
                .failures
                .iter()
                .any(|(pod, needle)| *pod == target.pod && line.contains(needle.as_str()));
            let output = script
                .responses
                .iter()
                .find(|(needle, _)| line.contains(needle.as_str()))
                .map(|(_, output)| output.clone())
                .unwrap_or_default();
            (delay, failed, output)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if failed {
            return Err(Error::Exec {
                target: target.to_string(),
                status: ExitStatus::from_raw(1 << 8),
                output: format!("mock failure: {line}"),
            });
        }

        Ok(output)
    }

    async fn get_pods(&self, namespace: &str, selector: &str) -> Result<Vec<String>> {
        let mut script = self.lock();
        script
            .pod_queries
            .push((namespace.to_owned(), selector.to_owned()));
        Ok(script.pods.clone())
    }
}
