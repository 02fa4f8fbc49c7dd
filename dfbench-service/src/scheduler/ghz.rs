//! [`RequestRunner`] backed by the `ghz` gRPC benchmarking tool.

use std::path::PathBuf;
use std::process::Stdio;

use serde_json::Value;
use tokio::process::Command;
use tokio::time::Instant;

use super::{RequestRunner, RunOptions, RunReport};
use crate::error::{Error, Result};

/// Runs load through the `ghz` command line tool.
///
/// Each run spawns one `ghz` process that reports in JSON on stdout. Like
/// [`Kubectl`](crate::exec::Kubectl), all runs share one deadline.
#[derive(Clone, Debug)]
pub struct Ghz {
    program: String,
    host: String,
    protoset: PathBuf,
    insecure: bool,
    deadline: Instant,
}

impl Ghz {
    /// Creates a runner against the scheduler at `host`, described by a compiled `protoset`.
    pub fn new(host: impl Into<String>, protoset: impl Into<PathBuf>, deadline: Instant) -> Self {
        Self {
            program: "ghz".to_owned(),
            host: host.into(),
            protoset: protoset.into(),
            insecure: true,
            deadline,
        }
    }

    /// Connects with or without TLS.
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Overrides the binary that is invoked, `ghz` by default.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Returns the arguments of one run.
    pub fn args(&self, method: &str, payload: &Value, options: RunOptions) -> Vec<String> {
        let mut args = vec![
            "--protoset".to_owned(),
            self.protoset.display().to_string(),
            "--call".to_owned(),
            method.to_owned(),
            "--data".to_owned(),
            payload.to_string(),
            "--concurrency".to_owned(),
            options.concurrency.to_string(),
            "--total".to_owned(),
            options.total.to_string(),
            "--format".to_owned(),
            "json".to_owned(),
        ];
        if self.insecure {
            args.push("--insecure".to_owned());
        }
        args.push(self.host.clone());
        args
    }
}

#[async_trait::async_trait]
impl RequestRunner for Ghz {
    async fn run(&self, method: &str, payload: &Value, options: RunOptions) -> Result<RunReport> {
        let args = self.args(method, payload, options);
        tracing::debug!(method, ?options, host = %self.host, "running ghz");

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout_at(self.deadline, child.wait_with_output())
            .await
            .map_err(|_| Error::DeadlineExceeded {
                target: self.program.clone(),
            })??;

        if !output.status.success() {
            return Err(Error::Exec {
                target: self.program.clone(),
                status: output.status,
                output: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|source| Error::RunReport {
            method: method.to_owned(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn ghz() -> Ghz {
        Ghz::new("localhost:8002", "../bundle.pb", Instant::now() + Duration::from_secs(10))
    }

    #[test]
    fn args_layout() {
        let options = RunOptions {
            concurrency: 4,
            total: 8,
        };
        let args = ghz().args("scheduler.Scheduler.StatTask", &json!([{"taskId": "t"}]), options);
        assert_eq!(
            args,
            [
                "--protoset",
                "../bundle.pb",
                "--call",
                "scheduler.Scheduler.StatTask",
                "--data",
                r#"[{"taskId":"t"}]"#,
                "--concurrency",
                "4",
                "--total",
                "8",
                "--format",
                "json",
                "--insecure",
                "localhost:8002",
            ]
        );

        let args = ghz().insecure(false).args("m", &json!({}), options);
        assert!(!args.iter().any(|arg| arg == "--insecure"));
    }

    /// Writes an executable that stands in for `ghz`.
    fn fake_ghz(script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = std::env::temp_dir().join(format!("fake-ghz-{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Runs the fake, retrying while a concurrently forked test process still holds it open.
    async fn run_fake(runner: &Ghz, method: &str) -> Result<RunReport> {
        const ETXTBSY: i32 = 26;
        for _ in 0..10 {
            match runner.run(method, &json!({}), RunOptions::default()).await {
                Err(Error::Io(err)) if err.raw_os_error() == Some(ETXTBSY) => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                result => return result,
            }
        }
        runner.run(method, &json!({}), RunOptions::default()).await
    }

    #[tokio::test]
    async fn reads_report_from_stdout() {
        let program = fake_ghz(
            r#"echo '{"count":2,"total":30000000,"average":15000000,"fastest":10000000,"slowest":20000000,"rps":66.6,"statusCodeDistribution":{"OK":2},"errorDistribution":null}'"#,
        );
        let runner = ghz().program(program.display().to_string());

        let report = run_fake(&runner, "m").await.unwrap();

        assert_eq!(report.count, 2);
        assert_eq!(report.average, Duration::from_millis(15));
        assert_eq!(report.status_code_distribution["OK"], 2);
        assert!(report.error_distribution.is_empty());
    }

    #[tokio::test]
    async fn failing_run_carries_stderr() {
        let program = fake_ghz("echo 'connection refused' >&2; exit 1");
        let runner = ghz().program(program.display().to_string());

        let err = run_fake(&runner, "m").await.unwrap_err();

        let Error::Exec { output, .. } = err else {
            panic!("expected exec error, got {err:?}");
        };
        assert_eq!(output, "connection refused\n");
    }

    #[tokio::test]
    async fn garbage_report_is_an_error() {
        let program = fake_ghz("echo 'not json'");
        let runner = ghz().program(program.display().to_string());

        let err = run_fake(&runner, "scheduler.Scheduler.StatTask")
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::RunReport { ref method, .. } if method.ends_with("StatTask")),
            "{err:?}"
        );
    }
}
