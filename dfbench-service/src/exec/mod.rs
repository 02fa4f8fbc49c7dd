//! Remote command execution inside Kubernetes pods.
//!
//! [`Executor`] is the seam between orchestration and the cluster. [`Kubectl`] implements it
//! by shelling out to `kubectl`, tests substitute a scripted double.

use std::fmt;
use std::path::PathBuf;
use std::process::{Output, Stdio};

use tokio::process::Command;
use tokio::time::Instant;

use crate::error::{Error, Result};

#[cfg(any(test, feature = "testing"))]
pub mod mock;

/// The environment variable `kubectl` reads its configuration path from.
const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// The target of a remote command: a pod and optionally one of its containers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PodExec {
    /// Namespace of the pod.
    pub namespace: String,
    /// Name of the pod.
    pub pod: String,
    /// Container to run in, or the pod's default container if `None`.
    pub container: Option<String>,
}

impl PodExec {
    /// Creates a target for the given pod.
    pub fn new(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: None,
        }
    }

    /// Runs commands in the named container instead of the default one.
    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    /// Returns the `kubectl` arguments that run `command` on this target.
    pub fn args(&self, command: &[String]) -> Vec<String> {
        let mut args = vec!["-n".to_owned(), self.namespace.clone(), "exec".to_owned()];
        if let Some(container) = &self.container {
            args.push("-c".to_owned());
            args.push(container.clone());
        }
        args.push(self.pod.clone());
        args.push("--".to_owned());
        args.extend(command.iter().cloned());
        args
    }
}

impl fmt::Display for PodExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod)?;
        if let Some(container) = &self.container {
            write!(f, ":{container}")?;
        }
        Ok(())
    }
}

/// Builds the argument vector that runs `command` through `sh -c`.
pub fn shell(command: impl Into<String>) -> Vec<String> {
    vec!["sh".to_owned(), "-c".to_owned(), command.into()]
}

/// Runs commands in pods and discovers pods by label.
#[async_trait::async_trait]
pub trait Executor: fmt::Debug + Send + Sync + 'static {
    /// Runs `command` on the target and returns its combined stdout and stderr.
    async fn exec(&self, target: &PodExec, command: &[String]) -> Result<Vec<u8>>;

    /// Returns the names of the pods in `namespace` matching `selector`.
    async fn get_pods(&self, namespace: &str, selector: &str) -> Result<Vec<String>>;
}

/// An [`Executor`] backed by the `kubectl` command line tool.
///
/// All commands share one deadline. A command still running when it elapses is killed and
/// reported as [`Error::DeadlineExceeded`].
#[derive(Clone, Debug)]
pub struct Kubectl {
    program: String,
    kubeconfig: Option<PathBuf>,
    deadline: Instant,
}

impl Kubectl {
    /// Creates an executor whose commands must finish before `deadline`.
    pub fn new(deadline: Instant) -> Self {
        Self {
            program: "kubectl".to_owned(),
            kubeconfig: None,
            deadline,
        }
    }

    /// Uses the given kubeconfig file instead of the ambient cluster credentials.
    pub fn kubeconfig(mut self, path: Option<PathBuf>) -> Self {
        self.kubeconfig = path;
        self
    }

    /// Overrides the binary that is invoked, `kubectl` by default.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn run(&self, target: &str, args: &[String]) -> Result<Output> {
        tracing::debug!(
            "kubectl command: \"{}\" \"{}\"",
            self.program,
            args.join("\" \"")
        );

        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(kubeconfig) = &self.kubeconfig {
            command.env(KUBECONFIG_ENV, kubeconfig);
        }

        let child = command.spawn()?;
        let output = tokio::time::timeout_at(self.deadline, child.wait_with_output())
            .await
            .map_err(|_| Error::DeadlineExceeded {
                target: target.to_owned(),
            })??;

        if !output.status.success() {
            return Err(Error::Exec {
                target: target.to_owned(),
                status: output.status,
                output: String::from_utf8_lossy(&combined(output)).into_owned(),
            });
        }

        Ok(output)
    }
}

fn combined(output: Output) -> Vec<u8> {
    let mut combined = output.stdout;
    combined.extend_from_slice(&output.stderr);
    combined
}

#[async_trait::async_trait]
impl Executor for Kubectl {
    async fn exec(&self, target: &PodExec, command: &[String]) -> Result<Vec<u8>> {
        let output = self.run(&target.to_string(), &target.args(command)).await?;
        Ok(combined(output))
    }

    async fn get_pods(&self, namespace: &str, selector: &str) -> Result<Vec<String>> {
        let args = [
            "get",
            "pods",
            "-n",
            namespace,
            "-l",
            selector,
            "-o",
            "jsonpath={.items[*].metadata.name}",
        ]
        .map(String::from);

        // Warnings on stderr must not end up in the pod names.
        let output = self.run(&format!("pods/{namespace}"), &args).await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .split_whitespace()
            .map(String::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn exec_args_without_container() {
        let target = PodExec::new("dragonfly-system", "client-0");
        assert_eq!(
            target.args(&shell("ls")),
            ["-n", "dragonfly-system", "exec", "client-0", "--", "sh", "-c", "ls"]
        );
    }

    #[test]
    fn exec_args_with_container() {
        let target = PodExec::new("dragonfly-system", "client-0").container("client");
        assert_eq!(
            target.args(&["true".to_owned()]),
            ["-n", "dragonfly-system", "exec", "-c", "client", "client-0", "--", "true"]
        );
        assert_eq!(target.to_string(), "dragonfly-system/client-0:client");
    }

    fn script(script: &str) -> Vec<String> {
        vec!["-c".to_owned(), script.to_owned()]
    }

    #[tokio::test]
    async fn nonzero_exit_carries_output() {
        let kubectl = Kubectl::new(Instant::now() + Duration::from_secs(10)).program("sh");
        let err = kubectl
            .run("local", &script("echo boom; exit 3"))
            .await
            .unwrap_err();

        let Error::Exec { status, output, .. } = err else {
            panic!("expected exec error, got {err:?}");
        };
        assert_eq!(status.code(), Some(3));
        assert_eq!(output, "boom\n");
    }

    #[tokio::test]
    async fn deadline_kills_command() {
        let kubectl = Kubectl::new(Instant::now() + Duration::from_millis(100)).program("sh");
        let err = kubectl.run("local", &script("sleep 10")).await.unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn combined_output() {
        let kubectl = Kubectl::new(Instant::now() + Duration::from_secs(10)).program("sh");
        let output = kubectl
            .run("local", &script("echo out; echo err >&2"))
            .await
            .unwrap();
        assert_eq!(combined(output), b"out\nerr\n");
    }
}
