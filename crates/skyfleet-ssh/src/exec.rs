//! Multi-target remote command execution
//!
//! Runs a command sequence against every target concurrently, keeping
//! the sequence strictly ordered within each target. Output is captured
//! per stream, per target and per command; failure isolation is
//! per-target, so one broken instance never hides what the others did.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use skyfleet_cloud::{RetryError, RetryPolicy, run_with_retries};
use thiserror::Error;

use crate::client::{CommandOutput, SshClient, SshOptions};
use crate::error::SshError;

/// Command used to probe reachability; harmless and universally present.
const PROBE_COMMAND: &str = "ls /";

/// The transport seam: one target address that can run commands.
///
/// [`SshClient`] is the real implementation; tests use scripted fakes.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    fn address(&self) -> &str;

    /// Run one command. `Ok` covers every command the remote actually
    /// ran (including non-zero exits); `Err` is transport failure.
    async fn run(&self, command: &str) -> Result<CommandOutput, SshError>;
}

#[async_trait]
impl CommandTransport for SshClient {
    fn address(&self) -> &str {
        self.host()
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, SshError> {
        SshClient::run(self, command).await
    }
}

/// Captured output, keyed by stream then target address, each command's
/// non-empty lines in submission order. Commands that produced no
/// output do not appear.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    pub stdout: BTreeMap<String, Vec<(String, Vec<String>)>>,
    pub stderr: BTreeMap<String, Vec<(String, Vec<String>)>>,
}

impl ExecutionReport {
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

/// Remote execution failures.
#[derive(Error, Debug)]
pub enum ExecError {
    /// A command failed on one target. Carries everything captured so
    /// far, so the other targets' completed work is not lost.
    #[error("execution failed on {address}: {source}")]
    Failed {
        address: String,
        #[source]
        source: SshError,
        report: ExecutionReport,
    },
}

impl ExecError {
    pub fn report(&self) -> &ExecutionReport {
        match self {
            ExecError::Failed { report, .. } => report,
        }
    }
}

/// Runs command sequences across a set of targets.
pub struct RemoteExecutor<T: CommandTransport> {
    targets: Vec<T>,
    policy: RetryPolicy,
}

impl RemoteExecutor<SshClient> {
    /// Build an executor over ssh connections to the given addresses.
    pub fn connect<I, S>(addresses: I, options: &SshOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            addresses
                .into_iter()
                .map(|address| SshClient::new(address, options.clone()))
                .collect(),
        )
    }
}

impl<T: CommandTransport> RemoteExecutor<T> {
    pub fn new(targets: Vec<T>) -> Self {
        Self {
            targets,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn addresses(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.address()).collect()
    }

    /// Poll every target with a no-op command until it is reachable.
    ///
    /// Only transport failures retry; exhaustion surfaces as the
    /// dedicated [`SshError::FailedToReach`].
    pub async fn wait_for_connectivity(&self) -> Result<(), SshError> {
        tracing::info!("waiting for ssh connectivity to {:?}", self.addresses());
        let results = join_all(self.targets.iter().map(|target| async {
            run_with_retries(&self.policy, || async {
                target.run(PROBE_COMMAND).await.map(|_| ())
            })
            .await
            .map_err(|e| match e {
                RetryError::Exhausted { attempts, source } => SshError::FailedToReach {
                    host: target.address().to_string(),
                    attempts,
                    message: source.to_string(),
                },
                RetryError::Aborted(e) => e,
            })
        }))
        .await;

        results.into_iter().collect()
    }

    /// Run the command sequence on every target.
    ///
    /// With `ignore_errors`, a failed command keeps its partial output
    /// and the target continues with the remaining commands; without,
    /// the target's remaining commands are skipped and the first
    /// failure is reported alongside everything that was captured.
    pub async fn execute(
        &self,
        commands: &[String],
        ignore_errors: bool,
    ) -> Result<ExecutionReport, ExecError> {
        tracing::info!(
            "executing {} command(s) on {:?}",
            commands.len(),
            self.addresses()
        );

        let runs = join_all(
            self.targets
                .iter()
                .map(|target| run_on_target(target, commands, ignore_errors)),
        )
        .await;

        let mut report = ExecutionReport::default();
        let mut first_failure: Option<(String, SshError)> = None;
        for run in runs {
            if !run.stdout.is_empty() {
                report.stdout.insert(run.address.clone(), run.stdout);
            }
            if !run.stderr.is_empty() {
                report.stderr.insert(run.address.clone(), run.stderr);
            }
            if let Some(error) = run.error
                && first_failure.is_none()
            {
                first_failure = Some((run.address, error));
            }
        }

        match first_failure {
            Some((address, source)) if !ignore_errors => Err(ExecError::Failed {
                address,
                source,
                report,
            }),
            _ => Ok(report),
        }
    }
}

struct TargetRun {
    address: String,
    stdout: Vec<(String, Vec<String>)>,
    stderr: Vec<(String, Vec<String>)>,
    error: Option<SshError>,
}

async fn run_on_target<T: CommandTransport>(
    target: &T,
    commands: &[String],
    ignore_errors: bool,
) -> TargetRun {
    let address = target.address().to_string();
    let mut run = TargetRun {
        address: address.clone(),
        stdout: Vec::new(),
        stderr: Vec::new(),
        error: None,
    };

    for command in commands {
        tracing::info!("running '{command}' on {address}");
        match target.run(command).await {
            Ok(output) => {
                let stdout = non_empty_lines(&output.stdout);
                let stderr = non_empty_lines(&output.stderr);
                log_output(&address, command, &stdout, Stream::Stdout);
                log_output(&address, command, &stderr, Stream::Stderr);
                if !stdout.is_empty() {
                    run.stdout.push((command.clone(), stdout));
                }
                if !stderr.is_empty() {
                    run.stderr.push((command.clone(), stderr.clone()));
                }

                if !output.success() {
                    let failure = SshError::CommandFailed {
                        host: address.clone(),
                        command: command.clone(),
                        status: output.status,
                        stderr: stderr.join("\n"),
                    };
                    if ignore_errors {
                        tracing::warn!("ignoring failure: {failure}");
                        continue;
                    }
                    run.error = Some(failure);
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("'{command}' did not complete on {address}: {e}");
                if ignore_errors {
                    continue;
                }
                run.error = Some(e);
                break;
            }
        }
    }

    run
}

enum Stream {
    Stdout,
    Stderr,
}

fn log_output(address: &str, command: &str, lines: &[String], stream: Stream) {
    if lines.is_empty() {
        return;
    }
    match stream {
        Stream::Stdout => {
            tracing::debug!("stdout of '{command}' on {address}:");
            for line in lines {
                tracing::debug!("  [{address}]: {line}");
            }
        }
        Stream::Stderr => {
            tracing::warn!("stderr of '{command}' on {address}:");
            for line in lines {
                tracing::warn!("  [{address}]: {line}");
            }
        }
    }
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    enum Outcome {
        Output(CommandOutput),
        Transport,
    }

    /// Scripted transport: queued outcomes per command, success with no
    /// output once a queue runs dry.
    struct FakeTransport {
        address: String,
        outcomes: Mutex<HashMap<String, VecDeque<Outcome>>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn new(address: &str) -> Self {
            Self {
                address: address.to_string(),
                outcomes: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn push(&self, command: &str, outcome: Outcome) {
            self.outcomes
                .lock()
                .unwrap()
                .entry(command.to_string())
                .or_default()
                .push_back(outcome);
        }

        fn succeed(&self, command: &str, stdout: &str) {
            self.push(
                command,
                Outcome::Output(CommandOutput {
                    status: 0,
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                }),
            );
        }

        fn fail(&self, command: &str, status: i32, stderr: &str) {
            self.push(
                command,
                Outcome::Output(CommandOutput {
                    status,
                    stdout: String::new(),
                    stderr: stderr.to_string(),
                }),
            );
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandTransport for FakeTransport {
        fn address(&self) -> &str {
            &self.address
        }

        async fn run(&self, command: &str) -> Result<CommandOutput, SshError> {
            self.calls.lock().unwrap().push(command.to_string());
            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .get_mut(command)
                .and_then(VecDeque::pop_front);
            match outcome {
                Some(Outcome::Output(output)) => Ok(output),
                Some(Outcome::Transport) => Err(SshError::Transport {
                    host: self.address.clone(),
                    message: "connection refused".into(),
                }),
                None => Ok(CommandOutput {
                    status: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                }),
            }
        }
    }

    fn commands(commands: &[&str]) -> Vec<String> {
        commands.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn a_failed_command_stops_the_rest_of_that_target() {
        let target = FakeTransport::new("10.0.0.1");
        target.fail("cmd1", 2, "broken\n");
        target.succeed("cmd2", "never\n");

        let executor = RemoteExecutor::new(vec![target]);
        let err = executor
            .execute(&commands(&["cmd1", "cmd2"]), false)
            .await
            .unwrap_err();

        let ExecError::Failed {
            address,
            source,
            report,
        } = err;
        assert_eq!(address, "10.0.0.1");
        assert!(matches!(source, SshError::CommandFailed { .. }));
        // cmd1's stderr is captured; cmd2 never ran.
        assert_eq!(
            report.stderr["10.0.0.1"],
            vec![("cmd1".to_string(), vec!["broken".to_string()])]
        );
        assert!(report.stdout.is_empty());
        assert_eq!(executor.targets[0].calls(), vec!["cmd1".to_string()]);
    }

    #[tokio::test]
    async fn ignore_errors_keeps_going_and_keeps_partial_output() {
        let target = FakeTransport::new("10.0.0.1");
        target.fail("cmd1", 1, "already mounted\n");
        target.succeed("cmd2", "ok\n");

        let executor = RemoteExecutor::new(vec![target]);
        let report = executor
            .execute(&commands(&["cmd1", "cmd2"]), true)
            .await
            .unwrap();

        // Both commands ran, outputs keyed in submission order.
        let stdout = &report.stdout["10.0.0.1"];
        assert_eq!(stdout, &vec![("cmd2".to_string(), vec!["ok".to_string()])]);
        let stderr = &report.stderr["10.0.0.1"];
        assert_eq!(
            stderr,
            &vec![("cmd1".to_string(), vec!["already mounted".to_string()])]
        );
    }

    #[tokio::test]
    async fn failure_on_one_target_does_not_hide_the_others() {
        let broken = FakeTransport::new("10.0.0.1");
        broken.fail("cmd1", 2, "boom\n");
        let healthy = FakeTransport::new("10.0.0.2");
        healthy.succeed("cmd1", "fine\n");
        healthy.succeed("cmd2", "also fine\n");

        let executor = RemoteExecutor::new(vec![broken, healthy]);
        let err = executor
            .execute(&commands(&["cmd1", "cmd2"]), false)
            .await
            .unwrap_err();

        let report = err.report();
        // The healthy target's full output survives the failure.
        assert_eq!(
            report.stdout["10.0.0.2"],
            vec![
                ("cmd1".to_string(), vec!["fine".to_string()]),
                ("cmd2".to_string(), vec!["also fine".to_string()]),
            ]
        );
    }

    #[tokio::test]
    async fn commands_without_output_do_not_appear() {
        let target = FakeTransport::new("10.0.0.1");
        target.succeed("cmd1", "");
        target.succeed("cmd2", "data\n");

        let executor = RemoteExecutor::new(vec![target]);
        let report = executor
            .execute(&commands(&["cmd1", "cmd2"]), false)
            .await
            .unwrap();

        assert_eq!(report.stdout["10.0.0.1"].len(), 1);
        assert_eq!(report.stdout["10.0.0.1"][0].0, "cmd2");
    }

    #[tokio::test(start_paused = true)]
    async fn connectivity_polling_retries_transport_failures_only() {
        let target = FakeTransport::new("10.0.0.1");
        target.push("ls /", Outcome::Transport);
        target.push("ls /", Outcome::Transport);
        target.succeed("ls /", "bin\n");

        let executor = RemoteExecutor::new(vec![target])
            .with_policy(RetryPolicy::new(Duration::from_secs(1), 10));
        executor.wait_for_connectivity().await.unwrap();

        assert_eq!(executor.targets[0].calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn connectivity_polling_exhaustion_is_a_dedicated_error() {
        let target = FakeTransport::new("10.0.0.1");
        for _ in 0..5 {
            target.push("ls /", Outcome::Transport);
        }

        let executor = RemoteExecutor::new(vec![target])
            .with_policy(RetryPolicy::new(Duration::from_secs(1), 3));
        let err = executor.wait_for_connectivity().await.unwrap_err();

        match err {
            SshError::FailedToReach { host, attempts, .. } => {
                assert_eq!(host, "10.0.0.1");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
