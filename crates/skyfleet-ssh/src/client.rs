//! ssh/scp CLI wrapper
//!
//! Wraps the system `ssh` and `scp` binaries. ssh reserves exit status
//! 255 for its own failures, which is what lets the wrapper translate
//! transport problems into [`SshError::Transport`] while a non-zero
//! remote exit stays an ordinary command result.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::{Result, SshError};

/// Exit status ssh uses for its own (non-remote) failures.
const SSH_FAILURE_STATUS: i32 = 255;

/// Connection options shared by every target of an operation.
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Private key file; ssh falls back to its defaults when unset.
    pub key_path: Option<PathBuf>,
    pub user: String,
    pub connect_timeout: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            key_path: None,
            user: "ubuntu".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Captured output of one remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// A connection to one target address.
#[derive(Debug, Clone)]
pub struct SshClient {
    host: String,
    options: SshOptions,
}

impl SshClient {
    pub fn new(host: impl Into<String>, options: SshOptions) -> Self {
        Self {
            host: host.into(),
            options,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn common_args(&self, cmd: &mut Command) {
        cmd.arg("-o").arg("BatchMode=yes");
        cmd.arg("-o").arg("StrictHostKeyChecking=accept-new");
        cmd.arg("-o").arg(format!(
            "ConnectTimeout={}",
            self.options.connect_timeout.as_secs()
        ));
        if let Some(key) = &self.options.key_path {
            cmd.arg("-i").arg(key);
        }
    }

    /// Run one remote command and capture its output.
    ///
    /// Returns `Ok` for any command the remote actually ran, including
    /// non-zero exits; only a transport failure is an error.
    pub async fn run(&self, command: &str) -> Result<CommandOutput> {
        tracing::debug!("running '{command}' on {}", self.host);

        let mut cmd = Command::new("ssh");
        self.common_args(&mut cmd);
        cmd.arg(format!("{}@{}", self.options.user, self.host));
        cmd.arg(command);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let output = cmd.output().await.map_err(|e| SshError::Transport {
            host: self.host.clone(),
            message: e.to_string(),
        })?;

        let status = output.status.code().unwrap_or(SSH_FAILURE_STATUS);
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if status == SSH_FAILURE_STATUS {
            return Err(SshError::Transport {
                host: self.host.clone(),
                message: stderr.trim().to_string(),
            });
        }

        Ok(CommandOutput {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }

    /// Copy a local file to the target.
    pub async fn put(&self, local_path: &str, remote_path: &str) -> Result<()> {
        self.transfer(
            local_path,
            &format!("{}@{}:{}", self.options.user, self.host, remote_path),
        )
        .await
    }

    /// Copy a remote file from the target.
    pub async fn get(&self, remote_path: &str, local_path: &str) -> Result<()> {
        self.transfer(
            &format!("{}@{}:{}", self.options.user, self.host, remote_path),
            local_path,
        )
        .await
    }

    async fn transfer(&self, from: &str, to: &str) -> Result<()> {
        tracing::debug!("copying {from} -> {to}");

        let mut cmd = Command::new("scp");
        self.common_args(&mut cmd);
        cmd.arg(from);
        cmd.arg(to);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let output = cmd.output().await.map_err(|e| SshError::Transport {
            host: self.host.clone(),
            message: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(SshError::Transfer {
                host: self.host.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// One test drives all three outcomes through a stub `ssh` so the
    /// PATH override is never touched concurrently.
    #[tokio::test]
    async fn exit_status_classification() {
        let dir = tempfile::tempdir().unwrap();
        let stub = dir.path().join("ssh");
        std::fs::write(
            &stub,
            "#!/bin/sh\n\
             last=\"\"\n\
             for a in \"$@\"; do last=\"$a\"; done\n\
             case \"$last\" in\n\
               *transport*) echo \"connection refused\" >&2; exit 255 ;;\n\
               *fail*) echo \"oops\" >&2; exit 3 ;;\n\
               *) echo \"bin\"; exit 0 ;;\n\
             esac\n",
        )
        .unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

        let path = std::env::var("PATH").unwrap_or_default();
        // SAFETY: this is the only test in the binary touching PATH
        unsafe {
            std::env::set_var("PATH", format!("{}:{path}", dir.path().display()));
        }

        let client = SshClient::new("10.0.0.1", SshOptions::default());

        let output = client.run("ls /").await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "bin");

        let output = client.run("definitely-will-fail").await.unwrap();
        assert!(!output.success());
        assert_eq!(output.status, 3);
        assert_eq!(output.stderr.trim(), "oops");

        let err = client.run("simulate-transport-error").await.unwrap_err();
        match err {
            SshError::Transport { host, message } => {
                assert_eq!(host, "10.0.0.1");
                assert_eq!(message, "connection refused");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
