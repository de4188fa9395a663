//! Delayed auto-shutdown
//!
//! Queues a `sudo halt` on each target via `at`, installing `at` first
//! if the image does not ship it. Useful for throwaway worker fleets
//! that must not outlive their job.

use crate::client::SshOptions;
use crate::exec::{ExecError, RemoteExecutor};

pub struct AutoShutdownScheduler {
    ssh: SshOptions,
}

impl AutoShutdownScheduler {
    pub fn new(ssh: SshOptions) -> Self {
        Self { ssh }
    }

    /// Schedule a halt on every target in `minutes` minutes.
    pub async fn schedule(&self, addresses: &[String], minutes: u32) -> Result<(), ExecError> {
        tracing::info!("scheduling auto-shutdown in {minutes} minutes on {addresses:?}");
        let executor = RemoteExecutor::connect(addresses.iter().cloned(), &self.ssh);
        executor
            .execute(
                &["which at || sudo apt-get install -y at".to_string()],
                false,
            )
            .await?;
        executor
            .execute(
                &[format!("echo \"sudo halt\" | at now + {minutes} minutes")],
                false,
            )
            .await?;
        Ok(())
    }
}
