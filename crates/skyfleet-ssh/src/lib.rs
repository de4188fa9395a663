//! Skyfleet SSH layer
//!
//! Remote command execution against a set of instance addresses: the
//! `ssh`/`scp` transport wrapper, the multi-target command executor,
//! the instance initializer and the auto-shutdown scheduler.
//!
//! Commands run concurrently across targets and sequentially within a
//! target (later commands may depend on earlier ones, e.g.
//! unmount-then-remount). Transport failures are a distinct error kind
//! from remote command failures, so reachability polling only ever
//! retries what the transport layer reports as unreachable.

pub mod client;
pub mod error;
pub mod exec;
pub mod init;
pub mod schedule;

// Re-exports
pub use client::{CommandOutput, SshClient, SshOptions};
pub use error::{Result, SshError};
pub use exec::{CommandTransport, ExecError, ExecutionReport, RemoteExecutor};
pub use init::{InitOptions, InstanceInitializer};
pub use schedule::AutoShutdownScheduler;
