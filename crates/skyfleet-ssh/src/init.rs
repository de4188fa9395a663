//! Instance initialization
//!
//! Brings a freshly launched (or rebooted) instance back into service:
//! mount the configured EFS volumes, restart docker, bounce every
//! discovered docker-compose stack and run `make production_bounce` in
//! every discovered Makefile directory.
//!
//! Discovery runs on each target, since targets are not assumed to be
//! clones of one source. With an `emulate` instance the discovery runs
//! once there and its results are reused for every target.

use futures_util::future::join_all;
use skyfleet_cloud::RetryPolicy;

use crate::client::SshOptions;
use crate::exec::{CommandTransport, ExecError, ExecutionReport, RemoteExecutor};
use crate::error::SshError;

const FIND_MAX_DEPTH: u32 = 2;

/// Initialization inputs, taken from the configuration.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// `(source, mount_point)` pairs to mount on every instance.
    pub efs_volumes: Vec<(String, String)>,
    pub makefile_root_dirs: Vec<String>,
    pub docker_compose_yaml_root_dirs: Vec<String>,
}

/// What discovery found on one instance.
#[derive(Debug, Clone, Default)]
struct Discovery {
    efs_volumes: Vec<(String, String)>,
    yaml_files: Vec<String>,
    makefiles: Vec<String>,
}

/// Initialization failures.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Initializes instances over SSH.
pub struct InstanceInitializer {
    options: InitOptions,
    ssh: SshOptions,
    emulate: Option<String>,
    policy: RetryPolicy,
}

impl InstanceInitializer {
    pub fn new(options: InitOptions, ssh: SshOptions) -> Self {
        Self {
            options,
            ssh,
            emulate: None,
            policy: RetryPolicy::default(),
        }
    }

    /// Run discovery once on this address and reuse the results for
    /// every target.
    pub fn with_emulate(mut self, address: impl Into<String>) -> Self {
        self.emulate = Some(address.into());
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Initialize every target address.
    pub async fn initialize(&self, addresses: &[String]) -> Result<(), InitError> {
        let seed = match &self.emulate {
            Some(address) => {
                let executor = self.executor(address);
                executor.wait_for_connectivity().await?;
                Some(self.discover(&executor, true).await?)
            }
            None => None,
        };

        join_all(
            addresses
                .iter()
                .map(|address| self.initialize_one(address, seed.as_ref())),
        )
        .await
        .into_iter()
        .collect()
    }

    async fn initialize_one(
        &self,
        address: &str,
        seed: Option<&Discovery>,
    ) -> Result<(), InitError> {
        let executor = self.executor(address);
        executor.wait_for_connectivity().await?;

        let discovery = match seed {
            Some(discovery) => discovery.clone(),
            None => self.discover(&executor, false).await?,
        };

        let mut commands = mount_commands(&discovery.efs_volumes);
        commands.push("sudo service docker restart".to_string());
        commands.extend(compose_commands(&discovery.yaml_files));
        commands.extend(make_commands(&discovery.makefiles));

        // Re-mounting an already-mounted volume must not abort the rest.
        executor.execute(&commands, true).await?;
        Ok(())
    }

    fn executor(&self, address: &str) -> RemoteExecutor<crate::client::SshClient> {
        RemoteExecutor::connect([address], &self.ssh).with_policy(self.policy.clone())
    }

    async fn discover<T: CommandTransport>(
        &self,
        executor: &RemoteExecutor<T>,
        include_efs: bool,
    ) -> Result<Discovery, ExecError> {
        let efs_volumes = if include_efs {
            tracing::info!("finding EFS volumes on {:?}", executor.addresses());
            let report = executor
                .execute(
                    &[
                        "mount |grep aws |sed -e 's/ on / /g'|sed -e 's/ type .*//g'"
                            .to_string(),
                    ],
                    true,
                )
                .await?;
            parse_mounts(&report)
        } else {
            self.options.efs_volumes.clone()
        };

        tracing::info!("finding compose files on {:?}", executor.addresses());
        let yaml_files = self
            .find_files(
                executor,
                &self.options.docker_compose_yaml_root_dirs,
                "'docker-compose*.yml'",
            )
            .await?;

        tracing::info!("finding Makefiles on {:?}", executor.addresses());
        let makefiles = self
            .find_files(executor, &self.options.makefile_root_dirs, "Makefile")
            .await?;

        Ok(Discovery {
            efs_volumes,
            yaml_files,
            makefiles,
        })
    }

    async fn find_files<T: CommandTransport>(
        &self,
        executor: &RemoteExecutor<T>,
        root_dirs: &[String],
        pattern: &str,
    ) -> Result<Vec<String>, ExecError> {
        let mut files = Vec::new();
        for root_dir in root_dirs {
            let command =
                format!("sudo find {root_dir} -maxdepth {FIND_MAX_DEPTH} -name {pattern}");
            let report = executor.execute(&[command], true).await?;
            files.extend(stdout_lines(&report));
        }
        Ok(files)
    }
}

fn stdout_lines(report: &ExecutionReport) -> Vec<String> {
    report
        .stdout
        .values()
        .flat_map(|entries| entries.iter())
        .flat_map(|(_, lines)| lines.iter())
        .map(|line| line.trim().to_string())
        .collect()
}

fn parse_mounts(report: &ExecutionReport) -> Vec<(String, String)> {
    stdout_lines(report)
        .iter()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            Some((parts.next()?.to_string(), parts.next()?.to_string()))
        })
        .collect()
}

fn mount_commands(volumes: &[(String, String)]) -> Vec<String> {
    volumes
        .iter()
        .map(|(source, dir)| {
            format!(
                "sudo mkdir -p {dir} && sudo mount -t nfs4 -o nfsvers=4.1,rsize=1048576,\
                 wsize=1048576,hard,timeo=600,retrans=2,noresvport {source} {dir}"
            )
        })
        .collect()
}

fn compose_commands(yaml_files: &[String]) -> Vec<String> {
    let mut commands = Vec::with_capacity(yaml_files.len() * 2);
    for yaml_file in yaml_files {
        commands.push(format!(
            "docker-compose -f {yaml_file} down --remove-orphans"
        ));
        commands.push(format!("docker-compose -f {yaml_file} up -d"));
    }
    commands
}

fn make_commands(makefiles: &[String]) -> Vec<String> {
    makefiles
        .iter()
        .filter_map(|makefile| {
            let dir = std::path::Path::new(makefile).parent()?;
            Some(format!("cd {} && make production_bounce", dir.display()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_commands_create_and_mount() {
        let commands = mount_commands(&[(
            "fs-1.efs.us-west-2.amazonaws.com:/".to_string(),
            "/data".to_string(),
        )]);
        assert_eq!(commands.len(), 1);
        assert!(commands[0].starts_with("sudo mkdir -p /data && sudo mount -t nfs4"));
        assert!(commands[0].ends_with("fs-1.efs.us-west-2.amazonaws.com:/ /data"));
    }

    #[test]
    fn compose_commands_bounce_each_stack_in_order() {
        let commands = compose_commands(&["/srv/app/docker-compose.yml".to_string()]);
        assert_eq!(
            commands,
            vec![
                "docker-compose -f /srv/app/docker-compose.yml down --remove-orphans",
                "docker-compose -f /srv/app/docker-compose.yml up -d",
            ]
        );
    }

    #[test]
    fn make_commands_run_in_the_makefile_directory() {
        let commands = make_commands(&["/srv/app/Makefile".to_string()]);
        assert_eq!(commands, vec!["cd /srv/app && make production_bounce"]);
    }

    #[test]
    fn parse_mounts_splits_source_and_mount_point() {
        let mut report = ExecutionReport::default();
        report.stdout.insert(
            "10.0.0.1".to_string(),
            vec![(
                "mount |grep aws".to_string(),
                vec![
                    "fs-1.efs.us-west-2.amazonaws.com:/ /data".to_string(),
                    "fs-2.efs.us-west-2.amazonaws.com:/ /logs".to_string(),
                ],
            )],
        );
        let mounts = parse_mounts(&report);
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].1, "/data");
    }
}
