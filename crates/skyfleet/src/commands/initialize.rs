use colored::Colorize;
use skyfleet_ssh::{InitOptions, InstanceInitializer, SshOptions};

use crate::util;

pub async fn handle(
    instances: &[String],
    emulate: Option<String>,
    ssh: &SshOptions,
) -> anyhow::Result<()> {
    let config = skyfleet_config::load_config()?;
    let clients = skyfleet_cloud_aws::aws_clients().await;

    let addresses = util::resolve_addresses(&clients.ec2, instances).await?;
    let emulate_address = match emulate {
        Some(identifier) => Some(
            util::resolve_addresses(&clients.ec2, std::slice::from_ref(&identifier))
                .await?
                .remove(0),
        ),
        None => None,
    };

    let options = InitOptions {
        efs_volumes: config.default_efs_volumes,
        makefile_root_dirs: config.makefile_root_dirs,
        docker_compose_yaml_root_dirs: config.docker_compose_yaml_root_dirs,
    };
    let mut initializer = InstanceInitializer::new(options, ssh.clone());
    if let Some(address) = emulate_address {
        initializer = initializer.with_emulate(address);
    }

    initializer.initialize(&addresses).await?;
    println!(
        "{}",
        format!("{} 台のインスタンスを初期化しました", addresses.len()).green()
    );
    Ok(())
}
