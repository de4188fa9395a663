use anyhow::bail;
use colored::Colorize;
use skyfleet_cloud::{ImageSource, LaunchError, LaunchOptions, Launcher};

use crate::util;

pub struct LaunchArgs {
    pub names: Vec<String>,
    pub image: Option<String>,
    pub clone_instance: Option<String>,
    pub instance_type: Option<String>,
    pub key_pair: Option<String>,
    pub security_groups: Vec<String>,
    pub ebs_device: String,
    pub ebs_size: Option<i32>,
    pub shutdown_behavior: Option<String>,
    pub tags: Vec<String>,
}

pub async fn handle(args: LaunchArgs) -> anyhow::Result<()> {
    let config = skyfleet_config::load_config()?;

    let source = match (&args.image, &args.clone_instance) {
        (Some(image), None) => ImageSource::Image(image.clone()),
        (None, Some(instance)) => ImageSource::CloneOf(instance.clone()),
        _ => bail!("--image か --clone のどちらかを指定してください"),
    };

    let options = LaunchOptions {
        instance_type: args.instance_type,
        key_pair_name: args.key_pair,
        security_groups: args.security_groups,
        ebs_device_name: Some(args.ebs_device),
        ebs_volume_size: args.ebs_size,
        shutdown_behavior: args
            .shutdown_behavior
            .as_deref()
            .map(str::parse)
            .transpose()?,
        tags: util::parse_tags(&args.tags)?,
    };

    let clients = skyfleet_cloud_aws::aws_clients().await;
    let launcher = Launcher::new(&clients.ec2, source, options, config.iam_instance_profile)
        .with_per_instance_rules(config.per_instance_security_group_rules);

    match launcher.launch(&args.names).await {
        Ok(instances) => {
            println!("{}", "起動完了:".green().bold());
            for instance in &instances {
                println!(
                    "  {} ({}) - {}",
                    instance.label().cyan(),
                    instance.id,
                    instance.public_ip.as_deref().unwrap_or("?")
                );
            }
            Ok(())
        }
        Err(LaunchError::PostLaunch { source, instances }) => {
            eprintln!(
                "{}",
                "起動後処理に失敗しました。以下のインスタンスは作成済みです:"
                    .red()
                    .bold()
            );
            for instance in &instances {
                eprintln!("  {}", instance.id);
            }
            Err(source.into())
        }
        Err(e) => Err(e.into()),
    }
}
