use colored::Colorize;
use skyfleet_cloud::{Direction, Resolver, SecurityGroupManager, network};

use crate::NetworkCommands;

fn direction(outbound: bool) -> Direction {
    if outbound {
        Direction::Outbound
    } else {
        Direction::Inbound
    }
}

pub async fn handle(command: NetworkCommands) -> anyhow::Result<()> {
    let clients = skyfleet_cloud_aws::aws_clients().await;
    let api = &clients.ec2;

    match command {
        NetworkCommands::Add {
            security_group,
            protocol,
            from_port,
            to_port,
            instance,
            outbound,
        } => {
            let target = Resolver::new(api).instance(&instance).await?;
            let mut manager = SecurityGroupManager::new(api, security_group);
            manager
                .add_rule(direction(outbound), &protocol, from_port, to_port, &target)
                .await?;
            println!("{}", "ルールを追加しました".green());
        }
        NetworkCommands::Remove {
            security_group,
            protocol,
            from_port,
            to_port,
            cidr,
            outbound,
        } => {
            let mut manager = SecurityGroupManager::new(api, security_group);
            manager
                .remove_rule(direction(outbound), &protocol, from_port, to_port, &cidr)
                .await?;
            println!("{}", "ルールを削除しました".green());
        }
        NetworkCommands::Purge { instance } => {
            let target = Resolver::new(api).instance(&instance).await?;
            network::remove_instance_from_rules(api, &target).await?;
            println!(
                "{}",
                format!("{} を全ルールから除去しました", target.label()).green()
            );
        }
    }
    Ok(())
}
