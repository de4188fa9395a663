use colored::Colorize;
use skyfleet_cloud::elb::ElbPool;
use skyfleet_cloud_aws::{AwsEc2, AwsElb};

use crate::ElbCommands;

pub async fn handle(command: ElbCommands) -> anyhow::Result<()> {
    let clients = skyfleet_cloud_aws::aws_clients().await;

    match command {
        ElbCommands::List { pool } => match pool {
            Some(name) => {
                let pool = ElbPool::from_name(&clients.elb, &clients.ec2, &name).await?;
                print_pool(&pool);
            }
            None => {
                for pool in ElbPool::all(&clients.elb, &clients.ec2).await? {
                    print_pool(&pool);
                    println!();
                }
            }
        },
        ElbCommands::Add { pool, instances } => {
            let mut pool = ElbPool::from_name(&clients.elb, &clients.ec2, &pool).await?;
            pool.add(&instances).await?;
            println!("{}", "プールに追加しました".green());
            print_pool(&pool);
        }
        ElbCommands::Remove { pool, instances } => {
            let mut pool = ElbPool::from_name(&clients.elb, &clients.ec2, &pool).await?;
            pool.remove(&instances).await?;
            println!("{}", "プールから除去しました".green());
            print_pool(&pool);
        }
    }
    Ok(())
}

fn print_pool(pool: &ElbPool<'_, AwsElb, AwsEc2>) {
    println!("{}", pool.label().bold());
    for status in pool.target_groups() {
        println!("  {}", status.group.name.cyan());
        if status.members.is_empty() {
            println!("    {}", "（ターゲットなし）".dimmed());
        }
        for member in &status.members {
            println!(
                "    {} ({}) {}",
                member.instance.label(),
                member.instance.id,
                member.health
            );
        }
    }
}
