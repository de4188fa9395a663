use colored::Colorize;
use skyfleet_cloud::RetryPolicy;
use skyfleet_cloud::lifecycle;

pub async fn handle(instances: &[String]) -> anyhow::Result<()> {
    let clients = skyfleet_cloud_aws::aws_clients().await;

    let rebooted = lifecycle::reboot(&clients.ec2, instances, &RetryPolicy::default()).await?;
    println!("{}", "再起動完了:".green().bold());
    for instance in &rebooted {
        println!("  {} ({})", instance.label().cyan(), instance.id);
    }
    Ok(())
}
