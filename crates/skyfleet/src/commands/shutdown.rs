use colored::Colorize;
use skyfleet_cloud::lifecycle;
use skyfleet_ssh::{AutoShutdownScheduler, SshOptions};

use crate::util;

pub async fn handle(
    instances: &[String],
    terminate: bool,
    auto_shutdown_after: Option<u32>,
    ssh: &SshOptions,
) -> anyhow::Result<()> {
    let clients = skyfleet_cloud_aws::aws_clients().await;

    // 予約シャットダウンは即時停止の代わりに、各インスタンス上で
    // `at` に halt を積む
    if let Some(minutes) = auto_shutdown_after {
        let addresses = util::resolve_addresses(&clients.ec2, instances).await?;
        AutoShutdownScheduler::new(ssh.clone())
            .schedule(&addresses, minutes)
            .await?;
        println!(
            "{}",
            format!("{minutes} 分後の自動シャットダウンを予約しました").green()
        );
        return Ok(());
    }

    let stopped = lifecycle::shutdown(&clients.ec2, instances, terminate).await?;
    let action = if terminate { "terminate" } else { "停止" };
    println!("{}", format!("{action}完了:").green().bold());
    for instance in &stopped {
        println!("  {} ({})", instance.label().cyan(), instance.id);
    }
    Ok(())
}
