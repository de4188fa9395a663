use colored::Colorize;
use skyfleet_ssh::{ExecutionReport, RemoteExecutor, SshOptions};

use crate::util;

pub async fn handle(
    instances: &[String],
    commands: &[String],
    ignore_errors: bool,
    json: bool,
    ssh: &SshOptions,
) -> anyhow::Result<()> {
    let clients = skyfleet_cloud_aws::aws_clients().await;
    let addresses = util::resolve_addresses(&clients.ec2, instances).await?;

    let executor = RemoteExecutor::connect(addresses, ssh);
    match executor.execute(commands, ignore_errors).await {
        Ok(report) => {
            print_report(&report, json)?;
            Ok(())
        }
        Err(e) => {
            // 失敗したターゲット以外の出力は届いているので先に表示する
            print_report(e.report(), json)?;
            Err(e.into())
        }
    }
}

fn print_report(report: &ExecutionReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    if report.is_empty() {
        println!("{}", "出力はありませんでした".dimmed());
        return Ok(());
    }

    for (title, outputs) in [("stdout", &report.stdout), ("stderr", &report.stderr)] {
        if outputs.is_empty() {
            continue;
        }
        println!("{}", title.bold());
        for (address, entries) in outputs {
            println!("  {}", address.cyan());
            for (command, lines) in entries {
                println!("    $ {}", command.dimmed());
                for line in lines {
                    println!("      {line}");
                }
            }
        }
    }
    Ok(())
}
