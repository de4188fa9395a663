use colored::Colorize;
use skyfleet_cloud::Resolver;

pub async fn handle(json: bool) -> anyhow::Result<()> {
    let clients = skyfleet_cloud_aws::aws_clients().await;
    let resolver = Resolver::new(&clients.ec2);

    let instances = resolver.all_instances().await?;
    let images = resolver.own_images().await?;
    let groups = resolver.all_security_groups().await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "instances": instances,
                "images": images,
                "security_groups": groups,
            }))?
        );
        return Ok(());
    }

    println!("{}", format!("インスタンス ({})", instances.len()).bold());
    for instance in &instances {
        println!(
            "  {} ({}) {:?} {}",
            instance.label().cyan(),
            instance.id,
            instance.state,
            instance.public_ip.as_deref().unwrap_or("-")
        );
    }

    println!();
    println!("{}", format!("イメージ ({})", images.len()).bold());
    for image in &images {
        println!(
            "  {} ({}) {:?}",
            image.name.as_deref().unwrap_or("-").cyan(),
            image.id,
            image.state
        );
    }

    println!();
    println!("{}", format!("セキュリティグループ ({})", groups.len()).bold());
    for group in &groups {
        println!("  {} ({})", group.group_name.cyan(), group.id);
    }

    Ok(())
}
