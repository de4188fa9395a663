use std::path::Path;

use colored::Colorize;
use skyfleet_cloud_aws::{S3Downloader, S3Options};

pub async fn handle(
    bucket: &str,
    path: &str,
    dest: &Path,
    mirror_s3_path: bool,
    create_dest_dir: bool,
) -> anyhow::Result<()> {
    let clients = skyfleet_cloud_aws::aws_clients().await;

    let downloader = S3Downloader::new(
        clients.s3,
        bucket,
        dest,
        S3Options {
            mirror_s3_path,
            create_dest_dir,
        },
    )
    .await?;

    let downloaded = downloader.download_all(path).await?;
    println!(
        "{}",
        format!("{downloaded} 件のオブジェクトをダウンロードしました").green()
    );
    Ok(())
}
