//! S3 bucket mirroring
//!
//! Downloads a bucket (or a prefix of it) into a local directory,
//! optionally mirroring the `bucket/key` hierarchy. Filesystem work
//! runs through the blocking-call adapter so downloads never stall the
//! scheduler.

use std::path::{Path, PathBuf};

use aws_sdk_s3::Client;
use skyfleet_cloud::{CloudError, Result, run_blocking};

use crate::sdk::map_err;

/// Download options.
#[derive(Debug, Clone, Default)]
pub struct S3Options {
    /// Recreate the `bucket/key` hierarchy under the destination
    /// instead of stripping the prefix.
    pub mirror_s3_path: bool,
    /// Create the destination directory when it does not exist.
    pub create_dest_dir: bool,
}

/// Mirrors S3 objects to the local filesystem.
pub struct S3Downloader {
    client: Client,
    bucket: String,
    local_bucket_dir: PathBuf,
    mirror_s3_path: bool,
}

impl S3Downloader {
    pub async fn new(
        client: Client,
        bucket: impl Into<String>,
        dest_dir: &Path,
        options: S3Options,
    ) -> Result<Self> {
        let bucket = bucket.into();
        if !dest_dir.is_dir() && !options.create_dest_dir {
            return Err(CloudError::InvalidOption(format!(
                "destination dir {} does not exist",
                dest_dir.display()
            )));
        }

        let local_bucket_dir = if options.mirror_s3_path {
            dest_dir.join(&bucket)
        } else {
            dest_dir.to_path_buf()
        };
        let to_create = local_bucket_dir.clone();
        run_blocking(move || std::fs::create_dir_all(&to_create))
            .await
            .map_err(|e| CloudError::api(format!("creating {}: {e}", local_bucket_dir.display())))?;

        Ok(Self {
            client,
            bucket,
            local_bucket_dir,
            mirror_s3_path: options.mirror_s3_path,
        })
    }

    /// Download every object under `prefix`; returns how many objects
    /// were written.
    pub async fn download_all(&self, prefix: &str) -> Result<u32> {
        let prefix = prefix.trim_matches('/');
        let mut downloaded = 0;

        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .set_prefix((!prefix.is_empty()).then(|| prefix.to_string()))
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| map_err("list objects", e))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                if self.download_one(key, prefix).await? {
                    downloaded += 1;
                }
            }
        }

        tracing::info!("downloaded {downloaded} object(s) from {}", self.bucket);
        Ok(downloaded)
    }

    /// Download one object. Returns `false` (after logging) when the
    /// key does not exist, so bulk mirroring keeps going.
    pub async fn download_one(&self, key: &str, prefix: &str) -> Result<bool> {
        let key = key.trim_start_matches('/');
        let prefix = prefix.trim_matches('/');
        tracing::info!("downloading {} > {key}", self.bucket);

        let local_file = local_path(&self.local_bucket_dir, key, prefix, self.mirror_s3_path);
        if let Some(parent) = local_file.parent() {
            let parent = parent.to_path_buf();
            run_blocking(move || std::fs::create_dir_all(&parent))
                .await
                .map_err(|e| CloudError::api(format!("creating local dirs: {e}")))?;
        }

        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                tracing::error!("{} > {key} does not exist", self.bucket);
                return Ok(false);
            }
            Err(err) => return Err(map_err("get object", err)),
        };

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| CloudError::api(format!("reading {key}: {e}")))?
            .into_bytes();
        let report_path = local_file.clone();
        run_blocking(move || std::fs::write(&local_file, data))
            .await
            .map_err(|e| CloudError::api(format!("writing {}: {e}", report_path.display())))?;

        Ok(true)
    }
}

/// Map an object key to its local destination.
fn local_path(base: &Path, key: &str, prefix: &str, mirror_s3_path: bool) -> PathBuf {
    if mirror_s3_path {
        return base.join(key);
    }
    let relative = if !prefix.is_empty() {
        key.strip_prefix(&format!("{prefix}/")).unwrap_or(key)
    } else {
        key
    };
    base.join(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirrored_paths_keep_the_full_key() {
        let path = local_path(Path::new("/tmp/mirror/bucket"), "logs/2024/app.log", "logs", true);
        assert_eq!(path, Path::new("/tmp/mirror/bucket/logs/2024/app.log"));
    }

    #[test]
    fn unmirrored_paths_strip_the_prefix() {
        let path = local_path(Path::new("/tmp/dest"), "logs/2024/app.log", "logs", false);
        assert_eq!(path, Path::new("/tmp/dest/2024/app.log"));
    }

    #[test]
    fn empty_prefix_keeps_the_key_as_is() {
        let path = local_path(Path::new("/tmp/dest"), "2024/app.log", "", false);
        assert_eq!(path, Path::new("/tmp/dest/2024/app.log"));
    }
}
