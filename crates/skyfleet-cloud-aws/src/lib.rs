//! AWS provider for Skyfleet
//!
//! Implements the `skyfleet-cloud` API traits over the AWS SDK (EC2 and
//! ELBv2) and carries the S3 mirror downloader. All SDK errors are
//! classified here, at the transport boundary: dispatch and timeout
//! failures become transient API errors, service errors do not, and the
//! provider's not-found/malformed-id responses on lookups become empty
//! result sets.

pub mod ec2;
pub mod elb;
pub mod s3;
mod sdk;

pub use ec2::AwsEc2;
pub use elb::AwsElb;
pub use s3::{S3Downloader, S3Options};

/// The client set used by the CLI.
pub struct AwsClients {
    pub ec2: AwsEc2,
    pub elb: AwsElb,
    pub s3: aws_sdk_s3::Client,
}

/// Load shared AWS configuration (region, credentials) and build the
/// service clients.
pub async fn aws_clients() -> AwsClients {
    let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    AwsClients {
        ec2: AwsEc2::new(&config),
        elb: AwsElb::new(&config),
        s3: aws_sdk_s3::Client::new(&config),
    }
}
