pub mod elb;
pub mod execute;
pub mod initialize;
pub mod launch;
pub mod network;
pub mod reboot;
pub mod resources;
pub mod s3_download;
pub mod shutdown;
