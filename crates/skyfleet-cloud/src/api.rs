//! Provider API traits
//!
//! The control-plane surface the core is written against. The AWS crate
//! implements these traits over the AWS SDK; tests implement them with
//! in-memory fakes. Every call is idempotent-safe to retry except
//! [`Ec2Api::run_instances`] and [`Ec2Api::create_image`], which create
//! resources.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Image, Instance, SecurityGroup, ShutdownBehavior, Tag};
use crate::network::{Direction, RuleSpec};

/// An EBS volume requested at launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub device_name: String,
    pub size_gb: i32,
}

/// Everything needed to create a batch of instances.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub image_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub security_group_ids: Vec<String>,
    pub volumes: Vec<VolumeSpec>,
    pub count: usize,
    pub shutdown_behavior: ShutdownBehavior,
}

/// Compute control-plane operations.
///
/// Lookup calls return an empty list (not an error) when the identifier
/// is unknown or malformed; implementations translate the provider's
/// not-found errors accordingly.
#[async_trait]
pub trait Ec2Api: Send + Sync {
    async fn instances_by_id(&self, id: &str) -> Result<Vec<Instance>>;

    /// Instances whose `Name` tag matches any of `names`.
    async fn instances_named(&self, names: &[String]) -> Result<Vec<Instance>>;

    async fn all_instances(&self) -> Result<Vec<Instance>>;

    async fn images_by_id(&self, id: &str) -> Result<Vec<Image>>;

    async fn images_named(&self, name: &str) -> Result<Vec<Image>>;

    /// Images owned by the calling account.
    async fn own_images(&self) -> Result<Vec<Image>>;

    async fn security_groups_by_id(&self, id: &str) -> Result<Vec<SecurityGroup>>;

    async fn security_groups_named(&self, name: &str) -> Result<Vec<SecurityGroup>>;

    async fn all_security_groups(&self) -> Result<Vec<SecurityGroup>>;

    async fn volume_size_gb(&self, volume_id: &str) -> Result<i32>;

    async fn run_instances(&self, request: &LaunchRequest) -> Result<Vec<Instance>>;

    async fn create_tags(&self, resource_id: &str, tags: &[Tag]) -> Result<()>;

    /// Create an image from an instance; returns the new image id.
    async fn create_image(
        &self,
        instance_id: &str,
        name: &str,
        description: &str,
    ) -> Result<String>;

    async fn deregister_image(&self, image_id: &str) -> Result<()>;

    async fn stop_instances(&self, ids: &[String]) -> Result<()>;

    async fn terminate_instances(&self, ids: &[String]) -> Result<()>;

    async fn reboot_instances(&self, ids: &[String]) -> Result<()>;

    async fn associate_instance_profile(
        &self,
        instance_id: &str,
        profile_name: &str,
    ) -> Result<()>;

    async fn authorize_rule(
        &self,
        group_id: &str,
        direction: Direction,
        rule: &RuleSpec,
    ) -> Result<()>;

    async fn revoke_rule(
        &self,
        group_id: &str,
        direction: Direction,
        rule: &RuleSpec,
    ) -> Result<()>;
}

/// A load balancer, the unit of pool membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancer {
    pub arn: String,
    pub name: String,
}

/// A target group under a load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetGroup {
    pub arn: String,
    pub name: String,
}

/// Health of one registered target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetHealth {
    pub instance_id: String,
    pub state: String,
}

/// Load-balancer control-plane operations.
#[async_trait]
pub trait ElbApi: Send + Sync {
    /// Load balancers with the given name; empty when none match.
    async fn load_balancers_named(&self, name: &str) -> Result<Vec<LoadBalancer>>;

    async fn all_load_balancers(&self) -> Result<Vec<LoadBalancer>>;

    async fn target_groups(&self, load_balancer_arn: &str) -> Result<Vec<TargetGroup>>;

    async fn target_health(&self, target_group_arn: &str) -> Result<Vec<TargetHealth>>;

    async fn register_targets(
        &self,
        target_group_arn: &str,
        instance_ids: &[String],
    ) -> Result<()>;

    async fn deregister_targets(
        &self,
        target_group_arn: &str,
        instance_ids: &[String],
    ) -> Result<()>;
}
