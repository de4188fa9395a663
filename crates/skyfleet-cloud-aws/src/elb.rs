//! ELBv2 implementation of the load-balancer API

use async_trait::async_trait;
use aws_sdk_elasticloadbalancingv2::Client;
use aws_sdk_elasticloadbalancingv2::types::TargetDescription;
use skyfleet_cloud::{CloudError, ElbApi, LoadBalancer, Result, TargetGroup, TargetHealth};

use crate::sdk::{map_err, swallow_not_found};

/// ELBv2 client wrapper.
#[derive(Clone)]
pub struct AwsElb {
    client: Client,
}

impl AwsElb {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }
}

// `id` is a required member, so the builder is fallible.
fn target_description(id: &str) -> Result<TargetDescription> {
    TargetDescription::builder()
        .id(id)
        .build()
        .map_err(|e| CloudError::api(format!("building target description: {e}")))
}

fn balancer_from(
    balancer: &aws_sdk_elasticloadbalancingv2::types::LoadBalancer,
) -> Option<LoadBalancer> {
    Some(LoadBalancer {
        arn: balancer.load_balancer_arn()?.to_string(),
        name: balancer.load_balancer_name()?.to_string(),
    })
}

#[async_trait]
impl ElbApi for AwsElb {
    async fn load_balancers_named(&self, name: &str) -> Result<Vec<LoadBalancer>> {
        let result = self
            .client
            .describe_load_balancers()
            .names(name)
            .send()
            .await;
        Ok(swallow_not_found(result, "describe load balancers")?
            .map(|output| {
                output
                    .load_balancers()
                    .iter()
                    .filter_map(balancer_from)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn all_load_balancers(&self) -> Result<Vec<LoadBalancer>> {
        let output = self
            .client
            .describe_load_balancers()
            .send()
            .await
            .map_err(|e| map_err("describe load balancers", e))?;
        Ok(output
            .load_balancers()
            .iter()
            .filter_map(balancer_from)
            .collect())
    }

    async fn target_groups(&self, load_balancer_arn: &str) -> Result<Vec<TargetGroup>> {
        let output = self
            .client
            .describe_target_groups()
            .load_balancer_arn(load_balancer_arn)
            .send()
            .await
            .map_err(|e| map_err("describe target groups", e))?;
        Ok(output
            .target_groups()
            .iter()
            .filter_map(|group| {
                Some(TargetGroup {
                    arn: group.target_group_arn()?.to_string(),
                    name: group.target_group_name()?.to_string(),
                })
            })
            .collect())
    }

    async fn target_health(&self, target_group_arn: &str) -> Result<Vec<TargetHealth>> {
        let output = self
            .client
            .describe_target_health()
            .target_group_arn(target_group_arn)
            .send()
            .await
            .map_err(|e| map_err("describe target health", e))?;
        Ok(output
            .target_health_descriptions()
            .iter()
            .filter_map(|description| {
                Some(TargetHealth {
                    instance_id: description.target()?.id()?.to_string(),
                    state: description
                        .target_health()
                        .and_then(|h| h.state())
                        .map(|s| s.as_str().to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                })
            })
            .collect())
    }

    async fn register_targets(
        &self,
        target_group_arn: &str,
        instance_ids: &[String],
    ) -> Result<()> {
        let mut builder = self
            .client
            .register_targets()
            .target_group_arn(target_group_arn);
        for id in instance_ids {
            builder = builder.targets(target_description(id)?);
        }
        builder
            .send()
            .await
            .map_err(|e| map_err("register targets", e))?;
        Ok(())
    }

    async fn deregister_targets(
        &self,
        target_group_arn: &str,
        instance_ids: &[String],
    ) -> Result<()> {
        let mut builder = self
            .client
            .deregister_targets()
            .target_group_arn(target_group_arn);
        for id in instance_ids {
            builder = builder.targets(target_description(id)?);
        }
        builder
            .send()
            .await
            .map_err(|e| map_err("deregister targets", e))?;
        Ok(())
    }
}
