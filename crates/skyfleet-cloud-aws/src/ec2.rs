//! EC2 implementation of the compute API

use async_trait::async_trait;
use aws_sdk_ec2::Client;
use aws_sdk_ec2::types::{
    BlockDeviceMapping, EbsBlockDevice, Filter, IamInstanceProfileSpecification, InstanceType,
    IpPermission, IpRange,
};
use skyfleet_cloud::{
    BlockDevice, CloudError, Direction, Ec2Api, Image, ImageState, Instance, InstanceState,
    LaunchRequest, Result, RuleSpec, SecurityGroup, ShutdownBehavior, Tag,
};

use crate::sdk::{map_err, swallow_not_found};

/// EC2 client wrapper.
#[derive(Clone)]
pub struct AwsEc2 {
    client: Client,
}

impl AwsEc2 {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }

    async fn describe_instances(&self, filters: Option<Vec<Filter>>) -> Result<Vec<Instance>> {
        let output = self
            .client
            .describe_instances()
            .set_filters(filters)
            .send()
            .await
            .map_err(|e| map_err("describe instances", e))?;
        Ok(instances_from(&output))
    }
}

fn instances_from(output: &aws_sdk_ec2::operation::describe_instances::DescribeInstancesOutput) -> Vec<Instance> {
    output
        .reservations()
        .iter()
        .flat_map(|r| r.instances())
        .map(instance_from)
        .collect()
}

fn instance_from(instance: &aws_sdk_ec2::types::Instance) -> Instance {
    Instance {
        id: instance.instance_id().unwrap_or_default().to_string(),
        state: instance
            .state()
            .and_then(|s| s.name())
            .map(|name| name.as_str().parse().unwrap_or(InstanceState::Unknown))
            .unwrap_or(InstanceState::Unknown),
        public_ip: instance.public_ip_address().map(str::to_string),
        instance_type: instance.instance_type().map(|t| t.as_str().to_string()),
        key_name: instance.key_name().map(str::to_string),
        security_group_ids: instance
            .security_groups()
            .iter()
            .filter_map(|g| g.group_id())
            .map(str::to_string)
            .collect(),
        block_devices: instance
            .block_device_mappings()
            .iter()
            .filter_map(|m| {
                Some(BlockDevice {
                    device_name: m.device_name()?.to_string(),
                    volume_id: m.ebs()?.volume_id()?.to_string(),
                })
            })
            .collect(),
        tags: tags_from(instance.tags()),
    }
}

fn tags_from(tags: &[aws_sdk_ec2::types::Tag]) -> Vec<Tag> {
    tags.iter()
        .filter_map(|t| Some(Tag::new(t.key()?, t.value()?)))
        .collect()
}

fn image_from(image: &aws_sdk_ec2::types::Image) -> Image {
    Image {
        id: image.image_id().unwrap_or_default().to_string(),
        name: image.name().map(str::to_string),
        state: image
            .state()
            .map(|s| s.as_str().parse().unwrap_or(ImageState::Unknown))
            .unwrap_or(ImageState::Unknown),
    }
}

fn permissions_from(permissions: &[IpPermission]) -> Vec<skyfleet_cloud::Permission> {
    permissions
        .iter()
        .map(|p| skyfleet_cloud::Permission {
            protocol: p.ip_protocol().unwrap_or_default().to_string(),
            from_port: p.from_port(),
            to_port: p.to_port(),
            cidrs: p
                .ip_ranges()
                .iter()
                .filter_map(|r| r.cidr_ip())
                .map(str::to_string)
                .collect(),
        })
        .collect()
}

fn group_from(group: &aws_sdk_ec2::types::SecurityGroup) -> SecurityGroup {
    SecurityGroup {
        id: group.group_id().unwrap_or_default().to_string(),
        group_name: group.group_name().unwrap_or_default().to_string(),
        ingress: permissions_from(group.ip_permissions()),
        egress: permissions_from(group.ip_permissions_egress()),
    }
}

fn ip_permission(rule: &RuleSpec) -> IpPermission {
    IpPermission::builder()
        .ip_protocol(&rule.protocol)
        .from_port(rule.from_port)
        .to_port(rule.to_port)
        .ip_ranges(
            IpRange::builder()
                .cidr_ip(&rule.cidr)
                .set_description(rule.description.clone())
                .build(),
        )
        .build()
}

#[async_trait]
impl Ec2Api for AwsEc2 {
    async fn instances_by_id(&self, id: &str) -> Result<Vec<Instance>> {
        let result = self
            .client
            .describe_instances()
            .instance_ids(id)
            .send()
            .await;
        Ok(swallow_not_found(result, "describe instances")?
            .map(|output| instances_from(&output))
            .unwrap_or_default())
    }

    async fn instances_named(&self, names: &[String]) -> Result<Vec<Instance>> {
        let filter = Filter::builder()
            .name("tag:Name")
            .set_values(Some(names.to_vec()))
            .build();
        self.describe_instances(Some(vec![filter])).await
    }

    async fn all_instances(&self) -> Result<Vec<Instance>> {
        self.describe_instances(None).await
    }

    async fn images_by_id(&self, id: &str) -> Result<Vec<Image>> {
        let result = self.client.describe_images().image_ids(id).send().await;
        Ok(swallow_not_found(result, "describe images")?
            .map(|output| output.images().iter().map(image_from).collect())
            .unwrap_or_default())
    }

    async fn images_named(&self, name: &str) -> Result<Vec<Image>> {
        let filter = Filter::builder().name("name").values(name).build();
        let output = self
            .client
            .describe_images()
            .filters(filter)
            .send()
            .await
            .map_err(|e| map_err("describe images", e))?;
        Ok(output.images().iter().map(image_from).collect())
    }

    async fn own_images(&self) -> Result<Vec<Image>> {
        // Without the owner filter this would sweep in every public AMI.
        let output = self
            .client
            .describe_images()
            .owners("self")
            .send()
            .await
            .map_err(|e| map_err("describe images", e))?;
        Ok(output.images().iter().map(image_from).collect())
    }

    async fn security_groups_by_id(&self, id: &str) -> Result<Vec<SecurityGroup>> {
        let result = self
            .client
            .describe_security_groups()
            .group_ids(id)
            .send()
            .await;
        Ok(swallow_not_found(result, "describe security groups")?
            .map(|output| output.security_groups().iter().map(group_from).collect())
            .unwrap_or_default())
    }

    async fn security_groups_named(&self, name: &str) -> Result<Vec<SecurityGroup>> {
        let filter = Filter::builder().name("group-name").values(name).build();
        let output = self
            .client
            .describe_security_groups()
            .filters(filter)
            .send()
            .await
            .map_err(|e| map_err("describe security groups", e))?;
        Ok(output.security_groups().iter().map(group_from).collect())
    }

    async fn all_security_groups(&self) -> Result<Vec<SecurityGroup>> {
        let output = self
            .client
            .describe_security_groups()
            .send()
            .await
            .map_err(|e| map_err("describe security groups", e))?;
        Ok(output.security_groups().iter().map(group_from).collect())
    }

    async fn volume_size_gb(&self, volume_id: &str) -> Result<i32> {
        let output = self
            .client
            .describe_volumes()
            .volume_ids(volume_id)
            .send()
            .await
            .map_err(|e| map_err("describe volumes", e))?;
        output
            .volumes()
            .first()
            .and_then(|v| v.size())
            .ok_or_else(|| CloudError::api(format!("no size reported for volume {volume_id}")))
    }

    async fn run_instances(&self, request: &LaunchRequest) -> Result<Vec<Instance>> {
        let mut builder = self
            .client
            .run_instances()
            .image_id(&request.image_id)
            .instance_type(InstanceType::from(request.instance_type.as_str()))
            .key_name(&request.key_name)
            .min_count(request.count as i32)
            .max_count(request.count as i32)
            .instance_initiated_shutdown_behavior(match request.shutdown_behavior {
                ShutdownBehavior::Stop => aws_sdk_ec2::types::ShutdownBehavior::Stop,
                ShutdownBehavior::Terminate => aws_sdk_ec2::types::ShutdownBehavior::Terminate,
            })
            .set_security_group_ids(Some(request.security_group_ids.clone()));
        for volume in &request.volumes {
            builder = builder.block_device_mappings(
                BlockDeviceMapping::builder()
                    .device_name(&volume.device_name)
                    .ebs(EbsBlockDevice::builder().volume_size(volume.size_gb).build())
                    .build(),
            );
        }

        let output = builder
            .send()
            .await
            .map_err(|e| map_err("run instances", e))?;
        Ok(output.instances().iter().map(instance_from).collect())
    }

    async fn create_tags(&self, resource_id: &str, tags: &[Tag]) -> Result<()> {
        let mut builder = self.client.create_tags().resources(resource_id);
        for tag in tags {
            builder = builder.tags(
                aws_sdk_ec2::types::Tag::builder()
                    .key(&tag.key)
                    .value(&tag.value)
                    .build(),
            );
        }
        builder
            .send()
            .await
            .map_err(|e| map_err("create tags", e))?;
        Ok(())
    }

    async fn create_image(
        &self,
        instance_id: &str,
        name: &str,
        description: &str,
    ) -> Result<String> {
        let output = self
            .client
            .create_image()
            .instance_id(instance_id)
            .name(name)
            .description(description)
            .no_reboot(true)
            .send()
            .await
            .map_err(|e| map_err("create image", e))?;
        output
            .image_id()
            .map(str::to_string)
            .ok_or_else(|| CloudError::api("create image returned no image id"))
    }

    async fn deregister_image(&self, image_id: &str) -> Result<()> {
        self.client
            .deregister_image()
            .image_id(image_id)
            .send()
            .await
            .map_err(|e| map_err("deregister image", e))?;
        Ok(())
    }

    async fn stop_instances(&self, ids: &[String]) -> Result<()> {
        self.client
            .stop_instances()
            .set_instance_ids(Some(ids.to_vec()))
            .send()
            .await
            .map_err(|e| map_err("stop instances", e))?;
        Ok(())
    }

    async fn terminate_instances(&self, ids: &[String]) -> Result<()> {
        self.client
            .terminate_instances()
            .set_instance_ids(Some(ids.to_vec()))
            .send()
            .await
            .map_err(|e| map_err("terminate instances", e))?;
        Ok(())
    }

    async fn reboot_instances(&self, ids: &[String]) -> Result<()> {
        self.client
            .reboot_instances()
            .set_instance_ids(Some(ids.to_vec()))
            .send()
            .await
            .map_err(|e| map_err("reboot instances", e))?;
        Ok(())
    }

    async fn associate_instance_profile(
        &self,
        instance_id: &str,
        profile_name: &str,
    ) -> Result<()> {
        self.client
            .associate_iam_instance_profile()
            .instance_id(instance_id)
            .iam_instance_profile(
                IamInstanceProfileSpecification::builder()
                    .name(profile_name)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| map_err("associate iam instance profile", e))?;
        Ok(())
    }

    async fn authorize_rule(
        &self,
        group_id: &str,
        direction: Direction,
        rule: &RuleSpec,
    ) -> Result<()> {
        match direction {
            Direction::Inbound => {
                self.client
                    .authorize_security_group_ingress()
                    .group_id(group_id)
                    .ip_permissions(ip_permission(rule))
                    .send()
                    .await
                    .map_err(|e| map_err("authorize ingress", e))?;
            }
            Direction::Outbound => {
                self.client
                    .authorize_security_group_egress()
                    .group_id(group_id)
                    .ip_permissions(ip_permission(rule))
                    .send()
                    .await
                    .map_err(|e| map_err("authorize egress", e))?;
            }
        }
        Ok(())
    }

    async fn revoke_rule(
        &self,
        group_id: &str,
        direction: Direction,
        rule: &RuleSpec,
    ) -> Result<()> {
        match direction {
            Direction::Inbound => {
                self.client
                    .revoke_security_group_ingress()
                    .group_id(group_id)
                    .ip_permissions(ip_permission(rule))
                    .send()
                    .await
                    .map_err(|e| map_err("revoke ingress", e))?;
            }
            Direction::Outbound => {
                self.client
                    .revoke_security_group_egress()
                    .group_id(group_id)
                    .ip_permissions(ip_permission(rule))
                    .send()
                    .await
                    .map_err(|e| map_err("revoke egress", e))?;
            }
        }
        Ok(())
    }
}
