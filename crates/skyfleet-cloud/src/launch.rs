//! Instance launch and clone-launch
//!
//! Creates a batch of named instances from an image, drives each one
//! through the convergence pipeline (exists → tagged → running → has
//! address), then runs the post-launch steps: IAM instance profile
//! association and per-instance security-group rules. A clone launch
//! first snapshots a running instance into a temporary image, backfills
//! any unset options from the source instance, and deregisters the
//! image once the new instances are up.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use futures_util::future::join_all;
use thiserror::Error;

use crate::api::{Ec2Api, LaunchRequest, VolumeSpec};
use crate::error::CloudError;
use crate::model::{Instance, Resolved, ShutdownBehavior, Tag};
use crate::network::{PerInstanceRule, SecurityGroupManager};
use crate::resolve::Resolver;
use crate::retry::{RetryError, RetryPolicy, run_with_retries_all};
use crate::wait;

/// Where the boot image comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// An existing image, by id or name.
    Image(String),
    /// Snapshot this instance (by id or name) into a temporary image.
    CloneOf(String),
}

/// Caller-supplied launch options.
///
/// For a clone launch, unset fields are backfilled from the source
/// instance. The tag map is fresh per launch; nothing is shared between
/// calls.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub instance_type: Option<String>,
    pub key_pair_name: Option<String>,
    /// Security group identifiers (id or group name).
    pub security_groups: Vec<String>,
    pub ebs_device_name: Option<String>,
    pub ebs_volume_size: Option<i32>,
    pub shutdown_behavior: Option<ShutdownBehavior>,
    /// Extra tags applied to every new instance, alongside `Name`.
    pub tags: BTreeMap<String, String>,
}

/// Launch failures.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// A step after instance creation failed. Carries the created
    /// instances so the caller can clean them up instead of leaking
    /// them.
    #[error("failure in post-launch tasks: {source}")]
    PostLaunch {
        source: CloudError,
        instances: Vec<Instance>,
    },
}

/// Drives one launch operation.
pub struct Launcher<'a, C: Ec2Api + ?Sized> {
    api: &'a C,
    source: ImageSource,
    options: LaunchOptions,
    iam_instance_profile: String,
    per_instance_rules: Vec<PerInstanceRule>,
    policy: RetryPolicy,
}

struct Plan {
    image_id: String,
    temp_image_id: Option<String>,
    instance_type: String,
    key_name: String,
    security_group_ids: Vec<String>,
    volumes: Vec<VolumeSpec>,
    shutdown_behavior: ShutdownBehavior,
}

impl<'a, C: Ec2Api + ?Sized> Launcher<'a, C> {
    pub fn new(
        api: &'a C,
        source: ImageSource,
        options: LaunchOptions,
        iam_instance_profile: impl Into<String>,
    ) -> Self {
        Self {
            api,
            source,
            options,
            iam_instance_profile: iam_instance_profile.into(),
            per_instance_rules: Vec::new(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_per_instance_rules(mut self, rules: Vec<PerInstanceRule>) -> Self {
        self.per_instance_rules = rules;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Launch one instance per name and return them running, tagged and
    /// addressable.
    pub async fn launch(
        &self,
        new_instance_names: &[String],
    ) -> Result<Vec<Resolved<Instance>>, LaunchError> {
        self.validate_names(new_instance_names).await?;
        let plan = self.plan().await?;

        let request = LaunchRequest {
            image_id: plan.image_id.clone(),
            instance_type: plan.instance_type.clone(),
            key_name: plan.key_name.clone(),
            security_group_ids: plan.security_group_ids.clone(),
            volumes: plan.volumes.clone(),
            count: new_instance_names.len(),
            shutdown_behavior: plan.shutdown_behavior,
        };
        tracing::info!("creating {} instances", request.count);
        tracing::info!("  InstanceType: {}", request.instance_type);
        tracing::info!("  KeyName: {}", request.key_name);
        tracing::info!("  SecurityGroupIds: {:?}", request.security_group_ids);
        tracing::info!(
            "  EBS size(s): {}",
            request
                .volumes
                .iter()
                .map(|v| v.size_gb.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        tracing::info!(
            "  InstanceInitiatedShutdownBehavior: {:?}",
            request.shutdown_behavior
        );

        let created = self.api.run_instances(&request).await?;

        match self.after_create(&created, new_instance_names, &plan).await {
            Ok(instances) => Ok(instances),
            Err(source) => {
                tracing::error!("failure in post-launch tasks: {source}");
                Err(LaunchError::PostLaunch {
                    source,
                    instances: created,
                })
            }
        }
    }

    async fn validate_names(&self, names: &[String]) -> Result<(), LaunchError> {
        if names.is_empty() {
            return Err(LaunchError::Invalid(
                "specify at least one new instance".into(),
            ));
        }
        let unique: BTreeSet<&String> = names.iter().collect();
        if unique.len() != names.len() {
            return Err(LaunchError::Invalid(
                "new instance names must be unique".into(),
            ));
        }

        let existing = Resolver::new(self.api).instances_named(names).await?;
        if !existing.is_empty() {
            let listed = existing
                .iter()
                .map(|i| i.label().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(LaunchError::Invalid(format!(
                "the following instances already exist: {listed}"
            )));
        }
        Ok(())
    }

    async fn plan(&self) -> Result<Plan, LaunchError> {
        let resolver = Resolver::new(self.api);

        let mut instance_type = self.options.instance_type.clone();
        let mut key_name = self.options.key_pair_name.clone();
        let mut security_group_ids = Vec::with_capacity(self.options.security_groups.len());
        for identifier in &self.options.security_groups {
            security_group_ids.push(resolver.security_group(identifier).await?.id.clone());
        }
        let mut volumes = match (&self.options.ebs_device_name, self.options.ebs_volume_size) {
            (Some(device), Some(size)) => vec![VolumeSpec {
                device_name: device.clone(),
                size_gb: size,
            }],
            (None, Some(_)) => {
                return Err(LaunchError::Invalid(
                    "an EBS volume size needs a device name".into(),
                ));
            }
            _ => Vec::new(),
        };

        let (image_id, temp_image_id) = match &self.source {
            ImageSource::Image(identifier) => {
                let image = resolver.image(identifier).await?;
                (image.id.clone(), None)
            }
            ImageSource::CloneOf(identifier) => {
                let source = resolver.instance(identifier).await?;
                if instance_type.is_none() {
                    instance_type = source.instance_type.clone();
                }
                if key_name.is_none() {
                    key_name = source.key_name.clone();
                }
                if security_group_ids.is_empty() {
                    security_group_ids = source.security_group_ids.clone();
                }
                if volumes.is_empty() {
                    for device in &source.block_devices {
                        let size_gb = self.api.volume_size_gb(&device.volume_id).await?;
                        volumes.push(VolumeSpec {
                            device_name: device.device_name.clone(),
                            size_gb,
                        });
                    }
                }
                let image_id = self.create_clone_image(&source).await?;
                (image_id.clone(), Some(image_id))
            }
        };

        let instance_type = instance_type
            .ok_or_else(|| LaunchError::Invalid("specify an instance type".into()))?;
        let key_name =
            key_name.ok_or_else(|| LaunchError::Invalid("specify a key pair name".into()))?;
        if security_group_ids.is_empty() {
            return Err(LaunchError::Invalid(
                "specify at least one security group".into(),
            ));
        }
        if volumes.is_empty() {
            return Err(LaunchError::Invalid("specify an EBS volume size".into()));
        }

        Ok(Plan {
            image_id,
            temp_image_id,
            instance_type,
            key_name,
            security_group_ids,
            volumes,
            shutdown_behavior: self.options.shutdown_behavior.unwrap_or_default(),
        })
    }

    async fn create_clone_image(&self, source: &Resolved<Instance>) -> Result<String, CloudError> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let name = format!("{}-{}-{stamp}", source.label(), source.id);
        tracing::info!("creating image {name} from instance {}", source.id);
        let image_id = self.api.create_image(&source.id, &name, &name).await?;
        wait::wait_for_image_available(self.api, &image_id, &self.policy).await?;
        Ok(image_id)
    }

    async fn after_create(
        &self,
        created: &[Instance],
        names: &[String],
        plan: &Plan,
    ) -> Result<Vec<Resolved<Instance>>, CloudError> {
        join_all(
            created
                .iter()
                .zip(names)
                .map(|(instance, name)| self.bring_up(instance, name)),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<()>, CloudError>>()?;

        // Re-fetch so every instance carries its name and address.
        let resolver = Resolver::new(self.api);
        let mut instances = Vec::with_capacity(created.len());
        for instance in created {
            instances.push(resolver.instance(&instance.id).await?);
        }
        tracing::info!("{} instances running", instances.len());

        for instance in &instances {
            tracing::info!(
                "  {} - {}",
                instance.label(),
                instance.public_ip.as_deref().unwrap_or("?")
            );
            self.api
                .associate_instance_profile(&instance.id, &self.iam_instance_profile)
                .await?;
        }

        self.add_to_security_groups(&instances).await?;

        if let Some(image_id) = &plan.temp_image_id {
            tracing::info!("deregistering temporary image {image_id}");
            self.api.deregister_image(image_id).await?;
        }

        Ok(instances)
    }

    async fn bring_up(&self, instance: &Instance, name: &str) -> Result<(), CloudError> {
        wait::wait_until_exists(self.api, &instance.id, &self.policy).await?;

        tracing::info!("naming instance {} {}", instance.id, name);
        let mut tags = vec![Tag::new("Name", name)];
        for (key, value) in &self.options.tags {
            tags.push(Tag::new(key.clone(), value.clone()));
        }
        // The provider sometimes still reports the fresh instance as
        // nonexistent here, so tagging retries on any error.
        run_with_retries_all(&self.policy, || self.api.create_tags(&instance.id, &tags))
            .await
            .map_err(|e| match e {
                RetryError::Exhausted { source, .. } => CloudError::ConvergenceTimeout {
                    what: format!("tagging instance {}", instance.id),
                    message: source.to_string(),
                },
                RetryError::Aborted(e) => e,
            })?;

        wait::wait_until_running(self.api, &instance.id, &self.policy).await?;
        wait::wait_for_public_address(self.api, &instance.id, &self.policy).await?;
        Ok(())
    }

    async fn add_to_security_groups(
        &self,
        instances: &[Resolved<Instance>],
    ) -> Result<(), CloudError> {
        for rule in &self.per_instance_rules {
            let mut manager = SecurityGroupManager::new(self.api, rule.security_group.clone());
            for instance in instances {
                manager
                    .add_rule(
                        rule.direction,
                        &rule.protocol,
                        rule.from_port,
                        rule.to_port,
                        instance,
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Direction;
    use crate::testing::FakeEc2;
    use std::time::Duration;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn fast() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(1), 5)
    }

    fn base_options() -> LaunchOptions {
        LaunchOptions {
            instance_type: Some("t3.small".into()),
            key_pair_name: Some("deploy".into()),
            security_groups: vec!["web-servers".into()],
            ebs_device_name: Some("/dev/sda1".into()),
            ebs_volume_size: Some(100),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn launches_tags_and_associates_profile() {
        let api = FakeEc2::new();
        api.add_security_group("sg-123", "web-servers");
        api.add_image("ami-base", Some("base-image"));

        let mut options = base_options();
        options.tags.insert("env".into(), "prod".into());
        let launcher = Launcher::new(
            &api,
            ImageSource::Image("base-image".into()),
            options,
            "fleet-profile",
        )
        .with_policy(fast());

        let instances = launcher.launch(&names(&["web-1", "web-2"])).await.unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].name.as_deref(), Some("web-1"));
        assert!(instances.iter().all(|i| i.public_ip.is_some()));

        let state = api.state.lock().unwrap();
        assert_eq!(state.last_request.as_ref().unwrap().image_id, "ami-base");
        assert_eq!(state.profile_associations.len(), 2);
        assert!(
            state
                .profile_associations
                .iter()
                .all(|(_, profile)| profile == "fleet-profile")
        );
        // Extra tags ride along with Name.
        let tagged = state.instances.iter().find(|i| i.id == "i-new-0").unwrap();
        assert_eq!(tagged.tag("env"), Some("prod"));
    }

    #[tokio::test]
    async fn per_instance_rules_are_added_after_launch() {
        let api = FakeEc2::new();
        api.add_security_group("sg-123", "web-servers");
        api.add_image("ami-base", Some("base-image"));

        let launcher = Launcher::new(
            &api,
            ImageSource::Image("base-image".into()),
            base_options(),
            "fleet-profile",
        )
        .with_policy(fast())
        .with_per_instance_rules(vec![PerInstanceRule {
            security_group: "web-servers".into(),
            direction: Direction::Inbound,
            protocol: "tcp".into(),
            from_port: 22,
            to_port: 22,
        }]);

        launcher.launch(&names(&["web-1"])).await.unwrap();

        let state = api.state.lock().unwrap();
        assert_eq!(state.authorized.len(), 1);
        assert!(state.authorized[0].2.cidr.ends_with("/32"));
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let api = FakeEc2::new();
        let launcher = Launcher::new(
            &api,
            ImageSource::Image("ami-base".into()),
            base_options(),
            "fleet-profile",
        );

        let err = launcher.launch(&names(&["web-1", "web-1"])).await.unwrap_err();
        assert!(matches!(err, LaunchError::Invalid(_)));
    }

    #[tokio::test]
    async fn existing_names_are_rejected() {
        let api = FakeEc2::new();
        api.add_instance("i-old", Some("web-1"), Some("1.2.3.4"));
        let launcher = Launcher::new(
            &api,
            ImageSource::Image("ami-base".into()),
            base_options(),
            "fleet-profile",
        );

        let err = launcher.launch(&names(&["web-1"])).await.unwrap_err();
        match err {
            LaunchError::Invalid(msg) => assert!(msg.contains("web-1"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_instance_type_is_invalid() {
        let api = FakeEc2::new();
        api.add_image("ami-base", Some("base-image"));
        let mut options = base_options();
        options.instance_type = None;

        let launcher = Launcher::new(
            &api,
            ImageSource::Image("base-image".into()),
            options,
            "fleet-profile",
        );
        let err = launcher.launch(&names(&["web-1"])).await.unwrap_err();
        match err {
            LaunchError::Invalid(msg) => assert!(msg.contains("instance type"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn post_launch_failure_carries_the_created_instances() {
        let api = FakeEc2::new();
        api.add_security_group("sg-123", "web-servers");
        api.add_image("ami-base", Some("base-image"));
        api.state.lock().unwrap().fail_profile_association = true;

        let launcher = Launcher::new(
            &api,
            ImageSource::Image("base-image".into()),
            base_options(),
            "fleet-profile",
        )
        .with_policy(fast());

        let err = launcher.launch(&names(&["web-1"])).await.unwrap_err();
        match err {
            LaunchError::PostLaunch { instances, .. } => {
                assert_eq!(instances.len(), 1);
                assert_eq!(instances[0].id, "i-new-0");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn clone_launch_backfills_and_deregisters_the_temp_image() {
        let api = FakeEc2::new();
        api.add_security_group("sg-123", "web-servers");
        {
            let mut state = api.state.lock().unwrap();
            state.volume_sizes.insert("vol-1".into(), 250);
        }
        api.add_clone_source("i-src", "web-1", "sg-123", "t3.large", "deploy", "vol-1");

        // Only the names are given; everything else comes from the source.
        let launcher = Launcher::new(
            &api,
            ImageSource::CloneOf("web-1".into()),
            LaunchOptions::default(),
            "fleet-profile",
        )
        .with_policy(fast());

        let instances = launcher.launch(&names(&["web-2"])).await.unwrap();
        assert_eq!(instances.len(), 1);

        let state = api.state.lock().unwrap();
        let request = state.last_request.as_ref().unwrap();
        assert_eq!(request.instance_type, "t3.large");
        assert_eq!(request.key_name, "deploy");
        assert_eq!(request.security_group_ids, vec!["sg-123".to_string()]);
        assert_eq!(request.volumes[0].size_gb, 250);
        // The temporary image was created from the source and cleaned up.
        assert_eq!(state.created_images.len(), 1);
        assert_eq!(state.created_images[0].0, "i-src");
        assert_eq!(state.deregistered, vec![request.image_id.clone()]);
    }
}
