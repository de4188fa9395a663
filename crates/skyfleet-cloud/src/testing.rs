//! In-memory fakes for the provider API traits
//!
//! Test-only. The fakes record every call so tests can assert on call
//! counts (retry budgets, single-shot destructive calls) and on the
//! exact requests the core issued.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::api::{Ec2Api, ElbApi, LaunchRequest, LoadBalancer, TargetGroup, TargetHealth};
use crate::error::{CloudError, Result};
use crate::model::{
    BlockDevice, Image, ImageState, Instance, InstanceState, SecurityGroup, Tag,
};
use crate::network::{Direction, RuleSpec};

pub(crate) fn instance(id: &str, name: Option<&str>, public_ip: Option<&str>) -> Instance {
    Instance {
        id: id.to_string(),
        state: InstanceState::Running,
        public_ip: public_ip.map(str::to_string),
        instance_type: Some("t3.small".into()),
        key_name: Some("deploy".into()),
        security_group_ids: Vec::new(),
        block_devices: Vec::new(),
        tags: name.map(|n| vec![Tag::new("Name", n)]).unwrap_or_default(),
    }
}

#[derive(Default)]
pub(crate) struct FakeState {
    pub instances: Vec<Instance>,
    pub images: Vec<Image>,
    pub groups: Vec<SecurityGroup>,
    pub volume_sizes: HashMap<String, i32>,

    // Call counters
    pub id_lookups: u32,
    pub name_lookups: u32,
    pub image_lookups: u32,
    pub stop_calls: u32,
    pub terminate_calls: u32,
    pub reboot_calls: u32,

    // Behavior knobs
    pub id_lookup_fails: bool,
    pub fail_stop: bool,
    pub fail_profile_association: bool,
    /// After this many id lookups, instances without an address get one.
    pub assign_ip_after: Option<(u32, String)>,
    /// After this many id lookups, every instance reports `running`.
    pub running_after: Option<u32>,
    /// After this many image lookups, pending images become available.
    pub image_available_after: Option<u32>,

    // Recorded mutations
    pub last_request: Option<LaunchRequest>,
    pub created_images: Vec<(String, String)>,
    pub deregistered: Vec<String>,
    pub profile_associations: Vec<(String, String)>,
    pub authorized: Vec<(String, Direction, RuleSpec)>,
    pub revoked: Vec<(String, Direction, RuleSpec)>,
}

pub(crate) struct FakeEc2 {
    pub state: Mutex<FakeState>,
}

impl FakeEc2 {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn add_instance(&self, id: &str, name: Option<&str>, public_ip: Option<&str>) {
        self.state
            .lock()
            .unwrap()
            .instances
            .push(instance(id, name, public_ip));
    }

    pub fn add_stopped_instance(&self, id: &str, name: Option<&str>) {
        let mut stopped = instance(id, name, None);
        stopped.state = InstanceState::Stopped;
        self.state.lock().unwrap().instances.push(stopped);
    }

    pub fn add_clone_source(
        &self,
        id: &str,
        name: &str,
        security_group_id: &str,
        instance_type: &str,
        key_name: &str,
        volume_id: &str,
    ) {
        let mut source = instance(id, Some(name), Some("10.0.0.5"));
        source.instance_type = Some(instance_type.to_string());
        source.key_name = Some(key_name.to_string());
        source.security_group_ids = vec![security_group_id.to_string()];
        source.block_devices = vec![BlockDevice {
            device_name: "/dev/sda1".into(),
            volume_id: volume_id.to_string(),
        }];
        self.state.lock().unwrap().instances.push(source);
    }

    pub fn add_image(&self, id: &str, name: Option<&str>) {
        self.state.lock().unwrap().images.push(Image {
            id: id.to_string(),
            name: name.map(str::to_string),
            state: ImageState::Available,
        });
    }

    pub fn add_pending_image(&self, id: &str, name: &str) {
        self.state.lock().unwrap().images.push(Image {
            id: id.to_string(),
            name: Some(name.to_string()),
            state: ImageState::Pending,
        });
    }

    pub fn add_security_group(&self, id: &str, group_name: &str) {
        self.state.lock().unwrap().groups.push(SecurityGroup {
            id: id.to_string(),
            group_name: group_name.to_string(),
            ingress: Vec::new(),
            egress: Vec::new(),
        });
    }
}

#[async_trait]
impl Ec2Api for FakeEc2 {
    async fn instances_by_id(&self, id: &str) -> Result<Vec<Instance>> {
        let mut state = self.state.lock().unwrap();
        state.id_lookups += 1;
        if state.id_lookup_fails {
            return Err(CloudError::api("simulated id lookup failure"));
        }

        if let Some((after, ip)) = state.assign_ip_after.clone()
            && state.id_lookups >= after
        {
            for instance in &mut state.instances {
                if instance.public_ip.is_none() {
                    instance.public_ip = Some(ip.clone());
                }
            }
        }
        if let Some(after) = state.running_after
            && state.id_lookups >= after
        {
            for instance in &mut state.instances {
                instance.state = InstanceState::Running;
            }
        }

        Ok(state
            .instances
            .iter()
            .filter(|i| i.id == id)
            .cloned()
            .collect())
    }

    async fn instances_named(&self, names: &[String]) -> Result<Vec<Instance>> {
        let mut state = self.state.lock().unwrap();
        state.name_lookups += 1;
        Ok(state
            .instances
            .iter()
            .filter(|i| i.name_tag().is_some_and(|n| names.contains(&n)))
            .cloned()
            .collect())
    }

    async fn all_instances(&self) -> Result<Vec<Instance>> {
        Ok(self.state.lock().unwrap().instances.clone())
    }

    async fn images_by_id(&self, id: &str) -> Result<Vec<Image>> {
        let mut state = self.state.lock().unwrap();
        state.image_lookups += 1;
        if let Some(after) = state.image_available_after
            && state.image_lookups >= after
        {
            for image in &mut state.images {
                if image.state == ImageState::Pending {
                    image.state = ImageState::Available;
                }
            }
        }
        Ok(state.images.iter().filter(|i| i.id == id).cloned().collect())
    }

    async fn images_named(&self, name: &str) -> Result<Vec<Image>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .images
            .iter()
            .filter(|i| i.name.as_deref() == Some(name))
            .cloned()
            .collect())
    }

    async fn own_images(&self) -> Result<Vec<Image>> {
        Ok(self.state.lock().unwrap().images.clone())
    }

    async fn security_groups_by_id(&self, id: &str) -> Result<Vec<SecurityGroup>> {
        let state = self.state.lock().unwrap();
        Ok(state.groups.iter().filter(|g| g.id == id).cloned().collect())
    }

    async fn security_groups_named(&self, name: &str) -> Result<Vec<SecurityGroup>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .groups
            .iter()
            .filter(|g| g.group_name == name)
            .cloned()
            .collect())
    }

    async fn all_security_groups(&self) -> Result<Vec<SecurityGroup>> {
        Ok(self.state.lock().unwrap().groups.clone())
    }

    async fn volume_size_gb(&self, volume_id: &str) -> Result<i32> {
        self.state
            .lock()
            .unwrap()
            .volume_sizes
            .get(volume_id)
            .copied()
            .ok_or_else(|| CloudError::api(format!("no volume {volume_id}")))
    }

    async fn run_instances(&self, request: &LaunchRequest) -> Result<Vec<Instance>> {
        let mut state = self.state.lock().unwrap();
        state.last_request = Some(request.clone());
        let mut created = Vec::with_capacity(request.count);
        for index in 0..request.count {
            let mut fresh = instance(
                &format!("i-new-{index}"),
                None,
                Some(&format!("10.0.0.{}", 10 + index)),
            );
            fresh.instance_type = Some(request.instance_type.clone());
            fresh.key_name = Some(request.key_name.clone());
            fresh.security_group_ids = request.security_group_ids.clone();
            created.push(fresh.clone());
            state.instances.push(fresh);
        }
        Ok(created)
    }

    async fn create_tags(&self, resource_id: &str, tags: &[Tag]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(instance) = state.instances.iter_mut().find(|i| i.id == resource_id) else {
            return Err(CloudError::api(format!("no resource {resource_id}")));
        };
        for tag in tags {
            instance.tags.retain(|t| t.key != tag.key);
            instance.tags.push(tag.clone());
        }
        Ok(())
    }

    async fn create_image(
        &self,
        instance_id: &str,
        name: &str,
        _description: &str,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state
            .created_images
            .push((instance_id.to_string(), name.to_string()));
        let id = format!("ami-new-{}", state.created_images.len());
        let initial = if state.image_available_after.is_some() {
            ImageState::Pending
        } else {
            ImageState::Available
        };
        state.images.push(Image {
            id: id.clone(),
            name: Some(name.to_string()),
            state: initial,
        });
        Ok(id)
    }

    async fn deregister_image(&self, image_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.deregistered.push(image_id.to_string());
        state.images.retain(|i| i.id != image_id);
        Ok(())
    }

    async fn stop_instances(&self, _ids: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.stop_calls += 1;
        if state.fail_stop {
            return Err(CloudError::api("simulated stop failure"));
        }
        for instance in &mut state.instances {
            instance.state = InstanceState::Stopped;
        }
        Ok(())
    }

    async fn terminate_instances(&self, _ids: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.terminate_calls += 1;
        for instance in &mut state.instances {
            instance.state = InstanceState::Terminated;
        }
        Ok(())
    }

    async fn reboot_instances(&self, _ids: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.reboot_calls += 1;
        for instance in &mut state.instances {
            instance.state = InstanceState::Pending;
        }
        Ok(())
    }

    async fn associate_instance_profile(
        &self,
        instance_id: &str,
        profile_name: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_profile_association {
            return Err(CloudError::api("simulated association failure"));
        }
        state
            .profile_associations
            .push((instance_id.to_string(), profile_name.to_string()));
        Ok(())
    }

    async fn authorize_rule(
        &self,
        group_id: &str,
        direction: Direction,
        rule: &RuleSpec,
    ) -> Result<()> {
        self.state.lock().unwrap().authorized.push((
            group_id.to_string(),
            direction,
            rule.clone(),
        ));
        Ok(())
    }

    async fn revoke_rule(
        &self,
        group_id: &str,
        direction: Direction,
        rule: &RuleSpec,
    ) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .revoked
            .push((group_id.to_string(), direction, rule.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeElbState {
    pub pools: Vec<(LoadBalancer, Vec<TargetGroup>)>,
    pub targets: HashMap<String, Vec<TargetHealth>>,
    pub registered: Vec<(String, Vec<String>)>,
    pub deregistered: Vec<(String, Vec<String>)>,
}

pub(crate) struct FakeElb {
    pub state: Mutex<FakeElbState>,
}

impl FakeElb {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeElbState::default()),
        }
    }

    pub fn add_pool(&self, arn: &str, name: &str, target_group_arns: &[&str]) {
        let groups = target_group_arns
            .iter()
            .map(|tg| TargetGroup {
                arn: tg.to_string(),
                name: tg.to_string(),
            })
            .collect();
        self.state.lock().unwrap().pools.push((
            LoadBalancer {
                arn: arn.to_string(),
                name: name.to_string(),
            },
            groups,
        ));
    }

    pub fn add_target(&self, target_group_arn: &str, instance_id: &str, health: &str) {
        self.state
            .lock()
            .unwrap()
            .targets
            .entry(target_group_arn.to_string())
            .or_default()
            .push(TargetHealth {
                instance_id: instance_id.to_string(),
                state: health.to_string(),
            });
    }
}

#[async_trait]
impl ElbApi for FakeElb {
    async fn load_balancers_named(&self, name: &str) -> Result<Vec<LoadBalancer>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .pools
            .iter()
            .filter(|(lb, _)| lb.name == name)
            .map(|(lb, _)| lb.clone())
            .collect())
    }

    async fn all_load_balancers(&self) -> Result<Vec<LoadBalancer>> {
        let state = self.state.lock().unwrap();
        Ok(state.pools.iter().map(|(lb, _)| lb.clone()).collect())
    }

    async fn target_groups(&self, load_balancer_arn: &str) -> Result<Vec<TargetGroup>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .pools
            .iter()
            .find(|(lb, _)| lb.arn == load_balancer_arn)
            .map(|(_, groups)| groups.clone())
            .unwrap_or_default())
    }

    async fn target_health(&self, target_group_arn: &str) -> Result<Vec<TargetHealth>> {
        let state = self.state.lock().unwrap();
        Ok(state.targets.get(target_group_arn).cloned().unwrap_or_default())
    }

    async fn register_targets(
        &self,
        target_group_arn: &str,
        instance_ids: &[String],
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .registered
            .push((target_group_arn.to_string(), instance_ids.to_vec()));
        let targets = state.targets.entry(target_group_arn.to_string()).or_default();
        for id in instance_ids {
            targets.push(TargetHealth {
                instance_id: id.clone(),
                state: "initial".into(),
            });
        }
        Ok(())
    }

    async fn deregister_targets(
        &self,
        target_group_arn: &str,
        instance_ids: &[String],
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .deregistered
            .push((target_group_arn.to_string(), instance_ids.to_vec()));
        if let Some(targets) = state.targets.get_mut(target_group_arn) {
            targets.retain(|t| !instance_ids.contains(&t.instance_id));
        }
        Ok(())
    }
}
