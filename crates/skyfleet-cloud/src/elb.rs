//! Load-balancer pool membership
//!
//! A pool is one load balancer with its target groups. Membership
//! changes register or deregister instances with every target group of
//! the pool, then reload the pool so callers always see fresh health
//! data.

use thiserror::Error;

use crate::api::{Ec2Api, ElbApi, TargetGroup};
use crate::error::CloudError;
use crate::model::{Instance, Resolved};
use crate::resolve::Resolver;

/// Pool lookup and membership errors.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("load balancer pool does not exist: {0}")]
    PoolDoesNotExist(String),

    #[error("more than one load balancer pool named '{0}'")]
    MultipleMatches(String),

    #[error("load balancer {0} has no target groups")]
    NoTargetGroups(String),

    #[error(transparent)]
    Cloud(#[from] CloudError),
}

/// One registered target with its health state and resolved instance.
#[derive(Debug, Clone)]
pub struct PoolMember {
    pub instance: Resolved<Instance>,
    pub health: String,
}

/// A target group together with its members.
#[derive(Debug, Clone)]
pub struct TargetGroupStatus {
    pub group: TargetGroup,
    pub members: Vec<PoolMember>,
}

/// A load balancer and its (lazily loaded) target groups.
pub struct ElbPool<'a, E: ElbApi + ?Sized, C: Ec2Api + ?Sized> {
    elb: &'a E,
    ec2: &'a C,
    pub arn: String,
    pub name: Option<String>,
    groups: Option<Vec<TargetGroupStatus>>,
}

impl<'a, E: ElbApi + ?Sized, C: Ec2Api + ?Sized> ElbPool<'a, E, C> {
    pub fn new(elb: &'a E, ec2: &'a C, arn: impl Into<String>, name: Option<String>) -> Self {
        Self {
            elb,
            ec2,
            arn: arn.into(),
            name,
            groups: None,
        }
    }

    /// Look a pool up by load balancer name and load it.
    pub async fn from_name(elb: &'a E, ec2: &'a C, name: &str) -> Result<Self, PoolError> {
        let mut matches = elb.load_balancers_named(name).await?;
        let balancer = match matches.len() {
            0 => return Err(PoolError::PoolDoesNotExist(name.to_string())),
            1 => matches.remove(0),
            _ => return Err(PoolError::MultipleMatches(name.to_string())),
        };

        let mut pool = Self::new(elb, ec2, balancer.arn, Some(balancer.name));
        pool.load(false).await?;
        Ok(pool)
    }

    /// Every pool, loaded.
    pub async fn all(elb: &'a E, ec2: &'a C) -> Result<Vec<Self>, PoolError> {
        let mut pools = Vec::new();
        for balancer in elb.all_load_balancers().await? {
            let mut pool = Self::new(elb, ec2, balancer.arn, Some(balancer.name));
            pool.load(false).await?;
            pools.push(pool);
        }
        Ok(pools)
    }

    /// Load target groups and their member health; a no-op when already
    /// loaded unless `force_reload` is set.
    pub async fn load(&mut self, force_reload: bool) -> Result<(), PoolError> {
        if self.groups.is_some() && !force_reload {
            return Ok(());
        }

        let mut groups = self.elb.target_groups(&self.arn).await?;
        if groups.is_empty() {
            return Err(PoolError::NoTargetGroups(self.label().to_string()));
        }
        groups.sort_by(|a, b| a.name.cmp(&b.name));

        let resolver = Resolver::new(self.ec2);
        let mut loaded = Vec::with_capacity(groups.len());
        for group in groups {
            let health = self.elb.target_health(&group.arn).await?;
            if health.is_empty() {
                tracing::warn!("target group {} has no targets", group.arn);
            }
            let mut members = Vec::with_capacity(health.len());
            for target in health {
                let instance = resolver.instance(&target.instance_id).await?;
                members.push(PoolMember {
                    instance,
                    health: target.state,
                });
            }
            members.sort_by(|a, b| a.instance.label().cmp(b.instance.label()));
            loaded.push(TargetGroupStatus { group, members });
        }

        self.groups = Some(loaded);
        Ok(())
    }

    pub fn target_groups(&self) -> &[TargetGroupStatus] {
        self.groups.as_deref().unwrap_or_default()
    }

    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.arn)
    }

    /// Register the instances with every target group of the pool.
    pub async fn add(&mut self, identifiers: &[String]) -> Result<(), PoolError> {
        let ids = self.member_ids(identifiers).await?;
        self.load(false).await?;
        for status in self.groups.as_deref().unwrap_or_default() {
            tracing::info!(
                "registering {ids:?} with target group {}",
                status.group.name
            );
            self.elb.register_targets(&status.group.arn, &ids).await?;
        }
        self.load(true).await
    }

    /// Deregister the instances from every target group of the pool.
    pub async fn remove(&mut self, identifiers: &[String]) -> Result<(), PoolError> {
        let ids = self.member_ids(identifiers).await?;
        self.load(false).await?;
        for status in self.groups.as_deref().unwrap_or_default() {
            tracing::info!(
                "deregistering {ids:?} from target group {}",
                status.group.name
            );
            self.elb.deregister_targets(&status.group.arn, &ids).await?;
        }
        self.load(true).await
    }

    async fn member_ids(&self, identifiers: &[String]) -> Result<Vec<String>, PoolError> {
        let instances = Resolver::new(self.ec2).instances(identifiers).await?;
        Ok(instances.iter().map(|i| i.id.clone()).collect())
    }
}
