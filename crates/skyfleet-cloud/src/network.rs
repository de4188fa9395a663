//! Security-group rule management
//!
//! Rules are keyed to an instance's public address (`<ip>/32`), with the
//! instance's display name recorded as the rule description. Removing
//! an instance scans every group's ingress and egress permissions for
//! its address.

use serde::{Deserialize, Serialize};

use crate::api::Ec2Api;
use crate::error::{CloudError, Result};
use crate::model::{Instance, Resolved, SecurityGroup};
use crate::resolve::Resolver;

/// Rule direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Inbound,
    Outbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// One concrete rule: protocol, port range and a single CIDR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub protocol: String,
    pub from_port: i32,
    pub to_port: i32,
    pub cidr: String,
    pub description: Option<String>,
}

/// A per-instance rule template from the configuration; the CIDR is
/// filled in from each launched instance's public address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerInstanceRule {
    pub security_group: String,
    #[serde(default)]
    pub direction: Direction,
    pub protocol: String,
    pub from_port: i32,
    pub to_port: i32,
}

/// Manages the rules of one security group, resolved lazily on first
/// use.
pub struct SecurityGroupManager<'a, C: Ec2Api + ?Sized> {
    api: &'a C,
    identifier: String,
    group: Option<Resolved<SecurityGroup>>,
}

impl<'a, C: Ec2Api + ?Sized> SecurityGroupManager<'a, C> {
    pub fn new(api: &'a C, identifier: impl Into<String>) -> Self {
        Self {
            api,
            identifier: identifier.into(),
            group: None,
        }
    }

    async fn group(&mut self) -> Result<Resolved<SecurityGroup>> {
        if self.group.is_none() {
            let group = Resolver::new(self.api)
                .security_group(&self.identifier)
                .await?;
            self.group = Some(group);
        }
        Ok(self.group.clone().unwrap())
    }

    /// Authorize `<instance public ip>/32` for the given protocol and
    /// port range.
    pub async fn add_rule(
        &mut self,
        direction: Direction,
        protocol: &str,
        from_port: i32,
        to_port: i32,
        instance: &Resolved<Instance>,
    ) -> Result<()> {
        let address = instance
            .public_ip
            .as_deref()
            .ok_or_else(|| CloudError::NoPublicAddress(instance.id.clone()))?;
        let rule = RuleSpec {
            protocol: protocol.to_string(),
            from_port,
            to_port,
            cidr: format!("{address}/32"),
            description: instance.name.clone(),
        };

        let group = self.group().await?;
        tracing::info!(
            "adding {direction} {protocol} {from_port}:{to_port} from {} to {} ({})",
            instance.label(),
            group.group_name,
            group.id
        );
        self.api.authorize_rule(&group.id, direction, &rule).await
    }

    /// Revoke a previously authorized rule.
    pub async fn remove_rule(
        &mut self,
        direction: Direction,
        protocol: &str,
        from_port: i32,
        to_port: i32,
        cidr: &str,
    ) -> Result<()> {
        let rule = RuleSpec {
            protocol: protocol.to_string(),
            from_port,
            to_port,
            cidr: cidr.to_string(),
            description: None,
        };

        let group = self.group().await?;
        tracing::info!(
            "removing {direction} {protocol} {cidr} {from_port}:{to_port} from {} ({})",
            group.group_name,
            group.id
        );
        self.api.revoke_rule(&group.id, direction, &rule).await
    }
}

/// Revoke every rule, in any group, that authorizes the instance's
/// public address.
pub async fn remove_instance_from_rules<C: Ec2Api + ?Sized>(
    api: &C,
    instance: &Resolved<Instance>,
) -> Result<()> {
    tracing::info!(
        "removing instance {} from any security group rules",
        instance.label()
    );
    let Some(address) = instance.public_ip.as_deref() else {
        tracing::debug!("instance {} has no public address; nothing to remove", instance.id);
        return Ok(());
    };
    let cidr = format!("{address}/32");

    for group in api.all_security_groups().await? {
        for (direction, permissions) in [
            (Direction::Inbound, &group.ingress),
            (Direction::Outbound, &group.egress),
        ] {
            for permission in permissions {
                if !permission.cidrs.iter().any(|c| c == &cidr) {
                    continue;
                }
                let rule = RuleSpec {
                    protocol: permission.protocol.clone(),
                    from_port: permission.from_port.unwrap_or_default(),
                    to_port: permission.to_port.unwrap_or_default(),
                    cidr: cidr.clone(),
                    description: None,
                };
                tracing::info!(
                    "revoking {direction} {} {cidr} from {} ({})",
                    rule.protocol,
                    group.group_name,
                    group.id
                );
                api.revoke_rule(&group.id, direction, &rule).await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Permission;
    use crate::testing::{FakeEc2, instance};

    #[tokio::test]
    async fn add_rule_authorizes_the_instance_address() {
        let api = FakeEc2::new();
        api.add_security_group("sg-123", "web-servers");

        let target = Resolved::new(instance("i-aaa", Some("web-1"), Some("1.2.3.4")), Some("web-1".into()));
        let mut manager = SecurityGroupManager::new(&api, "web-servers");
        manager
            .add_rule(Direction::Inbound, "tcp", 22, 22, &target)
            .await
            .unwrap();

        let state = api.state.lock().unwrap();
        assert_eq!(state.authorized.len(), 1);
        let (group_id, direction, rule) = &state.authorized[0];
        assert_eq!(group_id, "sg-123");
        assert_eq!(*direction, Direction::Inbound);
        assert_eq!(rule.cidr, "1.2.3.4/32");
        assert_eq!(rule.description.as_deref(), Some("web-1"));
    }

    #[tokio::test]
    async fn add_rule_requires_a_public_address() {
        let api = FakeEc2::new();
        api.add_security_group("sg-123", "web-servers");

        let target = Resolved::new(instance("i-aaa", Some("web-1"), None), Some("web-1".into()));
        let mut manager = SecurityGroupManager::new(&api, "web-servers");
        let err = manager
            .add_rule(Direction::Inbound, "tcp", 22, 22, &target)
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::NoPublicAddress(_)));
    }

    #[tokio::test]
    async fn purge_revokes_every_matching_permission() {
        let api = FakeEc2::new();
        api.add_security_group("sg-123", "web-servers");
        api.add_security_group("sg-456", "db-servers");
        {
            let mut state = api.state.lock().unwrap();
            state.groups[0].ingress.push(Permission {
                protocol: "tcp".into(),
                from_port: Some(22),
                to_port: Some(22),
                cidrs: vec!["1.2.3.4/32".into(), "9.9.9.9/32".into()],
            });
            state.groups[1].egress.push(Permission {
                protocol: "tcp".into(),
                from_port: Some(5432),
                to_port: Some(5432),
                cidrs: vec!["1.2.3.4/32".into()],
            });
        }

        let target = Resolved::new(
            instance("i-aaa", Some("web-1"), Some("1.2.3.4")),
            Some("web-1".into()),
        );
        remove_instance_from_rules(&api, &target).await.unwrap();

        let state = api.state.lock().unwrap();
        assert_eq!(state.revoked.len(), 2);
        assert_eq!(state.revoked[0].0, "sg-123");
        assert_eq!(state.revoked[0].1, Direction::Inbound);
        assert_eq!(state.revoked[1].0, "sg-456");
        assert_eq!(state.revoked[1].1, Direction::Outbound);
        assert!(state.revoked.iter().all(|(_, _, r)| r.cidr == "1.2.3.4/32"));
    }
}
