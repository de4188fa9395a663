//! Resource model
//!
//! Provider-neutral views of the resources the tool drives. The AWS
//! crate maps SDK output into these types; the core and the fakes used
//! in tests only ever see this model.

use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CloudError;

/// A key/value tag on a provider resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Instance lifecycle state as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
    Unknown,
}

impl FromStr for InstanceState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "shutting-down" => Self::ShuttingDown,
            "terminated" => Self::Terminated,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            _ => Self::Unknown,
        })
    }
}

/// A block device attached to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    pub device_name: String,
    pub volume_id: String,
}

/// A compute instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub state: InstanceState,
    pub public_ip: Option<String>,
    pub instance_type: Option<String>,
    pub key_name: Option<String>,
    pub security_group_ids: Vec<String>,
    pub block_devices: Vec<BlockDevice>,
    pub tags: Vec<Tag>,
}

impl Instance {
    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }

    /// Value of a tag, if present.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }

    /// The human-assigned name, read from the `Name` tag.
    pub fn name_tag(&self) -> Option<String> {
        self.tag("Name").map(str::to_string)
    }
}

/// Machine image state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageState {
    Pending,
    Available,
    Failed,
    Unknown,
}

impl FromStr for ImageState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "available" => Self::Available,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        })
    }
}

/// A machine image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub name: Option<String>,
    pub state: ImageState,
}

/// One permission entry of a security group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub protocol: String,
    pub from_port: Option<i32>,
    pub to_port: Option<i32>,
    pub cidrs: Vec<String>,
}

/// A security group with its rule sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    pub group_name: String,
    pub ingress: Vec<Permission>,
    pub egress: Vec<Permission>,
}

/// What an instance does when it shuts itself down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownBehavior {
    #[default]
    Stop,
    Terminate,
}

impl FromStr for ShutdownBehavior {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop" => Ok(Self::Stop),
            "terminate" => Ok(Self::Terminate),
            other => Err(CloudError::InvalidOption(format!(
                "shutdown behavior must be 'stop' or 'terminate', got '{other}'"
            ))),
        }
    }
}

/// A provider object decorated with its display name.
///
/// The name is derived once from the object's tag set at resolution
/// time; untagged objects carry `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolved<T> {
    inner: T,
    pub name: Option<String>,
}

impl<T> Resolved<T> {
    pub fn new(inner: T, name: Option<String>) -> Self {
        Self { inner, name }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> Deref for Resolved<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl Resolved<Instance> {
    /// Display label: the name when tagged, the instance id otherwise.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_state_parses_provider_strings() {
        assert_eq!("running".parse(), Ok(InstanceState::Running));
        assert_eq!("shutting-down".parse(), Ok(InstanceState::ShuttingDown));
        assert_eq!("???".parse(), Ok(InstanceState::Unknown));
    }

    #[test]
    fn shutdown_behavior_rejects_anything_else() {
        assert_eq!("stop".parse::<ShutdownBehavior>().unwrap(), ShutdownBehavior::Stop);
        assert!("halt".parse::<ShutdownBehavior>().is_err());
    }

    #[test]
    fn name_tag_is_read_from_tags() {
        let instance = Instance {
            id: "i-123".into(),
            state: InstanceState::Running,
            public_ip: None,
            instance_type: None,
            key_name: None,
            security_group_ids: vec![],
            block_devices: vec![],
            tags: vec![Tag::new("Name", "web-1"), Tag::new("env", "prod")],
        };
        assert_eq!(instance.name_tag().as_deref(), Some("web-1"));
        assert_eq!(instance.tag("env"), Some("prod"));
    }
}
