//! Resource resolution
//!
//! Turns an identifier (opaque provider id or human-assigned name) into
//! a provider object decorated with its display name. Resolution is
//! id-first: an API failure during the id lookup is evidence the value
//! is not actually an id, so it is swallowed and resolution falls
//! through to the name lookup. A name must match exactly one object;
//! anything else is an error, since no tie-break is safe for the
//! destructive operations downstream.
//!
//! Each resource kind contributes its lookup calls and display-name
//! extraction; the disambiguation logic is shared.

use std::future::Future;

use futures_util::future::join_all;

use crate::api::Ec2Api;
use crate::error::{CloudError, Result};
use crate::model::{Image, Instance, Resolved, SecurityGroup};

/// Resolves identifiers against a provider API.
pub struct Resolver<'a, C: Ec2Api + ?Sized> {
    api: &'a C,
}

impl<'a, C: Ec2Api + ?Sized> Resolver<'a, C> {
    pub fn new(api: &'a C) -> Self {
        Self { api }
    }

    /// Resolve one instance by id or `Name` tag.
    pub async fn instance(&self, identifier: &str) -> Result<Resolved<Instance>> {
        let names = [identifier.to_string()];
        resolve_one(
            "instance",
            identifier,
            self.api.instances_by_id(identifier),
            self.api.instances_named(&names),
            Instance::name_tag,
        )
        .await
    }

    /// Resolve several instances concurrently.
    pub async fn instances(&self, identifiers: &[String]) -> Result<Vec<Resolved<Instance>>> {
        join_all(identifiers.iter().map(|ident| self.instance(ident)))
            .await
            .into_iter()
            .collect()
    }

    /// Resolve one image by id or image name.
    pub async fn image(&self, identifier: &str) -> Result<Resolved<Image>> {
        resolve_one(
            "image",
            identifier,
            self.api.images_by_id(identifier),
            self.api.images_named(identifier),
            |image: &Image| image.name.clone(),
        )
        .await
    }

    /// Resolve one security group by id or group name.
    pub async fn security_group(&self, identifier: &str) -> Result<Resolved<SecurityGroup>> {
        resolve_one(
            "security group",
            identifier,
            self.api.security_groups_by_id(identifier),
            self.api.security_groups_named(identifier),
            |group: &SecurityGroup| Some(group.group_name.clone()),
        )
        .await
    }

    /// Every instance whose `Name` tag matches any of `names`,
    /// name-decorated. Used for existence checks before launch.
    pub async fn instances_named(&self, names: &[String]) -> Result<Vec<Resolved<Instance>>> {
        Ok(decorate_all(
            self.api.instances_named(names).await?,
            Instance::name_tag,
        ))
    }

    /// Every instance, name-decorated.
    pub async fn all_instances(&self) -> Result<Vec<Resolved<Instance>>> {
        Ok(decorate_all(
            self.api.all_instances().await?,
            Instance::name_tag,
        ))
    }

    /// Every image owned by the account, name-decorated.
    pub async fn own_images(&self) -> Result<Vec<Resolved<Image>>> {
        Ok(decorate_all(self.api.own_images().await?, |image| {
            image.name.clone()
        }))
    }

    /// Every security group, name-decorated.
    pub async fn all_security_groups(&self) -> Result<Vec<Resolved<SecurityGroup>>> {
        Ok(decorate_all(
            self.api.all_security_groups().await?,
            |group| Some(group.group_name.clone()),
        ))
    }
}

fn decorate_all<T>(objects: Vec<T>, name_of: impl Fn(&T) -> Option<String>) -> Vec<Resolved<T>> {
    objects
        .into_iter()
        .map(|obj| {
            let name = name_of(&obj);
            Resolved::new(obj, name)
        })
        .collect()
}

async fn resolve_one<T>(
    kind: &str,
    identifier: &str,
    by_id: impl Future<Output = Result<Vec<T>>>,
    by_name: impl Future<Output = Result<Vec<T>>>,
    name_of: impl Fn(&T) -> Option<String>,
) -> Result<Resolved<T>> {
    match by_id.await {
        Ok(mut objects) if !objects.is_empty() => {
            tracing::info!("found {kind} with id {identifier}");
            let object = objects.remove(0);
            let name = name_of(&object);
            return Ok(Resolved::new(object, name));
        }
        Ok(_) => tracing::info!("no {kind} with id {identifier}"),
        // Not an id after all; fall through to the name lookup.
        Err(e) => tracing::debug!("id lookup for {kind} '{identifier}' failed: {e}"),
    }

    let mut objects = match by_name.await {
        Ok(objects) => objects,
        Err(e) => {
            tracing::debug!("name lookup for {kind} '{identifier}' failed: {e}");
            Vec::new()
        }
    };

    match objects.len() {
        0 => Err(CloudError::ResourceDoesNotExist(format!(
            "no {kind} identified by '{identifier}'"
        ))),
        1 => {
            tracing::info!("found {kind} with name {identifier}");
            let object = objects.remove(0);
            let name = name_of(&object);
            Ok(Resolved::new(object, name))
        }
        _ => Err(CloudError::ResourceDoesNotExist(format!(
            "more than one {kind} named '{identifier}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEc2;

    #[tokio::test]
    async fn resolves_by_id_without_falling_through() {
        let api = FakeEc2::new();
        api.add_instance("i-aaa", Some("web-1"), Some("10.0.0.1"));

        let resolved = Resolver::new(&api).instance("i-aaa").await.unwrap();
        assert_eq!(resolved.id, "i-aaa");
        assert_eq!(resolved.name.as_deref(), Some("web-1"));
        // The id hit short-circuits: no name lookup happened.
        assert_eq!(api.state.lock().unwrap().name_lookups, 0);
    }

    #[tokio::test]
    async fn falls_through_to_name_lookup() {
        let api = FakeEc2::new();
        api.add_instance("i-aaa", Some("web-1"), None);

        let resolved = Resolver::new(&api).instance("web-1").await.unwrap();
        assert_eq!(resolved.id, "i-aaa");
        assert_eq!(resolved.name.as_deref(), Some("web-1"));
    }

    #[tokio::test]
    async fn id_lookup_error_is_swallowed() {
        let api = FakeEc2::new();
        api.add_instance("i-aaa", Some("web-1"), None);
        api.state.lock().unwrap().id_lookup_fails = true;

        let resolved = Resolver::new(&api).instance("web-1").await.unwrap();
        assert_eq!(resolved.id, "i-aaa");
    }

    #[tokio::test]
    async fn zero_matches_is_not_found() {
        let api = FakeEc2::new();

        let err = Resolver::new(&api).instance("web-9").await.unwrap_err();
        match err {
            CloudError::ResourceDoesNotExist(msg) => {
                assert!(msg.contains("no instance identified by 'web-9'"), "{msg}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn ambiguous_name_is_the_same_error_kind() {
        let api = FakeEc2::new();
        api.add_instance("i-aaa", Some("web"), None);
        api.add_instance("i-bbb", Some("web"), None);

        let err = Resolver::new(&api).instance("web").await.unwrap_err();
        match err {
            CloudError::ResourceDoesNotExist(msg) => {
                assert!(msg.contains("more than one instance named 'web'"), "{msg}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn security_groups_resolve_by_group_name() {
        let api = FakeEc2::new();
        api.add_security_group("sg-123", "web-servers");

        let resolver = Resolver::new(&api);
        let by_id = resolver.security_group("sg-123").await.unwrap();
        assert_eq!(by_id.name.as_deref(), Some("web-servers"));

        let by_name = resolver.security_group("web-servers").await.unwrap();
        assert_eq!(by_name.id, "sg-123");
    }

    #[tokio::test]
    async fn bulk_lookups_decorate_every_match() {
        let api = FakeEc2::new();
        api.add_instance("i-aaa", Some("web-1"), None);
        api.add_instance("i-bbb", None, None);

        let all = Resolver::new(&api).all_instances().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name.as_deref(), Some("web-1"));
        assert_eq!(all[1].name, None);
    }
}
