//! Stop, terminate and reboot
//!
//! The destructive calls are deliberately single-attempt: a failed stop
//! or terminate surfaces loudly instead of being re-driven by the retry
//! engine.

use futures_util::future::join_all;

use crate::api::Ec2Api;
use crate::error::Result;
use crate::model::{Instance, Resolved};
use crate::network;
use crate::resolve::Resolver;
use crate::retry::RetryPolicy;
use crate::wait;

/// Stop (and optionally terminate) instances, then remove their
/// addresses from every security-group rule.
pub async fn shutdown<C: Ec2Api + ?Sized>(
    api: &C,
    identifiers: &[String],
    terminate: bool,
) -> Result<Vec<Resolved<Instance>>> {
    let instances = Resolver::new(api).instances(identifiers).await?;
    let ids: Vec<String> = instances.iter().map(|i| i.id.clone()).collect();

    tracing::info!("stopping instances {ids:?}");
    api.stop_instances(&ids).await?;
    if terminate {
        tracing::info!("terminating instances {ids:?}");
        api.terminate_instances(&ids).await?;
    }

    for instance in &instances {
        network::remove_instance_from_rules(api, instance).await?;
    }

    Ok(instances)
}

/// Reboot instances and wait until every one of them is running again.
pub async fn reboot<C: Ec2Api + ?Sized>(
    api: &C,
    identifiers: &[String],
    policy: &RetryPolicy,
) -> Result<Vec<Resolved<Instance>>> {
    let instances = Resolver::new(api).instances(identifiers).await?;
    let ids: Vec<String> = instances.iter().map(|i| i.id.clone()).collect();

    tracing::info!("rebooting instances {ids:?}");
    api.reboot_instances(&ids).await?;

    join_all(
        instances
            .iter()
            .map(|i| wait::wait_until_running(api, &i.id, policy)),
    )
    .await
    .into_iter()
    .collect::<Result<Vec<()>>>()?;

    Ok(instances)
}
