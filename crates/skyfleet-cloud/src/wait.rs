//! Convergence waiters
//!
//! Polling loops that block logical progress until provider-observed
//! state matches a target condition. Each poll re-fetches live state
//! (nothing is cached between attempts), and each waiter is a case of
//! the retry executor with a predicate instead of a single call.

use crate::api::Ec2Api;
use crate::error::{CloudError, Result};
use crate::model::{ImageState, Instance};
use crate::retry::{RetryError, RetryPolicy, run_with_retries};

/// Wait until the provider acknowledges the instance's existence.
///
/// Used right after creation: tagging too early fails because the
/// provider has not yet indexed the resource.
pub async fn wait_until_exists<C: Ec2Api + ?Sized>(
    api: &C,
    id: &str,
    policy: &RetryPolicy,
) -> Result<()> {
    tracing::info!("waiting until instance {id} exists");
    run_with_retries(policy, || async {
        let found = api.instances_by_id(id).await?;
        if found.is_empty() {
            Err(CloudError::NotReady(format!(
                "instance {id} is not indexed yet"
            )))
        } else {
            Ok(())
        }
    })
    .await
    .map_err(|e| give_up(&format!("instance {id} to exist"), e))
}

/// Wait until the instance's lifecycle state is `running`.
pub async fn wait_until_running<C: Ec2Api + ?Sized>(
    api: &C,
    id: &str,
    policy: &RetryPolicy,
) -> Result<()> {
    tracing::info!("waiting until instance {id} is running");
    run_with_retries(policy, || async {
        match fetch(api, id).await? {
            Some(instance) if instance.is_running() => Ok(()),
            Some(instance) => Err(CloudError::NotReady(format!(
                "instance {id} is {:?}",
                instance.state
            ))),
            None => Err(CloudError::NotReady(format!("instance {id} not found yet"))),
        }
    })
    .await
    .map_err(|e| give_up(&format!("instance {id} to run"), e))
}

/// Wait until the instance reports a public address; returns it.
///
/// Exhausting the attempt budget raises the dedicated
/// [`CloudError::AddressTimeout`] so callers can tell "never got an
/// address" apart from other convergence failures.
pub async fn wait_for_public_address<C: Ec2Api + ?Sized>(
    api: &C,
    id: &str,
    policy: &RetryPolicy,
) -> Result<String> {
    tracing::info!("waiting until instance {id} has a public address");
    let address = run_with_retries(policy, || async {
        match fetch(api, id).await? {
            Some(Instance {
                public_ip: Some(ip),
                ..
            }) => Ok(ip),
            _ => Err(CloudError::NotReady(format!(
                "instance {id} has no public address yet"
            ))),
        }
    })
    .await
    .map_err(|e| match e {
        RetryError::Exhausted { source, .. } => CloudError::AddressTimeout {
            id: id.to_string(),
            message: source.to_string(),
        },
        RetryError::Aborted(e) => e,
    })?;

    tracing::info!("instance {id} has public address {address}");
    Ok(address)
}

/// Wait until an image snapshot transitions to `available`.
///
/// A pending image (or a provider-side wait timeout, surfaced as a
/// transient API error) means "try again"; a failed image aborts; only
/// attempt exhaustion is a convergence failure.
pub async fn wait_for_image_available<C: Ec2Api + ?Sized>(
    api: &C,
    image_id: &str,
    policy: &RetryPolicy,
) -> Result<()> {
    tracing::info!("waiting for image {image_id} to become available");
    run_with_retries(policy, || async {
        let images = api.images_by_id(image_id).await?;
        match images.first().map(|i| i.state) {
            Some(ImageState::Available) => Ok(()),
            Some(ImageState::Failed) => Err(CloudError::api(format!(
                "image {image_id} entered state 'failed'"
            ))),
            Some(state) => Err(CloudError::NotReady(format!(
                "image {image_id} is {state:?}"
            ))),
            None => Err(CloudError::NotReady(format!(
                "image {image_id} is not indexed yet"
            ))),
        }
    })
    .await
    .map_err(|e| give_up(&format!("image {image_id} to become available"), e))?;

    tracing::info!("image {image_id} is available");
    Ok(())
}

async fn fetch<C: Ec2Api + ?Sized>(api: &C, id: &str) -> Result<Option<Instance>> {
    Ok(api.instances_by_id(id).await?.into_iter().next())
}

fn give_up(what: &str, e: RetryError<CloudError>) -> CloudError {
    match e {
        RetryError::Exhausted { source, .. } => CloudError::ConvergenceTimeout {
            what: what.to_string(),
            message: source.to_string(),
        },
        RetryError::Aborted(e) => e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEc2;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn address_waiter_gives_up_after_the_attempt_budget() {
        let api = FakeEc2::new();
        // An instance that never reports an address.
        api.add_instance("i-aaa", Some("web-1"), None);

        let policy = RetryPolicy::new(Duration::from_secs(1), 3);
        let err = wait_for_public_address(&api, "i-aaa", &policy)
            .await
            .unwrap_err();

        // 3 polls, 2 sleeps, then the dedicated address failure.
        assert_eq!(api.state.lock().unwrap().id_lookups, 3);
        match err {
            CloudError::AddressTimeout { id, .. } => assert_eq!(id, "i-aaa"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn address_waiter_returns_the_address_once_reported() {
        let api = FakeEc2::new();
        api.add_instance("i-aaa", Some("web-1"), None);
        api.state.lock().unwrap().assign_ip_after = Some((2, "4.5.6.7".into()));

        let policy = RetryPolicy::new(Duration::from_secs(1), 10);
        let ip = wait_for_public_address(&api, "i-aaa", &policy).await.unwrap();
        assert_eq!(ip, "4.5.6.7");
    }

    #[tokio::test(start_paused = true)]
    async fn running_waiter_polls_until_running() {
        let api = FakeEc2::new();
        api.add_stopped_instance("i-bbb", Some("db-1"));
        api.state.lock().unwrap().running_after = Some(3);

        let policy = RetryPolicy::new(Duration::from_secs(1), 10);
        wait_until_running(&api, "i-bbb", &policy).await.unwrap();
        assert!(api.state.lock().unwrap().id_lookups >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn image_waiter_treats_pending_as_try_again() {
        let api = FakeEc2::new();
        api.add_pending_image("ami-123", "web-1-i-aaa-20240101T000000Z");
        api.state.lock().unwrap().image_available_after = Some(2);

        let policy = RetryPolicy::new(Duration::from_secs(1), 5);
        wait_for_image_available(&api, "ami-123", &policy).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn exists_waiter_times_out_into_convergence_error() {
        let api = FakeEc2::new();

        let policy = RetryPolicy::new(Duration::from_secs(1), 2);
        let err = wait_until_exists(&api, "i-zzz", &policy).await.unwrap_err();
        assert!(matches!(err, CloudError::ConvergenceTimeout { .. }));
    }
}
