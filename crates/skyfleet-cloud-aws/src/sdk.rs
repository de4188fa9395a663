//! SDK error classification

use aws_sdk_ec2::error::{ProvideErrorMetadata, SdkError};
use skyfleet_cloud::CloudError;

/// Map an SDK error onto the provider error model.
///
/// Dispatch failures, timeouts and malformed responses are transient;
/// service errors are not.
pub(crate) fn map_err<E, R>(context: &str, err: SdkError<E, R>) -> CloudError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let transient = matches!(
        err,
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_)
    );
    let message = match err.as_service_error() {
        Some(service) => format!(
            "{context}: {}{}",
            service.code().unwrap_or("unknown"),
            service
                .message()
                .map(|m| format!(": {m}"))
                .unwrap_or_default()
        ),
        None => format!("{context}: {err}"),
    };
    CloudError::Api { message, transient }
}

/// Lookups treat the provider's unknown/malformed-identifier responses
/// as "no match" (`None`), so a name-shaped identifier can fall through
/// to the name lookup.
pub(crate) fn swallow_not_found<T, E, R>(
    result: Result<T, SdkError<E, R>>,
    context: &str,
) -> Result<Option<T>, CloudError>
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            let code_says_missing = err
                .as_service_error()
                .and_then(|service| service.code())
                .is_some_and(|code| code.ends_with("NotFound") || code.ends_with("Malformed"));
            if code_says_missing {
                Ok(None)
            } else {
                Err(map_err(context, err))
            }
        }
    }
}
