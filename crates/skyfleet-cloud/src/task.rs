//! Blocking-call adapter
//!
//! Dispatches a blocking closure to the runtime's blocking pool so the
//! cooperative scheduler is never stalled. Results and panics propagate
//! unchanged to the awaiting task. No retry or transformation logic
//! lives here; that is layered on top by the retry executor.

/// Run a blocking closure off the async scheduler and await its result.
pub async fn run_blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => value,
        Err(e) => {
            if let Ok(panic) = e.try_into_panic() {
                std::panic::resume_unwind(panic);
            }
            // The runtime is shutting down; nothing sensible to return.
            panic!("blocking task cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_the_closure_result() {
        let value = run_blocking(|| 40 + 2).await;
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn propagates_errors_unchanged() {
        let result: Result<(), String> = run_blocking(|| Err("boom".to_string())).await;
        assert_eq!(result.unwrap_err(), "boom");
    }

    #[tokio::test]
    #[should_panic(expected = "inner panic")]
    async fn resumes_panics_on_the_awaiting_task() {
        run_blocking(|| panic!("inner panic")).await
    }
}
