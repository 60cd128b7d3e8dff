use std::time::Duration;

use tracing::warn;

use crate::error::{DatasetError, Result};

/// Runs a store call on the blocking pool, bounded by `timeout`.
///
/// A timed-out call is not cancelled: it runs to completion and commits,
/// only its result is dropped.
pub async fn run_blocking<R, F>(operation: String, timeout: Duration, f: F) -> Result<R>
where
    R: Send + 'static,
    F: FnOnce() -> Result<R> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(f);
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(DatasetError::storage(operation, format!("worker task failed: {join}"))),
        Err(_) => {
            warn!(operation = %operation, timeout_ms = timeout.as_millis() as u64, "exec: call timed out");
            Err(DatasetError::timeout(operation, timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_result_is_passed_through() {
        let out = run_blocking("sum".into(), Duration::from_secs(1), || Ok(2 + 2)).await;
        assert_eq!(out.unwrap(), 4);

        let err = run_blocking::<(), _>("fail".into(), Duration::from_secs(1), || {
            Err(DatasetError::InvalidState("nope".into()))
        })
        .await;
        assert!(matches!(err, Err(DatasetError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let err = run_blocking("slow".into(), Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, DatasetError::Storage { .. }));
        assert!(err.to_string().contains("slow"));
    }
}
