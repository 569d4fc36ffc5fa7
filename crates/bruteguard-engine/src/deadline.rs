use bruteguard_core::{GuardError, Result};
use std::future::Future;
use tokio::time::Instant;

/// Run `fut` until `deadline`, failing with `GuardError::Timeout` naming `operation`.
pub async fn with_deadline<T, F>(deadline: Instant, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(GuardError::Timeout(operation.to_string())),
    }
}
